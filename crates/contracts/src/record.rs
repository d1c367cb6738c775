//! AggregateRecord - finalized per-build metrics

use serde::{Deserialize, Serialize};

/// Flat metric record for one build.
///
/// Times are in milliseconds. Fields the build never reported stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateRecord {
    pub scenario: Option<String>,
    pub phase: Option<String>,
    pub number: Option<i64>,
    pub step: Option<String>,

    /// Requested tasks, comma separated
    pub tasks: Option<String>,

    /// Link to the build scan
    pub build_scan: String,

    /// Build finished minus build started
    pub execution_time: Option<i64>,

    /// Build finished minus task graph calculation finished
    pub task_execution_time: Option<i64>,

    pub gc_time: Option<i64>,

    /// Sum of all build cache pack operations
    pub pack_time: i64,

    /// Sum of all build cache unpack operations
    pub unpack_time: i64,
}
