//! Build identification records
//!
//! `BuildDescriptor` is the unit of work handed to the dispatcher;
//! `BuildSummary` is what the top-level build stream delivers.

use serde::{Deserialize, Serialize};

use crate::BuildId;

/// Tag the profiler attaches to every build it produces.
pub const PROFILER_TAG: &str = "gradle-profiler";

/// One build to be processed.
///
/// Immutable once enqueued; consumed exactly once by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildDescriptor {
    /// Server the build was published to, without trailing slash
    pub server_url: String,

    /// Server-assigned build id
    pub build_id: BuildId,

    /// Emit a record even when the build lacks the profiler tag
    #[serde(default)]
    pub ignore_tags: bool,
}

impl BuildDescriptor {
    pub fn new(
        server_url: impl Into<String>,
        build_id: impl Into<BuildId>,
        ignore_tags: bool,
    ) -> Self {
        Self {
            server_url: server_url.into(),
            build_id: build_id.into(),
            ignore_tags,
        }
    }

    /// Human-facing build scan link: `<server>/s/<id>`
    pub fn build_scan_url(&self) -> String {
        format!("{}/s/{}", self.server_url, self.build_id)
    }
}

/// Build notification from the `builds/since` stream.
///
/// Only `buildId` is required; every other field the server sends is kept
/// verbatim in `extra` for logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildSummary {
    pub build_id: BuildId,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl BuildSummary {
    /// Descriptor for a build announced on the live stream.
    ///
    /// Live builds are always subject to tag gating.
    pub fn into_descriptor(self, server_url: &str) -> BuildDescriptor {
        BuildDescriptor::new(server_url, self.build_id, false)
    }
}
