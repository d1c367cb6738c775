//! ListenerBlueprint - Config Loader output
//!
//! Describes where to listen, how many builds to process at once, how the
//! stream primitive behaves and where records go.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default number of builds processed at one time.
///
/// With a fast connection to the server this can be raised for throughput.
pub const DEFAULT_MAX_CONCURRENT_BUILDS: usize = 6;

/// Largest accepted per-build timeout, one week
pub const MAX_BUILD_TIMEOUT_SECS: u64 = 7 * 24 * 60 * 60;

/// Complete listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerBlueprint {
    pub server: ServerConfig,

    #[serde(default)]
    pub processing: ProcessingConfig,

    #[serde(default)]
    pub stream: StreamConfig,

    /// Record outputs
    #[serde(default)]
    pub sinks: Vec<SinkConfig>,
}

/// Telemetry server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Base URL, e.g. `https://ge.example.com`
    pub url: String,

    /// Where the build stream starts: `now` or an epoch-millis timestamp
    #[serde(default = "default_start_time")]
    pub start_time: String,

    /// Send credentials with stream requests
    #[serde(default = "default_with_credentials")]
    pub with_credentials: bool,

    /// Bearer token sent when `with_credentials` is set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

fn default_start_time() -> String {
    "now".to_string()
}

fn default_with_credentials() -> bool {
    true
}

/// Admission control settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Builds processed simultaneously, must be > 0
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_builds: usize,

    /// Finalize a build whose stream has not ended after this many seconds.
    /// Unset means a stalled stream holds its slot indefinitely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_timeout_secs: Option<u64>,
}

fn default_max_concurrent() -> usize {
    DEFAULT_MAX_CONCURRENT_BUILDS
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            max_concurrent_builds: DEFAULT_MAX_CONCURRENT_BUILDS,
            build_timeout_secs: None,
        }
    }
}

/// Stream primitive settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Delay before reconnecting a dropped stream, unless the server sends `retry:`
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Buffered signals per open stream
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_reconnect_delay_ms() -> u64 {
    3000
}

fn default_channel_capacity() -> usize {
    256
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: default_reconnect_delay_ms(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// Sink 输出配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    pub name: String,

    pub sink_type: SinkType,

    /// 积压告警阈值: queued records above this log a slow-sink warning.
    /// Records are never dropped for back-pressure.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// 类型特定参数
    #[serde(default)]
    pub params: HashMap<String, String>,
}

fn default_queue_capacity() -> usize {
    100
}

impl SinkConfig {
    pub fn log(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sink_type: SinkType::Log,
            queue_capacity: default_queue_capacity(),
            params: HashMap::new(),
        }
    }
}

/// Sink 类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkType {
    /// 日志输出
    Log,
    /// JSON lines file
    File,
}

impl ListenerBlueprint {
    /// Minimal blueprint for a server, with defaults everywhere else
    pub fn for_server(url: impl Into<String>) -> Self {
        Self {
            server: ServerConfig {
                url: url.into(),
                start_time: default_start_time(),
                with_credentials: default_with_credentials(),
                access_token: None,
            },
            processing: ProcessingConfig::default(),
            stream: StreamConfig::default(),
            sinks: vec![SinkConfig::log("log")],
        }
    }
}
