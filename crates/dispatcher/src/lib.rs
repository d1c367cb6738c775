//! # Dispatcher
//!
//! 构建调度与记录分发模块。
//!
//! 负责：
//! - 有界并发准入：FIFO 等待队列 + in-flight 计数
//! - 为每个准入的构建打开事件流并驱动 `BuildSession`
//! - 把完成的 `AggregateRecord` fan-out 到多个 sinks
//! - 隔离慢 sink，不阻塞调度

pub mod error;
pub mod handle;
pub mod metrics;
pub mod processor;
pub mod sinks;
pub mod submission;

use contracts::{SinkConfig, SinkType};
use tracing::instrument;

pub use contracts::{AggregateRecord, CompletionSink};
pub use error::DispatcherError;
pub use handle::SinkHandle;
pub use metrics::{MetricsSnapshot, ProcessorSnapshot, ProcessorStats, SinkMetrics};
pub use processor::{BuildOrigin, BuildProcessor, ProcessorBuilder, ProcessorConfig, SessionEnd};
pub use sinks::{FileSink, FileSinkConfig, LogSink, RecordList, RecordListSink};
pub use submission::extract_scan_urls;

/// Create a SinkHandle from configuration
#[instrument(
    name = "dispatcher_create_sink_handle",
    skip(config),
    fields(sink = %config.name, sink_type = ?config.sink_type)
)]
pub async fn create_sink_handle(config: &SinkConfig) -> Result<SinkHandle, DispatcherError> {
    match config.sink_type {
        SinkType::Log => {
            let sink = LogSink::new(&config.name);
            Ok(SinkHandle::spawn(sink, config.queue_capacity))
        }
        SinkType::File => {
            let sink = FileSink::from_params(&config.name, &config.params)
                .map_err(|e| DispatcherError::sink_creation(&config.name, e.to_string()))?;
            Ok(SinkHandle::spawn(sink, config.queue_capacity))
        }
    }
}

/// Create handles for every configured sink, in order
#[instrument(
    name = "dispatcher_create_sink_handles",
    skip(configs),
    fields(sink_count = configs.len())
)]
pub async fn create_sink_handles(
    configs: &[SinkConfig],
) -> Result<Vec<SinkHandle>, DispatcherError> {
    let mut handles = Vec::with_capacity(configs.len());
    for config in configs {
        handles.push(create_sink_handle(config).await?);
    }
    Ok(handles)
}
