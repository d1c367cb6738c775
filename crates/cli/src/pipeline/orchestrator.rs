//! Pipeline orchestrator - wires source, processor and sinks together.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use contracts::{
    EventSource, ListenerBlueprint, SinkConfig, SinkType, StreamConfig, MAX_BUILD_TIMEOUT_SECS,
};
use dispatcher::{
    BuildProcessor, ProcessorConfig, RecordList, RecordListSink, SinkHandle, SinkMetrics,
};
use ingestion::{IngestionMetrics, SseEventSource, SseSourceConfig};
use tracing::{info, warn};

use super::PipelineStats;
use crate::cli::ProcessingArgs;
use crate::error::CliError;

/// Backlog warning threshold of the internal record list sink
const RECORD_LIST_BACKLOG: usize = 1024;

/// Everything needed to run a processor, after CLI overrides
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub processor: ProcessorConfig,
    pub stream: StreamConfig,
    pub access_token: Option<String>,
    pub sinks: Vec<SinkConfig>,
    /// Metrics server port (None = disabled)
    pub metrics_port: Option<u16>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            processor: ProcessorConfig::default(),
            stream: StreamConfig::default(),
            access_token: None,
            sinks: vec![SinkConfig::log("log")],
            metrics_port: None,
        }
    }
}

impl PipelineConfig {
    pub fn from_blueprint(blueprint: &ListenerBlueprint) -> Self {
        Self {
            processor: ProcessorConfig::from_blueprint(blueprint),
            stream: blueprint.stream.clone(),
            access_token: blueprint.server.access_token.clone(),
            sinks: blueprint.sinks.clone(),
            metrics_port: None,
        }
    }

    /// Apply command line overrides on top of file values
    pub fn apply_args(&mut self, args: &ProcessingArgs) {
        if let Some(max) = args.max_concurrent {
            info!(max_concurrent = max, "Overriding max concurrent builds from CLI");
            self.processor.max_concurrent_builds = max;
        }
        if let Some(secs) = args.build_timeout {
            self.processor.build_timeout = Some(Duration::from_secs(secs));
        }
        if args.access_token.is_some() {
            self.access_token = args.access_token.clone();
        }
        if args.no_credentials {
            self.processor.with_credentials = false;
        }
        if let Some(path) = &args.output {
            self.sinks.push(file_sink_config(path));
        }
        if args.metrics_port != 0 {
            self.metrics_port = Some(args.metrics_port);
        }
    }

    pub fn validate(&self) -> Result<(), CliError> {
        if self.processor.max_concurrent_builds == 0 {
            return Err(CliError::config_validation(
                "max concurrent builds must be greater than 0",
            ));
        }
        if let Some(timeout) = self.processor.build_timeout {
            if timeout.is_zero() {
                return Err(CliError::config_validation(
                    "build timeout must be greater than 0",
                ));
            }
            if timeout > Duration::from_secs(MAX_BUILD_TIMEOUT_SECS) {
                return Err(CliError::config_validation(format!(
                    "build timeout must be at most {MAX_BUILD_TIMEOUT_SECS}s"
                )));
            }
        }
        Ok(())
    }
}

fn file_sink_config(path: &Path) -> SinkConfig {
    SinkConfig {
        name: "output".to_string(),
        sink_type: SinkType::File,
        queue_capacity: 100,
        params: [("path".to_string(), path.display().to_string())]
            .into_iter()
            .collect(),
    }
}

/// Main pipeline orchestrator
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Start against the real server
    pub async fn start(self) -> Result<RunningPipeline> {
        let source_config =
            SseSourceConfig::from_stream_config(&self.config.stream, self.config.access_token.clone());
        let source = Arc::new(SseEventSource::new(source_config));
        let source_metrics = Some(source.metrics());
        self.start_with_source(source, source_metrics).await
    }

    /// Start with any event source (mock sources in tests)
    pub async fn start_with_source<S: EventSource + 'static>(
        self,
        source: Arc<S>,
        source_metrics: Option<Arc<IngestionMetrics>>,
    ) -> Result<RunningPipeline> {
        let started = Instant::now();

        if let Some(port) = self.config.metrics_port {
            observability::init_metrics_only(port)?;
            info!("Metrics endpoint available on port {}", port);
        }

        if self.config.sinks.is_empty() {
            warn!("No sinks configured - records are only kept for the summary");
        }

        let mut handles: Vec<SinkHandle> = dispatcher::create_sink_handles(&self.config.sinks)
            .await
            .context("Failed to create sinks")?;
        let active_sinks = handles.len();
        let sink_metrics: Vec<(String, Arc<SinkMetrics>)> = handles
            .iter()
            .map(|handle| (handle.name().to_string(), Arc::clone(handle.metrics())))
            .collect();

        let records = RecordList::new();
        handles.push(SinkHandle::spawn(
            RecordListSink::new("summary", records.clone()),
            RECORD_LIST_BACKLOG,
        ));

        let processor = BuildProcessor::spawn(self.config.processor.clone(), source, handles);
        info!(
            max_concurrent = self.config.processor.max_concurrent_builds,
            build_timeout = ?self.config.processor.build_timeout,
            active_sinks,
            "Build processor started"
        );

        Ok(RunningPipeline {
            processor,
            records,
            source_metrics,
            sink_metrics,
            started,
            active_sinks,
        })
    }
}

/// A started pipeline
pub struct RunningPipeline {
    processor: BuildProcessor,
    records: RecordList,
    source_metrics: Option<Arc<IngestionMetrics>>,
    /// Configured sinks only
    sink_metrics: Vec<(String, Arc<SinkMetrics>)>,
    started: Instant,
    active_sinks: usize,
}

impl RunningPipeline {
    pub fn processor(&self) -> &BuildProcessor {
        &self.processor
    }

    /// Records so far, newest first
    pub fn records(&self) -> &RecordList {
        &self.records
    }

    /// Shut the processor down and collect statistics
    pub async fn finish(self) -> Result<PipelineStats> {
        info!("Shutting down pipeline...");
        self.processor
            .shutdown()
            .await
            .context("Failed to shut down build processor")?;

        let processor = self.processor.stats();
        let mut stats = PipelineStats {
            builds_enqueued: processor.enqueued,
            builds_completed: processor.completed,
            builds_timed_out: processor.timed_out,
            peak_in_flight: processor.peak_in_flight,
            duration: self.started.elapsed(),
            active_sinks: self.active_sinks,
            ..Default::default()
        };
        if let Some(metrics) = &self.source_metrics {
            let snapshot = metrics.snapshot();
            stats.streams_opened = snapshot.streams_opened;
            stats.stream_errors = snapshot.errors;
        }
        for (name, metrics) in &self.sink_metrics {
            let snapshot = metrics.snapshot();
            info!(
                sink = %name,
                written = snapshot.write_count,
                failed = snapshot.failure_count,
                lost = snapshot.lost_count,
                peak_backlog = snapshot.peak_backlog,
                "Sink summary"
            );
            stats.sink_write_failures += snapshot.failure_count;
            stats.records_lost += snapshot.lost_count;
        }

        // oldest first
        for record in self.records.snapshot().iter().rev() {
            stats.record_stats.update(record);
        }

        info!(
            duration_secs = stats.duration.as_secs_f64(),
            records = stats.record_stats.total_records,
            "Pipeline shutdown complete"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{BuildDescriptor, PROFILER_TAG};
    use ingestion::{MockEventSource, StreamScript};
    use serde_json::json;
    use std::path::PathBuf;

    fn args() -> ProcessingArgs {
        ProcessingArgs {
            config: None,
            max_concurrent: None,
            build_timeout: None,
            access_token: None,
            no_credentials: false,
            output: None,
            metrics_port: 0,
        }
    }

    #[test]
    fn test_apply_args_overrides() {
        let mut config = PipelineConfig::default();
        let mut overrides = args();
        overrides.max_concurrent = Some(2);
        overrides.build_timeout = Some(30);
        overrides.no_credentials = true;
        overrides.output = Some(PathBuf::from("records.jsonl"));

        config.apply_args(&overrides);
        assert_eq!(config.processor.max_concurrent_builds, 2);
        assert_eq!(config.processor.build_timeout, Some(Duration::from_secs(30)));
        assert!(!config.processor.with_credentials);
        assert_eq!(config.sinks.len(), 2);
        assert_eq!(config.sinks[1].sink_type, SinkType::File);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let mut config = PipelineConfig::default();
        config.processor.max_concurrent_builds = 0;
        assert!(matches!(
            config.validate(),
            Err(CliError::ConfigValidation { .. })
        ));
    }

    #[test]
    fn test_validate_bounds_build_timeout() {
        let mut config = PipelineConfig::default();
        config.processor.build_timeout = Some(Duration::from_secs(MAX_BUILD_TIMEOUT_SECS));
        assert!(config.validate().is_ok());

        config.processor.build_timeout = Some(Duration::from_secs(u64::MAX));
        assert!(matches!(
            config.validate(),
            Err(CliError::ConfigValidation { .. })
        ));
    }

    #[tokio::test]
    async fn test_pipeline_with_mock_source() {
        let source = Arc::new(MockEventSource::new());
        source.script(
            "/build/b1/",
            StreamScript::new()
                .open()
                .build_event("UserTag", 0, json!({ "tag": PROFILER_TAG }))
                .build_event("BuildStarted", 10, json!({}))
                .build_event("BuildFinished", 60, json!({}))
                .error("end of stream"),
        );

        let config = PipelineConfig {
            sinks: vec![],
            ..Default::default()
        };
        let pipeline = Pipeline::new(config)
            .start_with_source(source, None)
            .await
            .unwrap();

        pipeline
            .processor()
            .submit_direct(BuildDescriptor::new("https://ge", "b1", false))
            .unwrap();
        pipeline.processor().wait_idle().await.unwrap();

        let stats = pipeline.finish().await.unwrap();
        assert_eq!(stats.builds_completed, 1);
        assert_eq!(stats.record_stats.total_records, 1);
        assert_eq!(stats.active_sinks, 0);
        assert_eq!(stats.records_lost, 0);
    }
}
