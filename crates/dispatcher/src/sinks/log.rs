//! LogSink - logs each record via tracing

use contracts::{AggregateRecord, CompletionSink, ContractError};
use tracing::{info, instrument};

/// Sink that logs record fields
pub struct LogSink {
    name: String,
}

impl LogSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl CompletionSink for LogSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "log_sink_write",
        skip(self, record),
        fields(sink = %self.name)
    )]
    async fn write(&mut self, record: &AggregateRecord) -> Result<(), ContractError> {
        info!(
            build_scan = %record.build_scan,
            scenario = ?record.scenario,
            phase = ?record.phase,
            number = ?record.number,
            step = ?record.step,
            tasks = ?record.tasks,
            execution_time = ?record.execution_time,
            task_execution_time = ?record.task_execution_time,
            gc_time = ?record.gc_time,
            pack_time = record.pack_time,
            unpack_time = record.unpack_time,
            "Build processed"
        );
        Ok(())
    }

    #[instrument(name = "log_sink_flush", skip(self))]
    async fn flush(&mut self) -> Result<(), ContractError> {
        Ok(())
    }

    #[instrument(name = "log_sink_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        info!(sink = %self.name, "LogSink closed");
        Ok(())
    }
}
