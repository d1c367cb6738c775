//! SinkHandle - one worker task per completion sink
//!
//! Records are never dropped for back-pressure: the queue between the
//! processor and a sink is unbounded, and `backlog_warn` only decides when
//! a slow sink gets reported. A record is lost only if the worker itself is
//! gone, which `deliver` reports.

use std::sync::Arc;

use contracts::{AggregateRecord, CompletionSink};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument, warn};

use crate::metrics::SinkMetrics;

pub struct SinkHandle {
    name: String,
    tx: mpsc::UnboundedSender<AggregateRecord>,
    metrics: Arc<SinkMetrics>,
    backlog_warn: usize,
    worker: JoinHandle<()>,
}

impl SinkHandle {
    /// Spawn the worker. `backlog_warn` is the queued-record count above
    /// which the sink is logged as falling behind.
    pub fn spawn<S: CompletionSink + 'static>(sink: S, backlog_warn: usize) -> Self {
        let name = sink.name().to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        let metrics = Arc::new(SinkMetrics::new());

        let worker = tokio::spawn(drain_into(sink, rx, Arc::clone(&metrics)));

        Self {
            name,
            tx,
            metrics,
            backlog_warn: backlog_warn.max(1),
            worker,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metrics(&self) -> &Arc<SinkMetrics> {
        &self.metrics
    }

    /// Hand a record to the worker.
    ///
    /// `false` means the worker has stopped and the record is lost.
    pub fn deliver(&self, record: AggregateRecord) -> bool {
        let backlog = self.metrics.record_queued();
        if let Err(mpsc::error::SendError(record)) = self.tx.send(record) {
            self.metrics.record_unqueued();
            self.metrics.inc_lost_count();
            error!(
                sink = %self.name,
                build_scan = %record.build_scan,
                "Sink worker gone, record lost"
            );
            return false;
        }

        // once per crossing, not once per record
        if backlog == self.backlog_warn + 1 {
            warn!(sink = %self.name, backlog, "Sink falling behind");
        }
        true
    }

    /// Write everything still queued, then flush and close the sink
    #[instrument(name = "sink_handle_shutdown", skip(self), fields(sink = %self.name))]
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.worker.await {
            error!(error = ?e, "Sink worker panicked");
        }
        debug!(
            written = self.metrics.write_count(),
            failed = self.metrics.failure_count(),
            "Sink closed"
        );
    }
}

#[instrument(name = "sink_worker", skip_all, fields(sink = %sink.name()))]
async fn drain_into<S: CompletionSink>(
    mut sink: S,
    mut rx: mpsc::UnboundedReceiver<AggregateRecord>,
    metrics: Arc<SinkMetrics>,
) {
    let name = sink.name().to_string();

    while let Some(record) = rx.recv().await {
        metrics.record_unqueued();

        let ok = match sink.write(&record).await {
            Ok(()) => {
                metrics.inc_write_count();
                true
            }
            Err(e) => {
                // 单条失败不影响后续记录
                metrics.inc_failure_count();
                error!(build_scan = %record.build_scan, error = %e, "Write failed");
                false
            }
        };
        observability::record_record_dispatched(&name, ok);
    }

    if let Err(e) = sink.flush().await {
        error!(error = %e, "Flush failed");
    }
    if let Err(e) = sink.close().await {
        error!(error = %e, "Close failed");
    }
}
