//! Build feed - top-level build notification stream
//!
//! Turns the `builds/since` stream into `BuildDescriptor`s. Errors on this
//! stream are logged and skipped; the stream primitive reconnects on its own.

use contracts::{BuildDescriptor, BuildSummary, EventStream, StreamSignal, BUILD_EVENT_NAME};
use metrics::counter;
use tracing::{debug, error, info, trace, warn};

/// Decodes build summaries off an open top-level stream
pub struct BuildFeed<St> {
    stream: St,
    server_url: String,
}

impl<St: EventStream> BuildFeed<St> {
    pub fn new(stream: St, server_url: impl Into<String>) -> Self {
        Self {
            stream,
            server_url: server_url.into(),
        }
    }

    /// Wait for the next announced build.
    ///
    /// Returns `None` only once the underlying stream is closed.
    pub async fn next_build(&mut self) -> Option<BuildDescriptor> {
        loop {
            match self.stream.next_signal().await? {
                StreamSignal::Open => {
                    info!(server = %self.server_url, "build stream open");
                }
                // counted by the source, which sees every stream
                StreamSignal::Error { message } => {
                    error!(server = %self.server_url, error = %message, "build stream error");
                }
                StreamSignal::Event { name, data } if name == BUILD_EVENT_NAME => {
                    match serde_json::from_str::<BuildSummary>(&data) {
                        Ok(summary) => {
                            counter!("scan_aggregator_builds_announced_total").increment(1);
                            debug!(build_id = %summary.build_id, "build announced");
                            return Some(summary.into_descriptor(&self.server_url));
                        }
                        Err(e) => {
                            counter!("scan_aggregator_build_summaries_rejected_total")
                                .increment(1);
                            warn!(error = %e, "undecodable build summary");
                        }
                    }
                }
                StreamSignal::Event { name, .. } => {
                    trace!(event = %name, "ignoring event on build stream");
                }
            }
        }
    }

    pub fn close(&mut self) {
        self.stream.close();
    }
}
