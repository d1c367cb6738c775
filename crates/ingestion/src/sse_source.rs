//! SSE event source over HTTP
//!
//! Each opened stream runs a background connection loop: connect, decode
//! frames into `StreamSignal`s, and on failure surface `Error` and reconnect
//! after the retry delay, resuming from the last event id. The loop only
//! stops when the caller closes (or drops) the stream.

use std::sync::Arc;
use std::time::Duration;

use async_channel::{bounded, Receiver, Sender};
use contracts::{EventSource, EventStream, StreamRequest, StreamSignal};
use futures::StreamExt;
use metrics::counter;
use reqwest::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::config::{IngestionMetrics, SseSourceConfig};
use crate::error::{IngestionError, Result};
use crate::sse::SseDecoder;

const LAST_EVENT_ID: &str = "Last-Event-ID";

/// Event source backed by `reqwest`
#[derive(Clone)]
pub struct SseEventSource {
    client: reqwest::Client,
    config: Arc<SseSourceConfig>,
    metrics: Arc<IngestionMetrics>,
}

impl SseEventSource {
    pub fn new(config: SseSourceConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    pub fn with_client(client: reqwest::Client, config: SseSourceConfig) -> Self {
        Self {
            client,
            config: Arc::new(config),
            metrics: Arc::new(IngestionMetrics::new()),
        }
    }

    pub fn metrics(&self) -> Arc<IngestionMetrics> {
        self.metrics.clone()
    }
}

impl EventSource for SseEventSource {
    type Stream = SseStream;

    fn open(&self, request: StreamRequest) -> SseStream {
        let (tx, rx) = bounded(self.config.channel_capacity.max(1));
        self.metrics.record_opened();

        let task = tokio::spawn(connection_loop(
            self.client.clone(),
            self.config.clone(),
            request.clone(),
            tx,
            self.metrics.clone(),
        ));

        SseStream {
            url: request.url,
            rx,
            task: Some(task),
            metrics: self.metrics.clone(),
        }
    }
}

/// Handle to one SSE connection loop
pub struct SseStream {
    url: String,
    rx: Receiver<StreamSignal>,
    /// `None` once closed
    task: Option<JoinHandle<()>>,
    metrics: Arc<IngestionMetrics>,
}

impl SseStream {
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl EventStream for SseStream {
    async fn next_signal(&mut self) -> Option<StreamSignal> {
        if self.task.is_none() {
            return None;
        }
        self.rx.recv().await.ok()
    }

    fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            self.rx.close();
            self.metrics.record_closed();
            debug!(url = %self.url, "stream closed");
        }
    }
}

impl Drop for SseStream {
    fn drop(&mut self) {
        self.close();
    }
}

#[instrument(name = "sse_connection_loop", skip_all, fields(url = %request.url))]
async fn connection_loop(
    client: reqwest::Client,
    config: Arc<SseSourceConfig>,
    request: StreamRequest,
    tx: Sender<StreamSignal>,
    metrics: Arc<IngestionMetrics>,
) {
    let mut decoder = SseDecoder::new();
    let mut attempt: u64 = 0;

    loop {
        if attempt > 0 {
            metrics.record_reconnect();
            counter!("scan_aggregator_stream_reconnects_total").increment(1);
        }
        attempt += 1;

        let message = match stream_once(&client, &config, &request, &mut decoder, &tx, &metrics)
            .await
        {
            Ok(()) => "end of stream".to_string(),
            Err(IngestionError::ReceiverClosed { .. }) => return,
            Err(e) => e.to_string(),
        };

        decoder.reset_frame();
        metrics.record_error();
        debug!(attempt, error = %message, "stream interrupted");

        if tx.send(StreamSignal::error(message)).await.is_err() {
            return;
        }

        let delay = decoder
            .retry_ms()
            .map(Duration::from_millis)
            .unwrap_or(config.reconnect_delay);
        tokio::time::sleep(delay).await;
    }
}

/// One connection attempt. `Ok(())` means the body ended cleanly.
async fn stream_once(
    client: &reqwest::Client,
    config: &SseSourceConfig,
    request: &StreamRequest,
    decoder: &mut SseDecoder,
    tx: &Sender<StreamSignal>,
    metrics: &IngestionMetrics,
) -> Result<()> {
    let url = request.url.as_str();

    let mut builder = client
        .get(url)
        .header(ACCEPT, "text/event-stream")
        .header(CACHE_CONTROL, "no-cache");
    if request.with_credentials {
        if let Some(token) = &config.access_token {
            builder = builder.bearer_auth(token);
        }
    }
    if let Some(id) = decoder.last_event_id() {
        builder = builder.header(LAST_EVENT_ID, id);
    }

    let response = builder.send().await.map_err(|source| IngestionError::Request {
        url: url.to_string(),
        source,
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(IngestionError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    if let Some(content_type) = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
    {
        if !content_type.starts_with("text/event-stream") {
            return Err(IngestionError::ContentType {
                url: url.to_string(),
                content_type: content_type.to_string(),
            });
        }
    }

    send(tx, StreamSignal::Open, url).await?;
    info!(url, "stream open");

    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| IngestionError::StreamEnded {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        for frame in decoder.feed(&chunk) {
            metrics.record_event();
            counter!("scan_aggregator_stream_events_total", "event" => frame.event.clone())
                .increment(1);
            send(tx, StreamSignal::event(frame.event, frame.data), url).await?;
        }
    }

    warn!(url, "stream body ended");
    Ok(())
}

async fn send(tx: &Sender<StreamSignal>, signal: StreamSignal, url: &str) -> Result<()> {
    tx.send(signal)
        .await
        .map_err(|_| IngestionError::ReceiverClosed {
            url: url.to_string(),
        })
}
