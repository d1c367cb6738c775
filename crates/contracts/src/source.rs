//! EventSource trait - remote event stream abstraction
//!
//! Models the transport primitive the engine consumes: open a stream by URL,
//! then pull `StreamSignal`s until the caller closes it. The SSE client and
//! the scripted mock source both implement it.

use crate::StreamSignal;

/// Parameters for opening one stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    pub url: String,

    /// Attach configured credentials to the request
    pub with_credentials: bool,
}

impl StreamRequest {
    pub fn new(url: impl Into<String>, with_credentials: bool) -> Self {
        Self {
            url: url.into(),
            with_credentials,
        }
    }
}

/// Handle to an open stream.
#[trait_variant::make(EventStream: Send)]
pub trait LocalEventStream {
    /// Wait for the next signal.
    ///
    /// Returns `None` once the stream has been closed and will never
    /// produce anything again.
    async fn next_signal(&mut self) -> Option<StreamSignal>;

    /// Close the stream and release its connection.
    ///
    /// Idempotent.
    fn close(&mut self);
}

/// Factory for event streams
pub trait EventSource: Send + Sync {
    type Stream: EventStream + 'static;

    /// Open a stream. Connection happens in the background; failures are
    /// surfaced as `StreamSignal::Error` on the returned handle.
    fn open(&self, request: StreamRequest) -> Self::Stream;
}
