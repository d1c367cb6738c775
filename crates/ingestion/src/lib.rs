//! # Ingestion
//!
//! Remote event stream module.
//!
//! Responsibilities:
//! - Decode Server-Sent Events off an HTTP body
//! - Keep streams alive (reconnect with `Last-Event-ID`) until closed
//! - Turn the top-level build stream into `BuildDescriptor`s
//! - Build export API URL shapes
//!
//! ## Usage Example
//!
//! ```ignore
//! use contracts::{EventSource, StreamRequest};
//! use ingestion::{builds_since_url, BuildFeed, SseEventSource, SseSourceConfig};
//!
//! let source = SseEventSource::new(SseSourceConfig::default());
//! let url = builds_since_url("https://ge.example.com", "now");
//! let mut feed = BuildFeed::new(source.open(StreamRequest::new(url, true)), "https://ge.example.com");
//! while let Some(build) = feed.next_build().await {
//!     // hand to the dispatcher
//! }
//! ```
//!
//! ## Mock Testing
//!
//! ```ignore
//! use ingestion::{MockEventSource, StreamScript};
//!
//! let source = MockEventSource::new();
//! source.script("/build/abc/", StreamScript::new().open().error("end"));
//! ```

mod config;
mod error;
mod feed;
mod mock;
mod sse;
mod sse_source;
mod urls;

// Re-exports
pub use config::{IngestionMetrics, MetricsSnapshot, SseSourceConfig};
pub use error::{IngestionError, Result};
pub use feed::BuildFeed;
pub use mock::{MockEventSource, MockStream, ScriptStep, StreamScript};
pub use sse::{SseDecoder, SseFrame, DEFAULT_EVENT_NAME};
pub use sse_source::{SseEventSource, SseStream};
pub use urls::{build_events_url, builds_since_url};
