//! # Aggregation
//!
//! 每个构建的事件聚合模块。
//!
//! Responsibilities:
//! - Declare metric extractors and the event types they consume
//! - Compute the interest set once for the whole process
//! - Demultiplex one build's timeline events to fresh extractor instances
//! - Finalize exactly once and hand records to the caller
//!
//! ## Usage Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use aggregation::{BuildSession, ExtractorRegistry, SignalOutcome};
//!
//! let registry = Arc::new(ExtractorRegistry::default());
//! let mut session = BuildSession::new(build, registry.clone());
//!
//! while let Some(signal) = stream.next_signal().await {
//!     if let SignalOutcome::Finished { .. } = session.on_signal(signal) {
//!         session.finish(&mut |record| records.push(record));
//!         break;
//!     }
//! }
//! session.close();
//! ```

mod extractor;
mod pack_unpack;
mod session;

pub use extractor::{ExtractorRegistration, ExtractorRegistry, MetricExtractor, RegisteredExtractor};
pub use pack_unpack::{event_types, value_keys, PackingAndUnpackingExtractor};
pub use session::{BuildSession, SessionState, SessionStats, SignalOutcome};
