//! Sink implementations
//!
//! Contains LogSink, FileSink, and RecordListSink.

mod file;
mod list;
mod log;

pub use self::file::{FileSink, FileSinkConfig};
pub use self::list::{RecordList, RecordListSink};
pub use self::log::LogSink;
