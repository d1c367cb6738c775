//! Ingestion 错误类型

use thiserror::Error;

/// Ingestion 错误
#[derive(Debug, Error)]
pub enum IngestionError {
    /// HTTP request failed before a response arrived
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Server answered with a non-success status
    #[error("unexpected status {status} from {url}")]
    Status { url: String, status: u16 },

    /// Response is not an event stream
    #[error("unexpected content type '{content_type}' from {url}")]
    ContentType { url: String, content_type: String },

    /// Body ended or broke mid-stream
    #[error("stream from {url} ended: {message}")]
    StreamEnded { url: String, message: String },

    /// Receiving side of the stream went away
    #[error("stream receiver closed for {url}")]
    ReceiverClosed { url: String },
}

/// Ingestion Result 类型别名
pub type Result<T> = std::result::Result<T, IngestionError>;
