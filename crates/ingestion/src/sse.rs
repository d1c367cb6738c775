//! Server-Sent Events frame decoder
//!
//! Incremental: feed arbitrary byte chunks, get back complete frames.
//!
//! ```text
//! event: BuildEvent
//! id: 42
//! data: {"timestamp":1,...}
//!
//! ```

use tracing::trace;

/// Event name used when a frame carries no `event:` field
pub const DEFAULT_EVENT_NAME: &str = "message";

/// One dispatched SSE event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
    /// Last event id seen on the connection at dispatch time
    pub id: Option<String>,
}

/// Incremental SSE decoder
#[derive(Debug, Default)]
pub struct SseDecoder {
    /// Bytes not yet terminated by a line break
    pending: Vec<u8>,
    /// Previous chunk ended in `\r`; a leading `\n` belongs to that break
    after_cr: bool,
    event: Option<String>,
    data: Vec<String>,
    last_event_id: Option<String>,
    retry_ms: Option<u64>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every frame it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        let mut frames = Vec::new();

        for &byte in chunk {
            if self.after_cr {
                self.after_cr = false;
                if byte == b'\n' {
                    continue;
                }
            }

            match byte {
                b'\n' | b'\r' => {
                    self.after_cr = byte == b'\r';
                    let line = std::mem::take(&mut self.pending);
                    let line = String::from_utf8_lossy(&line);
                    if let Some(frame) = self.process_line(&line) {
                        frames.push(frame);
                    }
                }
                _ => self.pending.push(byte),
            }
        }

        frames
    }

    /// Last `id:` value seen, for `Last-Event-ID` on reconnect
    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    /// Reconnect delay requested by the server via `retry:`
    pub fn retry_ms(&self) -> Option<u64> {
        self.retry_ms
    }

    /// Drop any half-received frame (connection lost mid-frame)
    pub fn reset_frame(&mut self) {
        self.pending.clear();
        self.after_cr = false;
        self.event = None;
        self.data.clear();
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" => {
                if !value.contains('\0') {
                    self.last_event_id = Some(value.to_string());
                }
            }
            "retry" => {
                if let Ok(ms) = value.parse() {
                    self.retry_ms = Some(ms);
                }
            }
            other => trace!(field = other, "ignoring unknown SSE field"),
        }

        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }

        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseFrame {
            event: event
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| DEFAULT_EVENT_NAME.to_string()),
            data,
            id: self.last_event_id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_named_event() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.feed(b"event: Build\ndata: {\"buildId\":\"a\"}\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "Build");
        assert_eq!(frames[0].data, "{\"buildId\":\"a\"}");
    }

    #[test]
    fn test_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"event: Build").is_empty());
        assert!(decoder.feed(b"Event\ndata: {\"x\"").is_empty());
        let frames = decoder.feed(b":1}\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "BuildEvent");
        assert_eq!(frames[0].data, "{\"x\":1}");
    }

    #[test]
    fn test_multiline_data_and_default_name() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.feed(b"data: one\ndata: two\n\n");
        assert_eq!(frames[0].event, DEFAULT_EVENT_NAME);
        assert_eq!(frames[0].data, "one\ntwo");
    }

    #[test]
    fn test_crlf_line_endings() {
        let mut decoder = SseDecoder::new();
        let mut frames = decoder.feed(b"event: a\r");
        frames.extend(decoder.feed(b"\ndata: 1\r\n\r\n"));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "a");
        assert_eq!(frames[0].data, "1");
    }

    #[test]
    fn test_comments_id_and_retry() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.feed(b": keepalive\nretry: 1500\nid: 7\ndata: x\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].id.as_deref(), Some("7"));
        assert_eq!(decoder.last_event_id(), Some("7"));
        assert_eq!(decoder.retry_ms(), Some(1500));
    }

    #[test]
    fn test_event_without_data_is_not_dispatched() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"event: ping\n\n").is_empty());
        // event name does not leak into the next frame
        let frames = decoder.feed(b"data: y\n\n");
        assert_eq!(frames[0].event, DEFAULT_EVENT_NAME);
    }

    #[test]
    fn test_reset_frame_discards_partial() {
        let mut decoder = SseDecoder::new();
        decoder.feed(b"event: Build\ndata: partial");
        decoder.reset_frame();
        let frames = decoder.feed(b"data: fresh\n\n");
        assert_eq!(frames[0].event, DEFAULT_EVENT_NAME);
        assert_eq!(frames[0].data, "fresh");
    }
}
