//! Build aggregation session
//!
//! One session per admitted build. It demultiplexes timeline events to the
//! build's extractors and finalizes exactly once.

use std::sync::Arc;

use contracts::{
    AggregateRecord, BuildDescriptor, ContractError, StreamSignal, TypedEvent,
    BUILD_TIMELINE_EVENT_NAME,
};
use metrics::counter;
use tracing::{debug, instrument, trace, warn};

use crate::extractor::{ExtractorRegistry, MetricExtractor};

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Stream requested, no `Open` yet
    Opening,
    /// Receiving events
    Streaming,
    /// Finalizers running or done, stream not yet released
    Finalizing,
    /// Stream released, terminal
    Closed,
}

impl SessionState {
    fn accepts_events(self) -> bool {
        matches!(self, SessionState::Opening | SessionState::Streaming)
    }
}

/// Outcome of feeding one stream signal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalOutcome {
    /// Keep reading the stream
    Continue,
    /// End of stream detected; call `finish`
    Finished { reason: String },
}

/// Per-session counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub events_dispatched: u64,
    pub events_ignored: u64,
    pub decode_errors: u64,
    pub records_emitted: u64,
}

/// Per-build aggregation state
pub struct BuildSession {
    build: BuildDescriptor,
    registry: Arc<ExtractorRegistry>,
    /// Slot-indexed, same order as registry registrations
    extractors: Vec<Box<dyn MetricExtractor>>,
    state: SessionState,
    stats: SessionStats,
}

impl BuildSession {
    pub fn new(build: BuildDescriptor, registry: Arc<ExtractorRegistry>) -> Self {
        let extractors = registry.instantiate(&build);
        Self {
            build,
            registry,
            extractors,
            state: SessionState::Opening,
            stats: SessionStats::default(),
        }
    }

    pub fn build(&self) -> &BuildDescriptor {
        &self.build
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn is_finished(&self) -> bool {
        !self.state.accepts_events()
    }

    pub fn on_open(&mut self) {
        if self.state == SessionState::Opening {
            debug!(build_id = %self.build.build_id, "build event stream open");
            self.state = SessionState::Streaming;
        }
    }

    /// Feed one raw stream signal.
    ///
    /// The first `Error` is the end-of-stream marker.
    pub fn on_signal(&mut self, signal: StreamSignal) -> SignalOutcome {
        match signal {
            StreamSignal::Open => {
                self.on_open();
                SignalOutcome::Continue
            }
            StreamSignal::Event { name, data } => {
                if let Err(e) = self.on_payload(&name, &data) {
                    self.stats.decode_errors += 1;
                    warn!(build_id = %self.build.build_id, error = %e, "dropping event payload");
                }
                SignalOutcome::Continue
            }
            StreamSignal::Error { message } => SignalOutcome::Finished { reason: message },
        }
    }

    /// Decode a named payload and dispatch it.
    ///
    /// Names other than `BuildEvent` are ignored.
    pub fn on_payload(&mut self, name: &str, data: &str) -> Result<usize, ContractError> {
        if name != BUILD_TIMELINE_EVENT_NAME {
            trace!(event = %name, "ignoring non-timeline event");
            return Ok(0);
        }
        let event = TypedEvent::from_payload(data)?;
        Ok(self.on_event(&event))
    }

    /// Route a decoded event to every interested extractor, in registration
    /// order. Returns how many extractors saw it.
    pub fn on_event(&mut self, event: &TypedEvent) -> usize {
        if !self.state.accepts_events() {
            trace!(build_id = %self.build.build_id, "event after finish dropped");
            return 0;
        }
        if self.state == SessionState::Opening {
            self.state = SessionState::Streaming;
        }

        let slots = self.registry.route(&event.event_type);
        if slots.is_empty() {
            self.stats.events_ignored += 1;
            return 0;
        }
        for &slot in slots {
            self.extractors[slot].handle(event);
        }
        counter!("scan_aggregator_timeline_events_total", "event_type" => event.event_type.clone())
            .increment(1);
        self.stats.events_dispatched += 1;
        slots.len()
    }

    /// Run every finalizer once.
    ///
    /// Returns `false` without calling `emit` if the session already finished.
    #[instrument(level = "debug", skip_all, fields(build_id = %self.build.build_id))]
    pub fn finish(&mut self, emit: &mut dyn FnMut(AggregateRecord)) -> bool {
        if self.is_finished() {
            return false;
        }
        self.state = SessionState::Finalizing;

        let mut emitted = 0u64;
        for &slot in self.registry.finalizers() {
            self.extractors[slot].finalize(&mut |record| {
                emitted += 1;
                emit(record);
            });
        }
        self.stats.records_emitted += emitted;
        debug!(records = emitted, "session finalized");
        true
    }

    /// Release the session; events and finish calls become no-ops
    pub fn close(&mut self) {
        self.state = SessionState::Closed;
    }
}

impl std::fmt::Debug for BuildSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildSession")
            .field("build", &self.build)
            .field("state", &self.state)
            .field("extractors", &self.extractors.len())
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pack_unpack::event_types::*;
    use contracts::PROFILER_TAG;
    use serde_json::json;

    fn session(ignore_tags: bool) -> BuildSession {
        BuildSession::new(
            BuildDescriptor::new("https://ge", "abc", ignore_tags),
            Arc::new(ExtractorRegistry::default()),
        )
    }

    fn payload(event_type: &str, timestamp: i64, data: serde_json::Value) -> String {
        json!({ "type": { "eventType": event_type }, "timestamp": timestamp, "data": data })
            .to_string()
    }

    #[test]
    fn test_lifecycle() {
        let mut s = session(false);
        assert_eq!(s.state(), SessionState::Opening);

        assert_eq!(s.on_signal(StreamSignal::Open), SignalOutcome::Continue);
        assert_eq!(s.state(), SessionState::Streaming);

        for (ty, ts, data) in [
            (USER_TAG, 1, json!({ "tag": PROFILER_TAG })),
            (BUILD_STARTED, 100, json!({})),
            (BUILD_FINISHED, 250, json!({})),
        ] {
            let signal = StreamSignal::event(BUILD_TIMELINE_EVENT_NAME, payload(ty, ts, data));
            assert_eq!(s.on_signal(signal), SignalOutcome::Continue);
        }

        let outcome = s.on_signal(StreamSignal::error("eof"));
        assert_eq!(
            outcome,
            SignalOutcome::Finished {
                reason: "eof".into()
            }
        );

        let mut records = Vec::new();
        assert!(s.finish(&mut |r| records.push(r)));
        assert_eq!(s.state(), SessionState::Finalizing);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].execution_time, Some(150));
        assert_eq!(records[0].build_scan, "https://ge/s/abc");

        s.close();
        assert_eq!(s.state(), SessionState::Closed);
        assert_eq!(s.stats().records_emitted, 1);
        assert_eq!(s.stats().events_dispatched, 3);
    }

    #[test]
    fn test_finish_is_one_shot() {
        let mut s = session(true);
        s.on_open();

        let mut count = 0;
        assert!(s.finish(&mut |_| count += 1));
        assert!(!s.finish(&mut |_| count += 1));
        s.close();
        assert!(!s.finish(&mut |_| count += 1));
        assert_eq!(count, 1);
    }

    #[test]
    fn test_events_after_finish_dropped() {
        let mut s = session(true);
        s.finish(&mut |_| {});
        let event = TypedEvent::new(BUILD_STARTED, 1, json!({}));
        assert_eq!(s.on_event(&event), 0);
        assert_eq!(s.stats().events_dispatched, 0);
    }

    #[test]
    fn test_unknown_types_and_names_ignored() {
        let mut s = session(true);
        s.on_open();

        let unknown = TypedEvent::new("TaskStarted", 1, json!({}));
        assert_eq!(s.on_event(&unknown), 0);
        assert_eq!(s.on_payload("Heartbeat", "{}").unwrap(), 0);
        assert_eq!(s.stats().events_ignored, 1);
    }

    #[test]
    fn test_bad_payload_counted_not_fatal() {
        let mut s = session(true);
        let signal = StreamSignal::event(BUILD_TIMELINE_EVENT_NAME, "{oops");
        assert_eq!(s.on_signal(signal), SignalOutcome::Continue);
        assert_eq!(s.stats().decode_errors, 1);
        assert!(!s.is_finished());
    }

    #[test]
    fn test_event_before_open_starts_streaming() {
        let mut s = session(true);
        let event = TypedEvent::new(BUILD_STARTED, 1, json!({}));
        assert_eq!(s.on_event(&event), 1);
        assert_eq!(s.state(), SessionState::Streaming);
    }

    /// Emits one record tagged with its name and the events it saw
    struct Tagging<const FINALIZES: bool, const ID: u8> {
        seen: i64,
    }

    impl<const F: bool, const ID: u8> Tagging<F, ID> {
        fn label() -> String {
            format!("extractor-{}", ID)
        }
    }

    impl<const F: bool, const ID: u8> MetricExtractor for Tagging<F, ID> {
        fn handle(&mut self, _event: &TypedEvent) {
            self.seen += 1;
        }

        fn finalize(&mut self, emit: &mut dyn FnMut(AggregateRecord)) {
            emit(AggregateRecord {
                build_scan: Self::label(),
                execution_time: Some(self.seen),
                ..Default::default()
            });
        }
    }

    impl<const F: bool, const ID: u8> crate::RegisteredExtractor for Tagging<F, ID> {
        const NAME: &'static str = "tagging";
        const EVENT_TYPES: &'static [&'static str] = &[BUILD_STARTED];
        const FINALIZES: bool = F;

        fn create(_build: &BuildDescriptor) -> Self {
            Self { seen: 0 }
        }
    }

    #[test]
    fn test_only_finalizing_extractors_emit_in_registration_order() {
        use crate::ExtractorRegistration;

        let registry = ExtractorRegistry::new(vec![
            ExtractorRegistration::of::<Tagging<true, 1>>(),
            ExtractorRegistration::of::<Tagging<false, 2>>(),
            ExtractorRegistration::of::<Tagging<true, 3>>(),
        ]);
        let mut s = BuildSession::new(
            BuildDescriptor::new("https://ge", "abc", true),
            Arc::new(registry),
        );
        s.on_open();
        let event = TypedEvent::new(BUILD_STARTED, 1, json!({}));
        assert_eq!(s.on_event(&event), 3);

        let mut records = Vec::new();
        assert!(s.finish(&mut |r| records.push(r)));
        let emitted: Vec<_> = records
            .iter()
            .map(|r| (r.build_scan.as_str(), r.execution_time))
            .collect();
        assert_eq!(
            emitted,
            vec![("extractor-1", Some(1)), ("extractor-3", Some(1))]
        );
        assert_eq!(s.stats().records_emitted, 2);

        // a second finish neither emits nor recounts
        assert!(!s.finish(&mut |r| records.push(r)));
        assert_eq!(records.len(), 2);
        assert_eq!(s.stats().records_emitted, 2);
    }
}
