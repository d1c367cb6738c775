//! Pack/unpack timing extractor
//!
//! Collects build cache pack and unpack durations plus the profiler's
//! scenario coordinates for builds produced by `gradle-profiler`.

use std::collections::HashMap;

use contracts::{AggregateRecord, BuildDescriptor, TypedEvent, PROFILER_TAG};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, trace};

use crate::extractor::{MetricExtractor, RegisteredExtractor};

/// Timeline event type names handled here
pub mod event_types {
    pub const USER_TAG: &str = "UserTag";
    pub const USER_NAMED_VALUE: &str = "UserNamedValue";
    pub const BUILD_STARTED: &str = "BuildStarted";
    pub const BUILD_REQUESTED_TASKS: &str = "BuildRequestedTasks";
    pub const TASK_GRAPH_CALCULATION_FINISHED: &str = "TaskGraphCalculationFinished";
    pub const BUILD_CACHE_PACK_STARTED: &str = "BuildCachePackStarted";
    pub const BUILD_CACHE_PACK_FINISHED: &str = "BuildCachePackFinished";
    pub const BUILD_CACHE_UNPACK_STARTED: &str = "BuildCacheUnpackStarted";
    pub const BUILD_CACHE_UNPACK_FINISHED: &str = "BuildCacheUnpackFinished";
    pub const BUILD_FINISHED: &str = "BuildFinished";
    pub const BASIC_MEMORY_STATS: &str = "BasicMemoryStats";
}

use event_types::*;

/// Named value keys published by the profiler
pub mod value_keys {
    pub const SCENARIO: &str = "org.gradle.profiler.scenario";
    pub const PHASE: &str = "org.gradle.profiler.phase";
    pub const STEP: &str = "org.gradle.profiler.step";
    pub const NUMBER: &str = "org.gradle.profiler.number";
}

#[derive(Deserialize)]
struct UserTagData {
    tag: String,
}

#[derive(Deserialize)]
struct UserNamedValueData {
    key: String,
    #[serde(default)]
    value: Option<String>,
}

#[derive(Deserialize)]
struct RequestedTasksData {
    #[serde(default)]
    requested: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MemoryStatsData {
    gc_time: i64,
}

/// Start/end timestamps of one cache operation
#[derive(Debug, Default, Clone, Copy)]
struct OperationSpan {
    start: Option<i64>,
    end: Option<i64>,
}

impl OperationSpan {
    /// None if either side is missing or the difference overflows
    fn duration(&self) -> Option<i64> {
        self.end?.checked_sub(self.start?)
    }
}

/// Cache operations keyed by operation id.
///
/// Start and finish for different ids may interleave in any order.
#[derive(Debug, Default)]
struct OperationLog {
    spans: HashMap<String, OperationSpan>,
}

impl OperationLog {
    fn started(&mut self, id: String, timestamp: i64) {
        self.spans.entry(id).or_default().start = Some(timestamp);
    }

    fn finished(&mut self, id: String, timestamp: i64) {
        self.spans.entry(id).or_default().end = Some(timestamp);
    }

    /// Sum of complete spans, plus how many were skipped.
    ///
    /// The sum saturates: a total pinned at `i64::MAX` is still a usable
    /// "very large", where dropping the whole metric would lose every span.
    fn total(&self) -> (i64, usize) {
        self.spans
            .values()
            .fold((0i64, 0), |(sum, skipped), span| match span.duration() {
                Some(d) => (sum.saturating_add(d), skipped),
                None => (sum, skipped + 1),
            })
    }
}

/// Reference extractor: build cache pack/unpack timing
pub struct PackingAndUnpackingExtractor {
    ignore_tags: bool,
    build_scan: String,
    tagged: bool,

    scenario: Option<String>,
    phase: Option<String>,
    step: Option<String>,
    number: Option<i64>,
    tasks: Option<String>,

    build_started: Option<i64>,
    build_finished: Option<i64>,
    task_execution_started: Option<i64>,
    gc_time: Option<i64>,

    pack: OperationLog,
    unpack: OperationLog,
}

impl PackingAndUnpackingExtractor {
    pub fn new(build: &BuildDescriptor) -> Self {
        Self {
            ignore_tags: build.ignore_tags,
            build_scan: build.build_scan_url(),
            tagged: false,
            scenario: None,
            phase: None,
            step: None,
            number: None,
            tasks: None,
            build_started: None,
            build_finished: None,
            task_execution_started: None,
            gc_time: None,
            pack: OperationLog::default(),
            unpack: OperationLog::default(),
        }
    }

    fn on_named_value(&mut self, data: UserNamedValueData) {
        match data.key.as_str() {
            value_keys::SCENARIO => self.scenario = data.value,
            value_keys::PHASE => self.phase = data.value,
            value_keys::STEP => self.step = data.value,
            // 取前导整数, 无数字则丢弃
            value_keys::NUMBER => self.number = data.value.as_deref().and_then(leading_int),
            _ => {}
        }
    }

    fn build_record(&self) -> AggregateRecord {
        let (pack_time, pack_skipped) = self.pack.total();
        let (unpack_time, unpack_skipped) = self.unpack.total();
        if pack_skipped + unpack_skipped > 0 {
            debug!(
                build_scan = %self.build_scan,
                pack_skipped,
                unpack_skipped,
                "skipping incomplete or out-of-range cache operations"
            );
        }

        AggregateRecord {
            scenario: self.scenario.clone(),
            phase: self.phase.clone(),
            number: self.number,
            step: self.step.clone(),
            tasks: self.tasks.clone(),
            build_scan: self.build_scan.clone(),
            execution_time: elapsed(self.build_started, self.build_finished),
            task_execution_time: elapsed(self.task_execution_started, self.build_finished),
            gc_time: self.gc_time,
            pack_time,
            unpack_time,
        }
    }
}

fn elapsed(from: Option<i64>, to: Option<i64>) -> Option<i64> {
    to?.checked_sub(from?)
}

/// Integer at the start of `value`: "12abc" -> 12, "3.0" -> 3, " -4" -> -4.
/// None when no digit follows the optional sign or the value overflows.
fn leading_int(value: &str) -> Option<i64> {
    let value = value.trim_start();
    let sign_len = usize::from(value.starts_with(['+', '-']));
    let digits = value[sign_len..]
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len() - sign_len);
    if digits == 0 {
        return None;
    }
    value[..sign_len + digits].parse().ok()
}

fn decode<T: DeserializeOwned>(event: &TypedEvent) -> Option<T> {
    match T::deserialize(&event.data) {
        Ok(data) => Some(data),
        Err(e) => {
            debug!(event_type = %event.event_type, error = %e, "ignoring malformed event data");
            None
        }
    }
}

/// Operation ids arrive as numbers or strings depending on server version
fn operation_id(event: &TypedEvent) -> Option<String> {
    match event.data.get("id")? {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        other => {
            debug!(event_type = %event.event_type, id = %other, "unusable operation id");
            None
        }
    }
}

impl MetricExtractor for PackingAndUnpackingExtractor {
    fn handle(&mut self, event: &TypedEvent) {
        trace!(event_type = %event.event_type, timestamp = event.timestamp, "pack/unpack event");
        let ts = event.timestamp;

        match event.event_type.as_str() {
            USER_TAG => {
                if let Some(data) = decode::<UserTagData>(event) {
                    if data.tag == PROFILER_TAG {
                        self.tagged = true;
                    }
                }
            }
            USER_NAMED_VALUE => {
                if let Some(data) = decode::<UserNamedValueData>(event) {
                    self.on_named_value(data);
                }
            }
            BUILD_STARTED => self.build_started = Some(ts),
            BUILD_REQUESTED_TASKS => {
                if let Some(data) = decode::<RequestedTasksData>(event) {
                    self.tasks = Some(data.requested.join(", "));
                }
            }
            TASK_GRAPH_CALCULATION_FINISHED => self.task_execution_started = Some(ts),
            BUILD_CACHE_PACK_STARTED => {
                if let Some(id) = operation_id(event) {
                    self.pack.started(id, ts);
                }
            }
            BUILD_CACHE_PACK_FINISHED => {
                if let Some(id) = operation_id(event) {
                    self.pack.finished(id, ts);
                }
            }
            BUILD_CACHE_UNPACK_STARTED => {
                if let Some(id) = operation_id(event) {
                    self.unpack.started(id, ts);
                }
            }
            BUILD_CACHE_UNPACK_FINISHED => {
                if let Some(id) = operation_id(event) {
                    self.unpack.finished(id, ts);
                }
            }
            BUILD_FINISHED => self.build_finished = Some(ts),
            BASIC_MEMORY_STATS => {
                if let Some(data) = decode::<MemoryStatsData>(event) {
                    self.gc_time = Some(data.gc_time);
                }
            }
            _ => {}
        }
    }

    fn finalize(&mut self, emit: &mut dyn FnMut(AggregateRecord)) {
        if !self.ignore_tags && !self.tagged {
            debug!(build_scan = %self.build_scan, "build not tagged by profiler, dropped");
            return;
        }
        emit(self.build_record());
    }
}

impl RegisteredExtractor for PackingAndUnpackingExtractor {
    const NAME: &'static str = "pack-unpack-timing";
    const EVENT_TYPES: &'static [&'static str] = &[
        USER_TAG,
        USER_NAMED_VALUE,
        BUILD_STARTED,
        BUILD_REQUESTED_TASKS,
        TASK_GRAPH_CALCULATION_FINISHED,
        BUILD_CACHE_PACK_STARTED,
        BUILD_CACHE_PACK_FINISHED,
        BUILD_CACHE_UNPACK_STARTED,
        BUILD_CACHE_UNPACK_FINISHED,
        BUILD_FINISHED,
        BASIC_MEMORY_STATS,
    ];
    const FINALIZES: bool = true;

    fn create(build: &BuildDescriptor) -> Self {
        Self::new(build)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn extractor(ignore_tags: bool) -> PackingAndUnpackingExtractor {
        PackingAndUnpackingExtractor::new(&BuildDescriptor::new("https://ge", "b1", ignore_tags))
    }

    fn feed(extractor: &mut PackingAndUnpackingExtractor, events: Vec<TypedEvent>) {
        for event in &events {
            extractor.handle(event);
        }
    }

    fn finalize(extractor: &mut PackingAndUnpackingExtractor) -> Vec<AggregateRecord> {
        let mut records = Vec::new();
        extractor.finalize(&mut |r| records.push(r));
        records
    }

    fn tag(tag: &str) -> TypedEvent {
        TypedEvent::new(USER_TAG, 0, json!({ "tag": tag }))
    }

    fn named(key: &str, value: &str) -> TypedEvent {
        TypedEvent::new(USER_NAMED_VALUE, 0, json!({ "key": key, "value": value }))
    }

    #[test]
    fn test_full_build() {
        let mut ex = extractor(false);
        feed(
            &mut ex,
            vec![
                tag(PROFILER_TAG),
                named(value_keys::SCENARIO, "clean-build"),
                named(value_keys::PHASE, "MEASURE"),
                named(value_keys::STEP, "BUILD"),
                named(value_keys::NUMBER, "3"),
                TypedEvent::new(BUILD_STARTED, 1000, json!({})),
                TypedEvent::new(
                    BUILD_REQUESTED_TASKS,
                    1001,
                    json!({ "requested": ["build", "test"], "excluded": [] }),
                ),
                TypedEvent::new(TASK_GRAPH_CALCULATION_FINISHED, 1200, json!({})),
                TypedEvent::new(BUILD_CACHE_PACK_STARTED, 1300, json!({ "id": 1 })),
                TypedEvent::new(BUILD_CACHE_PACK_FINISHED, 1400, json!({ "id": 1 })),
                TypedEvent::new(BUILD_CACHE_UNPACK_STARTED, 1500, json!({ "id": "u1" })),
                TypedEvent::new(BUILD_CACHE_UNPACK_FINISHED, 1525, json!({ "id": "u1" })),
                TypedEvent::new(BASIC_MEMORY_STATS, 1900, json!({ "gcTime": 42, "free": 1 })),
                TypedEvent::new(BUILD_FINISHED, 2000, json!({})),
            ],
        );

        let records = finalize(&mut ex);
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.scenario.as_deref(), Some("clean-build"));
        assert_eq!(record.phase.as_deref(), Some("MEASURE"));
        assert_eq!(record.step.as_deref(), Some("BUILD"));
        assert_eq!(record.number, Some(3));
        assert_eq!(record.tasks.as_deref(), Some("build, test"));
        assert_eq!(record.build_scan, "https://ge/s/b1");
        assert_eq!(record.execution_time, Some(1000));
        assert_eq!(record.task_execution_time, Some(800));
        assert_eq!(record.gc_time, Some(42));
        assert_eq!(record.pack_time, 100);
        assert_eq!(record.unpack_time, 25);
    }

    #[test]
    fn test_interleaved_pack_ids() {
        let mut ex = extractor(true);
        feed(
            &mut ex,
            vec![
                TypedEvent::new(BUILD_CACHE_PACK_STARTED, 10, json!({ "id": 1 })),
                TypedEvent::new(BUILD_CACHE_PACK_STARTED, 20, json!({ "id": 2 })),
                TypedEvent::new(BUILD_CACHE_PACK_FINISHED, 50, json!({ "id": 2 })),
                TypedEvent::new(BUILD_CACHE_PACK_FINISHED, 120, json!({ "id": 1 })),
            ],
        );

        // (120 - 10) + (50 - 20)
        assert_eq!(finalize(&mut ex)[0].pack_time, 140);
    }

    #[test]
    fn test_untagged_build_emits_nothing() {
        let mut ex = extractor(false);
        feed(
            &mut ex,
            vec![
                tag("ci"),
                TypedEvent::new(BUILD_STARTED, 1, json!({})),
                TypedEvent::new(BUILD_FINISHED, 2, json!({})),
            ],
        );
        assert!(finalize(&mut ex).is_empty());
    }

    #[test]
    fn test_ignore_tags_emits_untagged_build() {
        let mut ex = extractor(true);
        let records = finalize(&mut ex);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].pack_time, 0);
        assert_eq!(records[0].unpack_time, 0);
        assert!(records[0].execution_time.is_none());
    }

    #[test]
    fn test_unparsable_number_dropped() {
        let mut ex = extractor(true);
        feed(
            &mut ex,
            vec![
                named(value_keys::NUMBER, "7"),
                named(value_keys::NUMBER, "seven"),
                named("org.gradle.profiler.unknown", "x"),
            ],
        );
        assert_eq!(finalize(&mut ex)[0].number, None);
    }

    #[test]
    fn test_number_takes_leading_integer() {
        for (raw, expected) in [
            ("12abc", Some(12)),
            ("3.0", Some(3)),
            ("  -4 runs", Some(-4)),
            ("+8", Some(8)),
            ("-", None),
            ("abc12", None),
            ("99999999999999999999", None),
        ] {
            let mut ex = extractor(true);
            feed(&mut ex, vec![named(value_keys::NUMBER, raw)]);
            assert_eq!(finalize(&mut ex)[0].number, expected, "number {raw:?}");
        }
    }

    #[test]
    fn test_extreme_timestamps_do_not_overflow() {
        let mut ex = extractor(true);
        feed(
            &mut ex,
            vec![
                TypedEvent::new(BUILD_STARTED, i64::MIN, json!({})),
                TypedEvent::new(BUILD_FINISHED, i64::MAX, json!({})),
                // span overflows, skipped
                TypedEvent::new(BUILD_CACHE_PACK_STARTED, i64::MIN, json!({ "id": 1 })),
                TypedEvent::new(BUILD_CACHE_PACK_FINISHED, 1, json!({ "id": 1 })),
                // two valid spans whose sum saturates
                TypedEvent::new(BUILD_CACHE_UNPACK_STARTED, 0, json!({ "id": 1 })),
                TypedEvent::new(BUILD_CACHE_UNPACK_FINISHED, i64::MAX, json!({ "id": 1 })),
                TypedEvent::new(BUILD_CACHE_UNPACK_STARTED, 0, json!({ "id": 2 })),
                TypedEvent::new(BUILD_CACHE_UNPACK_FINISHED, 10, json!({ "id": 2 })),
            ],
        );

        let record = &finalize(&mut ex)[0];
        assert_eq!(record.execution_time, None);
        assert_eq!(record.pack_time, 0);
        assert_eq!(record.unpack_time, i64::MAX);
    }

    #[test]
    fn test_incomplete_operation_skipped() {
        let mut ex = extractor(true);
        feed(
            &mut ex,
            vec![
                TypedEvent::new(BUILD_CACHE_UNPACK_STARTED, 10, json!({ "id": 1 })),
                TypedEvent::new(BUILD_CACHE_UNPACK_FINISHED, 15, json!({ "id": 1 })),
                TypedEvent::new(BUILD_CACHE_UNPACK_STARTED, 30, json!({ "id": 2 })),
                TypedEvent::new(BUILD_CACHE_UNPACK_FINISHED, 99, json!({ "id": 3 })),
            ],
        );
        assert_eq!(finalize(&mut ex)[0].unpack_time, 5);
    }

    #[test]
    fn test_malformed_data_ignored() {
        let mut ex = extractor(false);
        feed(
            &mut ex,
            vec![
                TypedEvent::new(USER_TAG, 0, json!({ "label": PROFILER_TAG })),
                TypedEvent::new(BASIC_MEMORY_STATS, 0, json!({ "gcTime": "lots" })),
            ],
        );
        assert!(finalize(&mut ex).is_empty());
    }
}
