//! # Integration Tests
//!
//! 集成测试与端到端测试。
//!
//! 负责：
//! - 合约快照测试
//! - 模拟 e2e 测试（无需构建服务器）
//! - 自定义 extractor 注册

#[cfg(test)]
mod contract_tests {
    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{AggregateRecord, ListenerBlueprint};

    #[test]
    fn test_record_wire_names() {
        let record = AggregateRecord {
            scenario: Some("clean".into()),
            number: Some(1),
            build_scan: "https://ge/s/x".into(),
            pack_time: 5,
            ..Default::default()
        };
        let json = serde_json::to_value(&record).unwrap();
        for key in [
            "scenario",
            "phase",
            "number",
            "step",
            "tasks",
            "buildScan",
            "executionTime",
            "taskExecutionTime",
            "gcTime",
            "packTime",
            "unpackTime",
        ] {
            assert!(json.get(key).is_some(), "missing key {key}");
        }
    }

    #[test]
    fn test_blueprint_survives_toml() {
        let blueprint = ListenerBlueprint::for_server("https://ge.example.com");
        let toml = ConfigLoader::to_toml(&blueprint).unwrap();
        let parsed = ConfigLoader::load_from_str(&toml, ConfigFormat::Toml).unwrap();

        assert_eq!(parsed.server.url, blueprint.server.url);
        assert_eq!(parsed.server.start_time, "now");
        assert_eq!(
            parsed.processing.max_concurrent_builds,
            blueprint.processing.max_concurrent_builds
        );
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::sync::Arc;
    use std::time::Duration;

    use aggregation::{
        ExtractorRegistration, ExtractorRegistry, MetricExtractor, RegisteredExtractor,
    };
    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{AggregateRecord, BuildDescriptor, TypedEvent, PROFILER_TAG};
    use dispatcher::{
        BuildProcessor, ProcessorBuilder, ProcessorConfig, RecordList, RecordListSink,
        SinkHandle,
    };
    use ingestion::{MockEventSource, StreamScript};
    use serde_json::json;

    fn list_sink() -> (RecordList, SinkHandle) {
        let list = RecordList::new();
        let handle = SinkHandle::spawn(RecordListSink::new("list", list.clone()), 64);
        (list, handle)
    }

    /// Timeline of a measured gradle-profiler build
    fn profiler_build(scenario: &str, number: i64, pack_ms: i64) -> StreamScript {
        StreamScript::new()
            .open()
            .build_event("UserTag", 0, json!({ "tag": PROFILER_TAG }))
            .build_event(
                "UserNamedValue",
                1,
                json!({ "key": "org.gradle.profiler.scenario", "value": scenario }),
            )
            .build_event(
                "UserNamedValue",
                2,
                json!({ "key": "org.gradle.profiler.phase", "value": "MEASURE" }),
            )
            .build_event(
                "UserNamedValue",
                3,
                json!({ "key": "org.gradle.profiler.number", "value": number.to_string() }),
            )
            .build_event("BuildStarted", 1000, json!({}))
            .build_event("BuildRequestedTasks", 1001, json!({ "requested": ["assemble"] }))
            .build_event("TaskGraphCalculationFinished", 1100, json!({}))
            .build_event("BuildCachePackStarted", 1200, json!({ "id": 7 }))
            .build_event("BuildCachePackFinished", 1200 + pack_ms, json!({ "id": 7 }))
            .build_event("BasicMemoryStats", 1800, json!({ "gcTime": 12 }))
            .build_event("BuildFinished", 2000, json!({}))
            .error("end of stream")
    }

    async fn wait_for_completed(processor: &BuildProcessor, expected: u64) {
        for _ in 0..200 {
            if processor.stats().completed >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "timed out waiting for {expected} completed builds, got {}",
            processor.stats().completed
        );
    }

    /// End-to-end: top-level build stream -> per-build sessions -> sinks
    ///
    /// 验证完整的数据流：
    /// 1. 顶层流宣布三个构建
    /// 2. 每个构建打开自己的事件流
    /// 3. 只有带 profiler 标签的构建产生记录
    #[tokio::test]
    async fn test_listen_flow() {
        let source = Arc::new(MockEventSource::new());
        source.script(
            "/builds/since/",
            StreamScript::new().open().build("b1").build("b2").build("b3"),
        );
        source.script("/build/b1/", profiler_build("clean", 1, 40));
        source.script("/build/b2/", profiler_build("clean", 2, 60));
        // b3 falls back to an empty, untagged stream

        let (list, sink) = list_sink();
        let processor = BuildProcessor::spawn(ProcessorConfig::new(2), source.clone(), vec![sink]);
        processor.start("https://ge", "1700000000000").unwrap();

        wait_for_completed(&processor, 3).await;
        processor.shutdown().await.unwrap();

        let mut records = list.snapshot();
        records.sort_by_key(|r| r.number);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].build_scan, "https://ge/s/b1");
        assert_eq!(records[0].pack_time, 40);
        assert_eq!(records[1].number, Some(2));
        assert_eq!(records[1].pack_time, 60);
        for record in &records {
            assert_eq!(record.scenario.as_deref(), Some("clean"));
            assert_eq!(record.phase.as_deref(), Some("MEASURE"));
            assert_eq!(record.tasks.as_deref(), Some("assemble"));
            assert_eq!(record.execution_time, Some(1000));
            assert_eq!(record.task_execution_time, Some(900));
            assert_eq!(record.gc_time, Some(12));
            assert_eq!(record.unpack_time, 0);
        }

        let requests = source.requests();
        assert_eq!(
            requests[0].url,
            "https://ge/build-export/v1/builds/since/1700000000000?stream"
        );
        assert!(requests
            .iter()
            .skip(1)
            .all(|r| r.url.contains("eventTypes=") && r.url.contains("UserTag")));
        assert!(source.peak_active() <= 3);
    }

    /// 粘贴的链接不检查 profiler 标签
    #[tokio::test]
    async fn test_process_flow_ignores_tags() {
        let source = Arc::new(MockEventSource::new());
        source.set_fallback(
            StreamScript::new()
                .open()
                .build_event("BuildStarted", 100, json!({}))
                .build_event("BuildCacheUnpackStarted", 110, json!({ "id": "a" }))
                .build_event("BuildCacheUnpackFinished", 130, json!({ "id": "a" }))
                .build_event("BuildFinished", 500, json!({}))
                .error("end of stream"),
        );

        let (list, sink) = list_sink();
        let processor = BuildProcessor::spawn(ProcessorConfig::new(4), source.clone(), vec![sink]);

        let text = "first https://ge.example.com/s/abc123 then\n\
                    http://other.example.com/s/def456 done";
        let builds = processor.submit_scan_urls(text).unwrap();
        assert_eq!(builds.len(), 2);
        assert!(builds.iter().all(|b| b.ignore_tags));

        processor.wait_idle().await.unwrap();
        processor.shutdown().await.unwrap();

        let records = list.snapshot();
        assert_eq!(records.len(), 2);
        let mut scans: Vec<_> = records.iter().map(|r| r.build_scan.as_str()).collect();
        scans.sort();
        assert_eq!(
            scans,
            ["http://other.example.com/s/def456", "https://ge.example.com/s/abc123"]
        );
        assert!(records.iter().all(|r| r.unpack_time == 20 && r.scenario.is_none()));
    }

    /// Config file -> sinks -> processor, with admission limited to one build
    #[tokio::test]
    async fn test_config_to_file_sink() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.jsonl");
        let toml = format!(
            r#"
[server]
url = "https://ge.example.com"
with_credentials = false

[processing]
max_concurrent_builds = 1

[[sinks]]
name = "file"
sink_type = "file"
[sinks.params]
path = "{}"
"#,
            path.display()
        );
        let blueprint = ConfigLoader::load_from_str(&toml, ConfigFormat::Toml).unwrap();

        let source = Arc::new(MockEventSource::new());
        source.set_fallback(profiler_build("incremental", 1, 5));

        let handles = dispatcher::create_sink_handles(&blueprint.sinks)
            .await
            .unwrap();
        let processor = BuildProcessor::spawn(
            ProcessorConfig::from_blueprint(&blueprint),
            source.clone(),
            handles,
        );

        for id in ["x1", "x2", "x3"] {
            processor
                .submit_direct(BuildDescriptor::new(&blueprint.server.url, id, false))
                .unwrap();
        }
        processor.wait_idle().await.unwrap();
        processor.shutdown().await.unwrap();

        assert_eq!(source.peak_active(), 1);
        assert!(source.requests().iter().all(|r| !r.with_credentials));

        let contents = std::fs::read_to_string(&path).unwrap();
        let records: Vec<AggregateRecord> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(records.len(), 3);
        // FIFO admission with one slot keeps submission order
        assert_eq!(records[0].build_scan, "https://ge.example.com/s/x1");
        assert_eq!(records[2].build_scan, "https://ge.example.com/s/x3");
    }

    /// Counts timeline events per build
    struct EventCounter {
        build_scan: String,
        count: i64,
    }

    impl MetricExtractor for EventCounter {
        fn handle(&mut self, _event: &TypedEvent) {
            self.count += 1;
        }

        fn finalize(&mut self, emit: &mut dyn FnMut(AggregateRecord)) {
            emit(AggregateRecord {
                build_scan: self.build_scan.clone(),
                pack_time: self.count,
                ..Default::default()
            });
        }
    }

    impl RegisteredExtractor for EventCounter {
        const NAME: &'static str = "event-counter";
        const EVENT_TYPES: &'static [&'static str] = &["BuildStarted", "BuildFinished"];
        const FINALIZES: bool = true;

        fn create(build: &BuildDescriptor) -> Self {
            Self {
                build_scan: build.build_scan_url(),
                count: 0,
            }
        }
    }

    #[tokio::test]
    async fn test_custom_extractor_registry() {
        let source = Arc::new(MockEventSource::new());
        source.set_fallback(
            StreamScript::new()
                .open()
                .build_event("BuildStarted", 1, json!({}))
                // not requested, must not reach the extractor
                .build_event("BasicMemoryStats", 2, json!({ "gcTime": 3 }))
                .build_event("BuildFinished", 3, json!({}))
                .error("end of stream"),
        );

        let registry = Arc::new(ExtractorRegistry::new(vec![ExtractorRegistration::of::<
            EventCounter,
        >()]));
        let (list, sink) = list_sink();
        let processor = ProcessorBuilder::new(ProcessorConfig::new(1), source.clone())
            .registry(registry)
            .sink(sink)
            .spawn();

        processor
            .submit_direct(BuildDescriptor::new("https://ge", "c1", true))
            .unwrap();
        processor.wait_idle().await.unwrap();
        processor.shutdown().await.unwrap();

        let records = list.snapshot();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].pack_time, 2);
        assert!(source.requests()[0]
            .url
            .ends_with("eventTypes=BuildStarted,BuildFinished"));
    }
}
