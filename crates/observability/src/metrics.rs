//! 构建聚合指标收集模块
//!
//! 记录 dispatcher 的准入状态与每条聚合记录的耗时分布。

use std::collections::BTreeMap;

use contracts::AggregateRecord;
use metrics::{counter, gauge, histogram};

/// 记录构建入队
///
/// `origin` 是 `stream` (实时流) 或 `direct` (用户提交)。
pub fn record_build_enqueued(origin: &'static str) {
    counter!("scan_aggregator_builds_enqueued_total", "origin" => origin).increment(1);
}

/// 记录构建被准入处理
pub fn record_build_admitted() {
    counter!("scan_aggregator_builds_admitted_total").increment(1);
}

/// 记录构建完成
///
/// `outcome`: `stream_ended` / `timed_out` / `closed`
pub fn record_build_completed(outcome: &'static str, duration_ms: f64) {
    counter!("scan_aggregator_builds_completed_total", "outcome" => outcome).increment(1);
    histogram!("scan_aggregator_build_processing_ms").record(duration_ms);
}

/// 记录准入队列状态
pub fn record_queue_depth(in_flight: usize, pending: usize) {
    gauge!("scan_aggregator_builds_in_flight").set(in_flight as f64);
    gauge!("scan_aggregator_builds_pending").set(pending as f64);
}

/// 记录单个构建处理的事件数
pub fn record_session_events(dispatched: u64, ignored: u64, decode_errors: u64) {
    counter!("scan_aggregator_events_dispatched_total").increment(dispatched);
    if ignored > 0 {
        counter!("scan_aggregator_events_ignored_total").increment(ignored);
    }
    if decode_errors > 0 {
        counter!("scan_aggregator_event_decode_errors_total").increment(decode_errors);
    }
}

/// 从聚合记录记录指标
pub fn record_aggregate(record: &AggregateRecord) {
    counter!("scan_aggregator_records_emitted_total").increment(1);

    histogram!("scan_aggregator_pack_time_ms").record(record.pack_time as f64);
    histogram!("scan_aggregator_unpack_time_ms").record(record.unpack_time as f64);

    if let Some(execution) = record.execution_time {
        histogram!("scan_aggregator_execution_time_ms").record(execution as f64);
    }
    if let Some(gc) = record.gc_time {
        histogram!("scan_aggregator_gc_time_ms").record(gc as f64);
    }
}

/// 记录分发到 sink
pub fn record_record_dispatched(sink_name: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "scan_aggregator_records_dispatched_total",
        "sink" => sink_name.to_string(),
        "status" => status
    )
    .increment(1);
}

/// 聚合记录统计器
///
/// 在内存中聚合记录，用于运行结束时输出摘要。
#[derive(Debug, Clone, Default)]
pub struct RecordStatsAggregator {
    /// 总记录数
    pub total_records: u64,

    /// 执行时间 (ms)
    pub execution_stats: RunningStats,

    /// 任务执行时间 (ms)
    pub task_execution_stats: RunningStats,

    pub gc_stats: RunningStats,
    pub pack_stats: RunningStats,
    pub unpack_stats: RunningStats,

    /// 各场景记录数
    pub scenario_counts: BTreeMap<String, u64>,
}

impl RecordStatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 更新聚合统计
    pub fn update(&mut self, record: &AggregateRecord) {
        self.total_records += 1;

        if let Some(v) = record.execution_time {
            self.execution_stats.push(v as f64);
        }
        if let Some(v) = record.task_execution_time {
            self.task_execution_stats.push(v as f64);
        }
        if let Some(v) = record.gc_time {
            self.gc_stats.push(v as f64);
        }
        self.pack_stats.push(record.pack_time as f64);
        self.unpack_stats.push(record.unpack_time as f64);

        let scenario = record.scenario.as_deref().unwrap_or("<none>");
        *self.scenario_counts.entry(scenario.to_string()).or_insert(0) += 1;
    }

    /// 生成摘要报告
    pub fn summary(&self) -> RecordSummary {
        RecordSummary {
            total_records: self.total_records,
            execution_time_ms: StatsSummary::from(&self.execution_stats),
            task_execution_time_ms: StatsSummary::from(&self.task_execution_stats),
            gc_time_ms: StatsSummary::from(&self.gc_stats),
            pack_time_ms: StatsSummary::from(&self.pack_stats),
            unpack_time_ms: StatsSummary::from(&self.unpack_stats),
            scenario_counts: self.scenario_counts.clone(),
        }
    }

    /// 重置统计
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// 记录摘要
#[derive(Debug, Clone, Default)]
pub struct RecordSummary {
    pub total_records: u64,
    pub execution_time_ms: StatsSummary,
    pub task_execution_time_ms: StatsSummary,
    pub gc_time_ms: StatsSummary,
    pub pack_time_ms: StatsSummary,
    pub unpack_time_ms: StatsSummary,
    pub scenario_counts: BTreeMap<String, u64>,
}

impl std::fmt::Display for RecordSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Build Record Summary ===")?;
        writeln!(f, "Records: {}", self.total_records)?;
        writeln!(f, "Execution time (ms): {}", self.execution_time_ms)?;
        writeln!(f, "Task execution time (ms): {}", self.task_execution_time_ms)?;
        writeln!(f, "GC time (ms): {}", self.gc_time_ms)?;
        writeln!(f, "Pack time (ms): {}", self.pack_time_ms)?;
        writeln!(f, "Unpack time (ms): {}", self.unpack_time_ms)?;

        if !self.scenario_counts.is_empty() {
            writeln!(f, "Records per scenario:")?;
            for (scenario, count) in &self.scenario_counts {
                writeln!(f, "  {}: {}", scenario, count)?;
            }
        }

        Ok(())
    }
}

/// 统计摘要
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.1}, max={:.1}, mean={:.1}, std={:.1} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// 在线统计计算器 (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
            return;
        }

        self.min = self.min.min(value);
        self.max = self.max.max(value);

        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// 样本方差
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(scenario: Option<&str>, execution: Option<i64>, pack: i64) -> AggregateRecord {
        AggregateRecord {
            scenario: scenario.map(str::to_string),
            execution_time: execution,
            pack_time: pack,
            build_scan: "https://ge/s/x".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_running_stats() {
        let mut stats = RunningStats::default();
        for v in [1.0, 2.0, 3.0, 4.0, 5.0] {
            stats.push(v);
        }

        assert_eq!(stats.count(), 5);
        assert!((stats.mean() - 3.0).abs() < 1e-10);
        assert!((stats.min() - 1.0).abs() < 1e-10);
        assert!((stats.max() - 5.0).abs() < 1e-10);
        assert!((stats.variance() - 2.5).abs() < 1e-10);
    }

    #[test]
    fn test_aggregator_update() {
        let mut aggregator = RecordStatsAggregator::new();
        aggregator.update(&record(Some("clean"), Some(1000), 100));
        aggregator.update(&record(Some("clean"), None, 300));
        aggregator.update(&record(None, Some(500), 0));

        assert_eq!(aggregator.total_records, 3);
        assert_eq!(aggregator.execution_stats.count(), 2);
        assert_eq!(aggregator.pack_stats.count(), 3);
        assert_eq!(aggregator.scenario_counts.get("clean"), Some(&2));
        assert_eq!(aggregator.scenario_counts.get("<none>"), Some(&1));

        let summary = aggregator.summary();
        assert!((summary.execution_time_ms.mean - 750.0).abs() < 1e-10);
        assert_eq!(summary.gc_time_ms.count, 0);
    }

    #[test]
    fn test_summary_display() {
        let mut aggregator = RecordStatsAggregator::new();
        aggregator.update(&record(Some("incremental"), Some(200), 40));

        let output = aggregator.summary().to_string();
        assert!(output.contains("Records: 1"));
        assert!(output.contains("GC time (ms): N/A"));
        assert!(output.contains("incremental: 1"));
    }

    #[test]
    fn test_recorders_without_exporter() {
        // 未安装 recorder 时调用应为 no-op
        record_build_enqueued("direct");
        record_queue_depth(1, 2);
        record_aggregate(&record(None, Some(1), 1));
        record_record_dispatched("log", true);
    }
}
