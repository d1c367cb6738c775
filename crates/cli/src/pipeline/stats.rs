//! Pipeline statistics.

use std::time::Duration;

use observability::RecordStatsAggregator;

/// Statistics from a pipeline run
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    /// Builds accepted into the pending queue
    pub builds_enqueued: u64,

    /// Builds whose session finished and was finalized
    pub builds_completed: u64,

    /// Builds finalized because their stream stalled
    pub builds_timed_out: u64,

    /// Highest number of builds running at once
    pub peak_in_flight: usize,

    pub duration: Duration,

    /// Configured sinks (the summary list is not counted)
    pub active_sinks: usize,

    pub streams_opened: u64,
    pub stream_errors: u64,

    /// Failed writes summed over configured sinks
    pub sink_write_failures: u64,
    /// Records a stopped sink worker never received
    pub records_lost: u64,

    pub record_stats: RecordStatsAggregator,
}

impl PipelineStats {
    /// Completed builds per minute
    pub fn builds_per_min(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.builds_completed as f64 * 60.0 / secs
        } else {
            0.0
        }
    }

    /// Builds that were enqueued but never finished
    pub fn abandoned(&self) -> u64 {
        self.builds_enqueued.saturating_sub(self.builds_completed)
    }

    /// Print detailed summary
    pub fn print_summary(&self) {
        println!("\n=== Pipeline Statistics ===\n");

        println!("Overview");
        println!("   ├─ Duration: {:.2}s", self.duration.as_secs_f64());
        println!("   ├─ Builds enqueued: {}", self.builds_enqueued);
        println!("   ├─ Builds completed: {}", self.builds_completed);
        println!("   ├─ Builds timed out: {}", self.builds_timed_out);
        println!("   ├─ Builds abandoned: {}", self.abandoned());
        println!("   ├─ Peak concurrent builds: {}", self.peak_in_flight);
        println!("   ├─ Builds/min: {:.2}", self.builds_per_min());
        println!("   └─ Active sinks: {}", self.active_sinks);

        if self.streams_opened > 0 || self.stream_errors > 0 {
            println!("\nStreams");
            println!("   ├─ Opened: {}", self.streams_opened);
            println!("   └─ Errors: {}", self.stream_errors);
        }

        if self.sink_write_failures > 0 || self.records_lost > 0 {
            println!("\nSinks");
            println!("   ├─ Write failures: {}", self.sink_write_failures);
            println!("   └─ Records lost: {}", self.records_lost);
        }

        println!("\n{}", self.record_stats.summary());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builds_per_min() {
        let stats = PipelineStats {
            builds_enqueued: 12,
            builds_completed: 10,
            duration: Duration::from_secs(30),
            ..Default::default()
        };
        assert!((stats.builds_per_min() - 20.0).abs() < 1e-9);
        assert_eq!(stats.abandoned(), 2);
    }

    #[test]
    fn test_zero_duration() {
        let stats = PipelineStats::default();
        assert_eq!(stats.builds_per_min(), 0.0);
        assert_eq!(stats.abandoned(), 0);
    }
}
