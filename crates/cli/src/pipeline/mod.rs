//! Pipeline orchestration module.

mod orchestrator;
mod stats;

pub use orchestrator::{Pipeline, PipelineConfig, RunningPipeline};
pub use stats::PipelineStats;
