pub mod orchestrator;
pub mod stats;

pub use orchestrator::{FramePipeline, PipelineState, PublishGate};
pub use stats::{PipelineStats, StatsSnapshot};
