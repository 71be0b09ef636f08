pub mod expand;
pub mod orchestrator;
pub mod stage;
pub mod stages;
pub mod state;

pub use orchestrator::PipelineOrchestrator;
pub use stage::{Stage, StageName, StageReport, STAGES};
pub use state::{PipelineConfig, RunOutcome, RunSummary, StageBlockage, StageSummary};
