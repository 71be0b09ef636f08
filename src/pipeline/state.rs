use std::path::PathBuf;
use serde::Serialize;
use crate::config::{ClassifyConfig, ExpandConfig, PipelineSettings, ScanConfig, ToolsConfig};
use crate::errors::RetryPolicy;
use super::stage::{StageName, StageReport};

/// Everything a run needs, resolved from the config file and CLI flags.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub run_id: String,
    pub store_path: PathBuf,
    /// Directory for per-tool audit logs. `None` disables them.
    pub log_dir: Option<PathBuf>,
    pub tools: ToolsConfig,
    pub settings: PipelineSettings,
    pub expand: ExpandConfig,
    pub classify: ClassifyConfig,
    pub scan: ScanConfig,
}

impl PipelineConfig {
    pub fn new(run_id: impl Into<String>, store_path: impl Into<PathBuf>) -> Self {
        Self {
            run_id: run_id.into(),
            store_path: store_path.into(),
            log_dir: None,
            tools: ToolsConfig::default(),
            settings: PipelineSettings::default(),
            expand: ExpandConfig::default(),
            classify: ClassifyConfig::default(),
            scan: ScanConfig::default(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.settings.max_attempts)
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum RunOutcome {
    /// A full cycle attempted nothing.
    Fixpoint,
    /// Consecutive cycles attempted rows without processing any.
    Stalled,
    CycleLimit,
    RuntimeBudget,
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fixpoint => write!(f, "fixpoint"),
            Self::Stalled => write!(f, "stalled"),
            Self::CycleLimit => write!(f, "cycle limit"),
            Self::RuntimeBudget => write!(f, "runtime budget"),
        }
    }
}

/// Rows that keep a stage from being finished.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct StageBlockage {
    pub pending: usize,
    pub failed_terminal: usize,
    /// Up to [`MAX_BLOCKING_SAMPLES`] identities of blocked rows.
    pub samples: Vec<String>,
    /// The stage was deferred in the last cycle.
    pub deferred: bool,
}

pub const MAX_BLOCKING_SAMPLES: usize = 10;

#[derive(Debug, Clone, Serialize)]
pub struct StageSummary {
    pub stage: StageName,
    pub totals: StageReport,
    pub blockage: Option<StageBlockage>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub outcome: RunOutcome,
    pub cycles: u32,
    pub duration_ms: u64,
    pub store_version: u64,
    pub stages: Vec<StageSummary>,
}

impl RunSummary {
    pub fn blocked_stages(&self) -> impl Iterator<Item = (&StageSummary, &StageBlockage)> {
        self.stages.iter().filter_map(|s| s.blockage.as_ref().map(|b| (s, b)))
    }

    /// Fixpoint with no stage blocked.
    pub fn is_clean(&self) -> bool {
        self.outcome == RunOutcome::Fixpoint && self.blocked_stages().next().is_none()
    }

    pub fn exit_code(&self) -> i32 {
        match self.outcome {
            RunOutcome::Fixpoint if self.is_clean() => 0,
            RunOutcome::Fixpoint => 5,
            RunOutcome::Stalled | RunOutcome::CycleLimit | RunOutcome::RuntimeBudget => 4,
        }
    }

    pub fn total_processed(&self) -> usize {
        self.stages.iter().map(|s| s.totals.processed).sum()
    }
}
