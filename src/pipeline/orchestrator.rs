use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use crate::errors::{ReconError, RetryPolicy};
use crate::store::{RowState, RowStatus, TableKind, TableStore};
use crate::tools::{CommandRunner, Tool, ToolAuditLog, ToolKind};
use super::stage::{Stage, StageReport};
use super::stages::{ClassifyStage, HostStage, PortScanStage, ProbeStage};
use super::state::*;

/// Drives the fixed stage sequence in cycles until nothing is left to try.
///
/// Every cycle starts from a fresh load of the store, so edits made between
/// cycles are honoured, and the store is flushed after each stage that
/// changed it.
pub struct PipelineOrchestrator {
    config: PipelineConfig,
    store: TableStore,
    stages: Vec<Box<dyn Stage>>,
    cancel_token: CancellationToken,
}

impl PipelineOrchestrator {
    pub fn new(config: PipelineConfig, runner: Arc<dyn CommandRunner>, audit: Arc<ToolAuditLog>) -> Self {
        let policy = config.retry_policy();
        let tool = |kind: ToolKind| Tool::new(kind, config.tools.settings(kind), runner.clone(), audit.clone());

        let stages: Vec<Box<dyn Stage>> = vec![
            Box::new(HostStage::new(tool(ToolKind::Resolver), policy)),
            Box::new(ClassifyStage::new(
                tool(ToolKind::Classifier),
                &config.classify,
                config.expand.clone(),
                policy,
            )),
            Box::new(PortScanStage::new(
                tool(ToolKind::Scanner),
                config.scan.clone(),
                config.settings.scan_batch_threshold,
                policy,
            )),
            Box::new(ProbeStage::new(tool(ToolKind::Prober), policy)),
        ];

        Self::with_stages(config, stages)
    }

    pub fn with_stages(config: PipelineConfig, stages: Vec<Box<dyn Stage>>) -> Self {
        Self {
            store: TableStore::new(&config.store_path),
            config,
            stages,
            cancel_token: CancellationToken::new(),
        }
    }

    /// Replace the internal cancel token with an external one (e.g. Ctrl-C).
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    fn check_cancelled(&self) -> Result<(), ReconError> {
        if self.cancel_token.is_cancelled() {
            Err(ReconError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Flush whatever the interrupted cycle left unsaved, then report cancellation.
    async fn stop_cancelled(&mut self) -> ReconError {
        if self.store.is_dirty() {
            if let Err(e) = self.store.flush().await {
                warn!(error = %e, "Failed to flush store after cancellation");
            }
        }
        warn!("Pipeline cancelled");
        ReconError::Cancelled
    }

    async fn run_cycle(&mut self, cycle: u32, totals: &mut [StageReport]) -> Result<Vec<StageReport>, ReconError> {
        self.store.load().await?;
        if self.store.is_dirty() {
            self.store.flush().await?;
        }

        let mut reports = Vec::with_capacity(self.stages.len());
        for (i, stage) in self.stages.iter().enumerate() {
            if self.cancel_token.is_cancelled() {
                return Err(ReconError::Cancelled);
            }
            debug!(cycle, stage = %stage.name(), "Stage starting");
            let report = stage.run(&mut self.store).await?;
            if self.store.is_dirty() {
                self.store.flush().await?;
            }
            totals[i].absorb(&report);
            reports.push(report);
        }
        Ok(reports)
    }

    pub async fn run(&mut self) -> Result<RunSummary, ReconError> {
        let started = Instant::now();
        let settings = self.config.settings.clone();
        let budget = settings.max_runtime_secs.map(Duration::from_secs);
        let mut totals = vec![StageReport::default(); self.stages.len()];
        let mut last_cycle: Vec<StageReport> = Vec::new();
        let mut stall_streak = 0u32;
        let mut cycles = 0u32;
        let mut outcome = RunOutcome::CycleLimit;

        info!(
            run_id = %self.config.run_id,
            store = %self.config.store_path.display(),
            stages = self.stages.len(),
            "Pipeline starting"
        );

        while cycles < settings.max_cycles {
            if self.check_cancelled().is_err() {
                return Err(self.stop_cancelled().await);
            }
            cycles += 1;

            let reports = match self.run_cycle(cycles, &mut totals).await {
                Ok(reports) => reports,
                Err(ReconError::Cancelled) => return Err(self.stop_cancelled().await),
                Err(e) => return Err(e),
            };

            let processed: usize = reports.iter().map(|r| r.processed).sum();
            let attempted: usize = reports.iter().map(|r| r.attempted()).sum();
            let appended: usize = reports.iter().map(|r| r.appended).sum();
            info!(cycle = cycles, processed, failed = attempted - processed, appended, "Cycle complete");
            last_cycle = reports;

            if attempted == 0 {
                outcome = RunOutcome::Fixpoint;
                break;
            }
            if processed == 0 {
                stall_streak += 1;
                warn!(cycle = cycles, streak = stall_streak, limit = settings.stall_cycles, "Cycle made no progress");
                if stall_streak >= settings.stall_cycles {
                    outcome = RunOutcome::Stalled;
                    break;
                }
            } else {
                stall_streak = 0;
            }

            if let Some(budget) = budget {
                if started.elapsed() >= budget {
                    outcome = RunOutcome::RuntimeBudget;
                    break;
                }
            }

            if settings.poll_interval_secs > 0 && cycles < settings.max_cycles {
                let token = self.cancel_token.clone();
                let cancelled = tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(settings.poll_interval_secs)) => false,
                    _ = token.cancelled() => true,
                };
                if cancelled {
                    return Err(self.stop_cancelled().await);
                }
            }
        }

        let summary = self.summarize(outcome, cycles, started, totals, &last_cycle);
        match summary.outcome {
            RunOutcome::Fixpoint => info!(cycles, processed = summary.total_processed(), "Pipeline reached fixpoint"),
            other => warn!(cycles, outcome = %other, "Pipeline stopped before fixpoint"),
        }
        Ok(summary)
    }

    fn summarize(
        &self,
        outcome: RunOutcome,
        cycles: u32,
        started: Instant,
        totals: Vec<StageReport>,
        last_cycle: &[StageReport],
    ) -> RunSummary {
        let policy = self.config.retry_policy();
        let stages = self
            .stages
            .iter()
            .zip(totals)
            .enumerate()
            .map(|(i, (stage, totals))| {
                let deferred = last_cycle.get(i).map_or(false, |r| r.deferred > 0);
                StageSummary {
                    stage: stage.name(),
                    totals,
                    blockage: blockage(&self.store, stage.name().input_table(), &policy, deferred),
                }
            })
            .collect();

        RunSummary {
            run_id: self.config.run_id.clone(),
            outcome,
            cycles,
            duration_ms: started.elapsed().as_millis() as u64,
            store_version: self.store.version(),
            stages,
        }
    }
}

/// Pending and terminally failed rows of `table`, or `None` when there are none.
fn blockage(
    store: &TableStore,
    table: TableKind,
    policy: &RetryPolicy,
    deferred: bool,
) -> Option<StageBlockage> {
    let counts = store.status_counts(table, policy);
    if counts.pending == 0 && counts.failed_terminal == 0 {
        return None;
    }
    let cols = table.status_columns()?;
    let identity = table.identity_column();
    let samples = store
        .rows(table)
        .iter()
        .filter(|r| !r.is_blank(identity))
        .filter(|r| RowState::read(r, &cols).status != RowStatus::Processed)
        .take(MAX_BLOCKING_SAMPLES)
        .map(|r| r.get(identity).to_string())
        .collect();
    Some(StageBlockage {
        pending: counts.pending,
        failed_terminal: counts.failed_terminal,
        samples,
        deferred,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tempfile::TempDir;
    use crate::pipeline::stage::StageName;

    /// Reports the same outcome every run.
    struct FixedStage(StageReport);

    #[async_trait]
    impl Stage for FixedStage {
        fn name(&self) -> StageName {
            StageName::Host
        }

        async fn run(&self, _store: &mut TableStore) -> Result<StageReport, ReconError> {
            Ok(self.0)
        }
    }

    fn orchestrator(dir: &TempDir, report: StageReport) -> PipelineOrchestrator {
        let mut config = PipelineConfig::new("test-run", dir.path().join("store.json"));
        config.settings.max_cycles = 6;
        config.settings.stall_cycles = 3;
        PipelineOrchestrator::with_stages(config, vec![Box::new(FixedStage(report))])
    }

    #[tokio::test]
    async fn test_idle_stage_reaches_fixpoint_first_cycle() {
        let dir = TempDir::new().unwrap();
        let summary = orchestrator(&dir, StageReport::default()).run().await.unwrap();
        assert_eq!(summary.outcome, RunOutcome::Fixpoint);
        assert_eq!(summary.cycles, 1);
        assert!(summary.is_clean());
    }

    #[tokio::test]
    async fn test_failing_stage_trips_stall_guard() {
        let dir = TempDir::new().unwrap();
        let failing = StageReport { failed: 1, ..Default::default() };
        let summary = orchestrator(&dir, failing).run().await.unwrap();
        assert_eq!(summary.outcome, RunOutcome::Stalled);
        assert_eq!(summary.cycles, 3);
        assert_eq!(summary.stages[0].totals.failed, 3);
    }

    #[tokio::test]
    async fn test_endless_progress_hits_cycle_limit() {
        let dir = TempDir::new().unwrap();
        let busy = StageReport { processed: 1, ..Default::default() };
        let summary = orchestrator(&dir, busy).run().await.unwrap();
        assert_eq!(summary.outcome, RunOutcome::CycleLimit);
        assert_eq!(summary.cycles, 6);
        assert_eq!(summary.exit_code(), 4);
    }

    #[tokio::test]
    async fn test_zero_budget_stops_after_first_cycle() {
        let dir = TempDir::new().unwrap();
        let busy = StageReport { processed: 1, ..Default::default() };
        let mut orch = orchestrator(&dir, busy);
        orch.config.settings.max_runtime_secs = Some(0);
        let summary = orch.run().await.unwrap();
        assert_eq!(summary.outcome, RunOutcome::RuntimeBudget);
        assert_eq!(summary.cycles, 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let dir = TempDir::new().unwrap();
        let token = CancellationToken::new();
        let mut orch = orchestrator(&dir, StageReport::default()).with_cancel_token(token.clone());
        token.cancel();
        assert!(matches!(orch.run().await, Err(ReconError::Cancelled)));
    }
}
