use std::path::{Path, PathBuf};
use std::sync::Arc;
use console::style;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use crate::cli::commands::Cli;
use crate::config::{self, ReconConfig};
use crate::errors::ReconError;
use crate::pipeline::{PipelineConfig, PipelineOrchestrator, RunOutcome, RunSummary};
use crate::store::{col, DedupAppender, Row, TableKind, TableStore};
use crate::tools::preflight::{check_tools, require_tools};
use crate::tools::{ProcessRunner, ToolAuditLog};
use crate::utils::formatting::{format_duration, plural};

const DEFAULT_STORE: &str = "recon.json";
const DEFAULT_LOG_DIR: &str = "log";

/// Run the pipeline to completion and return the process exit code.
pub async fn handle_run(cli: Cli, cancel: CancellationToken) -> Result<i32, ReconError> {
    let file_config = match &cli.config {
        Some(path) => config::parse_config(Path::new(path)).await?,
        None => ReconConfig::default(),
    };
    let run_id = uuid::Uuid::new_v4().to_string();
    let pipeline_config = build_pipeline_config(&cli, file_config, run_id);

    if cli.check_tools {
        let checks = check_tools(&pipeline_config.tools);
        for check in &checks {
            match &check.resolved {
                Some(path) => println!("  {} {:<8} {}", style("✔").green(), check.kind, path.display()),
                None => println!("  {} {:<8} {} not found", style("✘").red(), check.kind, check.program),
            }
        }
        require_tools(&pipeline_config.tools)?;
        return Ok(0);
    }

    for check in check_tools(&pipeline_config.tools).iter().filter(|c| !c.is_available()) {
        warn!(tool = %check.kind, program = %check.program, "Tool not found on PATH; its stage will fail rows");
    }

    if let Some(seed) = &cli.seed {
        let content = tokio::fs::read_to_string(seed)
            .await
            .map_err(|e| ReconError::Config(format!("Cannot read seed file {}: {}", seed, e)))?;
        let mut store = TableStore::new(&pipeline_config.store_path);
        store.load().await?;
        let added = seed_subdomains(&mut store, &content);
        if store.is_dirty() {
            store.flush().await?;
        }
        info!(added, seed = %seed, "Seeded subdomains");
    }

    let audit = match &pipeline_config.log_dir {
        Some(dir) => ToolAuditLog::new(dir, &pipeline_config.run_id).await?,
        None => ToolAuditLog::disabled(),
    };

    let mut orchestrator = PipelineOrchestrator::new(
        pipeline_config,
        Arc::new(ProcessRunner),
        Arc::new(audit),
    )
    .with_cancel_token(cancel);

    let summary = orchestrator.run().await?;
    print_summary(&summary);
    Ok(summary.exit_code())
}

/// Resolve the run configuration. CLI flags win over the file, the file
/// over built-in defaults.
pub fn build_pipeline_config(cli: &Cli, file_config: ReconConfig, run_id: String) -> PipelineConfig {
    let store = file_config.store.unwrap_or_default();
    let store_path = cli
        .store
        .clone()
        .or(store.path)
        .unwrap_or_else(|| DEFAULT_STORE.to_string());
    let log_dir = cli
        .log_dir
        .clone()
        .or(store.log_dir)
        .unwrap_or_else(|| DEFAULT_LOG_DIR.to_string());

    let mut config = PipelineConfig::new(run_id, store_path);
    config.log_dir = Some(PathBuf::from(log_dir));
    config.tools = file_config.tools.unwrap_or_default();
    config.settings = file_config.pipeline.unwrap_or_default();
    config.expand = file_config.expand.unwrap_or_default();
    config.classify = file_config.classify.unwrap_or_default();
    config.scan = file_config.scan.unwrap_or_default();

    if let Some(max_cycles) = cli.max_cycles {
        config.settings.max_cycles = max_cycles.max(1);
    }
    if let Some(poll) = cli.poll_interval {
        config.settings.poll_interval_secs = poll;
    }
    config
}

/// Add one subdomain per line. Blank lines and `#` comments are skipped.
pub fn seed_subdomains(store: &mut TableStore, content: &str) -> usize {
    let mut appender = DedupAppender::new(store, TableKind::Subdomains);
    for line in content.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        appender.append_unique(Row::new().with(col::NAME, line));
    }
    appender.appended()
}

fn print_summary(summary: &RunSummary) {
    let outcome = match summary.outcome {
        RunOutcome::Fixpoint if summary.is_clean() => style(summary.outcome.to_string()).green().bold(),
        RunOutcome::Fixpoint => style(summary.outcome.to_string()).yellow().bold(),
        _ => style(summary.outcome.to_string()).red().bold(),
    };
    println!();
    println!(
        "{} {} after {} in {}",
        style("Pipeline").bold(),
        outcome,
        plural(summary.cycles as usize, "cycle"),
        format_duration(summary.duration_ms),
    );

    for stage in &summary.stages {
        let t = &stage.totals;
        println!(
            "  {:<14} processed {:>5}  failed {:>4}  appended {:>6}",
            style(stage.stage.display_name()).cyan(),
            t.processed,
            t.failed,
            t.appended,
        );
    }

    for (stage, blockage) in summary.blocked_stages() {
        let mut line = format!(
            "  {} {}: {} pending, {} failed",
            style("!").yellow().bold(),
            stage.stage.display_name(),
            blockage.pending,
            blockage.failed_terminal,
        );
        if blockage.deferred {
            line.push_str(" (deferred: backlog at scan batch threshold)");
        }
        println!("{}", line);
        if !blockage.samples.is_empty() {
            println!("      {}", style(blockage.samples.join(", ")).dim());
        }
    }
}
