use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use crate::config::ToolSettings;
use crate::errors::ReconError;
use crate::utils::truncation::truncate_output;
use super::audit::ToolAuditLog;
use super::runner::{CommandRunner, ToolInvocation, ToolKind, ToolOutput};

/// A configured external tool: program, timeout, extra arguments, plus the
/// runner that executes it and the audit log every run is written to.
#[derive(Clone)]
pub struct Tool {
    kind: ToolKind,
    program: String,
    extra_args: Vec<String>,
    timeout: Duration,
    runner: Arc<dyn CommandRunner>,
    audit: Arc<ToolAuditLog>,
}

impl Tool {
    pub fn new(
        kind: ToolKind,
        settings: &ToolSettings,
        runner: Arc<dyn CommandRunner>,
        audit: Arc<ToolAuditLog>,
    ) -> Self {
        Self {
            kind,
            program: settings.path.clone(),
            extra_args: settings.args.clone(),
            timeout: Duration::from_secs(settings.timeout_secs),
            runner,
            audit,
        }
    }

    pub fn kind(&self) -> ToolKind {
        self.kind
    }

    /// Run with the configured extra arguments first, then `args`.
    pub async fn invoke(&self, args: Vec<String>, targets: Vec<String>) -> Result<ToolOutput, ReconError> {
        let mut all_args = self.extra_args.clone();
        all_args.extend(args);
        let invocation = ToolInvocation {
            tool: self.kind,
            program: self.program.clone(),
            args: all_args,
            targets,
            timeout: self.timeout,
        };

        let result = self.runner.run(&invocation).await;

        if let Err(e) = self.audit.record(&invocation, &result).await {
            warn!(tool = %self.kind, error = %e, "Failed to write tool audit log");
        }

        match &result {
            Ok(output) => debug!(
                tool = %self.kind,
                exit_code = ?output.exit_code,
                duration_ms = output.duration_ms,
                stdout = %truncate_output(output.stdout.trim()),
                "Tool finished"
            ),
            Err(e) => warn!(tool = %self.kind, error = %e, "Tool invocation failed"),
        }
        result
    }
}
