use std::path::PathBuf;
use tracing::{info, warn};
use crate::config::ToolsConfig;
use crate::errors::ReconError;
use super::runner::ToolKind;

/// Where a configured tool resolves on this machine, if anywhere.
#[derive(Debug, Clone)]
pub struct ToolCheck {
    pub kind: ToolKind,
    pub program: String,
    pub resolved: Option<PathBuf>,
}

impl ToolCheck {
    pub fn is_available(&self) -> bool {
        self.resolved.is_some()
    }
}

pub fn check_tools(tools: &ToolsConfig) -> Vec<ToolCheck> {
    ToolKind::ALL
        .iter()
        .map(|&kind| {
            let program = tools.settings(kind).path.clone();
            let resolved = which::which(&program).ok();
            ToolCheck { kind, program, resolved }
        })
        .collect()
}

/// Fail with a configuration error naming every tool that cannot be found.
pub fn require_tools(tools: &ToolsConfig) -> Result<Vec<ToolCheck>, ReconError> {
    let checks = check_tools(tools);
    let missing: Vec<String> = checks
        .iter()
        .filter(|c| !c.is_available())
        .map(|c| format!("{} ({})", c.kind, c.program))
        .collect();

    for check in &checks {
        match &check.resolved {
            Some(path) => info!(tool = %check.kind, path = %path.display(), "Tool found"),
            None => warn!(tool = %check.kind, program = %check.program, "Tool not found on PATH"),
        }
    }

    if missing.is_empty() {
        Ok(checks)
    } else {
        Err(ReconError::Config(format!("missing tools: {}", missing.join(", "))))
    }
}
