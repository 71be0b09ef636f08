use std::process::Stdio;
use std::time::{Duration, Instant};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use crate::errors::ReconError;
use crate::utils::truncation::truncate_error;

/// The external programs the pipeline drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    Resolver,
    Classifier,
    Scanner,
    Prober,
}

impl ToolKind {
    pub const ALL: [ToolKind; 4] = [
        ToolKind::Resolver,
        ToolKind::Classifier,
        ToolKind::Scanner,
        ToolKind::Prober,
    ];

    /// Name used for log files and error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resolver => "host",
            Self::Classifier => "nali",
            Self::Scanner => "masscan",
            Self::Prober => "httpx",
        }
    }
}

impl std::fmt::Display for ToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub tool: ToolKind,
    pub program: String,
    pub args: Vec<String>,
    /// The rows this invocation works on, kept for the audit log.
    pub targets: Vec<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Turn a non-zero exit into a tool invocation error unless the caller
    /// recognised the output as a legitimate answer.
    pub fn check_exit(&self, tool: ToolKind, tolerated: bool) -> Result<(), ReconError> {
        if self.success() || tolerated {
            return Ok(());
        }
        let code = self
            .exit_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        let detail = if self.stderr.trim().is_empty() { &self.stdout } else { &self.stderr };
        Err(ReconError::tool(
            tool.as_str(),
            format!("exited with {}: {}", code, truncate_error(detail)),
        ))
    }
}

/// Runs one external command to completion.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput, ReconError>;
}

/// Spawns real processes. A run that outlives its timeout is killed.
#[derive(Debug, Default, Clone)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput, ReconError> {
        debug!(
            tool = %invocation.tool,
            program = %invocation.program,
            args = ?invocation.args,
            "Spawning tool"
        );

        let child = tokio::process::Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ReconError::tool(
                invocation.tool.as_str(),
                format!("failed to start {}: {}", invocation.program, e),
            ))?;

        let started = Instant::now();
        // Dropping the future on timeout drops the child, which kills it.
        let output = tokio::time::timeout(invocation.timeout, child.wait_with_output())
            .await
            .map_err(|_| ReconError::Timeout {
                tool: invocation.tool.as_str().to_string(),
                secs: invocation.timeout.as_secs(),
            })?
            .map_err(|e| ReconError::tool(invocation.tool.as_str(), format!("wait failed: {}", e)))?;

        Ok(ToolOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}
