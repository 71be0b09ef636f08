use std::path::{Path, PathBuf};
use chrono::Utc;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use crate::errors::ReconError;
use super::runner::{ToolInvocation, ToolOutput};

/// One line of `<log_dir>/<tool>.jsonl`. Output is kept verbatim so a run can
/// be re-parsed offline.
#[derive(Debug, Serialize)]
pub struct InvocationRecord<'a> {
    pub timestamp: String,
    pub run_id: &'a str,
    pub tool: &'a str,
    pub program: &'a str,
    pub args: &'a [String],
    pub targets: &'a [String],
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    pub stdout: &'a str,
    pub stderr: &'a str,
    pub error: Option<String>,
}

/// Append-only per-tool log of every external invocation.
pub struct ToolAuditLog {
    dir: Option<PathBuf>,
    run_id: String,
    write_lock: Mutex<()>,
}

impl ToolAuditLog {
    pub async fn new(dir: &Path, run_id: &str) -> Result<Self, ReconError> {
        tokio::fs::create_dir_all(dir).await?;
        Ok(Self {
            dir: Some(dir.to_path_buf()),
            run_id: run_id.to_string(),
            write_lock: Mutex::new(()),
        })
    }

    /// A log that records nothing.
    pub fn disabled() -> Self {
        Self {
            dir: None,
            run_id: String::new(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path_for(&self, tool: &str) -> Option<PathBuf> {
        self.dir.as_ref().map(|d| d.join(format!("{}.jsonl", tool)))
    }

    pub async fn record(
        &self,
        invocation: &ToolInvocation,
        result: &Result<ToolOutput, ReconError>,
    ) -> Result<(), ReconError> {
        let Some(path) = self.path_for(invocation.tool.as_str()) else {
            return Ok(());
        };
        let empty = ToolOutput::default();
        let (output, error) = match result {
            Ok(output) => (output, None),
            Err(e) => (&empty, Some(e.to_string())),
        };
        let entry = InvocationRecord {
            timestamp: Utc::now().to_rfc3339(),
            run_id: &self.run_id,
            tool: invocation.tool.as_str(),
            program: &invocation.program,
            args: &invocation.args,
            targets: &invocation.targets,
            exit_code: output.exit_code,
            duration_ms: output.duration_ms,
            stdout: &output.stdout,
            stderr: &output.stderr,
            error,
        };
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
