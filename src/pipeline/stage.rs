use async_trait::async_trait;
use serde::Serialize;
use tracing::warn;
use crate::errors::ReconError;
use crate::store::{TableKind, TableStore};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum StageName {
    Host,
    Classify,
    PortScan,
    HttpProbe,
}

impl StageName {
    pub fn definition(&self) -> &'static StageDefinition {
        // STAGES is indexed in declaration order.
        &STAGES[*self as usize]
    }

    pub fn display_name(&self) -> &'static str {
        self.definition().display_name
    }

    pub fn input_table(&self) -> TableKind {
        self.definition().input
    }
}

impl std::fmt::Display for StageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

pub struct StageDefinition {
    pub name: StageName,
    pub display_name: &'static str,
    pub input: TableKind,
}

pub static STAGES: &[StageDefinition] = &[
    StageDefinition {
        name: StageName::Host,
        display_name: "host",
        input: TableKind::Subdomains,
    },
    StageDefinition {
        name: StageName::Classify,
        display_name: "nali & expand",
        input: TableKind::NonCdnIps,
    },
    StageDefinition {
        name: StageName::PortScan,
        display_name: "masscan",
        input: TableKind::ExpandedIps,
    },
    StageDefinition {
        name: StageName::HttpProbe,
        display_name: "httpx",
        input: TableKind::HttpSummary,
    },
];

/// What one stage run did to its input table and downstream tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StageReport {
    pub processed: usize,
    pub failed: usize,
    /// Pending rows left alone this run.
    pub deferred: usize,
    pub appended: usize,
}

impl StageReport {
    pub fn progress_made(&self) -> bool {
        self.processed > 0
    }

    pub fn attempted(&self) -> usize {
        self.processed + self.failed
    }

    pub fn absorb(&mut self, other: &StageReport) {
        self.processed += other.processed;
        self.failed += other.failed;
        self.deferred += other.deferred;
        self.appended += other.appended;
    }
}

/// One step of the pipeline: select pending rows, run a tool, write back.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> StageName;

    async fn run(&self, store: &mut TableStore) -> Result<StageReport, ReconError>;
}

/// Record a row-local error against `identity`, or hand a fatal one back.
pub(crate) fn fail_row(
    store: &mut TableStore,
    table: TableKind,
    identity: &str,
    error: ReconError,
    report: &mut StageReport,
) -> Result<(), ReconError> {
    let classification = error.classify();
    if !classification.is_row_local() {
        return Err(error);
    }
    warn!(
        table = %table,
        identity,
        error_type = classification.error_type,
        error = %error,
        "Row failed"
    );
    if store.mark_failed(table, identity, &error.to_string()) > 0 {
        report.failed += 1;
    }
    Ok(())
}
