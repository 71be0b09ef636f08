use async_trait::async_trait;
use tracing::{debug, info};
use crate::errors::{ReconError, RetryPolicy};
use crate::store::{col, DedupAppender, Row, TableKind, TableStore};
use crate::tools::host::{is_negative_answer, HostAddress, HostParser};
use crate::tools::{OutputParser, Tool, ToolKind};
use crate::pipeline::stage::{fail_row, Stage, StageName, StageReport};

/// Resolves pending subdomains and aggregates alias-free addresses into the
/// non-CDN table.
pub struct HostStage {
    tool: Tool,
    policy: RetryPolicy,
}

impl HostStage {
    pub fn new(tool: Tool, policy: RetryPolicy) -> Self {
        Self { tool, policy }
    }

    async fn resolve(&self, name: &str) -> Result<Vec<HostAddress>, ReconError> {
        let output = self.tool.invoke(vec![name.to_string()], vec![name.to_string()]).await?;
        // host exits 1 on NXDOMAIN, which is an answer rather than a failure.
        output.check_exit(ToolKind::Resolver, is_negative_answer(&output.stdout))?;
        HostParser.parse(&output).into_result(ToolKind::Resolver)
    }
}

#[async_trait]
impl Stage for HostStage {
    fn name(&self) -> StageName {
        StageName::Host
    }

    async fn run(&self, store: &mut TableStore) -> Result<StageReport, ReconError> {
        let mut report = StageReport::default();
        let pending = store.pending_rows(TableKind::Subdomains, &self.policy);

        for row in pending {
            let name = row.get(col::NAME).trim().to_string();
            let addresses = match self.resolve(&name).await {
                Ok(addresses) => addresses,
                Err(e) => {
                    fail_row(store, TableKind::Subdomains, &name, e, &mut report)?;
                    continue;
                }
            };

            let mut ips: Vec<String> = Vec::new();
            for address in &addresses {
                let ip = address.ip.to_string();
                if !ips.contains(&ip) {
                    ips.push(ip);
                }
            }
            debug!(subdomain = %name, ips = ?ips, "Resolved");

            store.mark_processed(TableKind::Subdomains, &name, &[(col::IPS, ips.join(", "))]);
            report.processed += 1;

            let mut appender = DedupAppender::new(store, TableKind::NonCdnIps);
            for address in addresses.iter().filter(|a| !a.aliased) {
                appender.append_unique(Row::new().with(col::IP, address.ip.to_string()));
            }
            report.appended += appender.appended();
        }

        if report.attempted() > 0 {
            info!(
                processed = report.processed,
                failed = report.failed,
                non_cdn_added = report.appended,
                "Host stage finished"
            );
        }
        Ok(report)
    }
}
