use std::collections::{BTreeMap, HashSet};
use std::net::IpAddr;
use async_trait::async_trait;
use tracing::{info, warn};
use crate::config::ScanConfig;
use crate::errors::{ReconError, RetryPolicy};
use crate::pipeline::stage::{fail_row, Stage, StageName, StageReport};
use crate::store::normalize::parse_ip;
use crate::store::{col, DedupAppender, Row, TableKind, TableStore};
use crate::tools::masscan::{MasscanParser, OpenPort};
use crate::tools::{OutputParser, Tool, ToolKind};

/// Scans every pending address in a single scanner run.
///
/// The run only happens while the backlog is below `threshold`; at or above
/// it the stage defers entirely and reports the backlog. The batch succeeds
/// or fails as a unit.
pub struct PortScanStage {
    tool: Tool,
    scan: ScanConfig,
    threshold: usize,
    policy: RetryPolicy,
}

impl PortScanStage {
    pub fn new(tool: Tool, scan: ScanConfig, threshold: usize, policy: RetryPolicy) -> Self {
        Self { tool, scan, threshold, policy }
    }

    fn arguments(&self, targets: &[String]) -> Vec<String> {
        vec![
            format!("-p{}", self.scan.ports),
            targets.join(","),
            "--rate".to_string(),
            self.scan.rate.to_string(),
            "--wait".to_string(),
            "0".to_string(),
        ]
    }

    async fn scan(&self, targets: &[String]) -> Result<Vec<OpenPort>, ReconError> {
        let output = self.tool.invoke(self.arguments(targets), targets.to_vec()).await?;
        output.check_exit(ToolKind::Scanner, false)?;
        MasscanParser.parse(&output).into_result(ToolKind::Scanner)
    }

    /// Keep hits for addresses in the batch, dropping hosts that answer on
    /// too many ports to be believable.
    fn credible_hits(&self, hits: Vec<OpenPort>, batch: &HashSet<IpAddr>) -> Vec<OpenPort> {
        let mut by_host: BTreeMap<IpAddr, Vec<OpenPort>> = BTreeMap::new();
        for hit in hits {
            if batch.contains(&hit.ip) {
                by_host.entry(hit.ip).or_default().push(hit);
            } else {
                warn!(ip = %hit.ip, port = hit.port, "Scanner reported an address outside the batch, ignored");
            }
        }
        by_host
            .into_iter()
            .filter_map(|(ip, ports)| {
                if ports.len() >= self.scan.max_open_ports_per_host {
                    warn!(
                        %ip,
                        open_ports = ports.len(),
                        limit = self.scan.max_open_ports_per_host,
                        "Host reports too many open ports, discarded as noise"
                    );
                    None
                } else {
                    Some(ports)
                }
            })
            .flatten()
            .collect()
    }
}

#[async_trait]
impl Stage for PortScanStage {
    fn name(&self) -> StageName {
        StageName::PortScan
    }

    async fn run(&self, store: &mut TableStore) -> Result<StageReport, ReconError> {
        let mut report = StageReport::default();
        let pending = store.pending_rows(TableKind::ExpandedIps, &self.policy);
        if pending.is_empty() {
            return Ok(report);
        }
        if pending.len() >= self.threshold {
            warn!(
                pending = pending.len(),
                threshold = self.threshold,
                "Scan backlog at or above batch threshold, stage deferred"
            );
            report.deferred = pending.len();
            return Ok(report);
        }

        let mut targets: Vec<String> = Vec::new();
        let mut batch: HashSet<IpAddr> = HashSet::new();
        for row in &pending {
            let raw = row.get(col::IP).trim();
            match parse_ip(raw) {
                Some(ip) => {
                    if batch.insert(ip) {
                        targets.push(ip.to_string());
                    }
                }
                None => {
                    let error = ReconError::parse(ToolKind::Scanner.as_str(), format!("'{}' is not an IP address", raw));
                    fail_row(store, TableKind::ExpandedIps, raw, error, &mut report)?;
                }
            }
        }
        if targets.is_empty() {
            return Ok(report);
        }

        info!(targets = targets.len(), ports = %self.scan.ports, "Scanning batch");
        let hits = match self.scan(&targets).await {
            Ok(hits) => hits,
            Err(e) => {
                let classification = e.classify();
                if !classification.is_row_local() {
                    return Err(e);
                }
                warn!(targets = targets.len(), error = %e, "Scan batch failed");
                let reason = e.to_string();
                for target in &targets {
                    if store.mark_failed(TableKind::ExpandedIps, target, &reason) > 0 {
                        report.failed += 1;
                    }
                }
                return Ok(report);
            }
        };

        let hits = self.credible_hits(hits, &batch);
        let mut appender = DedupAppender::new(store, TableKind::IpPorts);
        for hit in &hits {
            appender.append_unique(Row::new().with(col::ENDPOINT, hit.endpoint()));
        }
        report.appended = appender.appended();

        for target in &targets {
            report.processed += store.mark_processed(TableKind::ExpandedIps, target, &[]).min(1);
        }

        info!(
            scanned = report.processed,
            open_ports = hits.len(),
            endpoints_added = report.appended,
            "Scan stage finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::stages::testing::{stdout, tool, ScriptedRunner};
    use crate::tools::ToolOutput;

    fn seeded(count: usize) -> TableStore {
        let mut store = TableStore::new("unused.json");
        for i in 0..count {
            store.append_row(TableKind::ExpandedIps, Row::new().with(col::IP, format!("10.1.{}.{}", i / 250, i % 250 + 1)));
        }
        store
    }

    fn stage(runner: std::sync::Arc<ScriptedRunner>) -> PortScanStage {
        PortScanStage::new(tool(ToolKind::Scanner, runner), ScanConfig::default(), 60, RetryPolicy::default())
    }

    #[tokio::test]
    async fn test_below_threshold_scans_whole_batch() {
        let runner = ScriptedRunner::new(|_| stdout("Discovered open port 443/tcp on 10.1.0.1\n"));
        let mut store = seeded(59);

        let report = stage(runner.clone()).run(&mut store).await.unwrap();
        assert_eq!(report.processed, 59);
        assert_eq!(report.appended, 1);
        assert_eq!(store.rows(TableKind::IpPorts)[0].get(col::ENDPOINT), "10.1.0.1:443");

        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].targets.len(), 59);
        assert_eq!(calls[0].args[0], "-p1-65535");
        assert_eq!(&calls[0].args[2..], ["--rate", "1000", "--wait", "0"]);
    }

    #[tokio::test]
    async fn test_at_threshold_defers_without_invoking() {
        let runner = ScriptedRunner::new(|_| stdout(""));
        let mut store = seeded(60);

        let report = stage(runner.clone()).run(&mut store).await.unwrap();
        assert_eq!(report.deferred, 60);
        assert_eq!(report.attempted(), 0);
        assert!(runner.calls().is_empty());
        assert_eq!(store.status_counts(TableKind::ExpandedIps, &RetryPolicy::default()).pending, 60);
    }

    #[tokio::test]
    async fn test_batch_failure_fails_every_target() {
        let runner = ScriptedRunner::new(|_| {
            Ok(ToolOutput {
                stderr: "FAIL: permission denied".into(),
                exit_code: Some(1),
                ..Default::default()
            })
        });
        let mut store = seeded(3);

        let report = stage(runner).run(&mut store).await.unwrap();
        assert_eq!((report.processed, report.failed), (0, 3));
        for row in store.rows(TableKind::ExpandedIps) {
            assert_eq!(row.get(col::SCAN_STATUS), "failed");
        }
    }

    #[tokio::test]
    async fn test_noisy_host_and_foreign_address_are_dropped() {
        let runner = ScriptedRunner::new(|_| {
            let mut out = String::new();
            for port in 1..=60 {
                out.push_str(&format!("Discovered open port {}/tcp on 10.1.0.1\n", port));
            }
            out.push_str("Discovered open port 22/tcp on 10.1.0.2\n");
            out.push_str("Discovered open port 80/tcp on 192.0.2.1\n");
            stdout(&out)
        });
        let mut store = seeded(2);

        let report = stage(runner).run(&mut store).await.unwrap();
        assert_eq!(report.processed, 2);
        let endpoints: Vec<&str> = store.rows(TableKind::IpPorts).iter().map(|r| r.get(col::ENDPOINT)).collect();
        assert_eq!(endpoints, vec!["10.1.0.2:22"]);
    }

    #[tokio::test]
    async fn test_nothing_open_still_processes_batch() {
        let runner = ScriptedRunner::new(|_| stdout(""));
        let mut store = seeded(2);

        let report = stage(runner).run(&mut store).await.unwrap();
        assert_eq!(report.processed, 2);
        assert!(store.rows(TableKind::IpPorts).is_empty());
    }
}
