use std::net::IpAddr;
use async_trait::async_trait;
use ipnetwork::IpNetwork;
use tracing::{debug, info};
use crate::config::{ClassifyConfig, ExpandConfig};
use crate::errors::{ReconError, RetryPolicy};
use crate::pipeline::expand::{derive_block, enumerate_block, is_private};
use crate::pipeline::stage::{fail_row, Stage, StageName, StageReport};
use crate::store::normalize::parse_ip;
use crate::store::{col, DedupAppender, Row, TableKind, TableStore};
use crate::tools::nali::{IpClassification, NaliParser};
use crate::tools::{OutputParser, Tool, ToolKind};

pub const CLOUD: &str = "Cloud";
pub const NON_CLOUD: &str = "NonCloud";

/// Source recorded for cloud addresses copied through unexpanded.
const CLOUD_SOURCE: &str = "cloud";

/// Classifies non-CDN addresses and feeds the scan table: cloud addresses
/// verbatim, non-cloud addresses as every member of their block.
pub struct ClassifyStage {
    tool: Tool,
    parser: NaliParser,
    expand: ExpandConfig,
    policy: RetryPolicy,
}

/// What a classified address contributes to the scan table.
struct Expansion {
    classification: IpClassification,
    block: Option<IpNetwork>,
    members: Vec<IpAddr>,
}

impl ClassifyStage {
    pub fn new(tool: Tool, classify: &ClassifyConfig, expand: ExpandConfig, policy: RetryPolicy) -> Self {
        Self {
            tool,
            parser: NaliParser::new(&classify.cloud_keywords),
            expand,
            policy,
        }
    }

    async fn classify(&self, ip: IpAddr) -> Result<IpClassification, ReconError> {
        let target = ip.to_string();
        let output = self.tool.invoke(vec![target.clone()], vec![target]).await?;
        output.check_exit(ToolKind::Classifier, false)?;
        let mut records = self.parser.parse(&output).into_result(ToolKind::Classifier)?;
        records
            .pop()
            .ok_or_else(|| ReconError::parse(ToolKind::Classifier.as_str(), "no classification"))
    }

    async fn classify_and_expand(&self, ip: IpAddr) -> Result<Expansion, ReconError> {
        let classification = self.classify(ip).await?;
        if classification.cloud {
            return Ok(Expansion { classification, block: None, members: vec![ip] });
        }
        let block = derive_block(ip, classification.cidr, &self.expand)?;
        let members = if self.expand.skip_private && is_private(ip) {
            debug!(%ip, %block, "Private address, block not expanded");
            Vec::new()
        } else {
            enumerate_block(&block, self.expand.max_block_size)?
        };
        Ok(Expansion { classification, block: Some(block), members })
    }
}

#[async_trait]
impl Stage for ClassifyStage {
    fn name(&self) -> StageName {
        StageName::Classify
    }

    async fn run(&self, store: &mut TableStore) -> Result<StageReport, ReconError> {
        let mut report = StageReport::default();
        let pending = store.pending_rows(TableKind::NonCdnIps, &self.policy);

        for row in pending {
            let raw = row.get(col::IP).trim().to_string();
            let Some(ip) = parse_ip(&raw) else {
                let error = ReconError::parse(ToolKind::Classifier.as_str(), format!("'{}' is not an IP address", raw));
                fail_row(store, TableKind::NonCdnIps, &raw, error, &mut report)?;
                continue;
            };

            let expansion = match self.classify_and_expand(ip).await {
                Ok(expansion) => expansion,
                Err(e) => {
                    fail_row(store, TableKind::NonCdnIps, &raw, e, &mut report)?;
                    continue;
                }
            };

            let ip_type = if expansion.classification.cloud { CLOUD } else { NON_CLOUD };
            let block_text = expansion.block.map(|b| b.to_string()).unwrap_or_default();
            store.mark_processed(
                TableKind::NonCdnIps,
                &raw,
                &[
                    (col::IP_TYPE, ip_type.to_string()),
                    (col::LOCATION, expansion.classification.location.clone()),
                    (col::CIDR, block_text.clone()),
                ],
            );
            report.processed += 1;

            let source = if expansion.classification.cloud { CLOUD_SOURCE } else { block_text.as_str() };
            let mut appender = DedupAppender::new(store, TableKind::ExpandedIps);
            for member in &expansion.members {
                appender.append_unique(
                    Row::new()
                        .with(col::IP, member.to_string())
                        .with(col::SOURCE, source),
                );
            }
            debug!(%ip, ip_type, block = %block_text, added = appender.appended(), "Classified");
            report.appended += appender.appended();
        }

        if report.attempted() > 0 {
            info!(
                processed = report.processed,
                failed = report.failed,
                scan_targets_added = report.appended,
                "Classify stage finished"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::stages::testing::{stdout, tool, ScriptedRunner};

    fn stage(runner: std::sync::Arc<ScriptedRunner>, expand: ExpandConfig) -> ClassifyStage {
        ClassifyStage::new(
            tool(ToolKind::Classifier, runner),
            &ClassifyConfig::default(),
            expand,
            RetryPolicy::default(),
        )
    }

    fn seeded(ips: &[&str]) -> TableStore {
        let mut store = TableStore::new("unused.json");
        for ip in ips {
            store.append_row(TableKind::NonCdnIps, Row::new().with(col::IP, *ip));
        }
        store
    }

    fn expanded(store: &TableStore) -> Vec<String> {
        store
            .rows(TableKind::ExpandedIps)
            .iter()
            .map(|r| r.get(col::IP).to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_non_cloud_block_is_fully_expanded() {
        let runner = ScriptedRunner::new(|inv| stdout(&format!("{} [局域网 10.0.0.0/30]\n", inv.args[0])));
        let mut store = seeded(&["10.0.0.5"]);

        let report = stage(runner, ExpandConfig::default()).run(&mut store).await.unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(report.appended, 4);
        assert_eq!(expanded(&store), vec!["10.0.0.4", "10.0.0.5", "10.0.0.6", "10.0.0.7"]);

        let row = store.find(TableKind::NonCdnIps, "10.0.0.5").unwrap();
        assert_eq!(row.get(col::IP_TYPE), NON_CLOUD);
        assert_eq!(row.get(col::CIDR), "10.0.0.4/30");
        assert_eq!(row.get(col::NALI_STATUS), "processed");
    }

    #[tokio::test]
    async fn test_cloud_address_copied_verbatim() {
        let runner = ScriptedRunner::new(|inv| stdout(&format!("{} [阿里云 杭州]\n", inv.args[0])));
        let mut store = seeded(&["47.96.1.1"]);

        stage(runner, ExpandConfig::default()).run(&mut store).await.unwrap();
        assert_eq!(expanded(&store), vec!["47.96.1.1"]);
        assert_eq!(store.rows(TableKind::ExpandedIps)[0].get(col::SOURCE), "cloud");
        assert_eq!(store.find(TableKind::NonCdnIps, "47.96.1.1").unwrap().get(col::IP_TYPE), CLOUD);
    }

    #[tokio::test]
    async fn test_overlapping_blocks_do_not_duplicate() {
        let runner = ScriptedRunner::new(|inv| stdout(&format!("{} [IDC]\n", inv.args[0])));
        let mut store = seeded(&["198.51.100.1", "198.51.100.2"]);
        let expand = ExpandConfig { ipv4_prefix: 30, ..Default::default() };

        let report = stage(runner, expand).run(&mut store).await.unwrap();
        assert_eq!(report.processed, 2);
        assert_eq!(expanded(&store).len(), 4);
    }

    #[tokio::test]
    async fn test_oversized_block_fails_row() {
        let runner = ScriptedRunner::new(|inv| stdout(&format!("{} [IDC 10.0.0.0/8]\n", inv.args[0])));
        let mut store = seeded(&["10.0.0.5"]);

        let report = stage(runner, ExpandConfig::default()).run(&mut store).await.unwrap();
        assert_eq!(report.failed, 1);
        assert!(expanded(&store).is_empty());
        let row = store.find(TableKind::NonCdnIps, "10.0.0.5").unwrap();
        assert_eq!(row.get(col::NALI_STATUS), "failed");
        assert!(row.get(col::NALI_ERROR).contains("above the limit"));
    }

    #[tokio::test]
    async fn test_skip_private_classifies_without_expanding() {
        let runner = ScriptedRunner::new(|inv| stdout(&format!("{} [LAN]\n", inv.args[0])));
        let mut store = seeded(&["192.168.1.10"]);
        let expand = ExpandConfig { skip_private: true, ..Default::default() };

        let report = stage(runner, expand).run(&mut store).await.unwrap();
        assert_eq!(report.processed, 1);
        assert!(expanded(&store).is_empty());
        assert_eq!(store.find(TableKind::NonCdnIps, "192.168.1.10").unwrap().get(col::CIDR), "192.168.1.0/28");
    }

    #[tokio::test]
    async fn test_garbage_ip_cell_fails_without_invoking_tool() {
        let runner = ScriptedRunner::new(|_| stdout("unused"));
        let mut store = seeded(&["not-an-ip"]);

        let report = stage(runner.clone(), ExpandConfig::default()).run(&mut store).await.unwrap();
        assert_eq!(report.failed, 1);
        assert!(runner.calls().is_empty());
    }
}
