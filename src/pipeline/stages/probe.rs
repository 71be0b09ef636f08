use std::collections::HashMap;
use async_trait::async_trait;
use tracing::{debug, info, warn};
use crate::errors::{ReconError, RetryPolicy};
use crate::pipeline::stage::{fail_row, Stage, StageName, StageReport};
use crate::store::normalize::{format_endpoint, normalize_host, normalize_ip, parse_ip, split_endpoint};
use crate::store::{col, DedupAppender, Row, TableKind, TableStore};
use crate::tools::httpx::{HttpResponse, HttpxParser};
use crate::tools::{OutputParser, Tool, ToolKind};

/// Values of the `origin` column in the probe target table.
pub mod origin {
    pub const ENDPOINT: &str = "endpoint";
    pub const SUBDOMAIN_ENDPOINT: &str = "subdomain-endpoint";
    pub const SUBDOMAIN: &str = "subdomain";
}

/// Port ranges wider than this in a hand-edited endpoint are not expanded.
const MAX_RANGE_PORTS: u32 = 1024;

const PROBE_FLAGS: &[&str] = &["-sc", "-title", "-server", "-td", "-fr", "-nc", "-silent", "-json"];

/// Expand `80`, `80,443` or `8000-8010` into individual ports.
fn expand_ports(spec: &str) -> Option<Vec<u16>> {
    let mut ports = Vec::new();
    for piece in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match piece.split_once('-') {
            Some((start, end)) => {
                let start: u16 = start.trim().parse().ok()?;
                let end: u16 = end.trim().parse().ok()?;
                if start > end || u32::from(end - start) >= MAX_RANGE_PORTS {
                    return None;
                }
                ports.extend(start..=end);
            }
            None => ports.push(piece.parse().ok()?),
        }
    }
    if ports.is_empty() {
        None
    } else {
        Some(ports)
    }
}

/// Map each resolved address to the subdomains that resolved to it, in
/// table order.
fn names_by_ip(store: &TableStore) -> (HashMap<String, Vec<String>>, Vec<String>) {
    let mut by_ip: HashMap<String, Vec<String>> = HashMap::new();
    let mut resolved_names = Vec::new();
    for row in store.rows(TableKind::Subdomains) {
        let name = normalize_host(row.get(col::NAME));
        if name.is_empty() {
            continue;
        }
        let ips: Vec<String> = row
            .get(col::IPS)
            .split(',')
            .map(str::trim)
            .filter(|ip| parse_ip(ip).is_some())
            .map(normalize_ip)
            .collect();
        if ips.is_empty() {
            continue;
        }
        for ip in ips {
            let names = by_ip.entry(ip).or_default();
            if !names.contains(&name) {
                names.push(name.clone());
            }
        }
        if !resolved_names.contains(&name) {
            resolved_names.push(name);
        }
    }
    (by_ip, resolved_names)
}

/// Fill the probe target table from discovered endpoints and resolved
/// subdomains. Returns the number of targets added.
///
/// Targets are every endpoint as found, every endpoint with its address
/// replaced by each subdomain resolving to it, and every resolved subdomain
/// on its own for a default-port probe.
pub fn build_probe_targets(store: &mut TableStore) -> usize {
    let (by_ip, resolved_names) = names_by_ip(store);

    let mut targets: Vec<(String, &'static str)> = Vec::new();
    for row in store.rows(TableKind::IpPorts) {
        let raw = row.get(col::ENDPOINT).trim();
        if raw.is_empty() {
            continue;
        }
        let Some((host, port_spec)) = split_endpoint(raw) else {
            warn!(endpoint = raw, "Endpoint has no port, skipped");
            continue;
        };
        let Some(ports) = expand_ports(port_spec) else {
            warn!(endpoint = raw, "Unusable port specification, skipped");
            continue;
        };
        let host = normalize_host(host);
        let names = by_ip.get(&host);
        for port in ports {
            let port = port.to_string();
            targets.push((format_endpoint(&host, &port), origin::ENDPOINT));
            for name in names.into_iter().flatten() {
                targets.push((format_endpoint(name, &port), origin::SUBDOMAIN_ENDPOINT));
            }
        }
    }
    for name in resolved_names {
        targets.push((name, origin::SUBDOMAIN));
    }

    let mut appender = DedupAppender::new(store, TableKind::HttpSummary);
    for (target, origin) in targets {
        appender.append_unique(Row::new().with(col::TARGET, target).with(col::ORIGIN, origin));
    }
    appender.appended()
}

/// Probes every pending target and records the responding URLs.
pub struct ProbeStage {
    tool: Tool,
    policy: RetryPolicy,
}

impl ProbeStage {
    pub fn new(tool: Tool, policy: RetryPolicy) -> Self {
        Self { tool, policy }
    }

    async fn probe(&self, target: &str) -> Result<Vec<HttpResponse>, ReconError> {
        let mut args = vec!["-u".to_string(), target.to_string()];
        args.extend(PROBE_FLAGS.iter().map(|f| f.to_string()));
        let output = self.tool.invoke(args, vec![target.to_string()]).await?;
        output.check_exit(ToolKind::Prober, false)?;
        HttpxParser.parse(&output).into_result(ToolKind::Prober)
    }
}

#[async_trait]
impl Stage for ProbeStage {
    fn name(&self) -> StageName {
        StageName::HttpProbe
    }

    async fn run(&self, store: &mut TableStore) -> Result<StageReport, ReconError> {
        let mut report = StageReport::default();
        let targets_added = build_probe_targets(store);
        if targets_added > 0 {
            debug!(targets_added, "Probe targets built");
        }

        let pending = store.pending_rows(TableKind::HttpSummary, &self.policy);
        for row in pending {
            let target = row.get(col::TARGET).trim().to_string();
            let responses = match self.probe(&target).await {
                Ok(responses) => responses,
                Err(e) => {
                    fail_row(store, TableKind::HttpSummary, &target, e, &mut report)?;
                    continue;
                }
            };

            let mut appender = DedupAppender::new(store, TableKind::HttpxResults);
            for response in responses {
                appender.append_unique(
                    Row::new()
                        .with(col::URL, response.url)
                        .with(col::STATUS_CODE, response.status_code.map(|c| c.to_string()).unwrap_or_default())
                        .with(col::TITLE, response.title)
                        .with(col::SERVER, response.server)
                        .with(col::TECHNOLOGIES, response.technologies.join(", "))
                        .with(col::TARGET, target.clone()),
                );
            }
            report.appended += appender.appended();
            store.mark_processed(TableKind::HttpSummary, &target, &[]);
            report.processed += 1;
        }

        if report.attempted() > 0 || targets_added > 0 {
            info!(
                targets_added,
                probed = report.processed,
                failed = report.failed,
                results_added = report.appended,
                "Probe stage finished"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::stages::testing::{stdout, tool, ScriptedRunner};

    fn targets(store: &TableStore) -> Vec<(String, String)> {
        store
            .rows(TableKind::HttpSummary)
            .iter()
            .map(|r| (r.get(col::TARGET).to_string(), r.get(col::ORIGIN).to_string()))
            .collect()
    }

    fn has_target(store: &TableStore, target: &str) -> bool {
        store.find(TableKind::HttpSummary, target).is_some()
    }

    #[test]
    fn test_join_substitutes_subdomain_names() {
        let mut store = TableStore::new("unused.json");
        store.append_row(
            TableKind::Subdomains,
            Row::new().with(col::NAME, "a.example.com").with(col::IPS, "1.2.3.4"),
        );
        store.append_row(TableKind::IpPorts, Row::new().with(col::ENDPOINT, "1.2.3.4:443"));

        let added = build_probe_targets(&mut store);
        assert_eq!(added, 3);
        assert!(has_target(&store, "1.2.3.4:443"));
        assert!(has_target(&store, "a.example.com:443"));
        assert!(has_target(&store, "a.example.com"));
        assert_eq!(
            targets(&store)[1],
            ("a.example.com:443".to_string(), origin::SUBDOMAIN_ENDPOINT.to_string())
        );
    }

    #[test]
    fn test_shared_ip_yields_target_per_subdomain() {
        let mut store = TableStore::new("unused.json");
        for name in ["a.example.com", "b.example.com"] {
            store.append_row(TableKind::Subdomains, Row::new().with(col::NAME, name).with(col::IPS, "1.2.3.4, 5.6.7.8"));
        }
        store.append_row(TableKind::Subdomains, Row::new().with(col::NAME, "dead.example.com"));
        store.append_row(TableKind::IpPorts, Row::new().with(col::ENDPOINT, "5.6.7.8:8080"));

        build_probe_targets(&mut store);
        assert!(has_target(&store, "a.example.com:8080"));
        assert!(has_target(&store, "b.example.com:8080"));
        assert!(!has_target(&store, "dead.example.com"));
        assert_eq!(targets(&store).len(), 5);
    }

    #[test]
    fn test_hand_edited_port_lists_and_ranges() {
        let mut store = TableStore::new("unused.json");
        store.append_row(TableKind::IpPorts, Row::new().with(col::ENDPOINT, "9.9.9.9:80,443"));
        store.append_row(TableKind::IpPorts, Row::new().with(col::ENDPOINT, "9.9.9.9:8000-8002"));
        store.append_row(TableKind::IpPorts, Row::new().with(col::ENDPOINT, "9.9.9.9:1-65535"));

        assert_eq!(build_probe_targets(&mut store), 5);
        assert!(has_target(&store, "9.9.9.9:8001"));
    }

    #[test]
    fn test_rebuild_is_idempotent() {
        let mut store = TableStore::new("unused.json");
        store.append_row(TableKind::Subdomains, Row::new().with(col::NAME, "a.example.com").with(col::IPS, "1.2.3.4"));
        store.append_row(TableKind::IpPorts, Row::new().with(col::ENDPOINT, "1.2.3.4:443"));
        build_probe_targets(&mut store);
        assert_eq!(build_probe_targets(&mut store), 0);
    }

    #[test]
    fn test_expand_ports() {
        assert_eq!(expand_ports("443"), Some(vec![443]));
        assert_eq!(expand_ports("80, 443"), Some(vec![80, 443]));
        assert_eq!(expand_ports("90-80"), None);
        assert_eq!(expand_ports("http"), None);
    }

    #[tokio::test]
    async fn test_probe_records_results_per_target() {
        let runner = ScriptedRunner::new(|inv| match inv.args[1].as_str() {
            "a.example.com" => stdout(
                r#"{"url":"https://a.example.com","status_code":200,"title":"Home, Sweet Home","webserver":"nginx/1.24","tech":["Nginx","PHP"]}"#,
            ),
            _ => stdout(""),
        });
        let stage = ProbeStage::new(tool(ToolKind::Prober, runner.clone()), RetryPolicy::default());
        let mut store = TableStore::new("unused.json");
        store.append_row(TableKind::Subdomains, Row::new().with(col::NAME, "a.example.com").with(col::IPS, "1.2.3.4"));
        store.append_row(TableKind::IpPorts, Row::new().with(col::ENDPOINT, "1.2.3.4:443"));

        let report = stage.run(&mut store).await.unwrap();
        assert_eq!(report.processed, 3);
        assert_eq!(report.appended, 1);

        let result = &store.rows(TableKind::HttpxResults)[0];
        assert_eq!(result.get(col::URL), "https://a.example.com");
        assert_eq!(result.get(col::STATUS_CODE), "200");
        assert_eq!(result.get(col::TITLE), "Home, Sweet Home");
        assert_eq!(result.get(col::SERVER), "nginx/1.24");
        assert_eq!(result.get(col::TECHNOLOGIES), "Nginx, PHP");
        assert_eq!(result.get(col::TARGET), "a.example.com");

        let calls = runner.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].args[0], "-u");
        assert!(calls[0].args.iter().any(|a| a == "-silent"));
        assert!(calls[0].args.iter().any(|a| a == "-json"));

        assert_eq!(stage.run(&mut store).await.unwrap().attempted(), 0);
    }
}
