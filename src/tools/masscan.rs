//! Parser for masscan console (`Discovered open port ...`) and list
//! (`-oL`, `open tcp 80 1.2.3.4 ...`) output.

use std::net::IpAddr;
use std::sync::LazyLock;
use regex::Regex;
use crate::store::normalize::{format_endpoint, parse_ip};
use super::parse::{OutputParser, ParseOutcome};
use super::runner::ToolOutput;

static DISCOVERED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Discovered open port (\S+)/(\w+) on (\S+)").unwrap()
});
static LIST_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^open (\w+) (\S+) (\S+)").unwrap()
});

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OpenPort {
    pub ip: IpAddr,
    pub port: u16,
    pub protocol: String,
}

impl OpenPort {
    pub fn endpoint(&self) -> String {
        format_endpoint(&self.ip.to_string(), &self.port.to_string())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MasscanParser;

impl OutputParser for MasscanParser {
    type Record = OpenPort;

    fn parse(&self, output: &ToolOutput) -> ParseOutcome<OpenPort> {
        let mut records: Vec<OpenPort> = Vec::new();
        let mut malformed = 0;

        for line in output.stdout.lines().map(str::trim) {
            let fields = if let Some(caps) = DISCOVERED.captures(line) {
                (caps[1].to_string(), caps[2].to_string(), caps[3].to_string())
            } else if let Some(caps) = LIST_LINE.captures(line) {
                (caps[2].to_string(), caps[1].to_string(), caps[3].to_string())
            } else {
                continue;
            };
            let (port, protocol, ip) = fields;
            match (port.parse::<u16>(), parse_ip(&ip)) {
                (Ok(port), Some(ip)) => {
                    let record = OpenPort { ip, port, protocol: protocol.to_lowercase() };
                    if !records.contains(&record) {
                        records.push(record);
                    }
                }
                _ => malformed += 1,
            }
        }

        if records.is_empty() && malformed > 0 {
            return ParseOutcome::Failure(format!("{} malformed port records", malformed));
        }
        ParseOutcome::from_records(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn out(stdout: &str) -> ToolOutput {
        ToolOutput { stdout: stdout.into(), exit_code: Some(0), ..Default::default() }
    }

    #[test]
    fn test_console_format() {
        let output = out(
            "Starting masscan 1.3.2\n\
             Discovered open port 443/tcp on 1.2.3.4\n\
             Discovered open port 22/tcp on 1.2.3.4\n\
             Discovered open port 443/tcp on 1.2.3.4\n",
        );
        let ParseOutcome::Records(records) = MasscanParser.parse(&output) else {
            panic!("expected records");
        };
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].endpoint(), "1.2.3.4:443");
        assert_eq!(records[1].port, 22);
    }

    #[test]
    fn test_list_format() {
        let output = out("#masscan\nopen tcp 8080 10.0.0.7 1690000000\n# end\n");
        let ParseOutcome::Records(records) = MasscanParser.parse(&output) else {
            panic!("expected records");
        };
        assert_eq!(records[0].endpoint(), "10.0.0.7:8080");
    }

    #[test]
    fn test_ipv6_endpoint_is_bracketed() {
        let output = out("Discovered open port 80/tcp on 2001:db8::1\n");
        let ParseOutcome::Records(records) = MasscanParser.parse(&output) else {
            panic!("expected records");
        };
        assert_eq!(records[0].endpoint(), "[2001:db8::1]:80");
    }

    #[test]
    fn test_nothing_open_is_empty() {
        assert_eq!(MasscanParser.parse(&out("rate:  0.00-kpps, 100.00% done\n")), ParseOutcome::Empty);
    }

    #[test]
    fn test_garbled_is_failure() {
        let output = out("Discovered open port 99999/tcp on 1.2.3.4\n");
        assert!(matches!(MasscanParser.parse(&output), ParseOutcome::Failure(_)));
    }
}
