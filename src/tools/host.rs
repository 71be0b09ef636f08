//! Parser for `host <name>` output.

use std::net::IpAddr;
use crate::store::normalize::parse_ip;
use super::parse::{OutputParser, ParseOutcome};
use super::runner::ToolOutput;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostAddress {
    /// Owner name of the address record (the canonical name when aliased).
    pub name: String,
    pub ip: IpAddr,
    /// The lookup passed through at least one CNAME.
    pub aliased: bool,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct HostParser;

/// NXDOMAIN is a definitive "no such name", not a tool failure.
pub fn is_negative_answer(stdout: &str) -> bool {
    stdout.lines().any(|l| l.contains("not found: 3(NXDOMAIN)"))
}

impl OutputParser for HostParser {
    type Record = HostAddress;

    fn parse(&self, output: &ToolOutput) -> ParseOutcome<HostAddress> {
        let stdout = &output.stdout;
        if is_negative_answer(stdout) {
            return ParseOutcome::Empty;
        }
        if let Some(line) = stdout.lines().find(|l| l.contains(" not found: ")) {
            return ParseOutcome::Failure(format!("lookup failed: {}", line.trim()));
        }

        let aliased = stdout.lines().any(|l| l.contains(" is an alias for "));
        let mut records = Vec::new();
        let mut malformed = 0;

        for line in stdout.lines() {
            let Some((owner, value)) = line
                .split_once(" has address ")
                .or_else(|| line.split_once(" has IPv6 address "))
            else {
                continue;
            };
            match parse_ip(value) {
                Some(ip) => records.push(HostAddress {
                    name: owner.trim().trim_end_matches(':').trim_end_matches('.').to_lowercase(),
                    ip,
                    aliased,
                }),
                None => malformed += 1,
            }
        }

        if records.is_empty() && malformed > 0 {
            return ParseOutcome::Failure(format!("{} malformed address records", malformed));
        }
        ParseOutcome::from_records(records)
    }
}
