//! Parser for `nali <ip>` geolocation output.

use std::sync::LazyLock;
use ipnetwork::IpNetwork;
use regex::Regex;
use super::parse::{OutputParser, ParseOutcome};
use super::runner::ToolOutput;

static BRACKETED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[([^\]]*)\]").unwrap());
static CIDR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([0-9A-Fa-f:.]+/\d{1,3})").unwrap());

#[derive(Debug, Clone, PartialEq)]
pub struct IpClassification {
    pub location: String,
    pub cloud: bool,
    /// A block named in the output, if the tool reported one.
    pub cidr: Option<IpNetwork>,
}

pub struct NaliParser {
    keywords: Vec<String>,
}

impl NaliParser {
    pub fn new(keywords: &[String]) -> Self {
        Self {
            keywords: keywords.iter().map(|k| k.to_lowercase()).filter(|k| !k.is_empty()).collect(),
        }
    }

    pub fn is_cloud(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.keywords.iter().any(|k| lower.contains(k.as_str()))
    }
}

impl OutputParser for NaliParser {
    type Record = IpClassification;

    fn parse(&self, output: &ToolOutput) -> ParseOutcome<IpClassification> {
        let text = output.stdout.trim();
        if text.is_empty() {
            return ParseOutcome::Failure("no output".to_string());
        }

        let location = match BRACKETED.captures(text) {
            Some(caps) => caps[1].trim().to_string(),
            None => text
                .split_once(char::is_whitespace)
                .map(|(_, rest)| rest.trim().to_string())
                .unwrap_or_default(),
        };

        let cidr = CIDR
            .captures_iter(text)
            .find_map(|caps| caps[1].parse::<IpNetwork>().ok());

        ParseOutcome::Records(vec![IpClassification {
            cloud: self.is_cloud(&location) || self.is_cloud(text),
            location,
            cidr,
        }])
    }
}
