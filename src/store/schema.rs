use serde::{Deserialize, Serialize};
use super::normalize::IdentityKind;

/// Column names shared by the pipeline stages.
pub mod col {
    pub const NAME: &str = "name";
    pub const IPS: &str = "ips";
    pub const HOST_STATUS: &str = "host_status";
    pub const HOST_ATTEMPTS: &str = "host_attempts";
    pub const HOST_ERROR: &str = "host_error";

    pub const IP: &str = "ip";
    pub const IP_TYPE: &str = "ip_type";
    pub const LOCATION: &str = "location";
    pub const CIDR: &str = "cidr";
    pub const NALI_STATUS: &str = "nali_status";
    pub const NALI_ATTEMPTS: &str = "nali_attempts";
    pub const NALI_ERROR: &str = "nali_error";

    pub const SOURCE: &str = "source";
    pub const SCAN_STATUS: &str = "scan_status";
    pub const SCAN_ATTEMPTS: &str = "scan_attempts";
    pub const SCAN_ERROR: &str = "scan_error";

    pub const ENDPOINT: &str = "endpoint";

    pub const TARGET: &str = "target";
    pub const ORIGIN: &str = "origin";
    pub const HTTPX_STATUS: &str = "httpx_status";
    pub const HTTPX_ATTEMPTS: &str = "httpx_attempts";
    pub const HTTPX_ERROR: &str = "httpx_error";

    pub const URL: &str = "url";
    pub const STATUS_CODE: &str = "status_code";
    pub const TITLE: &str = "title";
    pub const SERVER: &str = "server";
    pub const TECHNOLOGIES: &str = "technologies";
}

/// The fixed set of tables the pipeline reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    Subdomains,
    NonCdnIps,
    ExpandedIps,
    IpPorts,
    HttpSummary,
    HttpxResults,
}

/// Status, attempt counter and last error columns owned by one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusColumns {
    pub status: &'static str,
    pub attempts: &'static str,
    pub error: &'static str,
}

impl TableKind {
    pub const ALL: [TableKind; 6] = [
        TableKind::Subdomains,
        TableKind::NonCdnIps,
        TableKind::ExpandedIps,
        TableKind::IpPorts,
        TableKind::HttpSummary,
        TableKind::HttpxResults,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Subdomains => "subdomains",
            Self::NonCdnIps => "non_cdn_ips",
            Self::ExpandedIps => "cloud_and_expanded_ips",
            Self::IpPorts => "ip_ports",
            Self::HttpSummary => "http_summary",
            Self::HttpxResults => "httpx_results",
        }
    }

    pub fn identity_column(&self) -> &'static str {
        match self {
            Self::Subdomains => col::NAME,
            Self::NonCdnIps | Self::ExpandedIps => col::IP,
            Self::IpPorts => col::ENDPOINT,
            Self::HttpSummary => col::TARGET,
            Self::HttpxResults => col::URL,
        }
    }

    pub fn identity_kind(&self) -> IdentityKind {
        match self {
            Self::Subdomains => IdentityKind::Host,
            Self::NonCdnIps | Self::ExpandedIps => IdentityKind::Ip,
            Self::IpPorts => IdentityKind::Endpoint,
            Self::HttpSummary => IdentityKind::Target,
            Self::HttpxResults => IdentityKind::Url,
        }
    }

    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            Self::Subdomains => &[
                col::NAME, col::IPS, col::HOST_STATUS, col::HOST_ATTEMPTS, col::HOST_ERROR,
            ],
            Self::NonCdnIps => &[
                col::IP, col::IP_TYPE, col::LOCATION, col::CIDR,
                col::NALI_STATUS, col::NALI_ATTEMPTS, col::NALI_ERROR,
            ],
            Self::ExpandedIps => &[
                col::IP, col::SOURCE, col::SCAN_STATUS, col::SCAN_ATTEMPTS, col::SCAN_ERROR,
            ],
            Self::IpPorts => &[col::ENDPOINT],
            Self::HttpSummary => &[
                col::TARGET, col::ORIGIN, col::HTTPX_STATUS, col::HTTPX_ATTEMPTS, col::HTTPX_ERROR,
            ],
            Self::HttpxResults => &[
                col::URL, col::STATUS_CODE, col::TITLE, col::SERVER, col::TECHNOLOGIES, col::TARGET,
            ],
        }
    }

    /// Stage-owned status columns, if a stage consumes this table.
    pub fn status_columns(&self) -> Option<StatusColumns> {
        match self {
            Self::Subdomains => Some(StatusColumns {
                status: col::HOST_STATUS,
                attempts: col::HOST_ATTEMPTS,
                error: col::HOST_ERROR,
            }),
            Self::NonCdnIps => Some(StatusColumns {
                status: col::NALI_STATUS,
                attempts: col::NALI_ATTEMPTS,
                error: col::NALI_ERROR,
            }),
            Self::ExpandedIps => Some(StatusColumns {
                status: col::SCAN_STATUS,
                attempts: col::SCAN_ATTEMPTS,
                error: col::SCAN_ERROR,
            }),
            Self::HttpSummary => Some(StatusColumns {
                status: col::HTTPX_STATUS,
                attempts: col::HTTPX_ATTEMPTS,
                error: col::HTTPX_ERROR,
            }),
            Self::IpPorts | Self::HttpxResults => None,
        }
    }
}

impl std::fmt::Display for TableKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
