use serde::{Deserialize, Serialize};
use crate::tools::ToolKind;

/// Contents of the optional YAML config file. Every section may be omitted.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ReconConfig {
    pub store: Option<StoreConfig>,
    pub tools: Option<ToolsConfig>,
    pub pipeline: Option<PipelineSettings>,
    pub expand: Option<ExpandConfig>,
    pub classify: Option<ClassifyConfig>,
    pub scan: Option<ScanConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct StoreConfig {
    pub path: Option<String>,
    pub log_dir: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSettings {
    pub path: String,
    pub timeout_secs: u64,
    /// Extra arguments placed before the ones the stage builds.
    pub args: Vec<String>,
}

impl ToolSettings {
    pub fn new(path: &str, timeout_secs: u64) -> Self {
        Self { path: path.to_string(), timeout_secs, args: Vec::new() }
    }

    fn overlay(mut self, file: Option<ToolSettingsFile>) -> Self {
        if let Some(file) = file {
            if let Some(path) = file.path {
                self.path = path;
            }
            if let Some(timeout_secs) = file.timeout_secs {
                self.timeout_secs = timeout_secs;
            }
            if let Some(args) = file.args {
                self.args = args;
            }
        }
        self
    }
}

/// A tool section as written in the file: any field may be left out and
/// falls back to that tool's default.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolSettingsFile {
    path: Option<String>,
    timeout_secs: Option<u64>,
    args: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolsFile {
    resolver: Option<ToolSettingsFile>,
    classifier: Option<ToolSettingsFile>,
    scanner: Option<ToolSettingsFile>,
    prober: Option<ToolSettingsFile>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(from = "ToolsFile")]
pub struct ToolsConfig {
    pub resolver: ToolSettings,
    pub classifier: ToolSettings,
    pub scanner: ToolSettings,
    pub prober: ToolSettings,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            resolver: ToolSettings::new("host", 30),
            classifier: ToolSettings::new("nali", 30),
            scanner: ToolSettings::new("masscan", 1800),
            prober: ToolSettings::new("httpx", 120),
        }
    }
}

impl From<ToolsFile> for ToolsConfig {
    fn from(file: ToolsFile) -> Self {
        let defaults = ToolsConfig::default();
        Self {
            resolver: defaults.resolver.overlay(file.resolver),
            classifier: defaults.classifier.overlay(file.classifier),
            scanner: defaults.scanner.overlay(file.scanner),
            prober: defaults.prober.overlay(file.prober),
        }
    }
}

impl ToolsConfig {
    pub fn settings(&self, kind: ToolKind) -> &ToolSettings {
        match kind {
            ToolKind::Resolver => &self.resolver,
            ToolKind::Classifier => &self.classifier,
            ToolKind::Scanner => &self.scanner,
            ToolKind::Prober => &self.prober,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Pending scan rows at or above this count defer the scan stage.
    pub scan_batch_threshold: usize,
    pub poll_interval_secs: u64,
    pub max_cycles: u32,
    /// Consecutive cycles with attempts but nothing processed before giving up.
    pub stall_cycles: u32,
    pub max_attempts: u32,
    pub max_runtime_secs: Option<u64>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            scan_batch_threshold: 60,
            poll_interval_secs: 0,
            max_cycles: 50,
            stall_cycles: 3,
            max_attempts: 3,
            max_runtime_secs: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ExpandConfig {
    /// Prefix applied when the classifier does not report a block.
    pub ipv4_prefix: u8,
    pub ipv6_prefix: u8,
    pub max_block_size: u64,
    /// Classify private addresses but do not expand them.
    pub skip_private: bool,
}

impl Default for ExpandConfig {
    fn default() -> Self {
        Self {
            ipv4_prefix: 28,
            ipv6_prefix: 124,
            max_block_size: 4096,
            skip_private: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ClassifyConfig {
    pub cloud_keywords: Vec<String>,
}

pub const DEFAULT_CLOUD_KEYWORDS: &[&str] = &[
    "腾讯云",
    "阿里云",
    "Amazon",
    "AWS",
    "Azure",
    "Google Cloud",
    "华为云",
    "百度云",
    "UCloud",
    "青云",
    "Cloud",
    "云",
];

impl Default for ClassifyConfig {
    fn default() -> Self {
        Self {
            cloud_keywords: DEFAULT_CLOUD_KEYWORDS.iter().map(|k| k.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Port spec handed to the scanner as `-p<ports>`.
    pub ports: String,
    pub rate: u32,
    /// Hosts reporting this many open ports or more are treated as noise.
    pub max_open_ports_per_host: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            ports: "1-65535".to_string(),
            rate: 1000,
            max_open_ports_per_host: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recon_config_default() {
        let config = ReconConfig::default();
        assert!(config.store.is_none());
        assert!(config.tools.is_none());
        assert!(config.pipeline.is_none());
    }

    #[test]
    fn test_pipeline_defaults() {
        let settings = PipelineSettings::default();
        assert_eq!(settings.scan_batch_threshold, 60);
        assert_eq!(settings.max_cycles, 50);
        assert_eq!(settings.stall_cycles, 3);
        assert_eq!(settings.max_runtime_secs, None);
    }

    #[test]
    fn test_partial_section_keeps_defaults() {
        let config: ReconConfig = serde_yaml::from_str(
            "tools:\n  scanner:\n    path: /opt/masscan\npipeline:\n  max_cycles: 5\n",
        ).unwrap();
        let tools = config.tools.unwrap();
        assert_eq!(tools.scanner.path, "/opt/masscan");
        assert_eq!(tools.scanner.timeout_secs, 1800);
        assert_eq!(tools.resolver.path, "host");
        let pipeline = config.pipeline.unwrap();
        assert_eq!(pipeline.max_cycles, 5);
        assert_eq!(pipeline.scan_batch_threshold, 60);
    }

    #[test]
    fn test_settings_by_kind() {
        let tools = ToolsConfig::default();
        assert_eq!(tools.settings(ToolKind::Classifier).path, "nali");
        assert_eq!(tools.settings(ToolKind::Prober).path, "httpx");
    }

    #[test]
    fn test_default_keywords_include_cloud() {
        assert!(ClassifyConfig::default().cloud_keywords.iter().any(|k| k == "Cloud"));
    }
}
