use std::sync::LazyLock;
use clap::Parser;

static LONG_VERSION: LazyLock<String> = LazyLock::new(|| {
    format!(
        "{} ({} built {})",
        env!("CARGO_PKG_VERSION"),
        option_env!("GIT_HASH").unwrap_or("dev"),
        option_env!("BUILD_TIMESTAMP").unwrap_or("unknown"),
    )
});

#[derive(Parser, Debug, Clone)]
#[command(
    name = "recon-pipeline",
    version,
    long_version = LONG_VERSION.as_str(),
    about = "Staged recon pipeline: subdomains, hosts, address blocks, ports, HTTP services"
)]
pub struct Cli {
    /// Table store (JSON workbook); created on first flush if missing
    #[arg(short, long)]
    pub store: Option<String>,

    /// YAML configuration file
    #[arg(short, long)]
    pub config: Option<String>,

    /// Directory for per-tool invocation logs
    #[arg(long)]
    pub log_dir: Option<String>,

    /// File of subdomains (one per line) to add before running
    #[arg(long)]
    pub seed: Option<String>,

    /// Stop after this many cycles
    #[arg(long)]
    pub max_cycles: Option<u32>,

    /// Seconds to wait between cycles
    #[arg(long)]
    pub poll_interval: Option<u64>,

    /// Only check that the configured tools are installed
    #[arg(long)]
    pub check_tools: bool,

    /// Increase log verbosity (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,
}
