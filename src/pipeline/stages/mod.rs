pub mod classify;
pub mod host;
pub mod portscan;
pub mod probe;

pub use classify::ClassifyStage;
pub use host::HostStage;
pub use portscan::PortScanStage;
pub use probe::{build_probe_targets, ProbeStage};
