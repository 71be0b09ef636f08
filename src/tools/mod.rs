pub mod audit;
pub mod host;
pub mod httpx;
pub mod masscan;
pub mod nali;
pub mod parse;
pub mod preflight;
pub mod runner;
pub mod tool;

pub use audit::ToolAuditLog;
pub use parse::{OutputParser, ParseOutcome};
pub use runner::{CommandRunner, ProcessRunner, ToolInvocation, ToolKind, ToolOutput};
pub use tool::Tool;
