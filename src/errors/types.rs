use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Tool invocation failed ({tool}): {message}")]
    ToolInvocation { tool: String, message: String },

    #[error("Tool {tool} timed out after {secs}s")]
    Timeout { tool: String, secs: u64 },

    #[error("Could not parse {tool} output: {message}")]
    Parse { tool: String, message: String },

    #[error("Store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Pipeline cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ReconError {
    pub fn tool(tool: &str, message: impl Into<String>) -> Self {
        Self::ToolInvocation { tool: tool.to_string(), message: message.into() }
    }

    pub fn parse(tool: &str, message: impl Into<String>) -> Self {
        Self::Parse { tool: tool.to_string(), message: message.into() }
    }
}
