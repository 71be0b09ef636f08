use super::types::ReconError;

/// Whether an error is confined to the row that produced it or ends the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorScope {
    RowLocal,
    Fatal,
}

#[derive(Debug, Clone)]
pub struct ErrorClassification {
    pub error_type: &'static str,
    pub scope: ErrorScope,
}

impl ErrorClassification {
    pub fn is_row_local(&self) -> bool {
        self.scope == ErrorScope::RowLocal
    }
}

impl ReconError {
    /// Classify this error to decide whether a stage may record it against a
    /// single row and carry on, or must abort the cycle.
    pub fn classify(&self) -> ErrorClassification {
        match self {
            // Row-local: the external tool misbehaved for this input
            ReconError::ToolInvocation { .. } => ErrorClassification {
                error_type: "ToolInvocationError",
                scope: ErrorScope::RowLocal,
            },
            ReconError::Timeout { .. } => ErrorClassification {
                error_type: "TimeoutError",
                scope: ErrorScope::RowLocal,
            },
            ReconError::Parse { .. } => ErrorClassification {
                error_type: "ParseError",
                scope: ErrorScope::RowLocal,
            },

            // Fatal
            ReconError::Store(_) => ErrorClassification {
                error_type: "StoreError",
                scope: ErrorScope::Fatal,
            },
            ReconError::Config(_) => ErrorClassification {
                error_type: "ConfigError",
                scope: ErrorScope::Fatal,
            },
            ReconError::Io(_) => ErrorClassification {
                error_type: "IoError",
                scope: ErrorScope::Fatal,
            },
            ReconError::Json(_) => ErrorClassification {
                error_type: "JsonError",
                scope: ErrorScope::Fatal,
            },
            ReconError::Yaml(_) => ErrorClassification {
                error_type: "YamlError",
                scope: ErrorScope::Fatal,
            },
            ReconError::Cancelled => ErrorClassification {
                error_type: "Cancelled",
                scope: ErrorScope::Fatal,
            },
            ReconError::Internal(_) => ErrorClassification {
                error_type: "InternalError",
                scope: ErrorScope::Fatal,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_invocation_is_row_local() {
        let err = ReconError::tool("host", "No such file or directory");
        let class = err.classify();
        assert!(class.is_row_local());
        assert_eq!(class.error_type, "ToolInvocationError");
    }

    #[test]
    fn test_parse_error_is_row_local() {
        let err = ReconError::parse("nali", "empty output");
        assert!(err.classify().is_row_local());
    }

    #[test]
    fn test_timeout_is_row_local() {
        let err = ReconError::Timeout { tool: "masscan".into(), secs: 10 };
        assert!(err.classify().is_row_local());
    }

    #[test]
    fn test_store_error_is_fatal() {
        let err = ReconError::Store("disk full".into());
        let class = err.classify();
        assert_eq!(class.scope, ErrorScope::Fatal);
        assert_eq!(class.error_type, "StoreError");
    }

    #[test]
    fn test_io_error_is_fatal() {
        let err = ReconError::Io(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        assert!(!err.classify().is_row_local());
    }

    #[test]
    fn test_cancelled_is_fatal() {
        assert!(!ReconError::Cancelled.classify().is_row_local());
    }
}
