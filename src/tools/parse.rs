use crate::errors::ReconError;
use super::runner::{ToolKind, ToolOutput};

/// Structured result of reading one tool run.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome<T> {
    Records(Vec<T>),
    /// The tool answered and the answer was "nothing".
    Empty,
    /// The tool answered but not in a form we understand.
    Failure(String),
}

impl<T> ParseOutcome<T> {
    pub fn from_records(records: Vec<T>) -> Self {
        if records.is_empty() {
            Self::Empty
        } else {
            Self::Records(records)
        }
    }

    pub fn into_result(self, tool: ToolKind) -> Result<Vec<T>, ReconError> {
        match self {
            Self::Records(records) => Ok(records),
            Self::Empty => Ok(Vec::new()),
            Self::Failure(message) => Err(ReconError::parse(tool.as_str(), message)),
        }
    }
}

/// Reads one tool's raw output into records.
pub trait OutputParser {
    type Record;

    fn parse(&self, output: &ToolOutput) -> ParseOutcome<Self::Record>;
}
