use crate::errors::RetryPolicy;
use super::schema::StatusColumns;
use super::table::Row;

/// Per-row stage status as stored in a status column.
///
/// Anything other than `processed` or `failed` reads as `Empty`, so a human
/// clearing or retyping the cell forces the row back through its stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowStatus {
    Empty,
    Processed,
    Failed,
}

impl RowStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "processed" | "done" => Self::Processed,
            "failed" => Self::Failed,
            _ => Self::Empty,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Empty => "",
            Self::Processed => "processed",
            Self::Failed => "failed",
        }
    }
}

/// Status, attempt count and last error read off one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowState {
    pub status: RowStatus,
    pub attempts: u32,
    pub error: String,
}

impl RowState {
    pub fn read(row: &Row, cols: &StatusColumns) -> Self {
        Self {
            status: RowStatus::parse(row.get(cols.status)),
            attempts: row.get(cols.attempts).trim().parse().unwrap_or(0),
            error: row.get(cols.error).to_string(),
        }
    }

    /// Empty rows, and failed rows with retry budget left.
    pub fn is_pending(&self, policy: &RetryPolicy) -> bool {
        match self.status {
            RowStatus::Empty => true,
            RowStatus::Failed => policy.should_retry(self.attempts),
            RowStatus::Processed => false,
        }
    }

    pub fn is_terminal_failure(&self, policy: &RetryPolicy) -> bool {
        self.status == RowStatus::Failed && !policy.should_retry(self.attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::schema::TableKind;

    fn cols() -> StatusColumns {
        TableKind::Subdomains.status_columns().unwrap()
    }

    #[test]
    fn test_status_parse_is_lenient() {
        assert_eq!(RowStatus::parse("processed"), RowStatus::Processed);
        assert_eq!(RowStatus::parse(" Processed "), RowStatus::Processed);
        assert_eq!(RowStatus::parse("FAILED"), RowStatus::Failed);
        assert_eq!(RowStatus::parse(""), RowStatus::Empty);
        assert_eq!(RowStatus::parse("redo"), RowStatus::Empty);
    }

    #[test]
    fn test_pending_states() {
        let policy = RetryPolicy::new(2);
        let empty = RowState::read(&Row::new(), &cols());
        assert!(empty.is_pending(&policy));

        let done = RowState::read(&Row::new().with("host_status", "processed"), &cols());
        assert!(!done.is_pending(&policy));

        let retry = RowState::read(
            &Row::new().with("host_status", "failed").with("host_attempts", "1"),
            &cols(),
        );
        assert!(retry.is_pending(&policy));
        assert!(!retry.is_terminal_failure(&policy));

        let exhausted = RowState::read(
            &Row::new().with("host_status", "failed").with("host_attempts", "2"),
            &cols(),
        );
        assert!(!exhausted.is_pending(&policy));
        assert!(exhausted.is_terminal_failure(&policy));
    }

    #[test]
    fn test_garbage_attempts_read_as_zero() {
        let state = RowState::read(&Row::new().with("host_attempts", "many"), &cols());
        assert_eq!(state.attempts, 0);
    }
}
