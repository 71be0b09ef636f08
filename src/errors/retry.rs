use tracing::debug;

/// Bounded per-row retry policy.
///
/// A row whose tool run failed keeps its `failed` status and an attempt
/// counter. It stays eligible for another try on later cycles until the
/// counter reaches `max_attempts`, after which it is terminally failed and
/// only a manual status reset brings it back.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts: max_attempts.max(1) }
    }

    /// Whether a failed row with `attempts` recorded failures gets another run.
    pub fn should_retry(&self, attempts: u32) -> bool {
        let retry = attempts < self.max_attempts;
        if !retry {
            debug!(attempts, max = self.max_attempts, "Retry budget exhausted");
        }
        retry
    }
}
