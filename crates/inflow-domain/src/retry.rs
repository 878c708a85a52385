use chrono::{DateTime, Duration, Utc};

/// Re-enqueue policy for events that failed retryably.
///
/// The delay before attempt `n` (1-based) is `min(2^n, max_delay_secs)`
/// seconds; once `attempts` reaches `max_attempts` the event goes terminal
/// instead of back onto the queue.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: i32,
    pub max_delay_secs: i64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            max_delay_secs: 60,
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after `attempt` failed attempts (`attempt >= 1`).
    pub fn delay_for_attempt(&self, attempt: i32) -> Duration {
        let attempt = attempt.max(1).min(62);
        let exp = 1i64 << attempt;
        Duration::seconds(exp.min(self.max_delay_secs))
    }

    /// Schedule for the next attempt, measured from `now`.
    pub fn next_attempt_at(&self, attempt: i32, now: DateTime<Utc>) -> DateTime<Utc> {
        now + self.delay_for_attempt(attempt)
    }

    /// Whether the attempt counter has used up the retry budget.
    pub fn is_exhausted(&self, attempts: i32) -> bool {
        attempts >= self.max_attempts
    }
}
