use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Error categories with their own retry budgets.
pub const CATEGORY_CAPTCHA: &str = "captcha";
pub const CATEGORY_NETWORK: &str = "network";
pub const CATEGORY_FORM_NOT_FOUND: &str = "form_not_found";
pub const CATEGORY_SUBMIT: &str = "submit";

#[derive(Debug, Clone, Copy)]
struct Budget {
    max_attempts: u32,
    delay: Duration,
}

/// Per-category retry budgets.
///
/// Attempts are 0-indexed: `should_retry(cat, attempt)` answers "may attempt
/// number `attempt` run?", so it returns true for `attempt < max_attempts`
/// and false forever after. The delay sleep only happens on a true answer.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    budgets: HashMap<&'static str, Budget>,
    default: Budget,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        let mut budgets = HashMap::new();
        budgets.insert(
            CATEGORY_CAPTCHA,
            Budget {
                max_attempts: 3,
                delay: Duration::from_millis(2_000),
            },
        );
        budgets.insert(
            CATEGORY_NETWORK,
            Budget {
                max_attempts: 3,
                delay: Duration::from_millis(1_500),
            },
        );
        budgets.insert(
            CATEGORY_FORM_NOT_FOUND,
            Budget {
                max_attempts: 2,
                delay: Duration::from_millis(1_000),
            },
        );
        budgets.insert(
            CATEGORY_SUBMIT,
            Budget {
                max_attempts: 2,
                delay: Duration::from_millis(1_500),
            },
        );
        Self {
            budgets,
            default: Budget {
                max_attempts: 1,
                delay: Duration::from_millis(500),
            },
        }
    }
}

impl RetryPolicy {
    /// Zero-delay policy for tests; same budgets, no sleeping.
    pub fn instant() -> Self {
        let mut policy = Self::default();
        for budget in policy.budgets.values_mut() {
            budget.delay = Duration::ZERO;
        }
        policy.default.delay = Duration::ZERO;
        policy
    }

    fn budget(&self, category: &str) -> Budget {
        self.budgets.get(category).copied().unwrap_or(self.default)
    }

    pub fn max_attempts(&self, category: &str) -> u32 {
        self.budget(category).max_attempts
    }

    /// Whether attempt number `attempt` (0-indexed) may run.
    pub fn should_retry(&self, category: &str, attempt: u32) -> bool {
        attempt < self.budget(category).max_attempts
    }

    /// Sleep the category's backoff delay, but only if another attempt is
    /// actually allowed. Returns the `should_retry` answer.
    pub async fn wait_before(&self, category: &str, attempt: u32) -> bool {
        if !self.should_retry(category, attempt) {
            return false;
        }
        let delay = self.budget(category).delay;
        if attempt > 0 && !delay.is_zero() {
            debug!(category, attempt, delay_ms = delay.as_millis() as u64, "retry backoff");
            tokio::time::sleep(delay).await;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn should_retry_is_monotonic_per_category() {
        let policy = RetryPolicy::default();
        let max = policy.max_attempts(CATEGORY_CAPTCHA);
        for attempt in 0..max {
            assert!(policy.should_retry(CATEGORY_CAPTCHA, attempt));
        }
        // Once past the threshold it stays false, however often we ask.
        for attempt in max..max + 10 {
            assert!(!policy.should_retry(CATEGORY_CAPTCHA, attempt));
        }
    }

    #[test]
    fn unknown_category_uses_default_budget() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry("weird", 0));
        assert!(!policy.should_retry("weird", 1));
    }

    #[tokio::test]
    async fn exhausted_wait_returns_false_without_sleeping() {
        let policy = RetryPolicy::default();
        let start = Instant::now();
        let allowed = policy.wait_before(CATEGORY_CAPTCHA, 99).await;
        assert!(!allowed);
        // No category delay is under 1s; an exhausted wait must be immediate.
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn first_attempt_does_not_sleep() {
        let policy = RetryPolicy::default();
        let start = Instant::now();
        assert!(policy.wait_before(CATEGORY_SUBMIT, 0).await);
        assert!(start.elapsed() < Duration::from_millis(100));
    }
}
