use std::time::Duration;

use crate::config::CoordinatorConfig;

/// Per-invocation time limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetPolicy {
    pub default_budget: Duration,
    pub min_budget: Duration,
    pub max_budget: Duration,
    pub poll_interval: Duration,
    pub launch_stale_after: Duration,
}

impl BudgetPolicy {
    pub fn from_config(config: &CoordinatorConfig) -> Self {
        let min = config.min_budget_ms.max(1);
        let max = config.max_budget_ms.max(min);
        Self {
            default_budget: Duration::from_millis(config.default_budget_ms.clamp(min, max)),
            min_budget: Duration::from_millis(min),
            max_budget: Duration::from_millis(max),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
            launch_stale_after: Duration::from_secs(config.launch_stale_after_seconds),
        }
    }

    /// Requested budget clamped into the safe range; `None` means default.
    pub fn clamp(&self, requested_ms: Option<u64>) -> Duration {
        match requested_ms {
            Some(ms) => Duration::from_millis(ms).clamp(self.min_budget, self.max_budget),
            None => self.default_budget,
        }
    }

    /// Wait before starting the next slice. A slice that ended with budget
    /// left (a transient poll error, a launch still in flight) waits one poll
    /// interval so the service is not re-polled in a tight loop.
    pub fn pause_between_slices(&self, budget: Duration, elapsed: Duration) -> Duration {
        if elapsed < budget {
            self.poll_interval
        } else {
            Duration::ZERO
        }
    }
}

impl Default for BudgetPolicy {
    fn default() -> Self {
        Self::from_config(&CoordinatorConfig::default())
    }
}
