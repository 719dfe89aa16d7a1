/**
 * Configuration constants for resource synchronizers
 */
use std::time::Duration;

/// Initial backoff in milliseconds before restarting a failed cycle
pub const INITIAL_BACKOFF_MILLIS: u64 = 500;

/// Maximum backoff in seconds between restart attempts
pub const MAX_BACKOFF_SECONDS: u64 = 60;

/// Server-side watch timeout in seconds (294 vs 300 to stay under the API server's limit)
pub const WATCH_TIMEOUT_SECONDS: u32 = 294;

/// Channel buffer size for cache change subscriptions
pub const SUBSCRIPTION_CHANNEL_CAPACITY: usize = 64;

/// Restart behavior of a synchronizer's cycle loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Delay before the first restart after a failure
    pub initial_backoff: Duration,
    /// Upper bound for the doubling restart delay
    pub max_backoff: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MILLIS),
            max_backoff: Duration::from_secs(MAX_BACKOFF_SECONDS),
        }
    }
}

impl SyncConfig {
    /// Delay to wait after `failures` consecutive failed cycles
    #[must_use]
    pub fn backoff(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1 << exponent)
            .min(self.max_backoff)
    }
}

/// Validate configuration constants at compile time
const _: () = {
    assert!(INITIAL_BACKOFF_MILLIS > 0, "INITIAL_BACKOFF_MILLIS must be greater than 0");
    assert!(MAX_BACKOFF_SECONDS > 0, "MAX_BACKOFF_SECONDS must be greater than 0");
    assert!(WATCH_TIMEOUT_SECONDS > 0, "WATCH_TIMEOUT_SECONDS must be greater than 0");
    assert!(SUBSCRIPTION_CHANNEL_CAPACITY > 0, "SUBSCRIPTION_CHANNEL_CAPACITY must be greater than 0");
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = SyncConfig {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(10),
        };

        assert_eq!(config.backoff(1), Duration::from_secs(1));
        assert_eq!(config.backoff(2), Duration::from_secs(2));
        assert_eq!(config.backoff(4), Duration::from_secs(8));
        assert_eq!(config.backoff(5), Duration::from_secs(10));
        assert_eq!(config.backoff(500), Duration::from_secs(10));
    }
}
