//! Endpoint configuration.
//!
//! The settle intervals exist because the backend offers no confirmation
//! event for stop/clear commands and silently corrupts its state when two
//! commands are issued back-to-back. They are tunables, not protocol
//! constants; the defaults match the timings the platform module shipped
//! with.

use std::time::Duration;

/// Policy applied when an identity swap is requested while another swap
/// transaction is already in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SwapPolicy {
    /// Reject the new request with `UpdateInProgress`.
    #[default]
    Strict,
    /// Fold the new request onto the in-flight transaction; the caller
    /// resolves with that transaction's final outcome.
    Seamless,
}

/// Tunables for the advertising endpoint.
#[derive(Debug, Clone)]
pub struct Config {
    /// Wait after `stop_broadcast` before clearing resources.
    pub settle_after_stop: Duration,
    /// Wait after `clear_resources` before rebuilding the resource.
    pub settle_after_clear: Duration,
    /// Wait after the publish confirmation before restarting the broadcast.
    pub settle_before_restart: Duration,
    /// Deadline for the backend's resource-publish confirmation.
    pub watchdog_timeout: Duration,
    /// Capacity of the lossy diagnostic event channel.
    pub diagnostics_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            settle_after_stop: Duration::from_millis(200),
            settle_after_clear: Duration::from_millis(200),
            settle_before_restart: Duration::from_millis(300),
            watchdog_timeout: Duration::from_secs(5),
            diagnostics_capacity: 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timings() {
        let config = Config::default();
        assert_eq!(config.settle_after_stop, Duration::from_millis(200));
        assert_eq!(config.settle_after_clear, Duration::from_millis(200));
        assert_eq!(config.settle_before_restart, Duration::from_millis(300));
        assert_eq!(config.watchdog_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_default_swap_policy_is_strict() {
        assert_eq!(SwapPolicy::default(), SwapPolicy::Strict);
    }
}
