//! Retry policy for provider calls
//!
//! Exponential backoff for transient provider failures. Only
//! [`ProviderError::Transient`](crate::error::ProviderError::Transient) is
//! retried, and only when the failure happens before the provider stream
//! produced anything, so a retry can never duplicate streamed output.
//!
//! ```rust
//! use a3s_orchestrator::retry::RetryConfig;
//!
//! let config = RetryConfig::default(); // 2 retries, 500ms base, 10s max
//! assert!(RetryConfig::disabled().max_retries == 0);
//! # let _ = config;
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for provider retry behavior
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 = no retries)
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential backoff
    pub base_delay_ms: u64,
    /// Maximum delay in milliseconds (cap for exponential growth)
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryConfig {
    /// Create a retry config with no retries (disabled)
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Delay before retry `attempt` (0-indexed)
    ///
    /// `base_delay * 2^attempt`, capped at `max_delay`, with a deterministic
    /// ±25% spread so concurrent agents do not retry in lockstep.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp_delay = self.base_delay_ms.saturating_mul(1u64 << attempt.min(10));
        let capped = exp_delay.min(self.max_delay_ms);

        let jitter_range = capped / 4;
        let delay = if jitter_range > 0 {
            let offset = (attempt as u64 * 7 + 3) % (jitter_range * 2 + 1);
            capped - jitter_range + offset
        } else {
            capped
        };

        Duration::from_millis(delay)
    }
}
