//! Reconnection backoff
//!
//! Exponential delay with ±25% jitter, capped at `max_delay`. Used by the TCP
//! worker after a mid-stream loss.

use std::time::{Duration, Instant};

use rand::Rng;
use serde::Deserialize;
use tracing::debug;

/// Reconnection policy configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Maximum retry attempts (0 means unlimited)
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl ReconnectPolicy {
    pub fn from_config(
        max_attempts: u32,
        initial_delay_ms: u64,
        max_delay_ms: u64,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(initial_delay_ms),
            max_delay: Duration::from_millis(max_delay_ms),
            backoff_multiplier,
            jitter: true,
        }
    }
}

/// Config-file shape of the policy
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReconnectSettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl From<&ReconnectSettings> for ReconnectPolicy {
    fn from(settings: &ReconnectSettings) -> Self {
        ReconnectPolicy::from_config(
            settings.max_attempts,
            settings.initial_delay_ms,
            settings.max_delay_ms,
            settings.backoff_multiplier,
        )
    }
}

#[derive(Debug, Default, Clone)]
pub struct ReconnectStats {
    pub total_attempts: u64,
    pub successful_reconnects: u64,
    pub last_connected: Option<Instant>,
}

/// Attempt accounting for one outage
#[derive(Debug)]
pub struct ReconnectHelper {
    policy: ReconnectPolicy,
    current_attempt: u32,
    stats: ReconnectStats,
}

impl ReconnectHelper {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            current_attempt: 0,
            stats: ReconnectStats::default(),
        }
    }

    pub fn current_attempt(&self) -> u32 {
        self.current_attempt
    }

    pub fn stats(&self) -> &ReconnectStats {
        &self.stats
    }

    /// Register the next attempt and return the delay to wait before it,
    /// or `None` when the policy is exhausted
    pub fn begin_attempt(&mut self) -> Option<Duration> {
        if self.policy.max_attempts > 0 && self.current_attempt >= self.policy.max_attempts {
            return None;
        }
        self.current_attempt += 1;
        self.stats.total_attempts += 1;
        Some(self.calculate_next_delay())
    }

    pub fn mark_connected(&mut self) {
        debug!("Reconnected after {} attempt(s)", self.current_attempt);
        self.current_attempt = 0;
        self.stats.successful_reconnects += 1;
        self.stats.last_connected = Some(Instant::now());
    }

    /// Delay for the current attempt: initial * multiplier^(attempt-1),
    /// clamped to `max_delay` before it becomes a `Duration`
    pub fn calculate_next_delay(&self) -> Duration {
        let attempt = self.current_attempt.saturating_sub(1);
        let max_secs = self.policy.max_delay.as_secs_f64();
        let secs = self.policy.initial_delay.as_secs_f64()
            * self.policy.backoff_multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let mut delay = if secs.is_finite() && secs >= 0.0 && secs < max_secs {
            Duration::try_from_secs_f64(secs).unwrap_or(self.policy.max_delay)
        } else {
            self.policy.max_delay
        };

        if self.policy.jitter {
            let jitter_range = delay.as_millis() as f64 * 0.25;
            if jitter_range > 0.0 {
                let jitter = rand::thread_rng().gen_range(-jitter_range..jitter_range);
                let delay_ms = (delay.as_millis() as f64 + jitter).max(0.0);
                delay = Duration::from_millis(delay_ms as u64);
            }
        }

        delay
    }
}
