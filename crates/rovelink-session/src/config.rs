//! Session manager configuration.

use std::time::Duration;

use rovelink_core::config::{Config, ReconnectSettings};

/// Configuration for the device connection.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Device WebSocket URL (e.g., "ws://192.168.4.1:80/ws").
    pub endpoint: String,

    /// Bounded wait for the transport to report open.
    pub connect_timeout: Duration,

    /// Heartbeat interval while connected.
    pub heartbeat_interval: Duration,

    /// Reconnection policy after unexpected drops.
    pub reconnect: ReconnectPolicy,
}

/// Reconnection policy.
///
/// The defaults reproduce a fixed 5 s delay with no attempt cap. Setting
/// `multiplier > 1.0` turns it into exponential backoff capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect attempt.
    pub initial_delay: Duration,
    /// Maximum delay between reconnect attempts.
    pub max_delay: Duration,
    /// Multiplier applied to delay after each failed attempt.
    pub multiplier: f64,
    /// Maximum number of reconnect attempts (None = unlimited).
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(5),
            multiplier: 1.0,
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// A fixed delay with no attempt cap.
    pub const fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
            max_attempts: None,
        }
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_possible_wrap
    )]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let delay_ms = base_ms * self.multiplier.powi(attempt as i32);
        let max_ms = self.max_delay.max(self.initial_delay).as_millis() as f64;
        let capped_ms = delay_ms.min(max_ms);
        Duration::from_millis(capped_ms as u64)
    }

    /// Whether another attempt should be made.
    pub const fn should_retry(&self, attempt: u32) -> bool {
        match self.max_attempts {
            Some(max) => attempt < max,
            None => true,
        }
    }
}

impl From<&ReconnectSettings> for ReconnectPolicy {
    fn from(settings: &ReconnectSettings) -> Self {
        Self {
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            multiplier: settings.multiplier,
            max_attempts: settings.max_attempts,
        }
    }
}

impl SessionConfig {
    /// Create a session config for an endpoint with default timings.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            connect_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
            reconnect: ReconnectPolicy::default(),
        }
    }

    /// Derive the runtime settings from the resolved configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            endpoint: config.endpoint.url(),
            connect_timeout: Duration::from_millis(config.session.connect_timeout_ms),
            heartbeat_interval: Duration::from_millis(config.session.heartbeat_interval_ms),
            reconnect: ReconnectPolicy::from(&config.session.reconnect),
        }
    }

    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    #[must_use]
    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }
}
