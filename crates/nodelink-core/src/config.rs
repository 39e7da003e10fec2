//! Node configuration.
//!
//! Static settings of the embedding application that are fixed at build or
//! boot time. Values that change at runtime live in the parameter store
//! instead.
//!
//! The configuration is serialized as camelCase JSON so a host can load it
//! from a file:
//!
//! ```json
//! {
//!   "deviceType": "thermostat",
//!   "firmwareVersion": "1.2.0",
//!   "startupJitterMs": 5000,
//!   "reconnect": { "type": "backoff", "initialMs": 500, "maxMs": 30000, "jitterMs": 250 }
//! }
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration document is not valid JSON for [`NodeConfig`].
    #[error("invalid configuration: {0}")]
    InvalidData(#[from] serde_json::Error),

    /// A field holds a value outside its allowed range.
    #[error("invalid configuration value for {field}: {message}")]
    OutOfRange { field: &'static str, message: String },
}

/// Top-level node configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeConfig {
    /// Device type reported in announcements.
    pub device_type: String,

    /// Firmware version reported in announcements.
    pub firmware_version: String,

    /// Backend namespace the parameter store is opened with.
    pub namespace: String,

    /// Upper bound of the random startup delay. `0` disables the delay.
    pub startup_jitter_ms: u64,

    /// How the broker session is restarted after it drops.
    pub reconnect: ReconnectPolicy,

    /// Maximum number of sync bindings.
    pub sync_capacity: usize,

    /// Interval of the device loop callback while networked.
    pub loop_interval_ms: u64,

    /// Depth of the lifecycle event queue.
    pub event_queue_depth: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            device_type: "generic".to_string(),
            firmware_version: "0.0.0".to_string(),
            namespace: "nodelink".to_string(),
            startup_jitter_ms: 5000,
            reconnect: ReconnectPolicy::Immediate,
            sync_capacity: 32,
            loop_interval_ms: 1000,
            event_queue_depth: 64,
        }
    }
}

impl NodeConfig {
    /// Parse and validate a JSON configuration document.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: NodeConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sync_capacity == 0 {
            return Err(ConfigError::OutOfRange {
                field: "syncCapacity",
                message: "must be at least 1".to_string(),
            });
        }
        if self.event_queue_depth == 0 {
            return Err(ConfigError::OutOfRange {
                field: "eventQueueDepth",
                message: "must be at least 1".to_string(),
            });
        }
        if self.loop_interval_ms == 0 {
            return Err(ConfigError::OutOfRange {
                field: "loopIntervalMs",
                message: "must be at least 1".to_string(),
            });
        }
        if let ReconnectPolicy::Backoff {
            initial_ms, max_ms, ..
        } = self.reconnect
        {
            if max_ms < initial_ms {
                return Err(ConfigError::OutOfRange {
                    field: "reconnect.maxMs",
                    message: format!("{max_ms} is below initialMs {initial_ms}"),
                });
            }
        }
        Ok(())
    }

    /// Upper bound of the startup delay, `None` when disabled.
    pub fn startup_jitter(&self) -> Option<Duration> {
        (self.startup_jitter_ms > 0).then(|| Duration::from_millis(self.startup_jitter_ms))
    }

    pub fn loop_interval(&self) -> Duration {
        Duration::from_millis(self.loop_interval_ms)
    }
}

/// Broker session restart policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ReconnectPolicy {
    /// Restart the session as soon as it drops.
    #[default]
    Immediate,

    /// Exponential backoff per consecutive failure, capped at `max_ms`,
    /// plus a random delay of up to `jitter_ms`.
    #[serde(rename_all = "camelCase")]
    Backoff {
        initial_ms: u64,
        max_ms: u64,
        jitter_ms: u64,
    },
}

impl ReconnectPolicy {
    /// Delay before restart attempt number `attempt` (1 for the first
    /// failure after a successful session).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match *self {
            ReconnectPolicy::Immediate => Duration::ZERO,
            ReconnectPolicy::Backoff {
                initial_ms,
                max_ms,
                jitter_ms,
            } => {
                let exponent = attempt.saturating_sub(1).min(32);
                let base = initial_ms.saturating_mul(1u64 << exponent).min(max_ms);
                let jitter = if jitter_ms > 0 {
                    rand::random_range(0..=jitter_ms)
                } else {
                    0
                };
                Duration::from_millis(base.saturating_add(jitter))
            }
        }
    }
}
