//! Messaging configuration with JSON overrides and validation.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Tunables of the messaging core.
///
/// Every field has a default, so a partial JSON document (as persisted by
/// the extension in browser storage) overrides only what it names:
///
/// ```rust
/// use web_sqlite_messaging::MessagingConfig;
///
/// let config = MessagingConfig::from_json(r#"{ "ringBuffer": { "batchSize": 10 } }"#).unwrap();
/// assert_eq!(config.ring_buffer.batch_size, 10);
/// assert_eq!(config.ring_buffer.capacity, 500);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessagingConfig {
    /// Log buffering.
    pub ring_buffer: RingBufferConfig,
    /// Connection liveness probing.
    pub heartbeat: HeartbeatConfig,
    /// Queue depth of in-process transports.
    pub mailbox_capacity: usize,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            ring_buffer: RingBufferConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            mailbox_capacity: 64,
        }
    }
}

impl MessagingConfig {
    /// Parse and validate a JSON document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|error| ConfigError::Parse(error.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every value is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ring_buffer.validate()?;
        self.heartbeat.validate()?;
        if self.mailbox_capacity == 0 {
            return Err(ConfigError::Invalid(
                "mailboxCapacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Sizing and cadence of a log ring buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RingBufferConfig {
    /// Entries held before the oldest is overwritten.
    pub capacity: usize,
    /// Entry count at which a flush is requested immediately.
    pub batch_size: usize,
    /// Longest time an entry waits before being flushed.
    #[serde(rename = "flushIntervalMs", with = "millis")]
    pub flush_interval: Duration,
}

impl Default for RingBufferConfig {
    fn default() -> Self {
        Self {
            capacity: 500,
            batch_size: 50,
            flush_interval: Duration::from_millis(100),
        }
    }
}

impl RingBufferConfig {
    /// Check that every value is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::Invalid("capacity must be at least 1".into()));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batchSize must be at least 1".into()));
        }
        if self.batch_size > self.capacity {
            return Err(ConfigError::Invalid(format!(
                "batchSize {} exceeds capacity {}",
                self.batch_size, self.capacity
            )));
        }
        if self.flush_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "flushIntervalMs must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Cadence of connection probing and reconnection backoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeartbeatConfig {
    /// Delay between probes while connected.
    #[serde(rename = "intervalMs", with = "millis")]
    pub interval: Duration,
    /// Delay after the first failed probe.
    #[serde(rename = "initialBackoffMs", with = "millis")]
    pub initial_backoff: Duration,
    /// Upper bound of the backoff delay.
    #[serde(rename = "maxBackoffMs", with = "millis")]
    pub max_backoff: Duration,
    /// Growth factor applied after each consecutive failure.
    pub multiplier: f64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(5000),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_millis(30_000),
            multiplier: 2.0,
        }
    }
}

impl HeartbeatConfig {
    /// Check that every value is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval.is_zero() {
            return Err(ConfigError::Invalid(
                "intervalMs must be greater than zero".into(),
            ));
        }
        if self.initial_backoff > self.max_backoff {
            return Err(ConfigError::Invalid(
                "initialBackoffMs exceeds maxBackoffMs".into(),
            ));
        }
        if self.multiplier.is_nan() || self.multiplier < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "multiplier {} must be at least 1.0",
                self.multiplier
            )));
        }
        Ok(())
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use testresult::TestResult;

    #[test]
    fn it_defaults_every_field() -> TestResult {
        let config = MessagingConfig::from_json("{}")?;
        assert_eq!(config, MessagingConfig::default());
        assert_eq!(config.ring_buffer.capacity, 500);
        assert_eq!(config.ring_buffer.batch_size, 50);
        assert_eq!(config.ring_buffer.flush_interval, Duration::from_millis(100));
        assert_eq!(config.heartbeat.interval, Duration::from_secs(5));
        assert_eq!(config.mailbox_capacity, 64);
        Ok(())
    }

    #[test]
    fn it_serializes_durations_as_milliseconds() -> TestResult {
        let value = serde_json::to_value(MessagingConfig::default())?;
        assert_eq!(
            value["ringBuffer"],
            json!({ "capacity": 500, "batchSize": 50, "flushIntervalMs": 100 })
        );
        assert_eq!(value["heartbeat"]["maxBackoffMs"], json!(30_000));
        Ok(())
    }

    #[test]
    fn it_applies_partial_overrides() -> TestResult {
        let config = MessagingConfig::from_json(
            r#"{ "ringBuffer": { "capacity": 20, "batchSize": 5, "flushIntervalMs": 250 }, "heartbeat": { "multiplier": 1.5 } }"#,
        )?;
        assert_eq!(config.ring_buffer.capacity, 20);
        assert_eq!(config.ring_buffer.batch_size, 5);
        assert_eq!(config.ring_buffer.flush_interval, Duration::from_millis(250));
        assert_eq!(config.heartbeat.multiplier, 1.5);
        assert_eq!(config.heartbeat.initial_backoff, Duration::from_millis(500));
        Ok(())
    }

    #[test]
    fn it_rejects_unusable_values() {
        for json in [
            r#"{ "ringBuffer": { "capacity": 0 } }"#,
            r#"{ "ringBuffer": { "batchSize": 0 } }"#,
            r#"{ "ringBuffer": { "capacity": 10, "batchSize": 11 } }"#,
            r#"{ "ringBuffer": { "flushIntervalMs": 0 } }"#,
            r#"{ "heartbeat": { "multiplier": 0.5 } }"#,
            r#"{ "mailboxCapacity": 0 }"#,
        ] {
            assert!(
                matches!(MessagingConfig::from_json(json), Err(ConfigError::Invalid(_))),
                "{json} should be rejected"
            );
        }
    }

    #[test]
    fn it_reports_parse_failures() {
        assert!(matches!(
            MessagingConfig::from_json(r#"{ "ringBuffer": { "capacity": "lots" } }"#),
            Err(ConfigError::Parse(_))
        ));
    }
}
