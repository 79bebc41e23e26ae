//! Warming manager configuration

use std::time::Duration;

use serde::Deserialize;

/// Invalid configuration, reported at construction
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("maxConcurrentRequests must be at least 1")]
    NoConcurrency,

    #[error("priorityThreshold must be a finite, non-negative number (got {0})")]
    InvalidThreshold(f64),

    #[error("idleTimeRequired must be greater than zero")]
    ZeroIdleTime,

    #[error("maxWarmingTime must be greater than zero")]
    ZeroWarmingTime,
}

/// Scheduler limits; every field is required
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WarmingConfig {
    /// Ceiling on simultaneous fetches across all warming calls
    pub max_concurrent_requests: usize,
    /// Minimum priority score a candidate needs to be scheduled
    pub priority_threshold: f64,
    /// Quiet period before idle warming is allowed
    #[serde(with = "millis")]
    pub idle_time_required: Duration,
    /// Wall-clock budget of one warming session
    #[serde(with = "millis")]
    pub max_warming_time: Duration,
}

impl WarmingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_requests == 0 {
            return Err(ConfigError::NoConcurrency);
        }
        if !self.priority_threshold.is_finite() || self.priority_threshold < 0.0 {
            return Err(ConfigError::InvalidThreshold(self.priority_threshold));
        }
        if self.idle_time_required.is_zero() {
            return Err(ConfigError::ZeroIdleTime);
        }
        if self.max_warming_time.is_zero() {
            return Err(ConfigError::ZeroWarmingTime);
        }
        Ok(())
    }
}

/// Durations written as integer milliseconds
pub(crate) mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

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

    fn config() -> WarmingConfig {
        WarmingConfig {
            max_concurrent_requests: 2,
            priority_threshold: 0.0,
            idle_time_required: Duration::from_millis(100),
            max_warming_time: Duration::from_millis(5000),
        }
    }

    #[test]
    fn test_valid_config() {
        assert_eq!(config().validate(), Ok(()));
    }

    #[test]
    fn test_rejects_zero_concurrency() {
        let bad = WarmingConfig {
            max_concurrent_requests: 0,
            ..config()
        };
        assert_eq!(bad.validate(), Err(ConfigError::NoConcurrency));
    }

    #[test]
    fn test_rejects_bad_threshold() {
        let bad = WarmingConfig {
            priority_threshold: f64::NAN,
            ..config()
        };
        assert!(matches!(bad.validate(), Err(ConfigError::InvalidThreshold(_))));
    }

    #[test]
    fn test_rejects_zero_durations() {
        let idle = WarmingConfig {
            idle_time_required: Duration::ZERO,
            ..config()
        };
        assert_eq!(idle.validate(), Err(ConfigError::ZeroIdleTime));

        let budget = WarmingConfig {
            max_warming_time: Duration::ZERO,
            ..config()
        };
        assert_eq!(budget.validate(), Err(ConfigError::ZeroWarmingTime));
    }

    #[test]
    fn test_deserialize_millis() {
        let json = r#"{"maxConcurrentRequests":2,"priorityThreshold":0,"idleTimeRequired":100,"maxWarmingTime":5000}"#;
        let parsed: WarmingConfig = serde_json::from_str(json).unwrap();
        assert_eq!(parsed, config());
    }

    #[test]
    fn test_missing_field_is_an_error() {
        let json = r#"{"maxConcurrentRequests":2,"priorityThreshold":0,"idleTimeRequired":100}"#;
        assert!(serde_json::from_str::<WarmingConfig>(json).is_err());
    }
}
