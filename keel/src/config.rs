use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::retry::{RetryPolicy, RetryPolicyConfig};

/// Settings for the stuck-job monitor.
///
/// Passed to [`StuckJobMonitor::start_monitoring`](crate::StuckJobMonitor::start_monitoring).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorOptions {
    /// Execution time after which a job without heartbeats starts missing checks.
    pub max_execution_time_ms: u64,
    /// Interval between background scans.
    pub check_interval_ms: u64,
    /// Missed checks before a job is flagged as stuck. Values below 1 act as 1.
    pub stuck_threshold: u32,
    /// Whether the background loop recovers stuck jobs or only reports them.
    pub enable_auto_recovery: bool,
    /// Execution time beyond which a failed graceful restart escalates to a forced kill.
    pub force_kill_timeout_ms: u64,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            max_execution_time_ms: 30 * 60 * 1000,
            check_interval_ms: 60 * 1000,
            stuck_threshold: 3,
            enable_auto_recovery: true,
            force_kill_timeout_ms: 45 * 60 * 1000,
        }
    }
}

impl MonitorOptions {
    pub fn max_execution_time(&self) -> Duration {
        Duration::from_millis(self.max_execution_time_ms)
    }

    pub fn check_interval(&self) -> Duration {
        // a zero interval would make tokio::time::interval panic
        Duration::from_millis(self.check_interval_ms.max(1))
    }

    pub fn stuck_threshold(&self) -> u32 {
        self.stuck_threshold.max(1)
    }

    pub fn force_kill_timeout(&self) -> Duration {
        Duration::from_millis(self.force_kill_timeout_ms)
    }
}

/// Settings for the failed-job recovery store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryStoreConfig {
    /// Failure count above which a task is dead-lettered as a permanent failure.
    pub dead_letter_ceiling: u32,
    /// Failure count above which a task needs a manual trigger instead of automatic retry.
    pub manual_threshold: u32,
    /// Queue depth (active records plus pending triggers) that forces at least `warning`.
    pub queue_depth_warning: usize,
}

impl Default for RecoveryStoreConfig {
    fn default() -> Self {
        Self {
            dead_letter_ceiling: 10,
            manual_threshold: 3,
            queue_depth_warning: 100,
        }
    }
}

/// Top-level configuration for the three resilience components.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Default retry policy for callers that do not pick a preset.
    pub retry: RetryPolicyConfig,
    pub monitor: MonitorOptions,
    pub store: RecoveryStoreConfig,
}

impl ResilienceConfig {
    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json_str(document: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(document)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with `KEEL_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Overlay values returned by `lookup` for the known `KEEL_*` keys.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        override_value(&lookup, "KEEL_RETRY_MAX_RETRIES", &mut self.retry.max_retries)?;
        override_value(&lookup, "KEEL_RETRY_BASE_DELAY_MS", &mut self.retry.base_delay_ms)?;
        override_value(&lookup, "KEEL_RETRY_MAX_DELAY_MS", &mut self.retry.max_delay_ms)?;
        override_value(
            &lookup,
            "KEEL_RETRY_BACKOFF_MULTIPLIER",
            &mut self.retry.backoff_multiplier,
        )?;
        override_value(&lookup, "KEEL_RETRY_JITTER", &mut self.retry.jitter)?;
        if let Some(raw) = lookup("KEEL_RETRY_TIMEOUT_MS") {
            self.retry.timeout_ms = if raw.trim().is_empty() {
                None
            } else {
                Some(parse_value("KEEL_RETRY_TIMEOUT_MS", &raw)?)
            };
        }

        override_value(
            &lookup,
            "KEEL_MONITOR_MAX_EXECUTION_TIME_MS",
            &mut self.monitor.max_execution_time_ms,
        )?;
        override_value(
            &lookup,
            "KEEL_MONITOR_CHECK_INTERVAL_MS",
            &mut self.monitor.check_interval_ms,
        )?;
        override_value(
            &lookup,
            "KEEL_MONITOR_STUCK_THRESHOLD",
            &mut self.monitor.stuck_threshold,
        )?;
        override_value(
            &lookup,
            "KEEL_MONITOR_AUTO_RECOVERY",
            &mut self.monitor.enable_auto_recovery,
        )?;
        override_value(
            &lookup,
            "KEEL_MONITOR_FORCE_KILL_TIMEOUT_MS",
            &mut self.monitor.force_kill_timeout_ms,
        )?;

        override_value(
            &lookup,
            "KEEL_STORE_DEAD_LETTER_CEILING",
            &mut self.store.dead_letter_ceiling,
        )?;
        override_value(
            &lookup,
            "KEEL_STORE_MANUAL_THRESHOLD",
            &mut self.store.manual_threshold,
        )?;
        override_value(
            &lookup,
            "KEEL_STORE_QUEUE_DEPTH_WARNING",
            &mut self.store.queue_depth_warning,
        )?;

        self.validate()
    }

    /// Build the configured default retry policy.
    pub fn retry_policy(&self) -> Result<RetryPolicy, ConfigError> {
        Ok(RetryPolicy::from_config(&self.retry)?)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        RetryPolicy::from_config(&self.retry)?;
        Ok(())
    }
}

fn override_value<T, F>(lookup: &F, key: &str, slot: &mut T) -> Result<(), ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(key) {
        *slot = parse_value(key, &raw)?;
    }
    Ok(())
}

fn parse_value<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: raw.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = ResilienceConfig::default();
        assert_eq!(config.store.dead_letter_ceiling, 10);
        assert_eq!(config.monitor.stuck_threshold, 3);
        assert!(config.monitor.enable_auto_recovery);
        assert_eq!(config.monitor.check_interval(), Duration::from_secs(60));
        assert!(config.retry_policy().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = ResilienceConfig::from_json_str(
            r#"{ "monitor": { "stuck_threshold": 5 }, "store": { "dead_letter_ceiling": 4 } }"#,
        )
        .unwrap();
        assert_eq!(config.monitor.stuck_threshold, 5);
        assert_eq!(config.monitor.check_interval_ms, 60_000);
        assert_eq!(config.store.dead_letter_ceiling, 4);
        assert_eq!(config.store.manual_threshold, 3);
    }

    #[test]
    fn test_json_with_invalid_policy_is_rejected() {
        let err = ResilienceConfig::from_json_str(r#"{ "retry": { "backoff_multiplier": 0.2 } }"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Policy(_)));

        let err = ResilienceConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("KEEL_MONITOR_CHECK_INTERVAL_MS", "1500"),
            ("KEEL_MONITOR_AUTO_RECOVERY", "false"),
            ("KEEL_STORE_DEAD_LETTER_CEILING", " 7 "),
            ("KEEL_RETRY_TIMEOUT_MS", "2000"),
        ]);
        let mut config = ResilienceConfig::default();
        config
            .apply_env_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.monitor.check_interval_ms, 1500);
        assert!(!config.monitor.enable_auto_recovery);
        assert_eq!(config.store.dead_letter_ceiling, 7);
        assert_eq!(config.retry.timeout_ms, Some(2000));
    }

    #[test]
    fn test_env_override_with_bad_value() {
        let mut config = ResilienceConfig::default();
        let err = config
            .apply_env_overrides(|key| {
                (key == "KEEL_MONITOR_STUCK_THRESHOLD").then(|| "three".to_string())
            })
            .unwrap_err();
        match err {
            ConfigError::InvalidValue { key, value } => {
                assert_eq!(key, "KEEL_MONITOR_STUCK_THRESHOLD");
                assert_eq!(value, "three");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_monitor_option_floors() {
        let options = MonitorOptions {
            check_interval_ms: 0,
            stuck_threshold: 0,
            ..Default::default()
        };
        assert_eq!(options.check_interval(), Duration::from_millis(1));
        assert_eq!(options.stuck_threshold(), 1);
    }
}
