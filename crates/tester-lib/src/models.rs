//! Core data models for the scheduler tester

use crate::error::ConfigError;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::time::Duration;

/// Value of the `app` label carried by every canary deployment
pub const APP_LABEL_VALUE: &str = "scheduletester";

/// Prefix of every canary deployment name
pub const NAME_PREFIX: &str = "scheduletest";

/// Selector matching every canary deployment, regardless of cycle
pub const APP_SELECTOR: &str = "app=scheduletester";

/// Longest per-cycle timeout; the API server rejects watches of 295s or more
pub const MAX_TIMEOUT_SECS: u64 = 290;

/// Immutable configuration of a single probe cycle
#[derive(Debug, Clone, PartialEq)]
pub struct TestConfig {
    pub namespace: String,
    pub image: String,
    pub args: Vec<String>,
    pub replicas: i32,
    pub timeout: Duration,
    pub keep_alive: Duration,
    pub cpu_limit: String,
    pub memory_limit: String,
}

impl TestConfig {
    /// Reject configurations the canary builder cannot turn into a sensible deployment
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.namespace.trim().is_empty() {
            return Err(ConfigError::MissingNamespace);
        }
        if self.replicas <= 0 {
            return Err(ConfigError::InvalidReplicas(self.replicas));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("timeout"));
        }
        if self.timeout > Duration::from_secs(MAX_TIMEOUT_SECS) {
            return Err(ConfigError::TimeoutTooLong {
                got: self.timeout.as_secs(),
                max: MAX_TIMEOUT_SECS,
            });
        }
        if self.image.trim().is_empty() {
            return Err(ConfigError::Empty("image"));
        }
        if self.args.is_empty() {
            return Err(ConfigError::Empty("args"));
        }
        if self.cpu_limit.trim().is_empty() {
            return Err(ConfigError::Empty("cpu limit"));
        }
        if self.memory_limit.trim().is_empty() {
            return Err(ConfigError::Empty("memory limit"));
        }
        Ok(())
    }
}

/// Name and labels of one cycle's canary deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanaryIdentity {
    pub name: String,
    pub labels: BTreeMap<String, String>,
}

impl CanaryIdentity {
    /// Identity for a cycle starting now
    pub fn generate() -> Self {
        Self::at(Utc::now())
    }

    /// Identity derived from the given instant (millisecond resolution)
    pub fn at(now: DateTime<Utc>) -> Self {
        let name = format!("{}-{}", NAME_PREFIX, now.timestamp_millis());
        let labels = BTreeMap::from([
            ("app".to_string(), APP_LABEL_VALUE.to_string()),
            ("test".to_string(), name.clone()),
        ]);
        Self { name, labels }
    }

    /// Equality-based selector scoping list/watch calls to this cycle only
    pub fn selector(&self) -> String {
        label_selector(&self.labels)
    }
}

/// Render labels as a `k=v,k2=v2` selector
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Result of one probe cycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CycleOutcome {
    /// All replicas became ready this long after the deployment was submitted
    Ready(Duration),
    /// The watch ended first; carries the ready count seen last
    TimedOut(i32),
}

/// A deployment state change, reduced to what readiness tracking needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyCountEvent {
    pub name: String,
    pub event_type: &'static str,
    /// `None` when the status omits the field; this means "unchanged", not zero
    pub ready_replicas: Option<i32>,
}

/// Reference to an existing deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentRef {
    pub namespace: String,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_config;
    use chrono::TimeZone;

    #[test]
    fn test_identity_is_time_derived() {
        let now = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        let identity = CanaryIdentity::at(now);

        assert_eq!(identity.name, "scheduletest-1700000000123");
        assert_eq!(identity.labels["test"], identity.name);
        assert_eq!(identity.labels["app"], APP_LABEL_VALUE);
    }

    #[test]
    fn test_identity_selector_covers_both_labels() {
        let now = Utc.timestamp_millis_opt(42).unwrap();
        let identity = CanaryIdentity::at(now);

        assert_eq!(identity.selector(), "app=scheduletester,test=scheduletest-42");
    }

    #[test]
    fn test_distinct_instants_give_distinct_names() {
        let a = CanaryIdentity::at(Utc.timestamp_millis_opt(1_000).unwrap());
        let b = CanaryIdentity::at(Utc.timestamp_millis_opt(1_001).unwrap());
        assert_ne!(a.name, b.name);
    }

    #[test]
    fn test_validate_accepts_sample() {
        assert_eq!(sample_config().validate(), Ok(()));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = sample_config();
        config.replicas = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidReplicas(0)));

        let mut config = sample_config();
        config.namespace = " ".to_string();
        assert_eq!(config.validate(), Err(ConfigError::MissingNamespace));

        let mut config = sample_config();
        config.timeout = Duration::ZERO;
        assert_eq!(config.validate(), Err(ConfigError::ZeroDuration("timeout")));

        let mut config = sample_config();
        config.args.clear();
        assert_eq!(config.validate(), Err(ConfigError::Empty("args")));
    }

    #[test]
    fn test_timeout_limited_to_one_watch() {
        let mut config = sample_config();
        config.timeout = Duration::from_secs(MAX_TIMEOUT_SECS);
        assert_eq!(config.validate(), Ok(()));

        config.timeout = Duration::from_secs(291);
        assert_eq!(
            config.validate(),
            Err(ConfigError::TimeoutTooLong { got: 291, max: 290 })
        );
    }

    #[test]
    fn test_zero_keep_alive_is_allowed() {
        let mut config = sample_config();
        config.keep_alive = Duration::ZERO;
        assert!(config.validate().is_ok());
    }
}
