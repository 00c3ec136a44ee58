//! Declarative configuration for the gate.
//!
//! Everything is plain data: the route table entries, the rate-limit and
//! monitor thresholds, and the audit sink destination. `from_env` applies
//! operator overrides on top of the defaults; route rules are always
//! supplied by the embedding application.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::audit::{AuditConfig, MonitorConfig};
use crate::errors::GateError;
use crate::guard::RateLimitConfig;
use crate::matcher::RouteRule;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    pub routes: Vec<RouteRule>,
    pub rate_limit: RateLimitConfig,
    pub monitor: MonitorConfig,
    pub audit: AuditConfig,
    /// Upper bound on the external session-store lookup. A timeout is
    /// treated as an invalid token (fail closed), not an allow.
    pub session_lookup_timeout: Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            routes: Vec::new(),
            rate_limit: RateLimitConfig::default(),
            monitor: MonitorConfig::default(),
            audit: AuditConfig::default(),
            session_lookup_timeout: Duration::from_secs(2),
        }
    }
}

impl GateConfig {
    pub fn new(routes: Vec<RouteRule>) -> Self {
        Self {
            routes,
            ..Default::default()
        }
    }

    /// Defaults with environment overrides applied. Unset variables keep
    /// their defaults; unparsable values are configuration errors.
    pub fn from_env(routes: Vec<RouteRule>) -> Result<Self, GateError> {
        let mut config = Self::new(routes);

        if let Some(value) = env_parse::<u32>("CAREGATE_MAX_LOGIN_ATTEMPTS")? {
            config.rate_limit.max_attempts = value;
        }
        if let Some(secs) = env_parse::<u64>("CAREGATE_LOGIN_WINDOW_SECS")? {
            config.rate_limit.window = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("CAREGATE_FAILED_LOGIN_WINDOW_SECS")? {
            config.monitor.failed_login_window = Duration::from_secs(secs);
        }
        if let Some(value) = env_parse::<u32>("CAREGATE_FAILED_LOGIN_THRESHOLD")? {
            config.monitor.failed_login_threshold = value;
        }
        if let Some(ms) = env_parse::<u64>("CAREGATE_SESSION_LOOKUP_TIMEOUT_MS")? {
            config.session_lookup_timeout = Duration::from_millis(ms);
        }
        if let Some(value) = env_parse::<usize>("CAREGATE_AUDIT_CAPACITY")? {
            config.audit.capacity = value;
        }
        if let Ok(path) = std::env::var("CAREGATE_AUDIT_SINK") {
            if !path.is_empty() {
                config.audit.sink_path = Some(path.into());
            }
        }

        Ok(config)
    }
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>, GateError> {
    match std::env::var(key) {
        Ok(raw) => raw.parse::<T>().map(Some).map_err(|_| {
            GateError::configuration(format!("{key} must be a valid value, got '{raw}'"))
        }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_policy() {
        let config = GateConfig::default();
        assert_eq!(config.rate_limit.max_attempts, 5);
        assert_eq!(config.rate_limit.window, Duration::from_secs(15 * 60));
        assert_eq!(config.monitor.failed_login_threshold, 5);
        assert_eq!(config.monitor.failed_login_window, Duration::from_secs(5 * 60));
        assert_eq!(config.monitor.distinct_ip_threshold, 10);
        assert_eq!(config.monitor.rate_limit_threshold, 100);
        assert_eq!(config.session_lookup_timeout, Duration::from_secs(2));
        assert!(config.audit.sink_path.is_none());
    }

    #[test]
    fn invalid_env_value_is_a_configuration_error() {
        std::env::set_var("CAREGATE_MAX_LOGIN_ATTEMPTS", "not-a-number");
        let result = GateConfig::from_env(Vec::new());
        std::env::remove_var("CAREGATE_MAX_LOGIN_ATTEMPTS");
        assert!(matches!(result, Err(GateError::Configuration(_))));
    }
}
