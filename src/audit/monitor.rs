//! Rolling-window anomaly detection over the audit stream.
//!
//! Three per-key counters: failed logins, distinct source addresses seen
//! for one identity, and rate-limit violations. Crossing a threshold
//! creates a [`SecurityAlert`]; repeated crossings inside the dedup window
//! update the existing alert (`count`, `last_seen`) instead of producing a
//! fresh notification. Critical alerts notify on every trigger.

use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::event::{AuditEvent, AuditEventKind, Severity};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub failed_login_threshold: u32,
    pub failed_login_window: Duration,
    pub distinct_ip_threshold: u32,
    pub distinct_ip_window: Duration,
    pub rate_limit_threshold: u32,
    pub rate_limit_window: Duration,
    /// Repeated crossings within this span update the existing alert.
    pub alert_dedup_window: Duration,
    /// An alert counts as open while `last_seen` is within this span.
    pub alert_ttl: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            failed_login_threshold: 5,
            failed_login_window: Duration::from_secs(5 * 60),
            distinct_ip_threshold: 10,
            distinct_ip_window: Duration::from_secs(15 * 60),
            rate_limit_threshold: 100,
            rate_limit_window: Duration::from_secs(15 * 60),
            alert_dedup_window: Duration::from_secs(15 * 60),
            alert_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    RepeatedLoginFailures,
    SuspiciousIpSpread,
    RateLimitAbuse,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::RepeatedLoginFailures => "repeated_login_failures",
            AlertKind::SuspiciousIpSpread => "suspicious_ip_spread",
            AlertKind::RateLimitAbuse => "rate_limit_abuse",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SecurityAlert {
    pub kind: AlertKind,
    pub severity: Severity,
    pub identity_key: String,
    pub window: Duration,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub count: u64,
}

/// Notification consumer. Failures are isolated per hook and only logged.
pub trait AlertHook: Send + Sync {
    fn on_alert(&self, alert: &SecurityAlert) -> anyhow::Result<()>;
}

impl<F> AlertHook for F
where
    F: Fn(&SecurityAlert) -> anyhow::Result<()> + Send + Sync,
{
    fn on_alert(&self, alert: &SecurityAlert) -> anyhow::Result<()> {
        self(alert)
    }
}

pub struct SecurityMonitor {
    config: MonitorConfig,
    failed_logins: DashMap<String, Vec<Instant>>,
    ip_spread: DashMap<String, Vec<(String, Instant)>>,
    rate_hits: DashMap<String, Vec<Instant>>,
    alerts: DashMap<(AlertKind, String), SecurityAlert>,
    hooks: RwLock<Vec<Arc<dyn AlertHook>>>,
}

impl SecurityMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            failed_logins: DashMap::new(),
            ip_spread: DashMap::new(),
            rate_hits: DashMap::new(),
            alerts: DashMap::new(),
            hooks: RwLock::new(Vec::new()),
        }
    }

    pub fn register_hook(&self, hook: Arc<dyn AlertHook>) {
        self.hooks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(hook);
    }

    /// Feed one audit event through the rolling counters.
    pub fn observe(&self, event: &AuditEvent) {
        let key = event_key(event);

        match event.kind {
            AuditEventKind::LoginFailed => {
                if let Some(key) = &key {
                    self.record_failed_login(key);
                }
            }
            AuditEventKind::RateLimitExceeded => {
                if let Some(key) = &key {
                    self.record_rate_hit(key);
                }
            }
            _ => {}
        }

        if let (Some(key), Some(ip)) = (&key, &event.source_ip) {
            self.record_source_ip(key, ip);
        }
    }

    fn record_failed_login(&self, key: &str) {
        let now = Instant::now();
        let window = self.config.failed_login_window;
        let mut attempts = self.failed_logins.entry(key.to_string()).or_default();
        attempts.retain(|at| now.duration_since(*at) < window);
        attempts.push(now);

        if attempts.len() as u32 >= self.config.failed_login_threshold {
            let observed = attempts.len() as u64;
            drop(attempts);
            self.raise(
                AlertKind::RepeatedLoginFailures,
                Severity::High,
                key,
                window,
                observed,
            );
        }
    }

    fn record_source_ip(&self, key: &str, ip: &str) {
        let now = Instant::now();
        let window = self.config.distinct_ip_window;
        let mut seen = self.ip_spread.entry(key.to_string()).or_default();
        seen.retain(|(_, at)| now.duration_since(*at) < window);
        if !seen.iter().any(|(known, _)| known == ip) {
            seen.push((ip.to_string(), now));
        }

        let distinct = seen.len() as u32;
        if distinct >= self.config.distinct_ip_threshold {
            drop(seen);
            self.raise(
                AlertKind::SuspiciousIpSpread,
                Severity::Medium,
                key,
                window,
                distinct as u64,
            );
        }
    }

    fn record_rate_hit(&self, key: &str) {
        let now = Instant::now();
        let window = self.config.rate_limit_window;
        let mut hits = self.rate_hits.entry(key.to_string()).or_default();
        hits.retain(|at| now.duration_since(*at) < window);
        hits.push(now);

        if hits.len() as u32 >= self.config.rate_limit_threshold {
            let observed = hits.len() as u64;
            drop(hits);
            self.raise(
                AlertKind::RateLimitAbuse,
                Severity::Medium,
                key,
                window,
                observed,
            );
        }
    }

    fn raise(
        &self,
        kind: AlertKind,
        severity: Severity,
        key: &str,
        window: Duration,
        observed: u64,
    ) {
        let now = Utc::now();
        let dedup = chrono::Duration::from_std(self.config.alert_dedup_window)
            .unwrap_or_else(|_| chrono::Duration::minutes(15));

        let mut notify_alert = None;
        self.alerts
            .entry((kind, key.to_string()))
            .and_modify(|alert| {
                if now - alert.last_seen <= dedup {
                    alert.count += 1;
                    alert.last_seen = now;
                    if alert.severity == Severity::Critical {
                        notify_alert = Some(alert.clone());
                    }
                } else {
                    // The previous alert aged out; start a fresh one.
                    *alert = SecurityAlert {
                        kind,
                        severity,
                        identity_key: key.to_string(),
                        window,
                        first_seen: now,
                        last_seen: now,
                        count: observed,
                    };
                    notify_alert = Some(alert.clone());
                }
            })
            .or_insert_with(|| {
                let alert = SecurityAlert {
                    kind,
                    severity,
                    identity_key: key.to_string(),
                    window,
                    first_seen: now,
                    last_seen: now,
                    count: observed,
                };
                notify_alert = Some(alert.clone());
                alert
            });

        if let Some(alert) = notify_alert {
            self.notify(&alert);
        }
    }

    fn notify(&self, alert: &SecurityAlert) {
        tracing::warn!(
            target: "audit",
            alert = alert.kind.as_str(),
            severity = alert.severity.as_str(),
            identity_key = %alert.identity_key,
            count = alert.count,
            "security alert"
        );
        let hooks = self.hooks.read().unwrap_or_else(|e| e.into_inner());
        for hook in hooks.iter() {
            if let Err(err) = hook.on_alert(alert) {
                tracing::warn!(
                    target: "telemetry",
                    error = %err,
                    alert = alert.kind.as_str(),
                    "alert hook failed"
                );
            }
        }
    }

    /// Alerts whose `last_seen` is still within the retention window.
    /// Expired alerts are pruned as a side effect.
    pub fn open_alerts(&self) -> Vec<SecurityAlert> {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(self.config.alert_ttl)
            .unwrap_or_else(|_| chrono::Duration::hours(24));
        self.alerts.retain(|_, alert| now - alert.last_seen <= ttl);
        self.alerts
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }
}

/// Identity key for counter bucketing: explicit key detail first, then the
/// resolved identity, then the source address.
fn event_key(event: &AuditEvent) -> Option<String> {
    if let Some(key) = event.details.get("identity_key").and_then(|v| v.as_str()) {
        return Some(key.to_string());
    }
    if let Some(id) = event.identity_id {
        return Some(id.to_string());
    }
    event.source_ip.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn failed_login(key: &str) -> AuditEvent {
        AuditEvent::new(AuditEventKind::LoginFailed, Severity::Medium)
            .failed()
            .with_detail("identity_key", key)
    }

    #[test]
    fn ten_failures_produce_one_alert_with_count_ten() {
        let monitor = SecurityMonitor::new(MonitorConfig::default());
        let notified = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&notified);
        monitor.register_hook(Arc::new(move |_: &SecurityAlert| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        for _ in 0..10 {
            monitor.observe(&failed_login("mallory"));
        }

        let alerts = monitor.open_alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::RepeatedLoginFailures);
        assert_eq!(alerts[0].count, 10);
        // Only the first crossing notifies; the rest are deduplicated.
        assert_eq!(notified.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failures_below_threshold_raise_nothing() {
        let monitor = SecurityMonitor::new(MonitorConfig::default());
        for _ in 0..4 {
            monitor.observe(&failed_login("alice"));
        }
        assert!(monitor.open_alerts().is_empty());
    }

    #[test]
    fn distinct_ip_spread_raises_alert() {
        let config = MonitorConfig {
            distinct_ip_threshold: 3,
            ..Default::default()
        };
        let monitor = SecurityMonitor::new(config);
        let id = uuid::Uuid::new_v4();

        for ip in ["203.0.113.1", "203.0.113.2", "203.0.113.3"] {
            let event = AuditEvent::new(AuditEventKind::LoginSuccess, Severity::Low)
                .with_identity(id)
                .with_source_ip(ip);
            monitor.observe(&event);
        }

        let alerts = monitor.open_alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::SuspiciousIpSpread);
        assert_eq!(alerts[0].count, 3);
    }

    #[test]
    fn repeated_source_ip_is_not_suspicious() {
        let config = MonitorConfig {
            distinct_ip_threshold: 3,
            ..Default::default()
        };
        let monitor = SecurityMonitor::new(config);
        let id = uuid::Uuid::new_v4();

        for _ in 0..5 {
            let event = AuditEvent::new(AuditEventKind::LoginSuccess, Severity::Low)
                .with_identity(id)
                .with_source_ip("203.0.113.1");
            monitor.observe(&event);
        }
        assert!(monitor.open_alerts().is_empty());
    }

    #[test]
    fn rate_limit_hits_raise_alert() {
        let config = MonitorConfig {
            rate_limit_threshold: 5,
            ..Default::default()
        };
        let monitor = SecurityMonitor::new(config);

        for _ in 0..5 {
            let event = AuditEvent::new(AuditEventKind::RateLimitExceeded, Severity::Medium)
                .failed()
                .with_detail("identity_key", "198.51.100.7");
            monitor.observe(&event);
        }

        let alerts = monitor.open_alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::RateLimitAbuse);
    }

    #[test]
    fn failing_hook_does_not_block_other_hooks() {
        let monitor = SecurityMonitor::new(MonitorConfig::default());
        let reached = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&reached);
        monitor.register_hook(Arc::new(|_: &SecurityAlert| {
            anyhow::bail!("notifier down")
        }));
        monitor.register_hook(Arc::new(move |_: &SecurityAlert| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        for _ in 0..5 {
            monitor.observe(&failed_login("mallory"));
        }
        assert_eq!(reached.load(Ordering::SeqCst), 1);
    }
}
