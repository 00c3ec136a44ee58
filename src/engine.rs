//! Authorization decision engine and the facade the enclosing portal
//! embeds.
//!
//! Per request the state machine is terminal at the first resolution:
//! public route → allow; locked key → deny 429; identity failure → deny
//! 401; insufficient permission → deny 403; otherwise allow. Every
//! terminal transition emits exactly one audit event, synchronously,
//! before the decision is returned. Any internal error on the permission
//! path resolves to deny — never to allow.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::audit::{
    ActivitySummary, AlertHook, AuditEvent, AuditEventKind, AuditHook, AuditPage, AuditPipeline,
    AuditQuery, SecurityAlert, Severity,
};
use crate::catalog::PermissionCatalog;
use crate::config::GateConfig;
use crate::errors::GateResult;
use crate::guard::{AttemptOutcome, BruteForceGuard};
use crate::matcher::{Method, RouteMatch, RouteTable};
use crate::resolver::{IdentityResolver, ResolveError, TokenFault};
use crate::store::{DirectoryStore, SessionStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyKind {
    /// No, invalid, or expired credential. Maps to 401.
    Unauthenticated,
    /// Valid identity, insufficient permission or no route rule. Maps to 403.
    Forbidden,
    /// Identity key is locked out. Maps to 429.
    RateLimited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Allow,
    Deny(DenyKind),
}

/// What the enclosing request handler gets back. The reason is a stable
/// code; 401 denials deliberately carry no more than `unauthenticated` so
/// responses cannot be probed for which tokens or accounts exist.
#[derive(Debug, Clone)]
pub struct Decision {
    pub outcome: Outcome,
    pub reason: String,
    pub identity_id: Option<Uuid>,
    pub retry_after: Option<Duration>,
}

impl Decision {
    pub fn is_allow(&self) -> bool {
        self.outcome == Outcome::Allow
    }

    fn allow(identity_id: Option<Uuid>) -> Self {
        Self {
            outcome: Outcome::Allow,
            reason: "ok".to_string(),
            identity_id,
            retry_after: None,
        }
    }

    fn deny(kind: DenyKind, reason: impl Into<String>, identity_id: Option<Uuid>) -> Self {
        Self {
            outcome: Outcome::Deny(kind),
            reason: reason.into(),
            identity_id,
            retry_after: None,
        }
    }

    fn rate_limited(retry_after: Duration) -> Self {
        Self {
            outcome: Outcome::Deny(DenyKind::RateLimited),
            reason: "rate_limited".to_string(),
            identity_id: None,
            retry_after: Some(retry_after),
        }
    }
}

pub struct AccessGate {
    table: RouteTable,
    resolver: IdentityResolver,
    catalog: PermissionCatalog,
    guard: BruteForceGuard,
    audit: AuditPipeline,
}

impl AccessGate {
    /// Validate the route table, wire the components, and announce the
    /// start in the audit log. A shadowed or invalid route rule is fatal
    /// here — a gate that silently drops rules is a privilege gap.
    pub fn new(
        config: GateConfig,
        sessions: Arc<dyn SessionStore>,
        directory: Arc<dyn DirectoryStore>,
    ) -> GateResult<Self> {
        let table = RouteTable::new(config.routes)?;
        let audit = AuditPipeline::new(config.audit, config.monitor)?;

        let gate = Self {
            resolver: IdentityResolver::new(
                sessions,
                Arc::clone(&directory),
                config.session_lookup_timeout,
            ),
            catalog: PermissionCatalog::new(directory),
            guard: BruteForceGuard::new(config.rate_limit),
            table,
            audit,
        };

        gate.audit.emit(
            AuditEvent::new(AuditEventKind::SystemStart, Severity::Low)
                .with_detail("route_rules", gate.table.len() as u64),
        );

        Ok(gate)
    }

    /// Decide one request. The audit event for the decision is written
    /// before this returns.
    pub async fn authorize(
        &self,
        path: &str,
        method: Method,
        token: Option<&str>,
        source_ip: &str,
    ) -> Decision {
        let (pattern, required, mode) = match self.table.match_route(path, method) {
            RouteMatch::Public => {
                self.audit.emit(
                    self.decision_event(AuditEventKind::AccessGranted, Severity::Low, path, method)
                        .with_source_ip(source_ip)
                        .with_detail("reason", "public_route"),
                );
                return Decision::allow(None);
            }
            RouteMatch::NoRule => {
                self.audit.emit(
                    self.decision_event(AuditEventKind::AccessDenied, Severity::Medium, path, method)
                        .with_source_ip(source_ip)
                        .failed()
                        .with_detail("reason", "no_rule"),
                );
                return Decision::deny(DenyKind::Forbidden, "no_rule", None);
            }
            RouteMatch::Requirement {
                pattern,
                required,
                mode,
            } => (pattern, required, mode),
        };

        // The brute-force gate runs before any credential or session work.
        if let Some(retry_after) = self.guard.lock_remaining(source_ip) {
            self.audit.emit(
                self.decision_event(
                    AuditEventKind::RateLimitExceeded,
                    Severity::Medium,
                    path,
                    method,
                )
                .with_source_ip(source_ip)
                .failed()
                .with_detail("identity_key", source_ip)
                .with_detail("retry_after_secs", retry_after.as_secs()),
            );
            return Decision::rate_limited(retry_after);
        }

        let Some(token) = token else {
            self.audit.emit(
                self.decision_event(AuditEventKind::AccessDenied, Severity::Medium, path, method)
                    .with_source_ip(source_ip)
                    .failed()
                    .with_detail("reason", "no_token"),
            );
            return Decision::deny(DenyKind::Unauthenticated, "unauthenticated", None);
        };

        let resolved = match self.resolver.resolve(token).await {
            Ok(resolved) => resolved,
            Err(err) => return self.deny_unauthenticated(err, path, method, source_ip),
        };

        let granted = match self.catalog.effective_permissions(&resolved.roles).await {
            Ok(granted) => granted,
            Err(err) => {
                // Partial success never grants: a broken permission lookup
                // is a deny with an operator-visible critical event.
                self.audit.emit(
                    self.decision_event(
                        AuditEventKind::AccessDenied,
                        Severity::Critical,
                        path,
                        method,
                    )
                    .with_source_ip(source_ip)
                    .with_identity(resolved.identity_id)
                    .failed()
                    .with_detail("reason", "permission_lookup_failed")
                    .with_detail("error", err.to_string()),
                );
                return Decision::deny(
                    DenyKind::Forbidden,
                    "forbidden",
                    Some(resolved.identity_id),
                );
            }
        };

        if !PermissionCatalog::has_permission(&granted, required, mode) {
            let reason = PermissionCatalog::first_missing(&granted, required)
                .map(|perm| format!("missing_permission:{perm}"))
                .unwrap_or_else(|| "missing_permission".to_string());
            self.audit.emit(
                self.decision_event(AuditEventKind::AccessDenied, Severity::Medium, path, method)
                    .with_source_ip(source_ip)
                    .with_identity(resolved.identity_id)
                    .failed()
                    .with_detail("reason", reason.clone())
                    .with_detail("rule", pattern),
            );
            return Decision::deny(DenyKind::Forbidden, reason, Some(resolved.identity_id));
        }

        self.audit.emit(
            self.decision_event(AuditEventKind::AccessGranted, Severity::Low, path, method)
                .with_source_ip(source_ip)
                .with_identity(resolved.identity_id)
                .with_detail("reason", "ok")
                .with_detail("rule", pattern),
        );
        Decision::allow(Some(resolved.identity_id))
    }

    fn deny_unauthenticated(
        &self,
        err: ResolveError,
        path: &str,
        method: Method,
        source_ip: &str,
    ) -> Decision {
        let (kind, severity, detail, identity_id) = match &err {
            ResolveError::InvalidToken(TokenFault::Expired) => (
                AuditEventKind::SessionExpired,
                Severity::Medium,
                TokenFault::Expired.as_str().to_string(),
                None,
            ),
            ResolveError::InvalidToken(fault) => (
                AuditEventKind::AccessDenied,
                Severity::Medium,
                fault.as_str().to_string(),
                None,
            ),
            ResolveError::IdentityInactive(id) => (
                AuditEventKind::IdentityInactive,
                Severity::High,
                "identity_inactive".to_string(),
                Some(*id),
            ),
            ResolveError::StoreUnavailable(message) => (
                AuditEventKind::SessionStoreUnreachable,
                Severity::Critical,
                message.clone(),
                None,
            ),
        };

        let mut event = self
            .decision_event(kind, severity, path, method)
            .with_source_ip(source_ip)
            .failed()
            .with_detail("reason", detail);
        if let Some(id) = identity_id {
            event = event.with_identity(id);
        }
        self.audit.emit(event);

        // The caller learns nothing beyond "unauthenticated".
        Decision::deny(DenyKind::Unauthenticated, "unauthenticated", None)
    }

    fn decision_event(
        &self,
        kind: AuditEventKind,
        severity: Severity,
        path: &str,
        method: Method,
    ) -> AuditEvent {
        AuditEvent::new(kind, severity).with_resource_action(path, method.to_string())
    }

    /// Record an authentication attempt ahead of credential verification.
    /// The guard's verdict gates whether the caller may proceed to check
    /// the password at all.
    pub fn record_login_attempt(
        &self,
        identity_key: &str,
        source_ip: Option<&str>,
        success: bool,
    ) -> AttemptOutcome {
        let was_locked = self.guard.lock_remaining(identity_key).is_some();
        let outcome = self.guard.record_attempt(identity_key, success);

        let event = if !outcome.allowed {
            let retry = outcome.retry_after.unwrap_or_default();
            let kind = if was_locked {
                AuditEventKind::RateLimitExceeded
            } else {
                AuditEventKind::AccountLocked
            };
            let severity = if was_locked {
                Severity::Medium
            } else {
                Severity::High
            };
            AuditEvent::new(kind, severity)
                .failed()
                .with_detail("identity_key", identity_key)
                .with_detail("retry_after_secs", retry.as_secs())
        } else if success {
            AuditEvent::new(AuditEventKind::LoginSuccess, Severity::Low)
                .with_detail("identity_key", identity_key)
        } else {
            AuditEvent::new(AuditEventKind::LoginFailed, Severity::Medium)
                .failed()
                .with_detail("identity_key", identity_key)
        };

        let event = match source_ip {
            Some(ip) => event.with_source_ip(ip),
            None => event,
        };
        self.audit.emit(event);

        outcome
    }

    /// Invalidate cached permission resolutions. Every role/permission
    /// mutation site must call this.
    pub fn invalidate_permissions(&self) {
        self.catalog.invalidate();
    }

    pub fn query_audit(&self, query: &AuditQuery) -> AuditPage {
        self.audit.query(query)
    }

    pub fn activity_summary(
        &self,
        identity_id: Uuid,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> ActivitySummary {
        self.audit.activity_summary(identity_id, from, to)
    }

    pub fn list_open_alerts(&self) -> Vec<SecurityAlert> {
        self.audit.open_alerts()
    }

    pub fn register_audit_hook(&self, kind: AuditEventKind, hook: Arc<dyn AuditHook>) {
        self.audit.register_hook(kind, hook);
    }

    pub fn register_alert_hook(&self, hook: Arc<dyn AlertHook>) {
        self.audit.register_alert_hook(hook);
    }

    /// Direct pipeline access for the enclosing application's own events
    /// (data access, admin actions, backups and the like).
    pub fn audit(&self) -> &AuditPipeline {
        &self.audit
    }
}
