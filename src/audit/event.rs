use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Severity of an audit event. Ordering matters: queries filter on a
/// minimum severity and the monitor treats `Critical` specially.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Low
    }
}

/// The audit taxonomy. Covers authentication, authorization, data access,
/// system lifecycle, security signals, and admin actions; the three
/// session-diagnosis kinds let operators tell an unreachable session store
/// apart from a plainly bad token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    // Authentication
    LoginSuccess,
    LoginFailed,
    Logout,
    PasswordChange,
    AccountLocked,
    // Authorization
    AccessGranted,
    AccessDenied,
    PermissionChange,
    RoleChange,
    // Data
    DataCreate,
    DataRead,
    DataUpdate,
    DataDelete,
    DataExport,
    // System
    SystemStart,
    SystemStop,
    ConfigChange,
    BackupCreate,
    BackupRestore,
    // Security
    SecurityViolation,
    RateLimitExceeded,
    SuspiciousActivity,
    // Admin
    UserCreate,
    UserUpdate,
    UserDelete,
    AdminAction,
    // Session diagnosis
    SessionExpired,
    IdentityInactive,
    SessionStoreUnreachable,
}

impl AuditEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventKind::LoginSuccess => "login_success",
            AuditEventKind::LoginFailed => "login_failed",
            AuditEventKind::Logout => "logout",
            AuditEventKind::PasswordChange => "password_change",
            AuditEventKind::AccountLocked => "account_locked",
            AuditEventKind::AccessGranted => "access_granted",
            AuditEventKind::AccessDenied => "access_denied",
            AuditEventKind::PermissionChange => "permission_change",
            AuditEventKind::RoleChange => "role_change",
            AuditEventKind::DataCreate => "data_create",
            AuditEventKind::DataRead => "data_read",
            AuditEventKind::DataUpdate => "data_update",
            AuditEventKind::DataDelete => "data_delete",
            AuditEventKind::DataExport => "data_export",
            AuditEventKind::SystemStart => "system_start",
            AuditEventKind::SystemStop => "system_stop",
            AuditEventKind::ConfigChange => "config_change",
            AuditEventKind::BackupCreate => "backup_create",
            AuditEventKind::BackupRestore => "backup_restore",
            AuditEventKind::SecurityViolation => "security_violation",
            AuditEventKind::RateLimitExceeded => "rate_limit_exceeded",
            AuditEventKind::SuspiciousActivity => "suspicious_activity",
            AuditEventKind::UserCreate => "user_create",
            AuditEventKind::UserUpdate => "user_update",
            AuditEventKind::UserDelete => "user_delete",
            AuditEventKind::AdminAction => "admin_action",
            AuditEventKind::SessionExpired => "session_expired",
            AuditEventKind::IdentityInactive => "identity_inactive",
            AuditEventKind::SessionStoreUnreachable => "session_store_unreachable",
        }
    }
}

/// One immutable audit record. Built once, appended to the log, and never
/// mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub kind: AuditEventKind,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub details: Map<String, Value>,
}

impl AuditEvent {
    pub fn new(kind: AuditEventKind, severity: Severity) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            severity,
            timestamp: Utc::now(),
            identity_id: None,
            source_ip: None,
            resource: None,
            action: None,
            success: true,
            details: Map::new(),
        }
    }

    pub fn with_identity(mut self, identity_id: Uuid) -> Self {
        self.identity_id = Some(identity_id);
        self
    }

    pub fn with_source_ip(mut self, source_ip: impl Into<String>) -> Self {
        self.source_ip = Some(source_ip.into());
        self
    }

    pub fn with_resource_action(
        mut self,
        resource: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        self.resource = Some(resource.into());
        self.action = Some(action.into());
        self
    }

    pub fn failed(mut self) -> Self {
        self.success = false;
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}
