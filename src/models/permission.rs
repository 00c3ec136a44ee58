use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Atomic (resource, action) capability. Permissions are always referenced
/// by the full pair so renaming a resource cannot silently widen access.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Permission {
    pub resource: String,
    pub action: String,
}

impl Permission {
    pub fn new(resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            action: action.into(),
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource, self.action)
    }
}

/// How a route's required permission set is evaluated against the grant set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequireMode {
    /// At least one required pair must be granted.
    Any,
    /// Every required pair must be granted.
    All,
}

impl Default for RequireMode {
    fn default() -> Self {
        RequireMode::Any
    }
}

/// Well-known permission pairs used by the medical-report portal's route
/// table. The catalog itself treats these as opaque tuples.
pub mod pairs {
    use super::Permission;

    pub fn admin_users() -> Permission {
        Permission::new("admin", "users")
    }

    pub fn admin_system() -> Permission {
        Permission::new("admin", "system")
    }

    pub fn admin_roles() -> Permission {
        Permission::new("admin", "roles")
    }

    pub fn user_read() -> Permission {
        Permission::new("user", "read")
    }

    pub fn user_write() -> Permission {
        Permission::new("user", "write")
    }

    pub fn report_read() -> Permission {
        Permission::new("report", "read")
    }

    pub fn report_write() -> Permission {
        Permission::new("report", "write")
    }

    pub fn report_delete() -> Permission {
        Permission::new("report", "delete")
    }

    pub fn doctor_review() -> Permission {
        Permission::new("doctor", "review")
    }

    pub fn doctor_diagnose() -> Permission {
        Permission::new("doctor", "diagnose")
    }

    pub fn patient_reports() -> Permission {
        Permission::new("patient", "reports")
    }
}

/// Convenience for building grant sets in configuration and tests.
pub fn permission_set<I>(entries: I) -> HashSet<Permission>
where
    I: IntoIterator<Item = (&'static str, &'static str)>,
{
    entries
        .into_iter()
        .map(|(resource, action)| Permission::new(resource, action))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_the_dotted_pair() {
        assert_eq!(pairs::admin_system().to_string(), "admin.system");
        assert_eq!(Permission::new("report", "read").to_string(), "report.read");
    }

    #[test]
    fn permission_set_dedups_pairs() {
        let set = permission_set([("report", "read"), ("report", "read"), ("user", "read")]);
        assert_eq!(set.len(), 2);
        assert!(set.contains(&pairs::report_read()));
    }
}
