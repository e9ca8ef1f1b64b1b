// SPDX-License-Identifier: AGPL-3.0-or-later

//! User roles for authorization.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// User roles for authorization.
///
/// ## Role Hierarchy
///
/// - `Admin` - Full access, including the fiat-admin allocation endpoints
/// - `Client` - Normal user, can only access own wallets and references
/// - `Ops` - Back-office staff; may run scrapes and view unallocated deposits
/// - `Auditor` - Read-only access to audit trails and reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Full administrative access
    Admin,
    /// Normal client user (owns wallets)
    Client,
    /// Back-office operations staff
    Ops,
    /// Auditor (read-only)
    Auditor,
}

impl Role {
    /// Check if this role has at least the privileges of the required role.
    pub fn has_privilege(&self, required: Role) -> bool {
        match (self, required) {
            // Admin can do anything
            (Role::Admin, _) => true,
            // Ops covers auditor-grade reads as well
            (Role::Ops, Role::Ops) | (Role::Ops, Role::Auditor) => true,
            (Role::Client, Role::Client) => true,
            (Role::Auditor, Role::Auditor) => true,
            _ => false,
        }
    }

    /// Parse role from string (case-insensitive).
    pub fn from_str(s: &str) -> Option<Role> {
        match s.to_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "client" => Some(Role::Client),
            "ops" => Some(Role::Ops),
            "auditor" => Some(Role::Auditor),
            _ => None,
        }
    }
}

impl Default for Role {
    /// Default role is Client (least privilege for authenticated users).
    fn default() -> Self {
        Role::Client
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Admin => write!(f, "admin"),
            Role::Client => write!(f, "client"),
            Role::Ops => write!(f, "ops"),
            Role::Auditor => write!(f, "auditor"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_has_all_privileges() {
        assert!(Role::Admin.has_privilege(Role::Admin));
        assert!(Role::Admin.has_privilege(Role::Client));
        assert!(Role::Admin.has_privilege(Role::Ops));
        assert!(Role::Admin.has_privilege(Role::Auditor));
    }

    #[test]
    fn client_only_has_client_privilege() {
        assert!(!Role::Client.has_privilege(Role::Admin));
        assert!(Role::Client.has_privilege(Role::Client));
        assert!(!Role::Client.has_privilege(Role::Ops));
    }

    #[test]
    fn ops_covers_auditor_reads() {
        assert!(Role::Ops.has_privilege(Role::Auditor));
        assert!(!Role::Ops.has_privilege(Role::Admin));
    }

    #[test]
    fn from_str_parses_correctly() {
        assert_eq!(Role::from_str("admin"), Some(Role::Admin));
        assert_eq!(Role::from_str("ADMIN"), Some(Role::Admin));
        assert_eq!(Role::from_str("Client"), Some(Role::Client));
        assert_eq!(Role::from_str("unknown"), None);
    }
}
