// SPDX-License-Identifier: AGPL-3.0-or-later

//! The authenticated principal attached to every request.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::Role;

/// Authenticated request context.
///
/// Carries the full scope triple (user, tenant, broker) so handlers never
/// have to trust scope identifiers from the request body.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RequestContext {
    /// Canonical user id (JWT `sub`).
    pub user_id: String,
    /// Tenant the session belongs to.
    pub tenant_id: String,
    /// Broker the session belongs to.
    pub broker_id: String,
    pub role: Role,
}

impl RequestContext {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn has_privilege(&self, required: Role) -> bool {
        self.role.has_privilege(required)
    }

    /// Whether this context may read resources owned by `user_id`.
    ///
    /// Owners always can; admin, ops and auditor roles can for any user.
    pub fn can_view_user(&self, user_id: &str) -> bool {
        self.user_id == user_id || self.role != Role::Client
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(role: Role) -> RequestContext {
        RequestContext {
            user_id: "user-1".to_string(),
            tenant_id: "tenant-1".to_string(),
            broker_id: "acme".to_string(),
            role,
        }
    }

    #[test]
    fn clients_see_only_their_own_resources() {
        let context = ctx(Role::Client);
        assert!(context.can_view_user("user-1"));
        assert!(!context.can_view_user("user-2"));
    }

    #[test]
    fn staff_roles_see_any_user() {
        for role in [Role::Admin, Role::Ops, Role::Auditor] {
            assert!(ctx(role).can_view_user("user-2"));
        }
    }
}
