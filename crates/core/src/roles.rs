//! Well-known role name constants.
//!
//! These must match the CHECK constraint in `20260301000001_create_users.sql`.

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_MANAGER: &str = "manager";
pub const ROLE_EMPLOYEE: &str = "employee";

/// Every role a user row may carry.
pub const ALL_ROLES: [&str; 3] = [ROLE_ADMIN, ROLE_MANAGER, ROLE_EMPLOYEE];

/// Returns `true` if `role` is one of [`ALL_ROLES`].
pub fn is_known_role(role: &str) -> bool {
    ALL_ROLES.contains(&role)
}
