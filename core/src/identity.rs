//! Signed-in principal and the identity provider seam.

use crate::ids::UserId;
use serde::{Deserialize, Serialize};

/// Role of a signed-in user.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Regular customer
    #[default]
    Customer,
    /// Store administrator (inventory and order board)
    Admin,
}

/// The user on whose behalf an operation runs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    /// User id from the identity provider
    pub user_id: UserId,
    /// Email address, copied onto orders
    pub email: String,
    /// Role
    #[serde(default)]
    pub role: Role,
}

impl Principal {
    /// A customer principal.
    #[must_use]
    pub fn customer(user_id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            user_id: UserId::new(user_id),
            email: email.into(),
            role: Role::Customer,
        }
    }

    /// An administrator principal.
    #[must_use]
    pub fn admin(user_id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            user_id: UserId::new(user_id),
            email: email.into(),
            role: Role::Admin,
        }
    }

    /// Whether this principal may run admin operations.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Source of the currently signed-in principal.
///
/// Session and token mechanics live behind this trait; the engine only asks
/// "who is signed in right now".
pub trait IdentityProvider: Send + Sync {
    /// The signed-in principal, or `None` when nobody is signed in.
    fn current_principal(&self) -> Option<Principal>;
}
