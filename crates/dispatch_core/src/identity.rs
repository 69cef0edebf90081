//! Caller identity supplied by the identity collaborator on every operation.
//! The engine never authenticates; it only checks relationships and roles.

use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, DispatchResult};
use crate::model::AccountId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Rider,
    Driver,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub account_id: AccountId,
    pub role: Role,
}

impl Caller {
    pub fn rider(account_id: AccountId) -> Self {
        Self {
            account_id,
            role: Role::Rider,
        }
    }

    pub fn driver(account_id: AccountId) -> Self {
        Self {
            account_id,
            role: Role::Driver,
        }
    }

    pub fn admin(account_id: AccountId) -> Self {
        Self {
            account_id,
            role: Role::Admin,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn require_admin(&self) -> DispatchResult<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(DispatchError::forbidden("admin role required"))
        }
    }
}
