//! Operator authorization.
//!
//! Admin-only operations take an [`AdminContext`]. The context can only be built by
//! [`authorize_operator`] (a bearer token issued to one named operator) or
//! [`authorize_admin_user`] (a user account with the admin role). Its actor id ends
//! up in logs and in the meta of any ledger row the admin action writes.
//!
//! Tokens are never stored; only their hex SHA-256 digest is.

use crate::{
    core::ledger,
    entities::{Operator, operator, user::UserRole},
    errors::{Error, Result},
};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

/// Proof that the caller passed admin authorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminContext {
    actor_id: String,
}

impl AdminContext {
    /// Operator credential id or admin user id that authorized the action.
    #[must_use]
    pub fn actor_id(&self) -> &str {
        &self.actor_id
    }

    #[cfg(test)]
    pub(crate) fn for_tests(actor_id: &str) -> Self {
        Self {
            actor_id: actor_id.to_string(),
        }
    }
}

/// A freshly issued credential. The token is only available here.
#[derive(Debug, Clone)]
pub struct IssuedCredential {
    /// Stored credential
    pub operator: operator::Model,
    /// Bearer token to hand to the operator
    pub token: String,
}

fn hash_token(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}

/// Issues a new operator credential.
pub async fn issue_operator_credential<C>(db: &C, label: &str) -> Result<IssuedCredential>
where
    C: ConnectionTrait,
{
    let label = label.trim();
    if label.is_empty() {
        return Err(Error::Validation {
            message: "Operator label cannot be empty".to_string(),
        });
    }

    let token = format!(
        "lgr_{}{}",
        Uuid::new_v4().simple(),
        Uuid::new_v4().simple()
    );
    let operator = operator::ActiveModel {
        id: Set(ledger::new_id("op")),
        label: Set(label.to_string()),
        token_hash: Set(hash_token(&token)),
        created_at: Set(Utc::now()),
        revoked_at: Set(None),
    }
    .insert(db)
    .await?;

    info!(operator_id = %operator.id, label, "Operator credential issued");
    Ok(IssuedCredential { operator, token })
}

/// Revokes a credential. Revoking twice is a no-op.
pub async fn revoke_operator_credential<C>(db: &C, operator_id: &str) -> Result<operator::Model>
where
    C: ConnectionTrait,
{
    let operator = Operator::find_by_id(operator_id.to_string())
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("operator", operator_id))?;
    if operator.revoked_at.is_some() {
        return Ok(operator);
    }

    let mut active: operator::ActiveModel = operator.into();
    active.revoked_at = Set(Some(Utc::now()));
    let operator = active.update(db).await?;
    info!(operator_id, "Operator credential revoked");
    Ok(operator)
}

/// Authorizes a bearer token.
pub async fn authorize_operator<C>(db: &C, token: &str) -> Result<AdminContext>
where
    C: ConnectionTrait,
{
    let operator = Operator::find()
        .filter(operator::Column::TokenHash.eq(hash_token(token.trim())))
        .one(db)
        .await?;

    match operator {
        Some(op) if op.revoked_at.is_none() => Ok(AdminContext { actor_id: op.id }),
        Some(op) => {
            warn!(operator_id = %op.id, "Revoked operator credential presented");
            Err(Error::Unauthorized {
                reason: "credential revoked".to_string(),
            })
        }
        None => {
            warn!("Unknown operator credential presented");
            Err(Error::Unauthorized {
                reason: "unknown credential".to_string(),
            })
        }
    }
}

/// Authorizes a signed-in user holding the admin role.
pub async fn authorize_admin_user<C>(db: &C, user_id: &str) -> Result<AdminContext>
where
    C: ConnectionTrait,
{
    let user = ledger::find_user(db, user_id).await?;
    if user.role != UserRole::Admin {
        return Err(Error::Unauthorized {
            reason: "admin role required".to_string(),
        });
    }
    if !user.is_active {
        return Err(Error::Unauthorized {
            reason: "admin account is disabled".to_string(),
        });
    }
    Ok(AdminContext { actor_id: user.id })
}
