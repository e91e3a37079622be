//! Operator entity - an individually issued, revocable admin credential.
//!
//! Only the SHA-256 digest of the bearer token is stored.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Operator credential database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "operators")]
pub struct Model {
    /// Unique identifier, recorded on every admin action
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    /// Who the credential was issued to
    pub label: String,
    /// Hex SHA-256 of the bearer token
    #[sea_orm(unique)]
    #[serde(skip_serializing)]
    pub token_hash: String,
    /// Issue time
    pub created_at: DateTimeUtc,
    /// Set once revoked; revoked credentials never authorize again
    pub revoked_at: Option<DateTimeUtc>,
}

/// Operators have no relationships with other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
