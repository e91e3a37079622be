//! Deposit entity - a cash-in request awaiting operator verification.
//!
//! Created `pending` by the intake boundary; an operator moves it to `approved`
//! (wallet credited) or `rejected`. Both are terminal.

use crate::core::money::Money;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Deposit review state
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "snake_case")]
pub enum DepositStatus {
    /// Awaiting review
    #[sea_orm(string_value = "pending")]
    Pending,
    /// Verified and credited
    #[sea_orm(string_value = "approved")]
    Approved,
    /// Refused, nothing credited
    #[sea_orm(string_value = "rejected")]
    Rejected,
}

impl DepositStatus {
    /// Lowercase name as stored.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

/// Deposit database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "deposits")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    /// Depositing user
    pub user_id: String,
    /// Name on the paying account
    pub account_holder: Option<String>,
    /// External payment reference supplied as proof
    pub transaction_id: String,
    /// Amount paid in
    #[sea_orm(column_type = "BigInteger")]
    pub amount: Money,
    /// Payment method
    pub method: Option<String>,
    /// Package the user intends to buy with the funds
    pub package_id: Option<String>,
    /// Reference to the uploaded proof, stored elsewhere
    pub screenshot: Option<String>,
    /// Review state
    pub status: DepositStatus,
    /// Address the request came from
    pub submit_ip: Option<String>,
    /// Submission time
    pub created_at: DateTimeUtc,
    /// Last status change
    pub updated_at: DateTimeUtc,
}

/// Defines relationships between Deposit and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each deposit belongs to one user
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id"
    )]
    User,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
