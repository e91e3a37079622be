//! User entity - identity plus the financial account.
//!
//! The wallet is the spendable balance. `referred_by` is the parent pointer of the
//! referral tree; it is set at registration (or by an operator link) and never forms
//! a cycle. `current_package_id` and `package_expires_at` are a cache of the latest
//! unexpired purchase, written only by `core::package::refresh_plan_cache`.

use crate::core::money::Money;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Account role
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    /// Regular member
    #[sea_orm(string_value = "user")]
    User,
    /// Platform administrator
    #[sea_orm(string_value = "admin")]
    Admin,
}

/// User database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "users")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    /// Display name
    pub name: Option<String>,
    /// Login email, unique
    #[sea_orm(unique)]
    pub email: String,
    /// Phone number
    pub phone: Option<String>,
    /// Password hash produced by the auth boundary
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// Account role
    pub role: UserRole,
    /// Spendable balance
    #[sea_orm(column_type = "BigInteger")]
    pub wallet: Money,
    /// Code other users enter to be referred by this user
    #[sea_orm(unique)]
    pub invite_code: String,
    /// Invite code this user signed up with, as typed
    pub referral_code: Option<String>,
    /// Parent in the referral tree
    pub referred_by: Option<String>,
    /// Payout account holder name
    pub payout_name: Option<String>,
    /// Payout method (bank, wallet provider, ...)
    pub payout_method: Option<String>,
    /// Payout account number
    pub payout_account: Option<String>,
    /// Cached id of the latest unexpired package
    pub current_package_id: Option<String>,
    /// Cached expiry of that package
    pub package_expires_at: Option<DateTimeUtc>,
    /// Last successful daily claim on any package
    pub last_claimed_at: Option<DateTimeUtc>,
    /// Gates task completion and withdrawals
    pub is_active: bool,
    /// Registration time
    pub created_at: DateTimeUtc,
}

impl Model {
    /// True when all three payout fields are filled in.
    #[must_use]
    pub fn has_payout_details(&self) -> bool {
        [&self.payout_name, &self.payout_method, &self.payout_account]
            .iter()
            .all(|field| field.as_deref().is_some_and(|v| !v.trim().is_empty()))
    }
}

/// Defines relationships between User and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One user has many ledger entries
    #[sea_orm(has_many = "super::transaction::Entity")]
    Transactions,
    /// One user has many deposit requests
    #[sea_orm(has_many = "super::deposit::Entity")]
    Deposits,
    /// One user owns many package purchases
    #[sea_orm(has_many = "super::user_package::Entity")]
    UserPackages,
}

impl Related<super::transaction::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Transactions.def()
    }
}

impl Related<super::deposit::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Deposits.def()
    }
}

impl Related<super::user_package::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::UserPackages.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
