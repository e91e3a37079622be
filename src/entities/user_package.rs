//! `UserPackage` entity - one purchase of a package by a user.
//!
//! A purchase is `active` while `now < expires_at` and `expired` afterwards. Price and
//! daily reward are copied from the package at activation. `claim_count` is bumped by
//! every successful claim and doubles as the compare-and-swap guard that keeps two
//! concurrent claims from both landing on the same day.

use crate::core::money::Money;
use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// `UserPackage` database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "user_packages")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    /// Owner
    pub user_id: String,
    /// Purchased package
    pub package_id: String,
    /// Price at activation (zero for free operator activations)
    #[sea_orm(column_type = "BigInteger")]
    pub price_paid: Money,
    /// Daily reward at activation
    #[sea_orm(column_type = "BigInteger")]
    pub daily_claim: Money,
    /// Activation time
    pub activated_at: DateTimeUtc,
    /// `activated_at` plus the package duration
    pub expires_at: DateTimeUtc,
    /// Most recent successful claim
    pub last_claimed_at: Option<DateTimeUtc>,
    /// Number of successful claims
    pub claim_count: i64,
}

impl Model {
    /// True once `now` has reached the expiry instant.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// True when the last claim falls on the same UTC calendar day as `now`.
    #[must_use]
    pub fn claimed_on_day_of(&self, now: DateTime<Utc>) -> bool {
        self.last_claimed_at
            .is_some_and(|last| last.date_naive() == now.date_naive())
    }
}

/// Defines relationships between `UserPackage` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each purchase belongs to one user
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id"
    )]
    User,
    /// Each purchase refers to one package
    #[sea_orm(
        belongs_to = "super::package::Entity",
        from = "Column::PackageId",
        to = "super::package::Column::Id"
    )]
    Package,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl Related<super::package::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Package.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
