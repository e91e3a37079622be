//! Package entity - a purchasable investment tier.
//!
//! Packages are shared reference data. Edits made by an operator apply to future
//! purchases only; each `user_package` snapshots the terms it was bought under.

use crate::core::money::Money;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Package database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "packages")]
pub struct Model {
    /// Unique identifier (e.g. `"p200"`)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    /// Display name (e.g. `"Starter I"`)
    pub name: String,
    /// Purchase price
    #[sea_orm(column_type = "BigInteger")]
    pub price: Money,
    /// Lifetime in days from activation
    pub duration_days: i32,
    /// Reward credited per claim, at most once per UTC day
    #[sea_orm(column_type = "BigInteger")]
    pub daily_claim: Money,
    /// Locked packages cannot be purchased
    pub locked: bool,
}

/// Defines relationships between Package and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One package has many purchases
    #[sea_orm(has_many = "super::user_package::Entity")]
    UserPackages,
}

impl Related<super::user_package::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::UserPackages.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
