//! Task entity - small paid actions (watch a video, answer a survey).

use crate::core::money::Money;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Task database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "tasks")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    /// Display title
    pub title: String,
    /// Task category (`video`, `survey`, `quiz`)
    pub kind: String,
    /// Reward credited on completion
    #[sea_orm(column_type = "BigInteger")]
    pub reward: Money,
}

/// Tasks have no relationships with other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
