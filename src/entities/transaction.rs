//! Transaction entity - the append-only ledger.
//!
//! Each wallet mutation is paired with exactly one row here. `amount` is always
//! non-negative; `kind` gives the direction (purchases and withdrawals debit,
//! everything else credits). `meta` is a tagged union whose variant always matches
//! `kind`, so each kind carries its own typed payload. Rows are never deleted; only
//! the `status` of withdrawals moves after insertion.

use crate::core::money::{Money, Rate};
use sea_orm::FromJsonQueryResult;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Ledger entry type
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Approved cash-in
    #[sea_orm(string_value = "deposit")]
    Deposit,
    /// Package bought from the wallet
    #[sea_orm(string_value = "purchase")]
    Purchase,
    /// Commission from a downline event
    #[sea_orm(string_value = "referral")]
    Referral,
    /// Daily package reward
    #[sea_orm(string_value = "daily")]
    Daily,
    /// Sign-up bonus
    #[sea_orm(string_value = "registration_bonus")]
    RegistrationBonus,
    /// Task reward
    #[sea_orm(string_value = "credit")]
    Credit,
    /// Cash-out request
    #[sea_orm(string_value = "withdraw")]
    Withdraw,
    /// Manual operator credit
    #[sea_orm(string_value = "bonus")]
    Bonus,
}

impl TransactionKind {
    /// True for kinds that take money out of the wallet.
    #[must_use]
    pub const fn is_debit(self) -> bool {
        matches!(self, Self::Purchase | Self::Withdraw)
    }
}

/// Ledger entry status; only withdrawals move past `completed`/`pending`
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Settled
    #[sea_orm(string_value = "completed")]
    Completed,
    /// Withdrawal awaiting an operator
    #[sea_orm(string_value = "pending")]
    Pending,
    /// Withdrawal approved, not yet paid out
    #[sea_orm(string_value = "approved")]
    Approved,
    /// Withdrawal paid out externally, awaiting confirmation
    #[sea_orm(string_value = "sent")]
    Sent,
    /// Withdrawal refused; the amount went back to the wallet
    #[sea_orm(string_value = "rejected")]
    Rejected,
}

impl TransactionStatus {
    /// Lowercase name as stored.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Sent => "sent",
            Self::Rejected => "rejected",
        }
    }
}

/// What triggered a referral commission.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "trigger", rename_all = "snake_case")]
pub enum CommissionSource {
    /// First approved deposit of the downline user
    Deposit {
        /// Approved deposit
        deposit_id: String,
    },
    /// Package bought by the downline user
    Purchase {
        /// Package bought
        package_id: String,
        /// Purchase row
        user_package_id: String,
    },
    /// Operator-granted commission on an investment made outside the platform
    Manual {
        /// Operator who granted it
        granted_by: String,
        /// Amount the commission was computed from
        source_amount: Money,
        /// Free-form operator note
        note: Option<String>,
        /// Caller-chosen key that makes the grant idempotent
        idempotency_key: Option<String>,
    },
}

/// Typed payload of a ledger entry, one variant per [`TransactionKind`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransactionMeta {
    /// Approved deposit
    Deposit {
        /// Source deposit request
        deposit_id: String,
        /// Operator who approved it
        approved_by: String,
    },
    /// Wallet-funded package purchase
    Purchase {
        /// Package bought
        package_id: String,
        /// Purchase row created with it
        user_package_id: String,
        /// Set when an operator activated the package on the user's behalf
        activated_by: Option<String>,
    },
    /// Referral commission
    Referral {
        /// Level label from the schedule (`"A"`..`"D"` or `"1"`..`"3"`)
        level: String,
        /// Distance from the triggering user, starting at 1
        depth: u8,
        /// Downline user whose event paid this commission
        from_user: String,
        /// Rate applied
        rate: Rate,
        /// Triggering event
        source: CommissionSource,
    },
    /// Daily reward claim
    Daily {
        /// Package claimed
        package_id: String,
        /// Purchase claimed
        user_package_id: String,
    },
    /// Sign-up bonus
    RegistrationBonus,
    /// Task reward
    Credit {
        /// Completed task
        task_id: String,
    },
    /// Cash-out request with the payout snapshot the operator pays to
    Withdraw {
        /// Payout account holder
        payout_name: String,
        /// Payout method
        payout_method: String,
        /// Payout account
        payout_account: String,
        /// Fee kept by the platform
        fee: Money,
        /// Amount to pay out (`amount - fee`)
        net: Money,
    },
    /// Manual operator credit
    Bonus {
        /// Operator who granted it
        granted_by: String,
        /// Free-form note
        note: Option<String>,
    },
}

impl TransactionMeta {
    /// The kind this payload belongs to.
    #[must_use]
    pub const fn kind(&self) -> TransactionKind {
        match self {
            Self::Deposit { .. } => TransactionKind::Deposit,
            Self::Purchase { .. } => TransactionKind::Purchase,
            Self::Referral { .. } => TransactionKind::Referral,
            Self::Daily { .. } => TransactionKind::Daily,
            Self::RegistrationBonus => TransactionKind::RegistrationBonus,
            Self::Credit { .. } => TransactionKind::Credit,
            Self::Withdraw { .. } => TransactionKind::Withdraw,
            Self::Bonus { .. } => TransactionKind::Bonus,
        }
    }
}

/// Transaction database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "transactions")]
pub struct Model {
    /// Unique identifier for the transaction
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    /// User whose wallet this entry credits or debits
    pub user_id: String,
    /// Entry type
    pub kind: TransactionKind,
    /// Non-negative amount; direction comes from `kind`
    #[sea_orm(column_type = "BigInteger")]
    pub amount: Money,
    /// Settlement status
    pub status: TransactionStatus,
    /// Typed payload
    #[sea_orm(column_type = "Json")]
    pub meta: TransactionMeta,
    /// When the entry was written
    pub created_at: DateTimeUtc,
    /// Last status change
    pub updated_at: DateTimeUtc,
}

impl Model {
    /// Signed effect this entry currently has on the wallet.
    ///
    /// A rejected withdrawal was refunded, so it nets to zero.
    #[must_use]
    pub fn wallet_effect(&self) -> Money {
        if self.kind.is_debit() {
            if self.status == TransactionStatus::Rejected {
                Money::ZERO
            } else {
                Money::ZERO - self.amount
            }
        } else {
            self.amount
        }
    }
}

/// Defines relationships between Transaction and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each transaction belongs to one user
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
