//! Unified error type for the ledger.
//!
//! Every core operation returns [`Result`]. Variants are split so that callers can
//! branch on the failure (show the shortfall, show referral counts, retry later)
//! instead of treating everything as an opaque server error. [`Error::kind`] groups
//! them for transport mapping and [`Error::code`] gives a stable machine code.

use crate::core::money::Money;
use sea_orm::DbErr;
use thiserror::Error;

/// Errors produced by ledger operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration could not be read or is inconsistent
    #[error("Configuration error: {message}")]
    Config {
        /// What went wrong
        message: String,
    },

    /// The underlying store failed; the surrounding atomic unit was rolled back
    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    /// I/O failure while reading configuration
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An amount was zero, negative or otherwise unusable
    #[error("Invalid amount: {amount}")]
    InvalidAmount {
        /// The rejected amount
        amount: Money,
    },

    /// Caller-supplied input failed validation
    #[error("Invalid input: {message}")]
    Validation {
        /// Human readable description
        message: String,
    },

    /// A referenced row does not exist
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of row (`user`, `package`, ...)
        entity: &'static str,
        /// Identifier that was looked up
        id: String,
    },

    /// The wallet cannot cover the requested debit
    #[error("Insufficient funds: balance {balance}, required {required} (short by {shortfall})")]
    InsufficientFunds {
        /// Wallet balance at evaluation time
        balance: Money,
        /// Amount that was needed
        required: Money,
        /// `required - balance`
        shortfall: Money,
    },

    /// The package is disabled for purchase
    #[error("Package {package_id} is locked")]
    PackageLocked {
        /// Locked package
        package_id: String,
    },

    /// The purchased package has passed its expiry
    #[error("Package {user_package_id} expired")]
    PackageExpired {
        /// Expired purchase
        user_package_id: String,
    },

    /// A claim was already recorded for this purchase on the current UTC day
    #[error("Already claimed today for package {user_package_id}")]
    AlreadyClaimedToday {
        /// Purchase that was already claimed
        user_package_id: String,
    },

    /// The package pays nothing per day
    #[error("No daily reward for package {package_id}")]
    NoDailyReward {
        /// Package without a reward
        package_id: String,
    },

    /// The account is not active (never funded, or banned)
    #[error("Account {user_id} is not active")]
    AccountInactive {
        /// Inactive user
        user_id: String,
    },

    /// Payout details are missing from the profile
    #[error("Payout details are incomplete for {user_id}")]
    ProfileIncomplete {
        /// User lacking payout details
        user_id: String,
    },

    /// Withdrawal below the configured minimum
    #[error("Minimum withdrawal is {minimum}, requested {amount}")]
    BelowMinimumWithdrawal {
        /// Requested amount
        amount: Money,
        /// Configured minimum
        minimum: Money,
    },

    /// The user holds no unexpired package
    #[error("User {user_id} has no active plan")]
    NoActivePlan {
        /// User without a plan
        user_id: String,
    },

    /// Referral quota for withdrawals is not met
    #[error("Withdrawal is locked: {referrals} referrals, {active} active")]
    WithdrawalLocked {
        /// Direct referrals
        referrals: u64,
        /// Direct referrals with at least one approved deposit
        active: u64,
    },

    /// A state machine was asked to move along an edge it does not have
    #[error("Cannot move {entity} {id} from {from} to {to}")]
    InvalidTransition {
        /// Kind of row (`deposit`, `withdrawal`)
        entity: &'static str,
        /// Row id
        id: String,
        /// Current state
        from: String,
        /// Requested state
        to: String,
    },

    /// A withdrawal transition targeted another transaction kind
    #[error("Transaction {transaction_id} is not a withdrawal")]
    NotAWithdrawal {
        /// Offending transaction
        transaction_id: String,
    },

    /// Email already registered
    #[error("A user with email {email} already exists")]
    DuplicateEmail {
        /// Conflicting email
        email: String,
    },

    /// Linking would make the referral tree cyclic
    #[error("Linking {referee} under {referrer} would create a referral cycle")]
    ReferralCycle {
        /// Prospective parent
        referrer: String,
        /// Prospective child
        referee: String,
    },

    /// The user already has a different referrer
    #[error("User {user_id} already has a referrer")]
    AlreadyReferred {
        /// User that already has a parent
        user_id: String,
    },

    /// The caller is not allowed to perform the action
    #[error("Unauthorized: {reason}")]
    Unauthorized {
        /// Why authorization failed
        reason: String,
    },
}

/// Coarse classification used by transport layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input; nothing was mutated
    Validation,
    /// Business precondition not met; nothing was mutated
    Precondition,
    /// Referenced row missing
    NotFound,
    /// Missing or revoked credentials
    Unauthorized,
    /// Store or configuration failure; the atomic unit was rolled back
    Integrity,
}

impl Error {
    /// Classifies the error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidAmount { .. } | Self::Validation { .. } => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Unauthorized { .. } => ErrorKind::Unauthorized,
            Self::Config { .. } | Self::Database(_) | Self::Io(_) => ErrorKind::Integrity,
            Self::InsufficientFunds { .. }
            | Self::PackageLocked { .. }
            | Self::PackageExpired { .. }
            | Self::AlreadyClaimedToday { .. }
            | Self::NoDailyReward { .. }
            | Self::AccountInactive { .. }
            | Self::ProfileIncomplete { .. }
            | Self::BelowMinimumWithdrawal { .. }
            | Self::NoActivePlan { .. }
            | Self::WithdrawalLocked { .. }
            | Self::InvalidTransition { .. }
            | Self::NotAWithdrawal { .. }
            | Self::DuplicateEmail { .. }
            | Self::ReferralCycle { .. }
            | Self::AlreadyReferred { .. } => ErrorKind::Precondition,
        }
    }

    /// Stable machine-readable code for clients.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Config { .. } | Self::Database(_) | Self::Io(_) => "server",
            Self::InvalidAmount { .. } => "invalid_amount",
            Self::Validation { .. } => "invalid_input",
            Self::NotFound { .. } => "not_found",
            Self::InsufficientFunds { .. } => "insufficient_funds",
            Self::PackageLocked { .. } => "package_locked",
            Self::PackageExpired { .. } => "package_expired",
            Self::AlreadyClaimedToday { .. } => "already_claimed_today",
            Self::NoDailyReward { .. } => "no_daily_reward",
            Self::AccountInactive { .. } => "account_inactive",
            Self::ProfileIncomplete { .. } => "profile_incomplete",
            Self::BelowMinimumWithdrawal { .. } => "below_minimum_withdrawal",
            Self::NoActivePlan { .. } => "no_active_plan",
            Self::WithdrawalLocked { .. } => "WITHDRAWAL_LOCKED",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::NotAWithdrawal { .. } => "not_a_withdrawal",
            Self::DuplicateEmail { .. } => "user_exists",
            Self::ReferralCycle { .. } => "referral_cycle",
            Self::AlreadyReferred { .. } => "referee_already_has_referrer",
            Self::Unauthorized { .. } => "unauthorized",
        }
    }

    pub(crate) fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }
}

/// Convenience `Result` type
pub type Result<T> = std::result::Result<T, Error>;
