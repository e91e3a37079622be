/// Operator credentials and the admin context that gates privileged operations
pub mod auth;
/// Multi-level referral commission schedules and cascade
pub mod commission;
/// Deposit submission and operator approval
pub mod deposit;
/// Paired wallet mutations and the transaction history
pub mod ledger;
/// Fixed-point currency and basis-point rates
pub mod money;
/// Package catalogue, purchases, daily claims and reconciliation
pub mod package;
/// Read-only summaries and wallet audits
pub mod report;
/// Paid tasks
pub mod task;
/// Registration, profiles and the referral tree
pub mod user;
/// Withdrawal gate and settlement
pub mod withdrawal;
