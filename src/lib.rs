//! `referral-ledger` - wallet ledger and commission engine for a referral investment platform
//!
//! Users fund a wallet through operator-approved deposits, buy time-limited packages
//! that pay a daily reward, and earn commissions from up to four levels of their
//! referral tree. Every wallet change is paired with an append-only transaction row
//! in the same database transaction, and withdrawals go through a gated,
//! operator-driven settlement state machine.

// Deny the most critical lints that could lead to bugs or security issues
#![deny(
    unsafe_code,
    unreachable_code,
    unreachable_patterns,
    unused_must_use,
    rustdoc::broken_intra_doc_links,
    rustdoc::private_intra_doc_links,
)]
#![warn(
    missing_docs,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::clone_on_ref_ptr,
    clippy::dbg_macro,
    clippy::expect_used,
    clippy::float_cmp,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::unwrap_used,
    clippy::large_enum_variant,
    clippy::match_same_arms,
    clippy::too_many_lines,
    clippy::redundant_closure_for_method_calls,
    clippy::semicolon_if_nothing_returned,
    future_incompatible,
    rust_2018_idioms,
)]
// Every public operation returns the crate `Result`; failure modes live on `Error`.
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

// `missing_docs` only warns: `DeriveEntityModel` generates undocumented items.

/// Configuration management for database and application settings
pub mod config;
/// Core business logic - ledger, commissions, packages, deposits, withdrawals and reports
pub mod core;
/// SeaORM entity definitions for database tables
pub mod entities;
/// Unified error types and result handling
pub mod errors;

#[cfg(test)]
pub mod test_utils;
