//! Shared test utilities for the referral ledger.
//!
//! This module provides common helper functions for setting up test databases
//! and creating users, packages and deposits with sensible defaults.

use crate::{
    config::{LedgerSettings, settings::PackageConfig},
    core::{
        auth::AdminContext,
        deposit::{self, NewDeposit},
        ledger,
        money::Money,
        package::{self, ActivationCharge},
        user::{self, NewUser, PayoutProfile},
    },
    entities::{self, transaction::TransactionMeta},
    errors::Result,
};
use sea_orm::DatabaseConnection;
use uuid::Uuid;

/// Creates an in-memory `SQLite` database with all tables initialized.
/// This is the standard setup for all integration tests.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("referral_ledger=debug")
        .try_init();
    let db = crate::config::database::create_connection("sqlite::memory:").await?;
    crate::config::database::create_tables(&db).await?;
    Ok(db)
}

/// Default settings without the registration bonus, so wallets start at zero.
pub fn test_settings() -> LedgerSettings {
    LedgerSettings {
        registration_bonus: Money::ZERO,
        ..LedgerSettings::default()
    }
}

/// Operator context used by admin operations in tests.
pub fn test_admin() -> AdminContext {
    AdminContext::for_tests("op_test")
}

/// Registers a user, optionally under `referrer`.
///
/// # Defaults
/// * `password_hash`: `"test-hash"`
/// * registration bonus: none
/// * `is_active`: false
pub async fn create_test_user(
    db: &DatabaseConnection,
    email: &str,
    referrer: Option<&entities::user::Model>,
) -> Result<entities::user::Model> {
    user::register_user(
        db,
        &test_settings(),
        NewUser {
            email: email.to_string(),
            password_hash: "test-hash".to_string(),
            referral_code: referrer.map(|r| r.invite_code.clone()),
            ..NewUser::default()
        },
    )
    .await
}

/// Builds a chain of `len` users where `chain[i]` was referred by `chain[i - 1]`.
pub async fn create_referral_chain(
    db: &DatabaseConnection,
    len: usize,
) -> Result<Vec<entities::user::Model>> {
    let run = Uuid::new_v4().simple().to_string();
    let mut chain: Vec<entities::user::Model> = Vec::with_capacity(len);
    for i in 0..len {
        let email = format!("chain{i}-{run}@example.com");
        let member = create_test_user(db, &email, chain.last()).await?;
        chain.push(member);
    }
    Ok(chain)
}

/// Credits `amount` as an operator bonus.
pub async fn fund_wallet(
    db: &DatabaseConnection,
    user_id: &str,
    amount: Money,
) -> Result<entities::transaction::Model> {
    let meta = TransactionMeta::Bonus {
        granted_by: "op_test".to_string(),
        note: Some("test funding".to_string()),
    };
    ledger::credit(db, user_id, amount, meta).await
}

/// Seeds a 90-day package named `"Test {id}"`.
pub async fn create_test_package(
    db: &DatabaseConnection,
    id: &str,
    price: Money,
    daily_claim: Money,
) -> Result<entities::package::Model> {
    package::seed_packages(
        db,
        &[PackageConfig {
            id: id.to_string(),
            name: format!("Test {id}"),
            price: price.as_decimal(),
            duration_days: 90,
            daily_claim: daily_claim.as_decimal(),
            locked: false,
        }],
    )
    .await?;
    package::get_package(db, id).await
}

/// Submits a pending deposit with a unique external reference.
pub async fn create_test_deposit(
    db: &DatabaseConnection,
    user_id: &str,
    amount: Money,
) -> Result<entities::deposit::Model> {
    deposit::submit_deposit(
        db,
        user_id,
        NewDeposit {
            amount,
            transaction_id: format!("TX-{}", Uuid::new_v4().simple()),
            method: Some("bank".to_string()),
            ..NewDeposit::default()
        },
    )
    .await
}

/// Fills in a complete payout profile.
pub async fn set_test_payout_profile(
    db: &DatabaseConnection,
    user_id: &str,
) -> Result<entities::user::Model> {
    user::update_payout_profile(
        db,
        user_id,
        PayoutProfile {
            name: Some("Test User".to_string()),
            payout_name: Some("Test User".to_string()),
            payout_method: Some("easypaisa".to_string()),
            payout_account: Some("03001234567".to_string()),
        },
    )
    .await
}

/// An active user with a payout profile, a plan and `referrals` direct referrals,
/// `depositing` of which have an approved deposit.
///
/// The wallet is left at zero: the plan is activated without charge and each
/// referral deposit is too small to pay a commission.
pub async fn create_withdrawal_ready_user(
    db: &DatabaseConnection,
    email: &str,
    referrals: usize,
    depositing: usize,
) -> Result<entities::user::Model> {
    let admin = test_admin();
    let ready = create_test_user(db, email, None).await?;
    user::set_banned(db, &admin, &ready.id, false).await?;
    set_test_payout_profile(db, &ready.id).await?;

    let plan_id = format!("plan-{}", Uuid::new_v4().simple());
    create_test_package(db, &plan_id, Money::from_major(200), Money::from_major(35)).await?;
    package::activate_package_for_user(db, &admin, &ready.id, &plan_id, ActivationCharge::None)
        .await?;

    for i in 0..referrals {
        let (local, domain) = email.split_once('@').unwrap_or((email, "example.com"));
        let member = create_test_user(db, &format!("{local}+ref{i}@{domain}"), Some(&ready)).await?;
        if i < depositing {
            let request = create_test_deposit(db, &member.id, Money::from_minor(1)).await?;
            deposit::approve_deposit(db, &admin, &request.id).await?;
        }
    }
    ledger::find_user(db, &ready.id).await
}
