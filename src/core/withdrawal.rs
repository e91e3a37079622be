//! Withdrawal gate and settlement.
//!
//! A request debits the full amount at once and leaves a `pending` withdraw row
//! carrying the payout snapshot, fee and net amount. Operators then move it
//! `pending -> approved -> sent -> completed`, or reject it from any non-terminal
//! state, which returns the full amount to the wallet.

use crate::{
    config::LedgerSettings,
    core::{auth::AdminContext, ledger, money::Money, package, user as users},
    entities::{
        Transaction, transaction,
        transaction::{TransactionKind, TransactionMeta, TransactionStatus},
    },
    errors::{Error, Result},
};
use chrono::Utc;
use sea_orm::{
    ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, TransactionTrait,
    sea_query::Expr,
};
use tracing::{info, instrument, warn};

/// Evaluates the withdrawal gate and, when it passes, debits the wallet and records a
/// pending withdrawal.
///
/// Checks run in this order and the first failure is returned: account active,
/// payout profile complete, minimum amount, active plan, referral quota, balance.
#[instrument(skip(db, settings))]
pub async fn request_withdrawal<C>(
    db: &C,
    settings: &LedgerSettings,
    user_id: &str,
    amount: Money,
) -> Result<transaction::Model>
where
    C: ConnectionTrait + TransactionTrait,
{
    if !amount.is_positive() {
        return Err(Error::InvalidAmount { amount });
    }

    let txn = db.begin().await?;
    let user = ledger::find_user(&txn, user_id).await?;
    if !user.is_active {
        return Err(Error::AccountInactive { user_id: user.id });
    }
    if !user.has_payout_details() {
        return Err(Error::ProfileIncomplete { user_id: user.id });
    }
    if amount < settings.minimum_withdrawal {
        return Err(Error::BelowMinimumWithdrawal {
            amount,
            minimum: settings.minimum_withdrawal,
        });
    }
    if package::active_plan(&txn, user_id, Utc::now()).await?.is_none() {
        return Err(Error::NoActivePlan { user_id: user.id });
    }

    let referrals = users::count_direct_referrals(&txn, user_id).await?;
    let active = if referrals >= settings.required_referrals {
        users::count_active_referrals(&txn, user_id).await?
    } else {
        0
    };
    if referrals < settings.required_referrals || active < settings.required_active_referrals {
        warn!(user_id, referrals, active, "Withdrawal locked by referral quota");
        return Err(Error::WithdrawalLocked { referrals, active });
    }

    if user.wallet < amount {
        return Err(Error::InsufficientFunds {
            balance: user.wallet,
            required: amount,
            shortfall: amount.saturating_shortfall(user.wallet),
        });
    }

    let fee = amount.apply_rate(settings.withdrawal_fee);
    let meta = TransactionMeta::Withdraw {
        payout_name: user.payout_name.unwrap_or_default(),
        payout_method: user.payout_method.unwrap_or_default(),
        payout_account: user.payout_account.unwrap_or_default(),
        fee,
        net: amount - fee,
    };
    let entry = ledger::debit(&txn, user_id, amount, meta, TransactionStatus::Pending).await?;
    txn.commit().await?;

    info!(user_id, transaction_id = %entry.id, %amount, %fee, "Withdrawal requested");
    Ok(entry)
}

async fn transition<C>(
    db: &C,
    ctx: &AdminContext,
    transaction_id: &str,
    from: &[TransactionStatus],
    to: TransactionStatus,
) -> Result<transaction::Model>
where
    C: ConnectionTrait + TransactionTrait,
{
    let txn = db.begin().await?;
    let entry = ledger::get_transaction_by_id(&txn, transaction_id)
        .await?
        .ok_or_else(|| Error::not_found("transaction", transaction_id))?;
    if entry.kind != TransactionKind::Withdraw {
        return Err(Error::NotAWithdrawal {
            transaction_id: entry.id,
        });
    }

    let moved = Transaction::update_many()
        .col_expr(transaction::Column::Status, Expr::value(to))
        .col_expr(transaction::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(transaction::Column::Id.eq(entry.id.as_str()))
        .filter(transaction::Column::Status.is_in(from.iter().copied()))
        .exec(&txn)
        .await?;
    if moved.rows_affected == 0 {
        return Err(Error::InvalidTransition {
            entity: "withdrawal",
            id: entry.id,
            from: entry.status.as_str().to_string(),
            to: to.as_str().to_string(),
        });
    }
    if to == TransactionStatus::Rejected {
        ledger::reverse_debit(&txn, &entry).await?;
    }
    txn.commit().await?;

    info!(
        actor = ctx.actor_id(),
        transaction_id,
        from = entry.status.as_str(),
        to = to.as_str(),
        "Withdrawal moved"
    );
    ledger::get_transaction_by_id(db, transaction_id)
        .await?
        .ok_or_else(|| Error::not_found("transaction", transaction_id))
}

/// `pending -> approved`; no balance change.
pub async fn approve_withdrawal<C>(
    db: &C,
    ctx: &AdminContext,
    transaction_id: &str,
) -> Result<transaction::Model>
where
    C: ConnectionTrait + TransactionTrait,
{
    transition(
        db,
        ctx,
        transaction_id,
        &[TransactionStatus::Pending],
        TransactionStatus::Approved,
    )
    .await
}

/// `approved -> sent`; the payout left the platform.
pub async fn mark_withdrawal_sent<C>(
    db: &C,
    ctx: &AdminContext,
    transaction_id: &str,
) -> Result<transaction::Model>
where
    C: ConnectionTrait + TransactionTrait,
{
    transition(
        db,
        ctx,
        transaction_id,
        &[TransactionStatus::Approved],
        TransactionStatus::Sent,
    )
    .await
}

/// `sent -> completed`; terminal.
pub async fn complete_withdrawal<C>(
    db: &C,
    ctx: &AdminContext,
    transaction_id: &str,
) -> Result<transaction::Model>
where
    C: ConnectionTrait + TransactionTrait,
{
    transition(
        db,
        ctx,
        transaction_id,
        &[TransactionStatus::Sent],
        TransactionStatus::Completed,
    )
    .await
}

/// Any non-terminal state `-> rejected`, refunding the full amount.
pub async fn reject_withdrawal<C>(
    db: &C,
    ctx: &AdminContext,
    transaction_id: &str,
) -> Result<transaction::Model>
where
    C: ConnectionTrait + TransactionTrait,
{
    transition(
        db,
        ctx,
        transaction_id,
        &[
            TransactionStatus::Pending,
            TransactionStatus::Approved,
            TransactionStatus::Sent,
        ],
        TransactionStatus::Rejected,
    )
    .await
}

/// Withdrawals, newest first, optionally narrowed to one status.
pub async fn list_withdrawals<C>(
    db: &C,
    status: Option<TransactionStatus>,
) -> Result<Vec<transaction::Model>>
where
    C: ConnectionTrait,
{
    let mut query = Transaction::find()
        .filter(transaction::Column::Kind.eq(TransactionKind::Withdraw))
        .order_by_desc(transaction::Column::CreatedAt);
    if let Some(status) = status {
        query = query.filter(transaction::Column::Status.eq(status));
    }
    query.all(db).await.map_err(Into::into)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::core::report;
    use crate::test_utils::*;
    use sea_orm::DatabaseConnection;

    async fn wallet(db: &DatabaseConnection, user_id: &str) -> Result<Money> {
        Ok(ledger::find_user(db, user_id).await?.wallet)
    }

    #[tokio::test]
    async fn test_referral_quota_locks_before_balance() -> Result<()> {
        let db = setup_test_db().await?;
        let settings = test_settings();
        let c = create_withdrawal_ready_user(&db, "c@example.com", 2, 0).await?;
        fund_wallet(&db, &c.id, Money::from_major(25)).await?;

        let result = request_withdrawal(&db, &settings, &c.id, Money::from_major(30)).await;
        let err = result.unwrap_err();
        assert_eq!(err.code(), "WITHDRAWAL_LOCKED");
        assert!(matches!(err, Error::WithdrawalLocked { referrals: 2, active: 0 }));
        assert_eq!(wallet(&db, &c.id).await?, Money::from_major(25));
        Ok(())
    }

    #[tokio::test]
    async fn test_quota_needs_a_depositing_referral() -> Result<()> {
        let db = setup_test_db().await?;
        let settings = test_settings();
        let user = create_withdrawal_ready_user(&db, "idle@example.com", 3, 0).await?;
        fund_wallet(&db, &user.id, Money::from_major(100)).await?;

        assert!(matches!(
            request_withdrawal(&db, &settings, &user.id, Money::from_major(50)).await,
            Err(Error::WithdrawalLocked { referrals: 3, active: 0 })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_gate_order() -> Result<()> {
        let db = setup_test_db().await?;
        let settings = test_settings();
        let admin = test_admin();

        let inactive = create_test_user(&db, "inactive@example.com", None).await?;
        assert!(matches!(
            request_withdrawal(&db, &settings, &inactive.id, Money::from_major(30)).await,
            Err(Error::AccountInactive { .. })
        ));

        crate::core::user::set_banned(&db, &admin, &inactive.id, false).await?;
        assert!(matches!(
            request_withdrawal(&db, &settings, &inactive.id, Money::from_major(30)).await,
            Err(Error::ProfileIncomplete { .. })
        ));
        crate::core::user::update_payout_profile(
            &db,
            &inactive.id,
            crate::core::user::PayoutProfile {
                payout_name: Some("Half Done".to_string()),
                payout_method: Some("easypaisa".to_string()),
                payout_account: Some("   ".to_string()),
                ..Default::default()
            },
        )
        .await?;
        assert!(matches!(
            request_withdrawal(&db, &settings, &inactive.id, Money::from_major(30)).await,
            Err(Error::ProfileIncomplete { .. })
        ));

        let ready = create_withdrawal_ready_user(&db, "ready@example.com", 3, 1).await?;
        fund_wallet(&db, &ready.id, Money::from_major(40)).await?;
        assert!(matches!(
            request_withdrawal(&db, &settings, &ready.id, Money::from_major(29)).await,
            Err(Error::BelowMinimumWithdrawal { .. })
        ));
        assert!(matches!(
            request_withdrawal(&db, &settings, &ready.id, Money::from_major(50)).await,
            Err(Error::InsufficientFunds { shortfall, .. }) if shortfall == Money::from_major(10)
        ));
        assert!(matches!(
            request_withdrawal(&db, &settings, &ready.id, Money::ZERO).await,
            Err(Error::InvalidAmount { .. })
        ));
        assert_eq!(wallet(&db, &ready.id).await?, Money::from_major(40));
        Ok(())
    }

    #[tokio::test]
    async fn test_no_active_plan() -> Result<()> {
        let db = setup_test_db().await?;
        let settings = test_settings();
        let admin = test_admin();
        let user = create_test_user(&db, "noplan@example.com", None).await?;
        crate::core::user::set_banned(&db, &admin, &user.id, false).await?;
        set_test_payout_profile(&db, &user.id).await?;
        fund_wallet(&db, &user.id, Money::from_major(100)).await?;

        assert!(matches!(
            request_withdrawal(&db, &settings, &user.id, Money::from_major(50)).await,
            Err(Error::NoActivePlan { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_full_settlement_path() -> Result<()> {
        let db = setup_test_db().await?;
        let settings = test_settings();
        let admin = test_admin();
        let user = create_withdrawal_ready_user(&db, "settle@example.com", 3, 1).await?;
        fund_wallet(&db, &user.id, Money::from_major(100)).await?;

        let entry = request_withdrawal(&db, &settings, &user.id, Money::from_major(100)).await?;
        assert_eq!(entry.status, TransactionStatus::Pending);
        assert_eq!(entry.amount, Money::from_major(100));
        assert!(matches!(
            entry.meta,
            TransactionMeta::Withdraw { fee, net, ref payout_account, .. }
                if fee == Money::from_major(15)
                    && net == Money::from_major(85)
                    && payout_account == "03001234567"
        ));
        assert_eq!(wallet(&db, &user.id).await?, Money::ZERO);

        // out of order
        assert!(matches!(
            complete_withdrawal(&db, &admin, &entry.id).await,
            Err(Error::InvalidTransition { .. })
        ));

        approve_withdrawal(&db, &admin, &entry.id).await?;
        mark_withdrawal_sent(&db, &admin, &entry.id).await?;
        let done = complete_withdrawal(&db, &admin, &entry.id).await?;
        assert_eq!(done.status, TransactionStatus::Completed);
        assert_eq!(wallet(&db, &user.id).await?, Money::ZERO);

        assert!(matches!(
            reject_withdrawal(&db, &admin, &entry.id).await,
            Err(Error::InvalidTransition { .. })
        ));
        assert_eq!(
            list_withdrawals(&db, Some(TransactionStatus::Completed)).await?.len(),
            1
        );
        assert!(report::audit_wallet(&db, &user.id).await?.is_consistent());
        Ok(())
    }

    #[tokio::test]
    async fn test_reject_refunds_once() -> Result<()> {
        let db = setup_test_db().await?;
        let settings = test_settings();
        let admin = test_admin();
        let user = create_withdrawal_ready_user(&db, "refund@example.com", 3, 1).await?;
        fund_wallet(&db, &user.id, Money::from_major(80)).await?;

        let entry = request_withdrawal(&db, &settings, &user.id, Money::from_major(60)).await?;
        approve_withdrawal(&db, &admin, &entry.id).await?;
        let rejected = reject_withdrawal(&db, &admin, &entry.id).await?;
        assert_eq!(rejected.status, TransactionStatus::Rejected);
        assert_eq!(wallet(&db, &user.id).await?, Money::from_major(80));

        assert!(matches!(
            reject_withdrawal(&db, &admin, &entry.id).await,
            Err(Error::InvalidTransition { .. })
        ));
        assert_eq!(wallet(&db, &user.id).await?, Money::from_major(80));
        assert!(report::audit_wallet(&db, &user.id).await?.is_consistent());
        Ok(())
    }

    #[tokio::test]
    async fn test_only_withdrawals_can_move() -> Result<()> {
        let db = setup_test_db().await?;
        let admin = test_admin();
        let user = create_test_user(&db, "bonus@example.com", None).await?;
        let bonus = fund_wallet(&db, &user.id, Money::from_major(10)).await?;

        assert!(matches!(
            approve_withdrawal(&db, &admin, &bonus.id).await,
            Err(Error::NotAWithdrawal { .. })
        ));
        assert!(matches!(
            reject_withdrawal(&db, &admin, &bonus.id).await,
            Err(Error::NotAWithdrawal { .. })
        ));
        assert!(matches!(
            approve_withdrawal(&db, &admin, "tx_missing").await,
            Err(Error::NotFound { .. })
        ));
        assert_eq!(wallet(&db, &user.id).await?, Money::from_major(10));
        Ok(())
    }
}
