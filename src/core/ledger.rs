//! Wallet primitives - the only code that writes `users.wallet`.
//!
//! Every balance change goes through [`credit`] or [`debit`], which pair the change
//! with the ledger row describing it. Both take any `ConnectionTrait`, so callers run
//! them inside their own `DatabaseTransaction` and the pair commits or rolls back
//! together. Balance arithmetic happens in a single `UPDATE ... SET wallet = wallet ± x`
//! statement so concurrent writers never overwrite each other; debits additionally
//! require `wallet >= x` in the same statement, which keeps wallets non-negative.

use crate::{
    core::money::Money,
    entities::{
        Transaction, User, transaction,
        transaction::{TransactionMeta, TransactionStatus},
        user,
    },
    errors::{Error, Result},
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, sea_query::Expr,
};
use tracing::{debug, info};
use uuid::Uuid;

/// Generates a prefixed random identifier (`"tx_3f2a..."`).
pub(crate) fn new_id(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::new_v4().simple())
}

/// Loads a user or fails with `NotFound`.
pub async fn find_user<C>(db: &C, user_id: &str) -> Result<user::Model>
where
    C: ConnectionTrait,
{
    User::find_by_id(user_id.to_string())
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("user", user_id))
}

const fn ensure_positive(amount: Money) -> Result<()> {
    if amount.is_positive() {
        Ok(())
    } else {
        Err(Error::InvalidAmount { amount })
    }
}

/// Adds `amount` to the wallet and appends the matching ledger row.
pub(crate) async fn credit<C>(
    db: &C,
    user_id: &str,
    amount: Money,
    meta: TransactionMeta,
) -> Result<transaction::Model>
where
    C: ConnectionTrait,
{
    ensure_positive(amount)?;
    debug_assert!(!meta.kind().is_debit(), "credit called with a debit kind");

    let updated = User::update_many()
        .col_expr(
            user::Column::Wallet,
            Expr::col(user::Column::Wallet).add(amount.minor()),
        )
        .filter(user::Column::Id.eq(user_id))
        .exec(db)
        .await?;
    if updated.rows_affected == 0 {
        return Err(Error::not_found("user", user_id));
    }

    let entry = record(db, user_id, amount, meta, TransactionStatus::Completed).await?;
    info!(
        user_id,
        kind = ?entry.kind,
        %amount,
        transaction_id = %entry.id,
        "Wallet credited"
    );
    Ok(entry)
}

/// Takes `amount` out of the wallet and appends the matching ledger row.
///
/// Fails with `InsufficientFunds` (carrying the shortfall) when the wallet cannot
/// cover the amount at the moment of the write.
pub(crate) async fn debit<C>(
    db: &C,
    user_id: &str,
    amount: Money,
    meta: TransactionMeta,
    status: TransactionStatus,
) -> Result<transaction::Model>
where
    C: ConnectionTrait,
{
    ensure_positive(amount)?;
    debug_assert!(meta.kind().is_debit(), "debit called with a credit kind");

    let updated = User::update_many()
        .col_expr(
            user::Column::Wallet,
            Expr::col(user::Column::Wallet).sub(amount.minor()),
        )
        .filter(user::Column::Id.eq(user_id))
        .filter(user::Column::Wallet.gte(amount.minor()))
        .exec(db)
        .await?;
    if updated.rows_affected == 0 {
        let user = find_user(db, user_id).await?;
        return Err(Error::InsufficientFunds {
            balance: user.wallet,
            required: amount,
            shortfall: amount.saturating_shortfall(user.wallet),
        });
    }

    let entry = record(db, user_id, amount, meta, status).await?;
    info!(
        user_id,
        kind = ?entry.kind,
        %amount,
        transaction_id = %entry.id,
        "Wallet debited"
    );
    Ok(entry)
}

/// Returns a previously debited amount to the wallet.
///
/// No new row is written: the caller flips the original debit row to a status whose
/// wallet effect is zero (a rejected withdrawal), in the same atomic unit.
pub(crate) async fn reverse_debit<C>(db: &C, entry: &transaction::Model) -> Result<()>
where
    C: ConnectionTrait,
{
    let updated = User::update_many()
        .col_expr(
            user::Column::Wallet,
            Expr::col(user::Column::Wallet).add(entry.amount.minor()),
        )
        .filter(user::Column::Id.eq(entry.user_id.as_str()))
        .exec(db)
        .await?;
    if updated.rows_affected == 0 {
        return Err(Error::not_found("user", entry.user_id.as_str()));
    }
    info!(
        user_id = %entry.user_id,
        amount = %entry.amount,
        transaction_id = %entry.id,
        "Debit reversed"
    );
    Ok(())
}

async fn record<C>(
    db: &C,
    user_id: &str,
    amount: Money,
    meta: TransactionMeta,
    status: TransactionStatus,
) -> Result<transaction::Model>
where
    C: ConnectionTrait,
{
    let now = Utc::now();
    let entry = transaction::ActiveModel {
        id: Set(new_id("tx")),
        user_id: Set(user_id.to_string()),
        kind: Set(meta.kind()),
        amount: Set(amount),
        status: Set(status),
        meta: Set(meta),
        created_at: Set(now),
        updated_at: Set(now),
    };
    let entry = entry.insert(db).await?;
    debug!(transaction_id = %entry.id, "Ledger row appended");
    Ok(entry)
}

/// Retrieves a user's ledger, newest first.
pub async fn get_transactions_for_user<C>(db: &C, user_id: &str) -> Result<Vec<transaction::Model>>
where
    C: ConnectionTrait,
{
    Transaction::find()
        .filter(transaction::Column::UserId.eq(user_id))
        .order_by_desc(transaction::Column::CreatedAt)
        .all(db)
        .await
        .map_err(Into::into)
}

/// The most recent `limit` ledger rows across all users, newest first.
pub async fn list_transactions<C>(db: &C, limit: u64) -> Result<Vec<transaction::Model>>
where
    C: ConnectionTrait,
{
    Transaction::find()
        .order_by_desc(transaction::Column::CreatedAt)
        .limit(limit)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Retrieves a specific ledger row by id.
pub async fn get_transaction_by_id<C>(
    db: &C,
    transaction_id: &str,
) -> Result<Option<transaction::Model>>
where
    C: ConnectionTrait,
{
    Transaction::find_by_id(transaction_id.to_string())
        .one(db)
        .await
        .map_err(Into::into)
}

/// Sum of the current wallet effects of every ledger row of a user.
pub async fn derived_balance<C>(db: &C, user_id: &str) -> Result<Money>
where
    C: ConnectionTrait,
{
    Ok(get_transactions_for_user(db, user_id)
        .await?
        .iter()
        .map(transaction::Model::wallet_effect)
        .sum())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::entities::transaction::TransactionKind;
    use crate::test_utils::*;

    fn bonus() -> TransactionMeta {
        TransactionMeta::Bonus {
            granted_by: "op_test".to_string(),
            note: None,
        }
    }

    fn withdrawal() -> TransactionMeta {
        TransactionMeta::Withdraw {
            payout_name: "A".to_string(),
            payout_method: "bank".to_string(),
            payout_account: "123".to_string(),
            fee: Money::ZERO,
            net: Money::ZERO,
        }
    }

    #[tokio::test]
    async fn test_credit_pairs_balance_and_row() -> Result<()> {
        let db = setup_test_db().await?;
        let user = create_test_user(&db, "credit@example.com", None).await?;

        let entry = credit(&db, &user.id, Money::from_major(40), bonus()).await?;
        assert_eq!(entry.kind, TransactionKind::Bonus);
        assert_eq!(entry.status, TransactionStatus::Completed);

        let user = find_user(&db, &user.id).await?;
        assert_eq!(user.wallet, Money::from_major(40));
        assert_eq!(derived_balance(&db, &user.id).await?, user.wallet);
        Ok(())
    }

    #[tokio::test]
    async fn test_debit_rejects_overdraft_with_shortfall() -> Result<()> {
        let db = setup_test_db().await?;
        let user = create_test_user(&db, "debit@example.com", None).await?;
        fund_wallet(&db, &user.id, Money::from_major(25)).await?;

        let result = debit(
            &db,
            &user.id,
            Money::from_major(30),
            withdrawal(),
            TransactionStatus::Pending,
        )
        .await;
        assert!(matches!(
            result,
            Err(Error::InsufficientFunds { shortfall, .. }) if shortfall == Money::from_major(5)
        ));

        // nothing written
        let user = find_user(&db, &user.id).await?;
        assert_eq!(user.wallet, Money::from_major(25));
        assert_eq!(get_transactions_for_user(&db, &user.id).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_zero_and_unknown_user_rejected() -> Result<()> {
        let db = setup_test_db().await?;
        assert!(matches!(
            credit(&db, "nobody", Money::ZERO, bonus()).await,
            Err(Error::InvalidAmount { .. })
        ));
        assert!(matches!(
            credit(&db, "nobody", Money::from_major(1), bonus()).await,
            Err(Error::NotFound { entity: "user", .. })
        ));
        assert!(get_transaction_by_id(&db, "tx_missing").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_list_transactions_spans_users() -> Result<()> {
        let db = setup_test_db().await?;
        let a = create_test_user(&db, "list-a@example.com", None).await?;
        let b = create_test_user(&db, "list-b@example.com", None).await?;
        fund_wallet(&db, &a.id, Money::from_major(5)).await?;
        fund_wallet(&db, &b.id, Money::from_major(7)).await?;

        let all = list_transactions(&db, 10).await?;
        assert_eq!(all.len(), 2);
        assert!(all.windows(2).all(|w| w[0].created_at >= w[1].created_at));
        assert!(all.iter().any(|t| t.user_id == a.id));
        assert!(all.iter().any(|t| t.user_id == b.id));
        assert_eq!(list_transactions(&db, 1).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_reverse_debit_nets_out_with_rejected_status() -> Result<()> {
        let db = setup_test_db().await?;
        let user = create_test_user(&db, "reverse@example.com", None).await?;
        fund_wallet(&db, &user.id, Money::from_major(100)).await?;

        let entry = debit(
            &db,
            &user.id,
            Money::from_major(60),
            withdrawal(),
            TransactionStatus::Pending,
        )
        .await?;
        assert_eq!(find_user(&db, &user.id).await?.wallet, Money::from_major(40));

        reverse_debit(&db, &entry).await?;
        let mut rejected: transaction::ActiveModel = entry.into();
        rejected.status = Set(TransactionStatus::Rejected);
        rejected.update(&db).await?;

        let user = find_user(&db, &user.id).await?;
        assert_eq!(user.wallet, Money::from_major(100));
        assert_eq!(derived_balance(&db, &user.id).await?, user.wallet);
        Ok(())
    }
}
