//! Deposit approval workflow.
//!
//! A deposit is submitted `pending` and moved exactly once, by an operator, to
//! `approved` or `rejected`. Both transitions are compare-and-swap updates on the
//! current status, so approving twice fails instead of crediting twice.
//!
//! Approval commits the status change, the wallet credit, its `deposit` ledger row
//! and account activation together. The deposit commission cascade runs after that
//! commit and only for the user's first approved deposit; a failing level stops the
//! cascade but keeps the levels already paid.

use crate::{
    core::{
        auth::AdminContext,
        commission::{self, CommissionCredit, CommissionTrigger, DepositCommission, FailurePolicy},
        ledger,
        money::Money,
        package,
    },
    entities::{
        Deposit, User, deposit,
        deposit::DepositStatus,
        transaction,
        transaction::{CommissionSource, TransactionMeta},
        user,
    },
    errors::{Error, Result},
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait, sea_query::Expr,
};
use serde::Serialize;
use tracing::{info, instrument};

/// Structured fields of a deposit request, as received from the intake boundary.
#[derive(Debug, Clone, Default)]
pub struct NewDeposit {
    /// Amount paid in
    pub amount: Money,
    /// External payment reference
    pub transaction_id: String,
    /// Name on the paying account
    pub account_holder: Option<String>,
    /// Payment method
    pub method: Option<String>,
    /// Package the user intends to buy
    pub package_id: Option<String>,
    /// Reference to the stored proof
    pub screenshot: Option<String>,
    /// Submitting address
    pub submit_ip: Option<String>,
}

/// An approved deposit.
#[derive(Debug, Clone, Serialize)]
pub struct DepositApproval {
    /// Deposit after approval
    pub deposit: deposit::Model,
    /// `deposit` ledger row
    pub transaction: transaction::Model,
    /// True when this was the user's first approved deposit
    pub first_deposit: bool,
    /// Deposit commissions paid up the chain
    pub commissions: Vec<CommissionCredit>,
}

/// Records a pending deposit request.
pub async fn submit_deposit<C>(db: &C, user_id: &str, request: NewDeposit) -> Result<deposit::Model>
where
    C: ConnectionTrait,
{
    if !request.amount.is_positive() {
        return Err(Error::InvalidAmount {
            amount: request.amount,
        });
    }
    let reference = request.transaction_id.trim();
    if reference.is_empty() {
        return Err(Error::Validation {
            message: "Payment reference is required".to_string(),
        });
    }
    ledger::find_user(db, user_id).await?;
    if let Some(package_id) = request.package_id.as_deref() {
        package::get_package(db, package_id).await?;
    }

    let now = Utc::now();
    let deposit = deposit::ActiveModel {
        id: Set(ledger::new_id("dep")),
        user_id: Set(user_id.to_string()),
        account_holder: Set(request.account_holder),
        transaction_id: Set(reference.to_string()),
        amount: Set(request.amount),
        method: Set(request.method),
        package_id: Set(request.package_id),
        screenshot: Set(request.screenshot),
        status: Set(DepositStatus::Pending),
        submit_ip: Set(request.submit_ip),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await?;

    info!(deposit_id = %deposit.id, user_id, amount = %deposit.amount, "Deposit submitted");
    Ok(deposit)
}

/// Loads a deposit or fails with `NotFound`.
pub async fn get_deposit<C>(db: &C, deposit_id: &str) -> Result<deposit::Model>
where
    C: ConnectionTrait,
{
    Deposit::find_by_id(deposit_id.to_string())
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("deposit", deposit_id))
}

async fn move_from_pending<C>(db: &C, current: &deposit::Model, to: DepositStatus) -> Result<()>
where
    C: ConnectionTrait,
{
    let moved = Deposit::update_many()
        .col_expr(deposit::Column::Status, Expr::value(to))
        .col_expr(deposit::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(deposit::Column::Id.eq(current.id.as_str()))
        .filter(deposit::Column::Status.eq(DepositStatus::Pending))
        .exec(db)
        .await?;
    if moved.rows_affected == 0 {
        return Err(Error::InvalidTransition {
            entity: "deposit",
            id: current.id.clone(),
            from: current.status.as_str().to_string(),
            to: to.as_str().to_string(),
        });
    }
    Ok(())
}

/// Approves a pending deposit and pays first-deposit commissions.
#[instrument(skip(db, ctx), fields(actor = ctx.actor_id()))]
pub async fn approve_deposit<C>(
    db: &C,
    ctx: &AdminContext,
    deposit_id: &str,
) -> Result<DepositApproval>
where
    C: ConnectionTrait + TransactionTrait,
{
    let txn = db.begin().await?;
    let pending = get_deposit(&txn, deposit_id).await?;
    move_from_pending(&txn, &pending, DepositStatus::Approved).await?;

    let meta = TransactionMeta::Deposit {
        deposit_id: pending.id.clone(),
        approved_by: ctx.actor_id().to_string(),
    };
    let entry = ledger::credit(&txn, &pending.user_id, pending.amount, meta).await?;
    User::update_many()
        .col_expr(user::Column::IsActive, Expr::value(true))
        .filter(user::Column::Id.eq(pending.user_id.as_str()))
        .exec(&txn)
        .await?;

    // includes this approval
    let approved = Deposit::find()
        .filter(deposit::Column::UserId.eq(pending.user_id.as_str()))
        .filter(deposit::Column::Status.eq(DepositStatus::Approved))
        .count(&txn)
        .await?;
    txn.commit().await?;
    info!(
        deposit_id,
        user_id = %pending.user_id,
        amount = %pending.amount,
        approved,
        "Deposit approved"
    );

    let first_deposit = approved == 1;
    let commissions = if first_deposit {
        let trigger = CommissionTrigger {
            user_id: pending.user_id.clone(),
            amount: pending.amount,
            source: CommissionSource::Deposit {
                deposit_id: pending.id.clone(),
            },
        };
        commission::distribute(db, &DepositCommission, &trigger, FailurePolicy::HaltAndKeep)
            .await?
    } else {
        Vec::new()
    };

    Ok(DepositApproval {
        deposit: get_deposit(db, deposit_id).await?,
        transaction: entry,
        first_deposit,
        commissions,
    })
}

/// Rejects a pending deposit. Nothing is credited.
pub async fn reject_deposit<C>(
    db: &C,
    ctx: &AdminContext,
    deposit_id: &str,
) -> Result<deposit::Model>
where
    C: ConnectionTrait,
{
    let pending = get_deposit(db, deposit_id).await?;
    move_from_pending(db, &pending, DepositStatus::Rejected).await?;
    info!(actor = ctx.actor_id(), deposit_id, "Deposit rejected");
    get_deposit(db, deposit_id).await
}

/// Deposits awaiting review, oldest first.
pub async fn list_pending_deposits<C>(db: &C) -> Result<Vec<deposit::Model>>
where
    C: ConnectionTrait,
{
    Deposit::find()
        .filter(deposit::Column::Status.eq(DepositStatus::Pending))
        .order_by_asc(deposit::Column::CreatedAt)
        .all(db)
        .await
        .map_err(Into::into)
}

/// A user's deposits, newest first.
pub async fn list_user_deposits<C>(db: &C, user_id: &str) -> Result<Vec<deposit::Model>>
where
    C: ConnectionTrait,
{
    Deposit::find()
        .filter(deposit::Column::UserId.eq(user_id))
        .order_by_desc(deposit::Column::CreatedAt)
        .all(db)
        .await
        .map_err(Into::into)
}
