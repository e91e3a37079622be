//! Package catalogue and purchase lifecycle.
//!
//! A purchase creates a `user_package` that is active until `expires_at` and can be
//! claimed once per UTC calendar day. Wallet-funded purchases debit the price, write
//! the `purchase` ledger row, refresh the plan cache and pay purchase commissions,
//! all inside one database transaction.
//!
//! `users.current_package_id` / `users.package_expires_at` are a cache of
//! [`active_plan`]. They are written only by [`refresh_plan_cache`], which runs in the
//! same transaction as every `user_package` insert.

use crate::{
    config::settings::PackageConfig,
    core::{
        auth::AdminContext,
        commission::{self, CommissionCredit, CommissionTrigger, FailurePolicy, PurchaseCommission},
        ledger,
        money::Money,
    },
    entities::{
        Package, Transaction, User, UserPackage, package, transaction,
        transaction::{CommissionSource, TransactionKind, TransactionMeta, TransactionStatus},
        user, user_package,
    },
    errors::{Error, Result},
};
use chrono::{DateTime, Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait, sea_query::Expr,
};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

/// How an operator-activated package is paid for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationCharge {
    /// Free; nothing is charged and `price_paid` is zero
    None,
    /// Paid outside the platform; no wallet change
    External,
    /// Debited from the wallet, exactly like a user purchase
    Wallet,
}

/// Operator edit of a package. Only future purchases see the new terms.
#[derive(Debug, Clone, Copy, Default)]
pub struct PackageUpdate {
    /// New price
    pub price: Option<Money>,
    /// New daily reward
    pub daily_claim: Option<Money>,
    /// Lock or unlock
    pub locked: Option<bool>,
}

/// A completed activation.
#[derive(Debug, Clone, Serialize)]
pub struct Purchase {
    /// Created purchase row
    pub user_package: user_package::Model,
    /// `purchase` ledger row, when the wallet was charged
    pub transaction: Option<transaction::Model>,
    /// Purchase commissions paid up the chain
    pub commissions: Vec<CommissionCredit>,
}

/// A successful daily claim.
#[derive(Debug, Clone, Serialize)]
pub struct Claim {
    /// Purchase after the claim
    pub user_package: user_package::Model,
    /// `daily` ledger row
    pub transaction: transaction::Model,
}

/// Outcome of a reconciliation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationReport {
    /// Purchase rows recreated
    pub created: u64,
    /// Purchase transactions that needed nothing (or could not be matched to a package)
    pub skipped: u64,
    /// Purchase transactions that failed to restore
    pub errors: u64,
}

fn validate_terms(price: Money, daily_claim: Money) -> Result<()> {
    if !price.is_positive() {
        return Err(Error::InvalidAmount { amount: price });
    }
    if daily_claim < Money::ZERO {
        return Err(Error::InvalidAmount {
            amount: daily_claim,
        });
    }
    Ok(())
}

/// Inserts catalogue entries that do not exist yet; existing packages are left as is.
pub async fn seed_packages<C>(db: &C, packages: &[PackageConfig]) -> Result<usize>
where
    C: ConnectionTrait,
{
    let mut inserted = 0;
    for config in packages {
        if Package::find_by_id(config.id.clone()).one(db).await?.is_some() {
            continue;
        }
        let price = Money::try_from_decimal(config.price)?;
        let daily_claim = Money::try_from_decimal(config.daily_claim)?;
        validate_terms(price, daily_claim)?;
        if config.duration_days <= 0 {
            return Err(Error::Config {
                message: format!("Package {} must last at least one day", config.id),
            });
        }

        package::ActiveModel {
            id: Set(config.id.clone()),
            name: Set(config.name.clone()),
            price: Set(price),
            duration_days: Set(config.duration_days),
            daily_claim: Set(daily_claim),
            locked: Set(config.locked),
        }
        .insert(db)
        .await?;
        inserted += 1;
    }
    info!(inserted, total = packages.len(), "Packages seeded");
    Ok(inserted)
}

/// All packages, cheapest first.
pub async fn list_packages<C>(db: &C) -> Result<Vec<package::Model>>
where
    C: ConnectionTrait,
{
    Package::find()
        .order_by_asc(package::Column::Price)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Loads a package or fails with `NotFound`.
pub async fn get_package<C>(db: &C, package_id: &str) -> Result<package::Model>
where
    C: ConnectionTrait,
{
    Package::find_by_id(package_id.to_string())
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("package", package_id))
}

/// Changes price, daily reward or lock state of a package.
pub async fn update_package<C>(
    db: &C,
    ctx: &AdminContext,
    package_id: &str,
    update: PackageUpdate,
) -> Result<package::Model>
where
    C: ConnectionTrait,
{
    let package = get_package(db, package_id).await?;
    let price = update.price.unwrap_or(package.price);
    let daily_claim = update.daily_claim.unwrap_or(package.daily_claim);
    validate_terms(price, daily_claim)?;

    let mut active: package::ActiveModel = package.into();
    active.price = Set(price);
    active.daily_claim = Set(daily_claim);
    if let Some(locked) = update.locked {
        active.locked = Set(locked);
    }
    let package = active.update(db).await?;
    info!(
        actor = ctx.actor_id(),
        package_id,
        %price,
        %daily_claim,
        locked = package.locked,
        "Package updated"
    );
    Ok(package)
}

/// Locks or unlocks a package for purchase.
pub async fn set_package_locked<C>(
    db: &C,
    ctx: &AdminContext,
    package_id: &str,
    locked: bool,
) -> Result<package::Model>
where
    C: ConnectionTrait,
{
    update_package(
        db,
        ctx,
        package_id,
        PackageUpdate {
            locked: Some(locked),
            ..PackageUpdate::default()
        },
    )
    .await
}

/// Latest purchase of `user_id` that is still active at `now`.
pub async fn active_plan<C>(
    db: &C,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<Option<user_package::Model>>
where
    C: ConnectionTrait,
{
    UserPackage::find()
        .filter(user_package::Column::UserId.eq(user_id))
        .filter(user_package::Column::ExpiresAt.gt(now))
        .order_by_desc(user_package::Column::ActivatedAt)
        .one(db)
        .await
        .map_err(Into::into)
}

/// Recomputes the cached plan fields of a user from their purchases.
pub async fn refresh_plan_cache<C>(db: &C, user_id: &str) -> Result<Option<user_package::Model>>
where
    C: ConnectionTrait,
{
    let plan = active_plan(db, user_id, Utc::now()).await?;
    User::update_many()
        .col_expr(
            user::Column::CurrentPackageId,
            Expr::value(plan.as_ref().map(|p| p.package_id.clone())),
        )
        .col_expr(
            user::Column::PackageExpiresAt,
            Expr::value(plan.as_ref().map(|p| p.expires_at)),
        )
        .filter(user::Column::Id.eq(user_id))
        .exec(db)
        .await?;
    debug!(user_id, plan = ?plan.as_ref().map(|p| &p.id), "Plan cache refreshed");
    Ok(plan)
}

/// Creates the purchase row and everything that goes with it. Runs inside the
/// caller's transaction.
async fn activate<C>(
    txn: &C,
    user: &user::Model,
    package: &package::Model,
    charge: ActivationCharge,
    activated_by: Option<&str>,
) -> Result<Purchase>
where
    C: ConnectionTrait + TransactionTrait,
{
    let now = Utc::now();
    let user_package_id = ledger::new_id("up");

    let entry = match charge {
        ActivationCharge::Wallet => {
            let meta = TransactionMeta::Purchase {
                package_id: package.id.clone(),
                user_package_id: user_package_id.clone(),
                activated_by: activated_by.map(str::to_string),
            };
            Some(
                ledger::debit(txn, &user.id, package.price, meta, TransactionStatus::Completed)
                    .await?,
            )
        }
        ActivationCharge::None | ActivationCharge::External => None,
    };

    let user_package = user_package::ActiveModel {
        id: Set(user_package_id.clone()),
        user_id: Set(user.id.clone()),
        package_id: Set(package.id.clone()),
        price_paid: Set(if charge == ActivationCharge::None {
            Money::ZERO
        } else {
            package.price
        }),
        daily_claim: Set(package.daily_claim),
        activated_at: Set(now),
        expires_at: Set(now + Duration::days(i64::from(package.duration_days))),
        last_claimed_at: Set(None),
        claim_count: Set(0),
    }
    .insert(txn)
    .await?;

    User::update_many()
        .col_expr(user::Column::IsActive, Expr::value(true))
        .filter(user::Column::Id.eq(user.id.as_str()))
        .exec(txn)
        .await?;
    refresh_plan_cache(txn, &user.id).await?;

    let commissions = if entry.is_some() {
        let trigger = CommissionTrigger {
            user_id: user.id.clone(),
            amount: package.price,
            source: CommissionSource::Purchase {
                package_id: package.id.clone(),
                user_package_id,
            },
        };
        commission::distribute(txn, &PurchaseCommission, &trigger, FailurePolicy::Abort).await?
    } else {
        Vec::new()
    };

    info!(
        user_id = %user.id,
        package_id = %package.id,
        user_package_id = %user_package.id,
        ?charge,
        commissions = commissions.len(),
        "Package activated"
    );
    Ok(Purchase {
        user_package,
        transaction: entry,
        commissions,
    })
}

/// Buys a package from the wallet.
///
/// Debit, purchase row, ledger row, plan cache and purchase commissions commit
/// together or not at all.
#[instrument(skip(db))]
pub async fn purchase_package<C>(db: &C, user_id: &str, package_id: &str) -> Result<Purchase>
where
    C: ConnectionTrait + TransactionTrait,
{
    let txn = db.begin().await?;
    let package = get_package(&txn, package_id).await?;
    if package.locked {
        return Err(Error::PackageLocked {
            package_id: package.id,
        });
    }
    let user = ledger::find_user(&txn, user_id).await?;
    if user.wallet < package.price {
        return Err(Error::InsufficientFunds {
            balance: user.wallet,
            required: package.price,
            shortfall: package.price.saturating_shortfall(user.wallet),
        });
    }

    let purchase = activate(&txn, &user, &package, ActivationCharge::Wallet, None).await?;
    txn.commit().await?;
    Ok(purchase)
}

/// Activates a package on a user's behalf. Works on locked packages.
#[instrument(skip(db, ctx), fields(actor = ctx.actor_id()))]
pub async fn activate_package_for_user<C>(
    db: &C,
    ctx: &AdminContext,
    user_id: &str,
    package_id: &str,
    charge: ActivationCharge,
) -> Result<Purchase>
where
    C: ConnectionTrait + TransactionTrait,
{
    let txn = db.begin().await?;
    let package = get_package(&txn, package_id).await?;
    let user = ledger::find_user(&txn, user_id).await?;
    let purchase = activate(&txn, &user, &package, charge, Some(ctx.actor_id())).await?;
    txn.commit().await?;
    Ok(purchase)
}

/// Credits today's reward of a purchase.
pub async fn claim_daily<C>(db: &C, user_id: &str, user_package_id: &str) -> Result<Claim>
where
    C: ConnectionTrait + TransactionTrait,
{
    claim_daily_at(db, user_id, user_package_id, Utc::now()).await
}

/// [`claim_daily`] evaluated at `now`.
///
/// The claim counter is bumped with a compare-and-swap on its previous value, so of
/// two concurrent claims that both passed the same-day check only one can commit.
pub(crate) async fn claim_daily_at<C>(
    db: &C,
    user_id: &str,
    user_package_id: &str,
    now: DateTime<Utc>,
) -> Result<Claim>
where
    C: ConnectionTrait + TransactionTrait,
{
    let purchase = UserPackage::find_by_id(user_package_id.to_string())
        .one(db)
        .await?
        .filter(|up| up.user_id == user_id)
        .ok_or_else(|| Error::not_found("user_package", user_package_id))?;

    if purchase.is_expired_at(now) {
        return Err(Error::PackageExpired {
            user_package_id: purchase.id,
        });
    }
    if purchase.claimed_on_day_of(now) {
        return Err(Error::AlreadyClaimedToday {
            user_package_id: purchase.id,
        });
    }
    if !purchase.daily_claim.is_positive() {
        return Err(Error::NoDailyReward {
            package_id: purchase.package_id,
        });
    }

    let txn = db.begin().await?;
    let swapped = UserPackage::update_many()
        .col_expr(user_package::Column::LastClaimedAt, Expr::value(now))
        .col_expr(
            user_package::Column::ClaimCount,
            Expr::col(user_package::Column::ClaimCount).add(1),
        )
        .filter(user_package::Column::Id.eq(purchase.id.as_str()))
        .filter(user_package::Column::ClaimCount.eq(purchase.claim_count))
        .exec(&txn)
        .await?;
    if swapped.rows_affected == 0 {
        warn!(user_id, user_package_id, "Concurrent claim lost the race");
        return Err(Error::AlreadyClaimedToday {
            user_package_id: purchase.id,
        });
    }

    let meta = TransactionMeta::Daily {
        package_id: purchase.package_id.clone(),
        user_package_id: purchase.id.clone(),
    };
    let entry = ledger::credit(&txn, user_id, purchase.daily_claim, meta).await?;
    User::update_many()
        .col_expr(user::Column::LastClaimedAt, Expr::value(now))
        .filter(user::Column::Id.eq(user_id))
        .exec(&txn)
        .await?;
    txn.commit().await?;

    let user_package = UserPackage::find_by_id(purchase.id.clone())
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("user_package", purchase.id.as_str()))?;
    Ok(Claim {
        user_package,
        transaction: entry,
    })
}

/// Clears the last claim of every purchase of a user, allowing a new claim today.
pub async fn reset_package_claims<C>(db: &C, ctx: &AdminContext, user_id: &str) -> Result<u64>
where
    C: ConnectionTrait,
{
    let reset = UserPackage::update_many()
        .col_expr(
            user_package::Column::LastClaimedAt,
            Expr::value(Option::<DateTime<Utc>>::None),
        )
        .filter(user_package::Column::UserId.eq(user_id))
        .exec(db)
        .await?;
    info!(actor = ctx.actor_id(), user_id, updated = reset.rows_affected, "Package claims reset");
    Ok(reset.rows_affected)
}

/// A user's purchases, newest first.
///
/// When the user has none, purchase transactions are replayed first so that rows
/// lost from the table reappear.
pub async fn list_user_packages<C>(db: &C, user_id: &str) -> Result<Vec<user_package::Model>>
where
    C: ConnectionTrait + TransactionTrait,
{
    ledger::find_user(db, user_id).await?;
    let query = || {
        UserPackage::find()
            .filter(user_package::Column::UserId.eq(user_id))
            .order_by_desc(user_package::Column::ActivatedAt)
    };

    let packages = query().all(db).await?;
    if !packages.is_empty() {
        return Ok(packages);
    }
    let report = reconcile(db, Some(user_id)).await?;
    if report.created == 0 {
        return Ok(packages);
    }
    Ok(query().all(db).await?)
}

/// Recreates purchase rows missing relative to `purchase` transactions, for one
/// user or everyone. Safe to run repeatedly.
pub async fn reconcile_purchases<C>(
    db: &C,
    ctx: &AdminContext,
    user_id: Option<&str>,
) -> Result<ReconciliationReport>
where
    C: ConnectionTrait + TransactionTrait,
{
    let report = reconcile(db, user_id).await?;
    info!(
        actor = ctx.actor_id(),
        user_id,
        created = report.created,
        skipped = report.skipped,
        errors = report.errors,
        "Purchase reconciliation finished"
    );
    Ok(report)
}

async fn reconcile<C>(db: &C, user_id: Option<&str>) -> Result<ReconciliationReport>
where
    C: ConnectionTrait + TransactionTrait,
{
    let mut query = Transaction::find()
        .filter(transaction::Column::Kind.eq(TransactionKind::Purchase))
        .order_by_asc(transaction::Column::CreatedAt);
    if let Some(user_id) = user_id {
        query = query.filter(transaction::Column::UserId.eq(user_id));
    }

    let mut report = ReconciliationReport::default();
    for entry in query.all(db).await? {
        match restore_purchase(db, &entry).await {
            Ok(true) => report.created += 1,
            Ok(false) => report.skipped += 1,
            Err(e) => {
                warn!(transaction_id = %entry.id, error = %e, "Could not restore purchase");
                report.errors += 1;
            }
        }
    }
    Ok(report)
}

async fn restore_purchase<C>(db: &C, entry: &transaction::Model) -> Result<bool>
where
    C: ConnectionTrait + TransactionTrait,
{
    let TransactionMeta::Purchase {
        package_id,
        user_package_id,
        ..
    } = &entry.meta
    else {
        return Err(Error::Validation {
            message: format!("purchase transaction {} carries no purchase details", entry.id),
        });
    };

    let txn = db.begin().await?;
    if UserPackage::find_by_id(user_package_id.clone())
        .one(&txn)
        .await?
        .is_some()
    {
        return Ok(false);
    }
    let Some(package) = Package::find_by_id(package_id.clone()).one(&txn).await? else {
        warn!(transaction_id = %entry.id, package_id, "Purchased package no longer exists");
        return Ok(false);
    };

    user_package::ActiveModel {
        id: Set(user_package_id.clone()),
        user_id: Set(entry.user_id.clone()),
        package_id: Set(package.id.clone()),
        price_paid: Set(entry.amount),
        daily_claim: Set(package.daily_claim),
        activated_at: Set(entry.created_at),
        expires_at: Set(entry.created_at + Duration::days(i64::from(package.duration_days))),
        last_claimed_at: Set(None),
        claim_count: Set(0),
    }
    .insert(&txn)
    .await?;
    refresh_plan_cache(&txn, &entry.user_id).await?;
    txn.commit().await?;

    info!(user_id = %entry.user_id, user_package_id, "Purchase row restored from ledger");
    Ok(true)
}
