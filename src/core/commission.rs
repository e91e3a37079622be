//! Multi-level referral commissions.
//!
//! A qualifying event (first approved deposit, wallet-funded purchase) pays each
//! ancestor in the referral chain a share of the triggering amount. The two rate
//! tables are separate named schedules so they can never be swapped by accident.
//!
//! Every level runs in its own nested transaction. What happens when a level fails
//! is chosen by the caller through [`FailurePolicy`]:
//!
//! - [`FailurePolicy::HaltAndKeep`]: log, stop walking, keep the levels already paid.
//!   Deposit approval uses this, after the deposit credit has committed.
//! - [`FailurePolicy::Abort`]: return the error so the caller's enclosing transaction
//!   rolls back everything, including the levels already paid. Purchases use this.

use crate::{
    core::{
        ledger,
        money::{Money, Rate},
    },
    entities::{
        User,
        transaction::{CommissionSource, TransactionMeta},
    },
    errors::{Error, Result},
};
use sea_orm::{ConnectionTrait, EntityTrait, TransactionTrait};
use serde::Serialize;
use tracing::{debug, error, info, instrument};

/// One row of a rate table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommissionLevel {
    /// Label recorded in the referral meta
    pub label: &'static str,
    /// Share of the triggering amount
    pub rate: Rate,
}

/// A named rate table; level `0` pays the direct referrer.
pub trait CommissionSchedule {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Levels, nearest ancestor first.
    fn levels(&self) -> &'static [CommissionLevel];
}

const DEPOSIT_LEVELS: [CommissionLevel; 4] = [
    CommissionLevel { label: "A", rate: Rate::from_bps(1000) },
    CommissionLevel { label: "B", rate: Rate::from_bps(500) },
    CommissionLevel { label: "C", rate: Rate::from_bps(200) },
    CommissionLevel { label: "D", rate: Rate::from_bps(20) },
];

const PURCHASE_LEVELS: [CommissionLevel; 3] = [
    CommissionLevel { label: "1", rate: Rate::from_bps(1000) },
    CommissionLevel { label: "2", rate: Rate::from_bps(500) },
    CommissionLevel { label: "3", rate: Rate::from_bps(100) },
];

/// Paid once per user, on the first approved deposit: 10%, 5%, 2%, 0.2%.
#[derive(Debug, Clone, Copy, Default)]
pub struct DepositCommission;

impl CommissionSchedule for DepositCommission {
    fn name(&self) -> &'static str {
        "deposit"
    }

    fn levels(&self) -> &'static [CommissionLevel] {
        &DEPOSIT_LEVELS
    }
}

/// Paid on every wallet-funded purchase: 10%, 5%, 1%.
#[derive(Debug, Clone, Copy, Default)]
pub struct PurchaseCommission;

impl CommissionSchedule for PurchaseCommission {
    fn name(&self) -> &'static str {
        "purchase"
    }

    fn levels(&self) -> &'static [CommissionLevel] {
        &PURCHASE_LEVELS
    }
}

/// What to do when crediting a level fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Log, stop, keep earlier levels
    HaltAndKeep,
    /// Propagate the error to the enclosing transaction
    Abort,
}

/// The event commissions are computed from.
#[derive(Debug, Clone)]
pub struct CommissionTrigger {
    /// Downline user whose event pays the chain
    pub user_id: String,
    /// Base amount the rates apply to
    pub amount: Money,
    /// Recorded in each referral meta
    pub source: CommissionSource,
}

/// One credited level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommissionCredit {
    /// Ancestor that was paid
    pub referrer_id: String,
    /// Distance from the triggering user, starting at 1
    pub depth: u8,
    /// Level label from the schedule
    pub level: &'static str,
    /// Amount credited
    pub amount: Money,
    /// Ledger row written for it
    pub transaction_id: String,
}

struct LevelOutcome {
    credit: Option<CommissionCredit>,
    next: Option<String>,
}

/// Walks the referral chain above `trigger.user_id` and pays each level of `schedule`.
///
/// Stops at the first missing ancestor. A level whose rounded commission is zero is
/// skipped but the walk continues. Returns the levels actually credited. Under
/// [`FailurePolicy::HaltAndKeep`] a failure to load the triggering user pays nothing
/// and is not an error.
#[instrument(skip(db, schedule), fields(schedule = schedule.name()))]
pub async fn distribute<C, S>(
    db: &C,
    schedule: &S,
    trigger: &CommissionTrigger,
    policy: FailurePolicy,
) -> Result<Vec<CommissionCredit>>
where
    C: ConnectionTrait + TransactionTrait,
    S: CommissionSchedule + ?Sized,
{
    let origin = match ledger::find_user(db, &trigger.user_id).await {
        Ok(origin) => origin,
        Err(e) => match policy {
            FailurePolicy::Abort => return Err(e),
            FailurePolicy::HaltAndKeep => {
                error!(
                    from_user = %trigger.user_id,
                    error = %e,
                    "Commission cascade skipped; triggering user could not be loaded"
                );
                return Ok(Vec::new());
            }
        },
    };
    let mut next = origin.referred_by;
    let mut credits = Vec::new();

    for (index, level) in schedule.levels().iter().enumerate() {
        let Some(referrer_id) = next.take() else {
            break;
        };
        let depth = u8::try_from(index + 1).unwrap_or(u8::MAX);

        let outcome = async {
            let txn = db.begin().await?;
            let outcome = pay_level(&txn, &referrer_id, depth, level, trigger).await?;
            txn.commit().await?;
            Ok::<_, Error>(outcome)
        }
        .await;

        match outcome {
            Ok(Some(outcome)) => {
                credits.extend(outcome.credit);
                next = outcome.next;
            }
            Ok(None) => {
                debug!(%referrer_id, depth, "Referrer no longer exists, chain ends");
                break;
            }
            Err(e) => match policy {
                FailurePolicy::Abort => return Err(e),
                FailurePolicy::HaltAndKeep => {
                    error!(
                        %referrer_id,
                        depth,
                        paid_levels = credits.len(),
                        error = %e,
                        "Commission cascade halted; earlier levels kept"
                    );
                    break;
                }
            },
        }
    }

    let total: Money = credits.iter().map(|c| c.amount).sum();
    info!(
        from_user = %trigger.user_id,
        base = %trigger.amount,
        levels = credits.len(),
        %total,
        "Commissions distributed"
    );
    Ok(credits)
}

async fn pay_level<C>(
    db: &C,
    referrer_id: &str,
    depth: u8,
    level: &CommissionLevel,
    trigger: &CommissionTrigger,
) -> Result<Option<LevelOutcome>>
where
    C: ConnectionTrait,
{
    let Some(referrer) = User::find_by_id(referrer_id.to_string()).one(db).await? else {
        return Ok(None);
    };

    let commission = trigger.amount.apply_rate(level.rate);
    let credit = if commission.is_positive() {
        let meta = TransactionMeta::Referral {
            level: level.label.to_string(),
            depth,
            from_user: trigger.user_id.clone(),
            rate: level.rate,
            source: trigger.source.clone(),
        };
        let entry = ledger::credit(db, &referrer.id, commission, meta).await?;
        Some(CommissionCredit {
            referrer_id: referrer.id.clone(),
            depth,
            level: level.label,
            amount: commission,
            transaction_id: entry.id,
        })
    } else {
        debug!(%referrer_id, depth, "Commission rounds to zero, level skipped");
        None
    };

    Ok(Some(LevelOutcome {
        credit,
        next: referrer.referred_by,
    }))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::test_utils::*;
    use sea_orm::DatabaseConnection;

    fn deposit_trigger(user_id: &str, amount: Money) -> CommissionTrigger {
        CommissionTrigger {
            user_id: user_id.to_string(),
            amount,
            source: CommissionSource::Deposit {
                deposit_id: "dep_test".to_string(),
            },
        }
    }

    async fn wallet(db: &DatabaseConnection, user_id: &str) -> Result<Money> {
        Ok(ledger::find_user(db, user_id).await?.wallet)
    }

    #[test]
    fn test_schedules_are_distinct() {
        let deposit: Vec<u32> = DepositCommission.levels().iter().map(|l| l.rate.bps()).collect();
        let purchase: Vec<u32> = PurchaseCommission.levels().iter().map(|l| l.rate.bps()).collect();
        assert_eq!(deposit, vec![1000, 500, 200, 20]);
        assert_eq!(purchase, vec![1000, 500, 100]);
        assert_eq!(DepositCommission.levels()[0].label, "A");
        assert_eq!(PurchaseCommission.levels()[2].label, "3");
    }

    #[tokio::test]
    async fn test_deposit_schedule_pays_four_levels() -> Result<()> {
        let db = setup_test_db().await?;
        let chain = create_referral_chain(&db, 5).await?;
        let origin = &chain[4];

        let credits = distribute(
            &db,
            &DepositCommission,
            &deposit_trigger(&origin.id, Money::from_major(1000)),
            FailurePolicy::HaltAndKeep,
        )
        .await?;

        assert_eq!(credits.len(), 4);
        assert_eq!(wallet(&db, &chain[3].id).await?, Money::from_major(100));
        assert_eq!(wallet(&db, &chain[2].id).await?, Money::from_major(50));
        assert_eq!(wallet(&db, &chain[1].id).await?, Money::from_major(20));
        assert_eq!(wallet(&db, &chain[0].id).await?, Money::from_major(2));
        assert_eq!(credits[3].level, "D");
        assert_eq!(credits[3].depth, 4);
        Ok(())
    }

    #[tokio::test]
    async fn test_purchase_schedule_stops_after_three_levels() -> Result<()> {
        let db = setup_test_db().await?;
        let chain = create_referral_chain(&db, 5).await?;
        let trigger = CommissionTrigger {
            user_id: chain[4].id.clone(),
            amount: Money::from_major(1000),
            source: CommissionSource::Purchase {
                package_id: "p1000".to_string(),
                user_package_id: "up_test".to_string(),
            },
        };

        let credits = distribute(&db, &PurchaseCommission, &trigger, FailurePolicy::Abort).await?;

        assert_eq!(credits.len(), 3);
        assert_eq!(wallet(&db, &chain[1].id).await?, Money::from_major(10));
        // fourth ancestor is outside the purchase schedule
        assert_eq!(wallet(&db, &chain[0].id).await?, Money::ZERO);
        Ok(())
    }

    #[tokio::test]
    async fn test_short_chain_and_zero_commissions() -> Result<()> {
        let db = setup_test_db().await?;
        let chain = create_referral_chain(&db, 2).await?;

        // 0.20 * 10% = 0.02 pays; nothing above the root
        let credits = distribute(
            &db,
            &DepositCommission,
            &deposit_trigger(&chain[1].id, Money::from_minor(20)),
            FailurePolicy::HaltAndKeep,
        )
        .await?;
        assert_eq!(credits.len(), 1);
        assert_eq!(credits[0].amount, Money::from_minor(2));

        // 0.04 * 10% rounds to nothing: no credit, no row
        let chain = create_referral_chain(&db, 3).await?;
        let credits = distribute(
            &db,
            &DepositCommission,
            &deposit_trigger(&chain[2].id, Money::from_minor(4)),
            FailurePolicy::HaltAndKeep,
        )
        .await?;
        assert!(credits.is_empty());
        assert!(ledger::get_transactions_for_user(&db, &chain[1].id).await?.is_empty());
        Ok(())
    }

    async fn fail_wallet_updates_for(db: &DatabaseConnection, user_id: &str) -> Result<()> {
        db.execute_unprepared(&format!(
            "CREATE TRIGGER fail_wallet BEFORE UPDATE ON users WHEN NEW.id = '{user_id}' \
             BEGIN SELECT RAISE(ABORT, 'wallet locked'); END;"
        ))
        .await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_halt_and_keep_preserves_paid_levels() -> Result<()> {
        let db = setup_test_db().await?;
        let chain = create_referral_chain(&db, 4).await?;
        fail_wallet_updates_for(&db, &chain[1].id).await?;

        let credits = distribute(
            &db,
            &DepositCommission,
            &deposit_trigger(&chain[3].id, Money::from_major(1000)),
            FailurePolicy::HaltAndKeep,
        )
        .await?;

        assert_eq!(credits.len(), 1);
        assert_eq!(wallet(&db, &chain[2].id).await?, Money::from_major(100));
        assert_eq!(wallet(&db, &chain[1].id).await?, Money::ZERO);
        // halted: the level above the failure is never reached
        assert_eq!(wallet(&db, &chain[0].id).await?, Money::ZERO);
        Ok(())
    }

    #[tokio::test]
    async fn test_unloadable_origin_follows_policy() -> Result<()> {
        let db = setup_test_db().await?;
        let trigger = deposit_trigger("usr_missing", Money::from_major(1000));

        let credits =
            distribute(&db, &DepositCommission, &trigger, FailurePolicy::HaltAndKeep).await?;
        assert!(credits.is_empty());

        assert!(matches!(
            distribute(&db, &DepositCommission, &trigger, FailurePolicy::Abort).await,
            Err(Error::NotFound { entity: "user", .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_abort_inside_outer_transaction_rolls_back_everything() -> Result<()> {
        let db = setup_test_db().await?;
        let chain = create_referral_chain(&db, 3).await?;
        fail_wallet_updates_for(&db, &chain[0].id).await?;

        let txn = db.begin().await?;
        let result = distribute(
            &txn,
            &PurchaseCommission,
            &deposit_trigger(&chain[2].id, Money::from_major(1000)),
            FailurePolicy::Abort,
        )
        .await;
        assert!(matches!(result, Err(Error::Database(_))));
        drop(txn);

        assert_eq!(wallet(&db, &chain[1].id).await?, Money::ZERO);
        assert!(ledger::get_transactions_for_user(&db, &chain[1].id).await?.is_empty());
        Ok(())
    }
}
