//! Read-side views over the ledger.
//!
//! Nothing in here mutates state. [`audit_wallet`] recomputes a wallet from its
//! transaction history and is what the `audit` command runs.

use crate::{
    core::{deposit as deposits, ledger, money::Money, package as packages, user as users},
    entities::{
        Deposit, Package, Transaction, User, UserPackage, deposit, deposit::DepositStatus, package,
        transaction, transaction::TransactionKind, user, user_package,
    },
    errors::Result,
};
use chrono::{DateTime, Utc};
use sea_orm::{
    ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, QuerySelect,
    TransactionTrait,
};
use serde::Serialize;
use tracing::warn;

/// Number of entries [`recent_activity`] returns when no limit is given.
pub const DEFAULT_ACTIVITY_LIMIT: u64 = 20;

/// Depth of the team shown by [`referral_stats`].
const TEAM_DEPTH: usize = 3;

/// One line of a user's activity feed.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ActivityItem {
    /// Ledger entry
    Transaction(transaction::Model),
    /// Deposit request, whatever its status
    Deposit(deposit::Model),
}

impl ActivityItem {
    /// When the underlying row was created.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            Self::Transaction(entry) => entry.created_at,
            Self::Deposit(request) => request.created_at,
        }
    }
}

/// Team overview of a user.
#[derive(Debug, Clone, Serialize)]
pub struct ReferralStats {
    /// Direct referrals
    pub level1: u64,
    /// Referrals of direct referrals
    pub level2: u64,
    /// Third level
    pub level3: u64,
    /// `level1 + level2 + level3`
    pub total: u64,
    /// Sum of approved deposits across the three levels
    pub team_investment: Money,
    /// Sum of referral commissions received
    pub referral_earnings: Money,
    /// The direct referrals themselves
    pub direct_members: Vec<user::Model>,
}

/// Dashboard header of a user.
#[derive(Debug, Clone, Serialize)]
pub struct AccountSummary {
    /// Account
    pub user_id: String,
    /// Spendable balance
    pub wallet: Money,
    /// Whether the account may complete tasks and withdraw
    pub is_active: bool,
    /// Name of the most expensive unexpired package
    pub plan_name: Option<String>,
    /// Expiry of that purchase
    pub plan_expires_at: Option<DateTime<Utc>>,
    /// Direct referrals
    pub referral_count: u64,
}

/// Everything an operator sees for one account.
#[derive(Debug, Clone, Serialize)]
pub struct UserDetail {
    /// The account itself
    pub user: user::Model,
    /// Dashboard header
    pub summary: AccountSummary,
    /// Team overview, including the direct referrals
    pub referrals: ReferralStats,
    /// Package purchases, newest first
    pub packages: Vec<user_package::Model>,
    /// Deposit requests, newest first
    pub deposits: Vec<deposit::Model>,
    /// Latest transactions and deposits
    pub activity: Vec<ActivityItem>,
}

/// Stored wallet against the balance implied by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WalletAudit {
    /// Audited account
    pub user_id: String,
    /// Stored balance
    pub wallet: Money,
    /// Sum of the wallet effect of every transaction
    pub derived: Money,
    /// `wallet - derived`
    pub discrepancy: Money,
}

impl WalletAudit {
    /// True when the stored wallet matches its history.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.discrepancy == Money::ZERO
    }
}

/// Transactions and deposit requests of a user, newest first.
pub async fn recent_activity<C>(
    db: &C,
    user_id: &str,
    limit: Option<u64>,
) -> Result<Vec<ActivityItem>>
where
    C: ConnectionTrait,
{
    let limit = limit.unwrap_or(DEFAULT_ACTIVITY_LIMIT);
    ledger::find_user(db, user_id).await?;

    let entries = Transaction::find()
        .filter(transaction::Column::UserId.eq(user_id))
        .order_by_desc(transaction::Column::CreatedAt)
        .limit(limit)
        .all(db)
        .await?;
    let requests = Deposit::find()
        .filter(deposit::Column::UserId.eq(user_id))
        .order_by_desc(deposit::Column::CreatedAt)
        .limit(limit)
        .all(db)
        .await?;

    let mut items: Vec<ActivityItem> = entries
        .into_iter()
        .map(ActivityItem::Transaction)
        .chain(requests.into_iter().map(ActivityItem::Deposit))
        .collect();
    items.sort_by_key(|item| std::cmp::Reverse(item.created_at()));
    items.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
    Ok(items)
}

/// Team sizes per level, team investment and commission earnings.
pub async fn referral_stats<C>(db: &C, user_id: &str) -> Result<ReferralStats>
where
    C: ConnectionTrait,
{
    ledger::find_user(db, user_id).await?;

    let direct_members = users::direct_referrals(db, user_id).await?;
    let mut levels: Vec<Vec<String>> = vec![direct_members.iter().map(|u| u.id.clone()).collect()];
    while levels.len() < TEAM_DEPTH {
        let parents = levels.last().map(Vec::as_slice).unwrap_or_default();
        if parents.is_empty() {
            levels.push(Vec::new());
            continue;
        }
        let next = User::find()
            .filter(user::Column::ReferredBy.is_in(parents.iter().map(String::as_str)))
            .all(db)
            .await?
            .into_iter()
            .map(|u| u.id)
            .collect();
        levels.push(next);
    }

    let team: Vec<&str> = levels.iter().flatten().map(String::as_str).collect();
    let team_investment = if team.is_empty() {
        Money::ZERO
    } else {
        Deposit::find()
            .filter(deposit::Column::UserId.is_in(team.iter().copied()))
            .filter(deposit::Column::Status.eq(DepositStatus::Approved))
            .all(db)
            .await?
            .into_iter()
            .map(|d| d.amount)
            .sum()
    };
    let referral_earnings = Transaction::find()
        .filter(transaction::Column::UserId.eq(user_id))
        .filter(transaction::Column::Kind.eq(TransactionKind::Referral))
        .all(db)
        .await?
        .into_iter()
        .map(|t| t.amount)
        .sum();

    let count = |level: &Vec<String>| u64::try_from(level.len()).unwrap_or(u64::MAX);
    let (level1, level2, level3) = (count(&levels[0]), count(&levels[1]), count(&levels[2]));
    Ok(ReferralStats {
        level1,
        level2,
        level3,
        total: level1 + level2 + level3,
        team_investment,
        referral_earnings,
        direct_members,
    })
}

/// Wallet, activity flag, best current plan and referral count.
pub async fn account_summary<C>(db: &C, user_id: &str) -> Result<AccountSummary>
where
    C: ConnectionTrait,
{
    let user = ledger::find_user(db, user_id).await?;
    let plans: Vec<(user_package::Model, Option<package::Model>)> = UserPackage::find()
        .find_also_related(Package)
        .filter(user_package::Column::UserId.eq(user_id))
        .filter(user_package::Column::ExpiresAt.gt(Utc::now()))
        .all(db)
        .await?;
    let best = plans
        .into_iter()
        .filter_map(|(purchase, package)| package.map(|p| (purchase, p)))
        .max_by_key(|(purchase, package)| (package.price, purchase.expires_at));

    Ok(AccountSummary {
        user_id: user.id,
        wallet: user.wallet,
        is_active: user.is_active,
        plan_name: best.as_ref().map(|(_, package)| package.name.clone()),
        plan_expires_at: best.as_ref().map(|(purchase, _)| purchase.expires_at),
        referral_count: users::count_direct_referrals(db, user_id).await?,
    })
}

/// Account, summary, team, purchases, deposits and recent activity of a user.
///
/// Listing purchases may reconcile missing ones first, hence the transaction bound.
pub async fn user_detail<C>(db: &C, user_id: &str) -> Result<UserDetail>
where
    C: ConnectionTrait + TransactionTrait,
{
    let user = ledger::find_user(db, user_id).await?;
    Ok(UserDetail {
        summary: account_summary(db, user_id).await?,
        referrals: referral_stats(db, user_id).await?,
        packages: packages::list_user_packages(db, user_id).await?,
        deposits: deposits::list_user_deposits(db, user_id).await?,
        activity: recent_activity(db, user_id, None).await?,
        user,
    })
}

/// Compares a stored wallet with the sum of its ledger.
pub async fn audit_wallet<C>(db: &C, user_id: &str) -> Result<WalletAudit>
where
    C: ConnectionTrait,
{
    let user = ledger::find_user(db, user_id).await?;
    let derived = ledger::derived_balance(db, user_id).await?;
    let audit = WalletAudit {
        discrepancy: user.wallet - derived,
        user_id: user.id,
        wallet: user.wallet,
        derived,
    };
    if !audit.is_consistent() {
        warn!(
            user_id = %audit.user_id,
            wallet = %audit.wallet,
            derived = %audit.derived,
            "Wallet does not match its ledger"
        );
    }
    Ok(audit)
}

/// Audits every wallet, in registration order.
pub async fn audit_all_wallets<C>(db: &C) -> Result<Vec<WalletAudit>>
where
    C: ConnectionTrait,
{
    let ids: Vec<String> = User::find()
        .order_by_asc(user::Column::CreatedAt)
        .all(db)
        .await?
        .into_iter()
        .map(|u| u.id)
        .collect();
    let mut audits = Vec::with_capacity(ids.len());
    for id in ids {
        audits.push(audit_wallet(db, &id).await?);
    }
    Ok(audits)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::config::LedgerSettings;
    use crate::core::{deposit as deposits, package as packages, user::NewUser, withdrawal};
    use crate::errors::Error;
    use crate::test_utils::*;
    use sea_orm::sea_query::Expr;

    #[tokio::test]
    async fn test_recent_activity_merges_newest_first() -> Result<()> {
        let db = setup_test_db().await?;
        let user = create_test_user(&db, "feed@example.com", None).await?;

        fund_wallet(&db, &user.id, Money::from_major(5)).await?;
        let request = create_test_deposit(&db, &user.id, Money::from_major(100)).await?;
        fund_wallet(&db, &user.id, Money::from_major(7)).await?;

        let feed = recent_activity(&db, &user.id, None).await?;
        assert_eq!(feed.len(), 3);
        assert!(feed.windows(2).all(|w| w[0].created_at() >= w[1].created_at()));
        assert!(
            feed.iter()
                .any(|item| matches!(item, ActivityItem::Deposit(d) if d.id == request.id))
        );

        assert_eq!(recent_activity(&db, &user.id, Some(2)).await?.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_referral_stats_three_levels() -> Result<()> {
        let db = setup_test_db().await?;
        let admin = test_admin();
        // root <- l1 <- l2 <- l3 <- l4
        let chain = create_referral_chain(&db, 5).await?;
        let sibling = create_test_user(&db, "sibling@example.com", Some(&chain[0])).await?;

        let d1 = create_test_deposit(&db, &chain[1].id, Money::from_major(100)).await?;
        deposits::approve_deposit(&db, &admin, &d1.id).await?;
        let d4 = create_test_deposit(&db, &chain[4].id, Money::from_major(500)).await?;
        deposits::approve_deposit(&db, &admin, &d4.id).await?;
        create_test_deposit(&db, &sibling.id, Money::from_major(900)).await?;

        let stats = referral_stats(&db, &chain[0].id).await?;
        assert_eq!((stats.level1, stats.level2, stats.level3), (2, 1, 1));
        assert_eq!(stats.total, 4);
        // l4 is beyond the third level, the sibling deposit is still pending
        assert_eq!(stats.team_investment, Money::from_major(100));
        // 10% of l1's deposit plus 0.2% of l4's
        assert_eq!(stats.referral_earnings, Money::from_major(11));
        assert_eq!(stats.direct_members.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_account_summary_picks_highest_plan() -> Result<()> {
        let db = setup_test_db().await?;
        let user = create_test_user(&db, "plans@example.com", None).await?;
        create_test_package(&db, "p200", Money::from_major(200), Money::from_major(35)).await?;
        create_test_package(&db, "p500", Money::from_major(500), Money::from_major(90)).await?;

        let summary = account_summary(&db, &user.id).await?;
        assert!(summary.plan_name.is_none());
        assert!(!summary.is_active);

        fund_wallet(&db, &user.id, Money::from_major(800)).await?;
        packages::purchase_package(&db, &user.id, "p500").await?;
        packages::purchase_package(&db, &user.id, "p200").await?;

        let summary = account_summary(&db, &user.id).await?;
        assert_eq!(summary.plan_name.as_deref(), Some("Test p500"));
        assert!(summary.plan_expires_at.is_some());
        assert_eq!(summary.wallet, Money::from_major(100));
        assert_eq!(summary.referral_count, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_user_detail_collects_views() -> Result<()> {
        let db = setup_test_db().await?;
        let admin = test_admin();
        let parent = create_test_user(&db, "detail-parent@example.com", None).await?;
        let member = create_test_user(&db, "detail@example.com", Some(&parent)).await?;
        create_test_package(&db, "p200", Money::from_major(200), Money::from_major(35)).await?;

        let request = create_test_deposit(&db, &member.id, Money::from_major(300)).await?;
        deposits::approve_deposit(&db, &admin, &request.id).await?;
        create_test_deposit(&db, &member.id, Money::from_major(50)).await?;
        packages::purchase_package(&db, &member.id, "p200").await?;

        let detail = user_detail(&db, &member.id).await?;
        assert_eq!(detail.user.id, member.id);
        assert_eq!(detail.summary.wallet, Money::from_major(100));
        assert_eq!(detail.summary.plan_name.as_deref(), Some("Test p200"));
        assert_eq!(detail.packages.len(), 1);
        assert_eq!(detail.deposits.len(), 2);
        assert_eq!(detail.referrals.total, 0);
        // deposit credit, purchase, and both deposit requests
        assert_eq!(detail.activity.len(), 4);

        let parent_detail = user_detail(&db, &parent.id).await?;
        assert_eq!(parent_detail.referrals.direct_members.len(), 1);
        // 10% of the first deposit and 10% of the purchase
        assert_eq!(parent_detail.referrals.referral_earnings, Money::from_major(50));

        assert!(matches!(
            user_detail(&db, "usr_missing").await,
            Err(Error::NotFound { entity: "user", .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_audit_flags_tampered_wallet() -> Result<()> {
        let db = setup_test_db().await?;
        let user = create_test_user(&db, "audit@example.com", None).await?;
        fund_wallet(&db, &user.id, Money::from_major(20)).await?;
        assert!(audit_wallet(&db, &user.id).await?.is_consistent());

        User::update_many()
            .col_expr(user::Column::Wallet, Expr::value(Money::from_major(25)))
            .filter(user::Column::Id.eq(user.id.as_str()))
            .exec(&db)
            .await?;

        let audit = audit_wallet(&db, &user.id).await?;
        assert!(!audit.is_consistent());
        assert_eq!(audit.discrepancy, Money::from_major(5));
        assert_eq!(
            audit_all_wallets(&db)
                .await?
                .iter()
                .filter(|a| !a.is_consistent())
                .count(),
            1
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_ledger_stays_complete_across_operations() -> Result<()> {
        let db = setup_test_db().await?;
        let admin = test_admin();
        let settings = LedgerSettings::default();

        let root = users::register_user(
            &db,
            &settings,
            NewUser {
                email: "root@example.com".to_string(),
                password_hash: "hash".to_string(),
                ..NewUser::default()
            },
        )
        .await?;
        let child = users::register_user(
            &db,
            &settings,
            NewUser {
                email: "child@example.com".to_string(),
                password_hash: "hash".to_string(),
                referral_code: Some(root.invite_code.clone()),
                ..NewUser::default()
            },
        )
        .await?;
        create_test_package(&db, "p200", Money::from_major(200), Money::from_major(35)).await?;

        let request = create_test_deposit(&db, &child.id, Money::from_major(300)).await?;
        deposits::approve_deposit(&db, &admin, &request.id).await?;
        let purchase = packages::purchase_package(&db, &child.id, "p200").await?;
        packages::claim_daily(&db, &child.id, &purchase.user_package.id).await?;
        let rejected = create_test_deposit(&db, &child.id, Money::from_major(40)).await?;
        deposits::reject_deposit(&db, &admin, &rejected.id).await?;

        let ready = create_withdrawal_ready_user(&db, "ready@example.com", 3, 1).await?;
        fund_wallet(&db, &ready.id, Money::from_major(60)).await?;
        let cash_out =
            withdrawal::request_withdrawal(&db, &settings, &ready.id, Money::from_major(40))
                .await?;
        withdrawal::reject_withdrawal(&db, &admin, &cash_out.id).await?;
        let kept = withdrawal::request_withdrawal(&db, &settings, &ready.id, Money::from_major(30))
            .await?;
        withdrawal::approve_withdrawal(&db, &admin, &kept.id).await?;

        let audits = audit_all_wallets(&db).await?;
        assert!(audits.len() >= 3);
        assert!(audits.iter().all(WalletAudit::is_consistent));

        let root_audit = audit_wallet(&db, &root.id).await?;
        // registration bonus, 10% of 300 and 10% of 200
        assert_eq!(root_audit.wallet, Money::from_major(50 + 30 + 20));
        Ok(())
    }
}
