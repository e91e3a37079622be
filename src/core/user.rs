//! Users and the referral tree.
//!
//! `referred_by` is the only link between users. It is set from the invite code at
//! registration and can later be changed by an operator through [`link_referral`],
//! which refuses anything that would make the tree cyclic.

use crate::{
    config::LedgerSettings,
    core::{
        auth::AdminContext,
        ledger,
        money::{Money, Rate},
    },
    entities::{
        Deposit, Transaction, User, deposit, deposit::DepositStatus, transaction,
        transaction::{CommissionSource, TransactionKind, TransactionMeta},
        user,
        user::UserRole,
    },
    errors::{Error, Result},
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

const INVITE_PREFIX: &str = "INV";
const INVITE_ATTEMPTS: usize = 5;
const MANUAL_REFERRAL_RATE: Rate = Rate::from_bps(1000);

/// Sign-up input, as received from the auth boundary.
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    /// Login email
    pub email: String,
    /// Password hash; hashing happens at the boundary
    pub password_hash: String,
    /// Display name
    pub name: Option<String>,
    /// Phone number
    pub phone: Option<String>,
    /// Invite code of the referring user, if any
    pub referral_code: Option<String>,
}

/// Payout profile edit. `None` leaves a field unchanged, an empty string clears it.
#[derive(Debug, Clone, Default)]
pub struct PayoutProfile {
    /// Display name
    pub name: Option<String>,
    /// Payout account holder
    pub payout_name: Option<String>,
    /// Payout method
    pub payout_method: Option<String>,
    /// Payout account
    pub payout_account: Option<String>,
}

/// Result of [`grant_manual_referral_bonus`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ManualBonusOutcome {
    /// Bonus credited
    Granted {
        /// Who received it
        recipient_id: String,
        /// Amount credited
        amount: Money,
        /// Ledger row written
        transaction_id: String,
    },
    /// A grant with the same idempotency key already exists
    AlreadyApplied {
        /// Who received the earlier grant
        recipient_id: String,
    },
}

fn normalize_email(email: &str) -> Result<String> {
    let email = email.trim().to_lowercase();
    let valid = email.split_once('@').is_some_and(|(local, domain)| {
        !local.is_empty()
            && !domain.contains('@')
            && domain.contains('.')
            && !domain.starts_with('.')
            && !domain.ends_with('.')
    });
    if valid {
        Ok(email)
    } else {
        Err(Error::Validation {
            message: format!("'{email}' is not a valid email address"),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn generate_invite_code() -> String {
    let random = Uuid::new_v4().simple().to_string().to_uppercase();
    format!("{INVITE_PREFIX}{}", &random[..6])
}

async fn unique_invite_code<C>(db: &C) -> Result<String>
where
    C: ConnectionTrait,
{
    for _ in 0..INVITE_ATTEMPTS {
        let code = generate_invite_code();
        let taken = User::find()
            .filter(user::Column::InviteCode.eq(code.as_str()))
            .count(db)
            .await?;
        if taken == 0 {
            return Ok(code);
        }
    }
    Err(Error::Validation {
        message: "could not allocate a unique invite code".to_string(),
    })
}

/// Looks up a user by login email.
pub async fn find_user_by_email<C>(db: &C, email: &str) -> Result<Option<user::Model>>
where
    C: ConnectionTrait,
{
    User::find()
        .filter(user::Column::Email.eq(email.trim().to_lowercase()))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Looks up a user by the invite code other users enter.
pub async fn find_user_by_invite_code<C>(db: &C, code: &str) -> Result<Option<user::Model>>
where
    C: ConnectionTrait,
{
    User::find()
        .filter(user::Column::InviteCode.eq(code.trim()))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Registers a user and credits the registration bonus in the same unit.
///
/// An unknown referral code is kept as typed but does not link the user.
#[instrument(skip(db, settings, new_user), fields(email = %new_user.email))]
pub async fn register_user<C>(
    db: &C,
    settings: &LedgerSettings,
    new_user: NewUser,
) -> Result<user::Model>
where
    C: ConnectionTrait + TransactionTrait,
{
    let email = normalize_email(&new_user.email)?;
    if new_user.password_hash.is_empty() {
        return Err(Error::Validation {
            message: "Password hash cannot be empty".to_string(),
        });
    }
    let referral_code = non_empty(new_user.referral_code);

    let txn = db.begin().await?;
    if find_user_by_email(&txn, &email).await?.is_some() {
        return Err(Error::DuplicateEmail { email });
    }

    let referred_by = match referral_code.as_deref() {
        Some(code) => {
            let referrer = find_user_by_invite_code(&txn, code).await?;
            if referrer.is_none() {
                warn!(code, "Unknown referral code, registering without referrer");
            }
            referrer.map(|r| r.id)
        }
        None => None,
    };

    let user = user::ActiveModel {
        id: Set(ledger::new_id("usr")),
        name: Set(non_empty(new_user.name)),
        email: Set(email),
        phone: Set(non_empty(new_user.phone)),
        password_hash: Set(new_user.password_hash),
        role: Set(UserRole::User),
        wallet: Set(Money::ZERO),
        invite_code: Set(unique_invite_code(&txn).await?),
        referral_code: Set(referral_code),
        referred_by: Set(referred_by),
        payout_name: Set(None),
        payout_method: Set(None),
        payout_account: Set(None),
        current_package_id: Set(None),
        package_expires_at: Set(None),
        last_claimed_at: Set(None),
        is_active: Set(false),
        created_at: Set(Utc::now()),
    }
    .insert(&txn)
    .await?;

    if settings.registration_bonus.is_positive() {
        ledger::credit(
            &txn,
            &user.id,
            settings.registration_bonus,
            TransactionMeta::RegistrationBonus,
        )
        .await?;
    }
    txn.commit().await?;

    info!(user_id = %user.id, referred_by = ?user.referred_by, "User registered");
    ledger::find_user(db, &user.id).await
}

/// Updates name and payout details.
pub async fn update_payout_profile<C>(
    db: &C,
    user_id: &str,
    profile: PayoutProfile,
) -> Result<user::Model>
where
    C: ConnectionTrait,
{
    let user = ledger::find_user(db, user_id).await?;
    let mut active: user::ActiveModel = user.into();
    if let Some(name) = profile.name {
        active.name = Set(non_empty(Some(name)));
    }
    if let Some(value) = profile.payout_name {
        active.payout_name = Set(non_empty(Some(value)));
    }
    if let Some(value) = profile.payout_method {
        active.payout_method = Set(non_empty(Some(value)));
    }
    if let Some(value) = profile.payout_account {
        active.payout_account = Set(non_empty(Some(value)));
    }
    Ok(active.update(db).await?)
}

/// Points `referee_id` at `referrer_id` in the referral tree.
///
/// Refuses self-links and links that would close a cycle. A referee that already has
/// a different referrer is only moved when `force` is set.
pub async fn link_referral<C>(
    db: &C,
    ctx: &AdminContext,
    referrer_id: &str,
    referee_id: &str,
    force: bool,
) -> Result<user::Model>
where
    C: ConnectionTrait + TransactionTrait,
{
    let cycle = || Error::ReferralCycle {
        referrer: referrer_id.to_string(),
        referee: referee_id.to_string(),
    };
    if referrer_id == referee_id {
        return Err(cycle());
    }

    let txn = db.begin().await?;
    let referee = ledger::find_user(&txn, referee_id).await?;
    let referrer = ledger::find_user(&txn, referrer_id).await?;

    match referee.referred_by.as_deref() {
        Some(current) if current == referrer_id => return Ok(referee),
        Some(_) if !force => {
            return Err(Error::AlreadyReferred {
                user_id: referee.id,
            });
        }
        _ => {}
    }

    // Walk up from the new parent; meeting the referee means a cycle.
    let mut ancestor = referrer.referred_by;
    while let Some(id) = ancestor {
        if id == referee_id {
            return Err(cycle());
        }
        ancestor = User::find_by_id(id).one(&txn).await?.and_then(|u| u.referred_by);
    }

    let mut active: user::ActiveModel = referee.into();
    active.referred_by = Set(Some(referrer_id.to_string()));
    let referee = active.update(&txn).await?;
    txn.commit().await?;

    info!(
        actor = ctx.actor_id(),
        referrer_id,
        referee_id,
        force,
        "Referral linked"
    );
    Ok(referee)
}

/// Bans (`is_active = false`) or unbans (`is_active = true`) a user.
pub async fn set_banned<C>(
    db: &C,
    ctx: &AdminContext,
    user_id: &str,
    banned: bool,
) -> Result<user::Model>
where
    C: ConnectionTrait,
{
    let user = ledger::find_user(db, user_id).await?;
    let mut active: user::ActiveModel = user.into();
    active.is_active = Set(!banned);
    let user = active.update(db).await?;
    info!(actor = ctx.actor_id(), user_id, banned, "Ban state changed");
    Ok(user)
}

/// Gives a user the admin role.
pub async fn promote_to_admin<C>(db: &C, ctx: &AdminContext, user_id: &str) -> Result<user::Model>
where
    C: ConnectionTrait,
{
    let user = ledger::find_user(db, user_id).await?;
    let mut active: user::ActiveModel = user.into();
    active.role = Set(UserRole::Admin);
    let user = active.update(db).await?;
    info!(actor = ctx.actor_id(), user_id, "User promoted to admin");
    Ok(user)
}

/// Credits a manual bonus.
pub async fn grant_bonus<C>(
    db: &C,
    ctx: &AdminContext,
    user_id: &str,
    amount: Money,
    note: Option<String>,
) -> Result<transaction::Model>
where
    C: ConnectionTrait + TransactionTrait,
{
    let txn = db.begin().await?;
    let meta = TransactionMeta::Bonus {
        granted_by: ctx.actor_id().to_string(),
        note: non_empty(note),
    };
    let entry = ledger::credit(&txn, user_id, amount, meta).await?;
    txn.commit().await?;
    Ok(entry)
}

/// Grants 10% of an investment made outside the platform as a referral bonus.
///
/// The bonus goes to the user's referrer, or to the user when there is none or when
/// `assign_to_referrer` is off. With an idempotency key, a second call with the same
/// key for the same recipient is a no-op.
#[instrument(skip(db, ctx, note))]
pub async fn grant_manual_referral_bonus<C>(
    db: &C,
    ctx: &AdminContext,
    user_id: &str,
    source_amount: Money,
    note: Option<String>,
    idempotency_key: Option<String>,
    assign_to_referrer: bool,
) -> Result<ManualBonusOutcome>
where
    C: ConnectionTrait + TransactionTrait,
{
    if !source_amount.is_positive() {
        return Err(Error::InvalidAmount {
            amount: source_amount,
        });
    }
    let bonus = source_amount.apply_rate(MANUAL_REFERRAL_RATE);
    if !bonus.is_positive() {
        return Err(Error::InvalidAmount { amount: bonus });
    }
    let idempotency_key = non_empty(idempotency_key);

    let txn = db.begin().await?;
    let user = ledger::find_user(&txn, user_id).await?;
    let referrer = match user.referred_by.as_deref() {
        Some(id) if assign_to_referrer => User::find_by_id(id.to_string()).one(&txn).await?,
        _ => None,
    };
    let (recipient_id, depth) = referrer.map_or_else(|| (user.id.clone(), 0), |r| (r.id, 1));

    if let Some(key) = idempotency_key.as_deref() {
        let earlier = Transaction::find()
            .filter(transaction::Column::UserId.eq(recipient_id.as_str()))
            .filter(transaction::Column::Kind.eq(TransactionKind::Referral))
            .all(&txn)
            .await?;
        let applied = earlier.iter().any(|entry| {
            matches!(
                &entry.meta,
                TransactionMeta::Referral {
                    source: CommissionSource::Manual { idempotency_key: Some(k), .. },
                    ..
                } if k == key
            )
        });
        if applied {
            info!(recipient_id, key, "Manual referral bonus already applied");
            return Ok(ManualBonusOutcome::AlreadyApplied { recipient_id });
        }
    }

    let meta = TransactionMeta::Referral {
        level: "manual".to_string(),
        depth,
        from_user: user.id.clone(),
        rate: MANUAL_REFERRAL_RATE,
        source: CommissionSource::Manual {
            granted_by: ctx.actor_id().to_string(),
            source_amount,
            note: non_empty(note),
            idempotency_key,
        },
    };
    let entry = ledger::credit(&txn, &recipient_id, bonus, meta).await?;
    txn.commit().await?;

    info!(actor = ctx.actor_id(), recipient_id, %bonus, "Manual referral bonus granted");
    Ok(ManualBonusOutcome::Granted {
        recipient_id,
        amount: bonus,
        transaction_id: entry.id,
    })
}

/// Every account, newest first.
pub async fn list_users<C>(db: &C) -> Result<Vec<user::Model>>
where
    C: ConnectionTrait,
{
    User::find()
        .order_by_desc(user::Column::CreatedAt)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Users directly referred by `user_id`.
pub async fn direct_referrals<C>(db: &C, user_id: &str) -> Result<Vec<user::Model>>
where
    C: ConnectionTrait,
{
    User::find()
        .filter(user::Column::ReferredBy.eq(user_id))
        .all(db)
        .await
        .map_err(Into::into)
}

/// Number of users directly referred by `user_id`.
pub async fn count_direct_referrals<C>(db: &C, user_id: &str) -> Result<u64>
where
    C: ConnectionTrait,
{
    User::find()
        .filter(user::Column::ReferredBy.eq(user_id))
        .count(db)
        .await
        .map_err(Into::into)
}

/// Number of distinct direct referrals with at least one approved deposit.
pub async fn count_active_referrals<C>(db: &C, user_id: &str) -> Result<u64>
where
    C: ConnectionTrait,
{
    let ids: Vec<String> = direct_referrals(db, user_id)
        .await?
        .into_iter()
        .map(|u| u.id)
        .collect();
    if ids.is_empty() {
        return Ok(0);
    }

    let depositors: Vec<String> = Deposit::find()
        .select_only()
        .column(deposit::Column::UserId)
        .distinct()
        .filter(deposit::Column::UserId.is_in(ids))
        .filter(deposit::Column::Status.eq(DepositStatus::Approved))
        .into_tuple()
        .all(db)
        .await?;
    Ok(u64::try_from(depositors.len()).unwrap_or(u64::MAX))
}
