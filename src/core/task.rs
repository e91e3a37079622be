//! Paid tasks (watch a video, answer a survey).

use crate::{
    config::settings::TaskConfig,
    core::{ledger, money::Money},
    entities::{Task, task, transaction, transaction::TransactionMeta},
    errors::{Error, Result},
};
use sea_orm::{
    ActiveModelTrait, ConnectionTrait, EntityTrait, QueryOrder, Set, TransactionTrait,
};
use tracing::info;

/// Inserts catalogue tasks that do not exist yet.
pub async fn seed_tasks<C>(db: &C, tasks: &[TaskConfig]) -> Result<usize>
where
    C: ConnectionTrait,
{
    let mut inserted = 0;
    for config in tasks {
        if Task::find_by_id(config.id.clone()).one(db).await?.is_some() {
            continue;
        }
        let reward = Money::try_from_decimal(config.reward)?;
        if reward < Money::ZERO {
            return Err(Error::InvalidAmount { amount: reward });
        }
        task::ActiveModel {
            id: Set(config.id.clone()),
            title: Set(config.title.clone()),
            kind: Set(config.kind.clone()),
            reward: Set(reward),
        }
        .insert(db)
        .await?;
        inserted += 1;
    }
    info!(inserted, total = tasks.len(), "Tasks seeded");
    Ok(inserted)
}

/// All tasks.
pub async fn list_tasks<C>(db: &C) -> Result<Vec<task::Model>>
where
    C: ConnectionTrait,
{
    Task::find()
        .order_by_asc(task::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Credits the reward of a task to an active account.
pub async fn complete_task<C>(db: &C, user_id: &str, task_id: &str) -> Result<transaction::Model>
where
    C: ConnectionTrait + TransactionTrait,
{
    let txn = db.begin().await?;
    let user = ledger::find_user(&txn, user_id).await?;
    if !user.is_active {
        return Err(Error::AccountInactive { user_id: user.id });
    }
    let task = Task::find_by_id(task_id.to_string())
        .one(&txn)
        .await?
        .ok_or_else(|| Error::not_found("task", task_id))?;

    let meta = TransactionMeta::Credit {
        task_id: task.id.clone(),
    };
    let entry = ledger::credit(&txn, user_id, task.reward, meta).await?;
    txn.commit().await?;
    Ok(entry)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::core::user;
    use crate::test_utils::*;

    fn catalogue() -> Vec<TaskConfig> {
        vec![
            TaskConfig {
                id: "t1".to_string(),
                title: "Watch a video".to_string(),
                kind: "video".to_string(),
                reward: 0.2,
            },
            TaskConfig {
                id: "t2".to_string(),
                title: "Complete survey".to_string(),
                kind: "survey".to_string(),
                reward: 0.5,
            },
        ]
    }

    #[tokio::test]
    async fn test_seed_and_complete() -> Result<()> {
        let db = setup_test_db().await?;
        assert_eq!(seed_tasks(&db, &catalogue()).await?, 2);
        assert_eq!(seed_tasks(&db, &catalogue()).await?, 0);
        assert_eq!(list_tasks(&db).await?.len(), 2);

        let user = create_test_user(&db, "tasks@example.com", None).await?;
        assert!(matches!(
            complete_task(&db, &user.id, "t1").await,
            Err(Error::AccountInactive { .. })
        ));

        user::set_banned(&db, &test_admin(), &user.id, false).await?;
        complete_task(&db, &user.id, "t1").await?;
        let entry = complete_task(&db, &user.id, "t2").await?;
        assert_eq!(entry.amount, Money::from_minor(50));
        assert_eq!(
            ledger::find_user(&db, &user.id).await?.wallet,
            Money::from_minor(70)
        );

        assert!(matches!(
            complete_task(&db, &user.id, "t9").await,
            Err(Error::NotFound { entity: "task", .. })
        ));
        Ok(())
    }
}
