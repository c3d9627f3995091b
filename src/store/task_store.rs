use chrono::Utc;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::errors::EngineError;
use crate::models::{Task, TaskDraft, TaskMode, TaskStatus};
use crate::polymarket::wallet;

/// Single namespace for the task registry: a hash of `id → task JSON`.
const TASKS_KEY: &str = "tasks";

/// Durable registry of copy tasks in the shared key-value store.
///
/// Writes are atomic per task (one HSET per mutation). Only the lock holder
/// writes inside the tick loop; external commands mutating status tolerate a
/// briefly skipped tick.
#[derive(Clone)]
pub struct TaskStore {
    client: redis::Client,
}

impl TaskStore {
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }

    async fn conn(&self) -> Result<MultiplexedConnection, redis::RedisError> {
        self.client.get_multiplexed_async_connection().await
    }

    /// Allocate an id, fill defaults and persist a new running task.
    ///
    /// Live drafts must carry a private key whose derived address equals the
    /// operator wallet; Mock drafts must carry a non-negative starting
    /// balance. Scheduling is the caller's job.
    pub async fn create(&self, draft: TaskDraft) -> Result<Task, EngineError> {
        if draft.fixed_amount <= Decimal::ZERO {
            return Err(EngineError::Validation(
                "fixedAmount must be positive".into(),
            ));
        }
        if draft.mode.initial_finance() < Decimal::ZERO {
            return Err(EngineError::Validation(
                "initialFinance must be non-negative".into(),
            ));
        }

        if let TaskMode::Live {
            operator_wallet,
            private_key,
            ..
        } = &draft.mode
        {
            let derived = wallet::derive_address(private_key)
                .map_err(|e| EngineError::Validation(format!("invalid private key: {e}")))?;
            if !derived.eq_ignore_ascii_case(operator_wallet) {
                return Err(EngineError::Validation(format!(
                    "private key derives {derived}, not operator wallet {operator_wallet}"
                )));
            }
        }

        let task = Task {
            id: Uuid::new_v4(),
            current_balance: draft.mode.initial_finance(),
            mode: draft.mode,
            target_address: draft.target_address,
            profile_url: draft.profile_url,
            fixed_amount: draft.fixed_amount,
            status: TaskStatus::Running,
            created_at: Utc::now(),
        };

        self.put(&task).await?;
        Ok(task)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Task>, EngineError> {
        let mut conn = self.conn().await?;
        let raw: Option<String> = conn.hget(TASKS_KEY, id.to_string()).await?;

        match raw {
            Some(json) => {
                let task = serde_json::from_str(&json)
                    .map_err(|e| EngineError::Validation(format!("corrupt task {id}: {e}")))?;
                Ok(Some(task))
            }
            None => Ok(None),
        }
    }

    /// All tasks, optionally filtered by mode.
    pub async fn list(&self, live_filter: Option<bool>) -> Result<Vec<Task>, EngineError> {
        let mut conn = self.conn().await?;
        let raw: Vec<(String, String)> = conn.hgetall(TASKS_KEY).await?;

        let mut tasks = Vec::with_capacity(raw.len());
        for (id, json) in raw {
            match serde_json::from_str::<Task>(&json) {
                Ok(task) => {
                    if live_filter.map_or(true, |live| task.is_live() == live) {
                        tasks.push(task);
                    }
                }
                Err(e) => {
                    tracing::error!(task_id = %id, error = %e, "Skipping corrupt task entry");
                }
            }
        }

        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks)
    }

    /// Persist the task, replacing the stored value (last writer wins).
    pub async fn update(&self, task: &Task) -> Result<(), EngineError> {
        self.put(task).await
    }

    pub async fn set_status(&self, id: Uuid, status: TaskStatus) -> Result<Task, EngineError> {
        let mut task = self.get(id).await?.ok_or(EngineError::TaskNotFound(id))?;
        task.status = status;
        self.put(&task).await?;
        Ok(task)
    }

    /// Delete a task entry. Returns the removed task, if any. Purging its
    /// activities, positions and trade records is the caller's job.
    pub async fn remove(&self, id: Uuid) -> Result<Option<Task>, EngineError> {
        let task = self.get(id).await?;
        if task.is_some() {
            let mut conn = self.conn().await?;
            let _: i64 = conn.hdel(TASKS_KEY, id.to_string()).await?;
        }
        Ok(task)
    }

    /// Delete every task entry, returning what was removed.
    pub async fn remove_all(&self) -> Result<Vec<Task>, EngineError> {
        let tasks = self.list(None).await?;
        if !tasks.is_empty() {
            let mut conn = self.conn().await?;
            let _: i64 = conn.del(TASKS_KEY).await?;
        }
        Ok(tasks)
    }

    async fn put(&self, task: &Task) -> Result<(), EngineError> {
        let json = serde_json::to_string(task)
            .map_err(|e| EngineError::Validation(format!("unserializable task: {e}")))?;
        let mut conn = self.conn().await?;
        let _: i64 = conn.hset(TASKS_KEY, task.id.to_string(), json).await?;
        Ok(())
    }
}
