use std::future::Future;

use futures_util::FutureExt;
use redis::aio::MultiplexedConnection;
use uuid::Uuid;

/// Compare-and-delete: only the holder's token may release the key, so a
/// slow holder cannot free a lock that expired and was re-acquired.
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Outcome of a `with_lock` call. Contention is not an error — the caller
/// skips and the next scheduled tick retries.
#[derive(Debug)]
pub enum LockOutcome<T> {
    Ran(T),
    Skipped,
}

impl<T> LockOutcome<T> {
    pub fn ran(&self) -> bool {
        matches!(self, LockOutcome::Ran(_))
    }
}

/// Per-task mutual exclusion over a shared key with TTL and a unique token.
///
/// Keys are `task-lock:{id}`; the TTL must comfortably exceed the worst-case
/// tick duration so a live holder never loses ownership mid-tick.
#[derive(Clone)]
pub struct TaskLock {
    client: redis::Client,
    ttl_ms: u64,
}

impl TaskLock {
    pub fn new(client: redis::Client, ttl_ms: u64) -> Self {
        Self { client, ttl_ms }
    }

    fn key(task_id: Uuid) -> String {
        format!("task-lock:{task_id}")
    }

    async fn conn(&self) -> Result<MultiplexedConnection, redis::RedisError> {
        self.client.get_multiplexed_async_connection().await
    }

    /// Try to take the lock. Returns the holder token, or `None` if another
    /// worker holds it.
    pub async fn acquire(&self, task_id: Uuid) -> Result<Option<String>, redis::RedisError> {
        let token = Uuid::new_v4().to_string();
        let mut conn = self.conn().await?;

        let set: Option<String> = redis::cmd("SET")
            .arg(Self::key(task_id))
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(self.ttl_ms)
            .query_async(&mut conn)
            .await?;

        Ok(set.map(|_| token))
    }

    /// Release the lock if (and only if) `token` still holds it.
    pub async fn release(&self, task_id: Uuid, token: &str) -> Result<bool, redis::RedisError> {
        let mut conn = self.conn().await?;
        let deleted: i64 = redis::Script::new(RELEASE_SCRIPT)
            .key(Self::key(task_id))
            .arg(token)
            .invoke_async(&mut conn)
            .await?;

        Ok(deleted == 1)
    }

    /// Whether `token` still owns the lock. Long-running holders check this
    /// before mutating shared state.
    pub async fn is_held_by(&self, task_id: Uuid, token: &str) -> Result<bool, redis::RedisError> {
        let mut conn = self.conn().await?;
        let current: Option<String> = redis::cmd("GET")
            .arg(Self::key(task_id))
            .query_async(&mut conn)
            .await?;

        Ok(current.as_deref() == Some(token))
    }

    /// Run `f` under the task's lock. Skips without waiting on contention.
    /// `f` receives the holder token so long-running work can re-verify
    /// ownership before mutating shared state. The lock is released on
    /// success, on error, and on panic (the panic is re-raised after
    /// release); if the process dies mid-run, the TTL frees the key.
    pub async fn with_lock<F, Fut, T>(
        &self,
        task_id: Uuid,
        f: F,
    ) -> Result<LockOutcome<T>, redis::RedisError>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = T>,
    {
        let Some(token) = self.acquire(task_id).await? else {
            return Ok(LockOutcome::Skipped);
        };

        let result = std::panic::AssertUnwindSafe(f(token.clone()))
            .catch_unwind()
            .await;

        if let Err(e) = self.release(task_id, &token).await {
            tracing::warn!(task_id = %task_id, error = %e, "Failed to release task lock");
        }

        match result {
            Ok(value) => Ok(LockOutcome::Ran(value)),
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_keys_are_namespaced_per_task() {
        let id = Uuid::new_v4();
        assert_eq!(TaskLock::key(id), format!("task-lock:{id}"));
    }

    #[test]
    fn release_script_compares_before_deleting() {
        // The guard lives in the script itself; a plain DEL here would let a
        // stale holder free a re-acquired lock.
        assert!(RELEASE_SCRIPT.contains(r#"redis.call("GET", KEYS[1]) == ARGV[1]"#));
        assert!(RELEASE_SCRIPT.contains(r#"redis.call("DEL", KEYS[1])"#));
    }
}
