use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::activity::{status, DUPLICATE_EXEC_SENTINEL};
use crate::models::Activity;

/// Fields of an activity as returned by the venue, before processing marks.
#[derive(Debug, Clone)]
pub struct NewActivity {
    pub task_id: Uuid,
    pub tx_hash: String,
    pub condition_id: String,
    pub asset: String,
    pub side: String,
    pub size: Decimal,
    pub notional: Decimal,
    pub price: Decimal,
    pub outcome_index: i32,
    pub title: Option<String>,
    pub slug: Option<String>,
    pub outcome: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// True if this (tx_hash, task_id) pair is already persisted.
pub async fn exists(pool: &PgPool, task_id: Uuid, tx_hash: &str) -> anyhow::Result<bool> {
    let row: (bool,) = sqlx::query_as(
        "SELECT EXISTS(SELECT 1 FROM activities WHERE task_id = $1 AND tx_hash = $2)",
    )
    .bind(task_id)
    .bind(tx_hash)
    .fetch_one(pool)
    .await?;

    Ok(row.0)
}

/// Persist a fresh activity in the `new` state.
pub async fn insert(pool: &PgPool, new: &NewActivity) -> anyhow::Result<Activity> {
    insert_with_marks(pool, new, status::NEW, false, 0).await
}

/// Persist an ingest-time duplicate BUY, pre-closed so no handler ever runs it.
pub async fn insert_duplicate(pool: &PgPool, new: &NewActivity) -> anyhow::Result<Activity> {
    insert_with_marks(pool, new, status::DONE_SKIPPED, true, DUPLICATE_EXEC_SENTINEL).await
}

async fn insert_with_marks(
    pool: &PgPool,
    new: &NewActivity,
    status: &str,
    bot: bool,
    exec_attempts: i32,
) -> anyhow::Result<Activity> {
    let activity = sqlx::query_as::<_, Activity>(
        r#"
        INSERT INTO activities
            (task_id, tx_hash, condition_id, asset, side, size, notional, price,
             outcome_index, title, slug, outcome, timestamp, bot, exec_attempts, status)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
        RETURNING *
        "#,
    )
    .bind(new.task_id)
    .bind(&new.tx_hash)
    .bind(&new.condition_id)
    .bind(&new.asset)
    .bind(&new.side)
    .bind(new.size)
    .bind(new.notional)
    .bind(new.price)
    .bind(new.outcome_index)
    .bind(&new.title)
    .bind(&new.slug)
    .bind(&new.outcome)
    .bind(new.timestamp)
    .bind(bot)
    .bind(exec_attempts)
    .bind(status)
    .fetch_one(pool)
    .await?;

    Ok(activity)
}

/// Pending activities for a task, in the order the venue returned them.
pub async fn get_pending(pool: &PgPool, task_id: Uuid) -> anyhow::Result<Vec<Activity>> {
    let activities = sqlx::query_as::<_, Activity>(
        "SELECT * FROM activities WHERE task_id = $1 AND bot = FALSE AND status = 'new' ORDER BY seq",
    )
    .bind(task_id)
    .fetch_all(pool)
    .await?;

    Ok(activities)
}

/// Claim an activity before handling (`new → claimed`). Returns false if the
/// row was no longer `new` — a concurrent attempt already took it.
pub async fn claim(pool: &PgPool, id: Uuid) -> anyhow::Result<bool> {
    let result = sqlx::query(
        "UPDATE activities SET exec_attempts = 1, status = 'claimed' WHERE id = $1 AND status = 'new'",
    )
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Terminal transition: `claimed → done_ok | done_skipped | done_exhausted`.
pub async fn mark_done(pool: &PgPool, id: Uuid, terminal_status: &str) -> anyhow::Result<()> {
    sqlx::query("UPDATE activities SET bot = TRUE, status = $2 WHERE id = $1")
        .bind(id)
        .bind(terminal_status)
        .execute(pool)
        .await?;

    Ok(())
}

/// Persist the token quantity a live BUY actually acquired.
pub async fn set_my_bought_size(pool: &PgPool, id: Uuid, size: Decimal) -> anyhow::Result<()> {
    sqlx::query("UPDATE activities SET my_bought_size = $2 WHERE id = $1")
        .bind(id)
        .bind(size)
        .execute(pool)
        .await?;

    Ok(())
}

/// Sum of sizes of this task's unprocessed SELL activities for an asset,
/// including any row currently claimed. Used to reconstruct the target's
/// position size before the pending exits fired.
pub async fn sum_unprocessed_sell_size(
    pool: &PgPool,
    task_id: Uuid,
    asset: &str,
) -> anyhow::Result<Decimal> {
    let row: (Option<Decimal>,) = sqlx::query_as(
        r#"
        SELECT COALESCE(SUM(size), 0) FROM activities
        WHERE task_id = $1 AND asset = $2 AND side = 'SELL' AND bot = FALSE
        "#,
    )
    .bind(task_id)
    .bind(asset)
    .fetch_one(pool)
    .await?;

    Ok(row.0.unwrap_or(Decimal::ZERO))
}

/// Sum of tracked bought sizes across completed BUYs for an asset.
pub async fn sum_my_bought_size(
    pool: &PgPool,
    task_id: Uuid,
    asset: &str,
) -> anyhow::Result<Decimal> {
    let row: (Option<Decimal>,) = sqlx::query_as(
        r#"
        SELECT COALESCE(SUM(my_bought_size), 0) FROM activities
        WHERE task_id = $1 AND asset = $2 AND side = 'BUY'
          AND status = 'done_ok' AND my_bought_size > 0
        "#,
    )
    .bind(task_id)
    .bind(asset)
    .fetch_one(pool)
    .await?;

    Ok(row.0.unwrap_or(Decimal::ZERO))
}

/// Whether a completed BUY with a tracked fill already exists for a market.
/// Guards the live BUY path against double-buying while the venue's position
/// endpoint still lags the previous fill.
pub async fn has_filled_buy_for_condition(
    pool: &PgPool,
    task_id: Uuid,
    condition_id: &str,
) -> anyhow::Result<bool> {
    let row: (bool,) = sqlx::query_as(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM activities
            WHERE task_id = $1 AND condition_id = $2 AND side = 'BUY'
              AND status = 'done_ok' AND my_bought_size > 0
        )
        "#,
    )
    .bind(task_id)
    .bind(condition_id)
    .fetch_one(pool)
    .await?;

    Ok(row.0)
}

/// Zero every tracked bought size for an asset (holdings fully exited).
pub async fn zero_my_bought_sizes(
    pool: &PgPool,
    task_id: Uuid,
    asset: &str,
) -> anyhow::Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE activities SET my_bought_size = 0
        WHERE task_id = $1 AND asset = $2 AND side = 'BUY' AND my_bought_size > 0
        "#,
    )
    .bind(task_id)
    .bind(asset)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Scale every tracked bought size for an asset by `factor` (partial exit).
pub async fn scale_my_bought_sizes(
    pool: &PgPool,
    task_id: Uuid,
    asset: &str,
    factor: Decimal,
) -> anyhow::Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE activities SET my_bought_size = my_bought_size * $3
        WHERE task_id = $1 AND asset = $2 AND side = 'BUY' AND my_bought_size > 0
        "#,
    )
    .bind(task_id)
    .bind(asset)
    .bind(factor)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Hand a claimed row back (`claimed → new`) after a transient mid-handler
/// failure, so the next tick retries it instead of stalling forever.
pub async fn release_claim(pool: &PgPool, id: Uuid) -> anyhow::Result<()> {
    sqlx::query("UPDATE activities SET status = 'new' WHERE id = $1 AND status = 'claimed'")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Startup recovery: a crash between claim and completion leaves rows stuck
/// in `claimed`; reset them so the next tick picks them up again.
pub async fn reset_claimed_to_new(pool: &PgPool, task_id: Uuid) -> anyhow::Result<u64> {
    let result = sqlx::query(
        "UPDATE activities SET status = 'new', exec_attempts = 0 WHERE task_id = $1 AND status = 'claimed'",
    )
    .bind(task_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

pub async fn delete_for_task(pool: &PgPool, task_id: Uuid) -> anyhow::Result<u64> {
    let result = sqlx::query("DELETE FROM activities WHERE task_id = $1")
        .bind(task_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}
