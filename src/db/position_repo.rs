use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::Position;

/// Market metadata carried onto a position row when it is opened.
#[derive(Debug, Clone, Default)]
pub struct PositionMeta {
    pub outcome_index: i32,
    pub title: Option<String>,
    pub slug: Option<String>,
    pub outcome: Option<String>,
}

/// All positions held by a task (Mock ledger).
pub async fn find(pool: &PgPool, task_id: Uuid) -> anyhow::Result<Vec<Position>> {
    let positions = sqlx::query_as::<_, Position>(
        "SELECT * FROM positions WHERE task_id = $1 ORDER BY opened_at",
    )
    .bind(task_id)
    .fetch_all(pool)
    .await?;

    Ok(positions)
}

pub async fn find_one(
    pool: &PgPool,
    task_id: Uuid,
    condition_id: &str,
) -> anyhow::Result<Option<Position>> {
    let position = sqlx::query_as::<_, Position>(
        "SELECT * FROM positions WHERE task_id = $1 AND condition_id = $2 LIMIT 1",
    )
    .bind(task_id)
    .bind(condition_id)
    .fetch_optional(pool)
    .await?;

    Ok(position)
}

/// Lookup by outcome token. A market has one position per outcome held, so
/// SELL/REDEEM handlers key on the asset rather than the condition.
pub async fn find_one_by_asset(
    pool: &PgPool,
    task_id: Uuid,
    asset: &str,
) -> anyhow::Result<Option<Position>> {
    let position = sqlx::query_as::<_, Position>(
        "SELECT * FROM positions WHERE task_id = $1 AND asset = $2 LIMIT 1",
    )
    .bind(task_id)
    .bind(asset)
    .fetch_optional(pool)
    .await?;

    Ok(position)
}

/// Open a position after a BUY fill, or add to an existing one in the same
/// market at a weighted average entry price.
#[allow(clippy::too_many_arguments)]
pub async fn upsert_buy(
    pool: &PgPool,
    task_id: Uuid,
    asset: &str,
    condition_id: &str,
    fill_size: Decimal,
    fill_price: Decimal,
    quote_spent: Decimal,
    meta: &PositionMeta,
) -> anyhow::Result<Position> {
    let existing = sqlx::query_as::<_, Position>(
        "SELECT * FROM positions WHERE task_id = $1 AND asset = $2 AND condition_id = $3 LIMIT 1",
    )
    .bind(task_id)
    .bind(asset)
    .bind(condition_id)
    .fetch_optional(pool)
    .await?;

    match existing {
        Some(pos) => {
            let new_size = pos.size + fill_size;
            let new_avg = (pos.avg_price * pos.size + fill_price * fill_size) / new_size;

            let updated = sqlx::query_as::<_, Position>(
                r#"
                UPDATE positions
                SET size = $2, avg_price = $3, total_bought = total_bought + $4,
                    cur_price = $5, current_value = $2 * $5, updated_at = NOW()
                WHERE id = $1
                RETURNING *
                "#,
            )
            .bind(pos.id)
            .bind(new_size)
            .bind(new_avg)
            .bind(quote_spent)
            .bind(fill_price)
            .fetch_one(pool)
            .await?;

            Ok(updated)
        }
        None => {
            let pos = sqlx::query_as::<_, Position>(
                r#"
                INSERT INTO positions
                    (task_id, asset, condition_id, size, avg_price, total_bought,
                     current_value, realized_pnl, cur_price, outcome_index, title, slug, outcome)
                VALUES ($1, $2, $3, $4, $5, $6, $4 * $5, 0, $5, $7, $8, $9, $10)
                RETURNING *
                "#,
            )
            .bind(task_id)
            .bind(asset)
            .bind(condition_id)
            .bind(fill_size)
            .bind(fill_price)
            .bind(quote_spent)
            .bind(meta.outcome_index)
            .bind(&meta.title)
            .bind(&meta.slug)
            .bind(&meta.outcome)
            .fetch_one(pool)
            .await?;

            Ok(pos)
        }
    }
}

/// Shrink a position after a partial SELL: decrement size, reduce the cost
/// basis by `sold_tokens * avg_price`, and accumulate realized PnL.
pub async fn reduce_after_sell(
    pool: &PgPool,
    id: Uuid,
    sold_tokens: Decimal,
    cost_basis_out: Decimal,
    realized_pnl_inc: Decimal,
    cur_price: Decimal,
) -> anyhow::Result<Position> {
    let updated = sqlx::query_as::<_, Position>(
        r#"
        UPDATE positions
        SET size = size - $2,
            total_bought = total_bought - $3,
            realized_pnl = realized_pnl + $4,
            cur_price = $5,
            current_value = (size - $2) * $5,
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(sold_tokens)
    .bind(cost_basis_out)
    .bind(realized_pnl_inc)
    .bind(cur_price)
    .fetch_one(pool)
    .await?;

    Ok(updated)
}

/// Refresh the mark price and derived value of an open position.
pub async fn update_price(pool: &PgPool, id: Uuid, cur_price: Decimal) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        UPDATE positions
        SET cur_price = $2, current_value = size * $2, updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(cur_price)
    .execute(pool)
    .await?;

    Ok(())
}

/// Remove a fully-exited position. `size = 0` rows must not linger.
pub async fn delete(pool: &PgPool, id: Uuid) -> anyhow::Result<()> {
    sqlx::query("DELETE FROM positions WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn delete_for_task(pool: &PgPool, task_id: Uuid) -> anyhow::Result<u64> {
    let result = sqlx::query("DELETE FROM positions WHERE task_id = $1")
        .bind(task_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}
