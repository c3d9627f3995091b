use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::TradeRecord;

#[derive(Debug, Clone)]
pub struct NewTradeRecord {
    pub task_id: Uuid,
    pub side: String,
    pub asset: String,
    pub condition_id: String,
    pub size: Decimal,
    pub price: Decimal,
    pub quote_amount: Decimal,
    pub realized_pnl: Decimal,
    pub source_tx_hash: String,
    pub title: Option<String>,
}

/// Append a fill to the trade record log.
pub async fn append(pool: &PgPool, new: &NewTradeRecord) -> anyhow::Result<TradeRecord> {
    let record = sqlx::query_as::<_, TradeRecord>(
        r#"
        INSERT INTO trade_records
            (task_id, side, asset, condition_id, size, price, quote_amount,
             realized_pnl, source_tx_hash, title)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING *
        "#,
    )
    .bind(new.task_id)
    .bind(&new.side)
    .bind(&new.asset)
    .bind(&new.condition_id)
    .bind(new.size)
    .bind(new.price)
    .bind(new.quote_amount)
    .bind(new.realized_pnl)
    .bind(&new.source_tx_hash)
    .bind(&new.title)
    .fetch_one(pool)
    .await?;

    Ok(record)
}

/// Append, but never let a log failure break the surrounding handler.
pub async fn append_best_effort(pool: &PgPool, new: &NewTradeRecord) {
    if let Err(e) = append(pool, new).await {
        tracing::error!(
            error = %e,
            task_id = %new.task_id,
            side = %new.side,
            tx_hash = %new.source_tx_hash,
            "Failed to append trade record"
        );
    }
}

pub async fn delete_for_task(pool: &PgPool, task_id: Uuid) -> anyhow::Result<u64> {
    let result = sqlx::query("DELETE FROM trade_records WHERE task_id = $1")
        .bind(task_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}
