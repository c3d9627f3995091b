use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Database row for the Mock position ledger, keyed by
/// `(task_id, asset, condition_id)`. Live positions are read through from the
/// venue and materialized into this shape without ever being persisted.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Position {
    pub id: Uuid,
    pub task_id: Uuid,
    pub asset: String,
    pub condition_id: String,
    pub size: Decimal,
    pub avg_price: Decimal,
    /// Running cost basis; decreases on SELL by `sold_tokens * avg_price`.
    pub total_bought: Decimal,
    pub current_value: Decimal,
    pub realized_pnl: Decimal,
    pub cur_price: Decimal,
    pub outcome_index: i32,
    pub title: Option<String>,
    pub slug: Option<String>,
    pub outcome: Option<String>,
    pub opened_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Position {
    /// A venue-side position snapshot (Live read-through). Carries no row id
    /// and is never written back.
    pub fn snapshot(
        task_id: Uuid,
        asset: String,
        condition_id: String,
        size: Decimal,
        avg_price: Decimal,
        cur_price: Decimal,
        outcome_index: i32,
    ) -> Self {
        Self {
            id: Uuid::nil(),
            task_id,
            asset,
            condition_id,
            size,
            avg_price,
            total_bought: size * avg_price,
            current_value: size * cur_price,
            realized_pnl: Decimal::ZERO,
            cur_price,
            outcome_index,
            title: None,
            slug: None,
            outcome: None,
            opened_at: None,
            updated_at: None,
        }
    }
}
