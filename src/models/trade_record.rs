use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Append-only ledger row written on every executed fill (BUY, SELL or
/// REDEEM, Mock or Live). Never updated; deleted only with the owning task.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TradeRecord {
    pub id: Uuid,
    pub task_id: Uuid,
    pub side: String,
    pub asset: String,
    pub condition_id: String,
    pub size: Decimal,
    pub price: Decimal,
    pub quote_amount: Decimal,
    pub realized_pnl: Decimal,
    /// Transaction hash of the source activity, for audit.
    pub source_tx_hash: String,
    pub title: Option<String>,
    pub executed_at: DateTime<Utc>,
}
