use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// `exec_attempts` value marking a BUY that was pre-closed at ingest time
/// because an earlier BUY for the same condition already existed in the same
/// response window. Such rows are never handed to a handler.
pub const DUPLICATE_EXEC_SENTINEL: i32 = -1;

/// Activity lifecycle states. Only `new` rows are eligible for handling.
pub mod status {
    pub const NEW: &str = "new";
    pub const CLAIMED: &str = "claimed";
    pub const DONE_OK: &str = "done_ok";
    pub const DONE_SKIPPED: &str = "done_skipped";
    pub const DONE_EXHAUSTED: &str = "done_exhausted";
}

/// Database row for a single observed event on the target account, scoped to
/// the owning task. `(tx_hash, task_id)` is unique.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Activity {
    pub id: Uuid,
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
    /// True once the engine is finished with this row.
    pub bot: bool,
    pub exec_attempts: i32,
    pub status: String,
    /// Token quantity this engine actually acquired for a BUY; consumed by
    /// later proportional SELL sizing.
    pub my_bought_size: Option<Decimal>,
    pub created_at: Option<DateTime<Utc>>,
}

impl Activity {
    pub fn is_pending(&self) -> bool {
        self.status == status::NEW && !self.bot
    }

    pub fn side(&self) -> Option<crate::models::Side> {
        crate::models::Side::from_api_str(&self.side)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn activity(status: &str, bot: bool) -> Activity {
        Activity {
            id: Uuid::new_v4(),
            task_id: Uuid::new_v4(),
            tx_hash: "0xabc".into(),
            condition_id: "0xcond".into(),
            asset: "123".into(),
            side: "BUY".into(),
            size: dec!(250),
            notional: dec!(100),
            price: dec!(0.40),
            outcome_index: 0,
            title: None,
            slug: None,
            outcome: None,
            timestamp: Utc::now(),
            bot,
            exec_attempts: 0,
            status: status.into(),
            my_bought_size: None,
            created_at: None,
        }
    }

    #[test]
    fn only_new_unbotted_rows_are_pending() {
        assert!(activity(status::NEW, false).is_pending());
        assert!(!activity(status::NEW, true).is_pending());
        assert!(!activity(status::CLAIMED, false).is_pending());
        assert!(!activity(status::DONE_OK, true).is_pending());
        assert!(!activity(status::DONE_SKIPPED, true).is_pending());
        assert!(!activity(status::DONE_EXHAUSTED, true).is_pending());
    }
}
