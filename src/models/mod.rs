pub mod activity;
pub mod position;
pub mod task;
pub mod trade_record;

pub use activity::{Activity, DUPLICATE_EXEC_SENTINEL};
pub use position::Position;
pub use task::{Task, TaskDraft, TaskMode, TaskStatus};
pub use trade_record::TradeRecord;

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Side
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
    Redeem,
}

impl Side {
    pub fn from_api_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "BUY" | "0" => Some(Side::Buy),
            "SELL" | "1" => Some(Side::Sell),
            "REDEEM" => Some(Side::Redeem),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
            Side::Redeem => "REDEEM",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_parses_api_variants() {
        assert_eq!(Side::from_api_str("buy"), Some(Side::Buy));
        assert_eq!(Side::from_api_str("SELL"), Some(Side::Sell));
        assert_eq!(Side::from_api_str("Redeem"), Some(Side::Redeem));
        assert_eq!(Side::from_api_str("0"), Some(Side::Buy));
        assert_eq!(Side::from_api_str("MERGE"), None);
    }
}
