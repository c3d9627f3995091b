use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Activity (Data API)
// ---------------------------------------------------------------------------

/// A single event from `/activity?user=…&start=…`. Field names follow the
/// venue's camelCase wire format.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiActivity {
    #[serde(default)]
    pub transaction_hash: Option<String>,
    /// Unix seconds.
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub condition_id: Option<String>,
    /// Outcome token id (decimal string).
    #[serde(default)]
    pub asset: Option<String>,
    /// BUY | SELL; absent for REDEEM rows.
    #[serde(default)]
    pub side: Option<String>,
    /// TRADE | REDEEM | SPLIT | MERGE | …
    #[serde(default, rename = "type")]
    pub activity_type: Option<String>,
    #[serde(default)]
    pub size: Option<Decimal>,
    /// Notional in quote units.
    #[serde(default)]
    pub usdc_size: Option<Decimal>,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub outcome_index: Option<i32>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub outcome: Option<String>,
}

impl ApiActivity {
    /// Effective side for the engine: REDEEM rows carry no side field.
    pub fn effective_side(&self) -> Option<crate::models::Side> {
        if self
            .activity_type
            .as_deref()
            .is_some_and(|t| t.eq_ignore_ascii_case("REDEEM"))
        {
            return Some(crate::models::Side::Redeem);
        }
        self.side
            .as_deref()
            .and_then(crate::models::Side::from_api_str)
    }
}

// ---------------------------------------------------------------------------
// Position (Data API)
// ---------------------------------------------------------------------------

/// A holding from `/positions?user=…&redeemable=false&limit=500`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiPosition {
    #[serde(default)]
    pub asset: Option<String>,
    #[serde(default)]
    pub condition_id: Option<String>,
    #[serde(default)]
    pub size: Option<Decimal>,
    #[serde(default)]
    pub avg_price: Option<Decimal>,
    #[serde(default)]
    pub cur_price: Option<Decimal>,
    #[serde(default)]
    pub current_value: Option<Decimal>,
    #[serde(default)]
    pub outcome_index: Option<i32>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub outcome: Option<String>,
}

// ---------------------------------------------------------------------------
// Order book (CLOB API)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct ApiOrderBookLevel {
    pub price: Decimal,
    pub size: Decimal,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ApiOrderBook {
    pub market: Option<String>,
    pub asset_id: Option<String>,
    #[serde(default)]
    pub bids: Vec<ApiOrderBookLevel>,
    #[serde(default)]
    pub asks: Vec<ApiOrderBookLevel>,
    pub hash: Option<String>,
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiPrice {
    pub price: Decimal,
}

// ---------------------------------------------------------------------------
// Orders (CLOB API)
// ---------------------------------------------------------------------------

/// Fill-or-kill market order request body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FokOrderRequest {
    pub token_id: String,
    pub side: String,
    pub size: Decimal,
    pub price: Decimal,
    pub order_type: String,
}

impl FokOrderRequest {
    pub fn new(token_id: &str, side: crate::models::Side, size: Decimal, price: Decimal) -> Self {
        Self {
            token_id: token_id.to_string(),
            side: side.as_str().to_string(),
            size,
            price,
            order_type: "FOK".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub error_msg: Option<String>,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    /// Tokens received (BUY) or given (SELL).
    #[serde(default)]
    pub making_amount: Option<Decimal>,
    /// Quote spent (BUY) or received (SELL).
    #[serde(default)]
    pub taking_amount: Option<Decimal>,
}

impl OrderResponse {
    /// Whether the rejection means the wallet cannot fund further orders.
    pub fn is_insufficient_funds(&self) -> bool {
        self.error_msg.as_deref().is_some_and(|msg| {
            let msg = msg.to_lowercase();
            msg.contains("insufficient")
                || msg.contains("not enough balance")
                || msg.contains("allowance")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redeem_rows_have_no_side_field() {
        let json = r#"{"transactionHash":"0xabc","timestamp":1700000000,
            "conditionId":"0xc1","asset":"123","type":"REDEEM","size":"200",
            "usdcSize":"200","price":"1","outcomeIndex":0}"#;
        let activity: ApiActivity = serde_json::from_str(json).unwrap();
        assert_eq!(activity.effective_side(), Some(crate::models::Side::Redeem));
    }

    #[test]
    fn trade_rows_use_the_side_field() {
        let json = r#"{"transactionHash":"0xabc","timestamp":1700000000,
            "conditionId":"0xc1","asset":"123","type":"TRADE","side":"BUY",
            "size":"250","usdcSize":"100","price":"0.4","outcomeIndex":0}"#;
        let activity: ApiActivity = serde_json::from_str(json).unwrap();
        assert_eq!(activity.effective_side(), Some(crate::models::Side::Buy));
    }

    #[test]
    fn insufficient_funds_detection_matches_venue_wording() {
        let rejected = OrderResponse {
            success: false,
            error_msg: Some("not enough balance / allowance".into()),
            order_id: None,
            status: None,
            making_amount: None,
            taking_amount: None,
        };
        assert!(rejected.is_insufficient_funds());

        let other = OrderResponse {
            success: false,
            error_msg: Some("order crosses no liquidity".into()),
            order_id: None,
            status: None,
            making_amount: None,
            taking_amount: None,
        };
        assert!(!other.is_insufficient_funds());
    }
}
