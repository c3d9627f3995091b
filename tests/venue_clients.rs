//! Venue client and live order loop tests against a mock HTTP server.

use rust_decimal_macros::dec;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use copycat::config::AppConfig;
use copycat::execution::live_orders::{self, LiveLoopEnd};
use copycat::polymarket::{ClobAuth, ClobClient, DataClient};

fn test_config() -> AppConfig {
    std::env::set_var("DATABASE_URL", "postgres://localhost:5432/copycat_test");
    std::env::set_var("REDIS_URL", "redis://127.0.0.1:6379");
    AppConfig::from_env().expect("test config")
}

fn test_auth() -> ClobAuth {
    use base64::Engine;
    let secret = base64::engine::general_purpose::STANDARD.encode(b"clob-test-secret");
    ClobAuth::new("key".into(), secret, "pass".into())
}

fn clob_for(server: &MockServer) -> ClobClient {
    ClobClient::new(reqwest::Client::new(), server.uri(), Some(test_auth()))
}

// ---------------------------------------------------------------------------
// Data API
// ---------------------------------------------------------------------------

#[tokio::test]
async fn activity_fetch_sends_window_and_parses_rows() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/activity"))
        .and(query_param("user", "0xtarget"))
        .and(query_param("start", "1700000000"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {
                "transactionHash": "0xaaa",
                "timestamp": 1_700_000_100,
                "conditionId": "0xc1",
                "asset": "123",
                "type": "TRADE",
                "side": "BUY",
                "size": "250",
                "usdcSize": "100",
                "price": "0.4",
                "outcomeIndex": 0,
                "title": "Will it resolve yes?"
            }
        ])))
        .mount(&server)
        .await;

    let client = DataClient::new(reqwest::Client::new(), server.uri());
    let rows = client.get_activity("0xtarget", 1_700_000_000).await.unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].transaction_hash.as_deref(), Some("0xaaa"));
    assert_eq!(rows[0].size, Some(dec!(250)));
    assert_eq!(
        rows[0].effective_side(),
        Some(copycat::models::Side::Buy)
    );
}

#[tokio::test]
async fn position_fetch_requests_open_positions_only() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/positions"))
        .and(query_param("user", "0xwallet"))
        .and(query_param("redeemable", "false"))
        .and(query_param("limit", "500"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {
                "asset": "123",
                "conditionId": "0xc1",
                "size": "60",
                "avgPrice": "0.30",
                "curPrice": "0.50",
                "outcomeIndex": 0
            }
        ])))
        .mount(&server)
        .await;

    let client = DataClient::new(reqwest::Client::new(), server.uri());
    let positions = client.get_positions("0xwallet").await.unwrap();

    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0].size, Some(dec!(60)));
    assert_eq!(positions[0].avg_price, Some(dec!(0.30)));
}

#[tokio::test]
async fn transient_5xx_is_retried_until_success() {
    let server = MockServer::start().await;

    // First hit fails, the retry succeeds.
    Mock::given(method("GET"))
        .and(path("/activity"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/activity"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .with_priority(2)
        .mount(&server)
        .await;

    let client = DataClient::new(reqwest::Client::new(), server.uri());
    let rows = client.get_activity("0xtarget", 0).await.unwrap();
    assert!(rows.is_empty());
}

// ---------------------------------------------------------------------------
// Order-book API
// ---------------------------------------------------------------------------

#[tokio::test]
async fn order_book_and_price_endpoints_parse() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/orderbook/123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "asset_id": "123",
            "bids": [{"price": "0.39", "size": "500"}],
            "asks": [{"price": "0.41", "size": "400"}]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/price"))
        .and(query_param("token_id", "123"))
        .and(query_param("side", "sell"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "price": "0.39"
        })))
        .mount(&server)
        .await;

    let clob = clob_for(&server);

    let book = clob.get_order_book("123").await.unwrap();
    assert_eq!(book.asks[0].price, dec!(0.41));
    assert_eq!(book.bids[0].size, dec!(500));

    let price = clob.get_sell_price("123").await.unwrap();
    assert_eq!(price.price, dec!(0.39));
}

// ---------------------------------------------------------------------------
// Live BUY loop
// ---------------------------------------------------------------------------

#[tokio::test]
async fn live_buy_lifts_the_best_ask_until_budget_spent() {
    let config = test_config();
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/orderbook/123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "asset_id": "123",
            "bids": [],
            "asks": [{"price": "0.40", "size": "400"}]
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/order"))
        .and(body_partial_json(serde_json::json!({
            "side": "BUY",
            "orderType": "FOK"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "success": true,
            "orderId": "ord-1",
            "status": "matched",
            "makingAmount": "250",
            "takingAmount": "100"
        })))
        .mount(&server)
        .await;

    let clob = clob_for(&server);
    let (fills, end) =
        live_orders::run_live_buy(&clob, "123", dec!(0.40), dec!(100), &config).await;

    assert_eq!(end, LiveLoopEnd::Done);
    assert_eq!(fills.tokens, dec!(250));
    assert_eq!(fills.quote, dec!(100));
    assert_eq!(fills.avg_price(), dec!(0.40));
}

#[tokio::test]
async fn live_buy_aborts_when_best_ask_breaches_the_guard() {
    let config = test_config();
    let server = MockServer::start().await;

    // Best ask 0.50 against a 0.40 target: past the 0.05 absolute guard.
    Mock::given(method("GET"))
        .and(path("/orderbook/123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "asset_id": "123",
            "bids": [],
            "asks": [{"price": "0.50", "size": "1000"}]
        })))
        .mount(&server)
        .await;

    let clob = clob_for(&server);
    let (fills, end) =
        live_orders::run_live_buy(&clob, "123", dec!(0.40), dec!(100), &config).await;

    assert_eq!(end, LiveLoopEnd::PriceGuard);
    assert!(!fills.any());
}

#[tokio::test]
async fn live_buy_stops_on_insufficient_funds() {
    let config = test_config();
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/orderbook/123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "asset_id": "123",
            "bids": [],
            "asks": [{"price": "0.40", "size": "400"}]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/order"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "success": false,
            "errorMsg": "not enough balance / allowance"
        })))
        .mount(&server)
        .await;

    let clob = clob_for(&server);
    let (fills, end) =
        live_orders::run_live_buy(&clob, "123", dec!(0.40), dec!(100), &config).await;

    assert!(matches!(end, LiveLoopEnd::Exhausted(_)));
    assert!(!fills.any());
}

#[tokio::test]
async fn live_buy_drains_retries_on_repeated_rejections() {
    let config = test_config();
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/orderbook/123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "asset_id": "123",
            "bids": [],
            "asks": [{"price": "0.40", "size": "400"}]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/order"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "success": false,
            "errorMsg": "order could not be matched"
        })))
        .expect(3)
        .mount(&server)
        .await;

    let clob = clob_for(&server);
    let (fills, end) =
        live_orders::run_live_buy(&clob, "123", dec!(0.40), dec!(100), &config).await;

    assert_eq!(end, LiveLoopEnd::Exhausted("retry limit reached".into()));
    assert!(!fills.any());
}

// ---------------------------------------------------------------------------
// Live SELL loop
// ---------------------------------------------------------------------------

#[tokio::test]
async fn live_sell_hits_the_best_bid() {
    let config = test_config();
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/orderbook/123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "asset_id": "123",
            "bids": [{"price": "0.50", "size": "1000"}],
            "asks": []
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/order"))
        .and(body_partial_json(serde_json::json!({
            "side": "SELL",
            "orderType": "FOK"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "success": true,
            "orderId": "ord-2",
            "status": "matched",
            "makingAmount": "40",
            "takingAmount": "20"
        })))
        .mount(&server)
        .await;

    let clob = clob_for(&server);
    let (fills, end) = live_orders::run_live_sell(&clob, "123", dec!(40), &config).await;

    assert_eq!(end, LiveLoopEnd::Done);
    assert_eq!(fills.tokens, dec!(40));
    assert_eq!(fills.quote, dec!(20));
}

#[tokio::test]
async fn live_sell_with_no_bids_exhausts_quickly() {
    let config = test_config();
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/orderbook/123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "asset_id": "123",
            "bids": [],
            "asks": []
        })))
        .mount(&server)
        .await;

    let clob = clob_for(&server);
    let (fills, end) = live_orders::run_live_sell(&clob, "123", dec!(40), &config).await;

    assert_eq!(end, LiveLoopEnd::Exhausted("no bids in book".into()));
    assert!(!fills.any());
}
