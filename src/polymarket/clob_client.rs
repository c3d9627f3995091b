use reqwest::{Client, RequestBuilder};
use thiserror::Error;

use super::auth::ClobAuth;
use super::types::{ApiOrderBook, ApiPrice, FokOrderRequest, OrderResponse};

#[derive(Debug, Error)]
pub enum ClobClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("authentication error: {0}")]
    Auth(#[from] super::auth::AuthError),

    #[error("no CLOB API credentials configured")]
    NoAuth,

    #[error("unexpected response: {0}")]
    Unexpected(String),
}

/// Client for the venue's order-book API: depth snapshots, indicative
/// prices, the server-time health probe, and (authenticated) FOK orders.
#[derive(Debug, Clone)]
pub struct ClobClient {
    http: Client,
    base_url: String,
    auth: Option<ClobAuth>,
}

impl ClobClient {
    pub fn new(http: Client, base_url: impl Into<String>, auth: Option<ClobAuth>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            auth,
        }
    }

    /// Depth snapshot for an outcome token.
    pub async fn get_order_book(&self, asset_id: &str) -> Result<ApiOrderBook, ClobClientError> {
        let url = format!("{}/orderbook/{}", self.base_url, asset_id);
        let resp = self.http.get(&url).send().await?.error_for_status()?;

        let book: ApiOrderBook = resp.json().await?;
        Ok(book)
    }

    /// Indicative sell price for an outcome token.
    pub async fn get_sell_price(&self, asset_id: &str) -> Result<ApiPrice, ClobClientError> {
        let url = format!("{}/price", self.base_url);
        let resp = self
            .http
            .get(&url)
            .query(&[("token_id", asset_id), ("side", "sell")])
            .send()
            .await?
            .error_for_status()?;

        let price: ApiPrice = resp.json().await?;
        Ok(price)
    }

    /// Server timestamp; used as a liveness probe at startup.
    pub async fn get_server_time(&self) -> Result<String, ClobClientError> {
        let url = format!("{}/time", self.base_url);
        let resp = self.http.get(&url).send().await?.error_for_status()?;
        Ok(resp.text().await?)
    }

    /// Submit a fill-or-kill market order. Requires credentials.
    pub async fn post_fok_order(
        &self,
        order: &FokOrderRequest,
    ) -> Result<OrderResponse, ClobClientError> {
        let body = serde_json::to_string(order)
            .map_err(|e| ClobClientError::Unexpected(e.to_string()))?;

        let resp = self
            .authenticated_post("/order", &body)?
            .body(body)
            .send()
            .await?;

        // The venue reports order rejections in the body, not the status.
        let response: OrderResponse = resp.json().await?;
        Ok(response)
    }

    /// Build an authenticated POST request with HMAC signature headers.
    fn authenticated_post(&self, path: &str, body: &str) -> Result<RequestBuilder, ClobClientError> {
        let auth = self.auth.as_ref().ok_or(ClobClientError::NoAuth)?;

        let timestamp = chrono::Utc::now().timestamp().to_string();
        let signature = auth.sign(&timestamp, "POST", path, body)?;

        let url = format!("{}{}", self.base_url, path);
        let req = self
            .http
            .post(&url)
            .header("POLY-API-KEY", &auth.api_key)
            .header("POLY-SIGNATURE", signature)
            .header("POLY-TIMESTAMP", &timestamp)
            .header("POLY-PASSPHRASE", &auth.passphrase)
            .header("Content-Type", "application/json");

        Ok(req)
    }
}
