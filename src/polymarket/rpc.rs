use std::time::Duration;

use alloy_primitives::Address;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::time::sleep;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("malformed RPC response: {0}")]
    Decode(String),

    #[error("transaction {0} not mined within the polling window")]
    ReceiptTimeout(String),
}

#[derive(Debug, Clone)]
pub struct TxReceipt {
    /// True iff the transaction succeeded (`status == 0x1`).
    pub status: bool,
    pub gas_used: Option<u64>,
}

/// Thin JSON-RPC client for the settlement chain. Everything the engine
/// needs fits in five methods; no provider abstraction required.
#[derive(Debug, Clone)]
pub struct RpcClient {
    http: reqwest::Client,
    url: String,
}

impl RpcClient {
    pub fn new(http: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
        }
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let resp: Value = self.http.post(&self.url).json(&body).send().await?.json().await?;

        if let Some(err) = resp.get("error") {
            let msg = err["message"].as_str().unwrap_or("unknown").to_string();
            return Err(RpcError::Rpc(msg));
        }

        Ok(resp.get("result").cloned().unwrap_or(Value::Null))
    }

    /// `eth_call` against `to` with raw calldata; returns the raw ABI output.
    pub async fn call(&self, to: Address, data: &[u8]) -> Result<Vec<u8>, RpcError> {
        let result = self
            .request(
                "eth_call",
                json!([
                    { "to": format!("{to:?}"), "data": format!("0x{}", hex::encode(data)) },
                    "latest"
                ]),
            )
            .await?;

        let hex_str = result
            .as_str()
            .ok_or_else(|| RpcError::Decode("missing eth_call result".into()))?;
        hex::decode(hex_str.trim_start_matches("0x")).map_err(|e| RpcError::Decode(e.to_string()))
    }

    pub async fn gas_price(&self) -> Result<u128, RpcError> {
        let result = self.request("eth_gasPrice", json!([])).await?;
        parse_hex_u128(&result, "gasPrice")
    }

    pub async fn transaction_count(&self, address: Address) -> Result<u64, RpcError> {
        let result = self
            .request(
                "eth_getTransactionCount",
                json!([format!("{address:?}"), "latest"]),
            )
            .await?;
        Ok(parse_hex_u128(&result, "nonce")? as u64)
    }

    /// Broadcast a signed raw transaction; returns the tx hash.
    pub async fn send_raw_transaction(&self, raw: &[u8]) -> Result<String, RpcError> {
        let result = self
            .request(
                "eth_sendRawTransaction",
                json!([format!("0x{}", hex::encode(raw))]),
            )
            .await?;

        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| RpcError::Decode("missing tx hash".into()))
    }

    /// Poll for a receipt every 2 s, up to 2 minutes.
    pub async fn wait_for_receipt(&self, tx_hash: &str) -> Result<TxReceipt, RpcError> {
        for _ in 0..60 {
            sleep(Duration::from_secs(2)).await;

            let result = self
                .request("eth_getTransactionReceipt", json!([tx_hash]))
                .await?;

            if result.is_null() {
                continue;
            }

            let status = result["status"].as_str().unwrap_or("0x0") == "0x1";
            let gas_used = result["gasUsed"]
                .as_str()
                .and_then(|s| u64::from_str_radix(s.trim_start_matches("0x"), 16).ok());

            return Ok(TxReceipt { status, gas_used });
        }

        Err(RpcError::ReceiptTimeout(tx_hash.to_string()))
    }
}

fn parse_hex_u128(value: &Value, what: &str) -> Result<u128, RpcError> {
    let hex_str = value
        .as_str()
        .ok_or_else(|| RpcError::Decode(format!("missing {what} result")))?;
    u128::from_str_radix(hex_str.trim_start_matches("0x"), 16)
        .map_err(|e| RpcError::Decode(format!("bad {what}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_quantities() {
        assert_eq!(parse_hex_u128(&json!("0x0"), "x").unwrap(), 0);
        assert_eq!(parse_hex_u128(&json!("0x1b48eb57e000"), "x").unwrap(), 30_000_000_000_000);
        assert!(parse_hex_u128(&json!(null), "x").is_err());
    }
}
