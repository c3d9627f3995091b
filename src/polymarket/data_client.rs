use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;

use super::types::{ApiActivity, ApiPosition};

/// Transient-failure retry schedule shared by the read-only venue clients.
const RETRY_DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
];

#[derive(Debug, Error)]
pub enum DataClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected response: {0}")]
    Unexpected(String),
}

/// Read-only client for the venue's data API (trader activity + positions).
#[derive(Debug, Clone)]
pub struct DataClient {
    http: Client,
    base_url: String,
}

impl DataClient {
    pub fn new(http: Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    /// Fetch a trader's activity since `start_unix` (seconds), newest window
    /// the venue keeps, in the venue's chronological order.
    pub async fn get_activity(
        &self,
        user: &str,
        start_unix: i64,
    ) -> Result<Vec<ApiActivity>, DataClientError> {
        let url = format!("{}/activity", self.base_url);
        let resp = self
            .get_with_retry(&url, &[("user", user.to_string()), ("start", start_unix.to_string())])
            .await?;

        let activities: Vec<ApiActivity> = resp.json().await?;
        Ok(activities)
    }

    /// Fetch a wallet's open (non-redeemable) positions.
    pub async fn get_positions(&self, user: &str) -> Result<Vec<ApiPosition>, DataClientError> {
        let url = format!("{}/positions", self.base_url);
        let resp = self
            .get_with_retry(
                &url,
                &[
                    ("user", user.to_string()),
                    ("redeemable", "false".to_string()),
                    ("limit", "500".to_string()),
                ],
            )
            .await?;

        let positions: Vec<ApiPosition> = resp.json().await?;
        Ok(positions)
    }

    /// GET with bounded retry on connect/timeout/5xx. 4xx responses are not
    /// retried — the request itself is wrong.
    async fn get_with_retry(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<reqwest::Response, DataClientError> {
        let mut last_err: Option<DataClientError> = None;

        for (attempt, delay) in std::iter::once(None)
            .chain(RETRY_DELAYS.iter().copied().map(Some))
            .enumerate()
        {
            if let Some(delay) = delay {
                sleep(delay).await;
            }

            match self.http.get(url).query(query).send().await {
                Ok(resp) if resp.status().is_server_error() => {
                    last_err = Some(DataClientError::Unexpected(format!(
                        "{} returned {}",
                        url,
                        resp.status()
                    )));
                    tracing::debug!(url, attempt, status = %resp.status(), "Retrying on 5xx");
                }
                Ok(resp) => return Ok(resp.error_for_status()?),
                Err(e) if e.is_connect() || e.is_timeout() || e.is_request() => {
                    tracing::debug!(url, attempt, error = %e, "Retrying on transport error");
                    last_err = Some(DataClientError::Http(e));
                }
                Err(e) => return Err(DataClientError::Http(e)),
            }
        }

        Err(last_err
            .unwrap_or_else(|| DataClientError::Unexpected(format!("{url}: retries exhausted"))))
    }
}
