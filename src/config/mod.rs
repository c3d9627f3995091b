use rust_decimal::Decimal;
use std::env;

const DEFAULT_DATA_API_URL: &str = "https://data-api.polymarket.com";
const DEFAULT_CLOB_API_URL: &str = "https://clob.polymarket.com";
const DEFAULT_POLYGON_RPC_URL: &str = "https://polygon-rpc.com";

/// Conditional Tokens Framework contract on Polygon (settlement reads +
/// redeemPositions).
const DEFAULT_SETTLEMENT_CONTRACT: &str = "0x4D97DCd97eC945f40cF65F87097ACe5EA0476045";
/// USDC.e on Polygon — the venue's collateral token (6 decimals).
const DEFAULT_COLLATERAL: &str = "0x2791Bca1f2de4661ED88A30C99A7a9449Aa84174";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub redis_url: String,

    // Scheduling
    pub tick_interval_ms: u64,
    pub worker_concurrency: usize,
    pub lock_ttl_ms: u64,
    pub sync_every_n_ticks: u64,
    pub shutdown_drain_secs: u64,

    // Order protocol minima & guards
    pub live_retry_limit: u32,
    pub min_order_usd: Decimal,
    pub min_order_tokens: Decimal,
    pub slippage_pct_limit_buy: Decimal,
    pub price_cap_buy: Decimal,
    pub live_slippage_guard_abs: Decimal,

    // Ingestion windows
    pub activity_window_sec_live: i64,
    pub activity_window_sec_mock: i64,

    // Venue endpoints
    pub data_api_url: String,
    pub clob_api_url: String,
    pub polygon_rpc_url: String,

    // On-chain references
    pub settlement_contract_address: String,
    pub collateral_address: String,

    // CLOB API credentials (optional — required for live order placement)
    pub clob_api_key: Option<String>,
    pub clob_api_secret: Option<String>,
    pub clob_passphrase: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?,
            redis_url: env::var("REDIS_URL")
                .map_err(|_| anyhow::anyhow!("REDIS_URL must be set"))?,

            tick_interval_ms: parse_env("TICK_INTERVAL_MS", 5_000),
            worker_concurrency: parse_env("WORKER_CONCURRENCY", 5),
            lock_ttl_ms: parse_env("LOCK_TTL_MS", 600_000),
            sync_every_n_ticks: parse_env("SYNC_EVERY_N_TICKS", 30),
            shutdown_drain_secs: parse_env("SHUTDOWN_DRAIN_SECS", 30),

            live_retry_limit: parse_env("LIVE_RETRY_LIMIT", 3),
            min_order_usd: parse_decimal_env("MIN_ORDER_USD", Decimal::ONE),
            min_order_tokens: parse_decimal_env("MIN_ORDER_TOKENS", Decimal::ONE),
            slippage_pct_limit_buy: parse_decimal_env("SLIPPAGE_PCT_LIMIT_BUY", Decimal::from(5)),
            price_cap_buy: parse_decimal_env("PRICE_CAP_BUY", Decimal::new(99, 2)),
            live_slippage_guard_abs: parse_decimal_env(
                "LIVE_SLIPPAGE_GUARD_ABS",
                Decimal::new(5, 2),
            ),

            activity_window_sec_live: parse_env("ACTIVITY_WINDOW_SEC_LIVE", 60),
            activity_window_sec_mock: parse_env("ACTIVITY_WINDOW_SEC_MOCK", 3_600),

            data_api_url: env::var("DATA_API_URL").unwrap_or_else(|_| DEFAULT_DATA_API_URL.into()),
            clob_api_url: env::var("CLOB_API_URL").unwrap_or_else(|_| DEFAULT_CLOB_API_URL.into()),
            polygon_rpc_url: env::var("POLYGON_RPC_URL")
                .unwrap_or_else(|_| DEFAULT_POLYGON_RPC_URL.into()),

            settlement_contract_address: env::var("SETTLEMENT_CONTRACT_ADDRESS")
                .unwrap_or_else(|_| DEFAULT_SETTLEMENT_CONTRACT.into()),
            collateral_address: env::var("COLLATERAL_ADDRESS")
                .unwrap_or_else(|_| DEFAULT_COLLATERAL.into()),

            clob_api_key: env::var("CLOB_API_KEY").ok(),
            clob_api_secret: env::var("CLOB_API_SECRET").ok(),
            clob_passphrase: env::var("CLOB_PASSPHRASE").ok(),
        })
    }

    /// Returns true if all CLOB API credentials are configured.
    pub fn has_clob_auth(&self) -> bool {
        self.clob_api_key.is_some()
            && self.clob_api_secret.is_some()
            && self.clob_passphrase.is_some()
    }

    /// Activity ingestion window for a task mode, in seconds.
    pub fn activity_window_sec(&self, live: bool) -> i64 {
        if live {
            self.activity_window_sec_live
        } else {
            self.activity_window_sec_mock
        }
    }
}

fn parse_env<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_decimal_env(key: &str, default: Decimal) -> Decimal {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
