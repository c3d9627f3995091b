use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::Address;
use futures_util::future::join_all;
use tokio::time::timeout;

use copycat::config::AppConfig;
use copycat::db::{self, activity_repo};
use copycat::execution::tick_runner::{self, TickContext};
use copycat::models::Task;
use copycat::polymarket::{
    BalanceReader, ClobAuth, ClobClient, DataClient, RpcClient, SettlementAdapter,
};
use copycat::scheduler::{self, Scheduler};
use copycat::services::{commands, Notifier, TaskService};
use copycat::metrics;
use copycat::store::{TaskLock, TaskStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls CryptoProvider");

    dotenvy::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;

    let metrics_handle = metrics::init_metrics();
    tracing::info!("Prometheus metrics initialized");

    tracing::info!("Connecting to database...");
    let pool = db::init_pool(&config.database_url).await?;
    tracing::info!("Database connected");

    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("Database migrations applied");

    let redis_client = redis::Client::open(config.redis_url.as_str())?;

    // --- Venue clients ---
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;

    let data = DataClient::new(http.clone(), config.data_api_url.clone());

    let clob_auth = if config.has_clob_auth() {
        Some(ClobAuth::new(
            config.clob_api_key.clone().unwrap(),
            config.clob_api_secret.clone().unwrap(),
            config.clob_passphrase.clone().unwrap(),
        ))
    } else {
        tracing::warn!("No CLOB API credentials — live order placement disabled");
        None
    };
    let clob = ClobClient::new(http.clone(), config.clob_api_url.clone(), clob_auth);

    match clob.get_server_time().await {
        Ok(ts) => tracing::info!(server_time = %ts.trim(), "Order-book API reachable"),
        Err(e) => tracing::warn!(error = %e, "Order-book API health probe failed"),
    }

    let collateral: Address = config
        .collateral_address
        .parse()
        .map_err(|_| anyhow::anyhow!("bad COLLATERAL_ADDRESS {}", config.collateral_address))?;
    let settlement_contract: Address = config.settlement_contract_address.parse().map_err(|_| {
        anyhow::anyhow!(
            "bad SETTLEMENT_CONTRACT_ADDRESS {}",
            config.settlement_contract_address
        )
    })?;

    let rpc = RpcClient::new(http.clone(), config.polygon_rpc_url.clone());
    let balances = BalanceReader::new(rpc.clone(), collateral);
    let settlement = SettlementAdapter::new(rpc, settlement_contract, collateral);

    // --- Shared stores ---
    let tasks = TaskStore::new(redis_client.clone());
    let lock = TaskLock::new(redis_client.clone(), config.lock_ttl_ms);

    // --- Scheduler + worker pool ---
    let (scheduler, tick_rx) =
        Scheduler::new(config.tick_interval_ms, config.worker_concurrency * 4);
    let scheduler = Arc::new(scheduler);

    let ctx = Arc::new(TickContext::new(
        pool.clone(),
        tasks.clone(),
        lock,
        config.clone(),
        data,
        clob,
        balances,
        settlement,
    ));

    // --- Startup recovery ---
    // Purge any schedule entries left over from a prior instance, hand
    // crashed-claim activities back, then schedule every running task.
    scheduler.clear_all().await;

    let running: Vec<Task> = tasks
        .list(None)
        .await?
        .into_iter()
        .filter(Task::is_running)
        .collect();

    for task in &running {
        let reset = activity_repo::reset_claimed_to_new(&pool, task.id).await?;
        if reset > 0 {
            tracing::info!(
                task_id = %task.id,
                reset,
                "Recovered claimed activities from prior run"
            );
        }
        scheduler.schedule(task.id).await;
    }
    tracing::info!(count = running.len(), "Running tasks scheduled");

    let workers = scheduler::spawn_workers(config.worker_concurrency, tick_rx, Arc::clone(&ctx));
    tracing::info!(concurrency = config.worker_concurrency, "Tick workers spawned");

    // Immediate reconciliation pass for every running task.
    for task in &running {
        if let Err(e) = tick_runner::run_startup_reconcile(&ctx, task.id).await {
            tracing::warn!(task_id = %task.id, error = %e, "Startup reconciliation failed");
        }
    }

    // --- Command surface ---
    let notifier = Notifier::new(redis_client.clone());
    let service = Arc::new(TaskService::new(
        Arc::clone(&ctx),
        Arc::clone(&scheduler),
        notifier,
    ));
    tokio::spawn(commands::run_command_listener(service, redis_client));
    tracing::info!(channel = commands::COMMANDS_CHANNEL, "Command listener spawned");

    // --- Graceful shutdown ---
    wait_for_shutdown().await;
    tracing::info!("Shutting down gracefully...");

    scheduler.shutdown().await;

    let drain = Duration::from_secs(config.shutdown_drain_secs);
    match timeout(drain, join_all(workers)).await {
        Ok(_) => {
            tracing::debug!(metrics = %metrics_handle.render(), "Final metrics");
            tracing::info!("All workers drained; goodbye");
            Ok(())
        }
        Err(_) => {
            tracing::error!(
                drain_secs = config.shutdown_drain_secs,
                "Workers did not drain in time; aborting"
            );
            std::process::exit(1);
        }
    }
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received SIGINT, starting graceful shutdown...");
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, starting graceful shutdown...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl+c");
        tracing::info!("Received SIGINT, starting graceful shutdown...");
    }
}

fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();
}
