use std::collections::HashMap;

use metrics::counter;
use rust_decimal::Decimal;
use sqlx::PgPool;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::db::activity_repo;
use crate::errors::EngineError;
use crate::models::{Activity, Position, Side, Task};
use crate::polymarket::types::ApiPosition;
use crate::polymarket::{BalanceReader, ClobClient, DataClient, SettlementAdapter};
use crate::store::{LockOutcome, TaskLock, TaskStore};

use super::ingestor;
use super::reconciler;
use super::HandlerOutcome;
use super::{buy_handler, redeem_handler, sell_handler};

/// Everything a worker needs to run one task tick. Shared across the pool.
pub struct TickContext {
    pub pool: PgPool,
    pub tasks: TaskStore,
    pub lock: TaskLock,
    pub config: AppConfig,
    pub data: DataClient,
    pub clob: ClobClient,
    pub balances: BalanceReader,
    pub settlement: SettlementAdapter,
    /// Per-task tick counts driving the reconciliation cadence. In-process
    /// only: a restart resets them, and startup reconciles every running
    /// task anyway.
    tick_counts: Mutex<HashMap<Uuid, u64>>,
}

impl TickContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: PgPool,
        tasks: TaskStore,
        lock: TaskLock,
        config: AppConfig,
        data: DataClient,
        clob: ClobClient,
        balances: BalanceReader,
        settlement: SettlementAdapter,
    ) -> Self {
        Self {
            pool,
            tasks,
            lock,
            config,
            data,
            clob,
            balances,
            settlement,
            tick_counts: Mutex::new(HashMap::new()),
        }
    }

    async fn bump_tick_count(&self, task_id: Uuid) -> u64 {
        let mut counts = self.tick_counts.lock().await;
        let count = counts.entry(task_id).or_insert(0);
        *count += 1;
        *count
    }

    pub async fn forget_task(&self, task_id: Uuid) {
        self.tick_counts.lock().await.remove(&task_id);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickResult {
    Completed,
    /// Another worker holds the task; nothing ran.
    SkippedLocked,
    /// The lock TTL expired mid-tick; processing stopped to avoid running
    /// concurrently with the new holder.
    LostLock,
    /// The task disappeared from the store.
    TaskGone,
}

/// One scheduled tick: take the task's lock (skip on contention), ingest new
/// activities, handle everything pending, and reconcile on cadence.
pub async fn run_tick(ctx: &TickContext, task_id: Uuid) -> Result<TickResult, EngineError> {
    let outcome = ctx
        .lock
        .with_lock(task_id, |token| process_task(ctx, task_id, token))
        .await?;

    match outcome {
        LockOutcome::Skipped => {
            counter!("ticks_skipped_lock_total").increment(1);
            tracing::debug!(task_id = %task_id, "Tick skipped: task locked by another worker");
            Ok(TickResult::SkippedLocked)
        }
        LockOutcome::Ran(result) => {
            counter!("ticks_run_total").increment(1);
            result
        }
    }
}

/// Startup-time reconciliation for a running task, under the task lock.
pub async fn run_startup_reconcile(ctx: &TickContext, task_id: Uuid) -> Result<(), EngineError> {
    let outcome = ctx
        .lock
        .with_lock(task_id, |_token| async {
            let Some(mut task) = ctx.tasks.get(task_id).await? else {
                return Ok(());
            };
            let closed = reconciler::reconcile_task(ctx, &mut task).await?;
            if closed > 0 {
                ctx.tasks.update(&task).await?;
            }
            Ok::<(), EngineError>(())
        })
        .await?;

    if let LockOutcome::Ran(result) = outcome {
        result?;
    }
    Ok(())
}

async fn process_task(
    ctx: &TickContext,
    task_id: Uuid,
    lock_token: String,
) -> Result<TickResult, EngineError> {
    let Some(mut task) = ctx.tasks.get(task_id).await? else {
        tracing::warn!(task_id = %task_id, "Tick for unknown task; dropping");
        return Ok(TickResult::TaskGone);
    };

    if !task.is_running() {
        tracing::debug!(task_id = %task_id, "Task stopped; tick is a no-op");
        return Ok(TickResult::Completed);
    }

    ingestor::ingest_activities(
        &ctx.pool,
        &ctx.data,
        &task,
        ctx.config.activity_window_sec(task.is_live()),
    )
    .await?;

    let pending = activity_repo::get_pending(&ctx.pool, task.id).await?;

    // One target snapshot per tick; SELL handlers reconstruct the pre-exit
    // size from it plus the still-unprocessed SELL queue.
    let target_positions: Option<Vec<ApiPosition>> = if pending
        .iter()
        .any(|a| a.side() == Some(Side::Sell))
    {
        let positions = ctx
            .data
            .get_positions(&task.target_address)
            .await
            .map_err(|e| EngineError::Transient(e.to_string()))?;
        Some(positions)
    } else {
        None
    };

    for activity in &pending {
        // The TTL outlasts any sane tick, but if it did expire another
        // worker may already own this task — stop before diverging.
        if !ctx.lock.is_held_by(task_id, &lock_token).await? {
            tracing::warn!(task_id = %task_id, "Lock ownership lost mid-tick; aborting");
            return Ok(TickResult::LostLock);
        }

        if !activity_repo::claim(&ctx.pool, activity.id).await? {
            continue;
        }

        match dispatch(ctx, &mut task, activity, target_positions.as_deref()).await {
            Ok(outcome) => {
                // Balance write-back lands before the activity completes, so
                // a crash window leaves at worst a re-runnable claimed row.
                ctx.tasks.update(&task).await?;
                activity_repo::mark_done(&ctx.pool, activity.id, outcome.terminal_status()).await?;

                match &outcome {
                    HandlerOutcome::Executed => {
                        counter!("activities_executed_total").increment(1);
                    }
                    HandlerOutcome::Skipped(reason) => {
                        counter!("activities_skipped_total").increment(1);
                        tracing::info!(
                            task_id = %task.id,
                            tx_hash = %activity.tx_hash,
                            side = %activity.side,
                            reason = %reason,
                            "Activity skipped"
                        );
                    }
                    HandlerOutcome::Exhausted(reason) => {
                        tracing::warn!(
                            task_id = %task.id,
                            tx_hash = %activity.tx_hash,
                            reason,
                            "Activity exhausted"
                        );
                    }
                }
            }
            Err(e) if e.is_transient() => {
                // Hand the row back; the next tick retries it.
                activity_repo::release_claim(&ctx.pool, activity.id).await?;
                tracing::warn!(
                    task_id = %task.id,
                    tx_hash = %activity.tx_hash,
                    error = %e,
                    "Transient handler failure; activity released for retry"
                );
            }
            Err(EngineError::Validation(msg)) => {
                // Permanently malformed input; never retry it.
                activity_repo::mark_done(
                    &ctx.pool,
                    activity.id,
                    crate::models::activity::status::DONE_SKIPPED,
                )
                .await?;
                tracing::error!(
                    task_id = %task.id,
                    tx_hash = %activity.tx_hash,
                    error = %msg,
                    "Activity rejected by validation"
                );
            }
            Err(e) => {
                activity_repo::release_claim(&ctx.pool, activity.id).await?;
                tracing::error!(
                    task_id = %task.id,
                    tx_hash = %activity.tx_hash,
                    error = %e,
                    "Handler failed; activity released"
                );
            }
        }
    }

    let tick_count = ctx.bump_tick_count(task_id).await;
    if ctx.config.sync_every_n_ticks > 0 && tick_count % ctx.config.sync_every_n_ticks == 0 {
        let closed = reconciler::reconcile_task(ctx, &mut task).await?;
        if closed > 0 {
            ctx.tasks.update(&task).await?;
        }
    }

    Ok(TickResult::Completed)
}

async fn dispatch(
    ctx: &TickContext,
    task: &mut Task,
    activity: &Activity,
    target_positions: Option<&[ApiPosition]>,
) -> Result<HandlerOutcome, EngineError> {
    let side = activity
        .side()
        .ok_or_else(|| EngineError::Validation(format!("unknown side {:?}", activity.side)))?;

    let own_position = load_own_position(ctx, task, activity, side).await?;

    match side {
        Side::Buy => {
            if task.is_live() {
                buy_handler::handle_live_buy(
                    &ctx.pool,
                    &ctx.clob,
                    &ctx.balances,
                    task,
                    activity,
                    own_position.as_ref(),
                    &ctx.config,
                )
                .await
            } else {
                let book = ctx
                    .clob
                    .get_order_book(&activity.asset)
                    .await
                    .map_err(|e| EngineError::Transient(e.to_string()))?;
                buy_handler::handle_mock_buy(
                    &ctx.pool,
                    task,
                    activity,
                    own_position.as_ref(),
                    &book,
                    &ctx.config,
                )
                .await
            }
        }
        Side::Sell => {
            let target_size = target_positions.and_then(|positions| {
                positions
                    .iter()
                    .find(|p| p.asset.as_deref() == Some(activity.asset.as_str()))
                    .map(|p| p.size.unwrap_or(Decimal::ZERO))
            });

            if task.is_live() {
                sell_handler::handle_live_sell(
                    &ctx.pool,
                    &ctx.clob,
                    task,
                    activity,
                    own_position.as_ref(),
                    target_size,
                    &ctx.config,
                )
                .await
            } else {
                let book = ctx
                    .clob
                    .get_order_book(&activity.asset)
                    .await
                    .map_err(|e| EngineError::Transient(e.to_string()))?;
                sell_handler::handle_mock_sell(
                    &ctx.pool,
                    task,
                    activity,
                    own_position.as_ref(),
                    target_size,
                    &book,
                    &ctx.config,
                )
                .await
            }
        }
        Side::Redeem => {
            redeem_handler::handle_redeem(
                &ctx.pool,
                &ctx.settlement,
                task,
                activity,
                own_position.as_ref(),
            )
            .await
        }
    }
}

/// Own position for an activity: the Mock ledger row, or the venue's
/// read-through snapshot for Live. BUYs key on the market (no pyramiding
/// across outcomes), SELL/REDEEM on the specific outcome token.
async fn load_own_position(
    ctx: &TickContext,
    task: &Task,
    activity: &Activity,
    side: Side,
) -> Result<Option<Position>, EngineError> {
    if let Some(operator) = task.operator_wallet() {
        let positions = ctx
            .data
            .get_positions(operator)
            .await
            .map_err(|e| EngineError::Transient(e.to_string()))?;

        Ok(positions
            .iter()
            .find(|p| match side {
                Side::Buy => p.condition_id.as_deref() == Some(activity.condition_id.as_str()),
                _ => p.asset.as_deref() == Some(activity.asset.as_str()),
            })
            .and_then(|p| {
                Some(Position::snapshot(
                    task.id,
                    p.asset.clone()?,
                    p.condition_id.clone()?,
                    p.size.unwrap_or(Decimal::ZERO),
                    p.avg_price.unwrap_or(Decimal::ZERO),
                    p.cur_price.unwrap_or(Decimal::ZERO),
                    p.outcome_index.unwrap_or(0),
                ))
            }))
    } else {
        let position = match side {
            Side::Buy => {
                crate::db::position_repo::find_one(&ctx.pool, task.id, &activity.condition_id)
                    .await?
            }
            _ => {
                crate::db::position_repo::find_one_by_asset(&ctx.pool, task.id, &activity.asset)
                    .await?
            }
        };
        Ok(position)
    }
}
