use std::collections::HashMap;

use metrics::counter;
use rust_decimal::Decimal;
use sqlx::PgPool;

use crate::db::trade_record_repo::{self, NewTradeRecord};
use crate::db::{activity_repo, position_repo};
use crate::errors::EngineError;
use crate::models::{Position, Side, Task};
use crate::polymarket::LiveWallet;

use super::live_orders::{self, LiveLoopEnd};
use super::order_book::{self, FillError};
use super::redeem_handler::{redeem_pnl, redeem_value};
use super::tick_runner::TickContext;

/// Audit marker for records with no source activity.
const FORCED_CLOSE_TX: &str = "forced-close";

/// Residual below which a Mock position is removed rather than kept.
const DUST_SIZE: Decimal = Decimal::from_parts(1, 0, 0, false, 2); // 0.01

/// Close positions the target no longer holds.
///
/// Own positions whose market is absent from the target's set (or held at
/// size zero) are liquidated at the best bid; markets with no bids at all
/// are treated as settled and redeemed instead. One position's failure never
/// stops the sweep.
pub async fn reconcile_task(ctx: &TickContext, task: &mut Task) -> Result<u32, EngineError> {
    let own = load_own_positions(ctx, task).await?;
    if own.is_empty() {
        return Ok(0);
    }

    let target = ctx
        .data
        .get_positions(&task.target_address)
        .await
        .map_err(|e| EngineError::Transient(e.to_string()))?;

    let held: HashMap<String, Decimal> = target
        .iter()
        .filter_map(|p| {
            p.condition_id
                .clone()
                .map(|cond| (cond, p.size.unwrap_or(Decimal::ZERO)))
        })
        .collect();

    metrics::gauge!("open_positions").set(own.len() as f64);

    let mut closed = 0u32;
    for position in &own {
        let still_held = held
            .get(&position.condition_id)
            .is_some_and(|size| *size > Decimal::ZERO);
        if still_held {
            if !task.is_live() {
                refresh_mark_price(ctx, position).await;
            }
            continue;
        }

        tracing::info!(
            task_id = %task.id,
            condition_id = %position.condition_id,
            size = %position.size,
            "Target no longer holds market; forcing close"
        );

        match forced_close(ctx, task, position).await {
            Ok(true) => {
                closed += 1;
                counter!("positions_force_closed_total").increment(1);
            }
            Ok(false) => {}
            Err(e) => {
                tracing::error!(
                    task_id = %task.id,
                    condition_id = %position.condition_id,
                    error = %e,
                    "Forced close failed; next sweep retries"
                );
            }
        }
    }

    Ok(closed)
}

/// Mark a still-held Mock position at the venue's indicative sell price.
/// Purely informational; failures are ignored.
async fn refresh_mark_price(ctx: &TickContext, position: &Position) {
    let price = match ctx.clob.get_sell_price(&position.asset).await {
        Ok(p) => p.price,
        Err(e) => {
            tracing::debug!(asset = %position.asset, error = %e, "Mark price fetch failed");
            return;
        }
    };

    if price > Decimal::ZERO && price != position.cur_price {
        if let Err(e) = position_repo::update_price(&ctx.pool, position.id, price).await {
            tracing::debug!(asset = %position.asset, error = %e, "Mark price update failed");
        }
    }
}

/// Own position set: the Mock ledger, or the venue snapshot for Live.
pub async fn load_own_positions(
    ctx: &TickContext,
    task: &Task,
) -> Result<Vec<Position>, EngineError> {
    if let Some(operator) = task.operator_wallet() {
        let raw = ctx
            .data
            .get_positions(operator)
            .await
            .map_err(|e| EngineError::Transient(e.to_string()))?;

        Ok(raw
            .iter()
            .filter_map(|p| {
                Some(Position::snapshot(
                    task.id,
                    p.asset.clone()?,
                    p.condition_id.clone()?,
                    p.size.unwrap_or(Decimal::ZERO),
                    p.avg_price.unwrap_or(Decimal::ZERO),
                    p.cur_price.unwrap_or(Decimal::ZERO),
                    p.outcome_index.unwrap_or(0),
                ))
            })
            .filter(|p| p.size > Decimal::ZERO)
            .collect())
    } else {
        Ok(position_repo::find(&ctx.pool, task.id).await?)
    }
}

/// Liquidate at the book's prices, however adverse; escalate to redemption
/// when the book is empty. Returns whether anything was closed.
async fn forced_close(
    ctx: &TickContext,
    task: &mut Task,
    position: &Position,
) -> Result<bool, EngineError> {
    let book = ctx
        .clob
        .get_order_book(&position.asset)
        .await
        .map_err(|e| EngineError::Transient(e.to_string()))?;

    let Some(best) = live_orders::best_bid(&book) else {
        return redeem_orphan(ctx, task, position).await;
    };

    if task.is_live() {
        let (fills, end) =
            live_orders::run_live_sell(&ctx.clob, &position.asset, position.size, &ctx.config)
                .await;

        if !fills.any() {
            tracing::warn!(
                task_id = %task.id,
                asset = %position.asset,
                end = ?end,
                "Forced close sold nothing"
            );
            return Ok(false);
        }

        let realized_pnl = fills.quote - fills.tokens * position.avg_price;
        append_close_record(
            &ctx.pool,
            task,
            position,
            Side::Sell,
            fills.tokens,
            fills.avg_price(),
            fills.quote,
            realized_pnl,
        )
        .await;

        activity_repo::zero_my_bought_sizes(&ctx.pool, task.id, &position.asset).await?;
        if task.tracks_balance() {
            task.current_balance += fills.quote;
        }
        if let LiveLoopEnd::Exhausted(reason) = end {
            tracing::warn!(task_id = %task.id, asset = %position.asset, reason, "Forced close ended early");
        }
    } else {
        let fill = match order_book::simulate_sell(&book.bids, position.size, best.price) {
            Ok(fill) => fill,
            Err(FillError::NoLiquidity) => return redeem_orphan(ctx, task, position).await,
            Err(FillError::SlippageTooHigh { .. }) => {
                unreachable!("sell has no slippage ceiling")
            }
        };

        let realized_pnl = fill.quote_amount - fill.fill_size * position.avg_price;
        let residual = position.size - fill.fill_size;

        if residual <= DUST_SIZE {
            position_repo::delete(&ctx.pool, position.id).await?;
        } else {
            position_repo::reduce_after_sell(
                &ctx.pool,
                position.id,
                fill.fill_size,
                fill.fill_size * position.avg_price,
                realized_pnl,
                fill.fill_price,
            )
            .await?;
        }

        append_close_record(
            &ctx.pool,
            task,
            position,
            Side::Sell,
            fill.fill_size,
            fill.fill_price,
            fill.quote_amount,
            realized_pnl,
        )
        .await;

        task.current_balance += fill.quote_amount;
    }

    Ok(true)
}

/// A bookless orphan: the market most likely resolved. Redeem instead.
async fn redeem_orphan(
    ctx: &TickContext,
    task: &mut Task,
    position: &Position,
) -> Result<bool, EngineError> {
    let payout = match ctx
        .settlement
        .payout_ratio(&position.condition_id, position.outcome_index.max(0) as u32)
        .await
    {
        Ok(payout) => payout,
        Err(e) => {
            tracing::warn!(
                task_id = %task.id,
                condition_id = %position.condition_id,
                error = %e,
                "Forced close: settlement read failed"
            );
            return Ok(false);
        }
    };

    if !payout.settled {
        tracing::debug!(
            task_id = %task.id,
            condition_id = %position.condition_id,
            "Bookless position not yet settled; leaving for a later sweep"
        );
        return Ok(false);
    }

    if task.is_live() {
        let Some(private_key) = task.private_key() else {
            return Err(EngineError::Validation("live task without private key".into()));
        };
        let wallet = LiveWallet::new(private_key)
            .map_err(|e| EngineError::Validation(format!("bad private key: {e}")))?;

        let outcome = ctx
            .settlement
            .redeem_on_chain(&wallet, &position.condition_id)
            .await;
        if !outcome.success {
            tracing::warn!(
                task_id = %task.id,
                condition_id = %position.condition_id,
                error = ?outcome.error,
                "Forced close: redemption failed"
            );
            return Ok(false);
        }
    }

    let value = redeem_value(position.size, payout.payout);
    let pnl = redeem_pnl(position.size, payout.payout, position.avg_price);

    append_close_record(
        &ctx.pool,
        task,
        position,
        Side::Redeem,
        position.size,
        payout.payout,
        value,
        pnl,
    )
    .await;

    if !task.is_live() {
        position_repo::delete(&ctx.pool, position.id).await?;
    }
    if task.tracks_balance() {
        task.current_balance += value;
    }

    counter!("redemptions_total").increment(1);
    Ok(true)
}

#[allow(clippy::too_many_arguments)]
async fn append_close_record(
    pool: &PgPool,
    task: &Task,
    position: &Position,
    side: Side,
    size: Decimal,
    price: Decimal,
    quote_amount: Decimal,
    realized_pnl: Decimal,
) {
    trade_record_repo::append_best_effort(
        pool,
        &NewTradeRecord {
            task_id: task.id,
            side: side.as_str().to_string(),
            asset: position.asset.clone(),
            condition_id: position.condition_id.clone(),
            size,
            price,
            quote_amount,
            realized_pnl,
            source_tx_hash: FORCED_CLOSE_TX.to_string(),
            title: position.title.clone(),
        },
    )
    .await;
}
