use rust_decimal::Decimal;
use sqlx::PgPool;

use crate::config::AppConfig;
use crate::db::trade_record_repo::{self, NewTradeRecord};
use crate::db::{activity_repo, position_repo};
use crate::errors::EngineError;
use crate::models::{Activity, Position, Side, Task};
use crate::polymarket::types::ApiOrderBook;
use crate::polymarket::ClobClient;

use super::live_orders::{self, LiveLoopEnd};
use super::order_book::{self, FillError};
use super::{HandlerOutcome, SkipReason};

/// Residual below which a Mock position is considered fully exited.
const DUST_SIZE: Decimal = Decimal::from_parts(1, 0, 0, false, 2); // 0.01

/// Tracked quantities are zeroed once this fraction of them is sold.
const FULL_EXIT_FRACTION: Decimal = Decimal::from_parts(99, 0, 0, false, 2); // 0.99

/// Reconstruct how many tokens to sell from the target's exit.
///
/// The venue reports the target's position *after* all their recent sells,
/// but the activities arrive one at a time. Adding the sizes of this task's
/// still-unprocessed SELLs (including the current one) recovers the position
/// size the target held before this exit began:
///
/// `T_before = T_now + Σ unprocessed same-asset SELL sizes`
///
/// The trade's share of `T_before` is then applied to our own holdings —
/// `tracked_bought_total` when live fills were tracked, the position size
/// otherwise. A target with no reported position at all means a completed
/// exit: sell everything.
pub fn reconstruct_sell_base(
    trade_size: Decimal,
    target_position: Option<Decimal>,
    unprocessed_sell_sum: Decimal,
    my_position_size: Decimal,
    tracked_bought_total: Decimal,
) -> Decimal {
    let base = match target_position {
        None => my_position_size,
        Some(t_now) => {
            let t_before = t_now + unprocessed_sell_sum;
            if t_before <= Decimal::ZERO {
                my_position_size
            } else {
                let ratio = trade_size / t_before;
                let basis = if tracked_bought_total > Decimal::ZERO {
                    tracked_bought_total
                } else {
                    my_position_size
                };
                basis * ratio
            }
        }
    };

    base.min(my_position_size)
}

#[derive(Debug, Clone, PartialEq)]
pub enum SellPlan {
    Skip(SkipReason),
    Sell { base_size: Decimal },
}

pub fn plan_sell(
    trade_size: Decimal,
    target_position: Option<Decimal>,
    unprocessed_sell_sum: Decimal,
    my_position_size: Decimal,
    tracked_bought_total: Decimal,
    min_order_tokens: Decimal,
) -> SellPlan {
    if my_position_size <= Decimal::ZERO {
        return SellPlan::Skip(SkipReason::NoPosition);
    }

    let base_size = reconstruct_sell_base(
        trade_size,
        target_position,
        unprocessed_sell_sum,
        my_position_size,
        tracked_bought_total,
    );

    if base_size < min_order_tokens {
        return SellPlan::Skip(SkipReason::BelowMinTokens);
    }

    SellPlan::Sell { base_size }
}

/// Execute a Mock SELL against a depth snapshot: simulate the liquidation,
/// shrink or delete the position, log the record and credit the balance.
#[allow(clippy::too_many_arguments)]
pub async fn handle_mock_sell(
    pool: &PgPool,
    task: &mut Task,
    activity: &Activity,
    position: Option<&Position>,
    target_position: Option<Decimal>,
    book: &ApiOrderBook,
    config: &AppConfig,
) -> Result<HandlerOutcome, EngineError> {
    let Some(position) = position else {
        return Ok(HandlerOutcome::Skipped(SkipReason::NoPosition));
    };

    let unprocessed = activity_repo::sum_unprocessed_sell_size(pool, task.id, &activity.asset)
        .await?;

    let base_size = match plan_sell(
        activity.size,
        target_position,
        unprocessed,
        position.size,
        Decimal::ZERO,
        config.min_order_tokens,
    ) {
        SellPlan::Skip(reason) => return Ok(HandlerOutcome::Skipped(reason)),
        SellPlan::Sell { base_size } => base_size,
    };

    let fill = match order_book::simulate_sell(&book.bids, base_size, activity.price) {
        Ok(fill) => fill,
        Err(FillError::NoLiquidity) => {
            return Ok(HandlerOutcome::Skipped(SkipReason::NoLiquidity))
        }
        Err(FillError::SlippageTooHigh { .. }) => unreachable!("sell has no slippage ceiling"),
    };

    let sold = fill.fill_size;
    let cost_basis_out = sold * position.avg_price;
    let realized_pnl = fill.quote_amount - cost_basis_out;
    let residual = position.size - sold;

    if residual <= DUST_SIZE {
        position_repo::delete(pool, position.id).await?;
    } else {
        position_repo::reduce_after_sell(
            pool,
            position.id,
            sold,
            cost_basis_out,
            realized_pnl,
            fill.fill_price,
        )
        .await?;
    }

    trade_record_repo::append_best_effort(
        pool,
        &sell_record(task, activity, sold, fill.fill_price, fill.quote_amount, realized_pnl),
    )
    .await;

    task.current_balance += fill.quote_amount;

    tracing::info!(
        task_id = %task.id,
        asset = %activity.asset,
        sold = %sold,
        price = %fill.fill_price,
        realized_pnl = %realized_pnl,
        "Mock SELL executed"
    );

    Ok(HandlerOutcome::Executed)
}

/// Execute a Live SELL through the FOK loop, then rescale the tracked bought
/// quantities on prior BUY activities so future proportional sells stay
/// correct.
#[allow(clippy::too_many_arguments)]
pub async fn handle_live_sell(
    pool: &PgPool,
    clob: &ClobClient,
    task: &mut Task,
    activity: &Activity,
    position: Option<&Position>,
    target_position: Option<Decimal>,
    config: &AppConfig,
) -> Result<HandlerOutcome, EngineError> {
    let Some(position) = position else {
        return Ok(HandlerOutcome::Skipped(SkipReason::NoPosition));
    };

    let unprocessed =
        activity_repo::sum_unprocessed_sell_size(pool, task.id, &activity.asset).await?;
    let tracked_total = activity_repo::sum_my_bought_size(pool, task.id, &activity.asset).await?;

    let base_size = match plan_sell(
        activity.size,
        target_position,
        unprocessed,
        position.size,
        tracked_total,
        config.min_order_tokens,
    ) {
        SellPlan::Skip(reason) => return Ok(HandlerOutcome::Skipped(reason)),
        SellPlan::Sell { base_size } => base_size,
    };

    let (fills, end) = live_orders::run_live_sell(clob, &activity.asset, base_size, config).await;

    if fills.any() {
        let sold = fills.tokens;
        let realized_pnl = fills.quote - sold * position.avg_price;

        trade_record_repo::append_best_effort(
            pool,
            &sell_record(task, activity, sold, fills.avg_price(), fills.quote, realized_pnl),
        )
        .await;

        if task.tracks_balance() {
            task.current_balance += fills.quote;
        }

        // Rescale tracked quantities: a near-total exit zeroes them, a
        // partial exit scales each by the unsold fraction.
        if tracked_total > Decimal::ZERO {
            if sold >= tracked_total * FULL_EXIT_FRACTION {
                activity_repo::zero_my_bought_sizes(pool, task.id, &activity.asset).await?;
            } else {
                let factor = Decimal::ONE - sold / tracked_total;
                activity_repo::scale_my_bought_sizes(pool, task.id, &activity.asset, factor)
                    .await?;
            }
        }

        tracing::info!(
            task_id = %task.id,
            asset = %activity.asset,
            sold = %sold,
            received = %fills.quote,
            realized_pnl = %realized_pnl,
            "Live SELL executed"
        );
    }

    Ok(match end {
        LiveLoopEnd::Exhausted(reason) => HandlerOutcome::Exhausted(reason),
        _ if fills.any() => HandlerOutcome::Executed,
        _ => HandlerOutcome::Skipped(SkipReason::NoLiquidity),
    })
}

fn sell_record(
    task: &Task,
    activity: &Activity,
    size: Decimal,
    price: Decimal,
    quote_amount: Decimal,
    realized_pnl: Decimal,
) -> NewTradeRecord {
    NewTradeRecord {
        task_id: task.id,
        side: Side::Sell.as_str().to_string(),
        asset: activity.asset.clone(),
        condition_id: activity.condition_id.clone(),
        size,
        price,
        quote_amount,
        realized_pnl,
        source_tx_hash: activity.tx_hash.clone(),
        title: activity.title.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn partial_exit_uses_reconstructed_denominator() {
        // Target sold 40 and now holds 60 with no other pending sells:
        // T_before = 60 + 40 = 100, ratio = 0.4, our 100 tokens → sell 40.
        let base = reconstruct_sell_base(dec!(40), Some(dec!(60)), dec!(40), dec!(100), dec!(0));
        assert_eq!(base, dec!(40));
    }

    #[test]
    fn queued_exits_resolve_sequentially() {
        // Two queued sells of 60 then 40, target already flat.
        // First: T_before = 0 + 100, ratio 0.6 → sell 60 of our 100.
        let first = reconstruct_sell_base(dec!(60), Some(dec!(0)), dec!(100), dec!(100), dec!(0));
        assert_eq!(first, dec!(60));

        // Second: T_before = 0 + 40, ratio 1.0 → sell the remaining 40.
        let second = reconstruct_sell_base(dec!(40), Some(dec!(0)), dec!(40), dec!(40), dec!(0));
        assert_eq!(second, dec!(40));
    }

    #[test]
    fn absent_target_position_sells_everything() {
        let base = reconstruct_sell_base(dec!(10), None, dec!(10), dec!(75), dec!(0));
        assert_eq!(base, dec!(75));
    }

    #[test]
    fn tracked_bought_total_takes_precedence_when_positive() {
        // Live: we actually acquired 80 although the venue shows 100.
        let base = reconstruct_sell_base(dec!(50), Some(dec!(50)), dec!(50), dec!(100), dec!(80));
        assert_eq!(base, dec!(40)); // 80 * 0.5
    }

    #[test]
    fn base_is_clamped_to_own_holdings() {
        let base = reconstruct_sell_base(dec!(90), Some(dec!(10)), dec!(90), dec!(30), dec!(0));
        // ratio 0.9 of our 30 → 27, within holdings.
        assert_eq!(base, dec!(27));

        // Tracked total larger than holdings clamps at the position size.
        let clamped =
            reconstruct_sell_base(dec!(90), Some(dec!(10)), dec!(90), dec!(30), dec!(200));
        assert_eq!(clamped, dec!(30));
    }

    #[test]
    fn plan_requires_a_position_and_a_minimum() {
        assert_eq!(
            plan_sell(dec!(40), Some(dec!(60)), dec!(40), dec!(0), dec!(0), dec!(1)),
            SellPlan::Skip(SkipReason::NoPosition)
        );

        // Ratio so small the base falls under one token.
        assert_eq!(
            plan_sell(dec!(1), Some(dec!(999)), dec!(1), dec!(100), dec!(0), dec!(1)),
            SellPlan::Skip(SkipReason::BelowMinTokens)
        );

        assert_eq!(
            plan_sell(dec!(40), Some(dec!(60)), dec!(40), dec!(100), dec!(0), dec!(1)),
            SellPlan::Sell {
                base_size: dec!(40)
            }
        );
    }
}
