use rust_decimal::Decimal;
use sqlx::PgPool;

use crate::config::AppConfig;
use crate::db::trade_record_repo::{self, NewTradeRecord};
use crate::db::{activity_repo, position_repo};
use crate::errors::EngineError;
use crate::models::{Activity, Position, Side, Task};
use crate::polymarket::types::ApiOrderBook;
use crate::polymarket::{BalanceReader, ClobClient};

use super::live_orders::{self, LiveLoopEnd};
use super::order_book::{self, Fill, FillError};
use super::{HandlerOutcome, SkipReason};

/// Fraction of the available balance a BUY may consume (1% safety buffer).
const BALANCE_CAP: Decimal = Decimal::from_parts(99, 0, 0, false, 2); // 0.99

/// Decision for a BUY activity, computed from values only.
#[derive(Debug, Clone, PartialEq)]
pub enum BuyPlan {
    Skip(SkipReason),
    Fill(Fill),
}

/// Fixed-amount sizing: the intended notional is `fixed_amount`, capped at
/// 99% of the available balance; orders under the venue minimum are dropped.
pub fn buy_notional(
    fixed_amount: Decimal,
    available_balance: Decimal,
    min_order_usd: Decimal,
) -> Option<Decimal> {
    let notional = fixed_amount.min(available_balance * BALANCE_CAP);
    (notional >= min_order_usd).then_some(notional)
}

/// Shared BUY pre-flight: the price cap and the no-pyramiding rule.
fn buy_preflight(
    activity: &Activity,
    own_position: Option<&Position>,
    config: &AppConfig,
) -> Option<SkipReason> {
    if activity.price > config.price_cap_buy {
        return Some(SkipReason::PriceCapExceeded);
    }
    if own_position.is_some_and(|p| p.size > Decimal::ZERO) {
        return Some(SkipReason::AlreadyHolding);
    }
    None
}

/// Plan a Mock BUY against a depth snapshot.
pub fn plan_mock_buy(
    task: &Task,
    activity: &Activity,
    own_position: Option<&Position>,
    book: &ApiOrderBook,
    config: &AppConfig,
) -> BuyPlan {
    if let Some(reason) = buy_preflight(activity, own_position, config) {
        return BuyPlan::Skip(reason);
    }

    let Some(notional) = buy_notional(
        task.fixed_amount,
        task.current_balance,
        config.min_order_usd,
    ) else {
        return BuyPlan::Skip(SkipReason::BelowMinOrder);
    };

    match order_book::simulate_buy(
        &book.asks,
        notional,
        activity.price,
        config.slippage_pct_limit_buy,
    ) {
        Ok(fill) => BuyPlan::Fill(fill),
        Err(FillError::NoLiquidity) => BuyPlan::Skip(SkipReason::NoLiquidity),
        Err(FillError::SlippageTooHigh {
            slippage_pct,
            would_fill,
        }) => {
            tracing::info!(
                task_id = %task.id,
                condition_id = %activity.condition_id,
                slippage_pct = %slippage_pct,
                would_fill_size = %would_fill.fill_size,
                "Mock BUY rejected on slippage"
            );
            BuyPlan::Skip(SkipReason::SlippageTooHigh)
        }
    }
}

/// Execute a Mock BUY: simulate the fill, open the position, log the record
/// and debit the cash balance. The caller persists the task and transitions
/// the activity afterwards.
pub async fn handle_mock_buy(
    pool: &PgPool,
    task: &mut Task,
    activity: &Activity,
    own_position: Option<&Position>,
    book: &ApiOrderBook,
    config: &AppConfig,
) -> Result<HandlerOutcome, EngineError> {
    let fill = match plan_mock_buy(task, activity, own_position, book, config) {
        BuyPlan::Skip(reason) => return Ok(HandlerOutcome::Skipped(reason)),
        BuyPlan::Fill(fill) => fill,
    };

    position_repo::upsert_buy(
        pool,
        task.id,
        &activity.asset,
        &activity.condition_id,
        fill.fill_size,
        fill.fill_price,
        fill.quote_amount,
        &position_meta(activity),
    )
    .await?;

    trade_record_repo::append_best_effort(pool, &buy_record(task, activity, &fill)).await;

    task.current_balance -= fill.quote_amount;

    tracing::info!(
        task_id = %task.id,
        condition_id = %activity.condition_id,
        size = %fill.fill_size,
        price = %fill.fill_price,
        spent = %fill.quote_amount,
        "Mock BUY executed"
    );

    Ok(HandlerOutcome::Executed)
}

/// Execute a Live BUY: verify no prior tracked fill for this market, size
/// against the on-chain quote balance, then run the FOK loop.
pub async fn handle_live_buy(
    pool: &PgPool,
    clob: &ClobClient,
    balances: &BalanceReader,
    task: &mut Task,
    activity: &Activity,
    own_position: Option<&Position>,
    config: &AppConfig,
) -> Result<HandlerOutcome, EngineError> {
    if let Some(reason) = buy_preflight(activity, own_position, config) {
        return Ok(HandlerOutcome::Skipped(reason));
    }

    // The venue's position endpoint lags fills by seconds; an earlier
    // completed BUY with a tracked quantity means we already entered this
    // market even if the position read-through does not show it yet.
    if activity_repo::has_filled_buy_for_condition(pool, task.id, &activity.condition_id).await? {
        return Ok(HandlerOutcome::Skipped(SkipReason::AlreadyHolding));
    }

    let operator = task
        .operator_wallet()
        .ok_or_else(|| EngineError::Validation("live task without operator wallet".into()))?;
    let operator_addr = operator
        .parse()
        .map_err(|_| EngineError::Validation(format!("bad operator wallet {operator}")))?;

    let available = balances
        .quote_balance(operator_addr)
        .await
        .map_err(|e| EngineError::Transient(e.to_string()))?;

    let Some(notional) = buy_notional(task.fixed_amount, available, config.min_order_usd) else {
        return Ok(HandlerOutcome::Skipped(SkipReason::BelowMinOrder));
    };

    let (fills, end) =
        live_orders::run_live_buy(clob, &activity.asset, activity.price, notional, config).await;

    if fills.any() {
        // The tracked quantity must survive before the activity completes:
        // proportional SELL sizing depends on it.
        activity_repo::set_my_bought_size(pool, activity.id, fills.tokens).await?;

        let fill = Fill {
            fill_price: fills.avg_price(),
            fill_size: fills.tokens,
            quote_amount: fills.quote,
            slippage_pct: Decimal::ZERO,
        };
        trade_record_repo::append_best_effort(pool, &buy_record(task, activity, &fill)).await;

        if task.tracks_balance() {
            task.current_balance -= fills.quote;
        }

        tracing::info!(
            task_id = %task.id,
            condition_id = %activity.condition_id,
            tokens = %fills.tokens,
            spent = %fills.quote,
            "Live BUY executed"
        );
    }

    Ok(match end {
        LiveLoopEnd::Exhausted(reason) => HandlerOutcome::Exhausted(reason),
        _ if fills.any() => HandlerOutcome::Executed,
        LiveLoopEnd::PriceGuard => HandlerOutcome::Skipped(SkipReason::SlippageTooHigh),
        LiveLoopEnd::Done => HandlerOutcome::Skipped(SkipReason::NoLiquidity),
    })
}

fn position_meta(activity: &Activity) -> position_repo::PositionMeta {
    position_repo::PositionMeta {
        outcome_index: activity.outcome_index,
        title: activity.title.clone(),
        slug: activity.slug.clone(),
        outcome: activity.outcome.clone(),
    }
}

fn buy_record(task: &Task, activity: &Activity, fill: &Fill) -> NewTradeRecord {
    NewTradeRecord {
        task_id: task.id,
        side: Side::Buy.as_str().to_string(),
        asset: activity.asset.clone(),
        condition_id: activity.condition_id.clone(),
        size: fill.fill_size,
        price: fill.fill_price,
        quote_amount: fill.quote_amount,
        realized_pnl: Decimal::ZERO,
        source_tx_hash: activity.tx_hash.clone(),
        title: activity.title.clone(),
    }
}
