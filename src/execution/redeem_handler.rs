use metrics::counter;
use rust_decimal::Decimal;
use sqlx::PgPool;

use crate::db::position_repo;
use crate::db::trade_record_repo::{self, NewTradeRecord};
use crate::errors::EngineError;
use crate::models::{Activity, Position, Side, Task};
use crate::polymarket::settlement::SettlementError;
use crate::polymarket::{LiveWallet, SettlementAdapter};

use super::{HandlerOutcome, SkipReason};

/// Collateral returned for a redeemed holding.
pub fn redeem_value(size: Decimal, payout_ratio: Decimal) -> Decimal {
    size * payout_ratio
}

/// Realized PnL of a redemption against the position's entry price.
pub fn redeem_pnl(size: Decimal, payout_ratio: Decimal, avg_price: Decimal) -> Decimal {
    redeem_value(size, payout_ratio) - size * avg_price
}

/// Handle a REDEEM activity: read the settlement contract, and convert the
/// holding into collateral if the market resolved. Unsettled markets are
/// skipped and naturally retried once a later activity or sweep lands.
pub async fn handle_redeem(
    pool: &PgPool,
    settlement: &SettlementAdapter,
    task: &mut Task,
    activity: &Activity,
    own_position: Option<&Position>,
) -> Result<HandlerOutcome, EngineError> {
    let Some(position) = own_position else {
        return Ok(HandlerOutcome::Skipped(SkipReason::NoPosition));
    };

    let payout = match settlement
        .payout_ratio(&activity.condition_id, activity.outcome_index.max(0) as u32)
        .await
    {
        Ok(payout) => payout,
        Err(SettlementError::Rpc(e)) => return Err(EngineError::Transient(e.to_string())),
        Err(e) => {
            tracing::warn!(
                task_id = %task.id,
                condition_id = %activity.condition_id,
                error = %e,
                "REDEEM: settlement read rejected"
            );
            return Ok(HandlerOutcome::Skipped(SkipReason::NotSettled));
        }
    };

    if !payout.settled {
        return Ok(HandlerOutcome::Skipped(SkipReason::NotSettled));
    }

    let value = redeem_value(position.size, payout.payout);
    let pnl = redeem_pnl(position.size, payout.payout, position.avg_price);

    if task.is_live() {
        let private_key = task
            .private_key()
            .ok_or_else(|| EngineError::Validation("live task without private key".into()))?;
        let wallet = LiveWallet::new(private_key)
            .map_err(|e| EngineError::Validation(format!("bad private key: {e}")))?;

        let outcome = settlement
            .redeem_on_chain(&wallet, &activity.condition_id)
            .await;
        if !outcome.success {
            tracing::warn!(
                task_id = %task.id,
                condition_id = %activity.condition_id,
                error = ?outcome.error,
                "On-chain redemption failed; will retry next cycle"
            );
            return Ok(HandlerOutcome::Skipped(SkipReason::RedeemFailed));
        }

        tracing::info!(
            task_id = %task.id,
            condition_id = %activity.condition_id,
            tx_hash = ?outcome.tx_hash,
            gas_used = ?outcome.gas_used,
            "On-chain redemption confirmed"
        );
    }

    trade_record_repo::append_best_effort(
        pool,
        &NewTradeRecord {
            task_id: task.id,
            side: Side::Redeem.as_str().to_string(),
            asset: activity.asset.clone(),
            condition_id: activity.condition_id.clone(),
            size: position.size,
            price: payout.payout,
            quote_amount: value,
            realized_pnl: pnl,
            source_tx_hash: activity.tx_hash.clone(),
            title: activity.title.clone(),
        },
    )
    .await;

    // The Mock ledger is authoritative; Live holdings were burned on-chain.
    if !task.is_live() {
        position_repo::delete(pool, position.id).await?;
    }

    if task.tracks_balance() {
        task.current_balance += value;
    }

    counter!("redemptions_total").increment(1);
    tracing::info!(
        task_id = %task.id,
        condition_id = %activity.condition_id,
        value = %value,
        realized_pnl = %pnl,
        "REDEEM executed"
    );

    Ok(HandlerOutcome::Executed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn winning_redemption_pays_out_at_the_ratio() {
        assert_eq!(redeem_value(dec!(200), dec!(1)), dec!(200));
        assert_eq!(redeem_pnl(dec!(200), dec!(1), dec!(0.35)), dec!(130));
    }

    #[test]
    fn losing_redemption_realizes_the_full_cost() {
        assert_eq!(redeem_value(dec!(200), dec!(0)), dec!(0));
        assert_eq!(redeem_pnl(dec!(200), dec!(0), dec!(0.35)), dec!(-70));
    }

    #[test]
    fn fractional_payouts_scale() {
        assert_eq!(redeem_value(dec!(100), dec!(0.5)), dec!(50));
        assert_eq!(redeem_pnl(dec!(100), dec!(0.5), dec!(0.40)), dec!(10));
    }
}
