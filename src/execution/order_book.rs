use rust_decimal::Decimal;
use thiserror::Error;

use crate::polymarket::types::ApiOrderBookLevel;

/// A simulated execution against a depth snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Fill {
    /// Size-weighted average execution price.
    pub fill_price: Decimal,
    /// Tokens bought or sold.
    pub fill_size: Decimal,
    /// Quote spent (BUY) or received (SELL).
    pub quote_amount: Decimal,
    /// Signed gap between fill price and target, in percent.
    pub slippage_pct: Decimal,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum FillError {
    #[error("no liquidity")]
    NoLiquidity,

    #[error("slippage too high: {slippage_pct}% over target")]
    SlippageTooHigh {
        slippage_pct: Decimal,
        /// What the fill would have been, reported for diagnostics.
        would_fill: Fill,
    },
}

/// Walk the ask side with a quote-unit budget and compute the weighted fill.
///
/// The fill may be partial if the book is thinner than the budget. Fails when
/// nothing at all can be filled, or when the weighted price deviates from
/// `target_price` by more than `slippage_limit_pct` percent in either
/// direction.
pub fn simulate_buy(
    asks: &[ApiOrderBookLevel],
    notional: Decimal,
    target_price: Decimal,
    slippage_limit_pct: Decimal,
) -> Result<Fill, FillError> {
    let mut levels: Vec<ApiOrderBookLevel> = asks
        .iter()
        .copied()
        .filter(|l| l.price > Decimal::ZERO && l.size > Decimal::ZERO)
        .collect();
    levels.sort_by(|a, b| a.price.cmp(&b.price));

    let mut remaining = notional;
    let mut total_tokens = Decimal::ZERO;
    let mut total_quote = Decimal::ZERO;

    for level in &levels {
        if remaining <= Decimal::ZERO {
            break;
        }

        let level_quote = level.size * level.price;
        let take_quote = remaining.min(level_quote);
        let tokens = take_quote / level.price;

        total_tokens += tokens;
        total_quote += take_quote;
        remaining -= take_quote;
    }

    if total_tokens == Decimal::ZERO {
        return Err(FillError::NoLiquidity);
    }

    let fill_price = total_quote / total_tokens;
    let slippage_pct = slippage_pct(fill_price, target_price);

    let fill = Fill {
        fill_price,
        fill_size: total_tokens,
        quote_amount: total_quote,
        slippage_pct,
    };

    if slippage_pct.abs() > slippage_limit_pct {
        return Err(FillError::SlippageTooHigh {
            slippage_pct,
            would_fill: fill,
        });
    }

    Ok(fill)
}

/// Walk the bid side with a token quantity. Symmetric to `simulate_buy`, but
/// with no slippage ceiling: liquidation proceeds at whatever the book
/// offers.
pub fn simulate_sell(
    bids: &[ApiOrderBookLevel],
    tokens: Decimal,
    target_price: Decimal,
) -> Result<Fill, FillError> {
    let mut levels: Vec<ApiOrderBookLevel> = bids
        .iter()
        .copied()
        .filter(|l| l.price > Decimal::ZERO && l.size > Decimal::ZERO)
        .collect();
    levels.sort_by(|a, b| b.price.cmp(&a.price));

    let mut remaining = tokens;
    let mut total_tokens = Decimal::ZERO;
    let mut total_quote = Decimal::ZERO;

    for level in &levels {
        if remaining <= Decimal::ZERO {
            break;
        }

        let take = remaining.min(level.size);
        total_tokens += take;
        total_quote += take * level.price;
        remaining -= take;
    }

    if total_tokens == Decimal::ZERO {
        return Err(FillError::NoLiquidity);
    }

    let fill_price = total_quote / total_tokens;

    Ok(Fill {
        fill_price,
        fill_size: total_tokens,
        quote_amount: total_quote,
        slippage_pct: slippage_pct(fill_price, target_price),
    })
}

fn slippage_pct(fill_price: Decimal, target_price: Decimal) -> Decimal {
    if target_price <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    (fill_price - target_price) / target_price * Decimal::ONE_HUNDRED
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn level(price: Decimal, size: Decimal) -> ApiOrderBookLevel {
        ApiOrderBookLevel { price, size }
    }

    #[test]
    fn buy_fills_at_single_level() {
        let asks = [level(dec!(0.40), dec!(400)), level(dec!(0.41), dec!(1000))];
        let fill = simulate_buy(&asks, dec!(100), dec!(0.40), dec!(5)).unwrap();

        assert_eq!(fill.fill_price, dec!(0.40));
        assert_eq!(fill.fill_size, dec!(250));
        assert_eq!(fill.quote_amount, dec!(100));
        assert_eq!(fill.slippage_pct, dec!(0));
    }

    #[test]
    fn buy_walks_levels_and_weights_price() {
        // 10 tokens at 0.40 (4 quote), then the rest at 0.50.
        let asks = [level(dec!(0.50), dec!(1000)), level(dec!(0.40), dec!(10))];
        let fill = simulate_buy(&asks, dec!(9), dec!(0.45), dec!(20)).unwrap();

        assert_eq!(fill.fill_size, dec!(20)); // 10 + 5/0.50
        assert_eq!(fill.quote_amount, dec!(9));
        assert_eq!(fill.fill_price, dec!(0.45));
    }

    #[test]
    fn buy_rejects_on_slippage() {
        let asks = [level(dec!(0.40), dec!(10)), level(dec!(0.60), dec!(1000))];
        let err = simulate_buy(&asks, dec!(100), dec!(0.40), dec!(5)).unwrap_err();

        match err {
            FillError::SlippageTooHigh {
                slippage_pct,
                would_fill,
            } => {
                // 4 quote at 0.40 + 96 at 0.60 → ≈55% over target.
                assert!(slippage_pct > dec!(40));
                assert!(would_fill.fill_size > Decimal::ZERO);
            }
            other => panic!("expected slippage rejection, got {other:?}"),
        }
    }

    #[test]
    fn buy_fails_on_empty_book() {
        assert_eq!(
            simulate_buy(&[], dec!(100), dec!(0.40), dec!(5)),
            Err(FillError::NoLiquidity)
        );
        // Degenerate levels are discarded.
        let junk = [level(dec!(0), dec!(50)), level(dec!(0.5), dec!(0))];
        assert_eq!(
            simulate_buy(&junk, dec!(100), dec!(0.40), dec!(5)),
            Err(FillError::NoLiquidity)
        );
    }

    #[test]
    fn buy_partial_fill_when_book_is_thin() {
        let asks = [level(dec!(0.40), dec!(100))];
        let fill = simulate_buy(&asks, dec!(100), dec!(0.40), dec!(5)).unwrap();

        assert_eq!(fill.fill_size, dec!(100));
        assert_eq!(fill.quote_amount, dec!(40));
    }

    #[test]
    fn sell_fills_against_best_bids_first() {
        let bids = [level(dec!(0.45), dec!(30)), level(dec!(0.50), dec!(1000))];
        let fill = simulate_sell(&bids, dec!(40), dec!(0.50)).unwrap();

        assert_eq!(fill.fill_size, dec!(40));
        assert_eq!(fill.quote_amount, dec!(20)); // all 40 at 0.50
        assert_eq!(fill.fill_price, dec!(0.50));
    }

    #[test]
    fn sell_has_no_slippage_ceiling() {
        let bids = [level(dec!(0.10), dec!(1000))];
        let fill = simulate_sell(&bids, dec!(50), dec!(0.50)).unwrap();

        assert_eq!(fill.fill_price, dec!(0.10));
        assert_eq!(fill.slippage_pct, dec!(-80));
    }

    #[test]
    fn sell_partial_when_bids_run_out() {
        let bids = [level(dec!(0.50), dec!(25))];
        let fill = simulate_sell(&bids, dec!(100), dec!(0.50)).unwrap();

        assert_eq!(fill.fill_size, dec!(25));
        assert_eq!(fill.quote_amount, dec!(12.5));
    }

    #[test]
    fn sell_fails_on_empty_bids() {
        assert_eq!(
            simulate_sell(&[], dec!(10), dec!(0.50)),
            Err(FillError::NoLiquidity)
        );
    }

    #[test]
    fn fill_identity_holds() {
        let asks = [
            level(dec!(0.40), dec!(100)),
            level(dec!(0.42), dec!(200)),
            level(dec!(0.45), dec!(300)),
        ];
        let fill = simulate_buy(&asks, dec!(150), dec!(0.42), dec!(10)).unwrap();

        // fill_size * fill_price recovers quote_amount up to division rounding.
        let drift = (fill.fill_size * fill.fill_price - fill.quote_amount).abs();
        assert!(drift < dec!(0.000000001), "drift {drift}");
    }

    #[test]
    fn slippage_sign_matches_direction() {
        let cheap = [level(dec!(0.38), dec!(1000))];
        let fill = simulate_buy(&cheap, dec!(38), dec!(0.40), dec!(10)).unwrap();
        assert!(fill.slippage_pct < Decimal::ZERO);

        let rich = [level(dec!(0.41), dec!(1000))];
        let fill = simulate_buy(&rich, dec!(41), dec!(0.40), dec!(10)).unwrap();
        assert!(fill.slippage_pct > Decimal::ZERO);
    }

    #[test]
    fn zero_target_price_reports_zero_slippage() {
        let asks = [level(dec!(0.40), dec!(1000))];
        let fill = simulate_buy(&asks, dec!(40), dec!(0), dec!(5)).unwrap();
        assert_eq!(fill.slippage_pct, dec!(0));
    }
}
