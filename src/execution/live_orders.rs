use metrics::counter;
use rust_decimal::Decimal;

use crate::config::AppConfig;
use crate::models::Side;
use crate::polymarket::types::{ApiOrderBook, ApiOrderBookLevel, FokOrderRequest};
use crate::polymarket::ClobClient;

/// Aggregate of the fills collected by one live order loop.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct LiveFills {
    pub tokens: Decimal,
    pub quote: Decimal,
}

impl LiveFills {
    pub fn avg_price(&self) -> Decimal {
        if self.tokens > Decimal::ZERO {
            self.quote / self.tokens
        } else {
            Decimal::ZERO
        }
    }

    pub fn any(&self) -> bool {
        self.tokens > Decimal::ZERO
    }
}

/// Why a live order loop stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveLoopEnd {
    /// Remaining amount fell under the order minimum — normal completion.
    Done,
    /// Funds/allowance rejected, or the retry budget drained.
    Exhausted(String),
    /// Best ask drifted past the absolute price guard (BUY only).
    PriceGuard,
}

pub fn best_ask(book: &ApiOrderBook) -> Option<ApiOrderBookLevel> {
    book.asks
        .iter()
        .filter(|l| l.price > Decimal::ZERO && l.size > Decimal::ZERO)
        .min_by(|a, b| a.price.cmp(&b.price))
        .copied()
}

pub fn best_bid(book: &ApiOrderBook) -> Option<ApiOrderBookLevel> {
    book.bids
        .iter()
        .filter(|l| l.price > Decimal::ZERO && l.size > Decimal::ZERO)
        .max_by(|a, b| a.price.cmp(&b.price))
        .copied()
}

/// Live BUY: repeatedly lift the best ask with fill-or-kill orders until the
/// notional budget is spent, the price guard trips, or retries drain.
///
/// The venue's position endpoint lags fills, so the caller persists the
/// aggregate token quantity on the source activity afterwards.
pub async fn run_live_buy(
    clob: &ClobClient,
    asset: &str,
    target_price: Decimal,
    notional: Decimal,
    config: &AppConfig,
) -> (LiveFills, LiveLoopEnd) {
    let mut fills = LiveFills::default();
    let mut remaining = notional;
    let mut retries: u32 = 0;

    loop {
        if remaining < config.min_order_usd {
            return (fills, LiveLoopEnd::Done);
        }

        let book = match clob.get_order_book(asset).await {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(asset, error = %e, "Live BUY: order book fetch failed");
                retries += 1;
                if retries >= config.live_retry_limit {
                    return (fills, LiveLoopEnd::Exhausted("order book unavailable".into()));
                }
                continue;
            }
        };

        let Some(best) = best_ask(&book) else {
            retries += 1;
            if retries >= config.live_retry_limit {
                return (fills, LiveLoopEnd::Exhausted("no asks in book".into()));
            }
            continue;
        };

        if best.price > target_price + config.live_slippage_guard_abs {
            tracing::warn!(
                asset,
                best_price = %best.price,
                target = %target_price,
                "Live BUY: best ask beyond slippage guard, aborting"
            );
            return (fills, LiveLoopEnd::PriceGuard);
        }

        let order_quote = remaining.min(best.size * best.price);
        let order_tokens = order_quote / best.price;
        let request = FokOrderRequest::new(asset, Side::Buy, order_tokens, best.price);

        match clob.post_fok_order(&request).await {
            Ok(resp) if resp.success => {
                let got = resp.making_amount.unwrap_or(order_tokens);
                let spent = resp.taking_amount.unwrap_or(order_quote);
                fills.tokens += got;
                fills.quote += spent;
                remaining -= spent;
                retries = 0;
                counter!("orders_filled_total").increment(1);
                tracing::info!(asset, tokens = %got, spent = %spent, "Live BUY fill");
            }
            Ok(resp) if resp.is_insufficient_funds() => {
                counter!("orders_failed_total").increment(1);
                tracing::warn!(asset, error = ?resp.error_msg, "Live BUY: funds exhausted");
                return (
                    fills,
                    LiveLoopEnd::Exhausted("insufficient funds/allowance".into()),
                );
            }
            Ok(resp) => {
                counter!("orders_failed_total").increment(1);
                tracing::warn!(asset, error = ?resp.error_msg, "Live BUY: order rejected");
                retries += 1;
            }
            Err(e) => {
                counter!("orders_failed_total").increment(1);
                tracing::warn!(asset, error = %e, "Live BUY: order submission failed");
                retries += 1;
            }
        }

        if retries >= config.live_retry_limit {
            return (fills, LiveLoopEnd::Exhausted("retry limit reached".into()));
        }
    }
}

/// Live SELL: hit the best bid with fill-or-kill orders until the token
/// quantity is sold or retries drain. No price guard — liquidation proceeds
/// at whatever the book offers.
pub async fn run_live_sell(
    clob: &ClobClient,
    asset: &str,
    tokens: Decimal,
    config: &AppConfig,
) -> (LiveFills, LiveLoopEnd) {
    let mut fills = LiveFills::default();
    let mut remaining = tokens;
    let mut retries: u32 = 0;

    loop {
        if remaining < config.min_order_tokens {
            return (fills, LiveLoopEnd::Done);
        }

        let book = match clob.get_order_book(asset).await {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(asset, error = %e, "Live SELL: order book fetch failed");
                retries += 1;
                if retries >= config.live_retry_limit {
                    return (fills, LiveLoopEnd::Exhausted("order book unavailable".into()));
                }
                continue;
            }
        };

        let Some(best) = best_bid(&book) else {
            retries += 1;
            if retries >= config.live_retry_limit {
                return (fills, LiveLoopEnd::Exhausted("no bids in book".into()));
            }
            continue;
        };

        let order_tokens = remaining.min(best.size);
        let request = FokOrderRequest::new(asset, Side::Sell, order_tokens, best.price);

        match clob.post_fok_order(&request).await {
            Ok(resp) if resp.success => {
                let sold = resp.making_amount.unwrap_or(order_tokens);
                let received = resp.taking_amount.unwrap_or(order_tokens * best.price);
                fills.tokens += sold;
                fills.quote += received;
                remaining -= sold;
                retries = 0;
                counter!("orders_filled_total").increment(1);
                tracing::info!(asset, tokens = %sold, received = %received, "Live SELL fill");
            }
            Ok(resp) if resp.is_insufficient_funds() => {
                counter!("orders_failed_total").increment(1);
                tracing::warn!(asset, error = ?resp.error_msg, "Live SELL: allowance exhausted");
                return (
                    fills,
                    LiveLoopEnd::Exhausted("insufficient balance/allowance".into()),
                );
            }
            Ok(resp) => {
                counter!("orders_failed_total").increment(1);
                tracing::warn!(asset, error = ?resp.error_msg, "Live SELL: order rejected");
                retries += 1;
            }
            Err(e) => {
                counter!("orders_failed_total").increment(1);
                tracing::warn!(asset, error = %e, "Live SELL: order submission failed");
                retries += 1;
            }
        }

        if retries >= config.live_retry_limit {
            return (fills, LiveLoopEnd::Exhausted("retry limit reached".into()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn book(bids: &[(Decimal, Decimal)], asks: &[(Decimal, Decimal)]) -> ApiOrderBook {
        ApiOrderBook {
            bids: bids
                .iter()
                .map(|&(price, size)| ApiOrderBookLevel { price, size })
                .collect(),
            asks: asks
                .iter()
                .map(|&(price, size)| ApiOrderBookLevel { price, size })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn best_ask_is_lowest_valid_level() {
        let b = book(&[], &[(dec!(0.44), dec!(10)), (dec!(0.41), dec!(5)), (dec!(0), dec!(99))]);
        assert_eq!(best_ask(&b).unwrap().price, dec!(0.41));
    }

    #[test]
    fn best_bid_is_highest_valid_level() {
        let b = book(&[(dec!(0.38), dec!(10)), (dec!(0.40), dec!(5)), (dec!(0.99), dec!(0))], &[]);
        assert_eq!(best_bid(&b).unwrap().price, dec!(0.40));
    }

    #[test]
    fn empty_sides_have_no_best() {
        let b = book(&[], &[]);
        assert!(best_ask(&b).is_none());
        assert!(best_bid(&b).is_none());
    }

    #[test]
    fn avg_price_of_no_fills_is_zero() {
        assert_eq!(LiveFills::default().avg_price(), Decimal::ZERO);

        let fills = LiveFills {
            tokens: dec!(50),
            quote: dec!(20),
        };
        assert_eq!(fills.avg_price(), dec!(0.40));
    }
}
