pub mod buy_handler;
pub mod ingestor;
pub mod live_orders;
pub mod order_book;
pub mod reconciler;
pub mod redeem_handler;
pub mod sell_handler;
pub mod tick_runner;

use std::fmt;

use crate::models::activity::status;

/// Terminal result of handling one activity. Maps one-to-one onto the
/// activity state machine's done states.
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerOutcome {
    /// Fill > 0 executed and recorded.
    Executed,
    /// Preconditions failed or no fill was possible.
    Skipped(SkipReason),
    /// Live retry budget or funds ran out.
    Exhausted(String),
}

impl HandlerOutcome {
    pub fn terminal_status(&self) -> &'static str {
        match self {
            HandlerOutcome::Executed => status::DONE_OK,
            HandlerOutcome::Skipped(_) => status::DONE_SKIPPED,
            HandlerOutcome::Exhausted(_) => status::DONE_EXHAUSTED,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// Unit price above the BUY cap — no room left above the entry.
    PriceCapExceeded,
    /// Already holding this market; no pyramiding.
    AlreadyHolding,
    /// Notional after the balance cap fell under the venue minimum.
    BelowMinOrder,
    /// Reconstructed SELL size under the one-token minimum.
    BelowMinTokens,
    /// Nothing held to sell or redeem.
    NoPosition,
    /// Book empty or entirely degenerate.
    NoLiquidity,
    /// Simulated fill exceeded the BUY slippage ceiling.
    SlippageTooHigh,
    /// Settlement contract reports the market as unresolved.
    NotSettled,
    /// On-chain redemption attempt failed; next cycle may retry.
    RedeemFailed,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SkipReason::PriceCapExceeded => "price above buy cap",
            SkipReason::AlreadyHolding => "already holding position",
            SkipReason::BelowMinOrder => "below minimum order notional",
            SkipReason::BelowMinTokens => "below minimum token quantity",
            SkipReason::NoPosition => "no position held",
            SkipReason::NoLiquidity => "no liquidity",
            SkipReason::SlippageTooHigh => "slippage too high",
            SkipReason::NotSettled => "market not settled",
            SkipReason::RedeemFailed => "redemption failed",
        };
        f.write_str(s)
    }
}
