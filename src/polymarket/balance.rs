use alloy_primitives::{Address, U256};
use rust_decimal::Decimal;

use super::rpc::{RpcClient, RpcError};

/// ERC-20 `balanceOf(address)` selector.
const BALANCE_OF_SELECTOR: [u8; 4] = [0x70, 0xa0, 0x82, 0x31];

/// The venue's collateral uses 6-decimal fixed point.
pub const COLLATERAL_DECIMALS: u32 = 6;

/// Reads a wallet's quote (collateral) balance straight from the chain.
#[derive(Debug, Clone)]
pub struct BalanceReader {
    rpc: RpcClient,
    collateral: Address,
}

impl BalanceReader {
    pub fn new(rpc: RpcClient, collateral: Address) -> Self {
        Self { rpc, collateral }
    }

    /// Current collateral balance of `owner`, in quote units.
    pub async fn quote_balance(&self, owner: Address) -> Result<Decimal, RpcError> {
        let mut data = Vec::with_capacity(36);
        data.extend_from_slice(&BALANCE_OF_SELECTOR);
        data.extend_from_slice(&[0u8; 12]);
        data.extend_from_slice(owner.as_slice());

        let out = self.rpc.call(self.collateral, &data).await?;
        let raw = U256::from_be_slice(&out);

        Ok(from_fixed_point(raw, COLLATERAL_DECIMALS))
    }
}

/// Convert a contract fixed-point quantity into a Decimal. Quantities beyond
/// i128 range are clamped — unreachable for any real collateral balance.
pub fn from_fixed_point(value: U256, decimals: u32) -> Decimal {
    let v: i128 = i128::try_from(value).unwrap_or(i128::MAX);
    Decimal::from_i128_with_scale(v, decimals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn converts_six_decimal_fixed_point() {
        assert_eq!(from_fixed_point(U256::from(1_000_000u64), 6), dec!(1));
        assert_eq!(from_fixed_point(U256::from(2_500_000u64), 6), dec!(2.5));
        assert_eq!(from_fixed_point(U256::ZERO, 6), dec!(0));
        assert_eq!(from_fixed_point(U256::from(1u64), 6), dec!(0.000001));
    }

    #[test]
    fn balance_of_calldata_is_36_bytes() {
        let owner = Address::ZERO;
        let mut data = Vec::new();
        data.extend_from_slice(&BALANCE_OF_SELECTOR);
        data.extend_from_slice(&[0u8; 12]);
        data.extend_from_slice(owner.as_slice());
        assert_eq!(data.len(), 36);
        assert_eq!(&data[..4], &[0x70, 0xa0, 0x82, 0x31]);
    }
}
