use alloy_consensus::TxLegacy;
use alloy_primitives::{keccak256, Address, B256, TxKind, U256};
use rust_decimal::Decimal;
use thiserror::Error;

use super::rpc::{RpcClient, RpcError};
use super::wallet::{LiveWallet, POLYGON_CHAIN_ID};

/// Gas limit for `redeemPositions`; generous over the observed ~150k.
const REDEEM_GAS_LIMIT: u64 = 500_000;

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("invalid condition id {0}")]
    InvalidConditionId(String),

    #[error("outcome index {index} out of range (slot count {slots})")]
    OutcomeIndexOutOfRange { index: u32, slots: u32 },

    #[error("signing failed: {0}")]
    Signer(String),

    #[error("redeem transaction {0} reverted")]
    Reverted(String),
}

/// Payout state of a `(conditionId, outcomeIndex)` pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Payout {
    pub settled: bool,
    /// numerator / denominator; meaningful only when settled.
    pub payout: Decimal,
}

impl Payout {
    pub const UNSETTLED: Payout = Payout {
        settled: false,
        payout: Decimal::ZERO,
    };
}

/// Result of an on-chain redemption attempt. A failed attempt is reported,
/// not raised — the caller decides whether to retry next cycle.
#[derive(Debug, Clone)]
pub struct RedeemOutcome {
    pub success: bool,
    pub tx_hash: Option<String>,
    pub gas_used: Option<u64>,
    pub error: Option<String>,
}

/// Reads payout ratios from the conditional-tokens settlement contract and
/// executes on-chain redemptions for Live tasks.
#[derive(Debug, Clone)]
pub struct SettlementAdapter {
    rpc: RpcClient,
    settlement: Address,
    collateral: Address,
}

impl SettlementAdapter {
    pub fn new(rpc: RpcClient, settlement: Address, collateral: Address) -> Self {
        Self {
            rpc,
            settlement,
            collateral,
        }
    }

    /// Whether the market settled, and the payout per token for the given
    /// outcome. `settled ⇔ payoutDenominator ≠ 0`.
    pub async fn payout_ratio(
        &self,
        condition_id: &str,
        outcome_index: u32,
    ) -> Result<Payout, SettlementError> {
        let cond = parse_condition_id(condition_id)?;

        let denominator = self
            .read_u256(&encode_bytes32_call("payoutDenominator(bytes32)", cond))
            .await?;
        if denominator.is_zero() {
            return Ok(Payout::UNSETTLED);
        }

        let slots = self.outcome_slot_count(cond).await?;
        if outcome_index >= slots {
            return Err(SettlementError::OutcomeIndexOutOfRange {
                index: outcome_index,
                slots,
            });
        }

        let numerator = self
            .read_u256(&encode_numerator_call(cond, outcome_index))
            .await?;

        let payout = u256_to_decimal(numerator) / u256_to_decimal(denominator);
        Ok(Payout {
            settled: true,
            payout,
        })
    }

    /// Redeem every index set of a settled condition for the wallet.
    ///
    /// Fee-bumped legacy transaction: current gas price × 1.2, fixed
    /// 500k gas limit. Success ⇔ receipt status 1.
    pub async fn redeem_on_chain(&self, wallet: &LiveWallet, condition_id: &str) -> RedeemOutcome {
        match self.try_redeem(wallet, condition_id).await {
            Ok((tx_hash, gas_used)) => RedeemOutcome {
                success: true,
                tx_hash: Some(tx_hash),
                gas_used,
                error: None,
            },
            Err(e) => RedeemOutcome {
                success: false,
                tx_hash: None,
                gas_used: None,
                error: Some(e.to_string()),
            },
        }
    }

    async fn try_redeem(
        &self,
        wallet: &LiveWallet,
        condition_id: &str,
    ) -> Result<(String, Option<u64>), SettlementError> {
        let cond = parse_condition_id(condition_id)?;
        let slots = self.outcome_slot_count(cond).await?;
        if slots == 0 {
            return Err(SettlementError::InvalidConditionId(condition_id.into()));
        }

        let calldata = encode_redeem_positions(self.collateral, cond, slots);

        let gas_price = self.rpc.gas_price().await?;
        let gas_price = gas_price + gas_price / 5;
        let nonce = self.rpc.transaction_count(wallet.address()).await?;

        let mut tx = TxLegacy {
            chain_id: Some(POLYGON_CHAIN_ID),
            nonce,
            gas_price,
            gas_limit: REDEEM_GAS_LIMIT,
            to: TxKind::Call(self.settlement),
            value: U256::ZERO,
            input: calldata.into(),
        };

        let raw = sign_legacy_tx(wallet, &mut tx)?;
        let tx_hash = self.rpc.send_raw_transaction(&raw).await?;

        tracing::info!(
            tx_hash = %tx_hash,
            wallet = %wallet.address_string(),
            condition_id,
            "Redeem transaction submitted"
        );

        let receipt = self.rpc.wait_for_receipt(&tx_hash).await?;
        if !receipt.status {
            return Err(SettlementError::Reverted(tx_hash));
        }

        Ok((tx_hash, receipt.gas_used))
    }

    async fn outcome_slot_count(&self, cond: B256) -> Result<u32, SettlementError> {
        let raw = self
            .read_u256(&encode_bytes32_call("getOutcomeSlotCount(bytes32)", cond))
            .await?;
        Ok(u32::try_from(raw).unwrap_or(0))
    }

    async fn read_u256(&self, calldata: &[u8]) -> Result<U256, SettlementError> {
        let out = self.rpc.call(self.settlement, calldata).await?;
        Ok(U256::from_be_slice(&out))
    }
}

fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

fn encode_bytes32_call(signature: &str, arg: B256) -> Vec<u8> {
    let mut data = Vec::with_capacity(36);
    data.extend_from_slice(&selector(signature));
    data.extend_from_slice(arg.as_slice());
    data
}

fn encode_numerator_call(cond: B256, index: u32) -> Vec<u8> {
    let mut data = Vec::with_capacity(68);
    data.extend_from_slice(&selector("payoutNumerators(bytes32,uint256)"));
    data.extend_from_slice(cond.as_slice());
    data.extend_from_slice(&U256::from(index).to_be_bytes::<32>());
    data
}

/// `redeemPositions(collateralToken, parentCollectionId=0x0, conditionId,
/// indexSets)` with `indexSets = [1<<0, 1<<1, …, 1<<(n−1)]`.
fn encode_redeem_positions(collateral: Address, cond: B256, slot_count: u32) -> Vec<u8> {
    let mut data = Vec::with_capacity(4 + 32 * (5 + slot_count as usize));
    data.extend_from_slice(&selector("redeemPositions(address,bytes32,bytes32,uint256[])"));

    // address collateralToken, left-padded
    data.extend_from_slice(&[0u8; 12]);
    data.extend_from_slice(collateral.as_slice());
    // bytes32 parentCollectionId = zero
    data.extend_from_slice(&[0u8; 32]);
    // bytes32 conditionId
    data.extend_from_slice(cond.as_slice());
    // offset of the dynamic uint256[] (4 head words)
    data.extend_from_slice(&U256::from(128u64).to_be_bytes::<32>());
    // array length + elements
    data.extend_from_slice(&U256::from(slot_count).to_be_bytes::<32>());
    for i in 0..slot_count {
        data.extend_from_slice(&(U256::ONE << i as usize).to_be_bytes::<32>());
    }

    data
}

fn sign_legacy_tx(wallet: &LiveWallet, tx: &mut TxLegacy) -> Result<Vec<u8>, SettlementError> {
    use alloy_consensus::transaction::RlpEcdsaTx;
    use alloy_network::TxSignerSync;
    use alloy_primitives::bytes::BytesMut;

    let sig = wallet
        .signer()
        .sign_transaction_sync(tx)
        .map_err(|e| SettlementError::Signer(e.to_string()))?;

    let mut encoded = BytesMut::new();
    tx.rlp_encode_signed(&sig, &mut encoded);
    Ok(encoded.to_vec())
}

/// Pad a hex condition id (with or without `0x`) to 32 bytes.
fn parse_condition_id(s: &str) -> Result<B256, SettlementError> {
    let hex_str = s.trim_start_matches("0x");
    let bytes =
        hex::decode(hex_str).map_err(|_| SettlementError::InvalidConditionId(s.to_string()))?;
    if bytes.is_empty() || bytes.len() > 32 {
        return Err(SettlementError::InvalidConditionId(s.to_string()));
    }

    let mut padded = [0u8; 32];
    padded[32 - bytes.len()..].copy_from_slice(&bytes);
    Ok(B256::from(padded))
}

fn u256_to_decimal(value: U256) -> Decimal {
    Decimal::from(u128::try_from(value).unwrap_or(u128::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn condition_id_is_left_padded() {
        let cond = parse_condition_id("0x0102").unwrap();
        assert_eq!(cond.as_slice()[30..], [0x01, 0x02]);
        assert_eq!(cond.as_slice()[..30], [0u8; 30]);

        assert!(parse_condition_id("0x").is_err());
        assert!(parse_condition_id("zz").is_err());
    }

    #[test]
    fn redeem_calldata_shape() {
        let collateral: Address = "0x2791Bca1f2de4661ED88A30C99A7a9449Aa84174"
            .parse()
            .unwrap();
        let cond = parse_condition_id("0xff").unwrap();
        let data = encode_redeem_positions(collateral, cond, 2);

        // selector + 4 head words + length + 2 elements
        assert_eq!(data.len(), 4 + 32 * 7);
        // parentCollectionId word is all zero
        assert_eq!(&data[4 + 32..4 + 64], &[0u8; 32]);
        // offset points at the 5th word
        assert_eq!(U256::from_be_slice(&data[4 + 96..4 + 128]), U256::from(128u64));
        // index sets are 1 and 2
        assert_eq!(U256::from_be_slice(&data[4 + 160..4 + 192]), U256::from(1u64));
        assert_eq!(U256::from_be_slice(&data[4 + 192..4 + 224]), U256::from(2u64));
    }

    #[test]
    fn selector_is_first_four_keccak_bytes() {
        // balanceOf(address) has the well-known selector 70a08231.
        assert_eq!(selector("balanceOf(address)"), [0x70, 0xa0, 0x82, 0x31]);
    }

    #[test]
    fn payout_math() {
        assert_eq!(
            u256_to_decimal(U256::from(1u64)) / u256_to_decimal(U256::from(2u64)),
            dec!(0.5)
        );
    }
}
