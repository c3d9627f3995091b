use std::str::FromStr;

use alloy_primitives::Address;
use alloy_signer_local::PrivateKeySigner;

/// Polygon chain ID (EIP-155 replay protection on every signed tx).
pub const POLYGON_CHAIN_ID: u64 = 137;

/// Derive the checksummed address controlled by a hex-encoded private key
/// (with or without `0x` prefix). Used to verify that a Live task's key
/// actually controls its operator wallet.
pub fn derive_address(private_key: &str) -> anyhow::Result<String> {
    let signer = PrivateKeySigner::from_str(private_key)?;
    Ok(format!("{}", signer.address()))
}

/// Signer for a Live task. The private key is parsed once at construction
/// and never re-exposed as a string.
pub struct LiveWallet {
    signer: PrivateKeySigner,
}

impl LiveWallet {
    pub fn new(private_key: &str) -> anyhow::Result<Self> {
        let signer = PrivateKeySigner::from_str(private_key)?;
        Ok(Self { signer })
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub fn address_string(&self) -> String {
        format!("{}", self.address())
    }

    pub fn signer(&self) -> &PrivateKeySigner {
        &self.signer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The canonical test vector: this key derives the first Hardhat account.
    const TEST_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const TEST_ADDR: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

    #[test]
    fn derives_known_address() {
        let derived = derive_address(TEST_KEY).unwrap();
        assert!(derived.eq_ignore_ascii_case(TEST_ADDR));
    }

    #[test]
    fn accepts_key_without_prefix() {
        let derived = derive_address(TEST_KEY.trim_start_matches("0x")).unwrap();
        assert!(derived.eq_ignore_ascii_case(TEST_ADDR));
    }

    #[test]
    fn rejects_garbage_keys() {
        assert!(derive_address("nope").is_err());
        assert!(LiveWallet::new("0x1234").is_err());
    }
}
