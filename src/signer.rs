use crate::{
    hash::user_op_hash,
    types::{SignedUserOperation, UserOperation},
};
use ethers::{
    signers::{LocalWallet, Signer},
    types::{Address, Bytes, Signature, SignatureError},
};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignError {
    #[error("invalid private key: {0}")]
    InvalidKey(String),
    #[error("failed to sign userOpHash")]
    Signer(#[source] Box<dyn std::error::Error + Send + Sync>),
}

pub fn wallet_from_private_key(private_key: &str, chain_id: u64) -> Result<LocalWallet, SignError> {
    let wallet = LocalWallet::from_str(private_key).map_err(|e| SignError::InvalidKey(e.to_string()))?;
    Ok(wallet.with_chain_id(chain_id))
}

/// Hashes `op` for `(entry_point, chain_id)` and signs the hash as a personal
/// message (EIP-191 prefix). Any existing signature is replaced.
pub async fn sign_user_operation<S: Signer>(
    op: UserOperation,
    signer: &S,
    entry_point: Address,
    chain_id: u64,
) -> Result<SignedUserOperation, SignError>
where
    S::Error: 'static,
{
    let hash = user_op_hash(&op, entry_point, chain_id);

    let sig = signer
        .sign_message(hash.as_bytes())
        .await
        .map_err(|e| SignError::Signer(Box::new(e)))?;

    tracing::debug!(
        user_op_hash = %crate::encoding::fmt_h256(hash),
        signer = %crate::encoding::fmt_address(signer.address()),
        "signed user operation"
    );

    let op = UserOperation {
        signature: Bytes::from(sig.to_vec()),
        ..op
    };
    Ok(SignedUserOperation::new(op, hash))
}

impl SignedUserOperation {
    /// Recovers the address that produced the signature over [`Self::hash`].
    pub fn recover_signer(&self) -> Result<Address, SignatureError> {
        let sig = Signature::try_from(&self.op().signature[..])?;
        sig.recover(self.hash().as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::U256;

    // Well-known dev key (anvil/hardhat account #0).
    const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const DEV_ADDR: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

    fn op() -> UserOperation {
        UserOperation {
            sender: Address::repeat_byte(0xaa),
            nonce: U256::from(5),
            call_data: Bytes::from(vec![0xb6, 0x1d, 0x27, 0xf6]),
            call_gas_limit: U256::from(500_000u64),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn sign_then_recover_yields_signer() {
        let wallet = wallet_from_private_key(DEV_KEY, 6321).unwrap();
        assert_eq!(wallet.address(), DEV_ADDR.parse::<Address>().unwrap());

        let entry_point = Address::repeat_byte(0xee);
        let signed = sign_user_operation(op(), &wallet, entry_point, 6321).await.unwrap();

        assert_eq!(signed.op().signature.len(), 65);
        assert_eq!(signed.hash(), user_op_hash(&op(), entry_point, 6321));
        assert_eq!(signed.recover_signer().unwrap(), wallet.address());
    }

    #[tokio::test]
    async fn recovery_holds_for_random_keys() {
        for _ in 0..4 {
            let wallet = LocalWallet::new(&mut ethers::core::rand::thread_rng());
            let signed = sign_user_operation(op(), &wallet, Address::repeat_byte(0x01), 1)
                .await
                .unwrap();
            assert_eq!(signed.recover_signer().unwrap(), wallet.address());
        }
    }

    #[tokio::test]
    async fn resigning_replaces_signature() {
        let wallet = wallet_from_private_key(DEV_KEY, 1).unwrap();
        let first = sign_user_operation(op(), &wallet, Address::repeat_byte(0x01), 1)
            .await
            .unwrap();
        let edited = UserOperation {
            nonce: U256::from(6),
            ..first.op().clone()
        };
        let second = sign_user_operation(edited, &wallet, Address::repeat_byte(0x01), 1)
            .await
            .unwrap();
        assert_ne!(first.hash(), second.hash());
        assert_ne!(first.op().signature, second.op().signature);
        assert_eq!(second.recover_signer().unwrap(), wallet.address());
    }

    #[test]
    fn invalid_key_material_is_rejected() {
        assert!(matches!(
            wallet_from_private_key("0x1234", 1),
            Err(SignError::InvalidKey(_))
        ));
        assert!(matches!(
            wallet_from_private_key(&format!("0x{}", "00".repeat(32)), 1),
            Err(SignError::InvalidKey(_))
        ));
    }
}
