//! userOpHash computation for EntryPoint v0.6.
//!
//! `keccak256(abi.encode(keccak256(pack(op)), entryPoint, chainId))` where
//! `pack` replaces the dynamic fields with their hashes and leaves out the
//! signature.

use crate::types::UserOperation;
use ethers::{
    abi::{encode, Token},
    types::{Address, Bytes, H256, U256},
    utils::keccak256,
};

/// ABI-encodes every field except the signature.
pub fn pack_without_signature(op: &UserOperation) -> Bytes {
    let encoded = encode(&[
        Token::Address(op.sender),
        Token::Uint(op.nonce),
        Token::FixedBytes(keccak256(&op.init_code).to_vec()),
        Token::FixedBytes(keccak256(&op.call_data).to_vec()),
        Token::Uint(op.call_gas_limit),
        Token::Uint(op.verification_gas_limit),
        Token::Uint(op.pre_verification_gas),
        Token::Uint(op.max_fee_per_gas),
        Token::Uint(op.max_priority_fee_per_gas),
        Token::FixedBytes(keccak256(&op.paymaster_and_data).to_vec()),
    ]);
    Bytes::from(encoded)
}

/// Hash bound to `entry_point` and `chain_id`. The signature field is never
/// part of the input.
pub fn user_op_hash(op: &UserOperation, entry_point: Address, chain_id: u64) -> H256 {
    let op_hash = keccak256(pack_without_signature(op));
    H256::from(keccak256(encode(&[
        Token::FixedBytes(op_hash.to_vec()),
        Token::Address(entry_point),
        Token::Uint(U256::from(chain_id)),
    ])))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_point() -> Address {
        "0x5FF137D4b0FDCD49DcA30c7CF57E578a026d2789".parse().unwrap()
    }

    fn fixture() -> UserOperation {
        UserOperation {
            sender: "0x921f125a92930cabb2969ad9323261d3a2a784e7".parse().unwrap(),
            nonce: 0.into(),
            init_code: "0x9406cc6185a346906296840746125a0e449764545fbfb9cf00000000000000000000000043378ff8c70109ee4dbe85af34428ab0615ebd230000000000000000000000000000000000000000000000000000000000000000".parse().unwrap(),
            call_data: "0xb61d27f6000000000000000000000000a02bfd0ba5d182226627a933333ba92d1a60e234000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000600000000000000000000000000000000000000000000000000000000000000000".parse().unwrap(),
            call_gas_limit: 530_100.into(),
            verification_gas_limit: 500_624.into(),
            pre_verification_gas: 104_056.into(),
            max_fee_per_gas: 1_695_000_030.into(),
            max_priority_fee_per_gas: 1_695_000_000.into(),
            paymaster_and_data: Bytes::default(),
            signature: Bytes::default(),
        }
    }

    #[test]
    fn matches_known_entry_point_v06_hash() {
        assert_eq!(
            user_op_hash(&fixture(), entry_point(), 5),
            "0x7bca0c9a2ffbd23c25c7d5e1df0520142c0c39454cee778c3201eef6a8a27f06"
                .parse::<H256>()
                .unwrap()
        );
    }

    #[test]
    fn signature_does_not_affect_hash() {
        let mut signed = fixture();
        signed.signature = Bytes::from(vec![0x5a; 65]);
        assert_eq!(
            user_op_hash(&signed, entry_point(), 5),
            user_op_hash(&fixture(), entry_point(), 5)
        );
    }

    #[test]
    fn every_field_entry_point_and_chain_change_the_hash() {
        let base = user_op_hash(&fixture(), entry_point(), 5);

        let variants: Vec<(&str, UserOperation)> = vec![
            ("sender", UserOperation { sender: Address::repeat_byte(0x01), ..fixture() }),
            ("nonce", UserOperation { nonce: 1.into(), ..fixture() }),
            ("initCode", UserOperation { init_code: Bytes::default(), ..fixture() }),
            ("callData", UserOperation { call_data: Bytes::from(vec![0x00]), ..fixture() }),
            ("callGasLimit", UserOperation { call_gas_limit: 530_101.into(), ..fixture() }),
            ("verificationGasLimit", UserOperation { verification_gas_limit: 1.into(), ..fixture() }),
            ("preVerificationGas", UserOperation { pre_verification_gas: 1.into(), ..fixture() }),
            ("maxFeePerGas", UserOperation { max_fee_per_gas: 1.into(), ..fixture() }),
            ("maxPriorityFeePerGas", UserOperation { max_priority_fee_per_gas: 1.into(), ..fixture() }),
            ("paymasterAndData", UserOperation { paymaster_and_data: Bytes::from(vec![0x01]), ..fixture() }),
        ];
        for (field, op) in variants {
            assert_ne!(user_op_hash(&op, entry_point(), 5), base, "{field}");
        }

        assert_ne!(user_op_hash(&fixture(), Address::repeat_byte(0x02), 5), base);
        assert_ne!(user_op_hash(&fixture(), entry_point(), 1), base);
    }

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(
            user_op_hash(&fixture(), entry_point(), 6321),
            user_op_hash(&fixture(), entry_point(), 6321)
        );
    }
}
