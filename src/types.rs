use ethers::types::{Address, Bytes, H256, U256};

/// ERC-4337 UserOperation (EntryPoint v0.6 layout).
///
/// `init_code` and `paymaster_and_data` are empty unless the caller sets them.
/// `signature` stays empty until [`crate::signer::sign_user_operation`] produces a
/// [`SignedUserOperation`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserOperation {
    pub sender: Address,
    pub nonce: U256,
    pub init_code: Bytes,
    pub call_data: Bytes,
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    pub paymaster_and_data: Bytes,
    pub signature: Bytes,
}

impl UserOperation {
    /// Unsigned operation for `sender` with the given gas settings.
    pub fn new(sender: Address, nonce: U256, call_data: Bytes, gas: &GasSettings) -> Self {
        Self {
            sender,
            nonce,
            call_data,
            call_gas_limit: gas.call_gas_limit,
            verification_gas_limit: gas.verification_gas_limit,
            pre_verification_gas: gas.pre_verification_gas,
            max_fee_per_gas: gas.max_fee_per_gas,
            max_priority_fee_per_gas: gas.max_priority_fee_per_gas,
            ..Default::default()
        }
    }
}

/// Gas and fee parameters copied into every new operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GasSettings {
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
}

impl Default for GasSettings {
    fn default() -> Self {
        Self {
            call_gas_limit: U256::from(500_000u64),
            verification_gas_limit: U256::from(200_000u64),
            pre_verification_gas: U256::from(50_000u64),
            max_fee_per_gas: U256::from(1_000_000_000u64),
            max_priority_fee_per_gas: U256::from(1_000_000_000u64),
        }
    }
}

/// An operation together with the hash its signature covers.
///
/// Only the signer constructs this. Fields are read-only; to change anything,
/// build a new [`UserOperation`] and sign it again.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedUserOperation {
    op: UserOperation,
    hash: H256,
}

impl SignedUserOperation {
    pub(crate) fn new(op: UserOperation, hash: H256) -> Self {
        Self { op, hash }
    }

    pub fn op(&self) -> &UserOperation {
        &self.op
    }

    /// The userOpHash the signature was produced over.
    pub fn hash(&self) -> H256 {
        self.hash
    }
}
