//! Smart account address discovery.
//!
//! Two independent paths: read the created address back out of a
//! `callTracer` trace of the creation transaction, or derive it
//! deterministically (CREATE2, or the factory's own `getAddress` view).
//! [`reconcile`] checks that they agree.

use crate::{
    encoding::{fmt_address, fmt_h256},
    rpc::{JsonRpcClient, TransportError},
};
use anyhow::{anyhow, Context, Result};
use ethers::{
    abi::AbiParser,
    contract::Contract,
    providers::Middleware,
    types::{Address, Bytes, TransactionReceipt, TransactionRequest, H256, U256},
    utils::get_create2_address_from_hash,
};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TraceError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("debug_traceTransaction returned an error: {0}")]
    Rpc(Value),
    #[error("trace has no result.output")]
    MissingOutput,
    #[error("trace output is not a 32-byte padded address: {0}")]
    MalformedOutput(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("traced address {traced:?} does not match derived address {derived:?}")]
pub struct AddressMismatch {
    pub traced: Address,
    pub derived: Address,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddressSource {
    Trace,
    Derived,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolvedAddress {
    pub address: Address,
    pub source: AddressSource,
}

/// Reads created-contract addresses out of `debug_traceTransaction` traces.
#[derive(Debug, Clone)]
pub struct TraceResolver {
    rpc: JsonRpcClient,
}

impl TraceResolver {
    pub fn new(rpc: JsonRpcClient) -> Self {
        Self { rpc }
    }

    pub async fn resolve_created_address(&self, tx_hash: H256) -> Result<Address, TraceError> {
        let params = serde_json::json!([fmt_h256(tx_hash), { "tracer": "callTracer" }]);
        let body = self.rpc.call("debug_traceTransaction", params).await?;

        if let Some(err) = body.get("error") {
            return Err(TraceError::Rpc(err.clone()));
        }

        let output = body
            .get("result")
            .and_then(|r| r.get("output"))
            .and_then(|o| o.as_str())
            .ok_or(TraceError::MissingOutput)?;

        let address = address_from_word(output)?;
        tracing::debug!(tx = %fmt_h256(tx_hash), address = %fmt_address(address), "address from trace");
        Ok(address)
    }
}

/// Strips the 12 zero bytes of left padding from an ABI-encoded address word.
pub fn address_from_word(word: &str) -> Result<Address, TraceError> {
    let malformed = || TraceError::MalformedOutput(word.to_string());

    let hex_str = word.strip_prefix("0x").ok_or_else(malformed)?;
    if hex_str.len() != 64 || !hex_str.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(malformed());
    }
    let (padding, addr) = hex_str.split_at(24);
    if padding.chars().any(|c| c != '0') {
        return Err(malformed());
    }
    addr.parse::<Address>().map_err(|_| malformed())
}

/// CREATE2 address for `factory`, `salt` and the hash of the init code.
pub fn create2_address(factory: Address, salt: U256, init_code_hash: H256) -> Address {
    let mut salt_bytes = [0u8; 32];
    salt.to_big_endian(&mut salt_bytes);
    get_create2_address_from_hash(factory, salt_bytes, init_code_hash)
}

/// Picks the traced address when available and checks it against `derived`.
pub fn reconcile(
    traced: Result<Address, TraceError>,
    derived: Address,
) -> Result<ResolvedAddress, AddressMismatch> {
    match traced {
        Ok(traced) if traced == derived => Ok(ResolvedAddress {
            address: traced,
            source: AddressSource::Trace,
        }),
        Ok(traced) => Err(AddressMismatch { traced, derived }),
        Err(e) => {
            tracing::warn!(error = %e, derived = %fmt_address(derived), "trace resolution failed; using derived address");
            Ok(ResolvedAddress {
                address: derived,
                source: AddressSource::Derived,
            })
        }
    }
}

/// `SimpleAccountFactory.getAddress(owner, salt)`.
pub async fn factory_address<M: Middleware + 'static>(
    client: Arc<M>,
    factory: Address,
    owner: Address,
    salt: U256,
) -> Result<Address> {
    let factory_abi = AbiParser::default()
        .parse(&["function getAddress(address owner, uint256 salt) view returns (address)"])?;
    let factory = Contract::new(factory, factory_abi, client);

    let account: Address = factory
        .method("getAddress", (owner, salt))?
        .call()
        .await
        .context("factory.getAddress failed")?;
    Ok(account)
}

/// Calldata for `createAccount(owner, salt)`.
pub fn create_account_calldata<M: Middleware + 'static>(
    client: Arc<M>,
    factory: Address,
    owner: Address,
    salt: U256,
) -> Result<Bytes> {
    let factory_abi = AbiParser::default()
        .parse(&["function createAccount(address owner, uint256 salt) returns (address)"])?;
    let factory_c = Contract::new(factory, factory_abi, client);
    factory_c
        .method::<_, Address>("createAccount", (owner, salt))?
        .calldata()
        .ok_or_else(|| anyhow!("failed to build createAccount calldata"))
}

/// Sends `createAccount(owner, salt)` and waits for the receipt.
pub async fn create_account<M: Middleware + 'static>(
    client: Arc<M>,
    factory: Address,
    owner: Address,
    salt: U256,
) -> Result<TransactionReceipt> {
    let data = create_account_calldata(client.clone(), factory, owner, salt)?;
    let tx = TransactionRequest::new().to(factory).data(data);
    let pending = client
        .send_transaction(tx, None)
        .await
        .map_err(|e| anyhow!("createAccount send failed: {e}"))?;

    let receipt = pending
        .await
        .context("failed waiting for createAccount receipt")?
        .ok_or_else(|| anyhow!("createAccount tx dropped from mempool"))?;

    if receipt.status != Some(1u64.into()) {
        return Err(anyhow!(
            "createAccount reverted in tx {}",
            fmt_h256(receipt.transaction_hash)
        ));
    }

    tracing::info!(tx = %fmt_h256(receipt.transaction_hash), "createAccount mined");
    Ok(receipt)
}

/// `SimpleAccount.execute(dest, value, func)` calldata.
pub fn execute_calldata<M: Middleware + 'static>(
    client: Arc<M>,
    account: Address,
    target: Address,
    value: U256,
    data: Bytes,
) -> Result<Bytes> {
    let account_abi = AbiParser::default()
        .parse(&["function execute(address dest, uint256 value, bytes func)"])?;
    let account_c = Contract::new(account, account_abi, client);
    account_c
        .method::<_, ()>("execute", (target, value, data))?
        .calldata()
        .ok_or_else(|| anyhow!("failed to build execute calldata"))
}
