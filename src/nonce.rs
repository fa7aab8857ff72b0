use async_trait::async_trait;
use ethers::{
    abi::AbiParser,
    contract::Contract,
    providers::Middleware,
    types::{Address, U256},
};
use std::sync::Arc;
use thiserror::Error;

pub type ReadError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum NonceError {
    #[error("account.getNonce failed for {account:?}")]
    Account {
        account: Address,
        #[source]
        source: ReadError,
    },
    #[error("entryPoint.getNonce failed for {sender:?} at sequence {sequence}")]
    EntryPoint {
        sender: Address,
        sequence: U256,
        #[source]
        source: ReadError,
    },
    #[error("sequence overflow: {sequence} + {increment}")]
    Overflow { sequence: U256, increment: U256 },
}

/// Read access to the account's own monotonic counter (`getNonce()`).
#[async_trait]
pub trait AccountNonceReader: Send + Sync {
    async fn sequence_number(&self, account: Address) -> Result<U256, ReadError>;
}

/// Read access to the EntryPoint's per-key nonce (`getNonce(sender, key)`).
#[async_trait]
pub trait EntryPointNonceReader: Send + Sync {
    async fn get_nonce(&self, sender: Address, key: U256) -> Result<U256, ReadError>;
}

#[derive(Clone, Debug)]
pub struct NonceRequest {
    pub sender: Address,
    /// Caller-chosen partition label. Carried for tracing; the EntryPoint is
    /// queried at the candidate sequence number.
    pub key: U256,
    /// Slots to skip ahead of the on-chain counter. Lets a caller prepare
    /// several operations before the first one lands; a wrong guess surfaces
    /// as a nonce collision at submission.
    pub increment: U256,
}

/// Two-layer nonce lookup: account counter, then EntryPoint nonce.
#[derive(Debug, Clone)]
pub struct NonceResolver<A, E> {
    account: A,
    entry_point: E,
}

impl<A: AccountNonceReader, E: EntryPointNonceReader> NonceResolver<A, E> {
    pub fn new(account: A, entry_point: E) -> Self {
        Self {
            account,
            entry_point,
        }
    }

    pub async fn resolve(&self, req: &NonceRequest) -> Result<U256, NonceError> {
        let counter = self
            .account
            .sequence_number(req.sender)
            .await
            .map_err(|source| NonceError::Account {
                account: req.sender,
                source,
            })?;

        let sequence = counter
            .checked_add(req.increment)
            .ok_or(NonceError::Overflow {
                sequence: counter,
                increment: req.increment,
            })?;

        let nonce = self
            .entry_point
            .get_nonce(req.sender, sequence)
            .await
            .map_err(|source| NonceError::EntryPoint {
                sender: req.sender,
                sequence,
                source,
            })?;

        tracing::debug!(
            sender = ?req.sender,
            key = %req.key,
            counter = %counter,
            increment = %req.increment,
            nonce = %nonce,
            "resolved nonce"
        );
        Ok(nonce)
    }
}

/// `SimpleAccount.getNonce()` via a JSON-RPC provider.
#[derive(Debug)]
pub struct OnChainAccount<M> {
    client: Arc<M>,
}

impl<M> OnChainAccount<M> {
    pub fn new(client: Arc<M>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<M: Middleware + 'static> AccountNonceReader for OnChainAccount<M> {
    async fn sequence_number(&self, account: Address) -> Result<U256, ReadError> {
        let abi = AbiParser::default().parse(&["function getNonce() view returns (uint256)"])?;
        let account_c = Contract::new(account, abi, self.client.clone());
        let nonce: U256 = account_c.method("getNonce", ())?.call().await?;
        Ok(nonce)
    }
}

/// `EntryPoint.getNonce(sender, key)` via a JSON-RPC provider.
#[derive(Debug)]
pub struct OnChainEntryPoint<M> {
    client: Arc<M>,
    address: Address,
}

impl<M> OnChainEntryPoint<M> {
    pub fn new(client: Arc<M>, address: Address) -> Self {
        Self { client, address }
    }
}

#[async_trait]
impl<M: Middleware + 'static> EntryPointNonceReader for OnChainEntryPoint<M> {
    async fn get_nonce(&self, sender: Address, key: U256) -> Result<U256, ReadError> {
        let abi = AbiParser::default()
            .parse(&["function getNonce(address sender, uint192 key) view returns (uint256)"])?;
        let entrypoint_c = Contract::new(self.address, abi, self.client.clone());
        let nonce: U256 = entrypoint_c
            .method("getNonce", (sender, key))?
            .call()
            .await?;
        Ok(nonce)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        collections::HashMap,
        sync::atomic::{AtomicUsize, Ordering},
    };

    struct FixedCounter(U256);

    #[async_trait]
    impl AccountNonceReader for FixedCounter {
        async fn sequence_number(&self, _account: Address) -> Result<U256, ReadError> {
            Ok(self.0)
        }
    }

    struct FailingCounter;

    #[async_trait]
    impl AccountNonceReader for FailingCounter {
        async fn sequence_number(&self, _account: Address) -> Result<U256, ReadError> {
            Err("execution reverted".into())
        }
    }

    /// EntryPoint that encodes `(key << 64) | seq` like the real one, with a
    /// per-key sequence table.
    #[derive(Default)]
    struct FakeEntryPoint {
        seqs: HashMap<(Address, U256), u64>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EntryPointNonceReader for FakeEntryPoint {
        async fn get_nonce(&self, sender: Address, key: U256) -> Result<U256, ReadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let seq = self.seqs.get(&(sender, key)).copied().unwrap_or_default();
            Ok((key << 64) | U256::from(seq))
        }
    }

    fn sender() -> Address {
        Address::repeat_byte(0xaa)
    }

    #[tokio::test]
    async fn queries_entry_point_at_counter_plus_increment() {
        let mut ep = FakeEntryPoint::default();
        ep.seqs.insert((sender(), U256::from(5)), 3);
        let resolver = NonceResolver::new(FixedCounter(U256::from(5)), ep);

        let req = NonceRequest {
            sender: sender(),
            key: U256::from(1),
            increment: U256::zero(),
        };
        let nonce = resolver.resolve(&req).await.unwrap();

        let expected = resolver
            .entry_point
            .get_nonce(sender(), U256::from(5))
            .await
            .unwrap();
        assert_eq!(nonce, expected);
        assert_eq!(nonce, (U256::from(5) << 64) | U256::from(3));
    }

    #[tokio::test]
    async fn increment_moves_to_next_slot() {
        let resolver = NonceResolver::new(FixedCounter(U256::from(5)), FakeEntryPoint::default());
        let req = NonceRequest {
            sender: sender(),
            key: U256::from(1),
            increment: U256::from(1),
        };
        let nonce = resolver.resolve(&req).await.unwrap();
        assert_eq!(nonce, U256::from(6) << 64);
    }

    #[tokio::test]
    async fn resolution_is_deterministic() {
        let resolver = NonceResolver::new(FixedCounter(U256::from(9)), FakeEntryPoint::default());
        let req = NonceRequest {
            sender: sender(),
            key: U256::from(1),
            increment: U256::from(2),
        };
        let a = resolver.resolve(&req).await.unwrap();
        let b = resolver.resolve(&req).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(resolver.entry_point.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn account_read_failure_skips_entry_point() {
        let resolver = NonceResolver::new(FailingCounter, FakeEntryPoint::default());
        let req = NonceRequest {
            sender: sender(),
            key: U256::zero(),
            increment: U256::zero(),
        };
        let err = resolver.resolve(&req).await.unwrap_err();
        assert!(matches!(err, NonceError::Account { .. }));
        assert_eq!(resolver.entry_point.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn overflowing_increment_is_an_error() {
        let resolver = NonceResolver::new(FixedCounter(U256::MAX), FakeEntryPoint::default());
        let req = NonceRequest {
            sender: sender(),
            key: U256::zero(),
            increment: U256::one(),
        };
        assert!(matches!(
            resolver.resolve(&req).await,
            Err(NonceError::Overflow { .. })
        ));
    }
}
