//! Chain access
//!
//! Everything the watcher and processor need from a chain goes through the
//! [`ChainClient`] trait. Production uses [`evm::EvmChainClient`]; tests plug in
//! `testing::FakeChain`.

pub mod evm;

use alloy::primitives::{Address, B256, U256};
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::chains::ChainRegistry;
use crate::settlement::retry::{classify_error, classify_rpc_code, ErrorClass};
use crate::types::{BridgeTransaction, RawBridgeLog, TxId};

pub use evm::EvmChainClient;

/// Message recorded when a settlement transaction is mined but reverted
pub const FAILED_RECEIPT_MESSAGE: &str = "Transaction failed";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    /// Transport-level failure (connection refused, timeout, HTTP status)
    #[error("transport error: {0}")]
    Transport(String),
    /// JSON-RPC error response
    #[error("rpc error{}: {message}", code.map(|c| format!(" {}", c)).unwrap_or_default())]
    Rpc { code: Option<i64>, message: String },
    /// Contract call could not be built or decoded
    #[error("contract error: {0}")]
    Contract(String),
    /// Transaction was sent but its receipt could not be obtained
    #[error("receipt error: {0}")]
    Receipt(String),
    /// Settlement transaction mined with a failed status
    #[error("{}", FAILED_RECEIPT_MESSAGE)]
    Reverted { tx_hash: B256 },
    #[error("no signing key configured for this chain")]
    ReadOnly,
    #[error("failed to decode log: {0}")]
    Decode(String),
}

impl ChainError {
    /// Retry classification: structured RPC code first, then provider message.
    pub fn class(&self) -> ErrorClass {
        match self {
            ChainError::Transport(_) | ChainError::Receipt(_) => ErrorClass::Transient,
            ChainError::Rpc { code, message } => code
                .and_then(classify_rpc_code)
                .unwrap_or_else(|| classify_error(message)),
            ChainError::Contract(message) => classify_error(message),
            ChainError::Reverted { .. } | ChainError::ReadOnly | ChainError::Decode(_) => {
                ErrorClass::Permanent
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class().is_retryable()
    }

    /// Message suitable for persisting and showing to API consumers
    pub fn public_message(&self) -> String {
        match self {
            ChainError::Reverted { .. } => FAILED_RECEIPT_MESSAGE.to_string(),
            ChainError::Rpc { message, .. } => message.clone(),
            ChainError::Contract(message) => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Outcome of a mined settlement transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlementReceipt {
    pub tx_hash: B256,
}

/// Read and write access to one chain's bridge contract
#[async_trait]
pub trait ChainClient: Send + Sync {
    fn chain_id(&self) -> u64;

    /// Current head block number
    async fn block_number(&self) -> Result<u64, ChainError>;

    /// Decoded `TokenLocked` / `TokenBurned` logs in `[from, to]`, in chain order
    async fn bridge_logs(&self, from: u64, to: u64) -> Result<Vec<RawBridgeLog>, ChainError>;

    async fn get_transaction(&self, tx_id: TxId) -> Result<BridgeTransaction, ChainError>;

    async fn is_relayer_authorized(&self, relayer: Address) -> Result<bool, ChainError>;

    /// Current gas price in wei
    async fn gas_price(&self) -> Result<u128, ChainError>;

    async fn balance(&self, address: Address) -> Result<U256, ChainError>;

    /// Submit `releaseTokens(txId)` and wait for the receipt.
    /// A mined-but-failed receipt is `ChainError::Reverted`.
    async fn release_tokens(
        &self,
        tx_id: TxId,
        gas_limit: u64,
        gas_price: u128,
    ) -> Result<SettlementReceipt, ChainError>;
}

/// Chain id → client map, built once at initialization and injected
#[derive(Clone, Default)]
pub struct ChainConnections {
    clients: BTreeMap<u64, Arc<dyn ChainClient>>,
}

impl ChainConnections {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect_read_only(registry: &ChainRegistry) -> Self {
        Self::connect_with(registry, |descriptor| EvmChainClient::read_only(descriptor))
    }

    pub fn connect_signing(registry: &ChainRegistry, signer: &PrivateKeySigner) -> Self {
        Self::connect_with(registry, |descriptor| {
            EvmChainClient::with_signer(descriptor, signer.clone())
        })
    }

    fn connect_with<F>(registry: &ChainRegistry, connect: F) -> Self
    where
        F: Fn(&crate::chains::ChainDescriptor) -> eyre::Result<EvmChainClient>,
    {
        let mut connections = Self::new();
        for descriptor in registry.descriptors() {
            match connect(descriptor) {
                Ok(client) => {
                    info!(chain_id = descriptor.chain_id, name = %descriptor.name, "Connected to chain");
                    connections.insert(Arc::new(client));
                }
                Err(e) => {
                    warn!(
                        chain_id = descriptor.chain_id,
                        error = %e,
                        "Failed to connect to chain, excluding it"
                    );
                }
            }
        }
        connections
    }

    pub fn insert(&mut self, client: Arc<dyn ChainClient>) {
        self.clients.insert(client.chain_id(), client);
    }

    pub fn get(&self, chain_id: u64) -> Option<&Arc<dyn ChainClient>> {
        self.clients.get(&chain_id)
    }

    pub fn chain_ids(&self) -> Vec<u64> {
        self.clients.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &Arc<dyn ChainClient>)> {
        self.clients.iter().map(|(id, client)| (*id, client))
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl std::fmt::Debug for ChainConnections {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainConnections")
            .field("chains", &self.chain_ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structured_code_wins_over_message() {
        let err = ChainError::Rpc {
            code: Some(-32005),
            message: "execution reverted".to_string(),
        };
        assert!(err.is_retryable());

        let err = ChainError::Rpc {
            code: Some(-32000),
            message: "nonce too low".to_string(),
        };
        assert!(err.is_retryable());

        let err = ChainError::Rpc {
            code: Some(3),
            message: "execution reverted: already released".to_string(),
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_reverted_receipt_is_final() {
        let err = ChainError::Reverted {
            tx_hash: B256::ZERO,
        };
        assert!(!err.is_retryable());
        assert_eq!(err.public_message(), "Transaction failed");
        assert_eq!(err.to_string(), "Transaction failed");
    }

    #[test]
    fn test_transport_is_retryable() {
        assert!(ChainError::Transport("connection refused".into()).is_retryable());
        assert!(ChainError::Receipt("watcher dropped".into()).is_retryable());
        assert!(!ChainError::ReadOnly.is_retryable());
    }

    #[test]
    fn test_unclassified_contract_error_is_final() {
        assert!(!ChainError::Contract("caller is not a relayer".into()).is_retryable());
    }
}
