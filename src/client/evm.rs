//! alloy-backed [`ChainClient`] for EVM chains

use alloy::network::EthereumWallet;
use alloy::primitives::{Address, U256};
use alloy::providers::{PendingTransactionError, Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::{Filter, Log};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol_types::SolEvent;
use alloy::transports::http::reqwest::Url;
use alloy::transports::http::{Client, Http};
use alloy::transports::{RpcError, TransportError};
use async_trait::async_trait;
use eyre::{Result, WrapErr};
use tracing::{debug, error, info};

use super::{ChainClient, ChainError, SettlementReceipt};
use crate::chains::ChainDescriptor;
use crate::contracts::DexBridge;
use crate::types::{BridgeTransaction, RawBridgeLog, TxId};

/// Bridge contract client for one EVM chain
pub struct EvmChainClient {
    chain_id: u64,
    rpc_url: Url,
    bridge_address: Address,
    provider: RootProvider<Http<Client>>,
    signer: Option<PrivateKeySigner>,
}

impl EvmChainClient {
    pub fn read_only(descriptor: &ChainDescriptor) -> Result<Self> {
        let rpc_url: Url = descriptor
            .rpc_url
            .parse()
            .wrap_err("Failed to parse RPC URL")?;
        let provider = ProviderBuilder::new().on_http(rpc_url.clone());

        Ok(Self {
            chain_id: descriptor.chain_id,
            rpc_url,
            bridge_address: descriptor.bridge_address,
            provider,
            signer: None,
        })
    }

    pub fn with_signer(descriptor: &ChainDescriptor, signer: PrivateKeySigner) -> Result<Self> {
        let mut client = Self::read_only(descriptor)?;
        client.signer = Some(signer);
        Ok(client)
    }

    fn decode_log(&self, log: &Log) -> Result<Option<RawBridgeLog>, ChainError> {
        let block_number = log
            .block_number
            .ok_or_else(|| ChainError::Decode("missing block number".into()))?;
        let transaction_hash = log
            .transaction_hash
            .ok_or_else(|| ChainError::Decode("missing transaction hash".into()))?;

        match log.topic0() {
            Some(sig) if *sig == DexBridge::TokenLocked::SIGNATURE_HASH => {
                let decoded = log
                    .log_decode::<DexBridge::TokenLocked>()
                    .map_err(|e| ChainError::Decode(e.to_string()))?;
                let event = decoded.inner.data;
                Ok(Some(RawBridgeLog::Locked {
                    tx_id: TxId::from(event.txId),
                    user: event.user,
                    token: event.token,
                    amount: event.amount,
                    target_chain: u256_to_u64(event.targetChain, "targetChain")?,
                    target_address: event.targetAddress,
                    block_number,
                    transaction_hash,
                }))
            }
            Some(sig) if *sig == DexBridge::TokenBurned::SIGNATURE_HASH => {
                let decoded = log
                    .log_decode::<DexBridge::TokenBurned>()
                    .map_err(|e| ChainError::Decode(e.to_string()))?;
                let event = decoded.inner.data;
                Ok(Some(RawBridgeLog::Burned {
                    tx_id: TxId::from(event.txId),
                    user: event.user,
                    token: event.token,
                    amount: event.amount,
                    block_number,
                    transaction_hash,
                }))
            }
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl ChainClient for EvmChainClient {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn block_number(&self) -> Result<u64, ChainError> {
        self.provider
            .get_block_number()
            .await
            .map_err(from_transport)
    }

    async fn bridge_logs(&self, from: u64, to: u64) -> Result<Vec<RawBridgeLog>, ChainError> {
        let filter = Filter::new()
            .address(self.bridge_address)
            .event_signature(vec![
                DexBridge::TokenLocked::SIGNATURE_HASH,
                DexBridge::TokenBurned::SIGNATURE_HASH,
            ])
            .from_block(from)
            .to_block(to);

        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .map_err(from_transport)?;

        let mut decoded = Vec::with_capacity(logs.len());
        for log in &logs {
            match self.decode_log(log) {
                Ok(Some(raw)) => decoded.push(raw),
                Ok(None) => {}
                Err(e) => {
                    error!(
                        chain_id = self.chain_id,
                        tx_hash = ?log.transaction_hash,
                        log_index = ?log.log_index,
                        error = %e,
                        "Failed to parse bridge log"
                    );
                }
            }
        }

        debug!(
            chain_id = self.chain_id,
            from_block = from,
            to_block = to,
            count = decoded.len(),
            "Fetched bridge logs"
        );
        Ok(decoded)
    }

    async fn get_transaction(&self, tx_id: TxId) -> Result<BridgeTransaction, ChainError> {
        let contract = DexBridge::new(self.bridge_address, &self.provider);
        let tx = contract
            .getTransaction(tx_id.0)
            .call()
            .await
            .map_err(from_contract)?;

        Ok(BridgeTransaction {
            tx_id: TxId::from(tx.id),
            user: tx.user,
            token: tx.token,
            amount: tx.amount,
            fee: tx.fee,
            source_chain: u256_to_u64(tx.sourceChain, "sourceChain")?,
            target_chain: u256_to_u64(tx.targetChain, "targetChain")?,
            target_address: tx.targetAddress,
            timestamp: u256_to_u64(tx.timestamp, "timestamp")?,
            status: tx.status,
        })
    }

    async fn is_relayer_authorized(&self, relayer: Address) -> Result<bool, ChainError> {
        let contract = DexBridge::new(self.bridge_address, &self.provider);
        let authorized = contract
            .relayers(relayer)
            .call()
            .await
            .map_err(from_contract)?;
        Ok(authorized._0)
    }

    async fn gas_price(&self) -> Result<u128, ChainError> {
        self.provider.get_gas_price().await.map_err(from_transport)
    }

    async fn balance(&self, address: Address) -> Result<U256, ChainError> {
        self.provider
            .get_balance(address)
            .await
            .map_err(from_transport)
    }

    async fn release_tokens(
        &self,
        tx_id: TxId,
        gas_limit: u64,
        gas_price: u128,
    ) -> Result<SettlementReceipt, ChainError> {
        let signer = self.signer.as_ref().ok_or(ChainError::ReadOnly)?;

        let wallet = EthereumWallet::from(signer.clone());
        let provider = ProviderBuilder::new()
            .with_recommended_fillers()
            .wallet(wallet)
            .on_http(self.rpc_url.clone());

        let contract = DexBridge::new(self.bridge_address, &provider);

        debug!(
            chain_id = self.chain_id,
            tx_id = %tx_id,
            gas_limit,
            gas_price,
            "Submitting releaseTokens"
        );

        let pending_tx = contract
            .releaseTokens(tx_id.0)
            .gas(gas_limit)
            .gas_price(gas_price)
            .send()
            .await
            .map_err(from_contract)?;

        let tx_hash = *pending_tx.tx_hash();
        info!(chain_id = self.chain_id, tx_hash = %tx_hash, "Release sent, waiting for receipt");

        let receipt = pending_tx.get_receipt().await.map_err(from_pending)?;

        if !receipt.status() {
            return Err(ChainError::Reverted { tx_hash });
        }

        Ok(SettlementReceipt { tx_hash })
    }
}

fn u256_to_u64(value: U256, field: &str) -> Result<u64, ChainError> {
    u64::try_from(value).map_err(|_| ChainError::Decode(format!("{} out of range: {}", field, value)))
}

fn from_transport(err: TransportError) -> ChainError {
    match err {
        RpcError::ErrorResp(payload) => ChainError::Rpc {
            code: Some(payload.code),
            message: payload.message.to_string(),
        },
        other => ChainError::Transport(other.to_string()),
    }
}

fn from_contract(err: alloy::contract::Error) -> ChainError {
    match err {
        alloy::contract::Error::TransportError(e) => from_transport(e),
        other => ChainError::Contract(other.to_string()),
    }
}

fn from_pending(err: PendingTransactionError) -> ChainError {
    match err {
        PendingTransactionError::TransportError(e) => from_transport(e),
        other => ChainError::Receipt(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn descriptor(rpc_url: &str) -> ChainDescriptor {
        ChainDescriptor {
            chain_id: 56,
            name: "BSC".to_string(),
            rpc_url: rpc_url.to_string(),
            bridge_address: Address::repeat_byte(0x11),
            min_confirmations: 15,
            max_gas_price_wei: 20_000_000_000,
            gas_limit: 300_000,
            block_time: Duration::from_secs(3),
        }
    }

    #[test]
    fn test_invalid_rpc_url_rejected() {
        assert!(EvmChainClient::read_only(&descriptor("not a url")).is_err());
    }

    #[tokio::test]
    async fn test_release_without_signer_is_read_only() {
        let client = EvmChainClient::read_only(&descriptor("http://127.0.0.1:1")).unwrap();
        let result = client
            .release_tokens(TxId::new([1u8; 32]), 300_000, 1)
            .await;
        assert_eq!(result, Err(ChainError::ReadOnly));
    }

    #[test]
    fn test_u256_range() {
        assert_eq!(u256_to_u64(U256::from(56u64), "chain").unwrap(), 56);
        assert!(u256_to_u64(U256::MAX, "chain").is_err());
    }
}
