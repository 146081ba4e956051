//! Canonical bridge types shared by the watcher, processor and store.
//!
//! Raw contract logs are normalized into [`NewBridgeEvent`] by the watcher;
//! the store hands back [`BridgeEvent`] rows with lifecycle state attached.

use alloy::primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Bridge transaction id assigned by the source contract (bytes32).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxId(pub B256);

impl TxId {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(B256::from(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0 .0
    }

    /// Lowercase `0x`-prefixed hex, the persisted form.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.as_bytes()))
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for TxId {
    type Err = ParseTxIdError;

    /// Accepts `0x`-prefixed or bare hex. Short values are left-padded
    /// with zeros so `0xabc` is a valid id.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        if digits.is_empty() || digits.len() > 64 {
            return Err(ParseTxIdError(s.to_string()));
        }
        let padded = format!("{:0>64}", digits.to_lowercase());
        let raw = hex::decode(&padded).map_err(|_| ParseTxIdError(s.to_string()))?;
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&raw);
        Ok(Self::new(bytes))
    }
}

impl From<B256> for TxId {
    fn from(value: B256) -> Self {
        Self(value)
    }
}

impl Serialize for TxId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for TxId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transaction id: {0}")]
pub struct ParseTxIdError(pub String);

/// Which source-contract event produced a bridge event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Locked,
    Burned,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Locked => "locked",
            EventKind::Burned => "burned",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle status of a bridge event
///
/// ```text
/// pending → confirmed → completed
///    ↓           ↓
///  failed ←──────┘
/// ```
///
/// `failed → confirmed` is only reachable through the administrative reset,
/// never through [`EventStatus::can_transition_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Pending,
    Confirmed,
    Completed,
    Failed,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Pending => "pending",
            EventStatus::Confirmed => "confirmed",
            EventStatus::Completed => "completed",
            EventStatus::Failed => "failed",
        }
    }

    /// Statuses the settlement processor still has work for
    pub fn awaiting_settlement(&self) -> bool {
        matches!(self, EventStatus::Pending | EventStatus::Confirmed)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EventStatus::Completed | EventStatus::Failed)
    }

    /// Pipeline transitions. Self-transitions are not transitions.
    pub fn can_transition_to(&self, next: EventStatus) -> bool {
        use EventStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed) | (Confirmed, Completed) | (Pending, Failed) | (Confirmed, Failed)
        )
    }

    pub fn transition(self, next: EventStatus) -> Result<EventStatus, TransitionError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TransitionError {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EventStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(EventStatus::Pending),
            "confirmed" => Ok(EventStatus::Confirmed),
            "completed" => Ok(EventStatus::Completed),
            "failed" => Ok(EventStatus::Failed),
            other => Err(format!("unknown status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal status transition {from} -> {to}")]
pub struct TransitionError {
    pub from: EventStatus,
    pub to: EventStatus,
}

/// A decoded bridge contract log, before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawBridgeLog {
    Locked {
        tx_id: TxId,
        user: Address,
        token: Address,
        amount: U256,
        target_chain: u64,
        target_address: Address,
        block_number: u64,
        transaction_hash: B256,
    },
    Burned {
        tx_id: TxId,
        user: Address,
        token: Address,
        amount: U256,
        block_number: u64,
        transaction_hash: B256,
    },
}

impl RawBridgeLog {
    pub fn tx_id(&self) -> TxId {
        match self {
            RawBridgeLog::Locked { tx_id, .. } | RawBridgeLog::Burned { tx_id, .. } => *tx_id,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            RawBridgeLog::Locked { .. } => EventKind::Locked,
            RawBridgeLog::Burned { .. } => EventKind::Burned,
        }
    }

    pub fn block_number(&self) -> u64 {
        match self {
            RawBridgeLog::Locked { block_number, .. }
            | RawBridgeLog::Burned { block_number, .. } => *block_number,
        }
    }
}

/// Transaction record returned by the contract's `getTransaction(txId)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeTransaction {
    pub tx_id: TxId,
    pub user: Address,
    pub token: Address,
    pub amount: U256,
    pub fee: U256,
    pub source_chain: u64,
    pub target_chain: u64,
    pub target_address: Address,
    pub timestamp: u64,
    pub status: u8,
}

/// A canonical event ready to be upserted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBridgeEvent {
    pub tx_id: TxId,
    pub kind: EventKind,
    pub source_chain: u64,
    pub target_chain: u64,
    pub user_address: Address,
    pub token_address: Address,
    pub amount: U256,
    pub target_address: Address,
    pub block_number: u64,
    pub transaction_hash: B256,
    pub confirmations: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidEvent {
    #[error("source and target chain are both {0}")]
    SameChain(u64),
    #[error("target chain id 0 is not a chain")]
    ZeroTargetChain,
}

impl NewBridgeEvent {
    pub fn validate(&self) -> Result<(), InvalidEvent> {
        if self.target_chain == 0 {
            return Err(InvalidEvent::ZeroTargetChain);
        }
        if self.source_chain == self.target_chain {
            return Err(InvalidEvent::SameChain(self.source_chain));
        }
        Ok(())
    }
}

/// A persisted bridge event with its lifecycle state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeEvent {
    pub tx_id: TxId,
    pub kind: EventKind,
    pub source_chain: u64,
    pub target_chain: u64,
    pub user_address: String,
    pub token_address: String,
    /// Exact decimal representation of the token amount
    pub amount: String,
    pub target_address: String,
    pub block_number: u64,
    pub transaction_hash: String,
    pub status: EventStatus,
    pub confirmations: u64,
    pub settlement_tx_hash: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BridgeEvent {
    /// Build the stored form of a freshly observed event
    pub fn from_new(event: &NewBridgeEvent, now: DateTime<Utc>) -> Self {
        Self {
            tx_id: event.tx_id,
            kind: event.kind,
            source_chain: event.source_chain,
            target_chain: event.target_chain,
            user_address: format_address(&event.user_address),
            token_address: format_address(&event.token_address),
            amount: event.amount.to_string(),
            target_address: format_address(&event.target_address),
            block_number: event.block_number,
            transaction_hash: format!("{:?}", event.transaction_hash),
            status: EventStatus::Pending,
            confirmations: event.confirmations,
            settlement_tx_hash: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Addresses are persisted as checksummed hex
pub fn format_address(address: &Address) -> String {
    address.to_checksum(None)
}
