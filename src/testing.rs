//! In-process fakes for exercising the pipeline without a chain
//!
//! [`FakeChain`] is a scriptable [`ChainClient`]; [`RecordingNotifier`]
//! captures notifications. Compiled for unit tests and, through the
//! `testing` feature, for the integration tests.

use alloy::primitives::{keccak256, Address, B256, U256};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::chains::ChainDescriptor;
use crate::client::{ChainClient, ChainError, SettlementReceipt};
use crate::notify::{Notification, NotificationKind, Notifier};
use crate::types::{BridgeTransaction, RawBridgeLog, TxId};

/// A release submission seen by a [`FakeChain`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReleaseCall {
    pub tx_id: TxId,
    pub gas_limit: u64,
    pub gas_price: u128,
}

#[derive(Default)]
struct FakeState {
    head: u64,
    logs: Vec<RawBridgeLog>,
    transactions: HashMap<TxId, BridgeTransaction>,
    gas_price: u128,
    balances: HashMap<Address, U256>,
    relayers: Vec<Address>,
    release_results: VecDeque<Result<(), ChainError>>,
    head_failures: VecDeque<ChainError>,
    log_failures: VecDeque<ChainError>,
    gas_price_failures: VecDeque<ChainError>,
    authorization_failures: VecDeque<ChainError>,
    releases: Vec<ReleaseCall>,
    log_requests: Vec<(u64, u64)>,
}

pub struct FakeChain {
    chain_id: u64,
    state: Mutex<FakeState>,
}

impl FakeChain {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            state: Mutex::new(FakeState {
                gas_price: 1_000_000_000,
                ..FakeState::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn set_head(&self, head: u64) {
        self.state().head = head;
    }

    pub fn head(&self) -> u64 {
        self.state().head
    }

    pub fn push_log(&self, log: RawBridgeLog) {
        self.state().logs.push(log);
    }

    pub fn add_transaction(&self, tx: BridgeTransaction) {
        self.state().transactions.insert(tx.tx_id, tx);
    }

    pub fn set_gas_price(&self, wei: u128) {
        self.state().gas_price = wei;
    }

    pub fn set_balance(&self, address: Address, wei: U256) {
        self.state().balances.insert(address, wei);
    }

    pub fn authorize(&self, relayer: Address) {
        self.state().relayers.push(relayer);
    }

    /// Script the next `release_tokens` call. `Ok(())` mines successfully;
    /// unscripted calls succeed.
    pub fn push_release_result(&self, result: Result<(), ChainError>) {
        self.state().release_results.push_back(result);
    }

    pub fn fail_next_block_number(&self, error: ChainError) {
        self.state().head_failures.push_back(error);
    }

    pub fn fail_next_logs(&self, error: ChainError) {
        self.state().log_failures.push_back(error);
    }

    pub fn fail_next_authorization(&self, error: ChainError) {
        self.state().authorization_failures.push_back(error);
    }

    pub fn fail_next_gas_price(&self, error: ChainError) {
        self.state().gas_price_failures.push_back(error);
    }

    pub fn releases(&self) -> Vec<ReleaseCall> {
        self.state().releases.clone()
    }

    pub fn log_requests(&self) -> Vec<(u64, u64)> {
        self.state().log_requests.clone()
    }

    /// Settlement hash the fake reports for `tx_id`
    pub fn settlement_hash(tx_id: TxId) -> B256 {
        keccak256(tx_id.as_bytes())
    }

    pub fn locked(tx_id: TxId, target_chain: u64, block_number: u64) -> RawBridgeLog {
        RawBridgeLog::Locked {
            tx_id,
            user: Address::repeat_byte(0xaa),
            token: Address::repeat_byte(0xbb),
            amount: U256::from(1_000_000u64),
            target_chain,
            target_address: Address::repeat_byte(0xcc),
            block_number,
            transaction_hash: keccak256([tx_id.as_bytes().as_slice(), b"source".as_slice()].concat()),
        }
    }

    /// Contract record for a burn, as `getTransaction` returns it
    pub fn transaction(tx_id: TxId, source_chain: u64, target_chain: u64) -> BridgeTransaction {
        BridgeTransaction {
            tx_id,
            user: Address::repeat_byte(0xaa),
            token: Address::repeat_byte(0xbb),
            amount: U256::from(1_000_000u64),
            fee: U256::ZERO,
            source_chain,
            target_chain,
            target_address: Address::repeat_byte(0xdd),
            timestamp: 0,
            status: 0,
        }
    }

    pub fn burned(tx_id: TxId, block_number: u64) -> RawBridgeLog {
        RawBridgeLog::Burned {
            tx_id,
            user: Address::repeat_byte(0xaa),
            token: Address::repeat_byte(0xbb),
            amount: U256::from(1_000_000u64),
            block_number,
            transaction_hash: keccak256([tx_id.as_bytes().as_slice(), b"source".as_slice()].concat()),
        }
    }
}

#[async_trait]
impl ChainClient for FakeChain {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn block_number(&self) -> Result<u64, ChainError> {
        let mut state = self.state();
        match state.head_failures.pop_front() {
            Some(e) => Err(e),
            None => Ok(state.head),
        }
    }

    async fn bridge_logs(&self, from: u64, to: u64) -> Result<Vec<RawBridgeLog>, ChainError> {
        let mut state = self.state();
        state.log_requests.push((from, to));
        if let Some(e) = state.log_failures.pop_front() {
            return Err(e);
        }
        let mut logs: Vec<_> = state
            .logs
            .iter()
            .filter(|l| (from..=to).contains(&l.block_number()))
            .cloned()
            .collect();
        logs.sort_by_key(|l| l.block_number());
        Ok(logs)
    }

    async fn get_transaction(&self, tx_id: TxId) -> Result<BridgeTransaction, ChainError> {
        self.state()
            .transactions
            .get(&tx_id)
            .cloned()
            .ok_or_else(|| ChainError::Contract("execution reverted: unknown transaction".into()))
    }

    async fn is_relayer_authorized(&self, relayer: Address) -> Result<bool, ChainError> {
        let mut state = self.state();
        match state.authorization_failures.pop_front() {
            Some(e) => Err(e),
            None => Ok(state.relayers.contains(&relayer)),
        }
    }

    async fn gas_price(&self) -> Result<u128, ChainError> {
        let mut state = self.state();
        match state.gas_price_failures.pop_front() {
            Some(e) => Err(e),
            None => Ok(state.gas_price),
        }
    }

    async fn balance(&self, address: Address) -> Result<U256, ChainError> {
        Ok(self
            .state()
            .balances
            .get(&address)
            .copied()
            .unwrap_or(U256::ZERO))
    }

    async fn release_tokens(
        &self,
        tx_id: TxId,
        gas_limit: u64,
        gas_price: u128,
    ) -> Result<SettlementReceipt, ChainError> {
        let mut state = self.state();
        state.releases.push(ReleaseCall {
            tx_id,
            gas_limit,
            gas_price,
        });
        let tx_hash = Self::settlement_hash(tx_id);
        match state.release_results.pop_front() {
            Some(Err(e)) => Err(e),
            Some(Ok(())) | None => Ok(SettlementReceipt { tx_hash }),
        }
    }
}

/// Captures every notification in order
#[derive(Default)]
pub struct RecordingNotifier {
    notifications: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn count(&self, kind: NotificationKind) -> usize {
        self.notifications().iter().filter(|n| n.kind == kind).count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.notifications
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(notification);
    }
}

/// A descriptor for an in-process chain
pub fn descriptor(chain_id: u64, min_confirmations: u64) -> ChainDescriptor {
    ChainDescriptor {
        chain_id,
        name: format!("chain-{}", chain_id),
        rpc_url: format!("http://127.0.0.1:0/{}", chain_id),
        bridge_address: Address::repeat_byte(0x0b),
        min_confirmations,
        max_gas_price_wei: 20_000_000_000,
        gas_limit: 300_000,
        block_time: Duration::from_secs(1),
    }
}

/// Deterministic tx id from a short hex string such as "0xabc"
pub fn tx_id(hex: &str) -> TxId {
    hex.parse().unwrap_or_else(|_| TxId::new([0u8; 32]))
}
