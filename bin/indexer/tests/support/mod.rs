//! Shared fixtures for the integration tests: an in-memory chain and log
//! builders for the group contracts.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use alloy_primitives::{Address, B256, U256};
use alloy_sol_types::SolEvent;
use async_trait::async_trait;
use chain_reader::{ChainError, ChainReader};
use common::amount::Amount;
use common::events::RawLog;
use common::interfaces::community_token::ICommunityToken::{TokensPurchased, TokensSold};
use common::interfaces::group_factory::IGroupFactory::GroupCreated;
use indexer::reconciler::{Reconciler, ReconcilerSettings};
use indexer::retry::RetryPolicy;
use indexer::store::{Group, JsonStore, Store};
use uuid::Uuid;
use parking_lot::Mutex;

pub const CHAIN_ID: u64 = 80002;

pub fn amount(s: &str) -> Amount {
    s.parse().unwrap()
}

pub fn wei(s: &str) -> U256 {
    amount(s).to_wei()
}

pub fn addr(byte: u8) -> Address {
    Address::repeat_byte(byte)
}

pub fn tx(n: u64) -> B256 {
    B256::from(U256::from(n))
}

/// Treasury paired with a token in fixtures
pub fn treasury_of(token: Address) -> Address {
    let mut bytes = token.0 .0;
    bytes[0] ^= 0xff;
    Address::from(bytes)
}

#[derive(Default)]
struct MockState {
    head: u64,
    logs: Vec<RawLog>,
    supply: HashMap<Address, Amount>,
    reserve: HashMap<Address, Amount>,
    price: HashMap<Address, Amount>,
    charter: HashMap<Address, String>,
    token_balances: HashMap<(Address, Address), Amount>,
    eth_balances: HashMap<Address, Amount>,
    failing_contracts: HashSet<Address>,
    log_requests: Vec<(Address, u64, u64)>,
    checkpoint_watch: Option<(Arc<dyn Store>, Uuid)>,
    checkpoints_seen: Vec<u64>,
    state_read_blocks: Vec<Option<u64>>,
}

/// Chain whose state and logs are set by the test
pub struct MockChainReader {
    chain_id: u64,
    state: Mutex<MockState>,
}

impl MockChainReader {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            state: Mutex::new(MockState::default()),
        }
    }

    pub fn set_head(&self, head: u64) {
        self.state.lock().head = head;
    }

    pub fn set_token_state(&self, token: Address, supply: Amount, reserve: Amount) {
        let mut state = self.state.lock();
        state.supply.insert(token, supply);
        state.reserve.insert(token, reserve);
    }

    pub fn set_price(&self, token: Address, price: Amount) {
        self.state.lock().price.insert(token, price);
    }

    pub fn set_charter(&self, token: Address, cid: &str) {
        self.state.lock().charter.insert(token, cid.to_string());
    }

    pub fn set_token_balance(&self, token: Address, account: Address, balance: Amount) {
        self.state.lock().token_balances.insert((token, account), balance);
    }

    pub fn set_eth_balance(&self, account: Address, balance: Amount) {
        self.state.lock().eth_balances.insert(account, balance);
    }

    pub fn push_log(&self, log: RawLog) {
        self.state.lock().logs.push(log);
    }

    /// `get_logs` for this contract fails with a retryable RPC error
    pub fn fail_logs_for(&self, contract: Address) {
        self.state.lock().failing_contracts.insert(contract);
    }

    pub fn log_requests(&self) -> Vec<(Address, u64, u64)> {
        self.state.lock().log_requests.clone()
    }

    /// Record the group's stored checkpoint at every `get_logs` call
    pub fn watch_checkpoint(&self, store: Arc<dyn Store>, group_id: Uuid) {
        self.state.lock().checkpoint_watch = Some((store, group_id));
    }

    pub fn checkpoints_seen(&self) -> Vec<u64> {
        self.state.lock().checkpoints_seen.clone()
    }

    /// Block argument of every supply/reserve/balance read, in call order
    pub fn state_read_blocks(&self) -> Vec<Option<u64>> {
        self.state.lock().state_read_blocks.clone()
    }
}

#[async_trait]
impl ChainReader for MockChainReader {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn block_number(&self) -> Result<u64, ChainError> {
        Ok(self.state.lock().head)
    }

    async fn get_logs(
        &self,
        contract: Address,
        signatures: &[B256],
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawLog>, ChainError> {
        let watch = self.state.lock().checkpoint_watch.clone();
        if let Some((store, group_id)) = watch {
            if let Ok(Some(group)) = store.get_group(group_id).await {
                self.state.lock().checkpoints_seen.push(group.last_indexed_block);
            }
        }

        let mut state = self.state.lock();
        state.log_requests.push((contract, from_block, to_block));
        if state.failing_contracts.contains(&contract) {
            return Err(ChainError::RpcError(format!("eth_getLogs failed for {}", contract)));
        }
        // Deliver newest first so callers must sort
        let mut logs: Vec<RawLog> = state
            .logs
            .iter()
            .filter(|log| log.address == contract)
            .filter(|log| log.block_number >= from_block && log.block_number <= to_block)
            .filter(|log| log.topics.first().is_some_and(|t| signatures.contains(t)))
            .cloned()
            .collect();
        logs.reverse();
        Ok(logs)
    }

    async fn total_supply(&self, token: Address, block: Option<u64>) -> Result<Amount, ChainError> {
        let mut state = self.state.lock();
        state.state_read_blocks.push(block);
        Ok(state.supply.get(&token).copied().unwrap_or(Amount::ZERO))
    }

    async fn reserve_balance(&self, token: Address, block: Option<u64>) -> Result<Amount, ChainError> {
        let mut state = self.state.lock();
        state.state_read_blocks.push(block);
        Ok(state.reserve.get(&token).copied().unwrap_or(Amount::ZERO))
    }

    async fn balance_of(&self, token: Address, account: Address, block: Option<u64>) -> Result<Amount, ChainError> {
        let mut state = self.state.lock();
        state.state_read_blocks.push(block);
        Ok(state.token_balances.get(&(token, account)).copied().unwrap_or(Amount::ZERO))
    }

    async fn current_price(&self, token: Address) -> Result<Amount, ChainError> {
        self.state
            .lock()
            .price
            .get(&token)
            .copied()
            .ok_or(ChainError::ContractCallFailed {
                call: "currentPrice",
                reason: "execution reverted".to_string(),
            })
    }

    async fn charter_cid(&self, token: Address) -> Result<String, ChainError> {
        Ok(self.state.lock().charter.get(&token).cloned().unwrap_or_default())
    }

    async fn eth_balance(&self, account: Address, block: Option<u64>) -> Result<Amount, ChainError> {
        let mut state = self.state.lock();
        state.state_read_blocks.push(block);
        Ok(state.eth_balances.get(&account).copied().unwrap_or(Amount::ZERO))
    }
}

pub fn raw_log<E: SolEvent>(event: &E, address: Address, block_number: u64, tx_hash: B256, log_index: u64) -> RawLog {
    let data = event.encode_log_data();
    RawLog {
        address,
        topics: data.topics().to_vec(),
        data: data.data.clone(),
        block_number,
        tx_hash,
        log_index,
    }
}

pub fn group_created_log(factory: Address, token: Address, treasury: Address, creator: Address, block: u64) -> RawLog {
    let event = GroupCreated {
        tokenAddress: token,
        treasuryAddress: treasury,
        creator,
        name: "Garden Club".to_string(),
        symbol: "GRDN".to_string(),
        charterCid: "bafybeigdyrzt5sfp7udm7hu76uh7y26nf3efuylqabf3oclgtqy55fbzdi".to_string(),
        isPublic: true,
    };
    // Distinct per token so groups created in one block do not share a key
    let mut hash = [0xffu8; 32];
    hash[..20].copy_from_slice(token.as_slice());
    hash[24..].copy_from_slice(&block.to_be_bytes());
    raw_log(&event, factory, block, B256::from(hash), 0)
}

pub struct Trade {
    pub block: u64,
    pub log_index: u64,
    pub tx_hash: B256,
}

impl Trade {
    pub fn at(block: u64, log_index: u64) -> Self {
        Self {
            block,
            log_index,
            tx_hash: tx(block * 1000 + log_index),
        }
    }
}

pub fn purchase_log(token: Address, buyer: Address, eth_in: &str, tokens_out: &str, new_price: &str, at: Trade) -> RawLog {
    let event = TokensPurchased {
        buyer,
        ethIn: wei(eth_in),
        tokensOut: wei(tokens_out),
        newPrice: wei(new_price),
    };
    raw_log(&event, token, at.block, at.tx_hash, at.log_index)
}

pub fn sale_log(token: Address, seller: Address, tokens_in: &str, eth_out: &str, new_price: &str, at: Trade) -> RawLog {
    let event = TokensSold {
        seller,
        tokensIn: wei(tokens_in),
        ethOut: wei(eth_out),
        newPrice: wei(new_price),
    };
    raw_log(&event, token, at.block, at.tx_hash, at.log_index)
}

pub fn test_settings() -> ReconcilerSettings {
    ReconcilerSettings {
        retry: RetryPolicy::immediate(2),
        ..ReconcilerSettings::default()
    }
}

pub struct Harness {
    pub chain: Arc<MockChainReader>,
    pub store: Arc<JsonStore>,
    pub reconciler: Arc<Reconciler>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(test_settings())
    }

    pub fn with_settings(settings: ReconcilerSettings) -> Self {
        let chain = Arc::new(MockChainReader::new(CHAIN_ID));
        let store = Arc::new(JsonStore::in_memory());
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&store) as Arc<dyn Store>,
            Arc::clone(&chain) as Arc<dyn ChainReader>,
            settings,
        ));
        Self {
            chain,
            store,
            reconciler,
        }
    }

    /// Index a group for `token` created at `block`, with the given on-chain
    /// state seen by the creation handler.
    pub async fn create_group(
        &self,
        token: Address,
        founder: Address,
        block: u64,
        supply: &str,
        treasury_eth: &str,
        founder_balance: &str,
    ) -> Group {
        let treasury = treasury_of(token);
        self.chain.set_token_state(token, amount(supply), Amount::ZERO);
        self.chain.set_eth_balance(treasury, amount(treasury_eth));
        self.chain.set_token_balance(token, founder, amount(founder_balance));

        let log = group_created_log(addr(0xfa), token, treasury, founder, block);
        let outcome = self.reconciler.process_log(&log).await.unwrap();
        assert!(outcome.is_applied(), "group creation not applied: {:?}", outcome);
        self.store.find_group_by_contract(token).await.unwrap().unwrap()
    }
}
