//! Applies decoded group events to the store.
//!
//! Flow for every log, from either the batch indexer or the webhook:
//! 1. Decode with [`common::events::decode_log`]; unknown signatures are ignored
//! 2. Dispatch to the handler for the event type
//! 3. Retry transient chain/store failures with backoff
//!
//! Handlers are idempotent on the (tx_hash, log_index) activity key.

mod errors;

pub use errors::ReconcileError;

use std::sync::Arc;

use alloy_primitives::Address;
use chain_reader::ChainReader;
use chrono::Utc;
use common::amount::Amount;
use common::bonding_curve::CurveParams;
use common::events::{
    decode_log, Decoded, GroupCreatedEvent, GroupEvent, LogMeta, RawLog, TokensPurchasedEvent, TokensSoldEvent,
};
use uuid::Uuid;

use crate::retry::RetryPolicy;
use crate::store::{
    Activity, ActivityKey, ActivityMetadata, ActivityType, EventPosition, Group, InsertOutcome, Member, MemberRole,
    NewGroup, Store, TradeOutcome, TradeSide, TradeUpdate, ZeroBalancePolicy,
};

/// Result of reconciling one log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// State changed
    Applied { group_id: Uuid, event: &'static str },
    /// Already reconciled earlier; nothing changed
    Duplicate,
    /// Trade for a contract that is not indexed
    UnknownGroup,
    /// Not one of the group events
    Ignored,
}

impl ReconcileOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ReconcileOutcome::Applied { .. })
    }
}

#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    pub curve: CurveParams,
    pub zero_balance_policy: ZeroBalancePolicy,
    pub retry: RetryPolicy,
    /// Accepted emitter of `GroupCreated`
    pub factory_address: Option<Address>,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            curve: CurveParams::default(),
            zero_balance_policy: ZeroBalancePolicy::default(),
            retry: RetryPolicy::default(),
            factory_address: None,
        }
    }
}

pub struct Reconciler {
    store: Arc<dyn Store>,
    chain: Arc<dyn ChainReader>,
    settings: ReconcilerSettings,
}

impl Reconciler {
    pub fn new(store: Arc<dyn Store>, chain: Arc<dyn ChainReader>, settings: ReconcilerSettings) -> Self {
        Self { store, chain, settings }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain.chain_id()
    }

    pub fn chain(&self) -> &Arc<dyn ChainReader> {
        &self.chain
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn settings(&self) -> &ReconcilerSettings {
        &self.settings
    }

    /// Decode and apply one raw log, retrying transient failures.
    ///
    /// Shared entry point of the batch indexer and the webhook.
    pub async fn process_log(&self, raw: &RawLog) -> Result<ReconcileOutcome, ReconcileError> {
        let (event, meta) = match decode_log(raw) {
            Ok(Decoded::Event(event, meta)) => (event, meta),
            Ok(Decoded::Unrecognized(topic0)) => {
                tracing::debug!(contract = %raw.address, topic0 = ?topic0, "Ignoring unrecognized log");
                return Ok(ReconcileOutcome::Ignored);
            }
            Err(e) => {
                tracing::warn!(
                    contract = %raw.address,
                    tx_hash = %raw.tx_hash,
                    log_index = raw.log_index,
                    error = %e,
                    "Skipping undecodable log"
                );
                return Err(e.into());
            }
        };

        self.settings
            .retry
            .run(event.name(), || self.apply(&event, &meta))
            .await
            .inspect_err(|e| {
                tracing::error!(
                    event = event.name(),
                    contract = %meta.contract,
                    tx_hash = %meta.tx_hash,
                    log_index = meta.log_index,
                    error = %e,
                    "Failed to reconcile event"
                );
            })
    }

    /// Apply an already decoded event once, without retries.
    pub async fn apply(&self, event: &GroupEvent, meta: &LogMeta) -> Result<ReconcileOutcome, ReconcileError> {
        match event {
            GroupEvent::GroupCreated(created) => self.handle_group_created(created, meta).await,
            GroupEvent::TokensPurchased(purchase) => self.handle_tokens_purchased(meta.contract, purchase, meta).await,
            GroupEvent::TokensSold(sale) => self.handle_tokens_sold(meta.contract, sale, meta).await,
        }
    }

    /// Index a new group from its factory event, seeding economic state from
    /// the contracts.
    pub async fn handle_group_created(
        &self,
        event: &GroupCreatedEvent,
        meta: &LogMeta,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        if let Some(factory) = self.settings.factory_address {
            if meta.contract != factory {
                tracing::warn!(
                    emitter = %meta.contract,
                    %factory,
                    token = %event.token_address,
                    "GroupCreated from unexpected contract, ignoring"
                );
                return Ok(ReconcileOutcome::Ignored);
            }
        }

        if let Some(existing) = self.store.find_group_by_contract(event.token_address).await? {
            tracing::debug!(group_id = %existing.id, token = %event.token_address, "Group already indexed");
            return Ok(ReconcileOutcome::Duplicate);
        }

        // State as of the creation block
        let at = Some(meta.block_number);
        let total_supply = self.chain.total_supply(event.token_address, at).await?;
        let reserve_balance = self.chain.reserve_balance(event.token_address, at).await?;
        let treasury_balance = self.chain.eth_balance(event.treasury_address, at).await?;
        let founder_balance = self.chain.balance_of(event.token_address, event.creator, at).await?;

        let token_price = self.settings.curve.spot_price(reserve_balance, total_supply);
        let now = Utc::now();
        let group_id = Uuid::new_v4();

        let group = Group {
            id: group_id,
            chain_id: self.chain.chain_id(),
            contract_address: event.token_address,
            treasury_address: event.treasury_address,
            creator_address: event.creator,
            name: event.name.clone(),
            token_symbol: event.symbol.clone(),
            charter_cid: event.charter_cid.clone(),
            is_public: event.is_public,
            created_tx_hash: meta.tx_hash,
            created_block: meta.block_number,
            token_price,
            total_supply,
            reserve_balance,
            treasury_balance,
            member_count: 1,
            market_cap: Group::compute_market_cap(token_price, total_supply),
            last_indexed_block: meta.block_number,
            last_indexed_at: None,
            last_event: None,
            created_at: now,
            updated_at: now,
        };
        let founder = Member {
            group_id,
            wallet_address: event.creator,
            token_balance: founder_balance,
            role: MemberRole::Founder,
            joined_at: now,
            last_active_at: now,
            archived_at: None,
        };
        let activity = Activity {
            id: Uuid::new_v4(),
            group_id,
            event_type: ActivityType::GroupCreated,
            actor_address: event.creator,
            tx_hash: meta.tx_hash,
            log_index: meta.log_index,
            block_number: meta.block_number,
            metadata: ActivityMetadata::GroupCreated {
                token_address: event.token_address,
                treasury_address: event.treasury_address,
                token_symbol: event.symbol.clone(),
                charter_cid: event.charter_cid.clone(),
            },
            created_at: now,
        };

        match self.store.insert_group_created(NewGroup { group, founder, activity }).await? {
            InsertOutcome::Inserted => {
                tracing::info!(
                    %group_id,
                    token = %event.token_address,
                    name = %event.name,
                    symbol = %event.symbol,
                    block = meta.block_number,
                    price = %token_price,
                    supply = %total_supply,
                    "🆕 Group indexed"
                );
                Ok(ReconcileOutcome::Applied {
                    group_id,
                    event: "GroupCreated",
                })
            }
            InsertOutcome::AlreadyIndexed => {
                tracing::debug!(token = %event.token_address, "Group indexed concurrently");
                Ok(ReconcileOutcome::Duplicate)
            }
        }
    }

    pub async fn handle_tokens_purchased(
        &self,
        contract: Address,
        event: &TokensPurchasedEvent,
        meta: &LogMeta,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let fee = self
            .settings
            .curve
            .fee_for(event.eth_in)
            .ok_or(ReconcileError::Overflow { context: "purchase fee" })?;
        let new_price = self.floored_price(contract, event.new_price, meta);

        let update = TradeUpdate {
            contract,
            side: TradeSide::Buy,
            trader: event.buyer,
            tokens: event.tokens_out,
            reserve_delta: event.eth_in.saturating_sub(fee),
            treasury_delta: fee,
            new_price,
            position: position(meta),
            key: key(meta),
            metadata: ActivityMetadata::TokenBuy {
                eth_in: event.eth_in,
                tokens_out: event.tokens_out,
                new_price,
                fee,
            },
            zero_balance_policy: self.settings.zero_balance_policy,
            at: Utc::now(),
        };

        self.commit_trade(update, "TokensPurchased").await
    }

    pub async fn handle_tokens_sold(
        &self,
        contract: Address,
        event: &TokensSoldEvent,
        meta: &LogMeta,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let new_price = self.floored_price(contract, event.new_price, meta);

        let update = TradeUpdate {
            contract,
            side: TradeSide::Sell,
            trader: event.seller,
            tokens: event.tokens_in,
            reserve_delta: event.eth_out,
            treasury_delta: Amount::ZERO,
            new_price,
            position: position(meta),
            key: key(meta),
            metadata: ActivityMetadata::TokenSell {
                tokens_in: event.tokens_in,
                eth_out: event.eth_out,
                new_price,
                clipped: false,
            },
            zero_balance_policy: self.settings.zero_balance_policy,
            at: Utc::now(),
        };

        self.commit_trade(update, "TokensSold").await
    }

    async fn commit_trade(&self, update: TradeUpdate, event: &'static str) -> Result<ReconcileOutcome, ReconcileError> {
        let contract = update.contract;
        let trader = update.trader;
        let tokens = update.tokens;
        let position = update.position;

        match self.store.apply_trade(update).await? {
            TradeOutcome::Applied {
                group_id,
                clipped,
                member_joined,
                member_left,
                late,
            } => {
                if late {
                    tracing::warn!(
                        %group_id,
                        %contract,
                        block = position.block_number,
                        log_index = position.log_index,
                        "Trade arrived behind a newer one, price left unchanged"
                    );
                }
                if clipped {
                    tracing::warn!(
                        %group_id,
                        %contract,
                        %trader,
                        %tokens,
                        block = position.block_number,
                        "Sale exceeded recorded balance or supply, clipped at zero"
                    );
                }
                tracing::info!(
                    %group_id,
                    event,
                    %trader,
                    %tokens,
                    block = position.block_number,
                    log_index = position.log_index,
                    member_joined,
                    member_left,
                    "Trade reconciled"
                );
                Ok(ReconcileOutcome::Applied { group_id, event })
            }
            TradeOutcome::Duplicate => {
                tracing::debug!(%contract, block = position.block_number, log_index = position.log_index, "Trade already reconciled");
                Ok(ReconcileOutcome::Duplicate)
            }
            TradeOutcome::UnknownGroup => {
                tracing::warn!(%contract, event, "Trade for unindexed group, skipping");
                Ok(ReconcileOutcome::UnknownGroup)
            }
        }
    }

    fn floored_price(&self, contract: Address, price: Amount, meta: &LogMeta) -> Amount {
        let floored = self.settings.curve.floor_price(price);
        if floored != price {
            tracing::warn!(
                %contract,
                reported = %price,
                floor = %floored,
                block = meta.block_number,
                "Event price below floor, clamped"
            );
        }
        floored
    }
}

fn position(meta: &LogMeta) -> EventPosition {
    EventPosition {
        block_number: meta.block_number,
        log_index: meta.log_index,
    }
}

fn key(meta: &LogMeta) -> ActivityKey {
    ActivityKey {
        tx_hash: meta.tx_hash,
        log_index: meta.log_index,
    }
}
