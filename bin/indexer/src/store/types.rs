//! Read model rows: groups, members, activity.

use alloy_primitives::{Address, B256};
use chrono::{DateTime, Utc};
use common::amount::Amount;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What happens to a member row once its balance reaches zero
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZeroBalancePolicy {
    /// Keep the row with `archived_at` set
    #[default]
    Archive,
    /// Remove the row
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    Founder,
    Elder,
    Member,
    Newcomer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    GroupCreated,
    TokenBuy,
    TokenSell,
}

/// Idempotency key of an applied log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActivityKey {
    pub tx_hash: B256,
    pub log_index: u64,
}

/// Position of an event within one contract's log stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventPosition {
    pub block_number: u64,
    pub log_index: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: Uuid,
    pub chain_id: u64,
    pub contract_address: Address,
    pub treasury_address: Address,
    pub creator_address: Address,
    pub name: String,
    pub token_symbol: String,
    pub charter_cid: String,
    pub is_public: bool,
    pub created_tx_hash: B256,
    pub created_block: u64,

    pub token_price: Amount,
    pub total_supply: Amount,
    pub reserve_balance: Amount,
    pub treasury_balance: Amount,
    pub member_count: u64,
    pub market_cap: Amount,

    pub last_indexed_block: u64,
    pub last_indexed_at: Option<DateTime<Utc>>,
    /// Newest applied trade
    pub last_event: Option<EventPosition>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Group {
    /// `token_price * total_supply`, saturating at `Amount::MAX`
    pub fn compute_market_cap(price: Amount, supply: Amount) -> Amount {
        price.checked_mul(supply).unwrap_or(Amount::MAX)
    }

    pub fn refresh_market_cap(&mut self) {
        self.market_cap = Self::compute_market_cap(self.token_price, self.total_supply);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub group_id: Uuid,
    pub wallet_address: Address,
    pub token_balance: Amount,
    pub role: MemberRole,
    pub joined_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub archived_at: Option<DateTime<Utc>>,
}

impl Member {
    pub fn is_active(&self) -> bool {
        self.archived_at.is_none()
    }
}

/// Event-specific payload stored with an activity row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActivityMetadata {
    GroupCreated {
        token_address: Address,
        treasury_address: Address,
        token_symbol: String,
        charter_cid: String,
    },
    TokenBuy {
        eth_in: Amount,
        tokens_out: Amount,
        new_price: Amount,
        fee: Amount,
    },
    TokenSell {
        tokens_in: Amount,
        eth_out: Amount,
        new_price: Amount,
        /// Set when the sale exceeded the recorded balance or supply
        clipped: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    pub id: Uuid,
    pub group_id: Uuid,
    pub event_type: ActivityType,
    pub actor_address: Address,
    pub tx_hash: B256,
    pub log_index: u64,
    pub block_number: u64,
    pub metadata: ActivityMetadata,
    pub created_at: DateTime<Utc>,
}

impl Activity {
    pub fn key(&self) -> ActivityKey {
        ActivityKey {
            tx_hash: self.tx_hash,
            log_index: self.log_index,
        }
    }
}

/// Kind of trade applied in one store transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeSide {
    Buy,
    Sell,
}

/// One trade to apply to a group and its trader atomically.
///
/// All deltas are already computed by the caller; the store only clips at
/// zero and flags when it had to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeUpdate {
    pub contract: Address,
    pub side: TradeSide,
    pub trader: Address,
    /// Tokens minted (buy) or burned (sell)
    pub tokens: Amount,
    /// ETH added to the reserve (buy) or paid out of it (sell)
    pub reserve_delta: Amount,
    /// Fee credited to the treasury; zero on sales
    pub treasury_delta: Amount,
    pub new_price: Amount,
    pub position: EventPosition,
    pub key: ActivityKey,
    /// The store fills in `clipped` for sales
    pub metadata: ActivityMetadata,
    pub zero_balance_policy: ZeroBalancePolicy,
    pub at: DateTime<Utc>,
}

/// Effect of [`TradeUpdate`] as committed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TradeOutcome {
    Applied {
        group_id: Uuid,
        /// Supply or balance had to be floored at zero
        clipped: bool,
        /// A new member row was created or an archived one reactivated
        member_joined: bool,
        /// The trader's balance reached zero and the policy was applied
        member_left: bool,
        /// Event sits at or before the newest applied trade; its deltas were
        /// applied but price and `last_event` were kept
        late: bool,
    },
    /// Activity key already recorded
    Duplicate,
    /// No group is indexed for the contract
    UnknownGroup,
}

/// New group together with its founder and creation activity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewGroup {
    pub group: Group,
    pub founder: Member,
    pub activity: Activity,
}

/// Result of [`crate::store::Store::insert_group_created`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// Contract or activity key was already present
    AlreadyIndexed,
}
