//! Persistent read model for groups, members and activity.
//!
//! The [`Store`] trait is the only way the reconciler and batch indexer touch
//! state. Each method is one serializable transaction: uniqueness of the
//! contract address, the (group, wallet) member pair and the activity key is
//! checked inside the same critical section that writes.

mod json_store;
mod types;

pub use json_store::JsonStore;
pub use types::*;

use alloy_primitives::Address;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Errors that can occur while reading or writing the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Snapshot could not be read or written
    Io(String),
    /// Snapshot contents could not be (de)serialised
    Serialization(String),
    /// Lock or write did not complete in time
    Timeout { operation: &'static str },
    GroupNotFound(Uuid),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Io(_) | StoreError::Timeout { .. })
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Io(msg) => write!(f, "Store I/O error: {}", msg),
            StoreError::Serialization(msg) => write!(f, "Store serialization error: {}", msg),
            StoreError::Timeout { operation } => write!(f, "Store {} timed out", operation),
            StoreError::GroupNotFound(id) => write!(f, "Group not found: {}", id),
        }
    }
}

impl std::error::Error for StoreError {}

#[async_trait]
pub trait Store: Send + Sync {
    async fn find_group_by_contract(&self, contract: Address) -> Result<Option<Group>, StoreError>;

    async fn get_group(&self, group_id: Uuid) -> Result<Option<Group>, StoreError>;

    /// Insert a group, its founder and its creation activity, or nothing.
    async fn insert_group_created(&self, new_group: NewGroup) -> Result<InsertOutcome, StoreError>;

    /// Apply one trade to group, member and activity log, or nothing.
    async fn apply_trade(&self, update: TradeUpdate) -> Result<TradeOutcome, StoreError>;

    async fn activity_exists(&self, key: ActivityKey) -> Result<bool, StoreError>;

    /// Groups on `chain_id` ordered by `last_indexed_at` ascending,
    /// never-indexed first
    async fn groups_needing_index(&self, chain_id: u64, limit: usize) -> Result<Vec<Group>, StoreError>;

    /// Raise `last_indexed_block` to `block` (never lowers it) and stamp
    /// `last_indexed_at`. Returns the checkpoint now stored.
    async fn advance_checkpoint(&self, group_id: Uuid, block: u64, at: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Groups by market cap, largest first
    async fn list_groups(&self, limit: usize) -> Result<Vec<Group>, StoreError>;

    async fn get_member(&self, group_id: Uuid, wallet: Address) -> Result<Option<Member>, StoreError>;

    /// Members by balance, largest first; archived rows included
    async fn list_members(&self, group_id: Uuid) -> Result<Vec<Member>, StoreError>;

    /// Newest first
    async fn list_activity(&self, group_id: Uuid, limit: usize) -> Result<Vec<Activity>, StoreError>;
}
