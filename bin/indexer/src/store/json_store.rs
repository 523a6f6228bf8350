//! In-process store with optional JSON snapshot persistence.
//!
//! All tables live behind one async mutex. When a snapshot path is set, each
//! write is applied to a staged copy, the copy is written with temp file +
//! rename, and only then swapped in. A failed write leaves both the file and
//! memory at the previous state.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use alloy_primitives::Address;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::types::*;
use super::{Store, StoreError};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// On-disk form of the tables
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    saved_at: DateTime<Utc>,
    groups: Vec<Group>,
    members: Vec<Member>,
    activity: Vec<Activity>,
}

impl Snapshot {
    const CURRENT_VERSION: u32 = 1;
}

#[derive(Debug, Clone, Default)]
struct Tables {
    groups: HashMap<Uuid, Group>,
    group_by_contract: HashMap<Address, Uuid>,
    members: HashMap<(Uuid, Address), Member>,
    /// Append order is commit order
    activity: Vec<Activity>,
    activity_keys: HashSet<ActivityKey>,
}

impl Tables {
    fn from_snapshot(snapshot: Snapshot) -> Self {
        let mut tables = Tables::default();
        for group in snapshot.groups {
            tables.group_by_contract.insert(group.contract_address, group.id);
            tables.groups.insert(group.id, group);
        }
        for member in snapshot.members {
            tables.members.insert((member.group_id, member.wallet_address), member);
        }
        for activity in snapshot.activity {
            tables.activity_keys.insert(activity.key());
            tables.activity.push(activity);
        }
        tables
    }

    fn to_snapshot(&self) -> Snapshot {
        let mut groups: Vec<Group> = self.groups.values().cloned().collect();
        groups.sort_by_key(|g| (g.created_at, g.id));
        let mut members: Vec<Member> = self.members.values().cloned().collect();
        members.sort_by_key(|m| (m.group_id, m.wallet_address));
        Snapshot {
            version: Snapshot::CURRENT_VERSION,
            saved_at: Utc::now(),
            groups,
            members,
            activity: self.activity.clone(),
        }
    }

    fn insert_group_created(&mut self, new_group: NewGroup) -> InsertOutcome {
        let NewGroup {
            group,
            founder,
            activity,
        } = new_group;

        if self.group_by_contract.contains_key(&group.contract_address)
            || self.activity_keys.contains(&activity.key())
        {
            return InsertOutcome::AlreadyIndexed;
        }

        self.group_by_contract.insert(group.contract_address, group.id);
        self.members.insert((founder.group_id, founder.wallet_address), founder);
        self.activity_keys.insert(activity.key());
        self.activity.push(activity);
        self.groups.insert(group.id, group);
        InsertOutcome::Inserted
    }

    fn apply_trade(&mut self, update: TradeUpdate) -> TradeOutcome {
        if self.activity_keys.contains(&update.key) {
            return TradeOutcome::Duplicate;
        }
        let Some(&group_id) = self.group_by_contract.get(&update.contract) else {
            return TradeOutcome::UnknownGroup;
        };
        let Some(group) = self.groups.get_mut(&group_id) else {
            return TradeOutcome::UnknownGroup;
        };
        // A late trade still moves balances; only the newest sets the price
        let late = group.last_event.is_some_and(|last| update.position <= last);

        let mut clipped = false;
        let mut member_joined = false;
        let mut member_left = false;

        match update.side {
            TradeSide::Buy => {
                group.total_supply = group.total_supply.saturating_add(update.tokens);
                group.reserve_balance = group.reserve_balance.saturating_add(update.reserve_delta);
                group.treasury_balance = group.treasury_balance.saturating_add(update.treasury_delta);
            }
            TradeSide::Sell => {
                clipped |= group.total_supply.is_less_than(&update.tokens);
                clipped |= group.reserve_balance.is_less_than(&update.reserve_delta);
                group.total_supply = group.total_supply.saturating_sub(update.tokens);
                group.reserve_balance = group.reserve_balance.saturating_sub(update.reserve_delta);
            }
        }
        if !late {
            group.token_price = update.new_price;
            group.last_event = Some(update.position);
        }
        group.refresh_market_cap();
        group.updated_at = update.at;

        let member_key = (group_id, update.trader);
        let mut remove_member = false;
        match update.side {
            TradeSide::Buy => {
                if let Some(member) = self.members.get_mut(&member_key) {
                    member.token_balance = member.token_balance.saturating_add(update.tokens);
                    member.last_active_at = update.at;
                    if member.archived_at.take().is_some() {
                        group.member_count += 1;
                        member_joined = true;
                    }
                } else {
                    self.members.insert(
                        member_key,
                        Member {
                            group_id,
                            wallet_address: update.trader,
                            token_balance: update.tokens,
                            role: MemberRole::Newcomer,
                            joined_at: update.at,
                            last_active_at: update.at,
                            archived_at: None,
                        },
                    );
                    group.member_count += 1;
                    member_joined = true;
                }
            }
            TradeSide::Sell => {
                if let Some(member) = self.members.get_mut(&member_key) {
                    clipped |= member.token_balance.is_less_than(&update.tokens);
                    member.token_balance = member.token_balance.saturating_sub(update.tokens);
                    member.last_active_at = update.at;

                    if member.token_balance.is_zero() && member.is_active() {
                        group.member_count = group.member_count.saturating_sub(1);
                        member_left = true;
                        match update.zero_balance_policy {
                            ZeroBalancePolicy::Archive => member.archived_at = Some(update.at),
                            ZeroBalancePolicy::Delete => remove_member = true,
                        }
                    }
                } else {
                    // Seller was never recorded as a member
                    clipped = true;
                }
            }
        }
        if remove_member {
            self.members.remove(&member_key);
        }

        let event_type = match update.side {
            TradeSide::Buy => ActivityType::TokenBuy,
            TradeSide::Sell => ActivityType::TokenSell,
        };
        let mut metadata = update.metadata;
        if let ActivityMetadata::TokenSell { clipped: flag, .. } = &mut metadata {
            *flag = clipped;
        }
        self.activity_keys.insert(update.key);
        self.activity.push(Activity {
            id: Uuid::new_v4(),
            group_id,
            event_type,
            actor_address: update.trader,
            tx_hash: update.key.tx_hash,
            log_index: update.key.log_index,
            block_number: update.position.block_number,
            metadata,
            created_at: update.at,
        });

        TradeOutcome::Applied {
            group_id,
            clipped,
            member_joined,
            member_left,
            late,
        }
    }

    fn advance_checkpoint(&mut self, group_id: Uuid, block: u64, at: DateTime<Utc>) -> Result<u64, StoreError> {
        let group = self
            .groups
            .get_mut(&group_id)
            .ok_or(StoreError::GroupNotFound(group_id))?;
        group.last_indexed_block = group.last_indexed_block.max(block);
        group.last_indexed_at = Some(at);
        Ok(group.last_indexed_block)
    }
}

/// [`Store`] over in-memory tables, optionally snapshotted to a JSON file.
pub struct JsonStore {
    tables: Mutex<Tables>,
    path: Option<PathBuf>,
    lock_timeout: Duration,
}

impl JsonStore {
    /// Store that never touches disk
    pub fn in_memory() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            path: None,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Open the snapshot at `path`, starting empty when it does not exist yet.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let tables = match tokio::fs::try_exists(&path).await {
            Ok(true) => {
                let json = tokio::fs::read_to_string(&path)
                    .await
                    .map_err(|e| StoreError::Io(format!("Failed to read {}: {}", path.display(), e)))?;
                let snapshot: Snapshot = serde_json::from_str(&json)
                    .map_err(|e| StoreError::Serialization(format!("Failed to parse {}: {}", path.display(), e)))?;
                if snapshot.version > Snapshot::CURRENT_VERSION {
                    tracing::warn!(
                        "Store snapshot version {} is newer than supported version {}",
                        snapshot.version,
                        Snapshot::CURRENT_VERSION
                    );
                }
                tracing::info!(
                    path = %path.display(),
                    groups = snapshot.groups.len(),
                    members = snapshot.members.len(),
                    activity = snapshot.activity.len(),
                    saved_at = %snapshot.saved_at,
                    "Restored store snapshot"
                );
                Tables::from_snapshot(snapshot)
            }
            Ok(false) => {
                tracing::info!("No store snapshot found at {:?}, starting fresh", path);
                Tables::default()
            }
            Err(e) => return Err(StoreError::Io(format!("Failed to stat {}: {}", path.display(), e))),
        };

        Ok(Self {
            tables: Mutex::new(tables),
            path: Some(path),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        })
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    async fn lock(&self, operation: &'static str) -> Result<MutexGuard<'_, Tables>, StoreError> {
        tokio::time::timeout(self.lock_timeout, self.tables.lock())
            .await
            .map_err(|_| StoreError::Timeout { operation })
    }

    async fn read<R>(&self, operation: &'static str, f: impl FnOnce(&Tables) -> R) -> Result<R, StoreError> {
        let tables = self.lock(operation).await?;
        Ok(f(&*tables))
    }

    /// Run `f` as one transaction. `f` reports whether it changed anything;
    /// unchanged tables are not rewritten.
    async fn write<R>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&mut Tables) -> (R, bool),
    ) -> Result<R, StoreError> {
        let mut tables = self.lock(operation).await?;
        let Some(path) = &self.path else {
            return Ok(f(&mut *tables).0);
        };

        let mut staged = tables.clone();
        let (result, changed) = f(&mut staged);
        if changed {
            persist(path, &staged).await?;
            *tables = staged;
        }
        Ok(result)
    }
}

/// Write the snapshot atomically (temp file + rename).
async fn persist(path: &Path, tables: &Tables) -> Result<(), StoreError> {
    let json = serde_json::to_string_pretty(&tables.to_snapshot())
        .map_err(|e| StoreError::Serialization(format!("Failed to serialize snapshot: {}", e)))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Io(format!("Failed to create store directory: {}", e)))?;
        }
    }

    let temp_path = path.with_extension("tmp");
    tokio::fs::write(&temp_path, &json)
        .await
        .map_err(|e| StoreError::Io(format!("Failed to write temp snapshot: {}", e)))?;
    tokio::fs::rename(&temp_path, path)
        .await
        .map_err(|e| StoreError::Io(format!("Failed to rename snapshot: {}", e)))?;

    tracing::debug!(
        groups = tables.groups.len(),
        activity = tables.activity.len(),
        "Store snapshot saved"
    );
    Ok(())
}

#[async_trait]
impl Store for JsonStore {
    async fn find_group_by_contract(&self, contract: Address) -> Result<Option<Group>, StoreError> {
        self.read("find_group_by_contract", |t| {
            t.group_by_contract
                .get(&contract)
                .and_then(|id| t.groups.get(id))
                .cloned()
        })
        .await
    }

    async fn get_group(&self, group_id: Uuid) -> Result<Option<Group>, StoreError> {
        self.read("get_group", |t| t.groups.get(&group_id).cloned()).await
    }

    async fn insert_group_created(&self, new_group: NewGroup) -> Result<InsertOutcome, StoreError> {
        self.write("insert_group_created", |t| {
            let outcome = t.insert_group_created(new_group);
            (outcome, outcome == InsertOutcome::Inserted)
        })
        .await
    }

    async fn apply_trade(&self, update: TradeUpdate) -> Result<TradeOutcome, StoreError> {
        self.write("apply_trade", |t| {
            let outcome = t.apply_trade(update);
            let changed = matches!(outcome, TradeOutcome::Applied { .. });
            (outcome, changed)
        })
        .await
    }

    async fn activity_exists(&self, key: ActivityKey) -> Result<bool, StoreError> {
        self.read("activity_exists", |t| t.activity_keys.contains(&key)).await
    }

    async fn groups_needing_index(&self, chain_id: u64, limit: usize) -> Result<Vec<Group>, StoreError> {
        self.read("groups_needing_index", |t| {
            let mut groups: Vec<Group> = t.groups.values().filter(|g| g.chain_id == chain_id).cloned().collect();
            groups.sort_by_key(|g| (g.last_indexed_at, g.created_at, g.id));
            groups.truncate(limit);
            groups
        })
        .await
    }

    async fn advance_checkpoint(&self, group_id: Uuid, block: u64, at: DateTime<Utc>) -> Result<u64, StoreError> {
        self.write("advance_checkpoint", |t| {
            let result = t.advance_checkpoint(group_id, block, at);
            let changed = result.is_ok();
            (result, changed)
        })
        .await?
    }

    async fn list_groups(&self, limit: usize) -> Result<Vec<Group>, StoreError> {
        self.read("list_groups", |t| {
            let mut groups: Vec<Group> = t.groups.values().cloned().collect();
            groups.sort_by(|a, b| b.market_cap.cmp(&a.market_cap).then(a.created_at.cmp(&b.created_at)));
            groups.truncate(limit);
            groups
        })
        .await
    }

    async fn get_member(&self, group_id: Uuid, wallet: Address) -> Result<Option<Member>, StoreError> {
        self.read("get_member", |t| t.members.get(&(group_id, wallet)).cloned())
            .await
    }

    async fn list_members(&self, group_id: Uuid) -> Result<Vec<Member>, StoreError> {
        self.read("list_members", |t| {
            let mut members: Vec<Member> = t
                .members
                .values()
                .filter(|m| m.group_id == group_id)
                .cloned()
                .collect();
            members.sort_by(|a, b| {
                b.token_balance
                    .cmp(&a.token_balance)
                    .then(a.wallet_address.cmp(&b.wallet_address))
            });
            members
        })
        .await
    }

    async fn list_activity(&self, group_id: Uuid, limit: usize) -> Result<Vec<Activity>, StoreError> {
        self.read("list_activity", |t| {
            t.activity
                .iter()
                .rev()
                .filter(|a| a.group_id == group_id)
                .take(limit)
                .cloned()
                .collect()
        })
        .await
    }
}

impl std::fmt::Debug for JsonStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonStore").field("path", &self.path).finish()
    }
}
