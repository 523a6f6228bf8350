//! Catch-up indexing over block ranges.
//!
//! Each run picks the groups that were indexed longest ago, scans their token
//! contract from `last_indexed_block + 1` to the chain head in fixed-size
//! chunks, and persists the checkpoint after every chunk. A failing group is
//! reported and the run moves on to the next one.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use common::events::EventSignatures;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::reconciler::{ReconcileError, Reconciler};
use crate::store::{Group, StoreError};

#[derive(Debug, Clone)]
pub struct BatchSettings {
    pub group_limit: usize,
    pub chunk_size: u64,
    pub group_time_budget: Duration,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            group_limit: 10,
            chunk_size: 2000,
            group_time_budget: Duration::from_secs(45),
        }
    }
}

/// Outcome for one group in a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupRunResult {
    pub group_id: Uuid,
    /// Events that changed state
    pub events_processed: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRunReport {
    pub current_block: u64,
    pub results: Vec<GroupRunResult>,
    pub finished_at: DateTime<Utc>,
}

/// Errors that abort a whole run
#[derive(Debug)]
pub enum BatchError {
    Head(ReconcileError),
    SelectGroups(StoreError),
}

impl std::fmt::Display for BatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BatchError::Head(e) => write!(f, "Failed to read chain head: {}", e),
            BatchError::SelectGroups(e) => write!(f, "Failed to select groups: {}", e),
        }
    }
}

impl std::error::Error for BatchError {}

/// Split `[from, to)` into consecutive `[start, end)` chunks of at most
/// `chunk_size` blocks.
pub fn plan_chunks(from: u64, to: u64, chunk_size: u64) -> Vec<(u64, u64)> {
    let mut chunks = Vec::new();
    if chunk_size == 0 {
        return chunks;
    }
    let mut start = from;
    while start < to {
        let end = start.saturating_add(chunk_size).min(to);
        chunks.push((start, end));
        start = end;
    }
    chunks
}

pub struct BatchIndexer {
    reconciler: Arc<Reconciler>,
    settings: BatchSettings,
    cancel_token: CancellationToken,
    /// One run at a time, whether from cron or the interval loop
    run_lock: Mutex<()>,
}

impl BatchIndexer {
    pub fn new(reconciler: Arc<Reconciler>, settings: BatchSettings) -> Self {
        Self {
            reconciler,
            settings,
            cancel_token: CancellationToken::new(),
            run_lock: Mutex::new(()),
        }
    }

    pub fn with_cancel_token(mut self, cancel_token: CancellationToken) -> Self {
        self.cancel_token = cancel_token;
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub fn settings(&self) -> &BatchSettings {
        &self.settings
    }

    /// Index up to `group_limit` groups up to the current head.
    pub async fn run_once(&self) -> Result<BatchRunReport, BatchError> {
        let _run = self.run_lock.lock().await;
        let retry = self.reconciler.settings().retry;
        let chain = self.reconciler.chain().clone();
        let current_block = retry
            .run("eth_blockNumber", || chain.block_number())
            .await
            .map_err(|e| BatchError::Head(e.into()))?;

        let groups = retry
            .run("groups_needing_index", || {
                self.reconciler
                    .store()
                    .groups_needing_index(self.reconciler.chain_id(), self.settings.group_limit)
            })
            .await
            .map_err(BatchError::SelectGroups)?;

        tracing::info!(current_block, groups = groups.len(), "🔄 Batch indexing run started");

        let mut results = Vec::with_capacity(groups.len());
        for group in groups {
            if self.cancel_token.is_cancelled() {
                tracing::info!("Batch run cancelled, remaining groups left for the next run");
                break;
            }
            results.push(self.index_group(&group, current_block).await);
        }

        let failed = results.iter().filter(|r| r.error.is_some()).count();
        tracing::info!(
            current_block,
            groups = results.len(),
            failed,
            events = results.iter().map(|r| r.events_processed).sum::<u64>(),
            "✅ Batch indexing run finished"
        );

        Ok(BatchRunReport {
            current_block,
            results,
            finished_at: Utc::now(),
        })
    }

    /// Scan one group's token contract from its checkpoint to `head`.
    pub async fn index_group(&self, group: &Group, head: u64) -> GroupRunResult {
        let mut result = GroupRunResult {
            group_id: group.id,
            events_processed: 0,
            error: None,
        };
        if let Err(e) = self.scan_group(group, head, &mut result.events_processed).await {
            tracing::error!(group_id = %group.id, contract = %group.contract_address, error = %e, "Group indexing failed");
            result.error = Some(e);
        }
        result
    }

    async fn scan_group(&self, group: &Group, head: u64, events_processed: &mut u64) -> Result<(), String> {
        let store = self.reconciler.store();
        let chain = self.reconciler.chain();
        let retry = self.reconciler.settings().retry;

        let from = group.last_indexed_block.saturating_add(1);
        let to = head;
        if from >= to {
            tracing::debug!(group_id = %group.id, last_indexed_block = group.last_indexed_block, head, "Group up to date");
            // Stamp last_indexed_at so the group rotates to the back of the queue
            retry
                .run("advance_checkpoint", || store.advance_checkpoint(group.id, group.last_indexed_block, Utc::now()))
                .await
                .map_err(|e| e.to_string())?;
            return Ok(());
        }

        let chunks = plan_chunks(from, to, self.settings.chunk_size);
        let signatures = EventSignatures::trades();
        let started = Instant::now();

        tracing::info!(
            group_id = %group.id,
            contract = %group.contract_address,
            from,
            to,
            chunks = chunks.len(),
            "Indexing group"
        );

        for (i, &(start, end)) in chunks.iter().enumerate() {
            if i > 0 {
                if self.cancel_token.is_cancelled() {
                    return Err(format!("cancelled before chunk starting at block {}", start));
                }
                if started.elapsed() > self.settings.group_time_budget {
                    return Err(format!(
                        "time budget of {}s exceeded, stopped before block {}",
                        self.settings.group_time_budget.as_secs(),
                        start
                    ));
                }
            }

            let mut logs = retry
                .run("eth_getLogs", || chain.get_logs(group.contract_address, &signatures, start, end))
                .await
                .map_err(|e| format!("failed to fetch logs for [{}, {}]: {}", start, end, e))?;
            logs.sort_by_key(|log| (log.block_number, log.log_index));

            for log in &logs {
                match self.reconciler.process_log(log).await {
                    Ok(outcome) if outcome.is_applied() => *events_processed += 1,
                    Ok(_) => {}
                    Err(e) if e.is_retryable() => {
                        // Checkpoint stays before this chunk so the next run retries it
                        return Err(format!(
                            "event at block {} log {} failed: {}",
                            log.block_number, log.log_index, e
                        ));
                    }
                    Err(e) => {
                        tracing::warn!(
                            group_id = %group.id,
                            block = log.block_number,
                            log_index = log.log_index,
                            error = %e,
                            "Skipping event"
                        );
                    }
                }
            }

            let checkpoint = retry
                .run("advance_checkpoint", || store.advance_checkpoint(group.id, end, Utc::now()))
                .await
                .map_err(|e| format!("failed to persist checkpoint {}: {}", end, e))?;

            tracing::debug!(
                group_id = %group.id,
                start,
                end,
                logs = logs.len(),
                checkpoint,
                "Chunk indexed"
            );
        }

        Ok(())
    }
}
