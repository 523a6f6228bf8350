use alloy_primitives::Address;
use chain_reader::GroupChainState;
use chrono::{DateTime, Utc};
use common::amount::Amount;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::batch::GroupRunResult;
use crate::webhook::WebhookReport;

/// Health check response
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub chain_id: u64,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct WebhookResponse {
    pub success: bool,
    #[serde(flatten)]
    pub report: WebhookReport,
}

/// Result of one batch indexing run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CronResponse {
    pub success: bool,
    pub current_block: u64,
    pub groups_processed: usize,
    pub results: Vec<GroupRunResult>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QuoteSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuoteQuery {
    pub side: QuoteSide,
    /// Decimal ETH for a buy, decimal tokens for a sell
    pub amount: String,
}

/// Display-only estimate from the bonding curve; the chain decides the fill.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteResponse {
    pub group_id: Uuid,
    pub side: QuoteSide,
    pub amount_in: Amount,
    pub amount_out: Amount,
    pub fee: Amount,
    pub average_price: Amount,
    pub current_price: Amount,
    pub new_price: Amount,
    pub clipped: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OnchainResponse {
    pub group_id: Uuid,
    pub chain_id: u64,
    pub contract_address: Address,
    #[serde(flatten)]
    pub state: GroupChainState,
}
