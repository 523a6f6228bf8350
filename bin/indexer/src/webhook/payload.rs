//! Alchemy webhook payload.
//!
//! Only the fields the indexer reads are modelled. Numbers inside `log` arrive
//! as `0x`-prefixed hex strings. Activities stay raw JSON until [`WebhookPayload::logs`]
//! so that one bad entry does not reject the delivery.

use alloy_primitives::{Address, Bytes, B256};
use common::events::RawLog;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    #[serde(default)]
    pub webhook_id: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub event: WebhookEvent,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookEvent {
    #[serde(default)]
    pub network: Option<String>,
    #[serde(default)]
    pub activity: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookActivity {
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub log: Option<WebhookLog>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: String,
    pub transaction_hash: B256,
    pub log_index: String,
    #[serde(default)]
    pub removed: bool,
}

impl WebhookPayload {
    pub fn from_slice(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }

    /// Logs carried by the payload, in delivery order. Activities without a
    /// log are skipped; an activity that does not parse yields its error.
    pub fn logs(&self) -> impl Iterator<Item = Result<WebhookLog, serde_json::Error>> + '_ {
        self.event
            .activity
            .iter()
            .filter_map(|value| match WebhookActivity::deserialize(value) {
                Ok(activity) => activity.log.map(Ok),
                Err(e) => Some(Err(e)),
            })
    }
}

impl WebhookLog {
    pub fn to_raw_log(&self) -> Result<RawLog, String> {
        Ok(RawLog {
            address: self.address,
            topics: self.topics.clone(),
            data: self.data.clone(),
            block_number: parse_quantity(&self.block_number)
                .ok_or_else(|| format!("invalid blockNumber: {}", self.block_number))?,
            tx_hash: self.transaction_hash,
            log_index: parse_quantity(&self.log_index)
                .ok_or_else(|| format!("invalid logIndex: {}", self.log_index))?,
        })
    }
}

/// Parse a JSON-RPC quantity: `0x`-prefixed hex, or plain decimal.
pub fn parse_quantity(value: &str) -> Option<u64> {
    let value = value.trim();
    match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some("") => None,
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}
