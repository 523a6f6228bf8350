//! Decoding of raw chain logs into typed group events.
//!
//! Both ingestion paths (block range scans and webhook pushes) hand a
//! [`RawLog`] to [`decode_log`], which dispatches on `topics[0]`:
//! - `GroupCreated` from the group factory
//! - `TokensPurchased` / `TokensSold` from a group's token contract
//!
//! Logs with any other signature are reported as [`Decoded::Unrecognized`].

use std::fmt;

use alloy_primitives::{Address, Bytes, Log as PrimitiveLog, B256, U256};
use alloy_sol_types::SolEvent;
use serde::{Deserialize, Serialize};

use crate::amount::Amount;
use crate::interfaces::community_token::ICommunityToken::{TokensPurchased, TokensSold};
use crate::interfaces::group_factory::IGroupFactory::GroupCreated;

/// Log entry as delivered by an RPC node or a webhook provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLog {
    /// Emitting contract
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: u64,
    pub tx_hash: B256,
    /// Position of the log within its block
    pub log_index: u64,
}

/// Where a decoded event came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogMeta {
    pub contract: Address,
    pub tx_hash: B256,
    pub block_number: u64,
    pub log_index: u64,
}

impl LogMeta {
    /// Total order of events emitted by one contract
    pub fn position(&self) -> (u64, u64) {
        (self.block_number, self.log_index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupCreatedEvent {
    pub token_address: Address,
    pub treasury_address: Address,
    pub creator: Address,
    pub name: String,
    pub symbol: String,
    pub charter_cid: String,
    pub is_public: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokensPurchasedEvent {
    pub buyer: Address,
    pub eth_in: Amount,
    pub tokens_out: Amount,
    pub new_price: Amount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokensSoldEvent {
    pub seller: Address,
    pub tokens_in: Amount,
    pub eth_out: Amount,
    pub new_price: Amount,
}

/// Domain events understood by the indexer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GroupEvent {
    GroupCreated(GroupCreatedEvent),
    TokensPurchased(TokensPurchasedEvent),
    TokensSold(TokensSoldEvent),
}

impl GroupEvent {
    pub fn name(&self) -> &'static str {
        match self {
            GroupEvent::GroupCreated(_) => "GroupCreated",
            GroupEvent::TokensPurchased(_) => "TokensPurchased",
            GroupEvent::TokensSold(_) => "TokensSold",
        }
    }

    pub fn is_trade(&self) -> bool {
        matches!(self, GroupEvent::TokensPurchased(_) | GroupEvent::TokensSold(_))
    }
}

/// Outcome of decoding one log
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Event(GroupEvent, LogMeta),
    /// Signature is not one of ours; carries topic0 when present
    Unrecognized(Option<B256>),
}

/// Errors that can occur while decoding a recognised log
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Signature matched but topics or data did not fit the ABI
    Malformed { event: &'static str, reason: String },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Malformed { event, reason } => {
                write!(f, "Malformed {} log: {}", event, reason)
            }
        }
    }
}

impl std::error::Error for DecodeError {}

/// Event signature constants
pub struct EventSignatures;

impl EventSignatures {
    /// GroupCreated event signature (topic0)
    pub fn group_created() -> B256 {
        GroupCreated::SIGNATURE_HASH
    }

    /// TokensPurchased event signature (topic0)
    pub fn tokens_purchased() -> B256 {
        TokensPurchased::SIGNATURE_HASH
    }

    /// TokensSold event signature (topic0)
    pub fn tokens_sold() -> B256 {
        TokensSold::SIGNATURE_HASH
    }

    /// Signatures emitted by a group's token contract
    pub fn trades() -> Vec<B256> {
        vec![Self::tokens_purchased(), Self::tokens_sold()]
    }

    pub fn all() -> Vec<B256> {
        vec![Self::group_created(), Self::tokens_purchased(), Self::tokens_sold()]
    }
}

fn malformed(event: &'static str, reason: impl ToString) -> DecodeError {
    DecodeError::Malformed {
        event,
        reason: reason.to_string(),
    }
}

fn to_amount(event: &'static str, field: &str, value: U256) -> Result<Amount, DecodeError> {
    Amount::from_wei(value).ok_or_else(|| malformed(event, format!("{} does not fit 128 bits", field)))
}

/// Decode a raw log into a [`GroupEvent`].
pub fn decode_log(raw: &RawLog) -> Result<Decoded, DecodeError> {
    let Some(topic0) = raw.topics.first().copied() else {
        return Ok(Decoded::Unrecognized(None));
    };

    let meta = LogMeta {
        contract: raw.address,
        tx_hash: raw.tx_hash,
        block_number: raw.block_number,
        log_index: raw.log_index,
    };

    let event = if topic0 == EventSignatures::group_created() {
        let log = primitive_log(raw, "GroupCreated")?;
        let decoded = GroupCreated::decode_log(&log).map_err(|e| malformed("GroupCreated", e))?;
        GroupEvent::GroupCreated(GroupCreatedEvent {
            token_address: decoded.tokenAddress,
            treasury_address: decoded.treasuryAddress,
            creator: decoded.creator,
            name: decoded.name.clone(),
            symbol: decoded.symbol.clone(),
            charter_cid: decoded.charterCid.clone(),
            is_public: decoded.isPublic,
        })
    } else if topic0 == EventSignatures::tokens_purchased() {
        const NAME: &str = "TokensPurchased";
        let log = primitive_log(raw, NAME)?;
        let decoded = TokensPurchased::decode_log(&log).map_err(|e| malformed(NAME, e))?;
        GroupEvent::TokensPurchased(TokensPurchasedEvent {
            buyer: decoded.buyer,
            eth_in: to_amount(NAME, "ethIn", decoded.ethIn)?,
            tokens_out: to_amount(NAME, "tokensOut", decoded.tokensOut)?,
            new_price: to_amount(NAME, "newPrice", decoded.newPrice)?,
        })
    } else if topic0 == EventSignatures::tokens_sold() {
        const NAME: &str = "TokensSold";
        let log = primitive_log(raw, NAME)?;
        let decoded = TokensSold::decode_log(&log).map_err(|e| malformed(NAME, e))?;
        GroupEvent::TokensSold(TokensSoldEvent {
            seller: decoded.seller,
            tokens_in: to_amount(NAME, "tokensIn", decoded.tokensIn)?,
            eth_out: to_amount(NAME, "ethOut", decoded.ethOut)?,
            new_price: to_amount(NAME, "newPrice", decoded.newPrice)?,
        })
    } else {
        return Ok(Decoded::Unrecognized(Some(topic0)));
    };

    Ok(Decoded::Event(event, meta))
}

fn primitive_log(raw: &RawLog, event: &'static str) -> Result<PrimitiveLog, DecodeError> {
    PrimitiveLog::new(raw.address, raw.topics.clone(), raw.data.clone())
        .ok_or_else(|| malformed(event, format!("{} topics exceeds the maximum of 4", raw.topics.len())))
}
