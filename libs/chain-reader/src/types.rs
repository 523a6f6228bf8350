//! Types returned by chain reads.

use common::amount::Amount;
use serde::{Deserialize, Serialize};

/// Live view of a group token's contract state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupChainState {
    pub total_supply: Amount,
    pub reserve_balance: Amount,
    pub current_price: Amount,
    /// IPFS content id of the group charter
    pub charter_cid: String,
}
