//! Error types for chain reads

/// Errors that can occur during chain operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    // Transport errors
    RpcError(String),
    Timeout { operation: &'static str, secs: u64 },

    // Contract reads
    ContractCallFailed { call: &'static str, reason: String },
    ValueOverflow { call: &'static str },

    // Configuration errors
    UnsupportedChain(u64),
    InvalidConfig(String),
}

impl ChainError {
    /// Whether repeating the call may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            ChainError::RpcError(_) | ChainError::Timeout { .. } => true,
            ChainError::ContractCallFailed { reason, .. } => !reason.to_lowercase().contains("revert"),
            ChainError::ValueOverflow { .. }
            | ChainError::UnsupportedChain(_)
            | ChainError::InvalidConfig(_) => false,
        }
    }
}

impl std::fmt::Display for ChainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainError::RpcError(msg) => write!(f, "RPC error: {}", msg),
            ChainError::Timeout { operation, secs } => {
                write!(f, "{} timed out after {}s", operation, secs)
            }
            ChainError::ContractCallFailed { call, reason } => {
                write!(f, "{} call failed: {}", call, reason)
            }
            ChainError::ValueOverflow { call } => {
                write!(f, "{} returned a value wider than 128 bits", call)
            }
            ChainError::UnsupportedChain(chain_id) => {
                write!(f, "No RPC configured for chain {}", chain_id)
            }
            ChainError::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ChainError {}
