//! Error types for event reconciliation

use chain_reader::ChainError;
use common::events::DecodeError;

use crate::retry::Retryable;
use crate::store::StoreError;

/// Errors that can occur while applying an event to the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    Chain(ChainError),
    Store(StoreError),
    Decode(DecodeError),
    /// Amount arithmetic exceeded 128 bits
    Overflow { context: &'static str },
}

impl ReconcileError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ReconcileError::Chain(e) => e.is_retryable(),
            ReconcileError::Store(e) => e.is_retryable(),
            ReconcileError::Decode(_) | ReconcileError::Overflow { .. } => false,
        }
    }
}

impl Retryable for ReconcileError {
    fn is_retryable(&self) -> bool {
        ReconcileError::is_retryable(self)
    }
}

impl std::fmt::Display for ReconcileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReconcileError::Chain(e) => write!(f, "{}", e),
            ReconcileError::Store(e) => write!(f, "{}", e),
            ReconcileError::Decode(e) => write!(f, "{}", e),
            ReconcileError::Overflow { context } => write!(f, "Amount overflow in {}", context),
        }
    }
}

impl std::error::Error for ReconcileError {}

impl From<ChainError> for ReconcileError {
    fn from(err: ChainError) -> Self {
        ReconcileError::Chain(err)
    }
}

impl From<StoreError> for ReconcileError {
    fn from(err: StoreError) -> Self {
        ReconcileError::Store(err)
    }
}

impl From<DecodeError> for ReconcileError {
    fn from(err: DecodeError) -> Self {
        ReconcileError::Decode(err)
    }
}
