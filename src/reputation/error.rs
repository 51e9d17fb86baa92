//! Error types for the reputation core

use crate::store::StoreError;
use thiserror::Error;

/// Errors produced by scoring, key derivation and the scoring service
#[derive(Debug, Error)]
pub enum ReputationError {
    #[error("invalid reputation score {0}")]
    InvalidScore(i32),

    #[error("reputation entry missing required field {0}")]
    MissingField(&'static str),

    #[error("invalid ip address: {0}")]
    InvalidAddress(String),

    #[error("unknown type for validation {0}")]
    UnknownType(String),

    #[error("invalid {kind} format {value}")]
    InvalidValue { kind: &'static str, value: String },

    #[error("invalid violation request: {0}")]
    InvalidRequest(String),

    #[error("reputation entry not found")]
    NotFound,

    #[error("stored reputation entry is invalid: {0}")]
    CorruptRecord(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ReputationError {
    /// True when the error was caused by caller-supplied data
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ReputationError::InvalidScore(_)
                | ReputationError::MissingField(_)
                | ReputationError::InvalidAddress(_)
                | ReputationError::UnknownType(_)
                | ReputationError::InvalidValue { .. }
                | ReputationError::InvalidRequest(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ReputationError>;
