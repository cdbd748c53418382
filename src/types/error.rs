//! Error types for ledger-mirror
//!
//! One enum covers every stage of the pipeline. Per-cycle routines catch
//! these at their top level and log them; nothing here is fatal to another
//! domain's pipeline.

use hyper::StatusCode;

use crate::domain::DomainKind;
use crate::types::Hash32;

/// Main error type for mirror operations
#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    /// Ledger unreachable or returned garbage; retried, then deferred to the next tick
    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("NATS error: {0}")]
    Nats(String),

    /// A confirmation references an action the ingestor has not stored yet
    #[error("{domain} has not caught up to action {action_hash}")]
    NotYetCaughtUp { domain: DomainKind, action_hash: Hash32 },

    #[error("Action chain broken: {0}")]
    ChainBroken(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("{domain} mirror root {local} does not match ledger root {ledger}")]
    RootMismatch {
        domain: DomainKind,
        local: Hash32,
        ledger: String,
    },

    #[error("Proof submission failed: {0}")]
    ProofSubmission(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid slot: {0}")]
    InvalidSlot(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MirrorError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidSlot(_) | Self::Decode(_) => StatusCode::BAD_REQUEST,
            Self::Ledger(_) | Self::Database(_) | Self::Nats(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::NotYetCaughtUp { .. } => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether retrying the same call could succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Ledger(_) | Self::Database(_) | Self::Nats(_))
    }
}

impl From<mongodb::error::Error> for MirrorError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<bson::ser::Error> for MirrorError {
    fn from(err: bson::ser::Error) -> Self {
        Self::Database(format!("BSON encode failed: {}", err))
    }
}

impl From<bson::de::Error> for MirrorError {
    fn from(err: bson::de::Error) -> Self {
        Self::Database(format!("BSON decode failed: {}", err))
    }
}

impl From<reqwest::Error> for MirrorError {
    fn from(err: reqwest::Error) -> Self {
        Self::Ledger(err.to_string())
    }
}

impl From<serde_json::Error> for MirrorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(format!("JSON error: {}", err))
    }
}

impl From<async_nats::Error> for MirrorError {
    fn from(err: async_nats::Error) -> Self {
        Self::Nats(err.to_string())
    }
}

impl From<std::io::Error> for MirrorError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

/// Result type alias for mirror operations
pub type Result<T> = std::result::Result<T, MirrorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_is_distinct() {
        let err = MirrorError::NotFound("committee:7".into());
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert!(!err.is_transient());
    }

    #[test]
    fn test_transient_classification() {
        assert!(MirrorError::Ledger("timeout".into()).is_transient());
        assert!(!MirrorError::ChainBroken("gap".into()).is_transient());
    }
}
