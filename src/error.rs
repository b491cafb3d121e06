//! Crate-wide error type.
//!
//! Every fallible operation returns [`Result<T>`]. There are no panics and no
//! exceptions crossing component boundaries: scheduled background tasks
//! catch and log failures instead of propagating them, and handler panics
//! are caught at the protocol executor's dispatch boundary (see
//! `consensus::engine`).

use thiserror::Error;

/// Errors surfaced by the consensus engine and its collaborators.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RabiaError {
    /// `apply` was called with no commands.
    #[error("batch must contain at least one command")]
    EmptyBatch,

    /// The engine is not currently accepting work (dormant or stopped).
    #[error("node is inactive")]
    NodeInactive,

    /// The transport could not reach a peer. Normally surfaced as a
    /// `NodeDown` topology event rather than returned to a caller, but kept
    /// here for transport implementations that need to report synchronous
    /// send failures.
    #[error("transport error: {0}")]
    Transport(String),

    /// The host state machine's `process`/`make_snapshot`/`restore_snapshot`
    /// failed.
    #[error("state machine error: {0}")]
    StateMachine(String),

    /// Wire (de)serialization of a protocol message or batch failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A protocol invariant was violated by a malformed or out-of-order
    /// message.
    #[error("protocol error: {0}")]
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, RabiaError>;

impl From<bincode::error::EncodeError> for RabiaError {
    fn from(e: bincode::error::EncodeError) -> Self {
        RabiaError::Serialization(e.to_string())
    }
}

impl From<bincode::error::DecodeError> for RabiaError {
    fn from(e: bincode::error::DecodeError) -> Self {
        RabiaError::Serialization(e.to_string())
    }
}
