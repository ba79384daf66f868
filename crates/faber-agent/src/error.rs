//! # Agent Runtime Errors

use std::time::Duration;

use thiserror::Error;

/// Errors reported by an [`AgentRuntime`](crate::AgentRuntime).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AgentError {
    /// The runtime gave up waiting.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// The operation that timed out.
        operation: &'static str,
        /// How long the runtime waited.
        after: Duration,
    },

    /// The referenced connection, exchange, or record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The runtime could not reach its peer, ledger, or wallet.
    #[error("transport error: {0}")]
    Transport(String),

    /// The runtime refused the request.
    #[error("rejected: {0}")]
    Rejected(String),
}
