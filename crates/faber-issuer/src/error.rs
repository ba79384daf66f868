//! # Issuer Errors
//!
//! Every public issuer operation returns these rather than panicking.
//! Some failures are *soft*: the operation is skipped or abandoned, the
//! failure is logged, and the issuer carries on (see [`IssuerError::is_soft`]).

use std::time::Duration;

use faber_agent::AgentError;
use faber_core::RecordId;
use faber_store::StoreError;
use thiserror::Error;

use crate::config::ConfigError;
use crate::waiter::WaitStage;

/// Errors raised by the issuer orchestration layer.
#[derive(Error, Debug)]
pub enum IssuerError {
    /// No active or matched connection. Recoverable by inviting again.
    #[error("no active connection; create an invitation and wait for it to be accepted")]
    MissingConnection,

    /// No issuer DID is configured or available from the runtime.
    #[error("missing anoncreds issuer id")]
    IssuerIdMissing,

    /// The runtime reported a non-finished registration.
    #[error("error registering {resource}: {reason}")]
    RegistrationFailed {
        /// `"schema"` or `"credential definition"`.
        resource: &'static str,
        /// Runtime-provided reason.
        reason: String,
    },

    /// The schema has not been registered yet.
    #[error("user schema is not registered")]
    SchemaNotRegistered,

    /// A connection deadline elapsed.
    #[error("connection {stage} timed out after {after:?}")]
    TimedOut {
        /// Which deadline elapsed.
        stage: WaitStage,
        /// The deadline.
        after: Duration,
    },

    /// Another connection wait is already in flight.
    #[error("a connection wait is already in progress")]
    WaitInProgress,

    /// Claims do not match the schema's attribute names.
    #[error("claims do not match schema: missing {missing:?}, unexpected {unexpected:?}")]
    InvalidClaims {
        /// Schema attributes with no claim.
        missing: Vec<String>,
        /// Claims the schema does not define.
        unexpected: Vec<String>,
    },

    /// A persisted record lacks a field the issuer wrote.
    #[error("record {id} is malformed: field {field} missing or mistyped")]
    MalformedRecord {
        /// The record.
        id: RecordId,
        /// The missing or mistyped field.
        field: &'static str,
    },

    /// The agent runtime failed.
    #[error("agent runtime error: {0}")]
    Agent(#[from] AgentError),

    /// The record store failed.
    #[error("record store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration was invalid.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl IssuerError {
    /// Whether this failure is soft: logged and returned to the caller,
    /// with no issuer state left inconsistent.
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            Self::MissingConnection | Self::SchemaNotRegistered | Self::TimedOut { .. }
        )
    }
}
