//! # faber-issuer — Credential Issuer Orchestration
//!
//! Drives a verifiable-credential issuer on top of an [`AgentRuntime`]:
//!
//! - [`ConnectionWaiter`] turns an out-of-band invitation into an
//!   established connection. It races a connection-state notification
//!   against a direct poll under a hard deadline, then waits for the
//!   handshake to complete under a second deadline. The losing source is
//!   cancelled and the notification subscription is released on every
//!   exit path.
//! - [`ResourceRegistrar`] registers the issuer schema exactly once and
//!   mints credential definitions tagged by a durable counter that only
//!   advances on success.
//! - [`IssuanceOrchestrator`] ties both together with the record store and
//!   exposes invitation, issuance, proof-request and messaging operations.
//!
//! ## Crate Policy
//!
//! - No global instances: the application constructs the orchestrator and
//!   controls its `start`/`stop` lifecycle.
//! - Every public operation returns [`IssuerError`]; nothing panics.
//! - Parking-lot locks are never held across `.await`.
//!
//! [`AgentRuntime`]: faber_agent::AgentRuntime

pub mod config;
pub mod error;
mod guard;
pub mod listener;
pub mod orchestrator;
pub mod registrar;
pub mod waiter;

pub use config::{ConfigError, IssuerConfig};
pub use error::IssuerError;
pub use listener::ProofAcceptListener;
pub use orchestrator::IssuanceOrchestrator;
pub use registrar::{
    CredentialDefinition, ResourceRegistrar, SchemaResource, SCHEMA_RECORD_ID, SCHEMA_VERSION,
    VERSION_COUNTER_RECORD_ID,
};
pub use waiter::{ConnectionWaiter, MatchSource, WaitStage, WaitState};
