//! # faber-agent — Agent Runtime Contract
//!
//! The issuer does not speak DIDComm, build zero-knowledge proofs, or write
//! to a ledger itself. Those primitives come from an agent runtime, which
//! this crate describes as the [`AgentRuntime`] trait:
//!
//! - **Connections**: out-of-band invitations, state-change notifications,
//!   lookup by invitation, and waiting for the handshake to complete.
//! - **Registration**: schema and credential-definition ledger writes.
//! - **Issuance**: credential offers, proof requests and presentation
//!   acceptance, basic messages.
//! - **Wallet**: listing the DIDs the runtime already controls.
//!
//! Notifications are delivered through [`EventBus`] subscriptions, so
//! consumers hold an explicit handle and detach it when done.
//!
//! [`mock::MockAgent`] is an in-process runtime with scriptable outcomes,
//! used for development and throughout the test suites.

pub mod error;
pub mod events;
pub mod mock;
pub mod types;

pub use error::AgentError;
pub use events::{EventBus, Subscription, SubscriptionId};
pub use mock::MockAgent;
pub use types::{
    AttributeRestriction, ConnectionRecord, ConnectionState, ConnectionStateChanged,
    CredentialAttribute, CredentialDefinitionTemplate, CredentialExchangeRecord, CredentialOffer,
    DidRecord, EndorserMode, Invitation, ProofExchangeRecord, ProofRequest, ProofState,
    ProofStateChanged, ProtocolVersion, RegistrationOptions, RegistrationState,
    RequestedAttribute, SchemaTemplate,
};

use std::time::Duration;

use async_trait::async_trait;
use faber_core::{ConnectionId, CredentialDefinitionId, OutOfBandId, ProofExchangeId, SchemaId};
use url::Url;

/// Primitives the issuer consumes from its agent runtime.
///
/// Implementations must be `Send + Sync` so they can be shared behind an
/// `Arc`. The trait is object-safe. `unsubscribe` is synchronous so that
/// subscription guards can detach from `Drop`.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    /// Create an out-of-band invitation whose URL lives on `domain`.
    async fn create_invitation(&self, domain: &Url) -> Result<Invitation, AgentError>;

    /// Subscribe to connection state changes.
    fn subscribe_connection_state_changed(&self) -> Subscription<ConnectionStateChanged>;

    /// Subscribe to proof exchange state changes.
    fn subscribe_proof_state_changed(&self) -> Subscription<ProofStateChanged>;

    /// Detach a subscription created by either `subscribe_*` method.
    ///
    /// Once this returns, the subscription's channel receives no further
    /// events. Unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId);

    /// Connections already linked to the given invitation.
    async fn find_connections_by_out_of_band_id(
        &self,
        out_of_band_id: &OutOfBandId,
    ) -> Result<Vec<ConnectionRecord>, AgentError>;

    /// Resolve once the connection's handshake completes.
    ///
    /// # Errors
    ///
    /// [`AgentError::Timeout`] if `timeout` elapses first.
    async fn wait_until_connected(
        &self,
        connection_id: &ConnectionId,
        timeout: Duration,
    ) -> Result<ConnectionRecord, AgentError>;

    /// Publish a schema.
    async fn register_schema(
        &self,
        template: &SchemaTemplate,
        options: &RegistrationOptions,
    ) -> Result<RegistrationState<SchemaId>, AgentError>;

    /// Publish a credential definition.
    async fn register_credential_definition(
        &self,
        template: &CredentialDefinitionTemplate,
        options: &RegistrationOptions,
    ) -> Result<RegistrationState<CredentialDefinitionId>, AgentError>;

    /// Offer a credential over a connection.
    async fn offer_credential(
        &self,
        offer: &CredentialOffer,
    ) -> Result<CredentialExchangeRecord, AgentError>;

    /// Send a proof request over a connection.
    async fn request_proof(&self, request: &ProofRequest)
        -> Result<ProofExchangeRecord, AgentError>;

    /// Accept a received presentation.
    async fn accept_presentation(
        &self,
        proof_exchange_id: &ProofExchangeId,
    ) -> Result<ProofExchangeRecord, AgentError>;

    /// Send a basic message over a connection.
    async fn send_message(&self, connection_id: &ConnectionId, content: &str)
        -> Result<(), AgentError>;

    /// DIDs of the given method the runtime's wallet already controls.
    async fn created_dids(&self, method: &str) -> Result<Vec<DidRecord>, AgentError>;
}
