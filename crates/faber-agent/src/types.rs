//! # Runtime Wire Types
//!
//! Request and response shapes exchanged with the agent runtime. Field
//! names serialize in the anoncreds/DIDComm casing the runtime expects
//! (`attrNames`, `schema_id`, ...).

use std::collections::BTreeMap;

use faber_core::{
    ConnectionId, CredentialDefinitionId, CredentialExchangeId, IssuerId, OutOfBandId,
    ProofExchangeId, SchemaId,
};
use serde::{Deserialize, Serialize};
use url::Url;

// -- Connections ---------------------------------------------------------------

/// An out-of-band invitation created by the issuer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invitation {
    /// Id the resulting connection will be linked to.
    pub out_of_band_id: OutOfBandId,
    /// Shareable invitation URL on the issuer's public domain.
    pub url: Url,
}

/// DID-exchange state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionState {
    /// Invitation sent, no request yet.
    InvitationSent,
    /// The invitee sent a connection request.
    RequestReceived,
    /// The issuer answered the request.
    ResponseSent,
    /// Handshake complete; messages may flow.
    Completed,
    /// Handshake abandoned by either side.
    Abandoned,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::InvitationSent => "invitation-sent",
            Self::RequestReceived => "request-received",
            Self::ResponseSent => "response-sent",
            Self::Completed => "completed",
            Self::Abandoned => "abandoned",
        };
        f.write_str(s)
    }
}

/// A connection as observed through the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    /// Connection id.
    pub id: ConnectionId,
    /// The invitation this connection was created from, if any.
    pub out_of_band_id: Option<OutOfBandId>,
    /// Current handshake state.
    pub state: ConnectionState,
    /// Label the peer presented.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub their_label: Option<String>,
}

impl ConnectionRecord {
    /// Whether the handshake has completed.
    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Completed
    }
}

/// Notification that a connection changed state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStateChanged {
    /// The connection after the change.
    pub connection: ConnectionRecord,
    /// State before the change (`None` for a newly created record).
    pub previous_state: Option<ConnectionState>,
}

// -- Registration ----------------------------------------------------------------

/// Schema to publish on the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaTemplate {
    /// Schema name.
    pub name: String,
    /// Schema version.
    pub version: String,
    /// Attribute names credentials under this schema carry.
    pub attr_names: Vec<String>,
    /// Publishing issuer.
    pub issuer_id: IssuerId,
}

/// Credential definition to publish on the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialDefinitionTemplate {
    /// Schema the definition is for.
    pub schema_id: SchemaId,
    /// Publishing issuer.
    pub issuer_id: IssuerId,
    /// Tag distinguishing definitions over the same schema.
    pub tag: String,
}

/// Who endorses a ledger write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndorserMode {
    /// The issuer's agent endorses its own write.
    #[default]
    Internal,
    /// The write is handed to an external endorser.
    External,
}

/// Ledger-write options shared by schema and credential-definition registration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationOptions {
    /// Endorsement mode.
    pub endorser_mode: EndorserMode,
    /// Endorser DID, when one is configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endorser_did: Option<String>,
}

/// Terminal or intermediate state reported by a registration call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationState<T> {
    /// Written to the ledger.
    Finished(T),
    /// The runtime gave up, with a reason.
    Failed {
        /// Runtime-provided failure reason.
        reason: String,
    },
    /// The write needs an external action (e.g. endorsement) first.
    Action {
        /// What the runtime is waiting for.
        action: String,
    },
    /// The write is still pending.
    Wait,
}

impl<T> RegistrationState<T> {
    /// The finished value, or the reason registration did not finish.
    ///
    /// Non-terminal states report `"Not Finished"`.
    pub fn into_finished(self) -> Result<T, String> {
        match self {
            Self::Finished(value) => Ok(value),
            Self::Failed { reason } => Err(reason),
            Self::Action { .. } | Self::Wait => Err("Not Finished".to_string()),
        }
    }
}

// -- Issuance ------------------------------------------------------------------

/// Issue-credential protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolVersion {
    /// Version 2 of the issue-credential / present-proof protocols.
    #[default]
    V2,
}

/// One name/value pair in a credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialAttribute {
    /// Attribute name; must be one of the schema's `attrNames`.
    pub name: String,
    /// Attribute value.
    pub value: String,
}

/// A credential offer over an established connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialOffer {
    /// Connection to offer over.
    pub connection_id: ConnectionId,
    /// Protocol version.
    pub protocol_version: ProtocolVersion,
    /// Definition the credential is issued under.
    pub credential_definition_id: CredentialDefinitionId,
    /// Credential attributes.
    pub attributes: Vec<CredentialAttribute>,
}

/// Runtime record of a started credential exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialExchangeRecord {
    /// Exchange id.
    pub id: CredentialExchangeId,
    /// Connection the exchange runs over.
    pub connection_id: ConnectionId,
    /// Definition the offer was made under.
    pub credential_definition_id: CredentialDefinitionId,
}

// -- Proofs --------------------------------------------------------------------

/// Restriction on which credentials may satisfy a requested attribute.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AttributeRestriction {
    /// Credential must be issued under this schema.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_id: Option<SchemaId>,
    /// Credential must be issued under this definition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cred_def_id: Option<CredentialDefinitionId>,
    /// Credential must be issued by this DID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer_did: Option<IssuerId>,
}

/// A single attribute requested in a proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestedAttribute {
    /// Attribute name.
    pub name: String,
    /// Any one restriction must hold.
    pub restrictions: Vec<AttributeRestriction>,
}

/// A proof request over an established connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofRequest {
    /// Connection to request over.
    pub connection_id: ConnectionId,
    /// Protocol version.
    pub protocol_version: ProtocolVersion,
    /// Human-readable request name.
    pub name: String,
    /// Request version.
    pub version: String,
    /// Referent to requested attribute.
    pub requested_attributes: BTreeMap<String, RequestedAttribute>,
}

/// Present-proof state of an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProofState {
    /// Request sent, awaiting presentation.
    RequestSent,
    /// Presentation received, awaiting acceptance.
    PresentationReceived,
    /// Presentation accepted.
    Done,
    /// Exchange abandoned.
    Abandoned,
}

/// Runtime record of a proof exchange (the receipt of `request_proof`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofExchangeRecord {
    /// Exchange id.
    pub id: ProofExchangeId,
    /// Connection the exchange runs over.
    pub connection_id: ConnectionId,
    /// Current state.
    pub state: ProofState,
}

/// Notification that a proof exchange changed state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofStateChanged {
    /// The exchange after the change.
    pub proof: ProofExchangeRecord,
    /// State before the change.
    pub previous_state: Option<ProofState>,
}

// -- DIDs ----------------------------------------------------------------------

/// A DID the runtime's wallet controls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DidRecord {
    /// The DID.
    pub did: IssuerId,
}
