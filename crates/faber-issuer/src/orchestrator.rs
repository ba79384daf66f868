//! # Issuance Orchestrator
//!
//! The issuer's public face. Owns one [`ConnectionWaiter`], one
//! [`ResourceRegistrar`] and, once a connection is established, one
//! [`ProofAcceptListener`]. The surrounding application constructs it,
//! calls [`start`](IssuanceOrchestrator::start), drives invitations and
//! issuance, and finally calls [`stop`](IssuanceOrchestrator::stop).
//!
//! Issuance, proof requests and messages only run over the connection that
//! [`setup_connection`](IssuanceOrchestrator::setup_connection) established
//! for the active invitation. A fresh invitation retires it immediately.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use faber_agent::{
    AgentRuntime, AttributeRestriction, ConnectionRecord, CredentialAttribute,
    CredentialExchangeRecord, CredentialOffer, ProofExchangeRecord, ProofRequest,
    ProtocolVersion, RequestedAttribute,
};
use faber_core::IssuerId;
use faber_store::RecordStore;
use parking_lot::{Mutex, RwLock};
use url::Url;

use crate::config::IssuerConfig;
use crate::error::IssuerError;
use crate::listener::ProofAcceptListener;
use crate::registrar::{CredentialDefinition, ResourceRegistrar, SchemaResource};
use crate::waiter::ConnectionWaiter;

/// DID method searched when no issuer DID is configured.
const WALLET_DID_METHOD: &str = "indy";

/// Attribute requested by [`IssuanceOrchestrator::send_proof_request`].
const PROOF_ATTRIBUTE: &str = "name";

const PROOF_REQUEST_NAME: &str = "proof-request";
const PROOF_REQUEST_VERSION: &str = "1.0";

/// Coordinates invitations, connection establishment, registration and
/// issuance for one issuer.
pub struct IssuanceOrchestrator {
    config: IssuerConfig,
    runtime: Arc<dyn AgentRuntime>,
    registrar: ResourceRegistrar,
    waiter: ConnectionWaiter,
    issuer_id: RwLock<Option<IssuerId>>,
    credential_definition: RwLock<Option<CredentialDefinition>>,
    listener: Mutex<Option<ProofAcceptListener>>,
}

impl std::fmt::Debug for IssuanceOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuanceOrchestrator")
            .field("config", &self.config)
            .field("issuer_id", &*self.issuer_id.read())
            .field("waiter", &self.waiter)
            .finish_non_exhaustive()
    }
}

impl IssuanceOrchestrator {
    /// Build an orchestrator. Nothing is registered until [`start`](Self::start).
    pub fn new(
        config: IssuerConfig,
        runtime: Arc<dyn AgentRuntime>,
        store: Arc<dyn RecordStore>,
    ) -> Self {
        let registrar =
            ResourceRegistrar::new(runtime.clone(), store, config.registration_options());
        let waiter = ConnectionWaiter::new(
            runtime.clone(),
            config.connection_match_timeout,
            config.connection_confirm_timeout,
        );
        Self {
            issuer_id: RwLock::new(config.issuer_id.clone()),
            config,
            runtime,
            registrar,
            waiter,
            credential_definition: RwLock::new(None),
            listener: Mutex::new(None),
        }
    }

    /// Build an orchestrator configured from the `FABER_*` environment
    /// variables (see [`IssuerConfig::from_env`]).
    pub fn from_env(
        runtime: Arc<dyn AgentRuntime>,
        store: Arc<dyn RecordStore>,
    ) -> Result<Self, IssuerError> {
        Self::from_lookup(|var| std::env::var(var).ok(), runtime, store)
    }

    /// Build an orchestrator configured through an arbitrary variable lookup.
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
        runtime: Arc<dyn AgentRuntime>,
        store: Arc<dyn RecordStore>,
    ) -> Result<Self, IssuerError> {
        let config = IssuerConfig::from_lookup(lookup)?;
        Ok(Self::new(config, runtime, store))
    }

    /// Resolve the issuer DID, then make sure the schema and version counter
    /// exist. Safe to call more than once.
    ///
    /// # Errors
    ///
    /// - [`IssuerError::IssuerIdMissing`] if no DID is configured and the
    ///   runtime's wallet holds no `indy` DID.
    /// - Any registration or store failure from [`ResourceRegistrar`].
    pub async fn start(&self) -> Result<SchemaResource, IssuerError> {
        let issuer_id = self.resolve_issuer_id().await?;
        tracing::info!(issuer_id = %issuer_id, "starting issuer");

        let schema = self
            .registrar
            .ensure_schema(Some(&issuer_id), &self.config.schema_attributes)
            .await?;
        let counter = self.registrar.ensure_version_counter().await?;
        tracing::info!(
            schema_id = %schema.schema_id,
            version_counter = counter,
            "issuer ready"
        );
        Ok(schema)
    }

    async fn resolve_issuer_id(&self) -> Result<IssuerId, IssuerError> {
        let configured = self.issuer_id.read().clone();
        if let Some(id) = configured {
            return Ok(id);
        }
        let id = self
            .runtime
            .created_dids(WALLET_DID_METHOD)
            .await?
            .into_iter()
            .next()
            .map(|record| record.did)
            .ok_or(IssuerError::IssuerIdMissing)?;
        tracing::debug!(issuer_id = %id, "issuer id taken from wallet");
        *self.issuer_id.write() = Some(id.clone());
        Ok(id)
    }

    /// The issuer DID, once configured or resolved by [`start`](Self::start).
    pub fn issuer_id(&self) -> Option<IssuerId> {
        self.issuer_id.read().clone()
    }

    /// Create an out-of-band invitation on the configured domain and make it
    /// the active invitation. Returns the URL to hand to the holder.
    pub async fn create_invitation(&self) -> Result<Url, IssuerError> {
        let invitation = self
            .runtime
            .create_invitation(&self.config.invitation_domain)
            .await?;
        self.waiter.begin(invitation.out_of_band_id);
        Ok(invitation.url)
    }

    /// Wait for the active invitation to become an established connection,
    /// then start accepting presentations on it.
    ///
    /// # Errors
    ///
    /// See [`ConnectionWaiter::wait`].
    pub async fn setup_connection(&self) -> Result<ConnectionRecord, IssuerError> {
        let connection = self.waiter.wait().await?;

        let listener = ProofAcceptListener::spawn(self.runtime.clone(), connection.id.clone());
        let previous = self.listener.lock().replace(listener);
        if let Some(previous) = previous {
            previous.stop().await;
        }
        Ok(connection)
    }

    /// The connection established for the active invitation.
    ///
    /// Only a wait that reached `Established` for the current invitation
    /// counts; a pending, timed-out or replaced invitation has none.
    fn active_connection(&self) -> Result<ConnectionRecord, IssuerError> {
        self.waiter
            .established_connection()
            .ok_or(IssuerError::MissingConnection)
    }

    /// Register a fresh credential definition and offer a credential
    /// carrying `claims` over the active connection.
    ///
    /// `claims` must name exactly the schema's attributes.
    ///
    /// # Errors
    ///
    /// - [`IssuerError::SchemaNotRegistered`] if [`start`](Self::start) has
    ///   not registered the schema.
    /// - [`IssuerError::InvalidClaims`] if the claims and schema disagree.
    /// - [`IssuerError::MissingConnection`] if no connection is established.
    pub async fn issue_credential(
        &self,
        claims: &BTreeMap<String, String>,
    ) -> Result<CredentialExchangeRecord, IssuerError> {
        let Some(schema) = self.registrar.schema().await? else {
            tracing::warn!("cannot issue a credential before the schema is registered");
            return Err(IssuerError::SchemaNotRegistered);
        };
        check_claims(&schema, claims)?;

        let issuer_id = self.issuer_id();
        let definition = self
            .registrar
            .register_credential_definition(&schema.schema_id, issuer_id.as_ref())
            .await?;
        *self.credential_definition.write() = Some(definition.clone());

        let connection = self.active_connection()?;
        let offer = CredentialOffer {
            connection_id: connection.id.clone(),
            protocol_version: ProtocolVersion::V2,
            credential_definition_id: definition.credential_definition_id.clone(),
            attributes: claims
                .iter()
                .map(|(name, value)| CredentialAttribute {
                    name: name.clone(),
                    value: value.clone(),
                })
                .collect(),
        };
        let exchange = self.runtime.offer_credential(&offer).await?;
        tracing::info!(
            credential_exchange_id = %exchange.id,
            connection_id = %connection.id,
            credential_definition_id = %definition.credential_definition_id,
            "credential offered"
        );
        Ok(exchange)
    }

    /// Ask the connected holder to prove their `name` from a credential
    /// issued under this issuer's schema.
    pub async fn send_proof_request(&self) -> Result<ProofExchangeRecord, IssuerError> {
        let connection = self.active_connection()?;
        let schema = self
            .registrar
            .schema()
            .await?
            .ok_or(IssuerError::SchemaNotRegistered)?;

        let mut requested_attributes = BTreeMap::new();
        requested_attributes.insert(
            PROOF_ATTRIBUTE.to_string(),
            RequestedAttribute {
                name: PROOF_ATTRIBUTE.to_string(),
                restrictions: vec![AttributeRestriction {
                    schema_id: Some(schema.schema_id.clone()),
                    ..Default::default()
                }],
            },
        );
        let request = ProofRequest {
            connection_id: connection.id.clone(),
            protocol_version: ProtocolVersion::V2,
            name: PROOF_REQUEST_NAME.to_string(),
            version: PROOF_REQUEST_VERSION.to_string(),
            requested_attributes,
        };

        let receipt = self.runtime.request_proof(&request).await?;
        tracing::info!(
            proof_exchange_id = %receipt.id,
            connection_id = %connection.id,
            schema_id = %schema.schema_id,
            "proof requested"
        );
        Ok(receipt)
    }

    /// Send a basic message over the active connection.
    pub async fn send_message(&self, text: &str) -> Result<(), IssuerError> {
        let connection = self.active_connection()?;
        self.runtime.send_message(&connection.id, text).await?;
        tracing::debug!(connection_id = %connection.id, "message sent");
        Ok(())
    }

    /// Stop accepting presentations and release the proof subscription.
    pub async fn stop(&self) {
        let listener = self.listener.lock().take();
        if let Some(listener) = listener {
            listener.stop().await;
        }
        tracing::info!("issuer stopped");
    }

    /// The credential definition registered most recently by this instance.
    pub fn credential_definition(&self) -> Option<CredentialDefinition> {
        self.credential_definition.read().clone()
    }

    /// The connection waiter, for inspecting wait progress.
    pub fn waiter(&self) -> &ConnectionWaiter {
        &self.waiter
    }

    /// The resource registrar, for reading the persisted schema and counter.
    pub fn registrar(&self) -> &ResourceRegistrar {
        &self.registrar
    }
}

fn check_claims(
    schema: &SchemaResource,
    claims: &BTreeMap<String, String>,
) -> Result<(), IssuerError> {
    let expected: BTreeSet<&str> = schema.attr_names.iter().map(String::as_str).collect();
    let supplied: BTreeSet<&str> = claims.keys().map(String::as_str).collect();
    if expected == supplied {
        return Ok(());
    }
    Err(IssuerError::InvalidClaims {
        missing: expected.difference(&supplied).map(|s| s.to_string()).collect(),
        unexpected: supplied.difference(&expected).map(|s| s.to_string()).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use faber_agent::{ConnectionState, MockAgent, ProofState};
    use faber_core::ConnectionId;
    use faber_store::InMemoryRecordStore;

    fn issuer() -> IssuerId {
        IssuerId::new("did:indy:abc").unwrap()
    }

    fn config(issuer_id: Option<IssuerId>) -> IssuerConfig {
        let mut config = IssuerConfig::new(Url::parse("https://issuer.example.org").unwrap());
        config.issuer_id = issuer_id;
        config.connection_match_timeout = Duration::from_secs(5);
        config.connection_confirm_timeout = Duration::from_secs(5);
        config
    }

    fn orchestrator(agent: &Arc<MockAgent>, issuer_id: Option<IssuerId>) -> IssuanceOrchestrator {
        IssuanceOrchestrator::new(
            config(issuer_id),
            agent.clone(),
            Arc::new(InMemoryRecordStore::new()),
        )
    }

    fn claims() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("name".to_string(), "Alice".to_string()),
            ("email".to_string(), "alice@example.org".to_string()),
        ])
    }

    /// Start, invite, and connect through the poll path.
    async fn connected(agent: &Arc<MockAgent>) -> IssuanceOrchestrator {
        let orchestrator = orchestrator(agent, Some(issuer()));
        orchestrator.start().await.unwrap();
        orchestrator.create_invitation().await.unwrap();
        let oob = orchestrator.waiter().active_out_of_band_id().unwrap();
        agent.link_connection(
            &oob,
            ConnectionId::new("conn-1").unwrap(),
            ConnectionState::ResponseSent,
        );
        orchestrator.setup_connection().await.unwrap();
        orchestrator
    }

    #[tokio::test]
    async fn start_registers_schema_and_counter_once() {
        let agent = Arc::new(MockAgent::new());
        let orchestrator = orchestrator(&agent, Some(issuer()));

        let first = orchestrator.start().await.unwrap();
        let second = orchestrator.start().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.issuer_id, issuer());
        assert_eq!(first.attr_names, vec!["name", "email"]);
        assert_eq!(agent.calls().schemas.len(), 1);
        assert_eq!(orchestrator.registrar().version_counter().await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn start_falls_back_to_wallet_did() {
        let agent = Arc::new(MockAgent::new().with_did(IssuerId::new("did:indy:wallet").unwrap()));
        let orchestrator = orchestrator(&agent, None);

        orchestrator.start().await.unwrap();

        assert_eq!(orchestrator.issuer_id().unwrap().as_str(), "did:indy:wallet");
    }

    #[tokio::test]
    async fn start_without_any_did_fails() {
        let agent = Arc::new(MockAgent::new().with_did(IssuerId::new("did:key:z6Mk").unwrap()));
        let orchestrator = orchestrator(&agent, None);

        let err = orchestrator.start().await.unwrap_err();
        assert!(matches!(err, IssuerError::IssuerIdMissing));
        assert!(agent.calls().schemas.is_empty());
    }

    #[tokio::test]
    async fn invitation_url_uses_configured_domain() {
        let agent = Arc::new(MockAgent::new());
        let orchestrator = orchestrator(&agent, Some(issuer()));

        let url = orchestrator.create_invitation().await.unwrap();

        assert_eq!(url.host_str(), Some("issuer.example.org"));
        assert_eq!(
            orchestrator.waiter().active_out_of_band_id(),
            agent.calls().invitations.last().cloned()
        );
    }

    #[tokio::test]
    async fn issuing_before_start_is_soft_schema_failure() {
        let agent = Arc::new(MockAgent::new());
        let orchestrator = orchestrator(&agent, Some(issuer()));

        let err = orchestrator.issue_credential(&claims()).await.unwrap_err();

        assert!(matches!(err, IssuerError::SchemaNotRegistered));
        assert!(err.is_soft());
        assert!(agent.calls().credential_definitions.is_empty());
    }

    #[tokio::test]
    async fn issuing_without_connection_is_missing_connection() {
        let agent = Arc::new(MockAgent::new());
        let orchestrator = orchestrator(&agent, Some(issuer()));
        orchestrator.start().await.unwrap();

        let err = orchestrator.issue_credential(&claims()).await.unwrap_err();

        assert!(matches!(err, IssuerError::MissingConnection));
        assert!(agent.calls().offers.is_empty());
    }

    #[tokio::test]
    async fn claims_must_match_schema() {
        let agent = Arc::new(MockAgent::new());
        let orchestrator = connected(&agent).await;
        let claims = BTreeMap::from([
            ("name".to_string(), "Alice".to_string()),
            ("age".to_string(), "30".to_string()),
        ]);

        let err = orchestrator.issue_credential(&claims).await.unwrap_err();

        match err {
            IssuerError::InvalidClaims { missing, unexpected } => {
                assert_eq!(missing, vec!["email"]);
                assert_eq!(unexpected, vec!["age"]);
            }
            other => panic!("expected InvalidClaims, got {other:?}"),
        }
        assert!(agent.calls().credential_definitions.is_empty());
        orchestrator.stop().await;
    }

    #[tokio::test]
    async fn credential_is_offered_under_a_fresh_definition() {
        let agent = Arc::new(MockAgent::new());
        let orchestrator = connected(&agent).await;

        let first = orchestrator.issue_credential(&claims()).await.unwrap();
        let second = orchestrator.issue_credential(&claims()).await.unwrap();

        let calls = agent.calls();
        assert_eq!(calls.offers.len(), 2);
        assert_eq!(calls.offers[0].protocol_version, ProtocolVersion::V2);
        assert_eq!(calls.offers[0].attributes.len(), 2);
        assert_eq!(calls.offers[0].connection_id.as_str(), "conn-1");
        assert_ne!(first.credential_definition_id, second.credential_definition_id);
        let tags: Vec<_> = calls.credential_definitions.iter().map(|t| t.tag.as_str()).collect();
        assert_eq!(tags, vec!["0", "1"]);
        assert_eq!(
            orchestrator.credential_definition().map(|d| d.tag),
            Some("1".to_string())
        );
        orchestrator.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn proof_request_is_restricted_to_schema_and_accepted() {
        let agent = Arc::new(MockAgent::new());
        let orchestrator = connected(&agent).await;
        let schema = orchestrator.registrar().schema().await.unwrap().unwrap();

        let receipt = orchestrator.send_proof_request().await.unwrap();

        let request = agent.calls().proof_requests.pop().unwrap();
        assert_eq!(request.name, "proof-request");
        assert_eq!(request.version, "1.0");
        let attribute = &request.requested_attributes["name"];
        assert_eq!(attribute.name, "name");
        assert_eq!(attribute.restrictions[0].schema_id, Some(schema.schema_id));

        agent.receive_presentation(&receipt.id);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(agent.proof_state(&receipt.id), Some(ProofState::Done));
        orchestrator.stop().await;
    }

    #[tokio::test]
    async fn messages_need_a_connection() {
        let agent = Arc::new(MockAgent::new());
        let idle = orchestrator(&agent, Some(issuer()));
        assert!(matches!(
            idle.send_message("hello").await,
            Err(IssuerError::MissingConnection)
        ));
        assert!(matches!(
            idle.send_proof_request().await,
            Err(IssuerError::MissingConnection)
        ));

        let orchestrator = connected(&agent).await;
        orchestrator.send_message("hello").await.unwrap();
        assert_eq!(
            agent.calls().messages,
            vec![(ConnectionId::new("conn-1").unwrap(), "hello".to_string())]
        );
        orchestrator.stop().await;
    }

    #[tokio::test]
    async fn new_invitation_retires_previous_connection() {
        let agent = Arc::new(MockAgent::new());
        let orchestrator = connected(&agent).await;

        orchestrator.create_invitation().await.unwrap();

        assert!(matches!(
            orchestrator.send_message("hello").await,
            Err(IssuerError::MissingConnection)
        ));
        orchestrator.stop().await;
    }

    #[tokio::test]
    async fn stop_releases_proof_subscription() {
        let agent = Arc::new(MockAgent::new());
        let orchestrator = connected(&agent).await;
        assert_eq!(agent.proof_subscribers(), 1);

        orchestrator.stop().await;

        assert_eq!(agent.proof_subscribers(), 0);
        assert_eq!(agent.connection_subscribers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unconfirmed_connection_is_never_used() {
        let agent = Arc::new(MockAgent::new());
        agent.set_handshake_completes(false);
        let orchestrator = orchestrator(&agent, Some(issuer()));
        orchestrator.start().await.unwrap();
        orchestrator.create_invitation().await.unwrap();
        let oob = orchestrator.waiter().active_out_of_band_id().unwrap();
        agent.link_connection(
            &oob,
            ConnectionId::new("conn-slow").unwrap(),
            ConnectionState::RequestReceived,
        );

        let err = orchestrator.setup_connection().await.unwrap_err();
        assert!(matches!(err, IssuerError::TimedOut { .. }));

        assert!(matches!(
            orchestrator.issue_credential(&claims()).await,
            Err(IssuerError::MissingConnection)
        ));
        assert!(matches!(
            orchestrator.send_message("hello").await,
            Err(IssuerError::MissingConnection)
        ));
        let calls = agent.calls();
        assert!(calls.offers.is_empty());
        assert!(calls.messages.is_empty());
    }

    #[tokio::test]
    async fn linked_but_unawaited_connection_is_never_used() {
        let agent = Arc::new(MockAgent::new());
        let orchestrator = orchestrator(&agent, Some(issuer()));
        orchestrator.start().await.unwrap();
        orchestrator.create_invitation().await.unwrap();
        let oob = orchestrator.waiter().active_out_of_band_id().unwrap();
        agent.link_connection(
            &oob,
            ConnectionId::new("conn-raw").unwrap(),
            ConnectionState::Completed,
        );

        assert!(matches!(
            orchestrator.send_proof_request().await,
            Err(IssuerError::MissingConnection)
        ));
        assert!(agent.calls().proof_requests.is_empty());
    }

    #[tokio::test]
    async fn configuration_errors_surface_as_issuer_errors() {
        let agent = Arc::new(MockAgent::new());
        let missing = IssuanceOrchestrator::from_lookup(
            |_| None,
            agent.clone(),
            Arc::new(InMemoryRecordStore::new()),
        );
        assert!(matches!(
            missing,
            Err(IssuerError::Config(crate::config::ConfigError::MissingVar(
                "FABER_INVITATION_DOMAIN"
            )))
        ));

        let configured = IssuanceOrchestrator::from_lookup(
            |var| match var {
                "FABER_INVITATION_DOMAIN" => Some("https://issuer.example.org".to_string()),
                "FABER_ISSUER_DID" => Some("did:indy:abc".to_string()),
                _ => None,
            },
            agent.clone(),
            Arc::new(InMemoryRecordStore::new()),
        )
        .unwrap();
        assert_eq!(configured.issuer_id(), Some(issuer()));
    }
}
