//! # Mock Agent Runtime
//!
//! An in-process [`AgentRuntime`] with scriptable behaviour. Nothing leaves
//! the process: invitations are minted locally, registrations always finish
//! unless a failure has been queued, and connections appear only when the
//! test (or a demo driver) says so.
//!
//! Every call is recorded in [`MockCalls`] so tests can assert on exactly
//! what the issuer asked the runtime to do.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use faber_core::{
    ConnectionId, CredentialDefinitionId, CredentialExchangeId, IdentifierError, IssuerId,
    OutOfBandId, ProofExchangeId, SchemaId,
};
use parking_lot::Mutex;
use url::Url;

use crate::error::AgentError;
use crate::events::{EventBus, Subscription, SubscriptionId};
use crate::types::{
    ConnectionRecord, ConnectionState, ConnectionStateChanged, CredentialDefinitionTemplate,
    CredentialExchangeRecord, CredentialOffer, DidRecord, Invitation, ProofExchangeRecord,
    ProofRequest, ProofState, ProofStateChanged, RegistrationOptions, RegistrationState,
    SchemaTemplate,
};
use crate::AgentRuntime;

/// Everything the issuer asked the mock to do, in call order.
#[derive(Debug, Clone, Default)]
pub struct MockCalls {
    /// Invitations created.
    pub invitations: Vec<OutOfBandId>,
    /// Number of `find_connections_by_out_of_band_id` calls.
    pub connection_polls: usize,
    /// Schema registrations attempted.
    pub schemas: Vec<SchemaTemplate>,
    /// Credential-definition registrations attempted.
    pub credential_definitions: Vec<CredentialDefinitionTemplate>,
    /// Credential offers sent.
    pub offers: Vec<CredentialOffer>,
    /// Proof requests sent.
    pub proof_requests: Vec<ProofRequest>,
    /// Presentations accepted.
    pub accepted_presentations: Vec<ProofExchangeId>,
    /// Basic messages sent.
    pub messages: Vec<(ConnectionId, String)>,
}

#[derive(Debug)]
struct MockState {
    sequence: u64,
    dids: Vec<DidRecord>,
    connections: Vec<ConnectionRecord>,
    proofs: Vec<ProofExchangeRecord>,
    schema_failures: VecDeque<String>,
    credential_definition_failures: VecDeque<String>,
    handshake_completes: bool,
    poll_delay: Option<Duration>,
    registration_delay: Option<Duration>,
    calls: MockCalls,
}

impl MockState {
    fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }
}

/// Scriptable in-process agent runtime.
#[derive(Debug)]
pub struct MockAgent {
    connection_events: EventBus<ConnectionStateChanged>,
    proof_events: EventBus<ProofStateChanged>,
    state: Mutex<MockState>,
}

impl MockAgent {
    /// A runtime with no DIDs, no connections, and handshakes that complete.
    pub fn new() -> Self {
        Self {
            connection_events: EventBus::new(),
            proof_events: EventBus::new(),
            state: Mutex::new(MockState {
                sequence: 0,
                dids: Vec::new(),
                connections: Vec::new(),
                proofs: Vec::new(),
                schema_failures: VecDeque::new(),
                credential_definition_failures: VecDeque::new(),
                handshake_completes: true,
                poll_delay: None,
                registration_delay: None,
                calls: MockCalls::default(),
            }),
        }
    }

    /// Give the wallet a DID.
    pub fn with_did(self, did: IssuerId) -> Self {
        self.state.lock().dids.push(DidRecord { did });
        self
    }

    /// Make the next schema registration fail with `reason`.
    pub fn fail_next_schema(&self, reason: impl Into<String>) {
        self.state.lock().schema_failures.push_back(reason.into());
    }

    /// Make the next credential-definition registration fail with `reason`.
    pub fn fail_next_credential_definition(&self, reason: impl Into<String>) {
        self.state
            .lock()
            .credential_definition_failures
            .push_back(reason.into());
    }

    /// Whether `wait_until_connected` succeeds or runs into its timeout.
    pub fn set_handshake_completes(&self, completes: bool) {
        self.state.lock().handshake_completes = completes;
    }

    /// Delay every connection poll by `delay`.
    pub fn set_poll_delay(&self, delay: Duration) {
        self.state.lock().poll_delay = Some(delay);
    }

    /// Delay every registration call by `delay`.
    pub fn set_registration_delay(&self, delay: Duration) {
        self.state.lock().registration_delay = Some(delay);
    }

    /// Record a connection for `out_of_band_id` without notifying anyone,
    /// as if the match happened before any listener was armed.
    pub fn link_connection(
        &self,
        out_of_band_id: &OutOfBandId,
        connection_id: ConnectionId,
        state: ConnectionState,
    ) -> ConnectionRecord {
        let record = ConnectionRecord {
            id: connection_id,
            out_of_band_id: Some(out_of_band_id.clone()),
            state,
            their_label: None,
        };
        self.upsert_connection(record.clone());
        record
    }

    /// Record a connection and notify connection subscribers.
    ///
    /// Returns how many subscribers received the notification.
    pub fn connect(
        &self,
        out_of_band_id: &OutOfBandId,
        connection_id: ConnectionId,
        state: ConnectionState,
    ) -> usize {
        let record = ConnectionRecord {
            id: connection_id,
            out_of_band_id: Some(out_of_band_id.clone()),
            state,
            their_label: None,
        };
        let previous_state = self.upsert_connection(record.clone());
        self.connection_events.emit(&ConnectionStateChanged {
            connection: record,
            previous_state,
        })
    }

    /// Move a proof exchange to `PresentationReceived` and notify proof
    /// subscribers. Returns how many subscribers received it.
    pub fn receive_presentation(&self, proof_exchange_id: &ProofExchangeId) -> usize {
        let changed = {
            let mut state = self.state.lock();
            state
                .proofs
                .iter_mut()
                .find(|p| &p.id == proof_exchange_id)
                .map(|proof| {
                    let previous_state = Some(proof.state);
                    proof.state = ProofState::PresentationReceived;
                    ProofStateChanged {
                        proof: proof.clone(),
                        previous_state,
                    }
                })
        };
        changed.map_or(0, |event| self.proof_events.emit(&event))
    }

    /// Snapshot of recorded calls.
    pub fn calls(&self) -> MockCalls {
        self.state.lock().calls.clone()
    }

    /// Current state of a proof exchange.
    pub fn proof_state(&self, proof_exchange_id: &ProofExchangeId) -> Option<ProofState> {
        self.state
            .lock()
            .proofs
            .iter()
            .find(|p| &p.id == proof_exchange_id)
            .map(|p| p.state)
    }

    /// Live connection-event subscriptions.
    pub fn connection_subscribers(&self) -> usize {
        self.connection_events.subscriber_count()
    }

    /// Live proof-event subscriptions.
    pub fn proof_subscribers(&self) -> usize {
        self.proof_events.subscriber_count()
    }

    fn upsert_connection(&self, record: ConnectionRecord) -> Option<ConnectionState> {
        let mut state = self.state.lock();
        match state.connections.iter_mut().find(|c| c.id == record.id) {
            Some(existing) => {
                let previous = existing.state;
                *existing = record;
                Some(previous)
            }
            None => {
                state.connections.push(record);
                None
            }
        }
    }
}

impl Default for MockAgent {
    fn default() -> Self {
        Self::new()
    }
}

fn mint<T>(
    ctor: impl FnOnce(String) -> Result<T, IdentifierError>,
    value: String,
) -> Result<T, AgentError> {
    ctor(value).map_err(|e| AgentError::Rejected(e.to_string()))
}

#[async_trait]
impl AgentRuntime for MockAgent {
    async fn create_invitation(&self, domain: &Url) -> Result<Invitation, AgentError> {
        let n = self.state.lock().next_sequence();
        let out_of_band_id = mint(OutOfBandId::new, format!("oob-{n}"))?;
        let mut url = domain.clone();
        url.query_pairs_mut()
            .append_pair("oob", out_of_band_id.as_str());
        self.state.lock().calls.invitations.push(out_of_band_id.clone());
        Ok(Invitation {
            out_of_band_id,
            url,
        })
    }

    fn subscribe_connection_state_changed(&self) -> Subscription<ConnectionStateChanged> {
        self.connection_events.subscribe()
    }

    fn subscribe_proof_state_changed(&self) -> Subscription<ProofStateChanged> {
        self.proof_events.subscribe()
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        if !self.connection_events.unsubscribe(id) {
            self.proof_events.unsubscribe(id);
        }
    }

    async fn find_connections_by_out_of_band_id(
        &self,
        out_of_band_id: &OutOfBandId,
    ) -> Result<Vec<ConnectionRecord>, AgentError> {
        let delay = {
            let mut state = self.state.lock();
            state.calls.connection_polls += 1;
            state.poll_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self
            .state
            .lock()
            .connections
            .iter()
            .filter(|c| c.out_of_band_id.as_ref() == Some(out_of_band_id))
            .cloned()
            .collect())
    }

    async fn wait_until_connected(
        &self,
        connection_id: &ConnectionId,
        timeout: Duration,
    ) -> Result<ConnectionRecord, AgentError> {
        let completed = {
            let mut state = self.state.lock();
            let completes = state.handshake_completes;
            let Some(connection) = state.connections.iter_mut().find(|c| &c.id == connection_id)
            else {
                return Err(AgentError::NotFound(connection_id.to_string()));
            };
            if completes {
                let previous = connection.state;
                connection.state = ConnectionState::Completed;
                Some((connection.clone(), previous))
            } else {
                None
            }
        };

        match completed {
            Some((connection, previous)) => {
                self.connection_events.emit(&ConnectionStateChanged {
                    connection: connection.clone(),
                    previous_state: Some(previous),
                });
                Ok(connection)
            }
            None => {
                tokio::time::sleep(timeout).await;
                Err(AgentError::Timeout {
                    operation: "wait_until_connected",
                    after: timeout,
                })
            }
        }
    }

    async fn register_schema(
        &self,
        template: &SchemaTemplate,
        _options: &RegistrationOptions,
    ) -> Result<RegistrationState<SchemaId>, AgentError> {
        let (failure, delay) = {
            let mut state = self.state.lock();
            state.calls.schemas.push(template.clone());
            (state.schema_failures.pop_front(), state.registration_delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(reason) = failure {
            return Ok(RegistrationState::Failed { reason });
        }
        let schema_id = mint(
            SchemaId::new,
            format!(
                "{}/anoncreds/v0/SCHEMA/{}/{}",
                template.issuer_id, template.name, template.version
            ),
        )?;
        Ok(RegistrationState::Finished(schema_id))
    }

    async fn register_credential_definition(
        &self,
        template: &CredentialDefinitionTemplate,
        _options: &RegistrationOptions,
    ) -> Result<RegistrationState<CredentialDefinitionId>, AgentError> {
        let (failure, delay, n) = {
            let mut state = self.state.lock();
            state.calls.credential_definitions.push(template.clone());
            let n = state.next_sequence();
            (
                state.credential_definition_failures.pop_front(),
                state.registration_delay,
                n,
            )
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(reason) = failure {
            return Ok(RegistrationState::Failed { reason });
        }
        let id = mint(
            CredentialDefinitionId::new,
            format!(
                "{}/anoncreds/v0/CLAIM_DEF/{n}/{}",
                template.issuer_id, template.tag
            ),
        )?;
        Ok(RegistrationState::Finished(id))
    }

    async fn offer_credential(
        &self,
        offer: &CredentialOffer,
    ) -> Result<CredentialExchangeRecord, AgentError> {
        let mut state = self.state.lock();
        if !state.connections.iter().any(|c| c.id == offer.connection_id) {
            return Err(AgentError::NotFound(offer.connection_id.to_string()));
        }
        let n = state.next_sequence();
        state.calls.offers.push(offer.clone());
        Ok(CredentialExchangeRecord {
            id: mint(CredentialExchangeId::new, format!("cred-ex-{n}"))?,
            connection_id: offer.connection_id.clone(),
            credential_definition_id: offer.credential_definition_id.clone(),
        })
    }

    async fn request_proof(
        &self,
        request: &ProofRequest,
    ) -> Result<ProofExchangeRecord, AgentError> {
        let mut state = self.state.lock();
        if !state.connections.iter().any(|c| c.id == request.connection_id) {
            return Err(AgentError::NotFound(request.connection_id.to_string()));
        }
        let n = state.next_sequence();
        let record = ProofExchangeRecord {
            id: mint(ProofExchangeId::new, format!("proof-ex-{n}"))?,
            connection_id: request.connection_id.clone(),
            state: ProofState::RequestSent,
        };
        state.calls.proof_requests.push(request.clone());
        state.proofs.push(record.clone());
        Ok(record)
    }

    async fn accept_presentation(
        &self,
        proof_exchange_id: &ProofExchangeId,
    ) -> Result<ProofExchangeRecord, AgentError> {
        let mut state = self.state.lock();
        let Some(index) = state.proofs.iter().position(|p| &p.id == proof_exchange_id) else {
            return Err(AgentError::NotFound(proof_exchange_id.to_string()));
        };
        if state.proofs[index].state != ProofState::PresentationReceived {
            return Err(AgentError::Rejected(format!(
                "proof exchange {proof_exchange_id} has no presentation to accept"
            )));
        }
        state.proofs[index].state = ProofState::Done;
        state
            .calls
            .accepted_presentations
            .push(proof_exchange_id.clone());
        Ok(state.proofs[index].clone())
    }

    async fn send_message(
        &self,
        connection_id: &ConnectionId,
        content: &str,
    ) -> Result<(), AgentError> {
        let mut state = self.state.lock();
        if !state.connections.iter().any(|c| &c.id == connection_id) {
            return Err(AgentError::NotFound(connection_id.to_string()));
        }
        state
            .calls
            .messages
            .push((connection_id.clone(), content.to_string()));
        Ok(())
    }

    async fn created_dids(&self, method: &str) -> Result<Vec<DidRecord>, AgentError> {
        Ok(self
            .state
            .lock()
            .dids
            .iter()
            .filter(|d| d.did.method() == method)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oob(s: &str) -> OutOfBandId {
        OutOfBandId::new(s).unwrap()
    }

    fn conn(s: &str) -> ConnectionId {
        ConnectionId::new(s).unwrap()
    }

    #[tokio::test]
    async fn invitation_url_carries_out_of_band_id() {
        let agent = MockAgent::new();
        let domain = Url::parse("https://issuer.example.org").unwrap();
        let invitation = agent.create_invitation(&domain).await.unwrap();

        assert_eq!(invitation.url.host_str(), Some("issuer.example.org"));
        assert!(invitation
            .url
            .query_pairs()
            .any(|(k, v)| k == "oob" && v == invitation.out_of_band_id.as_str()));
        assert_eq!(agent.calls().invitations, vec![invitation.out_of_band_id]);
    }

    #[tokio::test]
    async fn linked_connections_are_found_without_notification() {
        let agent = MockAgent::new();
        let mut sub = agent.subscribe_connection_state_changed();
        agent.link_connection(&oob("oob-1"), conn("c-1"), ConnectionState::RequestReceived);

        let found = agent
            .find_connections_by_out_of_band_id(&oob("oob-1"))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, conn("c-1"));
        assert!(sub.events.try_recv().is_err());
        assert_eq!(agent.calls().connection_polls, 1);
    }

    #[tokio::test]
    async fn connect_notifies_subscribers() {
        let agent = MockAgent::new();
        let mut sub = agent.subscribe_connection_state_changed();
        assert_eq!(
            agent.connect(&oob("oob-1"), conn("c-1"), ConnectionState::ResponseSent),
            1
        );
        let event = sub.events.recv().await.unwrap();
        assert_eq!(event.connection.id, conn("c-1"));
        assert_eq!(event.previous_state, None);

        agent.unsubscribe(sub.id);
        assert_eq!(agent.connection_subscribers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_that_never_completes_times_out() {
        let agent = MockAgent::new();
        agent.link_connection(&oob("oob-1"), conn("c-1"), ConnectionState::ResponseSent);
        agent.set_handshake_completes(false);

        let err = agent
            .wait_until_connected(&conn("c-1"), Duration::from_secs(30))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Timeout { .. }));
    }

    #[tokio::test]
    async fn queued_failures_apply_once() {
        let agent = MockAgent::new();
        agent.fail_next_credential_definition("ledger unavailable");
        let template = CredentialDefinitionTemplate {
            schema_id: SchemaId::new("schema-1").unwrap(),
            issuer_id: IssuerId::new("did:indy:abc").unwrap(),
            tag: "0".into(),
        };
        let options = RegistrationOptions::default();

        let first = agent
            .register_credential_definition(&template, &options)
            .await
            .unwrap();
        assert_eq!(
            first,
            RegistrationState::Failed {
                reason: "ledger unavailable".into()
            }
        );
        let second = agent
            .register_credential_definition(&template, &options)
            .await
            .unwrap();
        assert!(matches!(second, RegistrationState::Finished(_)));
        assert_eq!(agent.calls().credential_definitions.len(), 2);
    }

    #[tokio::test]
    async fn presentations_must_be_received_before_acceptance() {
        let agent = MockAgent::new();
        agent.link_connection(&oob("oob-1"), conn("c-1"), ConnectionState::Completed);
        let receipt = agent
            .request_proof(&ProofRequest {
                connection_id: conn("c-1"),
                protocol_version: Default::default(),
                name: "proof-request".into(),
                version: "1.0".into(),
                requested_attributes: Default::default(),
            })
            .await
            .unwrap();

        assert!(agent.accept_presentation(&receipt.id).await.is_err());
        agent.receive_presentation(&receipt.id);
        let accepted = agent.accept_presentation(&receipt.id).await.unwrap();
        assert_eq!(accepted.state, ProofState::Done);
    }
}
