//! # Connection Waiter
//!
//! Resolves the issuer's single outstanding invitation to an established
//! connection, exactly once.
//!
//! ## States
//!
//! IDLE → PENDING → LISTENING → MATCHED → CONFIRMING → ESTABLISHED | TIMED_OUT
//!
//! - **Pending**: an invitation was created and recorded as active.
//! - **Listening**: two sources are armed. A connection-state subscription
//!   filtered on the out-of-band id, and a poll for connections already
//!   linked to it (the match may have happened before the listener armed).
//!   The subscription is armed first so no match can slip between the two.
//! - **Matched**: one source produced a connection. The sources are raced
//!   with `select!`, so the loser is dropped, not merely ignored, and the
//!   subscription is released before confirmation starts.
//! - **Confirming**: waiting for the handshake to complete, under its own
//!   deadline.
//!
//! A wait whose future is dropped ends `Failed`. Recording a new invitation
//! retires the previous one: a wait still running for it can no longer
//! change the state or make its connection active.
//!
//! Both deadlines are hard: on expiry the caller gets
//! [`IssuerError::TimedOut`] and nothing is retried. The subscription is
//! owned by a guard, so it is released on every exit path, including the
//! caller dropping the `wait` future.

use std::sync::Arc;
use std::time::Duration;

use faber_agent::{AgentError, AgentRuntime, ConnectionRecord};
use faber_core::OutOfBandId;
use parking_lot::Mutex;

use crate::error::IssuerError;
use crate::guard::SubscriptionGuard;

/// Progress of the current connection wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitState {
    /// No invitation recorded yet.
    Idle,
    /// Invitation recorded, not yet waited on.
    Pending,
    /// Notification and poll armed.
    Listening,
    /// A connection record was matched to the invitation.
    Matched,
    /// Waiting for the handshake to complete.
    Confirming,
    /// Handshake complete (terminal).
    Established,
    /// A deadline elapsed (terminal).
    TimedOut,
    /// The runtime failed during the wait (terminal).
    Failed,
}

impl WaitState {
    /// Whether this state is terminal for the current invitation.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Established | Self::TimedOut | Self::Failed)
    }
}

impl std::fmt::Display for WaitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "IDLE",
            Self::Pending => "PENDING",
            Self::Listening => "LISTENING",
            Self::Matched => "MATCHED",
            Self::Confirming => "CONFIRMING",
            Self::Established => "ESTABLISHED",
            Self::TimedOut => "TIMED_OUT",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Which deadline a timeout belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStage {
    /// Matching the invitation to a connection.
    Match,
    /// Completing the handshake.
    Confirm,
}

impl std::fmt::Display for WaitStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Match => f.write_str("match"),
            Self::Confirm => f.write_str("confirmation"),
        }
    }
}

/// Which source resolved the match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchSource {
    /// A connection-state notification.
    Notification,
    /// The poll for already-linked connections.
    Poll,
}

#[derive(Debug)]
struct Progress {
    /// Bumped by every `begin`; a wait only writes while its generation is current.
    generation: u64,
    active: Option<OutOfBandId>,
    state: WaitState,
    source: Option<MatchSource>,
    established: Option<ConnectionRecord>,
}

/// Waits for the active invitation to become an established connection.
pub struct ConnectionWaiter {
    runtime: Arc<dyn AgentRuntime>,
    match_timeout: Duration,
    confirm_timeout: Duration,
    progress: Mutex<Progress>,
    in_flight: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for ConnectionWaiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionWaiter")
            .field("match_timeout", &self.match_timeout)
            .field("confirm_timeout", &self.confirm_timeout)
            .field("progress", &*self.progress.lock())
            .finish_non_exhaustive()
    }
}

/// Marks a wait `Failed` if its future is dropped before reaching a
/// terminal state.
struct AbandonOnDrop<'a> {
    waiter: &'a ConnectionWaiter,
    generation: u64,
    armed: bool,
}

impl Drop for AbandonOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed && self.waiter.transition(self.generation, WaitState::Failed) {
            tracing::debug!("connection wait abandoned");
        }
    }
}

impl ConnectionWaiter {
    /// Create a waiter with the given match and confirmation deadlines.
    pub fn new(
        runtime: Arc<dyn AgentRuntime>,
        match_timeout: Duration,
        confirm_timeout: Duration,
    ) -> Self {
        Self {
            runtime,
            match_timeout,
            confirm_timeout,
            progress: Mutex::new(Progress {
                generation: 0,
                active: None,
                state: WaitState::Idle,
                source: None,
                established: None,
            }),
            in_flight: tokio::sync::Mutex::new(()),
        }
    }

    /// Record `out_of_band_id` as the active invitation.
    ///
    /// Replaces any previous invitation and retires its connection. A wait
    /// still running for the previous invitation can no longer change the
    /// state.
    pub fn begin(&self, out_of_band_id: OutOfBandId) {
        let mut progress = self.progress.lock();
        tracing::info!(out_of_band_id = %out_of_band_id, "invitation recorded as active");
        progress.generation += 1;
        progress.active = Some(out_of_band_id);
        progress.state = WaitState::Pending;
        progress.source = None;
        progress.established = None;
    }

    /// The active invitation, if any.
    pub fn active_out_of_band_id(&self) -> Option<OutOfBandId> {
        self.progress.lock().active.clone()
    }

    /// Current wait state.
    pub fn state(&self) -> WaitState {
        self.progress.lock().state
    }

    /// Which source resolved the most recent match.
    pub fn match_source(&self) -> Option<MatchSource> {
        self.progress.lock().source
    }

    /// The connection of the active invitation, once established.
    pub fn established_connection(&self) -> Option<ConnectionRecord> {
        let progress = self.progress.lock();
        match progress.state {
            WaitState::Established => progress.established.clone(),
            _ => None,
        }
    }

    /// Apply `state` if `generation` is still current. Returns whether it was applied.
    fn transition(&self, generation: u64, state: WaitState) -> bool {
        self.update(generation, |progress| progress.state = state)
    }

    fn update(&self, generation: u64, apply: impl FnOnce(&mut Progress)) -> bool {
        let mut progress = self.progress.lock();
        if progress.generation != generation {
            return false;
        }
        apply(&mut progress);
        true
    }

    /// Wait for the active invitation to be matched and confirmed.
    ///
    /// # Errors
    ///
    /// - [`IssuerError::MissingConnection`] if no invitation is active, or
    ///   if the invitation was replaced while waiting.
    /// - [`IssuerError::WaitInProgress`] if another wait is running.
    /// - [`IssuerError::TimedOut`] if either deadline elapses.
    /// - [`IssuerError::Agent`] if the runtime fails while confirming.
    pub async fn wait(&self) -> Result<ConnectionRecord, IssuerError> {
        let Ok(_in_flight) = self.in_flight.try_lock() else {
            return Err(IssuerError::WaitInProgress);
        };
        let (generation, out_of_band_id) = {
            let progress = self.progress.lock();
            let active = progress.active.clone().ok_or(IssuerError::MissingConnection)?;
            (progress.generation, active)
        };

        let mut abandon = AbandonOnDrop {
            waiter: self,
            generation,
            armed: true,
        };
        let outcome = match self.await_match(generation, &out_of_band_id).await {
            Ok(connection) => self.confirm(generation, connection).await,
            Err(e) => Err(e),
        };
        abandon.armed = false;

        let connection = outcome?;
        let current = self.update(generation, |progress| {
            progress.established = Some(connection.clone());
        });
        if !current {
            tracing::warn!(
                out_of_band_id = %out_of_band_id,
                connection_id = %connection.id,
                "invitation replaced while waiting; connection not made active"
            );
            return Err(IssuerError::MissingConnection);
        }
        Ok(connection)
    }

    async fn await_match(
        &self,
        generation: u64,
        out_of_band_id: &OutOfBandId,
    ) -> Result<ConnectionRecord, IssuerError> {
        let subscription = self.runtime.subscribe_connection_state_changed();
        let _guard = SubscriptionGuard::new(Arc::clone(&self.runtime), subscription.id);
        let mut events = subscription.events;
        self.transition(generation, WaitState::Listening);
        tracing::debug!(out_of_band_id = %out_of_band_id, "listening for connection");

        let notified = async {
            while let Some(event) = events.recv().await {
                if event.connection.out_of_band_id.as_ref() == Some(out_of_band_id) {
                    return event.connection;
                }
            }
            // Runtime closed the stream; leave it to the poll or the deadline.
            std::future::pending().await
        };

        let polled = async {
            match self
                .runtime
                .find_connections_by_out_of_band_id(out_of_band_id)
                .await
            {
                Ok(connections) => match connections.into_iter().next() {
                    Some(connection) => connection,
                    None => std::future::pending().await,
                },
                Err(e) => {
                    tracing::warn!(
                        out_of_band_id = %out_of_band_id,
                        error = %e,
                        "connection poll failed"
                    );
                    std::future::pending().await
                }
            }
        };

        let race = async {
            tokio::select! {
                biased;
                connection = notified => (connection, MatchSource::Notification),
                connection = polled => (connection, MatchSource::Poll),
            }
        };

        match tokio::time::timeout(self.match_timeout, race).await {
            Ok((connection, source)) => {
                self.update(generation, |progress| {
                    progress.state = WaitState::Matched;
                    progress.source = Some(source);
                });
                tracing::info!(
                    out_of_band_id = %out_of_band_id,
                    connection_id = %connection.id,
                    source = ?source,
                    "invitation matched to connection"
                );
                Ok(connection)
            }
            Err(_) => {
                self.transition(generation, WaitState::TimedOut);
                tracing::warn!(
                    out_of_band_id = %out_of_band_id,
                    after = ?self.match_timeout,
                    "no connection matched the invitation before the deadline"
                );
                Err(IssuerError::TimedOut {
                    stage: WaitStage::Match,
                    after: self.match_timeout,
                })
            }
        }
    }

    async fn confirm(
        &self,
        generation: u64,
        connection: ConnectionRecord,
    ) -> Result<ConnectionRecord, IssuerError> {
        self.transition(generation, WaitState::Confirming);
        let confirmed = tokio::time::timeout(
            self.confirm_timeout,
            self.runtime
                .wait_until_connected(&connection.id, self.confirm_timeout),
        )
        .await;

        match confirmed {
            Ok(Ok(connection)) => {
                self.transition(generation, WaitState::Established);
                tracing::info!(connection_id = %connection.id, "connection established");
                Ok(connection)
            }
            Ok(Err(AgentError::Timeout { .. })) | Err(_) => {
                self.transition(generation, WaitState::TimedOut);
                tracing::warn!(
                    connection_id = %connection.id,
                    after = ?self.confirm_timeout,
                    "connection handshake did not complete before the deadline"
                );
                Err(IssuerError::TimedOut {
                    stage: WaitStage::Confirm,
                    after: self.confirm_timeout,
                })
            }
            Ok(Err(e)) => {
                self.transition(generation, WaitState::Failed);
                tracing::warn!(
                    connection_id = %connection.id,
                    error = %e,
                    "connection confirmation failed"
                );
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faber_agent::{ConnectionState, MockAgent};
    use faber_core::ConnectionId;

    const MATCH: Duration = Duration::from_secs(200);
    const CONFIRM: Duration = Duration::from_secs(2000);

    fn oob(s: &str) -> OutOfBandId {
        OutOfBandId::new(s).unwrap()
    }

    fn conn(s: &str) -> ConnectionId {
        ConnectionId::new(s).unwrap()
    }

    fn waiter_for(agent: &Arc<MockAgent>) -> ConnectionWaiter {
        let runtime: Arc<dyn AgentRuntime> = agent.clone();
        ConnectionWaiter::new(runtime, MATCH, CONFIRM)
    }

    #[tokio::test(start_paused = true)]
    async fn notification_before_poll_resolves_once_with_notification() {
        let agent = Arc::new(MockAgent::new());
        agent.set_poll_delay(Duration::from_secs(10));
        agent.link_connection(&oob("oob-1"), conn("c-poll"), ConnectionState::ResponseSent);
        let waiter = waiter_for(&agent);
        waiter.begin(oob("oob-1"));

        let notifier = Arc::clone(&agent);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            notifier.connect(&oob("oob-1"), conn("c-event"), ConnectionState::ResponseSent);
        });

        let connection = waiter.wait().await.unwrap();
        assert_eq!(connection.id, conn("c-event"));
        assert!(connection.is_ready());
        assert_eq!(waiter.match_source(), Some(MatchSource::Notification));
        assert_eq!(waiter.state(), WaitState::Established);
        assert_eq!(agent.calls().connection_polls, 1);
        assert_eq!(agent.connection_subscribers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn already_linked_connection_is_found_by_poll() {
        let agent = Arc::new(MockAgent::new());
        agent.link_connection(&oob("oob-1"), conn("c-1"), ConnectionState::RequestReceived);
        let waiter = waiter_for(&agent);
        waiter.begin(oob("oob-1"));

        let connection = waiter.wait().await.unwrap();
        assert_eq!(connection.id, conn("c-1"));
        assert_eq!(waiter.match_source(), Some(MatchSource::Poll));
        assert_eq!(agent.connection_subscribers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn events_for_other_invitations_are_ignored() {
        let agent = Arc::new(MockAgent::new());
        let waiter = waiter_for(&agent);
        waiter.begin(oob("oob-1"));

        let notifier = Arc::clone(&agent);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            notifier.connect(&oob("oob-other"), conn("c-other"), ConnectionState::ResponseSent);
            tokio::time::sleep(Duration::from_secs(1)).await;
            notifier.connect(&oob("oob-1"), conn("c-1"), ConnectionState::ResponseSent);
        });

        let connection = waiter.wait().await.unwrap();
        assert_eq!(connection.id, conn("c-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn match_deadline_times_out_and_releases_subscription() {
        let agent = Arc::new(MockAgent::new());
        let waiter = waiter_for(&agent);
        waiter.begin(oob("oob-1"));

        let err = waiter.wait().await.unwrap_err();
        match &err {
            IssuerError::TimedOut { stage, after } => {
                assert_eq!(*stage, WaitStage::Match);
                assert_eq!(*after, MATCH);
            }
            other => panic!("expected match timeout, got {other:?}"),
        }
        assert!(err.is_soft());
        assert_eq!(waiter.state(), WaitState::TimedOut);
        assert_eq!(agent.connection_subscribers(), 0);
        // The handler can no longer fire.
        assert_eq!(
            agent.connect(&oob("oob-1"), conn("c-late"), ConnectionState::ResponseSent),
            0
        );
    }

    #[tokio::test(start_paused = true)]
    async fn confirmation_deadline_times_out() {
        let agent = Arc::new(MockAgent::new());
        agent.link_connection(&oob("oob-1"), conn("c-1"), ConnectionState::ResponseSent);
        agent.set_handshake_completes(false);
        let waiter = waiter_for(&agent);
        waiter.begin(oob("oob-1"));

        let err = waiter.wait().await.unwrap_err();
        assert!(matches!(
            err,
            IssuerError::TimedOut {
                stage: WaitStage::Confirm,
                ..
            }
        ));
        assert_eq!(waiter.state(), WaitState::TimedOut);
        assert_eq!(agent.connection_subscribers(), 0);
    }

    #[tokio::test]
    async fn waiting_without_invitation_is_missing_connection() {
        let agent = Arc::new(MockAgent::new());
        let waiter = waiter_for(&agent);
        assert_eq!(waiter.state(), WaitState::Idle);
        assert!(matches!(
            waiter.wait().await,
            Err(IssuerError::MissingConnection)
        ));
        assert_eq!(agent.connection_subscribers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn only_one_wait_runs_at_a_time() {
        let agent = Arc::new(MockAgent::new());
        let waiter = Arc::new(waiter_for(&agent));
        waiter.begin(oob("oob-1"));

        let first = {
            let waiter = Arc::clone(&waiter);
            tokio::spawn(async move { waiter.wait().await })
        };
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert!(matches!(
            waiter.wait().await,
            Err(IssuerError::WaitInProgress)
        ));
        assert_eq!(agent.connection_subscribers(), 1);

        agent.connect(&oob("oob-1"), conn("c-1"), ConnectionState::ResponseSent);
        let connection = first.await.unwrap().unwrap();
        assert_eq!(connection.id, conn("c-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_wait_releases_subscription() {
        let agent = Arc::new(MockAgent::new());
        let waiter = waiter_for(&agent);
        waiter.begin(oob("oob-1"));

        let outcome = tokio::time::timeout(Duration::from_secs(5), waiter.wait()).await;
        assert!(outcome.is_err());
        assert_eq!(agent.connection_subscribers(), 0);
        assert_eq!(waiter.state(), WaitState::Failed);
        assert!(waiter.state().is_terminal());

        // A fresh wait is allowed once the cancelled one is gone.
        agent.link_connection(&oob("oob-1"), conn("c-1"), ConnectionState::ResponseSent);
        assert!(waiter.wait().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn established_connection_is_kept_until_next_invitation() {
        let agent = Arc::new(MockAgent::new());
        agent.link_connection(&oob("oob-1"), conn("c-1"), ConnectionState::ResponseSent);
        let waiter = waiter_for(&agent);
        waiter.begin(oob("oob-1"));
        assert!(waiter.established_connection().is_none());

        waiter.wait().await.unwrap();
        assert_eq!(
            waiter.established_connection().map(|c| c.id),
            Some(conn("c-1"))
        );

        waiter.begin(oob("oob-2"));
        assert!(waiter.established_connection().is_none());
        assert_eq!(waiter.state(), WaitState::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_wait_leaves_no_established_connection() {
        let agent = Arc::new(MockAgent::new());
        agent.link_connection(&oob("oob-1"), conn("c-1"), ConnectionState::ResponseSent);
        agent.set_handshake_completes(false);
        let waiter = waiter_for(&agent);
        waiter.begin(oob("oob-1"));

        assert!(waiter.wait().await.is_err());
        assert!(waiter.established_connection().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn replaced_invitation_ignores_stale_wait() {
        let agent = Arc::new(MockAgent::new());
        let waiter = Arc::new(waiter_for(&agent));
        waiter.begin(oob("oob-1"));

        let stale = {
            let waiter = Arc::clone(&waiter);
            tokio::spawn(async move { waiter.wait().await })
        };
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(waiter.state(), WaitState::Listening);

        waiter.begin(oob("oob-2"));
        agent.connect(&oob("oob-1"), conn("c-old"), ConnectionState::ResponseSent);

        assert!(matches!(
            stale.await.unwrap(),
            Err(IssuerError::MissingConnection)
        ));
        assert_eq!(waiter.state(), WaitState::Pending);
        assert_eq!(waiter.match_source(), None);
        assert!(waiter.established_connection().is_none());
        assert_eq!(waiter.active_out_of_band_id(), Some(oob("oob-2")));
    }
}
