//! Background acceptance of presentations on the established connection.

use std::sync::Arc;

use faber_agent::{AgentRuntime, ProofState};
use faber_core::ConnectionId;
use tokio::task::JoinHandle;

use crate::guard::SubscriptionGuard;

/// Accepts every presentation received on one connection.
///
/// The proof subscription is taken when the listener is spawned and is
/// released when the listener stops or is dropped.
#[derive(Debug)]
pub struct ProofAcceptListener {
    connection_id: ConnectionId,
    task: Option<JoinHandle<()>>,
}

impl ProofAcceptListener {
    /// Subscribe to proof state changes and start accepting presentations
    /// for `connection_id`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(runtime: Arc<dyn AgentRuntime>, connection_id: ConnectionId) -> Self {
        let mut subscription = runtime.subscribe_proof_state_changed();
        let guard = SubscriptionGuard::new(runtime.clone(), subscription.id);
        let target = connection_id.clone();

        let task = tokio::spawn(async move {
            let _guard = guard;
            while let Some(event) = subscription.events.recv().await {
                let proof = event.proof;
                if proof.connection_id != target || proof.state != ProofState::PresentationReceived
                {
                    continue;
                }
                match runtime.accept_presentation(&proof.id).await {
                    Ok(_) => {
                        tracing::info!(
                            proof_exchange_id = %proof.id,
                            connection_id = %target,
                            "presentation accepted"
                        );
                    }
                    Err(e) => {
                        tracing::warn!(
                            proof_exchange_id = %proof.id,
                            error = %e,
                            "failed to accept presentation"
                        );
                    }
                }
            }
        });

        tracing::debug!(connection_id = %connection_id, "proof listener started");
        Self {
            connection_id,
            task: Some(task),
        }
    }

    /// The connection whose presentations are accepted.
    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    /// Stop accepting and release the subscription.
    ///
    /// Resolves once the background task has finished, so the subscription
    /// is detached when this returns.
    pub async fn stop(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            // Cancellation is the expected outcome.
            let _ = task.await;
        }
        tracing::debug!(connection_id = %self.connection_id, "proof listener stopped");
    }
}

impl Drop for ProofAcceptListener {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
