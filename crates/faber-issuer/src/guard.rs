//! Subscription ownership.

use std::sync::Arc;

use faber_agent::{AgentRuntime, SubscriptionId};

/// Owns a runtime subscription and detaches it when dropped.
///
/// Dropping covers every exit path: success, timeout, error, panic, and
/// cancellation of the future or task holding the guard.
pub(crate) struct SubscriptionGuard {
    runtime: Arc<dyn AgentRuntime>,
    id: SubscriptionId,
}

impl SubscriptionGuard {
    pub(crate) fn new(runtime: Arc<dyn AgentRuntime>, id: SubscriptionId) -> Self {
        Self { runtime, id }
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.runtime.unsubscribe(self.id);
        tracing::debug!(subscription = %self.id, "subscription released");
    }
}
