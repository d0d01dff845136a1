use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use flowchat_core::domain::session::{CompanyId, SessionId};
use flowchat_engine::delivery::{DeliveryChannel, DeliveryError, ObserverEvent, OutboundEvent};

/// Single-process connection registry backing the delivery channel: one
/// sender per end-user session plus a fanout list per company dashboard.
/// Sending to a session with no live connection is not an error; the client
/// catches up from message history on reconnect. A horizontally-scaled
/// deployment swaps this for a pub/sub bus behind the same trait.
#[derive(Default)]
pub struct InMemoryConnectionRegistry {
    sessions: RwLock<HashMap<String, mpsc::UnboundedSender<Value>>>,
    observers: RwLock<HashMap<String, Vec<mpsc::UnboundedSender<Value>>>>,
}

impl InMemoryConnectionRegistry {
    /// Attach (or replace) the live connection for a session.
    pub async fn register_session(
        &self,
        session_id: &SessionId,
    ) -> mpsc::UnboundedReceiver<Value> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.sessions.write().await.insert(session_id.0.clone(), sender);
        receiver
    }

    pub async fn disconnect_session(&self, session_id: &SessionId) {
        self.sessions.write().await.remove(&session_id.0);
    }

    /// Attach a company observer (agent dashboard) connection.
    pub async fn register_observer(
        &self,
        company_id: &CompanyId,
    ) -> mpsc::UnboundedReceiver<Value> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.observers.write().await.entry(company_id.0.clone()).or_default().push(sender);
        receiver
    }

    pub async fn session_connection_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[async_trait]
impl DeliveryChannel for InMemoryConnectionRegistry {
    async fn send(&self, session_id: &SessionId, event: OutboundEvent) -> Result<(), DeliveryError> {
        let wire = event.to_wire();

        let stale = {
            let sessions = self.sessions.read().await;
            match sessions.get(&session_id.0) {
                Some(sender) => sender.send(wire).is_err(),
                None => {
                    debug!(
                        event_name = "registry.no_connection",
                        session_id = %session_id.0,
                        "no live connection for session; event dropped"
                    );
                    false
                }
            }
        };

        if stale {
            self.sessions.write().await.remove(&session_id.0);
        }
        Ok(())
    }

    async fn broadcast(
        &self,
        company_id: &CompanyId,
        event: ObserverEvent,
    ) -> Result<(), DeliveryError> {
        let wire = event.to_wire();
        let mut observers = self.observers.write().await;
        if let Some(connections) = observers.get_mut(&company_id.0) {
            connections.retain(|sender| sender.send(wire.clone()).is_ok());
            if connections.is_empty() {
                observers.remove(&company_id.0);
            }
        }
        Ok(())
    }
}
