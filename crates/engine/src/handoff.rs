use std::sync::Arc;

use tracing::{info, warn};

use flowchat_core::domain::message::{Message, MessageRole};
use flowchat_core::domain::session::{AgentId, ControlStatus, Session, SessionId};
use flowchat_db::repositories::{MessageRepository, RepositoryError, SessionRepository};
use thiserror::Error;

use crate::delivery::{DeliveryChannel, ObserverEvent, OutboundEvent};

#[derive(Debug, Error)]
pub enum HandoffError {
    #[error("session `{0}` not found")]
    SessionNotFound(String),
    #[error("session `{0}` is already assigned to another agent")]
    AlreadyAssigned(String),
    #[error("agent `{agent}` is not the assignee of session `{session}`")]
    NotAssignee { session: String, agent: String },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Arbitrates control of a session between the bot and human agents. Every
/// transition goes through the repository's conditional updates, so two
/// agents racing for the same session resolve to exactly one winner and the
/// loser gets an explicit conflict.
pub struct HandoffService {
    sessions: Arc<dyn SessionRepository>,
    messages: Arc<dyn MessageRepository>,
    delivery: Arc<dyn DeliveryChannel>,
}

impl HandoffService {
    pub fn new(
        sessions: Arc<dyn SessionRepository>,
        messages: Arc<dyn MessageRepository>,
        delivery: Arc<dyn DeliveryChannel>,
    ) -> Self {
        Self { sessions, messages, delivery }
    }

    /// An agent reply. The first message to a bot-controlled or unassigned
    /// session takes it over; afterwards only the assignee may reply.
    pub async fn agent_message(
        &self,
        session_id: &SessionId,
        agent: &AgentId,
        text: &str,
    ) -> Result<(), HandoffError> {
        let session = self.require_session(session_id).await?;

        let owns_conversation =
            session.is_assigned_to(agent) && session.control == ControlStatus::Admin;
        if !owns_conversation {
            let claimable = session.assigned_to.is_none()
                || session.is_assigned_to(agent)
                || session.control == ControlStatus::Bot;
            if !claimable {
                return Err(HandoffError::NotAssignee {
                    session: session_id.0.clone(),
                    agent: agent.0.clone(),
                });
            }

            if !self.sessions.claim_for_agent(session_id, agent).await? {
                return Err(HandoffError::AlreadyAssigned(session_id.0.clone()));
            }

            info!(
                event_name = "handoff.agent_takeover",
                session_id = %session_id.0,
                agent_id = %agent.0,
                "agent took over the conversation"
            );
            self.notify_status(&session, ControlStatus::Admin).await;
        }

        let message = Message::new(session_id.clone(), MessageRole::Admin, text);
        self.messages.append(&message).await?;
        self.sessions.touch_last_message(session_id, message.created_at).await?;

        self.deliver(&session, OutboundEvent::Message(message.clone())).await;
        self.broadcast(
            &session,
            ObserverEvent::MessageAppended { session_id: session_id.clone(), message },
        )
        .await;

        Ok(())
    }

    /// Explicit assignment. Exactly one of two concurrent callers wins; the
    /// loser sees `AlreadyAssigned` rather than silently stealing the session.
    pub async fn assign(
        &self,
        session_id: &SessionId,
        agent: &AgentId,
    ) -> Result<(), HandoffError> {
        let session = self.require_session(session_id).await?;

        if !self.sessions.assign_if_unassigned(session_id, agent).await? {
            return Err(HandoffError::AlreadyAssigned(session_id.0.clone()));
        }

        info!(
            event_name = "handoff.assigned",
            session_id = %session_id.0,
            agent_id = %agent.0,
            "session assigned"
        );
        self.notify_status(&session, ControlStatus::Admin).await;
        Ok(())
    }

    pub async fn transfer(
        &self,
        session_id: &SessionId,
        from: &AgentId,
        to: &AgentId,
    ) -> Result<(), HandoffError> {
        let session = self.require_session(session_id).await?;

        if !self.sessions.transfer(session_id, from, to).await? {
            return Err(HandoffError::NotAssignee {
                session: session_id.0.clone(),
                agent: from.0.clone(),
            });
        }

        info!(
            event_name = "handoff.transferred",
            session_id = %session_id.0,
            from_agent_id = %from.0,
            to_agent_id = %to.0,
            "session transferred"
        );
        self.broadcast(
            &session,
            ObserverEvent::SessionUpdated { session_id: session_id.clone() },
        )
        .await;
        Ok(())
    }

    /// Clean handback: the flow resumes ownership at the quiet escalation
    /// level, distinct from the forced release paths.
    pub async fn return_to_bot(
        &self,
        session_id: &SessionId,
        agent: &AgentId,
    ) -> Result<(), HandoffError> {
        let session = self.require_session(session_id).await?;

        if !self.sessions.return_to_bot(session_id, agent).await? {
            return Err(HandoffError::NotAssignee {
                session: session_id.0.clone(),
                agent: agent.0.clone(),
            });
        }

        info!(
            event_name = "handoff.returned_to_bot",
            session_id = %session_id.0,
            agent_id = %agent.0,
            "session returned to the bot"
        );
        self.notify_status(&session, ControlStatus::Bot).await;
        Ok(())
    }

    /// Forced release after an agent's sockets closed and the grace period
    /// elapsed. Marks every held session for re-triage; safe to repeat.
    pub async fn release_agent(&self, agent: &AgentId) -> Result<u64, HandoffError> {
        let released = self.sessions.release_assigned_to(agent).await?;
        if released > 0 {
            info!(
                event_name = "handoff.agent_released",
                agent_id = %agent.0,
                released,
                "released sessions after agent disconnect"
            );
        }
        Ok(released)
    }

    async fn require_session(&self, session_id: &SessionId) -> Result<Session, HandoffError> {
        self.sessions
            .find_by_id(session_id)
            .await?
            .ok_or_else(|| HandoffError::SessionNotFound(session_id.0.clone()))
    }

    async fn notify_status(&self, session: &Session, status: ControlStatus) {
        self.deliver(session, OutboundEvent::StatusUpdate { status }).await;
        self.broadcast(
            session,
            ObserverEvent::SessionUpdated { session_id: session.id.clone() },
        )
        .await;
    }

    async fn deliver(&self, session: &Session, event: OutboundEvent) {
        if let Err(error) = self.delivery.send(&session.id, event).await {
            warn!(
                event_name = "delivery.send_failed",
                session_id = %session.id.0,
                error = %error,
                "failed to deliver outbound event"
            );
        }
    }

    async fn broadcast(&self, session: &Session, event: ObserverEvent) {
        if let Err(error) = self.delivery.broadcast(&session.company_id, event).await {
            warn!(
                event_name = "delivery.broadcast_failed",
                session_id = %session.id.0,
                company_id = %session.company_id.0,
                error = %error,
                "failed to broadcast observer event"
            );
        }
    }
}
