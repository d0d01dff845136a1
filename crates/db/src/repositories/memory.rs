use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use flowchat_core::domain::graph::{BotId, FlowGraph, NodeId};
use flowchat_core::domain::message::{Message, MessageRole};
use flowchat_core::domain::session::{AgentId, ControlStatus, EscalationLevel, Session, SessionId};

use super::{GraphRepository, MessageRepository, RepositoryError, SessionRepository};

/// In-memory counterparts of the SQL repositories, mirroring the conditional
/// update semantics so engine logic can be tested without a database.
#[derive(Default)]
pub struct InMemorySessionRepository {
    sessions: RwLock<HashMap<String, Session>>,
}

#[async_trait::async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn find_by_id(&self, id: &SessionId) -> Result<Option<Session>, RepositoryError> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(&id.0).cloned())
    }

    async fn find_by_visitor_email(
        &self,
        bot_id: &BotId,
        email: &str,
    ) -> Result<Option<Session>, RepositoryError> {
        let sessions = self.sessions.read().await;
        let mut matches: Vec<&Session> = sessions
            .values()
            .filter(|session| {
                session.bot_id == *bot_id && session.visitor_email.as_deref() == Some(email)
            })
            .collect();
        matches.sort_by_key(|session| session.created_at);
        Ok(matches.last().map(|session| (*session).clone()))
    }

    async fn create(&self, session: &Session) -> Result<(), RepositoryError> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.id.0.clone(), session.clone());
        Ok(())
    }

    async fn set_current_node(
        &self,
        id: &SessionId,
        node: Option<&NodeId>,
    ) -> Result<(), RepositoryError> {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(&id.0) {
            session.current_node_id = node.cloned();
            session.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn set_variable(
        &self,
        id: &SessionId,
        name: &str,
        value: &str,
    ) -> Result<(), RepositoryError> {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(&id.0) {
            session.variables.insert(name.to_string(), value.to_string());
            session.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn set_visitor_email(
        &self,
        id: &SessionId,
        email: &str,
    ) -> Result<(), RepositoryError> {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(&id.0) {
            session.visitor_email = Some(email.to_string());
            session.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn touch_last_message(
        &self,
        id: &SessionId,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(&id.0) {
            session.last_message_at = at;
            session.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn escalate_contact_seen(&self, id: &SessionId) -> Result<bool, RepositoryError> {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(&id.0) {
            if session.escalation == EscalationLevel::Green {
                session.escalation = EscalationLevel::Yellow;
                session.updated_at = Utc::now();
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn flag_attention(&self, id: &SessionId) -> Result<(), RepositoryError> {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(&id.0) {
            session.escalation = EscalationLevel::Red;
            session.requires_attention = true;
            session.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn claim_for_agent(
        &self,
        id: &SessionId,
        agent: &AgentId,
    ) -> Result<bool, RepositoryError> {
        let mut sessions = self.sessions.write().await;
        let Some(session) = sessions.get_mut(&id.0) else {
            return Ok(false);
        };

        let claimable = session.assigned_to.is_none()
            || session.assigned_to.as_ref() == Some(agent)
            || session.control == ControlStatus::Bot;
        if !claimable {
            return Ok(false);
        }

        session.control = ControlStatus::Admin;
        session.assigned_to = Some(agent.clone());
        session.last_assigned_to = Some(agent.clone());
        session.escalation = EscalationLevel::None;
        session.requires_attention = false;
        session.needs_reassignment = false;
        session.updated_at = Utc::now();
        Ok(true)
    }

    async fn assign_if_unassigned(
        &self,
        id: &SessionId,
        agent: &AgentId,
    ) -> Result<bool, RepositoryError> {
        let mut sessions = self.sessions.write().await;
        let Some(session) = sessions.get_mut(&id.0) else {
            return Ok(false);
        };
        if session.assigned_to.is_some() {
            return Ok(false);
        }

        session.control = ControlStatus::Admin;
        session.assigned_to = Some(agent.clone());
        session.last_assigned_to = Some(agent.clone());
        session.updated_at = Utc::now();
        Ok(true)
    }

    async fn transfer(
        &self,
        id: &SessionId,
        from: &AgentId,
        to: &AgentId,
    ) -> Result<bool, RepositoryError> {
        let mut sessions = self.sessions.write().await;
        let Some(session) = sessions.get_mut(&id.0) else {
            return Ok(false);
        };
        if session.assigned_to.as_ref() != Some(from) {
            return Ok(false);
        }

        session.assigned_to = Some(to.clone());
        session.last_assigned_to = Some(to.clone());
        session.needs_reassignment = false;
        session.updated_at = Utc::now();
        Ok(true)
    }

    async fn return_to_bot(
        &self,
        id: &SessionId,
        agent: &AgentId,
    ) -> Result<bool, RepositoryError> {
        let mut sessions = self.sessions.write().await;
        let Some(session) = sessions.get_mut(&id.0) else {
            return Ok(false);
        };
        if session.assigned_to.as_ref() != Some(agent) {
            return Ok(false);
        }

        session.control = ControlStatus::Bot;
        session.assigned_to = None;
        session.escalation = EscalationLevel::Green;
        session.updated_at = Utc::now();
        Ok(true)
    }

    async fn release_assigned_to(&self, agent: &AgentId) -> Result<u64, RepositoryError> {
        let mut sessions = self.sessions.write().await;
        let mut released = 0;
        for session in sessions.values_mut() {
            if session.assigned_to.as_ref() == Some(agent) {
                session.assigned_to = None;
                session.control = ControlStatus::Bot;
                session.needs_reassignment = true;
                session.updated_at = Utc::now();
                released += 1;
            }
        }
        Ok(released)
    }

    async fn release_inactive(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let mut sessions = self.sessions.write().await;
        let mut released = 0;
        for session in sessions.values_mut() {
            if session.control == ControlStatus::Admin && session.last_message_at < cutoff {
                session.assigned_to = None;
                session.control = ControlStatus::Bot;
                session.needs_reassignment = true;
                session.updated_at = Utc::now();
                released += 1;
            }
        }
        Ok(released)
    }
}

#[derive(Default)]
pub struct InMemoryMessageRepository {
    messages: RwLock<Vec<Message>>,
}

#[async_trait::async_trait]
impl MessageRepository for InMemoryMessageRepository {
    async fn append(&self, message: &Message) -> Result<(), RepositoryError> {
        let mut messages = self.messages.write().await;
        messages.push(message.clone());
        Ok(())
    }

    async fn latest_user_message(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<Message>, RepositoryError> {
        let messages = self.messages.read().await;
        Ok(messages
            .iter()
            .enumerate()
            .filter(|(_, message)| {
                message.session_id == *session_id && message.role == MessageRole::User
            })
            .max_by_key(|(index, message)| (message.created_at, *index))
            .map(|(_, message)| message.clone()))
    }

    async fn list_recent(
        &self,
        session_id: &SessionId,
        limit: u32,
    ) -> Result<Vec<Message>, RepositoryError> {
        let messages = self.messages.read().await;
        let mut session_messages: Vec<(usize, &Message)> = messages
            .iter()
            .enumerate()
            .filter(|(_, message)| message.session_id == *session_id)
            .collect();
        session_messages.sort_by_key(|(index, message)| (message.created_at, *index));

        let skip = session_messages.len().saturating_sub(limit as usize);
        Ok(session_messages.into_iter().skip(skip).map(|(_, message)| message.clone()).collect())
    }

    async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let mut messages = self.messages.write().await;
        let before = messages.len();
        messages.retain(|message| message.created_at >= cutoff);
        Ok((before - messages.len()) as u64)
    }
}

#[derive(Default)]
pub struct InMemoryGraphRepository {
    graphs: RwLock<HashMap<String, FlowGraph>>,
}

#[async_trait::async_trait]
impl GraphRepository for InMemoryGraphRepository {
    async fn load_graph(&self, bot_id: &BotId) -> Result<Option<FlowGraph>, RepositoryError> {
        let graphs = self.graphs.read().await;
        Ok(graphs.get(&bot_id.0).cloned())
    }

    async fn save_graph(&self, graph: &FlowGraph) -> Result<(), RepositoryError> {
        let mut graphs = self.graphs.write().await;
        graphs.insert(graph.bot_id().0.clone(), graph.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use flowchat_core::domain::graph::BotId;
    use flowchat_core::domain::message::{Message, MessageRole};
    use flowchat_core::domain::session::{AgentId, CompanyId, Session, SessionId};

    use super::{InMemoryMessageRepository, InMemorySessionRepository};
    use crate::repositories::{MessageRepository, SessionRepository};

    fn sample_session(id: &str) -> Session {
        Session::new(
            SessionId(id.to_string()),
            BotId("bot-1".to_string()),
            CompanyId("co-1".to_string()),
        )
    }

    #[tokio::test]
    async fn in_memory_assignment_mirrors_sql_conflict_semantics() {
        let repo = InMemorySessionRepository::default();
        let session = sample_session("s-1");
        repo.create(&session).await.expect("create");

        assert!(repo
            .assign_if_unassigned(&session.id, &AgentId("a".to_string()))
            .await
            .expect("assign"));
        assert!(!repo
            .assign_if_unassigned(&session.id, &AgentId("b".to_string()))
            .await
            .expect("conflicting assign"));

        let found = repo.find_by_id(&session.id).await.expect("find").expect("exists");
        assert_eq!(found.assigned_to, Some(AgentId("a".to_string())));
    }

    #[tokio::test]
    async fn in_memory_release_is_idempotent() {
        let repo = InMemorySessionRepository::default();
        let session = sample_session("s-2");
        repo.create(&session).await.expect("create");
        let agent = AgentId("a".to_string());

        assert!(repo.claim_for_agent(&session.id, &agent).await.expect("claim"));
        assert_eq!(repo.release_assigned_to(&agent).await.expect("release"), 1);
        assert_eq!(repo.release_assigned_to(&agent).await.expect("release again"), 0);
    }

    #[tokio::test]
    async fn in_memory_messages_order_and_prune() {
        let repo = InMemoryMessageRepository::default();
        let session_id = SessionId("s-3".to_string());
        let base = Utc::now();

        for (offset, text) in [(0, "first"), (1, "second"), (2, "third")] {
            let mut message = Message::new(session_id.clone(), MessageRole::User, text);
            message.created_at = base + Duration::seconds(offset);
            repo.append(&message).await.expect("append");
        }

        let recent = repo.list_recent(&session_id, 2).await.expect("list");
        let texts: Vec<&str> = recent.iter().map(|message| message.text.as_str()).collect();
        assert_eq!(texts, vec!["second", "third"]);

        let latest = repo
            .latest_user_message(&session_id)
            .await
            .expect("latest")
            .expect("messages exist");
        assert_eq!(latest.text, "third");

        let pruned = repo.prune_older_than(base + Duration::seconds(1)).await.expect("prune");
        assert_eq!(pruned, 1);
    }
}
