use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

use flowchat_core::domain::graph::{BotId, FlowGraph, NodeId};
use flowchat_core::domain::message::Message;
use flowchat_core::domain::session::{AgentId, Session, SessionId};

pub mod graph;
pub mod memory;
pub mod message;
pub mod session;

pub use graph::SqlGraphRepository;
pub use memory::{InMemoryGraphRepository, InMemoryMessageRepository, InMemorySessionRepository};
pub use message::SqlMessageRepository;
pub use session::SqlSessionRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Session persistence. The conditional mutations (`claim_for_agent`,
/// `assign_if_unassigned`, `transfer`, `return_to_bot`, the release calls)
/// re-check the current owner inside the UPDATE itself and report whether the
/// change applied; callers must treat `false` as a lost race, not retry
/// blindly. This is the single serialization point for concurrent handlers.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn find_by_id(&self, id: &SessionId) -> Result<Option<Session>, RepositoryError>;

    async fn find_by_visitor_email(
        &self,
        bot_id: &BotId,
        email: &str,
    ) -> Result<Option<Session>, RepositoryError>;

    async fn create(&self, session: &Session) -> Result<(), RepositoryError>;

    async fn set_current_node(
        &self,
        id: &SessionId,
        node: Option<&NodeId>,
    ) -> Result<(), RepositoryError>;

    async fn set_variable(
        &self,
        id: &SessionId,
        name: &str,
        value: &str,
    ) -> Result<(), RepositoryError>;

    async fn set_visitor_email(&self, id: &SessionId, email: &str)
        -> Result<(), RepositoryError>;

    async fn touch_last_message(
        &self,
        id: &SessionId,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    /// GREEN -> YELLOW, only when currently GREEN. Returns whether applied.
    async fn escalate_contact_seen(&self, id: &SessionId) -> Result<bool, RepositoryError>;

    /// Escalate to RED and mark for agent attention. Idempotent.
    async fn flag_attention(&self, id: &SessionId) -> Result<(), RepositoryError>;

    /// Agent takeover on first reply: succeeds when the session is unassigned,
    /// already held by this agent, or still under bot control.
    async fn claim_for_agent(
        &self,
        id: &SessionId,
        agent: &AgentId,
    ) -> Result<bool, RepositoryError>;

    /// Explicit assignment; only succeeds while no agent holds the session.
    async fn assign_if_unassigned(
        &self,
        id: &SessionId,
        agent: &AgentId,
    ) -> Result<bool, RepositoryError>;

    async fn transfer(
        &self,
        id: &SessionId,
        from: &AgentId,
        to: &AgentId,
    ) -> Result<bool, RepositoryError>;

    async fn return_to_bot(
        &self,
        id: &SessionId,
        agent: &AgentId,
    ) -> Result<bool, RepositoryError>;

    /// Release every session held by a disconnected agent. Returns how many
    /// sessions were released; running it again for the same agent is a no-op.
    async fn release_assigned_to(&self, agent: &AgentId) -> Result<u64, RepositoryError>;

    /// Release agent-held sessions whose last message predates the cutoff.
    async fn release_inactive(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn append(&self, message: &Message) -> Result<(), RepositoryError>;

    async fn latest_user_message(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<Message>, RepositoryError>;

    /// The most recent `limit` messages in chronological order.
    async fn list_recent(
        &self,
        session_id: &SessionId,
        limit: u32,
    ) -> Result<Vec<Message>, RepositoryError>;

    async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait GraphRepository: Send + Sync {
    /// The bot's flow graph, or `None` when the bot has no nodes. A non-empty
    /// graph that fails validation surfaces as a decode error.
    async fn load_graph(&self, bot_id: &BotId) -> Result<Option<FlowGraph>, RepositoryError>;

    /// Replace the bot's graph. Graphs are validated at construction, so only
    /// structurally sound graphs reach this call.
    async fn save_graph(&self, graph: &FlowGraph) -> Result<(), RepositoryError>;
}

pub(crate) fn format_timestamp(value: DateTime<Utc>) -> String {
    // Fixed fractional width keeps lexicographic order chronological.
    value.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}
