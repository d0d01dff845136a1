use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::graph::{BotId, NodeId};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CompanyId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(pub String);

/// Who currently owns replies for a session: the automated flow or a human
/// agent. While an agent holds control, inbound user messages are persisted
/// and broadcast but never fed to the flow executor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlStatus {
    Bot,
    Admin,
}

impl ControlStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bot => "bot",
            Self::Admin => "admin",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "bot" => Some(Self::Bot),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

/// Escalation level of a conversation. `Green` is the quiet baseline,
/// `Yellow` means contact details were seen, `Red` means a human was
/// requested. `None` applies once an agent has taken over.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EscalationLevel {
    None,
    Green,
    Yellow,
    Red,
}

impl EscalationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Green => "GREEN",
            Self::Yellow => "YELLOW",
            Self::Red => "RED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "NONE" => Some(Self::None),
            "GREEN" => Some(Self::Green),
            "YELLOW" => Some(Self::Yellow),
            "RED" => Some(Self::Red),
            _ => None,
        }
    }
}

/// One end-user conversation. `current_node_id` is the flow checkpoint:
/// `Some` parks the conversation at a node awaiting external input, `None`
/// means the flow is idle or finished. Sessions are created on first contact
/// and never hard-deleted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub id: SessionId,
    pub bot_id: BotId,
    pub company_id: CompanyId,
    pub visitor_email: Option<String>,
    pub current_node_id: Option<NodeId>,
    pub variables: BTreeMap<String, String>,
    pub control: ControlStatus,
    pub escalation: EscalationLevel,
    pub assigned_to: Option<AgentId>,
    pub last_assigned_to: Option<AgentId>,
    pub needs_reassignment: bool,
    pub requires_attention: bool,
    pub last_message_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: SessionId, bot_id: BotId, company_id: CompanyId) -> Self {
        let now = Utc::now();
        Self {
            id,
            bot_id,
            company_id,
            visitor_email: None,
            current_node_id: None,
            variables: BTreeMap::new(),
            control: ControlStatus::Bot,
            escalation: EscalationLevel::Green,
            assigned_to: None,
            last_assigned_to: None,
            needs_reassignment: false,
            requires_attention: false,
            last_message_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_assigned_to(&self, agent: &AgentId) -> bool {
        self.assigned_to.as_ref() == Some(agent)
    }

    /// Identity fields captured so far, forwarded to the AI responder.
    pub fn visitor_details(&self) -> BTreeMap<String, String> {
        let mut details = BTreeMap::new();
        for key in ["name", "email", "phone"] {
            if let Some(value) = self.variables.get(key) {
                if !value.trim().is_empty() {
                    details.insert(key.to_string(), value.clone());
                }
            }
        }
        if let Some(email) = &self.visitor_email {
            details.entry("email".to_string()).or_insert_with(|| email.clone());
        }
        details
    }
}
