pub mod http;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use flowchat_core::domain::graph::AiNodeConfig;

pub use http::HttpResponder;

/// Fixed reply substituted whenever the responder fails, times out, or
/// produces neither text nor an action. The end-user must always receive an
/// outbound signal.
pub const FALLBACK_REPLY: &str =
    "I'm sorry, I encountered an error. Please try again or ask for a human agent.";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AiRequest {
    pub bot_id: String,
    pub session_id: String,
    pub user_query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_node_data: Option<AiNodeConfig>,
    pub user_details: BTreeMap<String, String>,
}

/// Intent actions the engine interprets. The responder also emits
/// bookkeeping actions (`contact_updated`, `gibberish`, ...) the engine has
/// no use for; those decode to `None`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AiAction {
    AgentRequest,
    Scheduler,
}

impl AiAction {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "agent_request" => Some(Self::AgentRequest),
            "scheduler" => Some(Self::Scheduler),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AiReply {
    pub full_text: String,
    pub clean_text: String,
    pub action: Option<AiAction>,
}

impl AiReply {
    /// Whether the responder produced any outbound signal at all.
    pub fn is_empty(&self) -> bool {
        self.clean_text.trim().is_empty() && self.action.is_none()
    }

    pub fn fallback() -> Self {
        Self {
            full_text: FALLBACK_REPLY.to_string(),
            clean_text: FALLBACK_REPLY.to_string(),
            action: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AiReplyWire {
    #[serde(default)]
    pub full_text: String,
    #[serde(default)]
    pub clean_text: String,
    #[serde(default)]
    pub action: Option<String>,
}

impl From<AiReplyWire> for AiReply {
    fn from(wire: AiReplyWire) -> Self {
        let action = wire.action.as_deref().and_then(AiAction::parse);
        Self { full_text: wire.full_text, clean_text: wire.clean_text, action }
    }
}

#[derive(Debug, Error)]
pub enum ResponderError {
    #[error("responder endpoint is invalid: {0}")]
    Endpoint(String),
    #[error("responder request failed: {0}")]
    Transport(String),
    #[error("responder returned status {status}")]
    Status { status: u16 },
    #[error("responder returned a malformed payload: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait AiResponder: Send + Sync {
    async fn respond(&self, request: AiRequest) -> Result<AiReply, ResponderError>;
}

#[cfg(test)]
mod tests {
    use super::{AiAction, AiReply, AiReplyWire, FALLBACK_REPLY};

    #[test]
    fn known_actions_parse_and_unknown_actions_decode_to_none() {
        assert_eq!(AiAction::parse("agent_request"), Some(AiAction::AgentRequest));
        assert_eq!(AiAction::parse("scheduler"), Some(AiAction::Scheduler));
        assert_eq!(AiAction::parse("contact_updated"), None);
        assert_eq!(AiAction::parse(""), None);
    }

    #[test]
    fn wire_reply_decodes_camel_case_and_maps_action() {
        let wire: AiReplyWire = serde_json::from_str(
            r#"{"fullText":"full [ACTION:X]","cleanText":"full","action":"agent_request"}"#,
        )
        .expect("decode wire reply");
        let reply = AiReply::from(wire);

        assert_eq!(reply.clean_text, "full");
        assert_eq!(reply.action, Some(AiAction::AgentRequest));
        assert!(!reply.is_empty());
    }

    #[test]
    fn missing_fields_default_to_an_empty_reply() {
        let wire: AiReplyWire = serde_json::from_str("{}").expect("decode empty object");
        let reply = AiReply::from(wire);

        assert!(reply.is_empty());
    }

    #[test]
    fn action_only_reply_is_not_empty() {
        let wire: AiReplyWire =
            serde_json::from_str(r#"{"action":"scheduler"}"#).expect("decode action-only");
        let reply = AiReply::from(wire);

        assert!(!reply.is_empty());
        assert_eq!(reply.action, Some(AiAction::Scheduler));
    }

    #[test]
    fn fallback_reply_carries_the_fixed_text() {
        let fallback = AiReply::fallback();
        assert_eq!(fallback.clean_text, FALLBACK_REPLY);
        assert!(fallback.action.is_none());
    }
}
