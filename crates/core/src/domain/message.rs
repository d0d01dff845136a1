use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::session::SessionId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Model,
    Admin,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Model => "model",
            Self::Admin => "admin",
            Self::System => "system",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Self::User),
            "model" => Some(Self::Model),
            "admin" => Some(Self::Admin),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

/// An append-only conversation record. Messages are never mutated after
/// creation; retention sweeps bulk-delete old rows but individual records
/// stay immutable. Serialized form matches the widget wire protocol.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub session_id: SessionId,
    pub role: MessageRole,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(session_id: SessionId, role: MessageRole, text: impl Into<String>) -> Self {
        Self {
            id: MessageId(Uuid::new_v4().to_string()),
            session_id,
            role,
            text: text.into(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Message, MessageRole};
    use crate::domain::session::SessionId;

    #[test]
    fn role_round_trips_through_storage_strings() {
        for role in [MessageRole::User, MessageRole::Model, MessageRole::Admin, MessageRole::System]
        {
            assert_eq!(MessageRole::parse(role.as_str()), Some(role));
        }
        assert_eq!(MessageRole::parse("bot"), None);
    }

    #[test]
    fn wire_serialization_uses_camel_case_fields() {
        let message = Message::new(SessionId("s-1".to_string()), MessageRole::Model, "hello");
        let value = serde_json::to_value(&message).expect("serialize message");

        assert_eq!(value["sessionId"], "s-1");
        assert_eq!(value["role"], "model");
        assert_eq!(value["text"], "hello");
        assert!(value["createdAt"].is_string());
    }
}
