use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::Mutex;

use flowchat_core::domain::message::Message;
use flowchat_core::domain::session::{CompanyId, ControlStatus, SessionId};

/// Client-side actions the widget knows how to run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientAction {
    Scheduler,
}

impl ClientAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduler => "scheduler",
        }
    }
}

/// Events delivered to the end-user's live connection. `to_wire` produces the
/// widget protocol envelopes: a plain message object for normal replies and
/// tagged envelopes for everything else. Choice lists ride the envelope only;
/// they are never persisted with the message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutboundEvent {
    Message(Message),
    ChoicePrompt { message: Message, choices: Vec<String> },
    InvokeAction { action: ClientAction },
    StatusUpdate { status: ControlStatus },
}

impl OutboundEvent {
    pub fn to_wire(&self) -> Value {
        match self {
            Self::Message(message) => message_value(message),
            Self::ChoicePrompt { message, choices } => {
                let mut value = message_value(message);
                if let Value::Object(fields) = &mut value {
                    fields.insert("choices".to_string(), json!(choices));
                }
                json!({ "type": "choice_response", "message": value })
            }
            Self::InvokeAction { action } => {
                json!({ "type": "invoke_action", "payload": { "action": action.as_str() } })
            }
            Self::StatusUpdate { status } => {
                json!({ "type": "statusUpdate", "status": status.as_str() })
            }
        }
    }
}

/// Events fanned out to company observers (the agent dashboard).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ObserverEvent {
    MessageAppended { session_id: SessionId, message: Message },
    SessionUpdated { session_id: SessionId },
    AttentionRequired { session_id: SessionId },
}

impl ObserverEvent {
    pub fn to_wire(&self) -> Value {
        match self {
            Self::MessageAppended { session_id, message } => {
                json!({ "type": "message", "sessionId": session_id.0, "message": message_value(message) })
            }
            Self::SessionUpdated { session_id } => {
                json!({ "type": "sessionUpdate", "sessionId": session_id.0 })
            }
            Self::AttentionRequired { session_id } => {
                json!({ "type": "attentionRequired", "sessionId": session_id.0 })
            }
        }
    }
}

fn message_value(message: &Message) -> Value {
    serde_json::to_value(message).unwrap_or(Value::Null)
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("delivery channel failed: {0}")]
    Send(String),
}

/// Injected connection abstraction: the engine never talks to sockets
/// directly. The server provides an in-memory registry; a scaled deployment
/// can substitute a pub/sub bus without touching the engine.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    async fn send(&self, session_id: &SessionId, event: OutboundEvent) -> Result<(), DeliveryError>;

    async fn broadcast(
        &self,
        company_id: &CompanyId,
        event: ObserverEvent,
    ) -> Result<(), DeliveryError>;
}

#[derive(Default)]
pub struct NoopDelivery;

#[async_trait]
impl DeliveryChannel for NoopDelivery {
    async fn send(
        &self,
        _session_id: &SessionId,
        _event: OutboundEvent,
    ) -> Result<(), DeliveryError> {
        Ok(())
    }

    async fn broadcast(
        &self,
        _company_id: &CompanyId,
        _event: ObserverEvent,
    ) -> Result<(), DeliveryError> {
        Ok(())
    }
}

/// Test double that records everything it is asked to deliver.
#[derive(Default)]
pub struct RecordingDelivery {
    sent: Mutex<Vec<(SessionId, OutboundEvent)>>,
    broadcasts: Mutex<Vec<(CompanyId, ObserverEvent)>>,
}

impl RecordingDelivery {
    pub async fn sent(&self) -> Vec<(SessionId, OutboundEvent)> {
        self.sent.lock().await.clone()
    }

    pub async fn broadcasts(&self) -> Vec<(CompanyId, ObserverEvent)> {
        self.broadcasts.lock().await.clone()
    }

    pub async fn sent_to(&self, session_id: &SessionId) -> Vec<OutboundEvent> {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|(target, _)| target == session_id)
            .map(|(_, event)| event.clone())
            .collect()
    }
}

#[async_trait]
impl DeliveryChannel for RecordingDelivery {
    async fn send(&self, session_id: &SessionId, event: OutboundEvent) -> Result<(), DeliveryError> {
        self.sent.lock().await.push((session_id.clone(), event));
        Ok(())
    }

    async fn broadcast(
        &self,
        company_id: &CompanyId,
        event: ObserverEvent,
    ) -> Result<(), DeliveryError> {
        self.broadcasts.lock().await.push((company_id.clone(), event));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use flowchat_core::domain::message::{Message, MessageRole};
    use flowchat_core::domain::session::{ControlStatus, SessionId};

    use super::{ClientAction, ObserverEvent, OutboundEvent};

    fn message() -> Message {
        Message::new(SessionId("s-1".to_string()), MessageRole::Model, "pick one")
    }

    #[test]
    fn plain_message_serializes_as_the_message_object() {
        let message = message();
        let wire = OutboundEvent::Message(message.clone()).to_wire();

        assert_eq!(wire["sessionId"], "s-1");
        assert_eq!(wire["role"], "model");
        assert!(wire.get("type").is_none());
    }

    #[test]
    fn choice_prompt_wraps_message_with_transient_choices() {
        let wire = OutboundEvent::ChoicePrompt {
            message: message(),
            choices: vec!["A".to_string(), "B".to_string()],
        }
        .to_wire();

        assert_eq!(wire["type"], "choice_response");
        assert_eq!(wire["message"]["choices"][0], "A");
        assert_eq!(wire["message"]["text"], "pick one");
    }

    #[test]
    fn invoke_action_envelope_names_the_client_action() {
        let wire = OutboundEvent::InvokeAction { action: ClientAction::Scheduler }.to_wire();
        assert_eq!(wire["type"], "invoke_action");
        assert_eq!(wire["payload"]["action"], "scheduler");
    }

    #[test]
    fn status_update_envelope_uses_lowercase_status() {
        let wire = OutboundEvent::StatusUpdate { status: ControlStatus::Admin }.to_wire();
        assert_eq!(wire["type"], "statusUpdate");
        assert_eq!(wire["status"], "admin");
    }

    #[test]
    fn observer_events_are_tagged_with_session_id() {
        let wire = ObserverEvent::AttentionRequired { session_id: SessionId("s-9".to_string()) }
            .to_wire();
        assert_eq!(wire["type"], "attentionRequired");
        assert_eq!(wire["sessionId"], "s-9");
    }
}
