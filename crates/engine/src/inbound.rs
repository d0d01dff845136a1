use std::sync::Arc;

use tracing::{debug, info, warn};

use flowchat_core::contact::{contains_contact_info, extract_email, extract_phone};
use flowchat_core::domain::graph::{handles, BotId, NodeId, NodeKind};
use flowchat_core::domain::message::{Message, MessageRole};
use flowchat_core::domain::session::{CompanyId, ControlStatus, Session, SessionId};
use flowchat_db::repositories::{GraphRepository, MessageRepository, SessionRepository};

use crate::delivery::ObserverEvent;
use crate::executor::FlowExecutor;
use crate::EngineError;

/// Scheduler callbacks arrive as specially-tagged user messages.
pub const BOOKING_CONFIRMED: &str = "__BOOKING_CONFIRMED__";
pub const BOOKING_CANCELLED: &str = "__BOOKING_CANCELLED__";

/// Canned acknowledgement sent when contact details are detected in user
/// text; the flow is bypassed for that turn.
pub const CONTACT_ACK: &str =
    "Thanks for sharing your contact details. Our team will reach out to you shortly.";

#[derive(Clone, Debug)]
pub struct InboundMessage {
    pub session_id: SessionId,
    pub bot_id: BotId,
    pub company_id: CompanyId,
    pub text: String,
    pub visitor_email: Option<String>,
}

#[derive(Clone, Debug)]
pub struct OpenSession {
    pub session_id: SessionId,
    pub bot_id: BotId,
    pub company_id: CompanyId,
    pub visitor_email: Option<String>,
}

/// Routes each inbound event to the right consumer: the handoff-aware
/// broadcast path while an agent owns the session, the parked flow node when
/// one is checkpointed, or an ad-hoc AI turn otherwise. Each call is one
/// short-lived unit of work; state lives in the session row.
pub struct InboundRouter {
    sessions: Arc<dyn SessionRepository>,
    messages: Arc<dyn MessageRepository>,
    graphs: Arc<dyn GraphRepository>,
    executor: FlowExecutor,
}

impl InboundRouter {
    pub fn new(
        sessions: Arc<dyn SessionRepository>,
        messages: Arc<dyn MessageRepository>,
        graphs: Arc<dyn GraphRepository>,
        executor: FlowExecutor,
    ) -> Self {
        Self { sessions, messages, graphs, executor }
    }

    /// First contact (or a reconnect). Creates the session when it is new and
    /// runs the flow from the bot's start node; a resumed session keeps its
    /// checkpoint untouched.
    pub async fn open_session(&self, open: OpenSession) -> Result<(), EngineError> {
        let (session, created) = self
            .load_or_create(&open.session_id, &open.bot_id, &open.company_id, open.visitor_email.as_deref())
            .await?;

        if created {
            info!(
                event_name = "session.opened",
                session_id = %session.id.0,
                bot_id = %session.bot_id.0,
                "new session created; starting flow"
            );
            self.executor.run_from_start(&session).await?;
        } else {
            debug!(
                event_name = "session.resumed",
                session_id = %session.id.0,
                "existing session reopened; checkpoint untouched"
            );
        }

        Ok(())
    }

    pub async fn handle_user_message(&self, inbound: InboundMessage) -> Result<(), EngineError> {
        let (mut session, _created) = self
            .load_or_create(
                &inbound.session_id,
                &inbound.bot_id,
                &inbound.company_id,
                inbound.visitor_email.as_deref(),
            )
            .await?;

        let user_message =
            Message::new(session.id.clone(), MessageRole::User, inbound.text.clone());
        self.messages.append(&user_message).await?;
        self.sessions.touch_last_message(&session.id, user_message.created_at).await?;
        self.executor
            .broadcast(
                &session,
                ObserverEvent::MessageAppended {
                    session_id: session.id.clone(),
                    message: user_message.clone(),
                },
            )
            .await;

        // While an agent owns the session the flow never sees the message.
        if session.control == ControlStatus::Admin {
            return Ok(());
        }

        let text = inbound.text.trim();

        if text == BOOKING_CONFIRMED || text == BOOKING_CANCELLED {
            return self.handle_booking_signal(&session, text).await;
        }

        if contains_contact_info(text) && self.try_contact_escalation(&session, text).await? {
            return Ok(());
        }

        match session.current_node_id.clone() {
            Some(node_id) => self.resume_at(&mut session, &node_id, text).await,
            None => self.ad_hoc_ai_turn(&session, text).await,
        }
    }

    /// REST entry point for the scheduler callback. The signal is recorded as
    /// a specially-tagged user message, then routed like any inbound turn.
    pub async fn booking_callback(
        &self,
        session_id: &SessionId,
        confirmed: bool,
    ) -> Result<(), EngineError> {
        let Some(session) = self.sessions.find_by_id(session_id).await? else {
            return Err(EngineError::SessionNotFound(session_id.0.clone()));
        };

        let signal = if confirmed { BOOKING_CONFIRMED } else { BOOKING_CANCELLED };
        let message = Message::new(session.id.clone(), MessageRole::User, signal);
        self.messages.append(&message).await?;
        self.sessions.touch_last_message(&session.id, message.created_at).await?;

        self.handle_booking_signal(&session, signal).await
    }

    /// The scheduler widget reports the booking outcome; follow the matching
    /// edge from the parked scheduler node.
    async fn handle_booking_signal(
        &self,
        session: &Session,
        signal: &str,
    ) -> Result<(), EngineError> {
        let Some(node_id) = &session.current_node_id else {
            debug!(
                event_name = "flow.booking_signal_ignored",
                session_id = %session.id.0,
                signal,
                "booking signal with no parked node"
            );
            return Ok(());
        };

        let Some(graph) = self.graphs.load_graph(&session.bot_id).await? else {
            warn!(
                event_name = "flow.graph_missing",
                session_id = %session.id.0,
                bot_id = %session.bot_id.0,
                "booking signal for a bot without a graph"
            );
            return Ok(());
        };

        let parked_at_scheduler =
            matches!(graph.node(node_id).map(|node| &node.kind), Some(NodeKind::Scheduler));
        if !parked_at_scheduler {
            debug!(
                event_name = "flow.booking_signal_ignored",
                session_id = %session.id.0,
                node_id = %node_id.0,
                signal,
                "booking signal while not parked at a scheduler node"
            );
            return Ok(());
        }

        let handle =
            if signal == BOOKING_CONFIRMED { handles::ON_CONFIRM } else { handles::ON_CANCEL };
        match graph.edge_from(node_id, Some(handle)) {
            Some(edge) => {
                let target = edge.target.clone();
                self.executor.run_from_node(session, &target).await?;
            }
            None => {
                self.sessions.set_current_node(&session.id, None).await?;
            }
        }
        Ok(())
    }

    /// Contact details seen while the session is quiet: bump the escalation
    /// level once, capture the details, and answer with the canned
    /// acknowledgement instead of running the flow.
    async fn try_contact_escalation(
        &self,
        session: &Session,
        text: &str,
    ) -> Result<bool, EngineError> {
        if !self.sessions.escalate_contact_seen(&session.id).await? {
            return Ok(false);
        }

        if let Some(email) = extract_email(text) {
            self.sessions.set_variable(&session.id, "email", email).await?;
            self.sessions.set_visitor_email(&session.id, email).await?;
        }
        if let Some(phone) = extract_phone(text) {
            self.sessions.set_variable(&session.id, "phone", &phone).await?;
        }

        info!(
            event_name = "session.contact_info_seen",
            session_id = %session.id.0,
            "contact details detected; escalation bumped and flow bypassed"
        );
        self.executor.emit_model_message(session, CONTACT_ACK.to_string()).await?;
        Ok(true)
    }

    /// Resume a parked flow with the newly-arrived user input.
    async fn resume_at(
        &self,
        session: &mut Session,
        node_id: &NodeId,
        text: &str,
    ) -> Result<(), EngineError> {
        let Some(graph) = self.graphs.load_graph(&session.bot_id).await? else {
            warn!(
                event_name = "flow.graph_missing",
                session_id = %session.id.0,
                bot_id = %session.bot_id.0,
                "parked session references a bot without a graph"
            );
            return Ok(());
        };

        let Some(node) = graph.node(node_id) else {
            warn!(
                event_name = "flow.node_missing",
                session_id = %session.id.0,
                node_id = %node_id.0,
                "parked node no longer exists; conversation stalled"
            );
            return Ok(());
        };

        match &node.kind {
            NodeKind::Choice { .. } => {
                let edge = graph
                    .edge_from(node_id, Some(text))
                    .or_else(|| graph.edge_from(node_id, Some(handles::DEFAULT)));
                match edge {
                    Some(edge) => {
                        let target = edge.target.clone();
                        self.executor.run_from_node(session, &target).await?;
                    }
                    None => {
                        debug!(
                            event_name = "flow.choice_unmatched",
                            session_id = %session.id.0,
                            node_id = %node_id.0,
                            "reply matched no option and no default edge; staying parked"
                        );
                    }
                }
                Ok(())
            }
            NodeKind::Input { variable, .. } => {
                self.sessions.set_variable(&session.id, variable, text).await?;
                session.variables.insert(variable.clone(), text.to_string());

                match graph.first_edge_from(node_id) {
                    Some(edge) => {
                        let target = edge.target.clone();
                        self.executor.run_from_node(session, &target).await?;
                    }
                    None => {
                        self.sessions.set_current_node(&session.id, None).await?;
                    }
                }
                Ok(())
            }
            NodeKind::Ai { .. } => {
                // A user turn now exists; re-enter the walk at the ai node.
                self.executor.run_from_node(session, node_id).await?;
                Ok(())
            }
            NodeKind::Scheduler => {
                // Awaiting the booking signal; the flow stays parked but the
                // user still deserves an answer.
                self.ad_hoc_ai_turn(session, text).await
            }
            _ => {
                // Checkpoint left by a crash mid-walk; re-execute from it.
                self.executor.run_from_node(session, node_id).await?;
                Ok(())
            }
        }
    }

    /// Non-flow turn: consult the responder directly and apply its action.
    async fn ad_hoc_ai_turn(&self, session: &Session, text: &str) -> Result<(), EngineError> {
        let reply = self.executor.invoke_responder(session, text, None).await;
        self.executor.emit_reply(session, &reply).await
    }

    async fn load_or_create(
        &self,
        session_id: &SessionId,
        bot_id: &BotId,
        company_id: &CompanyId,
        visitor_email: Option<&str>,
    ) -> Result<(Session, bool), EngineError> {
        if let Some(mut session) = self.sessions.find_by_id(session_id).await? {
            if let Some(email) = visitor_email {
                if session.visitor_email.as_deref() != Some(email) {
                    self.sessions.set_visitor_email(&session.id, email).await?;
                    session.visitor_email = Some(email.to_string());
                }
            }
            return Ok((session, false));
        }

        // Returning visitors resume their previous conversation with the bot.
        if let Some(email) = visitor_email {
            if let Some(session) = self.sessions.find_by_visitor_email(bot_id, email).await? {
                return Ok((session, false));
            }
        }

        let mut session = Session::new(session_id.clone(), bot_id.clone(), company_id.clone());
        session.visitor_email = visitor_email.map(str::to_string);
        self.sessions.create(&session).await?;
        Ok((session, true))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use flowchat_core::config::TenantConfig;
    use flowchat_core::domain::graph::{BotId, NodeId};
    use flowchat_core::domain::message::MessageRole;
    use flowchat_core::domain::session::{CompanyId, ControlStatus, EscalationLevel, SessionId};
    use flowchat_db::fixtures::demo_graph;
    use flowchat_db::repositories::{
        GraphRepository, InMemoryGraphRepository, InMemoryMessageRepository,
        InMemorySessionRepository, MessageRepository, SessionRepository,
    };
    use flowchat_responder::{AiAction, AiReply, AiRequest, AiResponder, ResponderError};

    use super::{InboundMessage, InboundRouter, OpenSession, BOOKING_CONFIRMED, CONTACT_ACK};
    use crate::delivery::{OutboundEvent, RecordingDelivery};
    use crate::executor::FlowExecutor;

    struct ScriptedResponder {
        replies: Mutex<VecDeque<Result<AiReply, ResponderError>>>,
        requests: Mutex<Vec<AiRequest>>,
    }

    impl ScriptedResponder {
        fn with_replies(replies: Vec<Result<AiReply, ResponderError>>) -> Self {
            Self { replies: Mutex::new(replies.into()), requests: Mutex::new(Vec::new()) }
        }

        async fn requests(&self) -> Vec<AiRequest> {
            self.requests.lock().await.clone()
        }
    }

    #[async_trait]
    impl AiResponder for ScriptedResponder {
        async fn respond(&self, request: AiRequest) -> Result<AiReply, ResponderError> {
            self.requests.lock().await.push(request);
            self.replies
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| Err(ResponderError::Transport("script exhausted".to_string())))
        }
    }

    struct Harness {
        sessions: Arc<InMemorySessionRepository>,
        messages: Arc<InMemoryMessageRepository>,
        graphs: Arc<InMemoryGraphRepository>,
        delivery: Arc<RecordingDelivery>,
        responder: Arc<ScriptedResponder>,
        router: InboundRouter,
    }

    async fn harness_with_replies(replies: Vec<Result<AiReply, ResponderError>>) -> Harness {
        let sessions = Arc::new(InMemorySessionRepository::default());
        let messages = Arc::new(InMemoryMessageRepository::default());
        let graphs = Arc::new(InMemoryGraphRepository::default());
        let delivery = Arc::new(RecordingDelivery::default());
        let responder = Arc::new(ScriptedResponder::with_replies(replies));

        graphs.save_graph(&demo_graph(&BotId("bot-1".to_string()))).await.expect("seed graph");

        let executor = FlowExecutor::new(
            graphs.clone(),
            sessions.clone(),
            messages.clone(),
            delivery.clone(),
            responder.clone(),
            TenantConfig::default(),
            64,
        );
        let router =
            InboundRouter::new(sessions.clone(), messages.clone(), graphs.clone(), executor);

        Harness { sessions, messages, graphs, delivery, responder, router }
    }

    async fn harness() -> Harness {
        harness_with_replies(Vec::new()).await
    }

    fn open(session: &str) -> OpenSession {
        OpenSession {
            session_id: SessionId(session.to_string()),
            bot_id: BotId("bot-1".to_string()),
            company_id: CompanyId("co-1".to_string()),
            visitor_email: None,
        }
    }

    fn user_message(session: &str, text: &str) -> InboundMessage {
        InboundMessage {
            session_id: SessionId(session.to_string()),
            bot_id: BotId("bot-1".to_string()),
            company_id: CompanyId("co-1".to_string()),
            text: text.to_string(),
            visitor_email: None,
        }
    }

    fn sent_texts(events: &[OutboundEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|event| match event {
                OutboundEvent::Message(message) => Some(message.text.clone()),
                OutboundEvent::ChoicePrompt { message, .. } => Some(message.text.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn open_session_starts_the_flow_and_parks_at_name_input() {
        let harness = harness().await;
        harness.router.open_session(open("s-1")).await.expect("open session");

        let session = harness
            .sessions
            .find_by_id(&SessionId("s-1".to_string()))
            .await
            .expect("find")
            .expect("session created");
        assert_eq!(session.current_node_id, Some(NodeId("ask-name".to_string())));

        let events = harness.delivery.sent_to(&session.id).await;
        assert_eq!(sent_texts(&events), vec!["Welcome! What's your name?"]);
    }

    #[tokio::test]
    async fn reopening_an_existing_session_does_not_restart_the_flow() {
        let harness = harness().await;
        harness.router.open_session(open("s-1")).await.expect("open session");
        let first_events = harness.delivery.sent_to(&SessionId("s-1".to_string())).await.len();

        harness.router.open_session(open("s-1")).await.expect("reopen session");
        let second_events = harness.delivery.sent_to(&SessionId("s-1".to_string())).await.len();

        assert_eq!(first_events, second_events, "reconnect must not replay the greeting");
    }

    #[tokio::test]
    async fn input_reply_captures_variable_and_continues_to_menu() {
        let harness = harness().await;
        harness.router.open_session(open("s-1")).await.expect("open session");

        harness
            .router
            .handle_user_message(user_message("s-1", "Asha"))
            .await
            .expect("handle reply");

        let session = harness
            .sessions
            .find_by_id(&SessionId("s-1".to_string()))
            .await
            .expect("find")
            .expect("session exists");
        assert_eq!(session.variables.get("user_name").map(String::as_str), Some("Asha"));
        assert_eq!(session.current_node_id, Some(NodeId("menu".to_string())));

        let events = harness.delivery.sent_to(&session.id).await;
        let texts = sent_texts(&events);
        assert!(texts.contains(&"Hi Asha, great to see you!".to_string()));
        assert!(texts.contains(&"How can we help you today?".to_string()));
    }

    #[tokio::test]
    async fn choice_reply_with_matching_option_reaches_the_scheduler() {
        let harness = harness().await;
        harness.router.open_session(open("s-1")).await.expect("open session");
        harness.router.handle_user_message(user_message("s-1", "Asha")).await.expect("name");

        harness
            .router
            .handle_user_message(user_message("s-1", "Book a demo"))
            .await
            .expect("choice reply");

        let session = harness
            .sessions
            .find_by_id(&SessionId("s-1".to_string()))
            .await
            .expect("find")
            .expect("session exists");
        assert_eq!(session.current_node_id, Some(NodeId("book".to_string())));

        let events = harness.delivery.sent_to(&session.id).await;
        assert!(
            events.iter().any(|event| matches!(event, OutboundEvent::InvokeAction { .. })),
            "scheduler node must trigger the client booking action"
        );
    }

    #[tokio::test]
    async fn unmatched_choice_reply_without_default_stays_parked() {
        // Build a graph whose choice node has no default edge.
        use flowchat_core::domain::graph::{
            EdgeId, FlowEdge, FlowGraph, FlowNode, NodeKind,
        };
        let harness = harness().await;
        let bot_id = BotId("bot-1".to_string());
        let nodes = vec![
            FlowNode { id: NodeId("start".to_string()), bot_id: bot_id.clone(), kind: NodeKind::Start },
            FlowNode {
                id: NodeId("menu".to_string()),
                bot_id: bot_id.clone(),
                kind: NodeKind::Choice {
                    prompt: "Pick".to_string(),
                    options: vec!["A".to_string(), "B".to_string()],
                },
            },
            FlowNode {
                id: NodeId("a".to_string()),
                bot_id: bot_id.clone(),
                kind: NodeKind::Message { text: "Picked A".to_string() },
            },
        ];
        let edges = vec![
            FlowEdge {
                id: EdgeId("e1".to_string()),
                source: NodeId("start".to_string()),
                target: NodeId("menu".to_string()),
                handle: None,
            },
            FlowEdge {
                id: EdgeId("e2".to_string()),
                source: NodeId("menu".to_string()),
                target: NodeId("a".to_string()),
                handle: Some("A".to_string()),
            },
        ];
        harness
            .graphs
            .save_graph(&FlowGraph::new(bot_id, nodes, edges).expect("valid graph"))
            .await
            .expect("replace graph");

        harness.router.open_session(open("s-1")).await.expect("open session");
        harness
            .router
            .handle_user_message(user_message("s-1", "Z"))
            .await
            .expect("unmatched reply");

        let session = harness
            .sessions
            .find_by_id(&SessionId("s-1".to_string()))
            .await
            .expect("find")
            .expect("session exists");
        assert_eq!(
            session.current_node_id,
            Some(NodeId("menu".to_string())),
            "unmatched reply with no default edge leaves the checkpoint unchanged"
        );

        harness.router.handle_user_message(user_message("s-1", "A")).await.expect("match");
        let events = harness.delivery.sent_to(&session.id).await;
        assert!(sent_texts(&events).contains(&"Picked A".to_string()));
    }

    #[tokio::test]
    async fn booking_confirmation_resumes_from_the_scheduler_node() {
        let harness = harness().await;
        harness.router.open_session(open("s-1")).await.expect("open session");
        harness.router.handle_user_message(user_message("s-1", "Asha")).await.expect("name");
        harness
            .router
            .handle_user_message(user_message("s-1", "Book a demo"))
            .await
            .expect("choice");

        harness
            .router
            .handle_user_message(user_message("s-1", BOOKING_CONFIRMED))
            .await
            .expect("booking signal");

        let session = harness
            .sessions
            .find_by_id(&SessionId("s-1".to_string()))
            .await
            .expect("find")
            .expect("session exists");
        let events = harness.delivery.sent_to(&session.id).await;
        assert!(sent_texts(&events).contains(&"You're booked, Asha! See you soon.".to_string()));
        assert_eq!(session.current_node_id, None, "booked branch runs to completion");
    }

    #[tokio::test]
    async fn contact_info_bumps_escalation_and_bypasses_the_flow() {
        let harness = harness().await;
        harness.router.open_session(open("s-1")).await.expect("open session");

        harness
            .router
            .handle_user_message(user_message("s-1", "contact me at a@b.com"))
            .await
            .expect("contact turn");

        let session = harness
            .sessions
            .find_by_id(&SessionId("s-1".to_string()))
            .await
            .expect("find")
            .expect("session exists");
        assert_eq!(session.escalation, EscalationLevel::Yellow);
        assert_eq!(session.visitor_email.as_deref(), Some("a@b.com"));
        assert_eq!(
            session.current_node_id,
            Some(NodeId("ask-name".to_string())),
            "the parked flow node is untouched"
        );

        let events = harness.delivery.sent_to(&session.id).await;
        let texts = sent_texts(&events);
        assert!(texts.contains(&CONTACT_ACK.to_string()));
        assert!(
            !texts.iter().any(|text| text.contains("great to see you")),
            "the flow must not have advanced on the contact turn"
        );
    }

    #[tokio::test]
    async fn second_contact_turn_routes_normally_at_yellow() {
        let harness = harness().await;
        harness.router.open_session(open("s-1")).await.expect("open session");
        harness
            .router
            .handle_user_message(user_message("s-1", "a@b.com"))
            .await
            .expect("first contact turn");

        // Escalation already YELLOW; the same input now resumes the parked
        // input node and is captured as the name (flow semantics, not ours to
        // second-guess).
        harness
            .router
            .handle_user_message(user_message("s-1", "a@b.com"))
            .await
            .expect("second contact turn");

        let session = harness
            .sessions
            .find_by_id(&SessionId("s-1".to_string()))
            .await
            .expect("find")
            .expect("session exists");
        assert_eq!(session.escalation, EscalationLevel::Yellow, "no further escalation");
        assert_eq!(session.current_node_id, Some(NodeId("menu".to_string())));
    }

    #[tokio::test]
    async fn admin_controlled_session_broadcasts_but_never_runs_the_flow() {
        let harness = harness().await;
        harness.router.open_session(open("s-1")).await.expect("open session");

        let session_id = SessionId("s-1".to_string());
        assert!(harness
            .sessions
            .claim_for_agent(&session_id, &flowchat_core::domain::session::AgentId("agent-a".to_string()))
            .await
            .expect("claim"));

        let before = harness.delivery.sent_to(&session_id).await.len();
        harness
            .router
            .handle_user_message(user_message("s-1", "hello agent"))
            .await
            .expect("admin-controlled turn");

        let after = harness.delivery.sent_to(&session_id).await.len();
        assert_eq!(before, after, "no bot reply while an agent owns the session");

        let broadcasts = harness.delivery.broadcasts().await;
        assert!(
            broadcasts.iter().any(|(_, event)| matches!(
                event,
                crate::delivery::ObserverEvent::MessageAppended { message, .. }
                    if message.text == "hello agent" && message.role == MessageRole::User
            )),
            "agents still observe the user's message"
        );
        assert!(harness.responder.requests().await.is_empty());
    }

    #[tokio::test]
    async fn idle_session_turn_goes_to_the_ad_hoc_ai_path() {
        let harness = harness_with_replies(vec![Ok(AiReply {
            full_text: "We open at 9am.".to_string(),
            clean_text: "We open at 9am.".to_string(),
            action: None,
        })])
        .await;

        // No open_session: the message itself creates an idle session.
        harness
            .router
            .handle_user_message(user_message("s-1", "when do you open?"))
            .await
            .expect("idle turn");

        let events = harness.delivery.sent_to(&SessionId("s-1".to_string())).await;
        assert_eq!(sent_texts(&events), vec!["We open at 9am.".to_string()]);

        let requests = harness.responder.requests().await;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].user_query, "when do you open?");
    }

    #[tokio::test]
    async fn agent_request_action_escalates_exactly_once() {
        let agent_request_reply = || {
            Ok(AiReply {
                full_text: "Let me get a human.".to_string(),
                clean_text: "Let me get a human.".to_string(),
                action: Some(AiAction::AgentRequest),
            })
        };
        let harness = harness_with_replies(vec![agent_request_reply(), agent_request_reply()]).await;

        harness
            .router
            .handle_user_message(user_message("s-1", "I want a human"))
            .await
            .expect("first agent request");
        harness
            .router
            .handle_user_message(user_message("s-1", "human please"))
            .await
            .expect("second agent request");

        let session = harness
            .sessions
            .find_by_id(&SessionId("s-1".to_string()))
            .await
            .expect("find")
            .expect("session exists");
        assert_eq!(session.escalation, EscalationLevel::Red);
        assert!(session.requires_attention);
        assert_eq!(session.control, ControlStatus::Bot, "escalation alone does not hand over");
    }

    #[tokio::test]
    async fn visitor_email_resumes_the_previous_conversation() {
        let harness = harness().await;
        let mut first = user_message("s-old", "hi");
        first.visitor_email = Some("asha@example.com".to_string());
        harness.router.handle_user_message(first).await.expect("first contact");

        let mut second = user_message("s-new", "me again");
        second.visitor_email = Some("asha@example.com".to_string());
        harness.router.handle_user_message(second).await.expect("second contact");

        let resumed = harness
            .sessions
            .find_by_id(&SessionId("s-old".to_string()))
            .await
            .expect("find")
            .expect("old session exists");
        let messages =
            harness.messages.list_recent(&resumed.id, 10).await.expect("list messages");
        let user_turns: Vec<&str> = messages
            .iter()
            .filter(|message| message.role == MessageRole::User)
            .map(|message| message.text.as_str())
            .collect();
        assert_eq!(user_turns, vec!["hi", "me again"], "both turns land on the resumed session");

        let fresh = harness.sessions.find_by_id(&SessionId("s-new".to_string())).await.expect("find");
        assert!(fresh.is_none(), "no duplicate session is created for a known visitor");
    }
}
