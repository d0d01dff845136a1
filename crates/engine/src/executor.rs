use std::sync::Arc;

use tracing::{debug, warn};

use flowchat_core::config::TenantConfig;
use flowchat_core::domain::graph::{handles, AiNodeConfig, FlowGraph, NodeId, NodeKind};
use flowchat_core::domain::message::{Message, MessageRole};
use flowchat_core::domain::session::Session;
use flowchat_core::template::render_template;
use flowchat_db::repositories::{GraphRepository, MessageRepository, SessionRepository};
use flowchat_responder::{AiReply, AiRequest, AiResponder};

use crate::delivery::{ClientAction, DeliveryChannel, ObserverEvent, OutboundEvent};
use crate::EngineError;

/// How a walk ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WalkOutcome {
    /// Ran out of outgoing edges; `current_node_id` was cleared.
    Completed,
    /// Parked at a node awaiting external input; `current_node_id` holds the
    /// checkpoint and the next inbound event resumes there.
    Suspended(NodeId),
    /// A live-agent node handed the conversation to a human.
    Escalated,
    /// Configuration problem (missing node/graph, runaway cycle). The walk
    /// stopped without effects for the broken step; the session keeps its
    /// last persisted checkpoint.
    Aborted,
}

/// Walks a bot's conversation graph, emitting messages and state changes
/// until it reaches a node that needs external input or runs out of edges.
///
/// The checkpoint (`current_node_id`) is persisted before a node's effects
/// run, so a crash mid-step leaves the session resumable at the node that was
/// about to execute, never past it.
pub struct FlowExecutor {
    graphs: Arc<dyn GraphRepository>,
    sessions: Arc<dyn SessionRepository>,
    messages: Arc<dyn MessageRepository>,
    delivery: Arc<dyn DeliveryChannel>,
    responder: Arc<dyn AiResponder>,
    tenant: TenantConfig,
    max_walk_steps: u32,
}

impl FlowExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        graphs: Arc<dyn GraphRepository>,
        sessions: Arc<dyn SessionRepository>,
        messages: Arc<dyn MessageRepository>,
        delivery: Arc<dyn DeliveryChannel>,
        responder: Arc<dyn AiResponder>,
        tenant: TenantConfig,
        max_walk_steps: u32,
    ) -> Self {
        Self { graphs, sessions, messages, delivery, responder, tenant, max_walk_steps }
    }

    /// Start the flow from the bot's start node.
    pub async fn run_from_start(&self, session: &Session) -> Result<WalkOutcome, EngineError> {
        let Some(graph) = self.graphs.load_graph(&session.bot_id).await? else {
            warn!(
                event_name = "flow.graph_missing",
                session_id = %session.id.0,
                bot_id = %session.bot_id.0,
                "bot has no flow graph; walk aborted"
            );
            return Ok(WalkOutcome::Aborted);
        };

        let Some(start) = graph.start_node() else {
            // Unreachable for validated graphs; guarded anyway.
            warn!(
                event_name = "flow.start_missing",
                session_id = %session.id.0,
                bot_id = %session.bot_id.0,
                "bot graph has no start node; walk aborted"
            );
            return Ok(WalkOutcome::Aborted);
        };

        let start_id = start.id.clone();
        self.walk(session, &graph, start_id).await
    }

    /// Resume the flow at a specific node (a parked checkpoint or an edge
    /// target chosen by the inbound router).
    pub async fn run_from_node(
        &self,
        session: &Session,
        node_id: &NodeId,
    ) -> Result<WalkOutcome, EngineError> {
        let Some(graph) = self.graphs.load_graph(&session.bot_id).await? else {
            warn!(
                event_name = "flow.graph_missing",
                session_id = %session.id.0,
                bot_id = %session.bot_id.0,
                "bot has no flow graph; walk aborted"
            );
            return Ok(WalkOutcome::Aborted);
        };

        self.walk(session, &graph, node_id.clone()).await
    }

    async fn walk(
        &self,
        session: &Session,
        graph: &FlowGraph,
        start: NodeId,
    ) -> Result<WalkOutcome, EngineError> {
        let mut current = start;

        for _ in 0..self.max_walk_steps {
            let Some(node) = graph.node(&current) else {
                warn!(
                    event_name = "flow.node_missing",
                    session_id = %session.id.0,
                    bot_id = %session.bot_id.0,
                    node_id = %current.0,
                    "node not found for bot; walk aborted at last checkpoint"
                );
                return Ok(WalkOutcome::Aborted);
            };

            // Checkpoint before effects: a crash mid-step resumes here.
            self.sessions.set_current_node(&session.id, Some(&node.id)).await?;

            let next = match &node.kind {
                NodeKind::Start => graph.first_edge_from(&current),
                NodeKind::Message { text } => {
                    let rendered = render_template(text, &session.variables);
                    self.emit_model_message(session, rendered).await?;
                    graph.first_edge_from(&current)
                }
                NodeKind::Condition { variable, operator } => {
                    let bound = session
                        .variables
                        .get(variable)
                        .map(|value| !value.trim().is_empty())
                        .unwrap_or(false);
                    let truthy = match operator {
                        flowchat_core::domain::graph::ConditionOperator::Exists => bound,
                        flowchat_core::domain::graph::ConditionOperator::NotExists => !bound,
                    };
                    let handle = if truthy { handles::YES } else { handles::NO };
                    graph.edge_from(&current, Some(handle))
                }
                NodeKind::Ai { config } => {
                    let Some(user_message) =
                        self.messages.latest_user_message(&session.id).await?
                    else {
                        // No user turn yet; park here until one arrives.
                        debug!(
                            event_name = "flow.ai_awaiting_user",
                            session_id = %session.id.0,
                            node_id = %current.0,
                            "ai node reached before any user message; suspending"
                        );
                        return Ok(WalkOutcome::Suspended(current));
                    };

                    let reply =
                        self.invoke_responder(session, &user_message.text, Some(config)).await;
                    self.emit_reply(session, &reply).await?;
                    graph.edge_from(&current, Some(handles::ON_RESPONSE))
                }
                NodeKind::Choice { prompt, options } => {
                    let rendered = render_template(prompt, &session.variables);
                    let message =
                        Message::new(session.id.clone(), MessageRole::Model, rendered);
                    self.messages.append(&message).await?;
                    self.broadcast(
                        session,
                        ObserverEvent::MessageAppended {
                            session_id: session.id.clone(),
                            message: message.clone(),
                        },
                    )
                    .await;
                    self.deliver(
                        session,
                        OutboundEvent::ChoicePrompt { message, choices: options.clone() },
                    )
                    .await;
                    return Ok(WalkOutcome::Suspended(current));
                }
                NodeKind::Input { prompt, .. } => {
                    let rendered = render_template(prompt, &session.variables);
                    self.emit_model_message(session, rendered).await?;
                    return Ok(WalkOutcome::Suspended(current));
                }
                NodeKind::Scheduler => {
                    self.deliver(
                        session,
                        OutboundEvent::InvokeAction { action: ClientAction::Scheduler },
                    )
                    .await;
                    return Ok(WalkOutcome::Suspended(current));
                }
                NodeKind::LiveAgent => {
                    self.sessions.flag_attention(&session.id).await?;
                    self.broadcast(
                        session,
                        ObserverEvent::AttentionRequired { session_id: session.id.clone() },
                    )
                    .await;
                    self.sessions.set_current_node(&session.id, None).await?;
                    return Ok(WalkOutcome::Escalated);
                }
            };

            match next {
                Some(edge) => current = edge.target.clone(),
                None => {
                    self.sessions.set_current_node(&session.id, None).await?;
                    return Ok(WalkOutcome::Completed);
                }
            }
        }

        warn!(
            event_name = "flow.walk_step_cap",
            session_id = %session.id.0,
            bot_id = %session.bot_id.0,
            max_walk_steps = self.max_walk_steps,
            "walk exceeded step cap; likely a cycle in the graph"
        );
        Ok(WalkOutcome::Aborted)
    }

    /// Call the AI responder; any failure or an empty reply degrades to the
    /// fixed fallback so the user never gets silence.
    pub(crate) async fn invoke_responder(
        &self,
        session: &Session,
        user_query: &str,
        config: Option<&AiNodeConfig>,
    ) -> AiReply {
        let request = AiRequest {
            bot_id: session.bot_id.0.clone(),
            session_id: session.id.0.clone(),
            user_query: user_query.to_string(),
            tenant_name: self.tenant.name.clone(),
            tenant_description: self.tenant.description.clone(),
            ai_node_data: config.cloned(),
            user_details: session.visitor_details(),
        };

        match self.responder.respond(request).await {
            Ok(reply) if reply.is_empty() => {
                warn!(
                    event_name = "responder.empty_reply",
                    session_id = %session.id.0,
                    "responder produced neither text nor action; using fallback"
                );
                AiReply::fallback()
            }
            Ok(reply) => reply,
            Err(error) => {
                warn!(
                    event_name = "responder.call_failed",
                    session_id = %session.id.0,
                    error = %error,
                    "responder call failed; using fallback"
                );
                AiReply::fallback()
            }
        }
    }

    /// Persist and deliver the reply text, then apply the intent action.
    pub(crate) async fn emit_reply(
        &self,
        session: &Session,
        reply: &AiReply,
    ) -> Result<(), EngineError> {
        if !reply.clean_text.trim().is_empty() {
            self.emit_model_message(session, reply.clean_text.clone()).await?;
        }

        match reply.action {
            Some(flowchat_responder::AiAction::AgentRequest) => {
                self.sessions.flag_attention(&session.id).await?;
                self.broadcast(
                    session,
                    ObserverEvent::AttentionRequired { session_id: session.id.clone() },
                )
                .await;
            }
            Some(flowchat_responder::AiAction::Scheduler) => {
                self.deliver(
                    session,
                    OutboundEvent::InvokeAction { action: ClientAction::Scheduler },
                )
                .await;
            }
            None => {}
        }

        Ok(())
    }

    pub(crate) async fn emit_model_message(
        &self,
        session: &Session,
        text: String,
    ) -> Result<(), EngineError> {
        let message = Message::new(session.id.clone(), MessageRole::Model, text);
        self.messages.append(&message).await?;
        self.broadcast(
            session,
            ObserverEvent::MessageAppended {
                session_id: session.id.clone(),
                message: message.clone(),
            },
        )
        .await;
        self.deliver(session, OutboundEvent::Message(message)).await;
        Ok(())
    }

    /// Delivery is best-effort: a closed connection must not fail the turn.
    pub(crate) async fn deliver(&self, session: &Session, event: OutboundEvent) {
        if let Err(error) = self.delivery.send(&session.id, event).await {
            warn!(
                event_name = "delivery.send_failed",
                session_id = %session.id.0,
                error = %error,
                "failed to deliver outbound event"
            );
        }
    }

    pub(crate) async fn broadcast(&self, session: &Session, event: ObserverEvent) {
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
