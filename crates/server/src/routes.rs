use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::warn;

use flowchat_core::domain::graph::BotId;
use flowchat_core::domain::session::{AgentId, CompanyId, SessionId};
use flowchat_core::errors::{ApplicationError, DomainError, InterfaceError};
use flowchat_engine::handoff::{HandoffError, HandoffService};
use flowchat_engine::inbound::{InboundMessage, InboundRouter, OpenSession};
use flowchat_engine::EngineError;

#[derive(Clone)]
pub struct AppState {
    pub inbound: Arc<InboundRouter>,
    pub handoff: Arc<HandoffService>,
    /// Delay between the disconnect notification and the forced release, so
    /// a quick reconnect does not dump the agent's conversations.
    pub disconnect_grace: std::time::Duration,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/sessions/{session_id}/open", post(open_session))
        .route("/api/sessions/{session_id}/messages", post(user_message))
        .route("/api/sessions/{session_id}/booking", post(booking_callback))
        .route("/api/sessions/{session_id}/agent-message", post(agent_message))
        .route("/api/sessions/{session_id}/assign", post(assign))
        .route("/api/sessions/{session_id}/transfer", post(transfer))
        .route("/api/sessions/{session_id}/return-to-bot", post(return_to_bot))
        .route("/api/agents/{agent_id}/disconnect", post(agent_disconnect))
        .with_state(state)
}

#[derive(Clone, Debug, Serialize)]
pub struct ApiResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ApiResponse {
    fn ok() -> (StatusCode, Json<Self>) {
        (StatusCode::OK, Json(Self { status: "ok", error: None }))
    }

    fn error(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<Self>) {
        (status, Json(Self { status: "error", error: Some(message.into()) }))
    }
}

fn engine_error_response(
    error: EngineError,
    correlation_id: &str,
) -> (StatusCode, Json<ApiResponse>) {
    match error {
        EngineError::SessionNotFound(id) => {
            ApiResponse::error(StatusCode::NOT_FOUND, format!("session `{id}` not found"))
        }
        EngineError::Repository(error) => interface_error_response(
            ApplicationError::Persistence(error.to_string()).into_interface(correlation_id),
        ),
    }
}

fn handoff_error_response(
    error: HandoffError,
    correlation_id: &str,
) -> (StatusCode, Json<ApiResponse>) {
    let application = match error {
        HandoffError::SessionNotFound(id) => {
            return ApiResponse::error(StatusCode::NOT_FOUND, format!("session `{id}` not found"));
        }
        HandoffError::AlreadyAssigned(session_id) => {
            ApplicationError::from(DomainError::AssignmentConflict { session_id })
        }
        HandoffError::NotAssignee { session, agent } => {
            ApplicationError::from(DomainError::NotAssignee { session_id: session, agent_id: agent })
        }
        HandoffError::Repository(error) => ApplicationError::Persistence(error.to_string()),
    };

    interface_error_response(application.into_interface(correlation_id))
}

fn interface_error_response(error: InterfaceError) -> (StatusCode, Json<ApiResponse>) {
    let status = match &error {
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::Conflict { .. } => StatusCode::CONFLICT,
        InterfaceError::ServiceUnavailable { .. } => {
            warn!(
                event_name = "api.persistence_failure",
                error = %error,
                "request failed on persistence"
            );
            StatusCode::SERVICE_UNAVAILABLE
        }
        InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };

    ApiResponse::error(status, error.user_message())
}

#[derive(Debug, Deserialize)]
pub struct OpenSessionBody {
    pub bot_id: String,
    pub company_id: String,
    #[serde(default)]
    pub visitor_email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UserMessageBody {
    pub bot_id: String,
    pub company_id: String,
    pub text: String,
    #[serde(default)]
    pub visitor_email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BookingBody {
    pub signal: BookingSignal,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BookingSignal {
    Confirmed,
    Cancelled,
}

#[derive(Debug, Deserialize)]
pub struct AgentMessageBody {
    pub agent_id: String,
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct AssignBody {
    pub agent_id: String,
}

#[derive(Debug, Deserialize)]
pub struct TransferBody {
    pub from_agent_id: String,
    pub to_agent_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ReturnToBotBody {
    pub agent_id: String,
}

async fn open_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(body): Json<OpenSessionBody>,
) -> (StatusCode, Json<ApiResponse>) {
    let open = OpenSession {
        session_id: SessionId(session_id.clone()),
        bot_id: BotId(body.bot_id),
        company_id: CompanyId(body.company_id),
        visitor_email: body.visitor_email,
    };

    match state.inbound.open_session(open).await {
        Ok(()) => ApiResponse::ok(),
        Err(error) => engine_error_response(error, &session_id),
    }
}

async fn user_message(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(body): Json<UserMessageBody>,
) -> (StatusCode, Json<ApiResponse>) {
    if body.text.trim().is_empty() {
        return ApiResponse::error(StatusCode::BAD_REQUEST, "text must not be empty");
    }

    let inbound = InboundMessage {
        session_id: SessionId(session_id.clone()),
        bot_id: BotId(body.bot_id),
        company_id: CompanyId(body.company_id),
        text: body.text,
        visitor_email: body.visitor_email,
    };

    match state.inbound.handle_user_message(inbound).await {
        Ok(()) => ApiResponse::ok(),
        Err(error) => engine_error_response(error, &session_id),
    }
}

async fn booking_callback(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(body): Json<BookingBody>,
) -> (StatusCode, Json<ApiResponse>) {
    let confirmed = body.signal == BookingSignal::Confirmed;
    match state.inbound.booking_callback(&SessionId(session_id.clone()), confirmed).await {
        Ok(()) => ApiResponse::ok(),
        Err(error) => engine_error_response(error, &session_id),
    }
}

async fn agent_message(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(body): Json<AgentMessageBody>,
) -> (StatusCode, Json<ApiResponse>) {
    if body.text.trim().is_empty() {
        return ApiResponse::error(StatusCode::BAD_REQUEST, "text must not be empty");
    }

    match state
        .handoff
        .agent_message(&SessionId(session_id.clone()), &AgentId(body.agent_id), &body.text)
        .await
    {
        Ok(()) => ApiResponse::ok(),
        Err(error) => handoff_error_response(error, &session_id),
    }
}

async fn assign(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(body): Json<AssignBody>,
) -> (StatusCode, Json<ApiResponse>) {
    match state.handoff.assign(&SessionId(session_id.clone()), &AgentId(body.agent_id)).await {
        Ok(()) => ApiResponse::ok(),
        Err(error) => handoff_error_response(error, &session_id),
    }
}

async fn transfer(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(body): Json<TransferBody>,
) -> (StatusCode, Json<ApiResponse>) {
    match state
        .handoff
        .transfer(
            &SessionId(session_id.clone()),
            &AgentId(body.from_agent_id),
            &AgentId(body.to_agent_id),
        )
        .await
    {
        Ok(()) => ApiResponse::ok(),
        Err(error) => handoff_error_response(error, &session_id),
    }
}

async fn return_to_bot(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(body): Json<ReturnToBotBody>,
) -> (StatusCode, Json<ApiResponse>) {
    match state
        .handoff
        .return_to_bot(&SessionId(session_id.clone()), &AgentId(body.agent_id))
        .await
    {
        Ok(()) => ApiResponse::ok(),
        Err(error) => handoff_error_response(error, &session_id),
    }
}

/// Called by the socket layer when an agent's last connection closes. The
/// release itself runs after the grace period elapses.
async fn agent_disconnect(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> (StatusCode, Json<ApiResponse>) {
    let handoff = state.handoff.clone();
    let grace = state.disconnect_grace;
    let agent = AgentId(agent_id);

    tokio::spawn(async move {
        if !grace.is_zero() {
            tokio::time::sleep(grace).await;
        }
        if let Err(error) = handoff.release_agent(&agent).await {
            warn!(
                event_name = "handoff.release_failed",
                agent_id = %agent.0,
                error = %error,
                "failed to release sessions after agent disconnect"
            );
        }
    });

    ApiResponse::ok()
}
