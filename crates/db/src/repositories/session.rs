use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use flowchat_core::domain::graph::{BotId, NodeId};
use flowchat_core::domain::session::{
    AgentId, CompanyId, ControlStatus, EscalationLevel, Session, SessionId,
};

use super::{format_timestamp, parse_timestamp, RepositoryError, SessionRepository};
use crate::DbPool;

const SESSION_COLUMNS: &str = "id,
    bot_id,
    company_id,
    visitor_email,
    current_node_id,
    variables_json,
    control,
    escalation,
    assigned_to,
    last_assigned_to,
    needs_reassignment,
    requires_attention,
    last_message_at,
    created_at,
    updated_at";

pub struct SqlSessionRepository {
    pool: DbPool,
}

impl SqlSessionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl SessionRepository for SqlSessionRepository {
    async fn find_by_id(&self, id: &SessionId) -> Result<Option<Session>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(session_from_row).transpose()
    }

    async fn find_by_visitor_email(
        &self,
        bot_id: &BotId,
        email: &str,
    ) -> Result<Option<Session>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions
             WHERE bot_id = ? AND visitor_email = ?
             ORDER BY created_at DESC
             LIMIT 1"
        ))
        .bind(&bot_id.0)
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        row.map(session_from_row).transpose()
    }

    async fn create(&self, session: &Session) -> Result<(), RepositoryError> {
        let variables_json = serde_json::to_string(&session.variables)
            .map_err(|error| RepositoryError::Decode(format!("encode variables: {error}")))?;

        sqlx::query(
            "INSERT INTO sessions (
                id,
                bot_id,
                company_id,
                visitor_email,
                current_node_id,
                variables_json,
                control,
                escalation,
                assigned_to,
                last_assigned_to,
                needs_reassignment,
                requires_attention,
                last_message_at,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&session.id.0)
        .bind(&session.bot_id.0)
        .bind(&session.company_id.0)
        .bind(session.visitor_email.as_deref())
        .bind(session.current_node_id.as_ref().map(|node| node.0.as_str()))
        .bind(variables_json)
        .bind(session.control.as_str())
        .bind(session.escalation.as_str())
        .bind(session.assigned_to.as_ref().map(|agent| agent.0.as_str()))
        .bind(session.last_assigned_to.as_ref().map(|agent| agent.0.as_str()))
        .bind(i64::from(session.needs_reassignment))
        .bind(i64::from(session.requires_attention))
        .bind(format_timestamp(session.last_message_at))
        .bind(format_timestamp(session.created_at))
        .bind(format_timestamp(session.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_current_node(
        &self,
        id: &SessionId,
        node: Option<&NodeId>,
    ) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE sessions SET current_node_id = ?, updated_at = ? WHERE id = ?")
            .bind(node.map(|node| node.0.as_str()))
            .bind(format_timestamp(Utc::now()))
            .bind(&id.0)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn set_variable(
        &self,
        id: &SessionId,
        name: &str,
        value: &str,
    ) -> Result<(), RepositoryError> {
        // Single-statement JSON merge; no cross-process read-modify-write.
        sqlx::query(
            "UPDATE sessions
             SET variables_json = json_set(variables_json, '$.' || ?, ?), updated_at = ?
             WHERE id = ?",
        )
        .bind(name)
        .bind(value)
        .bind(format_timestamp(Utc::now()))
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_visitor_email(
        &self,
        id: &SessionId,
        email: &str,
    ) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE sessions SET visitor_email = ?, updated_at = ? WHERE id = ?")
            .bind(email)
            .bind(format_timestamp(Utc::now()))
            .bind(&id.0)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn touch_last_message(
        &self,
        id: &SessionId,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE sessions SET last_message_at = ?, updated_at = ? WHERE id = ?")
            .bind(format_timestamp(at))
            .bind(format_timestamp(Utc::now()))
            .bind(&id.0)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn escalate_contact_seen(&self, id: &SessionId) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE sessions SET escalation = 'YELLOW', updated_at = ?
             WHERE id = ? AND escalation = 'GREEN'",
        )
        .bind(format_timestamp(Utc::now()))
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn flag_attention(&self, id: &SessionId) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE sessions SET escalation = 'RED', requires_attention = 1, updated_at = ?
             WHERE id = ?",
        )
        .bind(format_timestamp(Utc::now()))
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn claim_for_agent(
        &self,
        id: &SessionId,
        agent: &AgentId,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE sessions
             SET control = 'admin',
                 assigned_to = ?,
                 last_assigned_to = ?,
                 escalation = 'NONE',
                 requires_attention = 0,
                 needs_reassignment = 0,
                 updated_at = ?
             WHERE id = ? AND (assigned_to IS NULL OR assigned_to = ? OR control = 'bot')",
        )
        .bind(&agent.0)
        .bind(&agent.0)
        .bind(format_timestamp(Utc::now()))
        .bind(&id.0)
        .bind(&agent.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn assign_if_unassigned(
        &self,
        id: &SessionId,
        agent: &AgentId,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE sessions
             SET control = 'admin', assigned_to = ?, last_assigned_to = ?, updated_at = ?
             WHERE id = ? AND assigned_to IS NULL",
        )
        .bind(&agent.0)
        .bind(&agent.0)
        .bind(format_timestamp(Utc::now()))
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn transfer(
        &self,
        id: &SessionId,
        from: &AgentId,
        to: &AgentId,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE sessions
             SET assigned_to = ?, last_assigned_to = ?, needs_reassignment = 0, updated_at = ?
             WHERE id = ? AND assigned_to = ?",
        )
        .bind(&to.0)
        .bind(&to.0)
        .bind(format_timestamp(Utc::now()))
        .bind(&id.0)
        .bind(&from.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn return_to_bot(
        &self,
        id: &SessionId,
        agent: &AgentId,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE sessions
             SET control = 'bot', assigned_to = NULL, escalation = 'GREEN', updated_at = ?
             WHERE id = ? AND assigned_to = ?",
        )
        .bind(format_timestamp(Utc::now()))
        .bind(&id.0)
        .bind(&agent.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn release_assigned_to(&self, agent: &AgentId) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            "UPDATE sessions
             SET assigned_to = NULL, control = 'bot', needs_reassignment = 1, updated_at = ?
             WHERE assigned_to = ?",
        )
        .bind(format_timestamp(Utc::now()))
        .bind(&agent.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn release_inactive(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            "UPDATE sessions
             SET assigned_to = NULL, control = 'bot', needs_reassignment = 1, updated_at = ?
             WHERE control = 'admin' AND last_message_at < ?",
        )
        .bind(format_timestamp(Utc::now()))
        .bind(format_timestamp(cutoff))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

fn session_from_row(row: SqliteRow) -> Result<Session, RepositoryError> {
    let control_raw = row.try_get::<String, _>("control")?;
    let control = ControlStatus::parse(&control_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown control status `{control_raw}`")))?;

    let escalation_raw = row.try_get::<String, _>("escalation")?;
    let escalation = EscalationLevel::parse(&escalation_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown escalation level `{escalation_raw}`"))
    })?;

    let variables_raw = row.try_get::<String, _>("variables_json")?;
    let variables: BTreeMap<String, String> = serde_json::from_str(&variables_raw)
        .map_err(|error| RepositoryError::Decode(format!("invalid variables json: {error}")))?;

    Ok(Session {
        id: SessionId(row.try_get("id")?),
        bot_id: BotId(row.try_get("bot_id")?),
        company_id: CompanyId(row.try_get("company_id")?),
        visitor_email: row.try_get("visitor_email")?,
        current_node_id: row.try_get::<Option<String>, _>("current_node_id")?.map(NodeId),
        variables,
        control,
        escalation,
        assigned_to: row.try_get::<Option<String>, _>("assigned_to")?.map(AgentId),
        last_assigned_to: row.try_get::<Option<String>, _>("last_assigned_to")?.map(AgentId),
        needs_reassignment: row.try_get::<i64, _>("needs_reassignment")? != 0,
        requires_attention: row.try_get::<i64, _>("requires_attention")? != 0,
        last_message_at: parse_timestamp("last_message_at", row.try_get("last_message_at")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}
