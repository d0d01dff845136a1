use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use flowchat_core::domain::message::{Message, MessageId, MessageRole};
use flowchat_core::domain::session::SessionId;

use super::{format_timestamp, parse_timestamp, MessageRepository, RepositoryError};
use crate::DbPool;

pub struct SqlMessageRepository {
    pool: DbPool,
}

impl SqlMessageRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl MessageRepository for SqlMessageRepository {
    async fn append(&self, message: &Message) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO messages (id, session_id, role, text, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&message.id.0)
        .bind(&message.session_id.0)
        .bind(message.role.as_str())
        .bind(&message.text)
        .bind(format_timestamp(message.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn latest_user_message(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<Message>, RepositoryError> {
        // rowid breaks created_at ties in insertion order.
        let row = sqlx::query(
            "SELECT id, session_id, role, text, created_at
             FROM messages
             WHERE session_id = ? AND role = 'user'
             ORDER BY created_at DESC, rowid DESC
             LIMIT 1",
        )
        .bind(&session_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(message_from_row).transpose()
    }

    async fn list_recent(
        &self,
        session_id: &SessionId,
        limit: u32,
    ) -> Result<Vec<Message>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, session_id, role, text, created_at FROM (
                 SELECT id, session_id, role, text, created_at, rowid AS seq
                 FROM messages
                 WHERE session_id = ?
                 ORDER BY created_at DESC, seq DESC
                 LIMIT ?
             )
             ORDER BY created_at ASC, seq ASC",
        )
        .bind(&session_id.0)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(message_from_row).collect()
    }

    async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM messages WHERE created_at < ?")
            .bind(format_timestamp(cutoff))
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

fn message_from_row(row: SqliteRow) -> Result<Message, RepositoryError> {
    let role_raw = row.try_get::<String, _>("role")?;
    let role = MessageRole::parse(&role_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown message role `{role_raw}`")))?;

    Ok(Message {
        id: MessageId(row.try_get("id")?),
        session_id: SessionId(row.try_get("session_id")?),
        role,
        text: row.try_get("text")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use flowchat_core::domain::graph::BotId;
    use flowchat_core::domain::message::{Message, MessageRole};
    use flowchat_core::domain::session::{CompanyId, Session, SessionId};

    use super::SqlMessageRepository;
    use crate::migrations;
    use crate::repositories::{MessageRepository, SessionRepository, SqlSessionRepository};
    use crate::{connect_with_settings, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:?cache=shared", 1, 30)
            .await
            .expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    async fn insert_session(pool: &DbPool, id: &str) -> SessionId {
        let session = Session::new(
            SessionId(id.to_string()),
            BotId("bot-1".to_string()),
            CompanyId("co-1".to_string()),
        );
        SqlSessionRepository::new(pool.clone()).create(&session).await.expect("insert session");
        session.id
    }

    #[tokio::test]
    async fn appends_and_lists_in_chronological_order() {
        let pool = setup_pool().await;
        let session_id = insert_session(&pool, "s-1").await;
        let repo = SqlMessageRepository::new(pool.clone());

        let base = Utc::now();
        for (index, (role, text)) in [
            (MessageRole::Model, "Hi there"),
            (MessageRole::User, "hello"),
            (MessageRole::Model, "How can I help?"),
            (MessageRole::User, "pricing please"),
        ]
        .iter()
        .enumerate()
        {
            let mut message = Message::new(session_id.clone(), *role, *text);
            message.created_at = base + Duration::seconds(index as i64);
            repo.append(&message).await.expect("append message");
        }

        let recent = repo.list_recent(&session_id, 3).await.expect("list recent");
        let texts: Vec<&str> = recent.iter().map(|message| message.text.as_str()).collect();
        assert_eq!(texts, vec!["hello", "How can I help?", "pricing please"]);

        let latest_user = repo
            .latest_user_message(&session_id)
            .await
            .expect("latest user")
            .expect("a user message exists");
        assert_eq!(latest_user.text, "pricing please");

        pool.close().await;
    }

    #[tokio::test]
    async fn latest_user_message_skips_model_replies() {
        let pool = setup_pool().await;
        let session_id = insert_session(&pool, "s-2").await;
        let repo = SqlMessageRepository::new(pool.clone());

        let mut model_only = Message::new(session_id.clone(), MessageRole::Model, "greeting");
        model_only.created_at = Utc::now();
        repo.append(&model_only).await.expect("append model message");

        assert!(repo.latest_user_message(&session_id).await.expect("query").is_none());

        pool.close().await;
    }

    #[tokio::test]
    async fn retention_prune_deletes_only_old_messages() {
        let pool = setup_pool().await;
        let session_id = insert_session(&pool, "s-3").await;
        let repo = SqlMessageRepository::new(pool.clone());

        let mut old = Message::new(session_id.clone(), MessageRole::User, "old");
        old.created_at = Utc::now() - Duration::days(60);
        repo.append(&old).await.expect("append old");

        let mut fresh = Message::new(session_id.clone(), MessageRole::User, "fresh");
        fresh.created_at = Utc::now();
        repo.append(&fresh).await.expect("append fresh");

        let pruned = repo
            .prune_older_than(Utc::now() - Duration::days(30))
            .await
            .expect("prune");
        assert_eq!(pruned, 1);

        let remaining = repo.list_recent(&session_id, 10).await.expect("list");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].text, "fresh");

        pool.close().await;
    }
}
