use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};

use flowchat_core::config::EngineConfig;
use flowchat_db::repositories::{MessageRepository, RepositoryError, SessionRepository};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub released_sessions: u64,
    pub pruned_messages: u64,
}

/// Periodic maintenance: releases agent-held sessions that went quiet and
/// prunes messages past the retention window. Both paths reuse the
/// repositories' conditional updates, so the sweep can race interactive
/// handlers (or another instance of itself) without violating exclusive
/// assignment.
pub struct Sweeper {
    sessions: Arc<dyn SessionRepository>,
    messages: Arc<dyn MessageRepository>,
    inactivity_timeout: Duration,
    retention: Duration,
    interval: StdDuration,
}

impl Sweeper {
    pub fn new(
        sessions: Arc<dyn SessionRepository>,
        messages: Arc<dyn MessageRepository>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            sessions,
            messages,
            inactivity_timeout: Duration::seconds(config.inactivity_timeout_secs as i64),
            retention: Duration::days(i64::from(config.retention_days)),
            interval: StdDuration::from_secs(config.sweep_interval_secs),
        }
    }

    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<SweepReport, RepositoryError> {
        let released_sessions =
            self.sessions.release_inactive(now - self.inactivity_timeout).await?;
        let pruned_messages = self.messages.prune_older_than(now - self.retention).await?;

        if released_sessions > 0 || pruned_messages > 0 {
            info!(
                event_name = "sweep.completed",
                released_sessions,
                pruned_messages,
                "background sweep applied changes"
            );
        }

        Ok(SweepReport { released_sessions, pruned_messages })
    }

    /// Runs forever; spawn on the runtime. Errors are logged and the next
    /// tick retries.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Err(error) = self.sweep_once(Utc::now()).await {
                warn!(
                    event_name = "sweep.failed",
                    error = %error,
                    "background sweep failed; will retry next tick"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};

    use flowchat_core::config::EngineConfig;
    use flowchat_core::domain::graph::BotId;
    use flowchat_core::domain::message::{Message, MessageRole};
    use flowchat_core::domain::session::{AgentId, CompanyId, ControlStatus, Session, SessionId};
    use flowchat_db::repositories::{
        InMemoryMessageRepository, InMemorySessionRepository, MessageRepository, SessionRepository,
    };

    use super::Sweeper;

    fn config() -> EngineConfig {
        EngineConfig {
            inactivity_timeout_secs: 600,
            sweep_interval_secs: 60,
            retention_days: 30,
            disconnect_grace_secs: 30,
            max_walk_steps: 64,
        }
    }

    fn sweeper(
        sessions: Arc<InMemorySessionRepository>,
        messages: Arc<InMemoryMessageRepository>,
    ) -> Sweeper {
        Sweeper::new(sessions, messages, &config())
    }

    #[tokio::test]
    async fn sweep_releases_stale_admin_sessions_and_is_idempotent() {
        let sessions = Arc::new(InMemorySessionRepository::default());
        let messages = Arc::new(InMemoryMessageRepository::default());

        let session = Session::new(
            SessionId("s-1".to_string()),
            BotId("bot-1".to_string()),
            CompanyId("co-1".to_string()),
        );
        sessions.create(&session).await.expect("create");
        assert!(sessions
            .claim_for_agent(&session.id, &AgentId("agent-a".to_string()))
            .await
            .expect("claim"));
        sessions
            .touch_last_message(&session.id, Utc::now() - Duration::minutes(30))
            .await
            .expect("age session");

        let sweeper = sweeper(sessions.clone(), messages.clone());
        let now = Utc::now();

        let first = sweeper.sweep_once(now).await.expect("first sweep");
        assert_eq!(first.released_sessions, 1);

        let second = sweeper.sweep_once(now).await.expect("second sweep");
        assert_eq!(second.released_sessions, 0, "repeat sweep must be a no-op");

        let found = sessions.find_by_id(&session.id).await.expect("find").expect("exists");
        assert_eq!(found.control, ControlStatus::Bot);
        assert!(found.needs_reassignment);
    }

    #[tokio::test]
    async fn sweep_prunes_only_messages_past_retention() {
        let sessions = Arc::new(InMemorySessionRepository::default());
        let messages = Arc::new(InMemoryMessageRepository::default());
        let session_id = SessionId("s-2".to_string());

        let mut ancient = Message::new(session_id.clone(), MessageRole::User, "ancient");
        ancient.created_at = Utc::now() - Duration::days(60);
        messages.append(&ancient).await.expect("append ancient");

        let mut recent = Message::new(session_id.clone(), MessageRole::User, "recent");
        recent.created_at = Utc::now() - Duration::days(1);
        messages.append(&recent).await.expect("append recent");

        let sweeper = sweeper(sessions, messages.clone());
        let report = sweeper.sweep_once(Utc::now()).await.expect("sweep");

        assert_eq!(report.pruned_messages, 1);
        let remaining = messages.list_recent(&session_id, 10).await.expect("list");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].text, "recent");
    }

    #[tokio::test]
    async fn quiet_sweep_reports_zeroes() {
        let sessions = Arc::new(InMemorySessionRepository::default());
        let messages = Arc::new(InMemoryMessageRepository::default());
        let sweeper = sweeper(sessions, messages);

        let report = sweeper.sweep_once(Utc::now()).await.expect("sweep");
        assert_eq!(report.released_sessions, 0);
        assert_eq!(report.pruned_messages, 0);
    }
}
