use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use flowchat_core::config::{AppConfig, ConfigError, LoadOptions};
use flowchat_db::repositories::{
    GraphRepository, MessageRepository, SessionRepository, SqlGraphRepository,
    SqlMessageRepository, SqlSessionRepository,
};
use flowchat_db::{connect_with_settings, migrations, DbPool};
use flowchat_engine::delivery::DeliveryChannel;
use flowchat_engine::executor::FlowExecutor;
use flowchat_engine::handoff::HandoffService;
use flowchat_engine::inbound::InboundRouter;
use flowchat_engine::sweeper::Sweeper;
use flowchat_responder::{AiResponder, HttpResponder, ResponderError};

use crate::registry::InMemoryConnectionRegistry;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub registry: Arc<InMemoryConnectionRegistry>,
    pub inbound: Arc<InboundRouter>,
    pub handoff: Arc<HandoffService>,
    pub sweeper: Arc<Sweeper>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("responder client setup failed: {0}")]
    Responder(#[from] ResponderError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let sessions: Arc<dyn SessionRepository> =
        Arc::new(SqlSessionRepository::new(db_pool.clone()));
    let messages: Arc<dyn MessageRepository> =
        Arc::new(SqlMessageRepository::new(db_pool.clone()));
    let graphs: Arc<dyn GraphRepository> = Arc::new(SqlGraphRepository::new(db_pool.clone()));

    let registry = Arc::new(InMemoryConnectionRegistry::default());
    let delivery: Arc<dyn DeliveryChannel> = registry.clone();

    let responder: Arc<dyn AiResponder> =
        Arc::new(HttpResponder::from_config(&config.responder)?);

    let executor = FlowExecutor::new(
        graphs.clone(),
        sessions.clone(),
        messages.clone(),
        delivery.clone(),
        responder,
        config.tenant.clone(),
        config.engine.max_walk_steps,
    );
    let inbound =
        Arc::new(InboundRouter::new(sessions.clone(), messages.clone(), graphs, executor));
    let handoff = Arc::new(HandoffService::new(sessions.clone(), messages.clone(), delivery));
    let sweeper = Arc::new(Sweeper::new(sessions, messages, &config.engine));

    Ok(Application { config, db_pool, registry, inbound, handoff, sweeper })
}
