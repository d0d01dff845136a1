use flowchat_core::config::{AppConfig, LoadOptions, LogFormat};

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("configuration issue: {error}"),
    };

    let format = match config.logging.format {
        LogFormat::Compact => "compact",
        LogFormat::Pretty => "pretty",
        LogFormat::Json => "json",
    };

    let mut lines = vec![
        format!("database.url = {}", config.database.url),
        format!("database.max_connections = {}", config.database.max_connections),
        format!("database.timeout_secs = {}", config.database.timeout_secs),
        format!("responder.base_url = {}", config.responder.base_url),
        format!(
            "responder.api_key = {}",
            if config.responder.api_key.is_some() { "<redacted>" } else { "<unset>" }
        ),
        format!("responder.timeout_secs = {}", config.responder.timeout_secs),
        format!("server.bind_address = {}", config.server.bind_address),
        format!("server.port = {}", config.server.port),
        format!("server.health_check_port = {}", config.server.health_check_port),
        format!("engine.inactivity_timeout_secs = {}", config.engine.inactivity_timeout_secs),
        format!("engine.sweep_interval_secs = {}", config.engine.sweep_interval_secs),
        format!("engine.retention_days = {}", config.engine.retention_days),
        format!("engine.disconnect_grace_secs = {}", config.engine.disconnect_grace_secs),
        format!("engine.max_walk_steps = {}", config.engine.max_walk_steps),
        format!("logging.level = {}", config.logging.level),
        format!("logging.format = {format}"),
    ];

    if let Some(name) = &config.tenant.name {
        lines.push(format!("tenant.name = {name}"));
    }
    if let Some(description) = &config.tenant.description {
        lines.push(format!("tenant.description = {description}"));
    }

    lines.join("\n")
}
