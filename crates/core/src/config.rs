use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub responder: ResponderConfig,
    pub server: ServerConfig,
    pub engine: EngineConfig,
    pub tenant: TenantConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ResponderConfig {
    pub base_url: String,
    pub api_key: Option<SecretString>,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Seconds of silence after which an agent-held session is released back
    /// to the bot by the periodic sweep.
    pub inactivity_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    pub retention_days: u32,
    pub disconnect_grace_secs: u64,
    pub max_walk_steps: u32,
}

/// Identity fields forwarded to the AI responder. Tenant CRUD lives outside
/// this service; a deployment serves one tenant profile.
#[derive(Clone, Debug, Default)]
pub struct TenantConfig {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub responder_base_url: Option<String>,
    pub responder_api_key: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://flowchat.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            responder: ResponderConfig {
                base_url: "http://localhost:8001".to_string(),
                api_key: None,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8000,
                health_check_port: 8080,
                graceful_shutdown_secs: 15,
            },
            engine: EngineConfig {
                inactivity_timeout_secs: 600,
                sweep_interval_secs: 60,
                retention_days: 30,
                disconnect_grace_secs: 30,
                max_walk_steps: 64,
            },
            tenant: TenantConfig::default(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("flowchat.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(responder) = patch.responder {
            if let Some(base_url) = responder.base_url {
                self.responder.base_url = base_url;
            }
            if let Some(api_key_value) = responder.api_key {
                self.responder.api_key = Some(secret_value(api_key_value));
            }
            if let Some(timeout_secs) = responder.timeout_secs {
                self.responder.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(engine) = patch.engine {
            if let Some(inactivity_timeout_secs) = engine.inactivity_timeout_secs {
                self.engine.inactivity_timeout_secs = inactivity_timeout_secs;
            }
            if let Some(sweep_interval_secs) = engine.sweep_interval_secs {
                self.engine.sweep_interval_secs = sweep_interval_secs;
            }
            if let Some(retention_days) = engine.retention_days {
                self.engine.retention_days = retention_days;
            }
            if let Some(disconnect_grace_secs) = engine.disconnect_grace_secs {
                self.engine.disconnect_grace_secs = disconnect_grace_secs;
            }
            if let Some(max_walk_steps) = engine.max_walk_steps {
                self.engine.max_walk_steps = max_walk_steps;
            }
        }

        if let Some(tenant) = patch.tenant {
            if let Some(name) = tenant.name {
                self.tenant.name = Some(name);
            }
            if let Some(description) = tenant.description {
                self.tenant.description = Some(description);
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("FLOWCHAT_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("FLOWCHAT_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("FLOWCHAT_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("FLOWCHAT_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("FLOWCHAT_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("FLOWCHAT_RESPONDER_BASE_URL") {
            self.responder.base_url = value;
        }
        if let Some(value) = read_env("FLOWCHAT_RESPONDER_API_KEY") {
            self.responder.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("FLOWCHAT_RESPONDER_TIMEOUT_SECS") {
            self.responder.timeout_secs = parse_u64("FLOWCHAT_RESPONDER_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("FLOWCHAT_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("FLOWCHAT_SERVER_PORT") {
            self.server.port = parse_u16("FLOWCHAT_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("FLOWCHAT_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port =
                parse_u16("FLOWCHAT_SERVER_HEALTH_CHECK_PORT", &value)?;
        }
        if let Some(value) = read_env("FLOWCHAT_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("FLOWCHAT_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("FLOWCHAT_ENGINE_INACTIVITY_TIMEOUT_SECS") {
            self.engine.inactivity_timeout_secs =
                parse_u64("FLOWCHAT_ENGINE_INACTIVITY_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("FLOWCHAT_ENGINE_SWEEP_INTERVAL_SECS") {
            self.engine.sweep_interval_secs =
                parse_u64("FLOWCHAT_ENGINE_SWEEP_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = read_env("FLOWCHAT_ENGINE_RETENTION_DAYS") {
            self.engine.retention_days = parse_u32("FLOWCHAT_ENGINE_RETENTION_DAYS", &value)?;
        }
        if let Some(value) = read_env("FLOWCHAT_ENGINE_DISCONNECT_GRACE_SECS") {
            self.engine.disconnect_grace_secs =
                parse_u64("FLOWCHAT_ENGINE_DISCONNECT_GRACE_SECS", &value)?;
        }
        if let Some(value) = read_env("FLOWCHAT_ENGINE_MAX_WALK_STEPS") {
            self.engine.max_walk_steps = parse_u32("FLOWCHAT_ENGINE_MAX_WALK_STEPS", &value)?;
        }

        if let Some(value) = read_env("FLOWCHAT_TENANT_NAME") {
            self.tenant.name = Some(value);
        }
        if let Some(value) = read_env("FLOWCHAT_TENANT_DESCRIPTION") {
            self.tenant.description = Some(value);
        }

        let log_level =
            read_env("FLOWCHAT_LOGGING_LEVEL").or_else(|| read_env("FLOWCHAT_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("FLOWCHAT_LOGGING_FORMAT").or_else(|| read_env("FLOWCHAT_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(base_url) = overrides.responder_base_url {
            self.responder.base_url = base_url;
        }
        if let Some(api_key) = overrides.responder_api_key {
            self.responder.api_key = Some(secret_value(api_key));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_responder(&self.responder)?;
        validate_server(&self.server)?;
        validate_engine(&self.engine)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("flowchat.toml"), PathBuf::from("config/flowchat.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_responder(responder: &ResponderConfig) -> Result<(), ConfigError> {
    let base_url = responder.base_url.trim();
    if base_url.is_empty() {
        return Err(ConfigError::Validation(
            "responder.base_url is required (the AI responder service endpoint)".to_string(),
        ));
    }
    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "responder.base_url must start with http:// or https://".to_string(),
        ));
    }

    if responder.timeout_secs == 0 || responder.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "responder.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if let Some(api_key) = &responder.api_key {
        if api_key.expose_secret().trim().is_empty() {
            return Err(ConfigError::Validation(
                "responder.api_key must not be blank when set".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    if server.port == server.health_check_port {
        return Err(ConfigError::Validation(
            "server.port and server.health_check_port must differ".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_engine(engine: &EngineConfig) -> Result<(), ConfigError> {
    if engine.inactivity_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "engine.inactivity_timeout_secs must be greater than zero".to_string(),
        ));
    }
    if engine.sweep_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "engine.sweep_interval_secs must be greater than zero".to_string(),
        ));
    }
    if engine.retention_days == 0 {
        return Err(ConfigError::Validation(
            "engine.retention_days must be greater than zero".to_string(),
        ));
    }
    if engine.max_walk_steps == 0 {
        return Err(ConfigError::Validation(
            "engine.max_walk_steps must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    responder: Option<ResponderPatch>,
    server: Option<ServerPatch>,
    engine: Option<EnginePatch>,
    tenant: Option<TenantPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponderPatch {
    base_url: Option<String>,
    api_key: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct EnginePatch {
    inactivity_timeout_secs: Option<u64>,
    sweep_interval_secs: Option<u64>,
    retention_days: Option<u32>,
    disconnect_grace_secs: Option<u64>,
    max_walk_steps: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct TenantPatch {
    name: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
