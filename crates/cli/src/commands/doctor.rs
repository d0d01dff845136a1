use serde::Serialize;

use flowchat_core::config::{AppConfig, LoadOptions};
use flowchat_db::connect_with_settings;

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: &'static str,
    detail: String,
}

pub fn run(json: bool) -> String {
    let mut checks = Vec::new();

    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config",
                status: "ok",
                detail: "configuration loaded and validated".to_string(),
            });
            Some(config)
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config",
                status: "error",
                detail: error.to_string(),
            });
            None
        }
    };

    if let Some(config) = &config {
        checks.push(database_check(config));
        checks.push(DoctorCheck {
            name: "responder",
            status: "ok",
            detail: format!("responder endpoint configured at {}", config.responder.base_url),
        });
    }

    render(checks, json)
}

fn database_check(config: &AppConfig) -> DoctorCheck {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return DoctorCheck {
                name: "database",
                status: "error",
                detail: format!("failed to initialize async runtime: {error}"),
            };
        }
    };

    let outcome = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await?;
        sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(&pool).await?;
        pool.close().await;
        Ok::<(), sqlx::Error>(())
    });

    match outcome {
        Ok(()) => DoctorCheck {
            name: "database",
            status: "ok",
            detail: "database reachable".to_string(),
        },
        Err(error) => DoctorCheck {
            name: "database",
            status: "error",
            detail: format!("database check failed: {error}"),
        },
    }
}

fn render(checks: Vec<DoctorCheck>, json: bool) -> String {
    if json {
        return serde_json::to_string_pretty(&checks)
            .unwrap_or_else(|error| format!("{{\"error\":\"{error}\"}}"));
    }

    checks
        .iter()
        .map(|check| format!("[{}] {}: {}", check.status, check.name, check.detail))
        .collect::<Vec<_>>()
        .join("\n")
}
