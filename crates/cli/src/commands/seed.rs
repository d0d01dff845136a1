use crate::commands::CommandResult;
use flowchat_core::config::{AppConfig, LoadOptions};
use flowchat_core::domain::graph::BotId;
use flowchat_db::fixtures::demo_graph;
use flowchat_db::repositories::{GraphRepository, SqlGraphRepository};
use flowchat_db::{connect_with_settings, migrations};

pub fn run(bot_id: &str, company_id: &str) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "seed",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "seed",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let bot = BotId(bot_id.to_string());
    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let graphs = SqlGraphRepository::new(pool.clone());
        graphs
            .save_graph(&demo_graph(&bot))
            .await
            .map_err(|error| ("seed_graph", error.to_string(), 6u8))?;

        pool.close().await;
        Ok::<(), (&'static str, String, u8)>(())
    });

    match result {
        Ok(()) => CommandResult::success(
            "seed",
            format!("seeded demo flow for bot `{bot_id}` (company `{company_id}`)"),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}
