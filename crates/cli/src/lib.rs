pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "flowchat",
    about = "Flowchat operator CLI",
    long_about = "Operate Flowchat runtime readiness, migrations, config inspection, and demo seeding.",
    after_help = "Examples:\n  flowchat doctor --json\n  flowchat config\n  flowchat seed --bot-id bot-demo"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the deterministic demo conversation flow for a bot")]
    Seed {
        #[arg(long, default_value = "bot-demo", help = "Bot to seed with the demo flow")]
        bot_id: String,
        #[arg(long, default_value = "co-demo", help = "Company the demo bot belongs to")]
        company_id: String,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, database connectivity, and responder endpoint shape")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed { bot_id, company_id } => commands::seed::run(&bot_id, &company_id),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
