pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "parley",
    about = "Parley operator CLI",
    long_about = "Inspect configuration, apply migrations, and look at the webhook queue and approval backlog.",
    after_help = "Examples:\n  parley doctor --json\n  parley queue-stats\n  parley dead-letters --limit 20"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, agent provider, platform delivery, and database schema")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Show webhook queue counters by status")]
    QueueStats,
    #[command(about = "List suspended runs awaiting human approval")]
    Approvals,
    #[command(about = "List approved replies that could not be delivered")]
    Undelivered,
    #[command(about = "List dead-lettered queue items with their last error")]
    DeadLetters {
        #[arg(long, default_value_t = 50, help = "Maximum items to list")]
        limit: u32,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::QueueStats => commands::queue::stats(),
        Command::Approvals => commands::approvals::run(),
        Command::Undelivered => commands::approvals::undelivered(),
        Command::DeadLetters { limit } => commands::queue::dead_letters(limit),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
