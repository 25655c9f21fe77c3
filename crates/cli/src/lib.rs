pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "dealpilot",
    about = "DealPilot agent runtime operator CLI",
    long_about = "Operate the DealPilot agent runtime: migrations, config inspection, readiness \
                  checks, and execution and alert history.",
    after_help = "Examples:\n  dealpilot doctor --json\n  \
                  dealpilot executions --agent deal_health\n  \
                  dealpilot alerts --user rep-1 --status pending"
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
    #[command(about = "Validate config, DB connectivity, and LLM client readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "List recent execution records of one agent kind")]
    Executions {
        #[arg(long, help = "Agent kind, e.g. `deal_health`")]
        agent: String,
        #[arg(long, default_value_t = 20, help = "Maximum number of records")]
        limit: u32,
    },
    #[command(about = "List alerts addressed to a user")]
    Alerts {
        #[arg(long, help = "Recipient user id")]
        user: String,
        #[arg(long, help = "Filter by status: pending|acknowledged|resolved|dismissed")]
        status: Option<String>,
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
        Command::Executions { agent, limit } => commands::executions::run(&agent, limit),
        Command::Alerts { user, status } => commands::alerts::run(&user, status.as_deref()),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
