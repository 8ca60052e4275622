pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "feedloop",
    about = "Feedloop operator CLI",
    long_about = "Operate the Feedloop feedback bot: migrations, config inspection, readiness checks, and moderation queue snapshots.",
    after_help = "Examples:\n  feedloop doctor --json\n  feedloop config\n  feedloop pending --limit 5"
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
    #[command(about = "Validate config, bot token readiness, DB connectivity, and schema state")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Print feedback counts and the approval rate")]
    Stats,
    #[command(about = "List the newest feedback entries awaiting moderation")]
    Pending {
        #[arg(long, default_value_t = commands::pending::DEFAULT_LIMIT, help = "Maximum entries to list")]
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
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Stats => commands::stats::run(),
        Command::Pending { limit } => commands::pending::run(limit),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
