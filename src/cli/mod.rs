//! CLI module: command parsing and dispatch
//!
//! All CLI logic lives here. `main.rs` calls `cli::run()`.

pub mod config;
pub mod run;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "netherworld")]
#[command(version)]
#[command(
    about = "Chat front-end that relays conversations to a text-generation backend",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the bot described by each config file
    ///
    /// One config starts its surface (terminal or discord). Several configs
    /// start every Discord bot side by side.
    Run {
        /// Config file paths, or names under ./config/ or ~/.netherworld/
        #[arg(required = true, value_name = "CONFIG")]
        configs: Vec<String>,
    },
    /// Validate configuration files
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show version information
    Version,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Check a configuration file for errors and warnings
    Check {
        /// Config file path, or a name under ./config/ or ~/.netherworld/
        #[arg(value_name = "CONFIG")]
        config: String,
    },
}

/// Logging settings of the first config a command names, or defaults.
fn logging_config(command: &Option<Commands>) -> netherworld::config::LoggingConfig {
    let first = match command {
        Some(Commands::Run { configs }) => configs.first(),
        Some(Commands::Config {
            action: ConfigAction::Check { config },
        }) => Some(config),
        _ => None,
    };
    first
        .and_then(|arg| netherworld::config::Config::load(arg).ok())
        .map(|c| c.logging)
        .unwrap_or_default()
}

pub async fn run() -> Result<()> {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    netherworld::utils::logging::init_logging(&logging_config(&cli.command));

    match cli.command {
        None => {
            let mut cmd = Cli::command();
            cmd.print_help()?;
            println!();
        }
        Some(Commands::Version) => {
            cmd_version();
        }
        Some(Commands::Run { configs }) => {
            run::cmd_run(configs).await?;
        }
        Some(Commands::Config { action }) => {
            config::cmd_config(action).await?;
        }
    }

    Ok(())
}

fn cmd_version() {
    println!("netherworld {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Chat front-end for remote text-generation backends");
}
