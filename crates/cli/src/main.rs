//! chatrelay CLI: the main entry point.
//!
//! Commands:
//! - `serve`   : Start the webhook gateway
//! - `upload`  : Upload a knowledge file for a profile
//! - `profile` : Manage profile → owner mappings
//! - `doctor`  : Diagnose configuration and storage

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;
mod shutdown;

#[derive(Parser)]
#[command(
    name = "chatrelay",
    about = "chatrelay: relay marketplace chats to an AI assistant",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the TOML config file (default: ./chatrelay.toml)
    #[arg(short, long, global = true, env = "CHATRELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the webhook gateway
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Upload a knowledge file to a profile's assistant
    Upload {
        /// Profile the file belongs to
        #[arg(short, long)]
        profile: String,

        /// File to upload (`.json` files are stored as assertions)
        file: PathBuf,
    },

    /// Manage profiles
    Profile {
        #[command(subcommand)]
        action: ProfileAction,
    },

    /// Diagnose configuration and storage
    Doctor,
}

#[derive(Subcommand)]
enum ProfileAction {
    /// Map a profile name to a messaging account id
    Add {
        name: String,
        owner_id: i64,
    },
    /// Show the account id a profile maps to
    Show { name: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Serve { port } => commands::serve::run(config_path, port).await?,
        Commands::Upload { profile, file } => {
            commands::upload::run(config_path, &profile, &file).await?
        }
        Commands::Profile { action } => match action {
            ProfileAction::Add { name, owner_id } => {
                commands::profile::add(config_path, &name, owner_id).await?
            }
            ProfileAction::Show { name } => commands::profile::show(config_path, &name).await?,
        },
        Commands::Doctor => commands::doctor::run(config_path).await?,
    }

    Ok(())
}
