//! Switchboard server binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use sb_gateway::bootstrap;

#[derive(Parser)]
#[command(name = "switchboard", about = "Multi-session coding-agent server")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the server.
    Run {
        /// Path to the TOML config file.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Write a default config file and exit.
    Init {
        /// Where to write the config.
        #[arg(long, default_value = "switchboard.toml")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,sb_gateway=debug")),
        )
        .init();

    match Cli::parse().command {
        Command::Run { config } => {
            let config = bootstrap::load_config(config.as_deref())?;
            let state = bootstrap::build_state(config)?;
            bootstrap::serve(state).await
        }
        Command::Init { path } => {
            if path.exists() {
                anyhow::bail!("{} already exists", path.display());
            }
            let default = sb_domain::config::Config::default();
            std::fs::write(&path, toml::to_string_pretty(&default)?)?;
            println!("wrote {}", path.display());
            Ok(())
        }
    }
}
