use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use taskboard::config::{CONFIG_DIR, CliOverrides, TaskboardToml};

mod cmd;

#[derive(Parser)]
#[command(name = "taskboard")]
#[command(version, about = "Multi-tenant task board with ordered task positioning")]
pub struct Cli {
    /// Log at debug level regardless of configuration
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Directory containing `.taskboard/` (defaults to the current directory)
    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP API
    Serve {
        /// Port to serve on
        #[arg(short, long)]
        port: Option<u16>,

        /// Database path
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Enable dev mode (permissive CORS, bind all interfaces)
        #[arg(long)]
        dev: bool,
    },
    /// Create the database and a default config file
    Init {
        /// Database path
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    /// View or initialize configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Write a default taskboard.toml
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    let config_dir = project_dir.join(CONFIG_DIR);

    let overrides = match &cli.command {
        Commands::Serve { port, db_path, dev } => CliOverrides {
            port: *port,
            db_path: db_path.clone(),
            dev_mode: *dev,
        },
        Commands::Init { db_path } => CliOverrides {
            db_path: db_path.clone(),
            ..Default::default()
        },
        Commands::Config { .. } => CliOverrides::default(),
    };
    let mut config = TaskboardToml::resolve(&config_dir, &overrides)?;
    if config.server.db_path.is_relative() {
        config.server.db_path = project_dir.join(&config.server.db_path);
    }
    if cli.verbose {
        config.log.filter = "taskboard=debug,tower_http=debug".to_string();
    }
    taskboard::logging::init(&config.log);

    match &cli.command {
        Commands::Serve { .. } => cmd::cmd_serve(&config).await?,
        Commands::Init { .. } => cmd::cmd_init(&config_dir, &config)?,
        Commands::Config { command } => cmd::cmd_config(&config_dir, &config, command.clone())?,
    }

    Ok(())
}
