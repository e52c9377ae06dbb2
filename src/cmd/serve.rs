//! Board server commands: `taskboard serve` and `taskboard init`.

use anyhow::Result;
use std::path::Path;

use taskboard::board::server::{self, ServerConfig};
use taskboard::config::{CONFIG_FILE, TaskboardToml};

pub async fn cmd_serve(config: &TaskboardToml) -> Result<()> {
    server::start_server(ServerConfig::from(&config.server)).await
}

pub fn cmd_init(config_dir: &Path, config: &TaskboardToml) -> Result<()> {
    std::fs::create_dir_all(config_dir)?;
    let config_path = config_dir.join(CONFIG_FILE);
    if !config_path.exists() {
        TaskboardToml::default().save(&config_path)?;
        println!("Wrote default config to {}", config_path.display());
    }

    server::open_database(&config.server.db_path)?;
    println!(
        "Taskboard database initialized at {}",
        config.server.db_path.display()
    );
    Ok(())
}
