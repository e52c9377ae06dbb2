//! Configuration view commands: `taskboard config`.

use anyhow::Result;
use std::path::Path;

use crate::ConfigCommands;
use taskboard::config::{CONFIG_FILE, TaskboardToml};

pub fn cmd_config(
    config_dir: &Path,
    effective: &TaskboardToml,
    command: Option<ConfigCommands>,
) -> Result<()> {
    let config_path = config_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Taskboard Configuration");
            println!("=======================");
            println!();
            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("Config file: (none, using defaults)");
            }
            println!();

            println!("[server]");
            println!("  host = \"{}\"", effective.server.host);
            println!("  port = {}", effective.server.port);
            println!("  db_path = \"{}\"", effective.server.db_path.display());
            println!("  dev_mode = {}", effective.server.dev_mode);
            println!();
            println!("[log]");
            println!("  filter = \"{}\"", effective.log.filter);
            println!("  json = {}", effective.log.json);
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("Config file already exists: {}", config_path.display());
                return Ok(());
            }
            std::fs::create_dir_all(config_dir)?;
            TaskboardToml::default().save(&config_path)?;
            println!("Created {}", config_path.display());
        }
    }

    Ok(())
}
