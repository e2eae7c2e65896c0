//! `wanlink config`: show the effective configuration.

use wanlink_config::config_path;

use crate::cli::{ConfigCommand, GlobalOpts};
use crate::error::CliError;

pub fn handle(cmd: &ConfigCommand, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        ConfigCommand::Path => {
            let path = global.config.clone().unwrap_or_else(config_path);
            println!("{}", path.display());
        }
        ConfigCommand::Show => {
            let mut config = crate::load_config(global)?;
            if config.dashboard.api_key.is_some() {
                config.dashboard.api_key = Some("********".into());
            }
            print!("{}", config.to_toml()?);
        }
    }
    Ok(())
}
