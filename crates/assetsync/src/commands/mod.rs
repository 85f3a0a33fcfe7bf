//! Command handlers.

pub mod config_cmd;
pub mod watch;

use assetsync_config::Config;

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Load the config file named by `--config`, or the platform default.
pub fn load_config(global: &GlobalOpts) -> Result<Config, CliError> {
    let cfg = match &global.config {
        Some(path) => assetsync_config::load_config_from(path)?,
        None => assetsync_config::load_config()?,
    };
    Ok(cfg)
}
