//! Config subcommand handlers.

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::error::CliError;

pub fn handle(args: &ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Show => {
            let cfg = super::load_config(global)?;
            print!("{}", cfg.to_toml()?);
            Ok(())
        }

        ConfigCommand::Path => {
            let path = global
                .config
                .clone()
                .unwrap_or_else(assetsync_config::config_path);
            println!("{}", path.display());
            Ok(())
        }
    }
}
