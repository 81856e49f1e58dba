use std::path::{Path, PathBuf};

use crate::cli::ConfigCommands;
use crate::config::{default_config_path, CliConfig};
use crate::error::CliError;

pub fn run_config(command: ConfigCommands, config_path: Option<&Path>) -> Result<(), CliError> {
    let path = config_path.map_or_else(default_config_path, Path::to_path_buf);
    match command {
        ConfigCommands::Show => {
            let config = CliConfig::load_from_path(&path).map_err(CliError::Config)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        ConfigCommands::Path => println!("{}", path.display()),
        ConfigCommands::Init {
            database,
            max_parameters,
            force_naive,
            keep_duplicate_updates,
        } => {
            run_config_init(
                &path,
                database,
                max_parameters,
                force_naive,
                keep_duplicate_updates,
            )?;
            println!("{}", path.display());
        }
    }
    Ok(())
}

pub fn run_config_init(
    path: &Path,
    database: Option<PathBuf>,
    max_parameters: Option<usize>,
    force_naive: bool,
    keep_duplicate_updates: bool,
) -> Result<CliConfig, CliError> {
    if max_parameters == Some(0) {
        return Err(CliError::Config(
            "max_parameters must be greater than zero".to_string(),
        ));
    }

    let mut config = CliConfig::load_from_path(path).map_err(CliError::Config)?;
    if database.is_some() {
        config.database.path = database;
    }
    if max_parameters.is_some() {
        config.database.max_parameters = max_parameters;
    }
    config.database.force_naive = force_naive;
    config.ignore_duplicate_updates = !keep_duplicate_updates;
    config.save_to_path(path).map_err(CliError::Config)?;
    Ok(config)
}
