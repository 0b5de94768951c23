//! `validate` subcommand for `ecs`

use crate::ecs::{Config, Error};
use std::{fs::File, path::PathBuf};
use tracing::info;

/// Checks a configuration file without declaring anything
pub fn validate(config: &PathBuf) -> Result<(), Error> {
    let config: Config = {
        let config_file = File::open(config)?;
        serde_yaml::from_reader(config_file)?
    };
    config.validate()?;
    info!(
        service = config.service_name.as_str(),
        cpu = config.backend.cpu,
        memory = config.backend.memory,
        "configuration is valid"
    );
    Ok(())
}
