//! `plan` subcommand for `ecs`

use crate::ecs::{assemble, Config, Error};
use std::{fs::File, path::PathBuf};
use tracing::{debug, info};

/// Assembles the deployment and writes the resource graph, with every pending identifier shown
/// as a `${resource.attribute}` placeholder
pub async fn plan(config: &PathBuf, output: Option<&PathBuf>) -> Result<(), Error> {
    // Load configuration from YAML file
    let config: Config = {
        let config_file = File::open(config)?;
        serde_yaml::from_reader(config_file)?
    };
    info!(service = config.service_name.as_str(), "loaded configuration");

    // Declare all resources
    let mut deployment = assemble::from_config(&config)?;

    // Stand in for the provisioning engine
    deployment
        .stack
        .resolve_all(|reference| reference.to_string());
    let definitions = deployment.container_definitions.get().await?;
    debug!(definitions = definitions.as_str(), "rendered container definitions");

    // Write plan
    let plan = serde_yaml::to_string(&deployment.stack)?;
    match output {
        Some(path) => {
            std::fs::write(path, plan)?;
            info!(path = ?path, resources = deployment.stack.len(), "wrote plan");
        }
        None => print!("{plan}"),
    }
    Ok(())
}
