//! `render` subcommand for `ecs`

use crate::ecs::{assemble::render_container_spec, output::Output, Config, Error};
use std::{fs::File, path::PathBuf};
use tracing::info;

/// Prints the container definitions for a known image and database host
pub async fn render(config: &PathBuf, image: &str, db_host: &str) -> Result<(), Error> {
    let config: Config = {
        let config_file = File::open(config)?;
        serde_yaml::from_reader(config_file)?
    };
    config.validate()?;
    info!(service = config.service_name.as_str(), "loaded configuration");

    let log_group = format!("/ecs/{}", config.service_name);
    let definitions = render_container_spec(
        &Output::known(image.to_string()),
        &log_group,
        &Output::known(db_host.to_string()),
        &config,
    )
    .get()
    .await?;
    println!("{definitions}");
    Ok(())
}
