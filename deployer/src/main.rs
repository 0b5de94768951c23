//! Deployer CLI

use clap::{Arg, ArgAction, Command};
use ecs_deployer::ecs;
use std::path::PathBuf;
use tracing::error;

/// Returns the version of the crate.
pub const fn crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Flag for verbose output
const VERBOSE_FLAG: &str = "verbose";

/// Entrypoint for the Deployer CLI
#[tokio::main]
async fn main() -> std::process::ExitCode {
    // Define application
    let matches = Command::new("deployer")
        .version(crate_version())
        .about("Assemble load-balanced container services as declarative resource graphs.")
        .arg(
            Arg::new(VERBOSE_FLAG)
                .short('v')
                .long(VERBOSE_FLAG)
                .action(ArgAction::SetTrue),
        )
        .subcommand(
            Command::new(ecs::CMD)
                .about("Declare a Fargate service behind an application load balancer, with its database, image repository, and logs.")
                .subcommand(
                    Command::new(ecs::VALIDATE_CMD)
                        .about("Check a YAML configuration file without declaring any resources.")
                        .arg(
                            Arg::new("config")
                                .long("config")
                                .required(true)
                                .help("Path to YAML config file")
                                .value_parser(clap::value_parser!(PathBuf)),
                        ),
                )
                .subcommand(
                    Command::new(ecs::PLAN_CMD)
                        .about("Assemble the resource graph and write it as YAML.")
                        .arg(
                            Arg::new("config")
                                .long("config")
                                .required(true)
                                .help("Path to YAML config file")
                                .value_parser(clap::value_parser!(PathBuf)),
                        )
                        .arg(
                            Arg::new("output")
                                .long("output")
                                .help("Path to write the plan to (stdout if omitted)")
                                .value_parser(clap::value_parser!(PathBuf)),
                        ),
                )
                .subcommand(
                    Command::new(ecs::RENDER_CMD)
                        .about("Print the container definitions for a known image and database host.")
                        .arg(
                            Arg::new("config")
                                .long("config")
                                .required(true)
                                .help("Path to YAML config file")
                                .value_parser(clap::value_parser!(PathBuf)),
                        )
                        .arg(
                            Arg::new("image")
                                .long("image")
                                .required(true)
                                .help("Pullable image reference")
                                .value_parser(clap::value_parser!(String)),
                        )
                        .arg(
                            Arg::new("db-host")
                                .long("db-host")
                                .required(true)
                                .help("Database host passed to the container")
                                .value_parser(clap::value_parser!(String)),
                        ),
                ),
        )
        .get_matches();

    // Create logger
    let level = if matches.get_flag(VERBOSE_FLAG) {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    // Parse subcommands
    if let Some(ecs_matches) = matches.subcommand_matches(ecs::CMD) {
        match ecs_matches.subcommand() {
            Some((ecs::VALIDATE_CMD, matches)) => {
                let config_path = matches.get_one::<PathBuf>("config").unwrap();
                if let Err(e) = ecs::validate(config_path) {
                    error!(error=?e, "invalid configuration");
                } else {
                    return std::process::ExitCode::SUCCESS;
                }
            }
            Some((ecs::PLAN_CMD, matches)) => {
                let config_path = matches.get_one::<PathBuf>("config").unwrap();
                let output = matches.get_one::<PathBuf>("output");
                if let Err(e) = ecs::plan(config_path, output).await {
                    error!(error=?e, "failed to plan deployment");
                } else {
                    return std::process::ExitCode::SUCCESS;
                }
            }
            Some((ecs::RENDER_CMD, matches)) => {
                let config_path = matches.get_one::<PathBuf>("config").unwrap();
                let image = matches.get_one::<String>("image").unwrap();
                let db_host = matches.get_one::<String>("db-host").unwrap();
                if let Err(e) = ecs::render(config_path, image, db_host).await {
                    error!(error=?e, "failed to render container definitions");
                } else {
                    return std::process::ExitCode::SUCCESS;
                }
            }
            Some((cmd, _)) => {
                error!(cmd, "invalid subcommand");
            }
            None => {
                error!("no subcommand provided");
            }
        }
    } else if let Some(cmd) = matches.subcommand_name() {
        error!(cmd, "invalid subcommand");
    } else {
        error!("no subcommand provided");
    }
    std::process::ExitCode::FAILURE
}
