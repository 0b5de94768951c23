//! Container definition rendered into the task definition.

use crate::ecs::LOG_REGION;
use serde::Serialize;
use std::collections::BTreeMap;

/// CPU units reserved for the container
pub const CONTAINER_CPU: u32 = 10;

/// Memory (MiB) reserved for the container
pub const CONTAINER_MEMORY: u32 = 512;

/// Value of the `ENVIRONMENT` variable
pub const ENVIRONMENT: &str = "PROD";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortMapping {
    pub container_port: u16,
    pub protocol: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EnvironmentVariable {
    pub name: String,
    pub value: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfiguration {
    pub log_driver: String,
    pub options: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerDefinition {
    pub name: String,
    pub image: String,
    pub essential: bool,
    pub cpu: u32,
    pub memory: u32,
    pub port_mappings: Vec<PortMapping>,
    pub command: Vec<String>,
    pub environment: Vec<EnvironmentVariable>,
    pub log_configuration: LogConfiguration,
}

impl ContainerDefinition {
    /// Defines the single service container once its image and database host are known.
    pub fn new(service_name: &str, port: u16, image: &str, db_host: &str, log_group: &str) -> Self {
        let options = BTreeMap::from([
            ("awslogs-group".to_string(), log_group.to_string()),
            ("awslogs-region".to_string(), LOG_REGION.to_string()),
            (
                "awslogs-stream-prefix".to_string(),
                format!("{service_name}-log-stream"),
            ),
        ]);
        Self {
            name: service_name.to_string(),
            image: image.to_string(),
            essential: true,
            cpu: CONTAINER_CPU,
            memory: CONTAINER_MEMORY,
            port_mappings: vec![PortMapping {
                container_port: port,
                protocol: "tcp".to_string(),
            }],
            command: vec![service_name.to_string(), port.to_string()],
            environment: vec![
                EnvironmentVariable {
                    name: "ENVIRONMENT".to_string(),
                    value: ENVIRONMENT.to_string(),
                },
                EnvironmentVariable {
                    name: "DB_HOST".to_string(),
                    value: db_host.to_string(),
                },
            ],
            log_configuration: LogConfiguration {
                log_driver: "awslogs".to_string(),
                options,
            },
        }
    }
}

/// Renders the container list expected by the task definition.
pub fn render(
    service_name: &str,
    port: u16,
    image: &str,
    db_host: &str,
    log_group: &str,
) -> Result<String, serde_json::Error> {
    serde_json::to_string(&[ContainerDefinition::new(
        service_name,
        port,
        image,
        db_host,
        log_group,
    )])
}
