//! Assemble a load-balanced Fargate service (and the resources it depends on) as a
//! declarative resource graph.
//!
//! # Resources
//!
//! For a service named `api`, the assembler declares:
//!
//! * `api-lb-sg` / `api-sg`: security groups for the load balancer and the service
//! * `api-lb`, `api-service-tg`, `api-lb-listener`: public load balancer stack
//! * `api-db-sg`, `api-db-subnet-group`, `api-db`: PostgreSQL data store
//! * `api-repository`, `api-image`: container registry and pushed image
//! * `api-log-group`, `api-cluster`, `api-tf`, `api-service`: runtime unit
//!
//! Every cross-resource link is a [stack::Reference] to an identifier that only exists once
//! the provisioning engine has created the referenced resource.
//!
//! # Example Configuration
//!
//! ```yaml
//! service_name: api
//! project: ./api
//! region: eu-west-1
//! tags:
//!   team: platform
//! backend:
//!   container_port: 8000
//!   lb_port: 80
//!   cpu: 256
//!   memory: 512
//!   desired_count: 2
//! database:
//!   instance_class: db.t3.micro
//!   allocated_storage: 20
//!   db_name: api
//!   username: api
//! network:
//!   vpc_id: vpc-0123456789abcdef0
//!   public_subnets: [subnet-0a, subnet-0b]
//!   private_subnets: [subnet-1a, subnet-1b]
//! roles:
//!   ecs_execution_role: arn:aws:iam::123456789012:role/ecs-execution
//!   ecs_task_role: arn:aws:iam::123456789012:role/ecs-task
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

pub mod assemble;
pub mod container;
pub mod image;
pub mod network;
pub mod output;
pub mod rds;
pub mod resources;
pub mod stack;

cfg_if::cfg_if! {
    if #[cfg(feature = "cli")] {
        mod plan;
        pub use plan::plan;
        mod render;
        pub use render::render;
        mod validate;
        pub use validate::validate;
    }
}

use network::SubnetKind;
use stack::{Identifier, Reference};

/// Top-level command
pub const CMD: &str = "ecs";

/// Subcommand name
pub const VALIDATE_CMD: &str = "validate";

/// Subcommand name
pub const PLAN_CMD: &str = "plan";

/// Subcommand name
pub const RENDER_CMD: &str = "render";

/// Name of the role assumed by the ECS agent to pull images and write logs
pub const EXECUTION_ROLE: &str = "ecs_execution_role";

/// Name of the role assumed by the running task
pub const TASK_ROLE: &str = "ecs_task_role";

/// Region logs are shipped to
pub const LOG_REGION: &str = "eu-west-1";

/// Default provider region
pub const DEFAULT_REGION: &str = "eu-west-1";

/// Version tag applied to the pushed image
pub const IMAGE_VERSION: &str = "0.0.1";

/// Maximum length of load balancer and target group names
pub const MAX_LB_NAME_LENGTH: usize = 32;

/// Valid Fargate task sizes: CPU units mapped to a memory (MiB) range and step allowed for it
const FARGATE_SIZES: &[(u32, u32, u32, u32)] = &[
    // 512, 1024 or 2048
    (256, 512, 1024, 512),
    (256, 2048, 2048, 1),
    (512, 1024, 4096, 1024),
    (1024, 2048, 8192, 1024),
    (2048, 4096, 16384, 1024),
    (4096, 8192, 30720, 1024),
    (8192, 16384, 61440, 4096),
    (16384, 32768, 122880, 8192),
];

/// Errors that can occur while assembling a deployment
#[derive(Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid {0}: port must be between 1 and 65535")]
    InvalidPort(&'static str),
    #[error("invalid task size: cpu={cpu} memory={memory}")]
    InvalidResources { cpu: u32, memory: u32 },
    #[error("invalid service name: {0}")]
    InvalidServiceName(String),
    #[error("resource name too long: {0} (max {max})", max = MAX_LB_NAME_LENGTH)]
    NameTooLong(String),
    #[error("no {0} subnets configured")]
    MissingSubnets(SubnetKind),
    #[error("missing role: {0}")]
    MissingRole(String),
    #[error("duplicate resource: {0}")]
    DuplicateResource(String),
    #[error("dangling reference: {0}")]
    DanglingReference(Reference),
    #[error("unknown reference: {0}")]
    UnknownReference(Reference),
    #[error("reference already resolved: {0}")]
    AlreadyResolved(Reference),
    #[error("reference never resolved: {0}")]
    Unresolved(Reference),
    #[error("render failed: {0}")]
    Render(String),
}

/// Sizing and ports of the service
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct BackendConfig {
    pub container_port: u16,
    pub lb_port: u16,
    pub cpu: u32,
    pub memory: u32,
    #[serde(default = "default_desired_count")]
    pub desired_count: u32,
}

fn default_desired_count() -> u32 {
    1
}

/// Sizing of the PostgreSQL instance backing the service
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DatabaseConfig {
    #[serde(default = "default_engine_version")]
    pub engine_version: String,
    #[serde(default = "default_instance_class")]
    pub instance_class: String,
    #[serde(default = "default_allocated_storage")]
    pub allocated_storage: u32,
    #[serde(default = "default_db_port")]
    pub port: u16,
    pub db_name: String,
    pub username: String,
}

fn default_engine_version() -> String {
    "16".to_string()
}

fn default_instance_class() -> String {
    "db.t3.micro".to_string()
}

fn default_allocated_storage() -> u32 {
    20
}

fn default_db_port() -> u16 {
    5432
}

/// Identifiers of the network the service is deployed into
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct NetworkConfig {
    pub vpc_id: Identifier,
    pub public_subnets: Vec<Identifier>,
    pub private_subnets: Vec<Identifier>,
}

/// Desired state of a deployment
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub service_name: String,
    pub project: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    pub backend: BackendConfig,
    pub database: DatabaseConfig,
    pub network: NetworkConfig,
    #[serde(default)]
    pub roles: BTreeMap<String, Identifier>,
}

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

impl Config {
    /// Name used for network resources (which do not accept underscores).
    pub fn network_name(&self) -> String {
        self.service_name.replace('_', "-")
    }

    /// Checks ports, task size, and names before anything is declared.
    pub fn validate(&self) -> Result<(), Error> {
        let name = &self.service_name;
        // Derived database identifiers must start with a letter and never repeat hyphens
        if !name.starts_with(|c: char| c.is_ascii_alphabetic())
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
            || name.ends_with(&['-', '_'][..])
            || self.network_name().contains("--")
        {
            return Err(Error::InvalidServiceName(name.clone()));
        }
        let tg_name = format!("{}-service-tg", self.network_name());
        if tg_name.len() > MAX_LB_NAME_LENGTH {
            return Err(Error::NameTooLong(tg_name));
        }
        if self.backend.container_port == 0 {
            return Err(Error::InvalidPort("container_port"));
        }
        if self.backend.lb_port == 0 {
            return Err(Error::InvalidPort("lb_port"));
        }
        if self.database.port == 0 {
            return Err(Error::InvalidPort("database.port"));
        }
        if !valid_task_size(self.backend.cpu, self.backend.memory) {
            return Err(Error::InvalidResources {
                cpu: self.backend.cpu,
                memory: self.backend.memory,
            });
        }
        if self.network.public_subnets.is_empty() {
            return Err(Error::MissingSubnets(SubnetKind::Public));
        }
        if self.network.private_subnets.is_empty() {
            return Err(Error::MissingSubnets(SubnetKind::Private));
        }
        Ok(())
    }
}

/// Returns whether `cpu`/`memory` is a task size Fargate accepts.
pub fn valid_task_size(cpu: u32, memory: u32) -> bool {
    FARGATE_SIZES.iter().any(|&(c, min, max, step)| {
        c == cpu && memory >= min && memory <= max && (memory - min) % step == 0
    })
}

/// Role identifiers available to the task definition
#[derive(Clone, Debug, Default)]
pub struct Roles(BTreeMap<String, Identifier>);

impl Roles {
    pub fn new(roles: BTreeMap<String, Identifier>) -> Self {
        Self(roles)
    }

    pub fn get(&self, name: &str) -> Result<Identifier, Error> {
        self.0
            .get(name)
            .cloned()
            .ok_or_else(|| Error::MissingRole(name.to_string()))
    }
}

impl From<&Config> for Roles {
    fn from(config: &Config) -> Self {
        Self(config.roles.clone())
    }
}
