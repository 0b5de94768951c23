//! Network the service is attached to.

use crate::ecs::{stack::Identifier, NetworkConfig};
use std::fmt;

/// Visibility of a subnet
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SubnetKind {
    Public,
    Private,
}

impl fmt::Display for SubnetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubnetKind::Public => write!(f, "public"),
            SubnetKind::Private => write!(f, "private"),
        }
    }
}

/// Source of the VPC and subnet identifiers resources are placed in
pub trait NetworkProvider {
    fn vpc_id(&self) -> Identifier;

    fn subnet_ids(&self, kind: SubnetKind) -> Vec<Identifier>;
}

/// Network whose identifiers are listed in the deployment configuration
#[derive(Clone, Debug)]
pub struct StaticNetwork {
    config: NetworkConfig,
}

impl StaticNetwork {
    pub fn new(config: NetworkConfig) -> Self {
        Self { config }
    }
}

impl NetworkProvider for StaticNetwork {
    fn vpc_id(&self) -> Identifier {
        self.config.vpc_id.clone()
    }

    fn subnet_ids(&self, kind: SubnetKind) -> Vec<Identifier> {
        match kind {
            SubnetKind::Public => self.config.public_subnets.clone(),
            SubnetKind::Private => self.config.private_subnets.clone(),
        }
    }
}
