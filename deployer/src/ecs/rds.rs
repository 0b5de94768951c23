//! PostgreSQL data store reachable only from the service.

use crate::ecs::{
    network::{NetworkProvider, SubnetKind},
    output::Output,
    resources::{DbInstance, DbSubnetGroup, Rule, SecurityGroup, Source, ANYWHERE},
    stack::{Attribute, Handle, Stack},
    Config, Error,
};
use tracing::info;

/// Database engine
pub const ENGINE: &str = "postgres";

/// A provisioned data store
pub trait DataStore {
    /// Host the service connects to.
    fn host(&self) -> Output<String>;
}

/// Declares a data store for a service
pub trait DataStoreProvisioner {
    type Store: DataStore;

    /// Declares the store, restricting access to members of `service_sg`.
    fn provision<N: NetworkProvider>(
        &self,
        stack: &mut Stack,
        network: &N,
        service_sg: &Handle,
        config: &Config,
    ) -> Result<Self::Store, Error>;
}

/// Single-instance RDS PostgreSQL in the private subnets
#[derive(Clone, Copy, Debug, Default)]
pub struct Rds;

/// Resources declared by [Rds]
#[derive(Clone, Debug)]
pub struct RdsInstance {
    pub security_group: Handle,
    pub subnet_group: Handle,
    pub instance: Handle,
    host: Output<String>,
}

impl DataStore for RdsInstance {
    fn host(&self) -> Output<String> {
        self.host.clone()
    }
}

impl DataStoreProvisioner for Rds {
    type Store = RdsInstance;

    fn provision<N: NetworkProvider>(
        &self,
        stack: &mut Stack,
        network: &N,
        service_sg: &Handle,
        config: &Config,
    ) -> Result<RdsInstance, Error> {
        let name = config.network_name().to_lowercase();
        let database = &config.database;

        let group_name = format!("{name}-db-sg");
        let security_group = SecurityGroup {
            group_name: group_name.clone(),
            description: "Controls access to the database".to_string(),
            vpc_id: network.vpc_id(),
            ingress: vec![Rule::tcp(
                database.port,
                Source::SecurityGroup(service_sg.id().into()),
            )],
            egress: vec![Rule::all(Source::Cidr(ANYWHERE.to_string()))],
            tags: stack.provider().tags(&[("Name", group_name.as_str())]),
        };
        let security_group = stack.declare(group_name, security_group)?;

        let subnet_group_name = format!("{name}-db-subnet-group");
        let subnet_group = DbSubnetGroup {
            subnet_group_name: subnet_group_name.clone(),
            subnet_ids: network.subnet_ids(SubnetKind::Private),
            tags: stack.provider().tags(&[]),
        };
        let subnet_group = stack.declare(subnet_group_name, subnet_group)?;

        let identifier = format!("{name}-db");
        let instance = DbInstance {
            identifier: identifier.clone(),
            engine: ENGINE.to_string(),
            engine_version: database.engine_version.clone(),
            instance_class: database.instance_class.clone(),
            allocated_storage: database.allocated_storage,
            db_name: database.db_name.clone(),
            username: database.username.clone(),
            manage_master_user_password: true,
            port: database.port,
            db_subnet_group_name: subnet_group.attribute(Attribute::Name).into(),
            vpc_security_group_ids: vec![security_group.id().into()],
            publicly_accessible: false,
            skip_final_snapshot: true,
            tags: stack.provider().tags(&[]),
        };
        let instance = stack.declare(identifier, instance)?;
        info!(
            instance = instance.name(),
            class = database.instance_class.as_str(),
            "declared database"
        );

        let host = stack.output(instance.attribute(Attribute::Address));
        Ok(RdsInstance {
            security_group,
            subnet_group,
            instance,
            host,
        })
    }
}
