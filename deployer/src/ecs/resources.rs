//! Resource declarations understood by the provisioning engine.
//!
//! Each type is an immutable value object. Links to other resources are [Identifier]s (or,
//! for the task definition's container list, an [Output]) rather than raw values.

use crate::ecs::{
    output::Output,
    stack::{Attribute, Identifier, Reference},
};
use serde::Serialize;
use std::collections::BTreeMap;

/// CIDR block matching every IPv4 address
pub const ANYWHERE: &str = "0.0.0.0/0";

/// Network protocol of a security group rule
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Protocol {
    #[serde(rename = "tcp")]
    Tcp,
    #[serde(rename = "udp")]
    Udp,
    #[serde(rename = "-1")]
    All,
}

/// Origin (or destination) of traffic matched by a rule
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Cidr(String),
    SecurityGroup(Identifier),
}

/// Ingress or egress rule of a security group
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Rule {
    pub from_port: u16,
    pub to_port: u16,
    pub protocol: Protocol,
    pub sources: Vec<Source>,
}

impl Rule {
    /// TCP traffic on a single port.
    pub fn tcp(port: u16, source: Source) -> Self {
        Self {
            from_port: port,
            to_port: port,
            protocol: Protocol::Tcp,
            sources: vec![source],
        }
    }

    /// Traffic on any port and protocol.
    pub fn all(source: Source) -> Self {
        Self {
            from_port: 0,
            to_port: 0,
            protocol: Protocol::All,
            sources: vec![source],
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct SecurityGroup {
    pub group_name: String,
    pub description: String,
    pub vpc_id: Identifier,
    pub ingress: Vec<Rule>,
    pub egress: Vec<Rule>,
    pub tags: BTreeMap<String, String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancerType {
    Application,
    Network,
}

#[derive(Clone, Debug, Serialize)]
pub struct LoadBalancer {
    pub lb_name: String,
    pub load_balancer_type: LoadBalancerType,
    pub internal: bool,
    pub security_groups: Vec<Identifier>,
    pub subnets: Vec<Identifier>,
    pub tags: BTreeMap<String, String>,
}

/// Policy used to decide whether a target receives traffic
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub path: String,
    pub port: String,
    pub healthy_threshold: u32,
    pub unhealthy_threshold: u32,
    /// Seconds
    pub timeout: u32,
    /// Seconds
    pub interval: u32,
    pub matcher: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct TargetGroup {
    pub tg_name: String,
    pub port: u16,
    pub protocol: String,
    pub vpc_id: Identifier,
    pub target_type: String,
    pub health_check: HealthCheck,
    pub tags: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ListenerAction {
    Forward { target_group_arn: Identifier },
}

#[derive(Clone, Debug, Serialize)]
pub struct Listener {
    pub load_balancer_arn: Identifier,
    pub port: u16,
    pub default_actions: Vec<ListenerAction>,
}

#[derive(Clone, Debug, Serialize)]
pub struct LogGroup {
    pub log_group_name: String,
    pub retention_in_days: u32,
    pub tags: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct Cluster {
    pub cluster_name: String,
    pub tags: BTreeMap<String, String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum LaunchType {
    #[serde(rename = "FARGATE")]
    Fargate,
    #[serde(rename = "EC2")]
    Ec2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    Awsvpc,
    Bridge,
    Host,
}

#[derive(Clone, Debug, Serialize)]
pub struct TaskDefinition {
    pub family: String,
    pub network_mode: NetworkMode,
    pub requires_compatibilities: Vec<LaunchType>,
    pub cpu: u32,
    pub memory: u32,
    pub execution_role_arn: Identifier,
    pub task_role_arn: Identifier,
    /// JSON list of container definitions
    pub container_definitions: Output<String>,
    pub tags: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NetworkConfiguration {
    pub subnets: Vec<Identifier>,
    pub security_groups: Vec<Identifier>,
    pub assign_public_ip: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ServiceLoadBalancer {
    pub target_group_arn: Identifier,
    pub container_name: String,
    pub container_port: u16,
}

#[derive(Clone, Debug, Serialize)]
pub struct Service {
    pub service_name: String,
    pub cluster: Identifier,
    pub task_definition: Identifier,
    pub launch_type: LaunchType,
    pub desired_count: u32,
    pub network_configuration: NetworkConfiguration,
    pub load_balancers: Vec<ServiceLoadBalancer>,
    pub tags: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct Repository {
    pub repository_name: String,
    pub image_tag_mutability: String,
    pub force_delete: bool,
    pub tags: BTreeMap<String, String>,
}

/// Image built from a local project and pushed to a repository
#[derive(Clone, Debug, Serialize)]
pub struct Image {
    pub image_name: String,
    pub context: String,
    pub platform: String,
    pub repository_url: Identifier,
    pub tag: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct DbSubnetGroup {
    pub subnet_group_name: String,
    pub subnet_ids: Vec<Identifier>,
    pub tags: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct DbInstance {
    pub identifier: String,
    pub engine: String,
    pub engine_version: String,
    pub instance_class: String,
    pub allocated_storage: u32,
    pub db_name: String,
    pub username: String,
    pub manage_master_user_password: bool,
    pub port: u16,
    pub db_subnet_group_name: Identifier,
    pub vpc_security_group_ids: Vec<Identifier>,
    pub publicly_accessible: bool,
    pub skip_final_snapshot: bool,
    pub tags: BTreeMap<String, String>,
}

macro_rules! resource_kinds {
    ($($variant:ident => $name:literal: [$($attribute:ident),*]),* $(,)?) => {
        /// Any resource the assembler can declare
        #[derive(Clone, Debug, Serialize)]
        #[serde(tag = "type", content = "properties")]
        pub enum ResourceKind {
            $(
                #[serde(rename = $name)]
                $variant($variant),
            )*
        }

        impl ResourceKind {
            /// Provider type name (e.g. `aws:ecs:Service`).
            pub fn type_name(&self) -> &'static str {
                match self {
                    $(ResourceKind::$variant(_) => $name,)*
                }
            }

            /// Attributes the provisioning engine reports once the resource exists.
            pub fn attributes(&self) -> &'static [Attribute] {
                match self {
                    $(ResourceKind::$variant(_) => &[$(Attribute::$attribute),*],)*
                }
            }
        }

        $(
            impl From<$variant> for ResourceKind {
                fn from(resource: $variant) -> Self {
                    ResourceKind::$variant(resource)
                }
            }
        )*
    };
}

resource_kinds! {
    SecurityGroup => "aws:ec2:SecurityGroup": [Id, Arn, Name],
    LoadBalancer => "aws:lb:LoadBalancer": [Id, Arn, Name, DnsName],
    TargetGroup => "aws:lb:TargetGroup": [Id, Arn, Name],
    Listener => "aws:lb:Listener": [Id, Arn],
    LogGroup => "aws:cloudwatch:LogGroup": [Id, Arn, Name],
    Cluster => "aws:ecs:Cluster": [Id, Arn, Name],
    TaskDefinition => "aws:ecs:TaskDefinition": [Id, Arn],
    Service => "aws:ecs:Service": [Id, Arn, Name],
    Repository => "aws:ecr:Repository": [Id, Arn, Name, RepositoryUrl],
    Image => "docker:Image": [Id, ImageUri],
    DbSubnetGroup => "aws:rds:SubnetGroup": [Id, Arn, Name],
    DbInstance => "aws:rds:Instance": [Id, Arn, Address],
}

fn pending<'a>(ids: impl IntoIterator<Item = &'a Identifier>) -> impl Iterator<Item = &'a Reference> {
    ids.into_iter().filter_map(Identifier::reference)
}

fn rule_sources(rules: &[Rule]) -> impl Iterator<Item = &Reference> {
    rules
        .iter()
        .flat_map(|rule| rule.sources.iter())
        .filter_map(|source| match source {
            Source::SecurityGroup(id) => id.reference(),
            Source::Cidr(_) => None,
        })
}

impl ResourceKind {
    /// References to other resources this declaration depends on.
    pub fn references(&self) -> Vec<&Reference> {
        match self {
            ResourceKind::SecurityGroup(sg) => pending([&sg.vpc_id])
                .chain(rule_sources(&sg.ingress))
                .chain(rule_sources(&sg.egress))
                .collect(),
            ResourceKind::LoadBalancer(lb) => pending(&lb.security_groups)
                .chain(pending(&lb.subnets))
                .collect(),
            ResourceKind::TargetGroup(tg) => pending([&tg.vpc_id]).collect(),
            ResourceKind::Listener(listener) => pending([&listener.load_balancer_arn])
                .chain(listener.default_actions.iter().flat_map(|action| match action {
                    ListenerAction::Forward { target_group_arn } => pending([target_group_arn]),
                }))
                .collect(),
            ResourceKind::LogGroup(_) | ResourceKind::Cluster(_) | ResourceKind::Repository(_) => {
                Vec::new()
            }
            ResourceKind::TaskDefinition(td) => {
                pending([&td.execution_role_arn, &td.task_role_arn])
                    .chain(td.container_definitions.dependencies())
                    .collect()
            }
            ResourceKind::Service(service) => {
                pending([&service.cluster, &service.task_definition])
                    .chain(pending(&service.network_configuration.subnets))
                    .chain(pending(&service.network_configuration.security_groups))
                    .chain(pending(
                        service.load_balancers.iter().map(|lb| &lb.target_group_arn),
                    ))
                    .collect()
            }
            ResourceKind::Image(image) => pending([&image.repository_url]).collect(),
            ResourceKind::DbSubnetGroup(group) => pending(&group.subnet_ids).collect(),
            ResourceKind::DbInstance(db) => pending([&db.db_subnet_group_name])
                .chain(pending(&db.vpc_security_group_ids))
                .collect(),
        }
    }
}
