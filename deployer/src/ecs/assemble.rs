//! Assemble the full deployment graph in dependency order.

use crate::ecs::{
    container,
    image::{ImagePublisher, Registry},
    network::{NetworkProvider, StaticNetwork, SubnetKind},
    output::{join, Output},
    rds::{DataStore, DataStoreProvisioner, Rds},
    resources::{
        Cluster, HealthCheck, LaunchType, Listener, ListenerAction, LoadBalancer,
        LoadBalancerType, LogGroup, NetworkConfiguration, NetworkMode, Rule, SecurityGroup,
        Service, ServiceLoadBalancer, Source, TargetGroup, TaskDefinition, ANYWHERE,
    },
    stack::{Handle, Identifier, Provider, Stack},
    Config, Error, Roles, EXECUTION_ROLE, IMAGE_VERSION, TASK_ROLE,
};
use tracing::{debug, info};

/// Path probed by the load balancer
pub const HEALTH_CHECK_PATH: &str = "/ping/";

/// Consecutive successes before a target is considered healthy
pub const HEALTHY_THRESHOLD: u32 = 5;

/// Consecutive failures before a target is considered unhealthy
pub const UNHEALTHY_THRESHOLD: u32 = 2;

/// Seconds before a health check times out
pub const HEALTH_CHECK_TIMEOUT: u32 = 2;

/// Seconds between health checks
pub const HEALTH_CHECK_INTERVAL: u32 = 5;

/// Status code of a healthy response
pub const HEALTH_CHECK_MATCHER: &str = "200";

/// Days log events are retained
pub const LOG_RETENTION_DAYS: u32 = 30;

/// Security groups isolating the service behind its load balancer
#[derive(Clone, Debug)]
pub struct SecurityPerimeter {
    pub load_balancer: Handle,
    pub service: Handle,
}

/// Public entry point of the service
#[derive(Clone, Debug)]
pub struct LoadBalancerStack {
    pub load_balancer: Handle,
    pub target_group: Handle,
    pub listener: Handle,
}

/// Every resource declared for a service
pub struct Deployment {
    pub stack: Stack,
    pub perimeter: SecurityPerimeter,
    pub load_balancer: LoadBalancerStack,
    pub log_group: Handle,
    pub cluster: Handle,
    pub container_definitions: Output<String>,
    pub task_definition: Handle,
    pub service: Handle,
}

/// Declares the load balancer and service security groups.
///
/// The load balancer accepts `lb_port` from anywhere, the service accepts traffic only from the
/// load balancer. Both may send anything out.
pub fn build_security_perimeter(
    stack: &mut Stack,
    name: &str,
    vpc_id: &Identifier,
    lb_port: u16,
) -> Result<SecurityPerimeter, Error> {
    let lb_group_name = format!("{name}-lb-sg");
    let lb_sg = SecurityGroup {
        group_name: lb_group_name.clone(),
        description: "Controls access to the ALB".to_string(),
        vpc_id: vpc_id.clone(),
        ingress: vec![Rule::tcp(lb_port, Source::Cidr(ANYWHERE.to_string()))],
        egress: vec![Rule::all(Source::Cidr(ANYWHERE.to_string()))],
        tags: stack.provider().tags(&[("Name", lb_group_name.as_str())]),
    };
    let load_balancer = stack.declare(lb_group_name, lb_sg)?;

    let service_group_name = format!("{name}-ecs-sg");
    let service_sg = SecurityGroup {
        group_name: service_group_name.clone(),
        description: "Controls access to the ECS Service".to_string(),
        vpc_id: vpc_id.clone(),
        ingress: vec![Rule::all(Source::SecurityGroup(load_balancer.id().into()))],
        egress: vec![Rule::all(Source::Cidr(ANYWHERE.to_string()))],
        tags: stack
            .provider()
            .tags(&[("Name", service_group_name.as_str())]),
    };
    let service = stack.declare(format!("{name}-sg"), service_sg)?;
    debug!(
        load_balancer = load_balancer.name(),
        service = service.name(),
        "declared security perimeter"
    );

    Ok(SecurityPerimeter {
        load_balancer,
        service,
    })
}

/// Health check applied to every target of the service.
pub fn health_check() -> HealthCheck {
    HealthCheck {
        path: HEALTH_CHECK_PATH.to_string(),
        port: "traffic-port".to_string(),
        healthy_threshold: HEALTHY_THRESHOLD,
        unhealthy_threshold: UNHEALTHY_THRESHOLD,
        timeout: HEALTH_CHECK_TIMEOUT,
        interval: HEALTH_CHECK_INTERVAL,
        matcher: HEALTH_CHECK_MATCHER.to_string(),
    }
}

/// Declares a public load balancer forwarding `lb_port` to a new target group.
pub fn build_load_balancer(
    stack: &mut Stack,
    name: &str,
    vpc_id: &Identifier,
    public_subnets: Vec<Identifier>,
    lb_sg: &Handle,
    lb_port: u16,
) -> Result<LoadBalancerStack, Error> {
    let lb_name = format!("{name}-lb");
    let lb = LoadBalancer {
        lb_name: lb_name.clone(),
        load_balancer_type: LoadBalancerType::Application,
        internal: false,
        security_groups: vec![lb_sg.id().into()],
        subnets: public_subnets,
        tags: stack.provider().tags(&[]),
    };
    let load_balancer = stack.declare(lb_name, lb)?;

    let tg_name = format!("{name}-service-tg");
    let tg = TargetGroup {
        tg_name: tg_name.clone(),
        port: lb_port,
        protocol: "HTTP".to_string(),
        vpc_id: vpc_id.clone(),
        target_type: "ip".to_string(),
        health_check: health_check(),
        tags: stack.provider().tags(&[]),
    };
    let target_group = stack.declare(tg_name, tg)?;

    let listener = Listener {
        load_balancer_arn: load_balancer.arn().into(),
        port: lb_port,
        default_actions: vec![ListenerAction::Forward {
            target_group_arn: target_group.arn().into(),
        }],
    };
    let listener = stack.declare(format!("{name}-lb-listener"), listener)?;
    debug!(
        load_balancer = load_balancer.name(),
        target_group = target_group.name(),
        port = lb_port,
        "declared load balancer"
    );

    Ok(LoadBalancerStack {
        load_balancer,
        target_group,
        listener,
    })
}

/// Declares the data store, letting only the service security group reach it.
pub fn provision_data_store<N, D>(
    stack: &mut Stack,
    provisioner: &D,
    network: &N,
    service_sg: &Handle,
    config: &Config,
) -> Result<D::Store, Error>
where
    N: NetworkProvider,
    D: DataStoreProvisioner,
{
    provisioner.provision(stack, network, service_sg, config)
}

/// Renders the container definitions once both the image and the database host are known.
pub fn render_container_spec(
    image: &Output<String>,
    log_group: &str,
    db_host: &Output<String>,
    config: &Config,
) -> Output<String> {
    let service_name = config.service_name.clone();
    let port = config.backend.container_port;
    let log_group = log_group.to_string();
    join(image, db_host).try_apply(move |(image, db_host)| {
        container::render(&service_name, port, &image, &db_host, &log_group)
    })
}

/// Declares the whole deployment for `config`.
///
/// Nothing is declared unless `config` is valid. Every reference in the returned stack targets a
/// resource of the same stack.
pub fn assemble<N, I, D>(
    config: &Config,
    roles: &Roles,
    network: &N,
    publisher: &I,
    provisioner: &D,
) -> Result<Deployment, Error>
where
    N: NetworkProvider,
    I: ImagePublisher,
    D: DataStoreProvisioner,
{
    config.validate()?;
    let execution_role = roles.get(EXECUTION_ROLE)?;
    let task_role = roles.get(TASK_ROLE)?;
    let public_subnets = network.subnet_ids(SubnetKind::Public);
    if public_subnets.is_empty() {
        return Err(Error::MissingSubnets(SubnetKind::Public));
    }
    let private_subnets = network.subnet_ids(SubnetKind::Private);
    if private_subnets.is_empty() {
        return Err(Error::MissingSubnets(SubnetKind::Private));
    }

    let mut stack = Stack::new(Provider::new(&config.region, config.tags.clone()));
    let service_name = config.service_name.as_str();
    let name = config.network_name();
    let backend = &config.backend;
    let vpc_id = network.vpc_id();

    // Networking
    let perimeter = build_security_perimeter(&mut stack, &name, &vpc_id, backend.lb_port)?;
    let load_balancer = build_load_balancer(
        &mut stack,
        &name,
        &vpc_id,
        public_subnets,
        &perimeter.load_balancer,
        backend.lb_port,
    )?;

    // Data store
    let store = provision_data_store(&mut stack, provisioner, network, &perimeter.service, config)?;

    // Runtime
    let image = publisher.push(&mut stack, IMAGE_VERSION)?;
    let log_group_name = format!("/ecs/{service_name}");
    let log_group = stack.declare(
        format!("{service_name}-log-group"),
        LogGroup {
            log_group_name: log_group_name.clone(),
            retention_in_days: LOG_RETENTION_DAYS,
            tags: stack.provider().tags(&[]),
        },
    )?;
    let cluster_name = format!("{service_name}-cluster");
    let cluster = stack.declare(
        cluster_name.clone(),
        Cluster {
            cluster_name,
            tags: stack.provider().tags(&[]),
        },
    )?;

    let container_definitions =
        render_container_spec(&image, &log_group_name, &store.host(), config);
    let task_definition = stack.declare(
        format!("{service_name}-tf"),
        TaskDefinition {
            family: service_name.to_string(),
            network_mode: NetworkMode::Awsvpc,
            requires_compatibilities: vec![LaunchType::Fargate],
            cpu: backend.cpu,
            memory: backend.memory,
            execution_role_arn: execution_role,
            task_role_arn: task_role,
            container_definitions: container_definitions.clone(),
            tags: stack.provider().tags(&[]),
        },
    )?;

    let service_resource_name = format!("{service_name}-service");
    let service = stack.declare(
        service_resource_name.clone(),
        Service {
            service_name: service_resource_name,
            cluster: cluster.id().into(),
            task_definition: task_definition.arn().into(),
            launch_type: LaunchType::Fargate,
            desired_count: backend.desired_count,
            network_configuration: NetworkConfiguration {
                subnets: private_subnets,
                security_groups: vec![perimeter.service.id().into()],
                assign_public_ip: true,
            },
            load_balancers: vec![ServiceLoadBalancer {
                target_group_arn: load_balancer.target_group.arn().into(),
                container_name: service_name.to_string(),
                container_port: backend.container_port,
            }],
            tags: stack.provider().tags(&[]),
        },
    )?;

    stack.check_references()?;
    info!(
        service = service_name,
        resources = stack.len(),
        "assembled deployment"
    );

    Ok(Deployment {
        stack,
        perimeter,
        load_balancer,
        log_group,
        cluster,
        container_definitions,
        task_definition,
        service,
    })
}

/// Assembles `config` against the network, registry, and database it describes.
pub fn from_config(config: &Config) -> Result<Deployment, Error> {
    let network = StaticNetwork::new(config.network.clone());
    let publisher = Registry::new(config);
    assemble(config, &Roles::from(config), &network, &publisher, &Rds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::{
        resources::{Protocol, ResourceKind},
        stack::{Attribute, Reference},
        tests::config,
    };
    use std::collections::BTreeMap;

    fn kind<'a>(deployment: &'a Deployment, handle: &Handle) -> &'a ResourceKind {
        &deployment.stack.get(handle.name()).unwrap().kind
    }

    #[test]
    fn test_resource_names() {
        let deployment = from_config(&config()).unwrap();
        let names: Vec<&str> = deployment
            .stack
            .resources()
            .iter()
            .map(|r| r.name.as_str())
            .collect();
        assert_eq!(
            names,
            vec![
                "django-api-lb-sg",
                "django-api-sg",
                "django-api-lb",
                "django-api-service-tg",
                "django-api-lb-listener",
                "django-api-db-sg",
                "django-api-db-subnet-group",
                "django-api-db",
                "django_api-repository",
                "django_api-image",
                "django_api-log-group",
                "django_api-cluster",
                "django_api-tf",
                "django_api-service",
            ]
        );
    }

    #[test]
    fn test_service_ingress_only_from_load_balancer() {
        let deployment = from_config(&config()).unwrap();
        let ResourceKind::SecurityGroup(sg) = kind(&deployment, &deployment.perimeter.service)
        else {
            panic!("expected security group");
        };
        assert_eq!(sg.group_name, "django-api-ecs-sg");
        assert_eq!(sg.ingress.len(), 1);
        let rule = &sg.ingress[0];
        assert_eq!(rule.protocol, Protocol::All);
        assert_eq!(
            rule.sources,
            vec![Source::SecurityGroup(
                deployment.perimeter.load_balancer.id().into()
            )]
        );
        assert!(sg
            .ingress
            .iter()
            .flat_map(|rule| &rule.sources)
            .all(|source| !matches!(source, Source::Cidr(_))));
    }

    #[test]
    fn test_load_balancer_ingress() {
        let deployment = from_config(&config()).unwrap();
        let ResourceKind::SecurityGroup(sg) =
            kind(&deployment, &deployment.perimeter.load_balancer)
        else {
            panic!("expected security group");
        };
        assert_eq!(
            sg.ingress,
            vec![Rule::tcp(8080, Source::Cidr(ANYWHERE.to_string()))]
        );
        assert_eq!(
            sg.egress,
            vec![Rule::all(Source::Cidr(ANYWHERE.to_string()))]
        );
        assert_eq!(sg.tags["Name"], "django-api-lb-sg");
        assert_eq!(sg.tags["team"], "platform");
    }

    #[test]
    fn test_health_check_fixed() {
        let mut config = config();
        config.backend.lb_port = 9000;
        config.backend.cpu = 1024;
        config.backend.memory = 4096;
        let deployment = from_config(&config).unwrap();
        let ResourceKind::TargetGroup(tg) =
            kind(&deployment, &deployment.load_balancer.target_group)
        else {
            panic!("expected target group");
        };
        assert_eq!(tg.health_check.path, "/ping/");
        assert_eq!(tg.health_check.healthy_threshold, 5);
        assert_eq!(tg.health_check.unhealthy_threshold, 2);
        assert_eq!(tg.health_check.timeout, 2);
        assert_eq!(tg.health_check.interval, 5);
        assert_eq!(tg.health_check.matcher, "200");
        assert_eq!(tg.port, 9000);
    }

    #[test]
    fn test_listener_forwards_to_own_target_group() {
        let deployment = from_config(&config()).unwrap();
        let listeners: Vec<&Listener> = deployment
            .stack
            .resources()
            .iter()
            .filter_map(|r| match &r.kind {
                ResourceKind::Listener(listener) => Some(listener),
                _ => None,
            })
            .collect();
        assert_eq!(listeners.len(), 1);
        let listener = listeners[0];
        assert_eq!(listener.port, 8080);
        assert_eq!(
            listener.load_balancer_arn,
            Identifier::from(deployment.load_balancer.load_balancer.arn())
        );
        assert_eq!(
            listener.default_actions,
            vec![ListenerAction::Forward {
                target_group_arn: deployment.load_balancer.target_group.arn().into(),
            }]
        );
        let target_groups = deployment
            .stack
            .resources()
            .iter()
            .filter(|r| matches!(r.kind, ResourceKind::TargetGroup(_)))
            .count();
        assert_eq!(target_groups, 1);
    }

    #[test]
    fn test_task_definition_and_service() {
        let deployment = from_config(&config()).unwrap();
        let ResourceKind::TaskDefinition(td) = kind(&deployment, &deployment.task_definition)
        else {
            panic!("expected task definition");
        };
        assert_eq!(td.family, "django_api");
        assert_eq!(td.network_mode, NetworkMode::Awsvpc);
        assert_eq!(td.requires_compatibilities, vec![LaunchType::Fargate]);
        assert_eq!((td.cpu, td.memory), (256, 512));
        assert_eq!(
            td.execution_role_arn,
            Identifier::from("arn:aws:iam::1:role/exec")
        );
        assert_eq!(td.task_role_arn, Identifier::from("arn:aws:iam::1:role/task"));

        let ResourceKind::Service(service) = kind(&deployment, &deployment.service) else {
            panic!("expected service");
        };
        assert_eq!(service.service_name, "django_api-service");
        assert_eq!(service.desired_count, 2);
        assert_eq!(service.cluster, Identifier::from(deployment.cluster.id()));
        assert_eq!(
            service.task_definition,
            Identifier::from(deployment.task_definition.arn())
        );
        assert_eq!(
            service.network_configuration,
            NetworkConfiguration {
                subnets: vec![
                    Identifier::from("subnet-priv-a"),
                    Identifier::from("subnet-priv-b")
                ],
                security_groups: vec![deployment.perimeter.service.id().into()],
                assign_public_ip: true,
            }
        );
        assert_eq!(
            service.load_balancers,
            vec![ServiceLoadBalancer {
                target_group_arn: deployment.load_balancer.target_group.arn().into(),
                container_name: "django_api".to_string(),
                container_port: 8000,
            }]
        );
    }

    #[test]
    fn test_container_spec_joins_image_and_host() {
        let mut deployment = from_config(&config()).unwrap();
        let image = Reference::new("django_api-image", Attribute::ImageUri);
        let host = Reference::new("django-api-db", Attribute::Address);
        assert_eq!(
            deployment.container_definitions.dependencies(),
            &[image.clone(), host.clone()]
        );
        assert!(deployment.container_definitions.try_get().is_none());

        // Resolving only the image must not finalize the spec
        deployment.stack.resolve(&image, "repo/django_api:0.0.1").unwrap();
        assert!(deployment.container_definitions.try_get().is_none());

        deployment.stack.resolve(&host, "db.internal").unwrap();
        let rendered = deployment.container_definitions.try_get().unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        let containers = value.as_array().unwrap();
        assert_eq!(containers.len(), 1);
        assert_eq!(containers[0]["command"], serde_json::json!(["django_api", "8000"]));
        assert_eq!(containers[0]["image"], "repo/django_api:0.0.1");
        assert_eq!(containers[0]["environment"][1]["value"], "db.internal");
        assert_eq!(
            containers[0]["logConfiguration"]["options"]["awslogs-group"],
            "/ecs/django_api"
        );
    }

    #[test]
    fn test_idempotent() {
        let config = config();
        let first = from_config(&config).unwrap();
        let second = from_config(&config).unwrap();
        assert_eq!(
            serde_json::to_value(&first.stack).unwrap(),
            serde_json::to_value(&second.stack).unwrap()
        );
    }

    #[test]
    fn test_invalid_config_declares_nothing() {
        let mut config = config();
        config.backend.cpu = 300;
        assert!(matches!(
            from_config(&config),
            Err(Error::InvalidResources { cpu: 300, .. })
        ));
    }

    #[test]
    fn test_missing_role() {
        let config = config();
        let roles = Roles::new(BTreeMap::from([(
            EXECUTION_ROLE.to_string(),
            Identifier::from("arn:exec"),
        )]));
        let result = assemble(
            &config,
            &roles,
            &StaticNetwork::new(config.network.clone()),
            &Registry::new(&config),
            &Rds,
        );
        assert!(matches!(result, Err(Error::MissingRole(role)) if role == TASK_ROLE));
    }

    #[test]
    fn test_dangling_role_reference() {
        let mut config = config();
        config.roles.insert(
            TASK_ROLE.to_string(),
            Reference::new("task-role", Attribute::Arn).into(),
        );
        assert!(matches!(
            from_config(&config),
            Err(Error::DanglingReference(reference)) if reference.resource == "task-role"
        ));
    }

    #[tokio::test]
    async fn test_placeholder_plan() {
        let mut deployment = from_config(&config()).unwrap();
        deployment.stack.resolve_all(|reference| reference.to_string());
        let rendered = deployment.container_definitions.get().await.unwrap();
        assert!(rendered.contains("${django_api-image.image_uri}"));
        assert!(rendered.contains("${django-api-db.address}"));

        let plan = serde_json::to_value(&deployment.stack).unwrap();
        let td = &plan["resources"][12];
        assert_eq!(td["name"], "django_api-tf");
        assert_eq!(td["type"], "aws:ecs:TaskDefinition");
        assert_eq!(td["properties"]["container_definitions"], rendered.as_str());
        assert_eq!(plan["provider"]["region"], "eu-west-1");
    }
}
