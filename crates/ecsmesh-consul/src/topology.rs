//! Sidecar topology
//!
//! Runs once per service during its build, spread over three lifecycle
//! hooks: sidecars are added in `use_task_definition`, the app container is
//! wired to them in `resolve_container_dependencies`, and security groups
//! are wired in `use_service`.

use std::collections::BTreeMap;

use ecsmesh_common::container::APP_CONTAINER_NAME;
use ecsmesh_common::extension::ContainerMutatingHook;
use ecsmesh_common::network::{Network, Port, Protocol};
use ecsmesh_common::secret::SecretRef;
use ecsmesh_common::service::EcsService;
use ecsmesh_common::task::{
    ContainerDefinition, DependencyCondition, HealthCheck, KeyValuePair, LogConfiguration, MountPoint,
    PolicyStatement, PortMapping, TaskDefinition, Ulimit,
};
use ecsmesh_common::{Error, Result};
use tracing::debug;

use crate::command::{build_agent_command, build_health_sync_command, build_init_command};
use crate::config::{HealthCheckMode, MeshConfig};
use crate::mesh::{
    ACL_TOKEN_ENV, AGENT_CONTAINER, BINARY_INJECT_DIR, BINARY_VOLUME, CONFIG_DIR, CONFIG_VOLUME, DATA_DIR,
    DATA_VOLUME, HEALTH_SYNC_CONTAINER, HTTP_PORT, INIT_CONTAINER, INIT_USER, PROXY_CONTAINER, PROXY_LOG_PREFIX,
    PROXY_NOFILE_LIMIT, PROXY_PORT, SERF_LAN_PORT, SERVER_RPC_PORT, SIDECAR_MEMORY_MIB,
};
use crate::upstream::UpstreamRegistry;
use crate::validate;

/// Puts the ECS-native health check on the app container
#[derive(Debug)]
pub struct HealthCheckHook {
    check: HealthCheck,
}

impl HealthCheckHook {
    /// Hook for the configured mode, if it needs one
    pub fn for_mode(mode: &HealthCheckMode) -> Option<Self> {
        match mode {
            HealthCheckMode::EcsNative(check) => Some(Self { check: check.clone() }),
            HealthCheckMode::None | HealthCheckMode::MeshNative(_) => None,
        }
    }
}

impl ContainerMutatingHook for HealthCheckHook {
    fn mutate_container_definition(&self, container: ContainerDefinition) -> ContainerDefinition {
        container.with_health_check(self.check.clone())
    }
}

fn ec2_discovery_policy(region: &str) -> PolicyStatement {
    let mut equals = BTreeMap::new();
    equals.insert("aws:RequestedRegion".to_string(), region.to_string());
    let mut condition = BTreeMap::new();
    condition.insert("StringEquals".to_string(), equals);

    PolicyStatement {
        action: vec!["ec2:DescribeInstances".to_string()],
        resource: vec!["*".to_string()],
        condition,
    }
}

/// Add the sidecars, volumes and task-role policy to a task definition
///
/// Containers are added agent, mesh-init, proxy, then health-sync when
/// ECS-native checks are configured.
pub fn build_topology(config: &MeshConfig, upstreams: &UpstreamRegistry, task: &mut TaskDefinition) -> Result<()> {
    task.add_to_task_role_policy(ec2_discovery_policy(&config.region));
    for volume in [DATA_VOLUME, CONFIG_VOLUME, BINARY_VOLUME] {
        task.add_volume(volume);
    }

    task.add_container(
        ContainerDefinition::new(AGENT_CONTAINER, config.images.agent.clone())
            .essential(false)
            .with_memory_mib(SIDECAR_MEMORY_MIB)
            .with_port(PortMapping::tcp(SERF_LAN_PORT))
            .with_port(PortMapping::udp(SERF_LAN_PORT))
            .with_port(PortMapping::tcp(HTTP_PORT))
            .with_logging(LogConfiguration::aws_logs(AGENT_CONTAINER))
            .with_entry_point(["/bin/sh", "-ec"])
            .with_command([build_agent_command(config)])
            .with_mount(MountPoint::read_write(DATA_VOLUME, DATA_DIR))
            .with_mount(MountPoint::read_write(CONFIG_VOLUME, CONFIG_DIR))
            .with_mount(MountPoint::read_write(BINARY_VOLUME, BINARY_INJECT_DIR)),
    )?;

    task.add_container(
        ContainerDefinition::new(INIT_CONTAINER, config.images.init_helper.clone())
            .essential(false)
            .with_memory_mib(SIDECAR_MEMORY_MIB)
            .with_logging(LogConfiguration::aws_logs(INIT_CONTAINER))
            .with_command(build_init_command(config, upstreams)?)
            .with_user(INIT_USER)
            .with_mount(MountPoint::read_write(DATA_VOLUME, DATA_DIR))
            .with_mount(MountPoint::read_only(BINARY_VOLUME, BINARY_INJECT_DIR)),
    )?;

    let proxy = task.add_container(
        ContainerDefinition::new(PROXY_CONTAINER, config.images.proxy.clone())
            .essential(false)
            .with_memory_mib(SIDECAR_MEMORY_MIB)
            .with_entry_point([format!("{DATA_DIR}/consul-ecs").as_str(), "envoy-entrypoint"])
            .with_command([
                "/bin/sh",
                "-c",
                format!("envoy --config-path {DATA_DIR}/envoy-bootstrap.json").as_str(),
            ])
            .with_logging(LogConfiguration::aws_logs(PROXY_LOG_PREFIX))
            .with_port(PortMapping::tcp(PROXY_PORT))
            .with_health_check(HealthCheck::new(
                ["CMD", "nc", "-z", "127.0.0.1", PROXY_PORT.to_string().as_str()]
                    .into_iter()
                    .map(String::from)
                    .collect(),
            ))
            .with_ulimit(Ulimit::nofile(PROXY_NOFILE_LIMIT))
            .with_mount(MountPoint::read_write(DATA_VOLUME, DATA_DIR)),
    )?;
    proxy.add_dependency(INIT_CONTAINER, DependencyCondition::Success);

    if config.health_check_mode.is_ecs_native() {
        let token = config.acl_secret_arn.as_deref().ok_or_else(|| {
            Error::missing_credential(&config.service_id, "aclSecretArn (ACL token for the health-sync container)")
        })?;
        let health_sync = task.add_container(
            ContainerDefinition::new(HEALTH_SYNC_CONTAINER, config.images.init_helper.clone())
                .essential(false)
                .with_memory_mib(SIDECAR_MEMORY_MIB)
                .with_logging(LogConfiguration::aws_logs(HEALTH_SYNC_CONTAINER))
                .with_command(build_health_sync_command(config))
                .with_secret(ACL_TOKEN_ENV, &SecretRef::new(token)),
        )?;
        health_sync.add_dependency(INIT_CONTAINER, DependencyCondition::Success);
    }

    debug!(
        service = %config.service_id,
        family = %task.family,
        health_sync = config.health_check_mode.is_ecs_native(),
        "added mesh sidecars"
    );
    Ok(())
}

/// Make the app container wait for mesh-init and the proxy
///
/// Returns the app container's declared environment, which connections
/// later extend.
pub fn wire_primary_container(config: &MeshConfig, task: &mut TaskDefinition) -> Result<Vec<KeyValuePair>> {
    if task.container(INIT_CONTAINER).is_none() || task.container(PROXY_CONTAINER).is_none() {
        return Err(Error::uninitialized(
            "resolve_container_dependencies",
            "The container dependency hook was called before the container was created",
        ));
    }

    let app = task.container_mut(APP_CONTAINER_NAME).ok_or_else(|| {
        Error::missing_dependency(
            &config.service_id,
            "Consul Mesh extension requires an application extension",
        )
    })?;
    app.add_dependency(INIT_CONTAINER, DependencyCondition::Success);
    app.add_dependency(PROXY_CONTAINER, DependencyCondition::Healthy);

    Ok(app.environment.clone())
}

/// Open gossip and RPC between the service and the servers, and attach the
/// shared client group
///
/// Fails before any rule is added when the client group would push the
/// service over the security-group ceiling.
pub fn wire_security_groups(config: &MeshConfig, service: &mut EcsService, network: &mut Network) -> Result<()> {
    let server = &config.server_security_group;
    let client = &config.client_security_group;

    let attach_client = !service.security_groups.contains(client);
    let requested = service.security_groups.len() + usize::from(attach_client);
    validate::security_group_ceiling(&config.service_id, requested)?;

    for group in [server, client] {
        if !network.contains(group) {
            return Err(Error::config_for_field(
                "securityGroups",
                format!("service {} references unknown security group {group}", config.service_id),
            ));
        }
    }
    let own = service
        .own_security_group()
        .cloned()
        .ok_or_else(|| Error::uninitialized("use_service", "service has no security group"))?;

    for (port, description) in [
        (
            Port::tcp(SERF_LAN_PORT),
            "allow consul server to accept traffic from consul client on TCP port 8301",
        ),
        (
            Port::udp(SERF_LAN_PORT),
            "allow consul server to accept traffic from consul client on UDP port 8301",
        ),
        (
            Port::tcp(SERVER_RPC_PORT),
            "allow consul server to accept traffic from the service client on TCP port 8300",
        ),
    ] {
        network.allow_from(server, &own, port, description)?;
    }
    for protocol in [Protocol::Tcp, Protocol::Udp] {
        network.allow_from(
            &own,
            server,
            Port {
                protocol,
                port: SERF_LAN_PORT,
            },
            format!("allow service to accept traffic from consul server on {protocol} port {SERF_LAN_PORT}"),
        )?;
    }

    if attach_client {
        service.security_groups.push(client.clone());
    }
    debug!(
        service = %config.service_id,
        security_groups = service.security_groups.len(),
        "wired mesh security groups"
    );
    Ok(())
}
