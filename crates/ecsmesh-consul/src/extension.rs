//! The Consul mesh service extension

use std::any::Any;

use ecsmesh_common::container::CONTAINER_EXTENSION;
use ecsmesh_common::extension::{
    ConnectContext, ContainerMutatingHook, ServiceDescription, ServiceExtension, ServiceInfo,
};
use ecsmesh_common::network::Network;
use ecsmesh_common::service::EcsService;
use ecsmesh_common::task::{KeyValuePair, TaskDefinition, TaskDefinitionProps};
use ecsmesh_common::{Error, Result};
use tracing::debug;

use crate::config::{ConsulMeshProps, HealthCheckMode, MeshConfig};
use crate::connect::{resolve_connection, ConnectionState};
use crate::mesh::{MESH_EXTENSION, SIDECAR_PORTS};
use crate::topology::{build_topology, wire_primary_container, wire_security_groups, HealthCheckHook};
use crate::upstream::UpstreamRegistry;
use crate::validate;

/// Enrolls a service in the Consul mesh
///
/// Adds the agent, mesh-init and proxy sidecars (plus health-sync for
/// ECS-native checks) and takes part in `connect_to` between services.
#[derive(Debug)]
pub struct ConsulMeshExtension {
    props: ConsulMeshProps,
    health_check_mode: HealthCheckMode,
    config: Option<MeshConfig>,
    primary_environment: Option<Vec<KeyValuePair>>,
    connections: ConnectionState,
}

impl ConsulMeshExtension {
    /// Validate props and create the extension
    pub fn new(props: ConsulMeshProps) -> Result<Self> {
        let health_check_mode = validate::health_check_mode(&props)?;
        Ok(Self {
            props,
            health_check_mode,
            config: None,
            primary_environment: None,
            connections: ConnectionState::default(),
        })
    }

    /// Resolved config, once attached to a service
    pub fn config(&self) -> Option<&MeshConfig> {
        self.config.as_ref()
    }

    /// Catalog name, once attached to a service
    pub fn service_name(&self) -> Option<&str> {
        self.config.as_ref().map(|c| c.service_name.as_str())
    }

    /// Declared upstreams
    pub fn upstreams(&self) -> &UpstreamRegistry {
        self.connections.upstreams()
    }

    /// Connection state
    pub fn connections(&self) -> &ConnectionState {
        &self.connections
    }

    fn resolved(&self, hook: &str) -> Result<&MeshConfig> {
        self.config
            .as_ref()
            .ok_or_else(|| Error::uninitialized(hook, "mesh extension is not attached to a service"))
    }
}

impl ServiceExtension for ConsulMeshExtension {
    fn name(&self) -> &str {
        MESH_EXTENSION
    }

    fn prehook(&mut self, service: &ServiceInfo) -> Result<()> {
        let config = MeshConfig::resolve(&self.props, self.health_check_mode.clone(), service);
        debug!(
            service = %service.id,
            service_name = %config.service_name,
            "attached mesh extension"
        );
        let reserved = SIDECAR_PORTS.into_iter().chain([config.port]);
        self.connections = ConnectionState::new(UpstreamRegistry::with_reserved_ports(reserved));
        self.config = Some(config);
        Ok(())
    }

    fn add_hooks(&self, description: &ServiceDescription) -> Result<Vec<Box<dyn ContainerMutatingHook>>> {
        let config = self.resolved("add_hooks")?;
        if description.get(CONTAINER_EXTENSION).is_none() {
            return Err(Error::missing_dependency(
                &config.service_id,
                "Consul Mesh extension requires an application extension",
            ));
        }

        let mut hooks: Vec<Box<dyn ContainerMutatingHook>> = Vec::new();
        if let Some(hook) = HealthCheckHook::for_mode(&config.health_check_mode) {
            hooks.push(Box::new(hook));
        }
        Ok(hooks)
    }

    fn modify_task_definition_props(&self, props: TaskDefinitionProps) -> TaskDefinitionProps {
        match &self.props.family {
            Some(family) => TaskDefinitionProps {
                family: family.clone(),
                ..props
            },
            None => props,
        }
    }

    fn use_task_definition(&mut self, task: &mut TaskDefinition) -> Result<()> {
        let config = self.resolved("use_task_definition")?;
        build_topology(config, self.connections.upstreams(), task)
    }

    fn resolve_container_dependencies(&mut self, task: &mut TaskDefinition) -> Result<()> {
        let config = self.resolved("resolve_container_dependencies")?;
        let environment = wire_primary_container(config, task)?;
        self.primary_environment = Some(environment);
        Ok(())
    }

    fn use_service(&mut self, service: &mut EcsService, network: &mut Network) -> Result<()> {
        let config = self.resolved("use_service")?;
        wire_security_groups(config, service, network)
    }

    fn connect_to_service(&mut self, ctx: ConnectContext<'_>) -> Result<()> {
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| Error::uninitialized("connect_to_service", "mesh extension is not attached to a service"))?;
        let primary_environment = self.primary_environment.as_deref().ok_or_else(|| {
            Error::uninitialized(
                "connect_to_service",
                format!("{} was connected before its containers were wired", config.service_id),
            )
        })?;
        resolve_connection(config, &mut self.connections, primary_environment, ctx)
    }

    fn connection_checkpoint(&self) -> Option<Box<dyn Any>> {
        Some(Box::new(self.connections.clone()))
    }

    fn restore_connection_checkpoint(&mut self, checkpoint: Box<dyn Any>) {
        if let Ok(state) = checkpoint.downcast::<ConnectionState>() {
            self.connections = *state;
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
