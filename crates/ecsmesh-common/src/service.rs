//! Services: a description built into a task definition plus an ECS service

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::container::CONTAINER_EXTENSION;
use crate::extension::{ConnectContext, ContainerMutatingHook, ServiceDescription, ServiceInfo};
use crate::network::SecurityGroupId;
use crate::stack::Stack;
use crate::task::{TaskDefinition, TaskDefinitionProps};
use crate::{Error, Result};

/// Task-level CPU before extensions adjust it
const DEFAULT_TASK_CPU: u32 = 256;
/// Task-level memory before extensions adjust it
const DEFAULT_TASK_MEMORY_MIB: u32 = 512;

/// ECS service document
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct EcsService {
    /// Service name
    pub service_name: String,
    /// Cluster the service runs in
    pub cluster: String,
    /// Task definition family
    pub task_definition: String,
    /// Desired task count
    pub desired_count: u32,
    /// Launch type
    pub launch_type: String,
    /// Attached security groups, the service's own group first
    pub security_groups: Vec<SecurityGroupId>,
}

impl EcsService {
    /// The group created for this service
    pub fn own_security_group(&self) -> Option<&SecurityGroupId> {
        self.security_groups.first()
    }
}

/// Service construction options
#[derive(Debug)]
pub struct ServiceProps {
    /// Environment id; must be declared on the stack
    pub environment: String,
    /// Extensions making up the service
    pub description: ServiceDescription,
    /// Extra security groups, attached after the service's own group
    pub security_groups: Vec<SecurityGroupId>,
    /// Desired task count
    pub desired_count: u32,
}

impl ServiceProps {
    /// Props with one task and no extra security groups
    pub fn new(environment: impl Into<String>, description: ServiceDescription) -> Self {
        Self {
            environment: environment.into(),
            description,
            security_groups: Vec::new(),
            desired_count: 1,
        }
    }
}

/// Options for [`Service::connect_to`]
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectToOptions {
    /// Local port for the upstream; allocated automatically when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_bind_port: Option<u16>,
}

/// A built service
#[derive(Debug)]
pub struct Service {
    info: ServiceInfo,
    description: ServiceDescription,
    task_definition: TaskDefinition,
    ecs_service: EcsService,
}

impl Service {
    /// Build a service into the stack
    ///
    /// Network changes are staged and only committed when every hook
    /// succeeds, so a failed build leaves the stack untouched.
    pub fn new(stack: &mut Stack, id: impl Into<String>, props: ServiceProps) -> Result<Self> {
        let id = id.into();
        let ServiceProps {
            environment,
            mut description,
            security_groups,
            desired_count,
        } = props;

        if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(Error::config_for_field(
                "id",
                format!("service id '{id}' must be non-empty and contain only alphanumerics and '-'"),
            ));
        }
        if stack.has_service(&id) {
            return Err(Error::config(format!("service {id} already declared")));
        }
        let cluster = stack
            .environment(&environment)
            .ok_or_else(|| Error::config(format!("service {id} references unknown environment {environment}")))?
            .cluster_name
            .clone();

        let info = ServiceInfo {
            id: id.clone(),
            environment_id: environment,
            region: stack.region().to_string(),
        };
        let mut network = stack.network().clone();

        for extension in description.extensions_mut() {
            extension.prehook(&info)?;
        }

        let mut hooks: Vec<Box<dyn ContainerMutatingHook>> = Vec::new();
        for extension in description.extensions() {
            hooks.extend(extension.add_hooks(&description)?);
        }
        if !hooks.is_empty() {
            let container = description.get_mut(CONTAINER_EXTENSION).ok_or_else(|| {
                Error::missing_dependency(&id, "container mutating hooks require an application container")
            })?;
            for hook in hooks {
                container.add_container_mutating_hook(hook)?;
            }
        }

        let task_props = description.extensions().iter().fold(
            TaskDefinitionProps {
                family: format!("{id}taskdefinition"),
                cpu: DEFAULT_TASK_CPU,
                memory_mib: DEFAULT_TASK_MEMORY_MIB,
            },
            |props, extension| extension.modify_task_definition_props(props),
        );
        let mut task_definition = TaskDefinition::new(task_props, stack.region());

        for extension in description.extensions_mut() {
            extension.use_task_definition(&mut task_definition)?;
        }
        for extension in description.extensions_mut() {
            extension.resolve_container_dependencies(&mut task_definition)?;
        }

        let own_group = network.add_security_group(
            format!("{id}-service"),
            format!("Security group for service {id}"),
        )?;
        let mut attached = vec![own_group];
        for group in security_groups {
            if !network.contains(&group) {
                return Err(Error::config(format!(
                    "service {id} references unknown security group {group}"
                )));
            }
            attached.push(group);
        }
        let mut ecs_service = EcsService {
            service_name: id.clone(),
            cluster,
            task_definition: task_definition.family.clone(),
            desired_count,
            launch_type: "FARGATE".to_string(),
            security_groups: attached,
        };

        for extension in description.extensions_mut() {
            extension.use_service(&mut ecs_service, &mut network)?;
        }

        stack.commit_service(&id, network);
        info!(
            service = %id,
            environment = %info.environment_id,
            extensions = ?description.names(),
            containers = task_definition.container_definitions.len(),
            "built service"
        );

        Ok(Self {
            info,
            description,
            task_definition,
            ecs_service,
        })
    }

    /// Declare that this service calls `target`
    ///
    /// Extensions see staged copies of the task definition and network; both
    /// are committed only if every extension accepts the connection.
    pub fn connect_to(&mut self, target: &Service, stack: &mut Stack, options: ConnectToOptions) -> Result<()> {
        if self.info.id == target.info.id {
            return Err(Error::config(format!("service {} cannot connect to itself", self.info.id)));
        }

        let mut task_definition = self.task_definition.clone();
        let mut network = stack.network().clone();
        let checkpoints: Vec<_> = self
            .description
            .extensions()
            .iter()
            .map(|extension| extension.connection_checkpoint())
            .collect();

        let mut result = Ok(());
        for extension in self.description.extensions_mut() {
            result = extension.connect_to_service(ConnectContext {
                source: &self.info,
                source_security_groups: &self.ecs_service.security_groups,
                task_definition: &mut task_definition,
                target,
                network: &mut network,
                options: &options,
            });
            if result.is_err() {
                break;
            }
        }
        if let Err(err) = result {
            for (extension, checkpoint) in self.description.extensions_mut().iter_mut().zip(checkpoints) {
                if let Some(checkpoint) = checkpoint {
                    extension.restore_connection_checkpoint(checkpoint);
                }
            }
            return Err(err);
        }

        self.task_definition = task_definition;
        *stack.network_mut() = network;
        debug!(source = %self.info.id, target = %target.info.id, "connected services");
        Ok(())
    }

    /// Service id
    pub fn id(&self) -> &str {
        &self.info.id
    }

    /// Environment id
    pub fn environment_id(&self) -> &str {
        &self.info.environment_id
    }

    /// Identity passed to extension hooks
    pub fn info(&self) -> &ServiceInfo {
        &self.info
    }

    /// Extensions
    pub fn description(&self) -> &ServiceDescription {
        &self.description
    }

    /// Built task definition
    pub fn task_definition(&self) -> &TaskDefinition {
        &self.task_definition
    }

    /// Built ECS service
    pub fn ecs_service(&self) -> &EcsService {
        &self.ecs_service
    }
}
