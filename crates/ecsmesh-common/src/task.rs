//! ECS task definition types
//!
//! The declarative container document that extensions build up during a
//! service's construction. Containers are addressed by name; extensions that
//! must revise an already-materialized container (e.g. after a `connect`)
//! go through [`TaskDefinition::container_mut`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::network::Protocol;
use crate::secret::SecretRef;
use crate::{Error, Result};

// =============================================================================
// Container pieces
// =============================================================================

/// Container port mapping
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct PortMapping {
    /// Port inside the container
    pub container_port: u16,
    /// Protocol
    pub protocol: Protocol,
}

impl PortMapping {
    /// TCP port mapping
    pub fn tcp(port: u16) -> Self {
        Self {
            container_port: port,
            protocol: Protocol::Tcp,
        }
    }

    /// UDP port mapping
    pub fn udp(port: u16) -> Self {
        Self {
            container_port: port,
            protocol: Protocol::Udp,
        }
    }
}

/// Volume mount inside a container
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct MountPoint {
    /// Path inside the container
    pub container_path: String,
    /// Task volume name
    pub source_volume: String,
    /// Mount read-only
    pub read_only: bool,
}

impl MountPoint {
    /// Read-write mount
    pub fn read_write(source_volume: impl Into<String>, container_path: impl Into<String>) -> Self {
        Self {
            container_path: container_path.into(),
            source_volume: source_volume.into(),
            read_only: false,
        }
    }

    /// Read-only mount
    pub fn read_only(source_volume: impl Into<String>, container_path: impl Into<String>) -> Self {
        Self {
            read_only: true,
            ..Self::read_write(source_volume, container_path)
        }
    }
}

/// Log driver configuration
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct LogConfiguration {
    /// Log driver name
    pub log_driver: String,
    /// Driver options
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, String>,
}

impl LogConfiguration {
    /// `awslogs` stream prefix option key
    pub const STREAM_PREFIX: &'static str = "awslogs-stream-prefix";
    /// `awslogs` group option key
    pub const GROUP: &'static str = "awslogs-group";
    /// `awslogs` region option key
    pub const REGION: &'static str = "awslogs-region";

    /// awslogs driver with a stream prefix; the group is filled in when the
    /// container is added to a task definition
    pub fn aws_logs(stream_prefix: impl Into<String>) -> Self {
        let mut options = BTreeMap::new();
        options.insert(Self::STREAM_PREFIX.to_string(), stream_prefix.into());
        Self {
            log_driver: "awslogs".to_string(),
            options,
        }
    }
}

/// Container health check
///
/// Durations are in seconds.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct HealthCheck {
    /// Command, starting with `CMD` or `CMD-SHELL`
    #[serde(alias = "command")]
    pub command: Vec<String>,
    /// Seconds between checks
    #[serde(default = "HealthCheck::default_interval", alias = "interval")]
    pub interval: u32,
    /// Seconds before a check is considered failed
    #[serde(default = "HealthCheck::default_timeout", alias = "timeout")]
    pub timeout: u32,
    /// Consecutive failures before unhealthy
    #[serde(default = "HealthCheck::default_retries", alias = "retries")]
    pub retries: u32,
    /// Grace period before failures count
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "startPeriod")]
    pub start_period: Option<u32>,
}

impl HealthCheck {
    fn default_interval() -> u32 {
        30
    }
    fn default_timeout() -> u32 {
        5
    }
    fn default_retries() -> u32 {
        3
    }

    /// Health check with the default timings (30s interval, 5s timeout, 3 retries)
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            interval: Self::default_interval(),
            timeout: Self::default_timeout(),
            retries: Self::default_retries(),
            start_period: None,
        }
    }
}

/// Start condition for a container dependency
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum DependencyCondition {
    /// Dependency has started
    Start,
    /// Dependency has exited with any code
    Complete,
    /// Dependency has exited with code 0
    Success,
    /// Dependency passed its health check
    Healthy,
}

/// Startup-order edge onto another container in the same task
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerDependency {
    /// Name of the container depended on
    pub container_name: String,
    /// Required state of that container
    pub condition: DependencyCondition,
}

/// Literal environment variable
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct KeyValuePair {
    /// Variable name
    #[serde(alias = "name")]
    pub name: String,
    /// Variable value
    #[serde(alias = "value")]
    pub value: String,
}

impl KeyValuePair {
    /// Create a name/value pair
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Environment variable injected from a secret store at task start
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerSecret {
    /// Variable name
    pub name: String,
    /// ARN (or name) of the secret
    pub value_from: String,
}

/// Resource limit (e.g. `nofile`)
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct Ulimit {
    /// Limit name
    pub name: String,
    /// Soft limit
    pub soft_limit: u64,
    /// Hard limit
    pub hard_limit: u64,
}

impl Ulimit {
    /// Open file descriptor limit, soft and hard set to the same value
    pub fn nofile(limit: u64) -> Self {
        Self {
            name: "nofile".to_string(),
            soft_limit: limit,
            hard_limit: limit,
        }
    }
}

// =============================================================================
// Container definition
// =============================================================================

/// One container in a task definition
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerDefinition {
    /// Container name (unique within the task)
    pub name: String,
    /// Image reference
    pub image: String,
    /// CPU units
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<u32>,
    /// Hard memory limit in MiB
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<u32>,
    /// Whether the task stops when this container stops
    pub essential: bool,
    /// Port mappings
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub port_mappings: Vec<PortMapping>,
    /// Volume mounts
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mount_points: Vec<MountPoint>,
    /// Log sink
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_configuration: Option<LogConfiguration>,
    /// Health check
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheck>,
    /// Start-order dependencies
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<ContainerDependency>,
    /// Entrypoint override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_point: Option<Vec<String>>,
    /// Command override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
    /// Literal environment, in declaration order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub environment: Vec<KeyValuePair>,
    /// Secret-backed environment
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<ContainerSecret>,
    /// User to run as
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Resource limits
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ulimits: Vec<Ulimit>,
}

impl ContainerDefinition {
    /// Create a non-essential container with no options set
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            cpu: None,
            memory: None,
            essential: false,
            port_mappings: Vec::new(),
            mount_points: Vec::new(),
            log_configuration: None,
            health_check: None,
            depends_on: Vec::new(),
            entry_point: None,
            command: None,
            environment: Vec::new(),
            secrets: Vec::new(),
            user: None,
            ulimits: Vec::new(),
        }
    }

    /// Mark the container essential (or not)
    pub fn essential(mut self, essential: bool) -> Self {
        self.essential = essential;
        self
    }

    /// Set the hard memory limit
    pub fn with_memory_mib(mut self, mib: u32) -> Self {
        self.memory = Some(mib);
        self
    }

    /// Set CPU units
    pub fn with_cpu(mut self, cpu: u32) -> Self {
        self.cpu = Some(cpu);
        self
    }

    /// Add a port mapping
    pub fn with_port(mut self, mapping: PortMapping) -> Self {
        self.port_mappings.push(mapping);
        self
    }

    /// Add a mount point
    pub fn with_mount(mut self, mount: MountPoint) -> Self {
        self.mount_points.push(mount);
        self
    }

    /// Set the log configuration
    pub fn with_logging(mut self, logging: LogConfiguration) -> Self {
        self.log_configuration = Some(logging);
        self
    }

    /// Set the health check
    pub fn with_health_check(mut self, check: HealthCheck) -> Self {
        self.health_check = Some(check);
        self
    }

    /// Set the entrypoint
    pub fn with_entry_point<I, S>(mut self, entry_point: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entry_point = Some(entry_point.into_iter().map(Into::into).collect());
        self
    }

    /// Set the command
    pub fn with_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = Some(command.into_iter().map(Into::into).collect());
        self
    }

    /// Add a secret-backed variable from a secret reference
    pub fn with_secret(mut self, name: impl Into<String>, secret: &SecretRef) -> Self {
        self.secrets.push(ContainerSecret {
            name: name.into(),
            value_from: secret.id().to_string(),
        });
        self
    }

    /// Set the user
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Add a ulimit
    pub fn with_ulimit(mut self, ulimit: Ulimit) -> Self {
        self.ulimits.push(ulimit);
        self
    }

    /// Add a start-order dependency
    pub fn add_dependency(&mut self, container_name: impl Into<String>, condition: DependencyCondition) {
        self.depends_on.push(ContainerDependency {
            container_name: container_name.into(),
            condition,
        });
    }

    /// Look up a declared environment variable
    pub fn env(&self, name: &str) -> Option<&str> {
        self.environment
            .iter()
            .find(|kv| kv.name == name)
            .map(|kv| kv.value.as_str())
    }
}

// =============================================================================
// Task definition
// =============================================================================

/// Task volume
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct Volume {
    /// Volume name
    pub name: String,
}

/// IAM statement attached to the task role
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyStatement {
    /// Allowed actions
    pub action: Vec<String>,
    /// Resources the actions apply to
    pub resource: Vec<String>,
    /// Condition operator -> key -> value
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub condition: BTreeMap<String, BTreeMap<String, String>>,
}

/// Properties fixed before the task definition is created
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskDefinitionProps {
    /// Task family
    pub family: String,
    /// Task-level CPU units
    pub cpu: u32,
    /// Task-level memory in MiB
    pub memory_mib: u32,
}

/// ECS task definition
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct TaskDefinition {
    /// Task family
    pub family: String,
    /// Task-level CPU units
    pub cpu: String,
    /// Task-level memory in MiB
    pub memory: String,
    /// Network mode
    pub network_mode: String,
    /// Launch types the task is compatible with
    pub requires_compatibilities: Vec<String>,
    /// Containers in creation order
    pub container_definitions: Vec<ContainerDefinition>,
    /// Volumes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
    /// Statements attached to the task role
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub task_role_policy: Vec<PolicyStatement>,
    #[serde(skip)]
    region: String,
}

impl TaskDefinition {
    /// Create an empty awsvpc task definition
    pub fn new(props: TaskDefinitionProps, region: impl Into<String>) -> Self {
        Self {
            family: props.family,
            cpu: props.cpu.to_string(),
            memory: props.memory_mib.to_string(),
            network_mode: "awsvpc".to_string(),
            requires_compatibilities: vec!["EC2".to_string(), "FARGATE".to_string()],
            container_definitions: Vec::new(),
            volumes: Vec::new(),
            task_role_policy: Vec::new(),
            region: region.into(),
        }
    }

    /// Add a container; names must be unique within the task
    ///
    /// awslogs configurations get their group and region filled in here.
    pub fn add_container(&mut self, mut container: ContainerDefinition) -> Result<&mut ContainerDefinition> {
        if self.container(&container.name).is_some() {
            return Err(Error::config(format!(
                "task definition {} already has a container named {}",
                self.family, container.name
            )));
        }

        if let Some(logging) = container.log_configuration.as_mut() {
            logging
                .options
                .entry(LogConfiguration::GROUP.to_string())
                .or_insert_with(|| format!("/ecs/{}/{}", self.family, container.name));
            logging
                .options
                .entry(LogConfiguration::REGION.to_string())
                .or_insert_with(|| self.region.clone());
        }

        let index = self.container_definitions.len();
        self.container_definitions.push(container);
        Ok(&mut self.container_definitions[index])
    }

    /// Look up a container by name
    pub fn container(&self, name: &str) -> Option<&ContainerDefinition> {
        self.container_definitions.iter().find(|c| c.name == name)
    }

    /// Look up a container by name for post-hoc overrides
    pub fn container_mut(&mut self, name: &str) -> Option<&mut ContainerDefinition> {
        self.container_definitions.iter_mut().find(|c| c.name == name)
    }

    /// The task's default container: the first essential one
    pub fn default_container(&self) -> Option<&ContainerDefinition> {
        self.container_definitions.iter().find(|c| c.essential)
    }

    /// Add a volume; adding an existing name is a no-op
    pub fn add_volume(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !self.volumes.iter().any(|v| v.name == name) {
            self.volumes.push(Volume { name });
        }
    }

    /// Attach a statement to the task role
    pub fn add_to_task_role_policy(&mut self, statement: PolicyStatement) {
        self.task_role_policy.push(statement);
    }

    /// Region the task definition is deployed to
    pub fn region(&self) -> &str {
        &self.region
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> TaskDefinition {
        TaskDefinition::new(
            TaskDefinitionProps {
                family: "apitaskdefinition".to_string(),
                cpu: 256,
                memory_mib: 512,
            },
            "us-west-2",
        )
    }

    // =========================================================================
    // Story: containers are addressed by name
    // =========================================================================

    #[test]
    fn story_container_lookup_is_name_keyed() {
        let mut task = task();
        task.add_container(ContainerDefinition::new("app", "nginx").essential(true))
            .unwrap();
        task.add_container(ContainerDefinition::new("sidecar", "envoy"))
            .unwrap();

        assert_eq!(task.container("sidecar").unwrap().image, "envoy");
        task.container_mut("sidecar").unwrap().command = Some(vec!["run".to_string()]);
        assert_eq!(
            task.container("sidecar").unwrap().command,
            Some(vec!["run".to_string()])
        );
        assert!(task.container("missing").is_none());
    }

    #[test]
    fn story_duplicate_container_name_rejected() {
        let mut task = task();
        task.add_container(ContainerDefinition::new("app", "nginx"))
            .unwrap();
        let err = task
            .add_container(ContainerDefinition::new("app", "other"))
            .unwrap_err();
        assert!(err.to_string().contains("already has a container named app"));
    }

    #[test]
    fn story_default_container_is_first_essential() {
        let mut task = task();
        task.add_container(ContainerDefinition::new("init", "busybox"))
            .unwrap();
        task.add_container(ContainerDefinition::new("app", "nginx").essential(true))
            .unwrap();
        assert_eq!(task.default_container().unwrap().name, "app");
    }

    #[test]
    fn story_aws_logs_group_filled_in() {
        let mut task = task();
        task.add_container(
            ContainerDefinition::new("envoy", "envoy").with_logging(LogConfiguration::aws_logs("envoy")),
        )
        .unwrap();
        let options = &task
            .container("envoy")
            .unwrap()
            .log_configuration
            .as_ref()
            .unwrap()
            .options;
        assert_eq!(
            options.get(LogConfiguration::GROUP).map(String::as_str),
            Some("/ecs/apitaskdefinition/envoy")
        );
        assert_eq!(
            options.get(LogConfiguration::REGION).map(String::as_str),
            Some("us-west-2")
        );
    }

    #[test]
    fn story_volumes_deduplicate() {
        let mut task = task();
        task.add_volume("data");
        task.add_volume("data");
        task.add_volume("config");
        let names: Vec<_> = task.volumes.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["data", "config"]);
    }

    #[test]
    fn test_serializes_pascal_case() {
        let container = ContainerDefinition::new("proxy", "envoy")
            .with_port(PortMapping::udp(8301))
            .with_mount(MountPoint::read_only("consul_binary", "/bin/consul-inject"));
        let value = serde_json::to_value(&container).unwrap();
        assert_eq!(value["PortMappings"][0]["Protocol"], "udp");
        assert_eq!(value["MountPoints"][0]["ReadOnly"], true);
        assert_eq!(value["Essential"], false);
        assert!(value.get("Environment").is_none());
    }

    #[test]
    fn test_dependency_condition_uppercase() {
        let dep = ContainerDependency {
            container_name: "sidecar-proxy".to_string(),
            condition: DependencyCondition::Healthy,
        };
        let value = serde_json::to_value(&dep).unwrap();
        assert_eq!(value["Condition"], "HEALTHY");
        assert_eq!(value["ContainerName"], "sidecar-proxy");
    }

    #[test]
    fn test_health_check_defaults_from_yaml_style_input() {
        let check: HealthCheck =
            serde_json::from_str(r#"{"Command": ["CMD-SHELL", "curl localhost:3000/health"]}"#)
                .unwrap();
        assert_eq!(check.interval, 30);
        assert_eq!(check.timeout, 5);
        assert_eq!(check.retries, 3);
    }
}
