//! The application container extension
//!
//! Every service description that runs workload code registers this
//! extension under [`CONTAINER_EXTENSION`]. Other extensions adjust the app
//! container through [`ContainerMutatingHook`]s, which are applied in
//! registration order right before the container is added to the task.

use std::any::Any;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::extension::{ContainerMutatingHook, ServiceExtension};
use crate::task::{ContainerDefinition, KeyValuePair, PortMapping, TaskDefinition, TaskDefinitionProps, Ulimit};
use crate::Result;

/// Registry key of the application container extension
pub const CONTAINER_EXTENSION: &str = "service-container";

/// Name of the materialized application container
pub const APP_CONTAINER_NAME: &str = "app";

/// Open-file limit applied to the app container
const APP_NOFILE_LIMIT: u64 = 1_024_000;

/// Application container settings
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerProps {
    /// Image reference
    pub image: String,
    /// CPU units
    pub cpu: u32,
    /// Memory limit in MiB
    pub memory_mib: u32,
    /// Port the application listens on
    pub traffic_port: u16,
    /// Declared environment, in order
    #[serde(default)]
    pub environment: Vec<KeyValuePair>,
}

/// Application container extension
#[derive(Debug)]
pub struct Container {
    props: ContainerProps,
    hooks: Vec<Box<dyn ContainerMutatingHook>>,
}

impl Container {
    /// Create the extension
    pub fn new(props: ContainerProps) -> Self {
        Self {
            props,
            hooks: Vec::new(),
        }
    }

    /// Port the application listens on
    pub fn traffic_port(&self) -> u16 {
        self.props.traffic_port
    }

    /// Declared environment
    pub fn environment(&self) -> &[KeyValuePair] {
        &self.props.environment
    }
}

impl ServiceExtension for Container {
    fn name(&self) -> &str {
        CONTAINER_EXTENSION
    }

    fn add_container_mutating_hook(&mut self, hook: Box<dyn ContainerMutatingHook>) -> Result<()> {
        self.hooks.push(hook);
        Ok(())
    }

    fn modify_task_definition_props(&self, props: TaskDefinitionProps) -> TaskDefinitionProps {
        TaskDefinitionProps {
            cpu: props.cpu.max(self.props.cpu),
            memory_mib: props.memory_mib.max(self.props.memory_mib),
            ..props
        }
    }

    fn use_task_definition(&mut self, task: &mut TaskDefinition) -> Result<()> {
        let mut container = ContainerDefinition::new(APP_CONTAINER_NAME, self.props.image.clone())
            .essential(true)
            .with_cpu(self.props.cpu)
            .with_memory_mib(self.props.memory_mib)
            .with_port(PortMapping::tcp(self.props.traffic_port))
            .with_ulimit(Ulimit::nofile(APP_NOFILE_LIMIT));
        container.environment = self.props.environment.clone();

        for hook in &self.hooks {
            container = hook.mutate_container_definition(container);
        }
        debug!(
            family = %task.family,
            hooks = self.hooks.len(),
            "materializing application container"
        );
        task.add_container(container)?;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::HealthCheck;

    fn props() -> ContainerProps {
        ContainerProps {
            image: "nathanpeck/greeter".to_string(),
            cpu: 1024,
            memory_mib: 2048,
            traffic_port: 3000,
            environment: vec![KeyValuePair::new("PORT", "3000")],
        }
    }

    fn task() -> TaskDefinition {
        TaskDefinition::new(
            TaskDefinitionProps {
                family: "greetertaskdefinition".to_string(),
                cpu: 256,
                memory_mib: 512,
            },
            "us-west-2",
        )
    }

    #[derive(Debug)]
    struct AddCheck;

    impl ContainerMutatingHook for AddCheck {
        fn mutate_container_definition(&self, container: ContainerDefinition) -> ContainerDefinition {
            container.with_health_check(HealthCheck::new(vec!["CMD".to_string(), "true".to_string()]))
        }
    }

    #[test]
    fn story_app_container_materialized_with_hooks() {
        let mut ext = Container::new(props());
        ext.add_container_mutating_hook(Box::new(AddCheck)).unwrap();

        let mut task = task();
        ext.use_task_definition(&mut task).unwrap();

        let app = task.container(APP_CONTAINER_NAME).unwrap();
        assert!(app.essential);
        assert_eq!(app.port_mappings, vec![PortMapping::tcp(3000)]);
        assert_eq!(app.env("PORT"), Some("3000"));
        assert!(app.health_check.is_some());
        assert_eq!(app.ulimits, vec![Ulimit::nofile(1_024_000)]);
    }

    #[test]
    fn story_task_props_grow_to_fit_container() {
        let ext = Container::new(props());
        let props = ext.modify_task_definition_props(TaskDefinitionProps {
            family: "f".to_string(),
            cpu: 256,
            memory_mib: 512,
        });
        assert_eq!(props.cpu, 1024);
        assert_eq!(props.memory_mib, 2048);
    }

    #[test]
    fn test_props_from_camel_case() {
        let props: ContainerProps = serde_json::from_value(serde_json::json!({
            "image": "app:latest",
            "cpu": 256,
            "memoryMib": 512,
            "trafficPort": 8080
        }))
        .unwrap();
        assert_eq!(props.traffic_port, 8080);
        assert!(props.environment.is_empty());
    }
}
