//! Service extension hooks
//!
//! A [`ServiceDescription`] is a named set of extensions. While a
//! [`Service`](crate::service::Service) is built, every extension sees the
//! lifecycle hooks in this order:
//!
//! 1. `prehook`
//! 2. `add_hooks` (container mutating hooks handed to the app container)
//! 3. `modify_task_definition_props`
//! 4. `use_task_definition`
//! 5. `resolve_container_dependencies`
//! 6. `use_service`
//!
//! `connect_to_service` runs later, once per declared connection.

use std::any::Any;
use std::fmt;

use crate::network::{Network, SecurityGroupId};
use crate::service::{ConnectToOptions, EcsService, Service};
use crate::task::{ContainerDefinition, TaskDefinition, TaskDefinitionProps};
use crate::{Error, Result};

/// Identity of the service an extension is attached to
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceInfo {
    /// Service id, unique within the stack
    pub id: String,
    /// Environment the service belongs to
    pub environment_id: String,
    /// Stack region
    pub region: String,
}

/// Adjusts the application container before it is materialized
pub trait ContainerMutatingHook: fmt::Debug {
    /// Return the adjusted container
    fn mutate_container_definition(&self, container: ContainerDefinition) -> ContainerDefinition;
}

/// Everything a `connect` hook may read or mutate on the calling side
pub struct ConnectContext<'a> {
    /// Calling service
    pub source: &'a ServiceInfo,
    /// Calling service's security groups, own group first
    pub source_security_groups: &'a [SecurityGroupId],
    /// Calling service's already-built task definition
    pub task_definition: &'a mut TaskDefinition,
    /// Service being called
    pub target: &'a Service,
    /// Stack network for ingress grants
    pub network: &'a mut Network,
    /// Caller options
    pub options: &'a ConnectToOptions,
}

/// Pluggable unit of service behaviour
///
/// All hooks default to no-ops so an extension only implements the steps it
/// cares about.
pub trait ServiceExtension: Any + fmt::Debug {
    /// Registry key within a service description
    fn name(&self) -> &str;

    /// First hook; the extension learns which service owns it
    fn prehook(&mut self, _service: &ServiceInfo) -> Result<()> {
        Ok(())
    }

    /// Hooks to apply to the application container
    fn add_hooks(&self, _description: &ServiceDescription) -> Result<Vec<Box<dyn ContainerMutatingHook>>> {
        Ok(Vec::new())
    }

    /// Accept a hook produced by another extension
    fn add_container_mutating_hook(&mut self, _hook: Box<dyn ContainerMutatingHook>) -> Result<()> {
        Err(Error::config(format!(
            "extension {} does not accept container mutating hooks",
            self.name()
        )))
    }

    /// Adjust task definition props before the task definition exists
    fn modify_task_definition_props(&self, props: TaskDefinitionProps) -> TaskDefinitionProps {
        props
    }

    /// Add containers, volumes and policies to the task definition
    fn use_task_definition(&mut self, _task: &mut TaskDefinition) -> Result<()> {
        Ok(())
    }

    /// Wire startup ordering between containers
    fn resolve_container_dependencies(&mut self, _task: &mut TaskDefinition) -> Result<()> {
        Ok(())
    }

    /// Adjust the service and its network access
    fn use_service(&mut self, _service: &mut EcsService, _network: &mut Network) -> Result<()> {
        Ok(())
    }

    /// React to `source.connect_to(target)`
    fn connect_to_service(&mut self, _ctx: ConnectContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Snapshot of state `connect_to_service` mutates, restored if a later
    /// extension rejects the same connection
    fn connection_checkpoint(&self) -> Option<Box<dyn Any>> {
        None
    }

    /// Restore a snapshot taken by `connection_checkpoint`
    fn restore_connection_checkpoint(&mut self, _checkpoint: Box<dyn Any>) {}

    /// Downcast support
    fn as_any(&self) -> &dyn Any;

    /// Downcast support
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Named set of extensions describing one service
#[derive(Debug, Default)]
pub struct ServiceDescription {
    extensions: Vec<Box<dyn ServiceExtension>>,
}

impl ServiceDescription {
    /// Empty description
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an extension; names must be unique
    pub fn add<E: ServiceExtension>(&mut self, extension: E) -> Result<&mut Self> {
        if self.get(extension.name()).is_some() {
            return Err(Error::config(format!(
                "service description already has an extension named {}",
                extension.name()
            )));
        }
        self.extensions.push(Box::new(extension));
        Ok(self)
    }

    /// Look up an extension by name
    pub fn get(&self, name: &str) -> Option<&dyn ServiceExtension> {
        self.extensions
            .iter()
            .find(|e| e.name() == name)
            .map(|e| e.as_ref())
    }

    /// Look up an extension by name, mutably
    pub fn get_mut(&mut self, name: &str) -> Option<&mut (dyn ServiceExtension + 'static)> {
        self.extensions
            .iter_mut()
            .find(|e| e.name() == name)
            .map(|e| e.as_mut())
    }

    /// Look up an extension by name and concrete type
    pub fn get_as<T: ServiceExtension>(&self, name: &str) -> Option<&T> {
        self.get(name).and_then(|e| e.as_any().downcast_ref::<T>())
    }

    /// Registered extension names in insertion order
    pub fn names(&self) -> Vec<&str> {
        self.extensions.iter().map(|e| e.name()).collect()
    }

    pub(crate) fn extensions(&self) -> &[Box<dyn ServiceExtension>] {
        &self.extensions
    }

    pub(crate) fn extensions_mut(&mut self) -> &mut [Box<dyn ServiceExtension>] {
        &mut self.extensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Named(&'static str);

    impl ServiceExtension for Named {
        fn name(&self) -> &str {
            self.0
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    #[test]
    fn story_extensions_are_name_keyed() {
        let mut desc = ServiceDescription::new();
        desc.add(Named("a")).unwrap().add(Named("b")).unwrap();

        assert_eq!(desc.names(), vec!["a", "b"]);
        assert!(desc.get_as::<Named>("b").is_some());
        assert!(desc.get("c").is_none());
    }

    #[test]
    fn story_duplicate_extension_rejected() {
        let mut desc = ServiceDescription::new();
        desc.add(Named("a")).unwrap();
        let err = desc.add(Named("a")).unwrap_err();
        assert!(err.to_string().contains("already has an extension named a"));
    }

    #[test]
    fn test_default_hook_sink_refuses_hooks() {
        #[derive(Debug)]
        struct Noop;
        impl ContainerMutatingHook for Noop {
            fn mutate_container_definition(&self, c: ContainerDefinition) -> ContainerDefinition {
                c
            }
        }

        let mut ext = Named("plain");
        assert!(ext.add_container_mutating_hook(Box::new(Noop)).is_err());
    }
}
