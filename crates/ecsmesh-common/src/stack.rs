//! The stack: environments, security groups and the synthesized document

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::network::{IngressRule, Network, SecurityGroup, SecurityGroupId};
use crate::service::{EcsService, Service};
use crate::task::TaskDefinition;
use crate::{Error, Result};

/// Deployment environment; services only talk within one
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct Environment {
    /// Environment id
    #[serde(skip)]
    pub id: String,
    /// ECS cluster backing the environment
    pub cluster_name: String,
}

/// Root of every build
#[derive(Debug)]
pub struct Stack {
    name: String,
    region: String,
    environments: BTreeMap<String, Environment>,
    network: Network,
    services: BTreeSet<String>,
}

impl Stack {
    /// Empty stack in a region
    pub fn new(name: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            region: region.into(),
            environments: BTreeMap::new(),
            network: Network::default(),
            services: BTreeSet::new(),
        }
    }

    /// Stack name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Region
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Declare an environment
    pub fn add_environment(&mut self, id: impl Into<String>) -> Result<&Environment> {
        let id = id.into();
        if self.environments.contains_key(&id) {
            return Err(Error::config(format!("environment {id} already declared")));
        }
        let env = Environment {
            cluster_name: format!("{id}-cluster"),
            id: id.clone(),
        };
        Ok(self.environments.entry(id).or_insert(env))
    }

    /// Look up an environment
    pub fn environment(&self, id: &str) -> Option<&Environment> {
        self.environments.get(id)
    }

    /// Declare a security group
    pub fn add_security_group(
        &mut self,
        id: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<SecurityGroupId> {
        self.network.add_security_group(id, description)
    }

    /// Security groups and ingress rules
    pub fn network(&self) -> &Network {
        &self.network
    }

    pub(crate) fn network_mut(&mut self) -> &mut Network {
        &mut self.network
    }

    /// Whether a service id is taken
    pub fn has_service(&self, id: &str) -> bool {
        self.services.contains(id)
    }

    pub(crate) fn commit_service(&mut self, id: &str, network: Network) {
        self.services.insert(id.to_string());
        self.network = network;
    }

    /// Render the stack and its services as one document
    ///
    /// Resources are keyed by logical id in a `BTreeMap`, so the same build
    /// always renders identically.
    pub fn synth<'a>(&self, services: impl IntoIterator<Item = &'a Service>) -> Result<Template> {
        let mut template = Template {
            description: format!("{} ({})", self.name, self.region),
            resources: BTreeMap::new(),
        };

        for env in self.environments.values() {
            template.insert(logical_id(&[&env.id, "Cluster"]), Resource::Cluster(env.clone()))?;
        }
        for group in self.network.security_groups() {
            template.insert(
                logical_id(&[group.group_name.as_str(), "SecurityGroup"]),
                Resource::SecurityGroup(group.clone()),
            )?;
        }
        for rule in self.network.ingress_rules() {
            let port = rule.from_port.to_string();
            let protocol = rule.ip_protocol.to_string();
            template.insert(
                logical_id(&[
                    rule.group_id.as_str(),
                    "From",
                    rule.source_security_group_id.as_str(),
                    &protocol,
                    &port,
                ]),
                Resource::SecurityGroupIngress(rule.clone()),
            )?;
        }
        for service in services {
            if !self.has_service(service.id()) {
                return Err(Error::config(format!(
                    "service {} was not built into stack {}",
                    service.id(),
                    self.name
                )));
            }
            template.insert(
                logical_id(&[service.id(), "TaskDefinition"]),
                Resource::TaskDefinition(service.task_definition().clone()),
            )?;
            template.insert(
                logical_id(&[service.id(), "Service"]),
                Resource::Service(service.ecs_service().clone()),
            )?;
        }

        debug!(resources = template.resources.len(), "synthesized stack");
        Ok(template)
    }
}

/// Resource in the synthesized document
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "Type", content = "Properties")]
pub enum Resource {
    /// ECS cluster
    #[serde(rename = "AWS::ECS::Cluster")]
    Cluster(Environment),
    /// Security group
    #[serde(rename = "AWS::EC2::SecurityGroup")]
    SecurityGroup(SecurityGroup),
    /// Ingress rule
    #[serde(rename = "AWS::EC2::SecurityGroupIngress")]
    SecurityGroupIngress(IngressRule),
    /// Task definition
    #[serde(rename = "AWS::ECS::TaskDefinition")]
    TaskDefinition(TaskDefinition),
    /// ECS service
    #[serde(rename = "AWS::ECS::Service")]
    Service(EcsService),
}

/// Synthesized deployment document
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct Template {
    /// Free-form description
    pub description: String,
    /// Resources by logical id
    pub resources: BTreeMap<String, Resource>,
}

impl Template {
    fn insert(&mut self, logical_id: String, resource: Resource) -> Result<()> {
        if self.resources.contains_key(&logical_id) {
            return Err(Error::config(format!("duplicate logical id {logical_id}")));
        }
        self.resources.insert(logical_id, resource);
        Ok(())
    }

    /// Pretty-printed JSON
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Look up a task definition by service id
    pub fn task_definition(&self, service_id: &str) -> Option<&TaskDefinition> {
        match self.resources.get(&logical_id(&[service_id, "TaskDefinition"])) {
            Some(Resource::TaskDefinition(task)) => Some(task),
            _ => None,
        }
    }
}

/// `["consul-server", "SecurityGroup"]` -> `ConsulServerSecurityGroup`
fn logical_id(parts: &[&str]) -> String {
    let mut id = String::new();
    for word in parts
        .iter()
        .flat_map(|p| p.split(|c: char| !c.is_ascii_alphanumeric()))
        .filter(|w| !w.is_empty())
    {
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            id.push(first.to_ascii_uppercase());
            id.extend(chars);
        }
    }
    id
}
