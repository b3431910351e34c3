//! Mesh manifest: one YAML document describing a whole stack
//!
//! ```yaml
//! name: greeter-app
//! region: us-west-2
//! environments: [production]
//! securityGroups:
//!   - id: consul-server
//!   - id: consul-client
//! services:
//!   - id: greeter
//!     environment: production
//!     container: { image: nathanpeck/greeter, cpu: 1024, memoryMib: 2048, trafficPort: 3000 }
//!     mesh:
//!       retryJoin: "provider=aws tag_key=Name tag_value=consul-server"
//!       serverSecurityGroup: consul-server
//!       clientSecurityGroup: consul-client
//! connections:
//!   - { from: greeter, to: name, localBindPort: 8080 }
//! ```
//!
//! Services are built in declaration order, then connections are applied in
//! declaration order.

use std::path::Path;

use ecsmesh_common::container::{Container, ContainerProps};
use ecsmesh_common::extension::ServiceDescription;
use ecsmesh_common::network::SecurityGroupId;
use ecsmesh_common::service::{ConnectToOptions, Service, ServiceProps};
use ecsmesh_common::stack::{Stack, Template};
use ecsmesh_common::yaml::from_yaml_str;
use ecsmesh_consul::{ConsulMeshExtension, ConsulMeshProps};
use serde::Deserialize;
use tracing::{debug, info};

use crate::{Error, Result};

/// Parsed manifest
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Stack name
    pub name: String,
    /// Region
    pub region: String,
    /// Environment ids
    pub environments: Vec<String>,
    /// Security groups declared up front (Consul server and client groups)
    #[serde(default)]
    pub security_groups: Vec<SecurityGroupSpec>,
    /// Services, built in order
    #[serde(default)]
    pub services: Vec<ServiceSpec>,
    /// Connections, applied in order
    #[serde(default)]
    pub connections: Vec<ConnectionSpec>,
}

/// Declared security group
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecurityGroupSpec {
    pub id: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Declared service
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    pub id: String,
    pub environment: String,
    #[serde(default)]
    pub security_groups: Vec<SecurityGroupId>,
    #[serde(default = "default_desired_count")]
    pub desired_count: u32,
    pub container: ContainerProps,
    /// Mesh enrollment; the mesh port defaults to the container's traffic port
    #[serde(default)]
    pub mesh: Option<ConsulMeshProps>,
}

fn default_desired_count() -> u32 {
    1
}

/// Declared connection `from -> to`
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSpec {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub local_bind_port: Option<u16>,
}

/// A built stack and its services
#[derive(Debug)]
pub struct Deployment {
    stack: Stack,
    services: Vec<Service>,
}

impl Deployment {
    /// The stack
    pub fn stack(&self) -> &Stack {
        &self.stack
    }

    /// Built services in declaration order
    pub fn services(&self) -> &[Service] {
        &self.services
    }

    /// Look up a built service
    pub fn service(&self, id: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.id() == id)
    }

    /// Render the deployment document
    pub fn synth(&self) -> Result<Template> {
        Ok(self.stack.synth(&self.services)?)
    }

    fn connect(&mut self, connection: &ConnectionSpec) -> Result<()> {
        let from = self.index_of(&connection.from)?;
        let to = self.index_of(&connection.to)?;
        if from == to {
            return Err(Error::manifest(format!(
                "service {} cannot connect to itself",
                connection.from
            )));
        }

        let (source, target) = if from < to {
            let (head, tail) = self.services.split_at_mut(to);
            (&mut head[from], &tail[0])
        } else {
            let (head, tail) = self.services.split_at_mut(from);
            (&mut tail[0], &head[to])
        };
        source.connect_to(
            target,
            &mut self.stack,
            ConnectToOptions {
                local_bind_port: connection.local_bind_port,
            },
        )?;
        Ok(())
    }

    fn index_of(&self, id: &str) -> Result<usize> {
        self.services
            .iter()
            .position(|s| s.id() == id)
            .ok_or_else(|| Error::manifest(format!("connection references unknown service {id}")))
    }
}

impl Manifest {
    /// Read and parse a manifest file
    pub fn load(path: &Path) -> Result<Self> {
        let input = std::fs::read_to_string(path).map_err(|source| Error::ReadManifest {
            path: path.to_path_buf(),
            source,
        })?;
        let manifest = Self::parse(&input)?;
        debug!(path = %path.display(), services = manifest.services.len(), "loaded manifest");
        Ok(manifest)
    }

    /// Parse a manifest from YAML text
    pub fn parse(input: &str) -> Result<Self> {
        Ok(from_yaml_str(input)?)
    }

    /// Build every service, then apply every connection
    pub fn build(&self) -> Result<Deployment> {
        let mut stack = Stack::new(&self.name, &self.region);
        for environment in &self.environments {
            stack.add_environment(environment.as_str())?;
        }
        for group in &self.security_groups {
            let description = group
                .description
                .clone()
                .unwrap_or_else(|| format!("Security group {}", group.id));
            stack.add_security_group(group.id.as_str(), description)?;
        }

        let mut services = Vec::with_capacity(self.services.len());
        for spec in &self.services {
            services.push(build_service(&mut stack, spec)?);
        }

        let mut deployment = Deployment { stack, services };
        for connection in &self.connections {
            deployment.connect(connection)?;
        }

        info!(
            stack = %self.name,
            services = deployment.services.len(),
            connections = self.connections.len(),
            "built deployment"
        );
        Ok(deployment)
    }
}

fn build_service(stack: &mut Stack, spec: &ServiceSpec) -> Result<Service> {
    let mut description = ServiceDescription::new();
    description.add(Container::new(spec.container.clone()))?;
    if let Some(mesh) = &spec.mesh {
        let mut mesh = mesh.clone();
        if mesh.port == 0 {
            mesh.port = spec.container.traffic_port;
        }
        description.add(ConsulMeshExtension::new(mesh)?)?;
    }

    let mut props = ServiceProps::new(spec.environment.as_str(), description);
    props.security_groups = spec.security_groups.clone();
    props.desired_count = spec.desired_count;
    Ok(Service::new(stack, spec.id.as_str(), props)?)
}
