//! Consul service mesh for ecsmesh services
//!
//! [`ConsulMeshExtension`] joins a service to the mesh: it adds the agent,
//! mesh-init and Envoy sidecars to the task, wires security groups to the
//! Consul servers and, on `connect_to`, declares upstreams and forwards
//! their local URLs to the application.

#![deny(missing_docs)]

pub mod command;
pub mod config;
pub mod connect;
pub mod extension;
pub mod mesh;
pub mod topology;
pub mod upstream;
pub mod validate;

pub use config::{ConsulCheck, ConsulMeshProps, HealthCheckMode, MeshConfig, RetryJoin};
pub use extension::ConsulMeshExtension;
pub use upstream::{Upstream, UpstreamRegistry};
