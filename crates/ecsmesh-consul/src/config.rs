//! Mesh extension props and the resolved per-service configuration

use std::fmt;

use ecsmesh_common::extension::ServiceInfo;
use ecsmesh_common::network::SecurityGroupId;
use ecsmesh_common::secret::SecretRef;
use ecsmesh_common::task::HealthCheck;
use serde::{Deserialize, Serialize};

use crate::mesh::{DEFAULT_AGENT_IMAGE, DEFAULT_DATACENTER, DEFAULT_INIT_IMAGE, DEFAULT_PROXY_IMAGE};

/// How the agent finds the servers
///
/// Rendered verbatim into `-retry-join "<expr>"`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum RetryJoin {
    /// Raw expression, passed through unchanged
    Raw(String),
    /// Cloud auto-join on EC2 instance tags
    #[serde(rename_all = "camelCase")]
    CloudAutoJoin {
        /// Region to search
        region: String,
        /// Tag key
        tag_name: String,
        /// Tag value
        tag_value: String,
    },
}

impl fmt::Display for RetryJoin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryJoin::Raw(expr) => f.write_str(expr),
            RetryJoin::CloudAutoJoin {
                region,
                tag_name,
                tag_value,
            } => write!(
                f,
                "provider=aws region={region} tag_key={tag_name} tag_value={tag_value}"
            ),
        }
    }
}

/// Mesh-native check definition
///
/// Field order is the order the checks JSON is rendered in.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConsulCheck {
    /// Check id
    pub checkid: String,
    /// Display name
    pub name: String,
    /// HTTP endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<String>,
    /// TCP address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp: Option<String>,
    /// HTTP method
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Timeout, e.g. `10s`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    /// Interval, e.g. `2s`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
}

/// Which system owns health checking for the service
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HealthCheckMode {
    /// No checks
    None,
    /// ECS runs the check on the app container; health-sync mirrors it
    EcsNative(HealthCheck),
    /// The agent runs these checks itself
    MeshNative(Vec<ConsulCheck>),
}

impl HealthCheckMode {
    /// Whether health-sync is deployed
    pub fn is_ecs_native(&self) -> bool {
        matches!(self, HealthCheckMode::EcsNative(_))
    }
}

/// Settings for the mesh extension
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConsulMeshProps {
    /// Server discovery
    pub retry_join: RetryJoin,
    /// Security group of the Consul servers
    pub server_security_group: SecurityGroupId,
    /// Security group shared by every mesh client
    pub client_security_group: SecurityGroupId,
    /// Port the application listens on
    #[serde(default)]
    pub port: u16,
    /// Agent image override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_image: Option<String>,
    /// Proxy image override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_image: Option<String>,
    /// mesh-init / health-sync image override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init_image: Option<String>,
    /// Enable agent TLS
    #[serde(default)]
    pub tls: bool,
    /// CA certificate secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert: Option<SecretRef>,
    /// Gossip encryption key secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gossip_key: Option<SecretRef>,
    /// ECS-native health check for the app container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheck>,
    /// Mesh-native checks
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub consul_checks: Vec<ConsulCheck>,
    /// Name registered in the catalog; defaults to the service id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_discovery_name: Option<String>,
    /// ACL token secret for health-sync
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acl_secret_arn: Option<String>,
    /// Datacenter; defaults to `dc1`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datacenter: Option<String>,
    /// Task definition family override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,
}

impl ConsulMeshProps {
    /// Props with defaults for everything but the required fields
    pub fn new(
        retry_join: RetryJoin,
        server_security_group: SecurityGroupId,
        client_security_group: SecurityGroupId,
    ) -> Self {
        Self {
            retry_join,
            server_security_group,
            client_security_group,
            port: 0,
            agent_image: None,
            proxy_image: None,
            init_image: None,
            tls: false,
            ca_cert: None,
            gossip_key: None,
            health_check: None,
            consul_checks: Vec::new(),
            service_discovery_name: None,
            acl_secret_arn: None,
            datacenter: None,
            family: None,
        }
    }
}

/// Sidecar images
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Images {
    /// Agent
    pub agent: String,
    /// Proxy
    pub proxy: String,
    /// mesh-init and health-sync
    pub init_helper: String,
}

/// Agent TLS settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tls {
    /// Whether TLS flags are emitted
    pub enabled: bool,
    /// CA certificate secret
    pub ca_cert: Option<SecretRef>,
}

/// Fully resolved configuration for one mesh-enrolled service
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MeshConfig {
    /// Owning service id
    pub service_id: String,
    /// Catalog name
    pub service_name: String,
    /// Environment of the owning service
    pub environment_id: String,
    /// Stack region
    pub region: String,
    /// Application port
    pub port: u16,
    /// Sidecar images
    pub images: Images,
    /// Consul server group
    pub server_security_group: SecurityGroupId,
    /// Mesh client group
    pub client_security_group: SecurityGroupId,
    /// TLS
    pub tls: Tls,
    /// Gossip key
    pub gossip_key: Option<SecretRef>,
    /// ACL token secret
    pub acl_secret_arn: Option<String>,
    /// Datacenter
    pub datacenter: String,
    /// Server discovery
    pub retry_join: RetryJoin,
    /// Health check ownership
    pub health_check_mode: HealthCheckMode,
}

impl MeshConfig {
    /// Resolve validated props against the service they are attached to
    pub fn resolve(props: &ConsulMeshProps, mode: HealthCheckMode, service: &ServiceInfo) -> Self {
        Self {
            service_id: service.id.clone(),
            service_name: props
                .service_discovery_name
                .clone()
                .unwrap_or_else(|| service.id.clone()),
            environment_id: service.environment_id.clone(),
            region: service.region.clone(),
            port: props.port,
            images: Images {
                agent: props
                    .agent_image
                    .clone()
                    .unwrap_or_else(|| DEFAULT_AGENT_IMAGE.to_string()),
                proxy: props
                    .proxy_image
                    .clone()
                    .unwrap_or_else(|| DEFAULT_PROXY_IMAGE.to_string()),
                init_helper: props
                    .init_image
                    .clone()
                    .unwrap_or_else(|| DEFAULT_INIT_IMAGE.to_string()),
            },
            server_security_group: props.server_security_group.clone(),
            client_security_group: props.client_security_group.clone(),
            tls: Tls {
                enabled: props.tls,
                ca_cert: props.ca_cert.clone(),
            },
            gossip_key: props.gossip_key.clone(),
            acl_secret_arn: props.acl_secret_arn.clone(),
            datacenter: props
                .datacenter
                .clone()
                .unwrap_or_else(|| DEFAULT_DATACENTER.to_string()),
            retry_join: props.retry_join.clone(),
            health_check_mode: mode,
        }
    }
}
