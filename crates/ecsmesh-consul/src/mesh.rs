//! Consul mesh constants
//!
//! Single source of truth for the container names, volumes, ports and
//! defaults the sidecar topology is built from. Other tooling (mesh-init,
//! health-sync) finds containers by these names, so they are fixed.

// =============================================================================
// Extension
// =============================================================================

/// Registry key of the mesh extension in a service description
pub const MESH_EXTENSION: &str = "consul";

// =============================================================================
// Containers
// =============================================================================

/// Mesh agent container
pub const AGENT_CONTAINER: &str = "consul-client";

/// Init helper container; writes the proxy bootstrap and registers the service
pub const INIT_CONTAINER: &str = "consul-ecs-mesh-init";

/// mesh-init writes `consul-ecs` into the shared data volume for the proxy
/// entrypoint, which needs root
pub const INIT_USER: &str = "root";

/// Envoy proxy container
pub const PROXY_CONTAINER: &str = "sidecar-proxy";

/// Health-sync container; mirrors ECS health into the mesh catalog
pub const HEALTH_SYNC_CONTAINER: &str = "consul-ecs-health-sync";

/// Log stream prefix for the proxy
pub const PROXY_LOG_PREFIX: &str = "envoy";

/// Memory limit shared by every sidecar
pub const SIDECAR_MEMORY_MIB: u32 = 256;

/// Open-file limit for the proxy
pub const PROXY_NOFILE_LIMIT: u64 = 1_048_576;

// =============================================================================
// Volumes
// =============================================================================

/// Agent data dir, shared with mesh-init and the proxy
pub const DATA_VOLUME: &str = "consul-data";

/// Agent config dir
pub const CONFIG_VOLUME: &str = "consul-config";

/// Volume the agent copies its binary into for mesh-init
pub const BINARY_VOLUME: &str = "consul_binary";

/// Mount path of [`DATA_VOLUME`]
pub const DATA_DIR: &str = "/consul/data";

/// Mount path of [`CONFIG_VOLUME`]
pub const CONFIG_DIR: &str = "/consul/config";

/// Mount path of [`BINARY_VOLUME`]
pub const BINARY_INJECT_DIR: &str = "/bin/consul-inject";

/// Where the agent writes the CA certificate when TLS is enabled
pub const CA_CERT_PATH: &str = "/tmp/consul-agent-ca-cert.pem";

// =============================================================================
// Ports
// =============================================================================

/// Proxy public listener; peers connect here
pub const PROXY_PORT: u16 = 20000;

/// Serf LAN gossip (tcp and udp)
pub const SERF_LAN_PORT: u16 = 8301;

/// Server RPC
pub const SERVER_RPC_PORT: u16 = 8300;

/// Agent HTTP API
pub const HTTP_PORT: u16 = 8500;

/// Agent gRPC, used by the proxy for xDS
pub const GRPC_PORT: u16 = 8502;

/// Agent DNS
pub const DNS_PORT: u16 = 8600;

/// Ports the sidecars bind inside the task network namespace
pub const SIDECAR_PORTS: [u16; 5] = [PROXY_PORT, SERF_LAN_PORT, HTTP_PORT, GRPC_PORT, DNS_PORT];

/// First local port handed out to upstreams
pub const BASE_UPSTREAM_PORT: u16 = 3001;

// =============================================================================
// Limits and defaults
// =============================================================================

/// Security groups allowed on one service
pub const MAX_SECURITY_GROUPS: usize = 5;

/// Default agent image
pub const DEFAULT_AGENT_IMAGE: &str = "hashicorp/consul:1.10.4";

/// Default proxy image
pub const DEFAULT_PROXY_IMAGE: &str = "envoyproxy/envoy-alpine:v1.18.4";

/// Default mesh-init / health-sync image
pub const DEFAULT_INIT_IMAGE: &str = "hashicorp/consul-ecs:0.2.0";

/// Default datacenter
pub const DEFAULT_DATACENTER: &str = "dc1";

/// Env var carrying the ACL token into health-sync
pub const ACL_TOKEN_ENV: &str = "CONSUL_HTTP_TOKEN";
