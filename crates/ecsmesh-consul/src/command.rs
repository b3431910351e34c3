//! Sidecar command lines
//!
//! Pure functions of the resolved config and upstream registry. The init
//! command is regenerated in full whenever the upstream list changes.

use ecsmesh_common::container::APP_CONTAINER_NAME;
use ecsmesh_common::Result;

use crate::config::{HealthCheckMode, MeshConfig};
use crate::mesh::{BINARY_INJECT_DIR, CA_CERT_PATH, DATA_DIR, GRPC_PORT};
use crate::upstream::UpstreamRegistry;

/// Agent startup script, run under `/bin/sh -ec`
///
/// The agent copies its own binary into the shared volume, resolves the task
/// IP from the metadata endpoint at container start, then execs the agent.
/// Secret references are emitted unresolved.
pub fn build_agent_command(config: &MeshConfig) -> String {
    let ca_cert = config
        .tls
        .ca_cert
        .as_ref()
        .map(|secret| secret.dynamic_reference())
        .unwrap_or_default();

    let mut parts = vec![
        format!("cp /bin/consul {BINARY_INJECT_DIR}/consul &&"),
        "ECS_IPV4=$(curl -s $ECS_CONTAINER_METADATA_URI | jq -r '.Networks[0].IPv4Addresses[0]') &&".to_string(),
        format!(
            "if [ {} == true ]; then echo \"{ca_cert}\" > {CA_CERT_PATH}; fi &&",
            config.tls.enabled
        ),
        "exec consul agent".to_string(),
        "-advertise $ECS_IPV4".to_string(),
        format!("-data-dir {DATA_DIR}"),
        "-client 0.0.0.0".to_string(),
        format!("-datacenter \"{}\"", config.datacenter),
        "-hcl 'addresses = { dns = \"127.0.0.1\" }'".to_string(),
        "-hcl 'addresses = { grpc = \"127.0.0.1\" }'".to_string(),
        "-hcl 'addresses = { http = \"127.0.0.1\" }'".to_string(),
        format!("-retry-join \"{}\"", config.retry_join),
        "-hcl 'telemetry { disable_compat_1.9 = true }'".to_string(),
        "-hcl 'leave_on_terminate = true'".to_string(),
        format!("-hcl 'ports {{ grpc = {GRPC_PORT} }}'"),
        "-hcl 'advertise_reconnect_timeout = \"15m\"'".to_string(),
        "-hcl 'enable_central_service_config = true'".to_string(),
    ];

    if config.tls.enabled {
        parts.push(format!("-hcl 'ca_file = \"{CA_CERT_PATH}\"'"));
        parts.push("-hcl 'auto_encrypt = {tls = true}'".to_string());
        parts.push("-hcl \"auto_encrypt = {ip_san = [ \\\"$ECS_IPV4\\\" ]}\"".to_string());
        parts.push("-hcl 'verify_outgoing = true'".to_string());
    }

    if let Some(key) = &config.gossip_key {
        parts.push(format!("-encrypt \"{}\"", key.dynamic_reference()));
    }

    parts.join(" ")
}

/// Containers whose ECS health health-sync mirrors
fn health_sync_containers(config: &MeshConfig) -> &'static str {
    if config.health_check_mode.is_ecs_native() {
        APP_CONTAINER_NAME
    } else {
        ""
    }
}

/// mesh-init argument list
///
/// `-checks` carries the mesh-native checks as a JSON array, or nothing when
/// the service has none.
pub fn build_init_command(config: &MeshConfig, upstreams: &UpstreamRegistry) -> Result<Vec<String>> {
    let checks = match &config.health_check_mode {
        HealthCheckMode::MeshNative(checks) => serde_json::to_string(checks)?,
        HealthCheckMode::None | HealthCheckMode::EcsNative(_) => String::new(),
    };

    Ok(vec![
        "mesh-init".to_string(),
        format!("-envoy-bootstrap-dir={DATA_DIR}"),
        format!("-port={}", config.port),
        format!("-upstreams={}", upstreams.flag_value()),
        format!("-health-sync-containers={}", health_sync_containers(config)),
        format!("-checks={checks}"),
        format!("-service-name={}", config.service_name),
    ])
}

/// health-sync argument list
pub fn build_health_sync_command(config: &MeshConfig) -> Vec<String> {
    vec![
        "health-sync".to_string(),
        format!("-health-sync-containers={}", health_sync_containers(config)),
        format!("-service-name={}", config.service_name),
    ]
}

#[cfg(test)]
mod tests {
    use ecsmesh_common::extension::ServiceInfo;
    use ecsmesh_common::network::SecurityGroupId;
    use ecsmesh_common::secret::SecretRef;
    use ecsmesh_common::task::HealthCheck;

    use super::*;
    use crate::config::{ConsulCheck, ConsulMeshProps, RetryJoin};

    fn config(mode: HealthCheckMode) -> MeshConfig {
        let mut props = ConsulMeshProps::new(
            RetryJoin::CloudAutoJoin {
                region: "us-west-2".to_string(),
                tag_name: "Name".to_string(),
                tag_value: "test-consul-server".to_string(),
            },
            SecurityGroupId::new("consul-server"),
            SecurityGroupId::new("consul-client"),
        );
        props.port = 3000;
        props.service_discovery_name = Some("greeter".to_string());
        MeshConfig::resolve(
            &props,
            mode,
            &ServiceInfo {
                id: "greeter".to_string(),
                environment_id: "production".to_string(),
                region: "us-west-2".to_string(),
            },
        )
    }

    fn registry(entries: &[(&str, Option<u16>)]) -> UpstreamRegistry {
        let mut registry = UpstreamRegistry::new();
        for (name, port) in entries {
            let r = registry.reserve("greeter", name, *port).unwrap();
            registry.commit(r);
        }
        registry
    }

    fn http_check() -> ConsulCheck {
        ConsulCheck {
            checkid: "server-http".to_string(),
            name: "HTTP health check on port 3000".to_string(),
            http: Some("http://localhost:3000/health".to_string()),
            tcp: None,
            method: Some("GET".to_string()),
            timeout: Some("10s".to_string()),
            interval: Some("2s".to_string()),
        }
    }

    // =========================================================================
    // Story: the agent script
    // =========================================================================

    #[test]
    fn story_agent_command_without_tls() {
        let cmd = build_agent_command(&config(HealthCheckMode::None));
        assert!(cmd.starts_with("cp /bin/consul /bin/consul-inject/consul && ECS_IPV4=$(curl -s $ECS_CONTAINER_METADATA_URI"));
        assert!(cmd.contains("if [ false == true ]; then echo \"\" > /tmp/consul-agent-ca-cert.pem; fi &&"));
        assert!(cmd.contains("-datacenter \"dc1\""));
        assert!(cmd.contains(
            "-retry-join \"provider=aws region=us-west-2 tag_key=Name tag_value=test-consul-server\""
        ));
        assert!(cmd.ends_with("-hcl 'enable_central_service_config = true'"));
        assert!(!cmd.contains("auto_encrypt"));
        assert!(!cmd.contains("-encrypt"));
    }

    #[test]
    fn story_agent_command_with_tls_and_gossip() {
        let mut config = config(HealthCheckMode::None);
        config.tls.enabled = true;
        config.tls.ca_cert = Some(SecretRef::new("TLSEncryptValue"));
        config.gossip_key = Some(SecretRef::new("gossipEncryptValue"));

        let cmd = build_agent_command(&config);
        assert!(cmd.contains(
            "if [ true == true ]; then echo \"{{resolve:secretsmanager:TLSEncryptValue:SecretString:::}}\" > /tmp/consul-agent-ca-cert.pem; fi"
        ));
        assert!(cmd.contains(
            "-hcl 'enable_central_service_config = true' -hcl 'ca_file = \"/tmp/consul-agent-ca-cert.pem\"' -hcl 'auto_encrypt = {tls = true}' -hcl \"auto_encrypt = {ip_san = [ \\\"$ECS_IPV4\\\" ]}\" -hcl 'verify_outgoing = true'"
        ));
        assert!(cmd.ends_with("-encrypt \"{{resolve:secretsmanager:gossipEncryptValue:SecretString:::}}\""));
    }

    #[test]
    fn test_agent_addresses_bound_to_loopback() {
        let cmd = build_agent_command(&config(HealthCheckMode::None));
        for service in ["dns", "grpc", "http"] {
            assert!(cmd.contains(&format!("-hcl 'addresses = {{ {service} = \"127.0.0.1\" }}'")));
        }
        assert!(cmd.contains("-hcl 'ports { grpc = 8502 }'"));
    }

    // =========================================================================
    // Story: the init command
    // =========================================================================

    #[test]
    fn story_init_command_with_mesh_checks() {
        let cmd = build_init_command(
            &config(HealthCheckMode::MeshNative(vec![http_check()])),
            &registry(&[("name", Some(8080))]),
        )
        .unwrap();
        assert_eq!(
            cmd,
            vec![
                "mesh-init",
                "-envoy-bootstrap-dir=/consul/data",
                "-port=3000",
                "-upstreams=name:8080",
                "-health-sync-containers=",
                "-checks=[{\"checkid\":\"server-http\",\"name\":\"HTTP health check on port 3000\",\"http\":\"http://localhost:3000/health\",\"method\":\"GET\",\"timeout\":\"10s\",\"interval\":\"2s\"}]",
                "-service-name=greeter",
            ]
        );
    }

    #[test]
    fn story_init_command_with_ecs_checks() {
        let check = HealthCheck::new(vec!["CMD-SHELL".to_string(), "curl localhost:3000/health".to_string()]);
        let cmd = build_init_command(&config(HealthCheckMode::EcsNative(check)), &UpstreamRegistry::new()).unwrap();
        assert_eq!(cmd[3], "-upstreams=");
        assert_eq!(cmd[4], "-health-sync-containers=app");
        assert_eq!(cmd[5], "-checks=");
    }

    #[test]
    fn story_upstreams_in_declaration_order() {
        let cmd = build_init_command(
            &config(HealthCheckMode::None),
            &registry(&[("name", None), ("greeting", None)]),
        )
        .unwrap();
        assert_eq!(cmd[3], "-upstreams=name:3001,greeting:3002");
    }

    #[test]
    fn test_health_sync_command() {
        let check = HealthCheck::new(vec!["CMD".to_string(), "true".to_string()]);
        assert_eq!(
            build_health_sync_command(&config(HealthCheckMode::EcsNative(check))),
            vec!["health-sync", "-health-sync-containers=app", "-service-name=greeter"]
        );
    }
}
