//! Checks that abort a build before anything is mutated

use ecsmesh_common::{Error, Result};

use crate::config::{ConsulMeshProps, HealthCheckMode};
use crate::mesh::{MAX_SECURITY_GROUPS, MESH_EXTENSION};

/// Decide the health-check mode, rejecting ambiguous or incomplete props
///
/// ECS-native checks together with mesh-native checks is a conflict.
/// ECS-native checks need an ACL token for health-sync.
pub fn health_check_mode(props: &ConsulMeshProps) -> Result<HealthCheckMode> {
    let label = props.service_discovery_name.as_deref().unwrap_or(MESH_EXTENSION);

    match (&props.health_check, props.consul_checks.is_empty()) {
        (Some(_), false) => Err(Error::configuration_conflict(
            label,
            "Cannot define both Consul Native Checks and ECS Health Checks",
        )),
        (Some(check), true) => {
            if props.acl_secret_arn.is_none() {
                return Err(Error::missing_credential(
                    label,
                    "aclSecretArn (ACL token for the health-sync container)",
                ));
            }
            Ok(HealthCheckMode::EcsNative(check.clone()))
        }
        (None, false) => Ok(HealthCheckMode::MeshNative(props.consul_checks.clone())),
        (None, true) => Ok(HealthCheckMode::None),
    }
}

/// Fail when a service would carry more than the allowed security groups
pub fn security_group_ceiling(service: &str, requested: usize) -> Result<()> {
    if requested > MAX_SECURITY_GROUPS {
        return Err(Error::resource_limit(
            service,
            "security groups",
            MAX_SECURITY_GROUPS,
            requested,
        ));
    }
    Ok(())
}

/// Fail when two services live in different environments
pub fn same_environment(
    source_service: &str,
    source_environment: &str,
    target_service: &str,
    target_environment: &str,
) -> Result<()> {
    if source_environment != target_environment {
        return Err(Error::CrossEnvironmentConnection {
            source_service: source_service.to_string(),
            source_environment: source_environment.to_string(),
            target_service: target_service.to_string(),
            target_environment: target_environment.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use ecsmesh_common::network::SecurityGroupId;
    use ecsmesh_common::task::HealthCheck;

    use super::*;
    use crate::config::{ConsulCheck, RetryJoin};

    fn props() -> ConsulMeshProps {
        let mut props = ConsulMeshProps::new(
            RetryJoin::Raw("provider=aws".to_string()),
            SecurityGroupId::new("consul-server"),
            SecurityGroupId::new("consul-client"),
        );
        props.service_discovery_name = Some("name".to_string());
        props
    }

    fn check() -> ConsulCheck {
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

    fn ecs_check() -> HealthCheck {
        HealthCheck::new(vec!["CMD-SHELL".to_string(), "curl localhost:3000/health".to_string()])
    }

    // =========================================================================
    // Story: health checks have exactly one owner
    // =========================================================================

    #[test]
    fn story_both_check_styles_conflict() {
        let mut props = props();
        props.health_check = Some(ecs_check());
        props.consul_checks = vec![check()];
        props.acl_secret_arn = Some("arn".to_string());

        let err = health_check_mode(&props).unwrap_err();
        assert!(matches!(err, Error::ConfigurationConflict { .. }));
        assert!(err
            .to_string()
            .contains("Cannot define both Consul Native Checks and ECS Health Checks"));
    }

    #[test]
    fn story_conflict_reported_before_missing_credential() {
        let mut props = props();
        props.health_check = Some(ecs_check());
        props.consul_checks = vec![check()];
        assert!(matches!(
            health_check_mode(&props),
            Err(Error::ConfigurationConflict { .. })
        ));
    }

    #[test]
    fn story_ecs_checks_need_acl_token() {
        let mut props = props();
        props.health_check = Some(ecs_check());
        let err = health_check_mode(&props).unwrap_err();
        assert!(matches!(err, Error::MissingCredential { .. }));
        assert_eq!(err.service(), Some("name"));
    }

    #[test]
    fn story_modes_resolve() {
        let mut props = props();
        assert_eq!(health_check_mode(&props).unwrap(), HealthCheckMode::None);

        props.consul_checks = vec![check()];
        assert_eq!(
            health_check_mode(&props).unwrap(),
            HealthCheckMode::MeshNative(vec![check()])
        );

        props.consul_checks.clear();
        props.health_check = Some(ecs_check());
        props.acl_secret_arn = Some("arn".to_string());
        assert!(health_check_mode(&props).unwrap().is_ecs_native());
    }

    #[test]
    fn test_ceiling() {
        assert!(security_group_ceiling("api", 5).is_ok());
        let err = security_group_ceiling("api", 6).unwrap_err();
        assert!(err
            .to_string()
            .contains("Cannot have more than 5 security groups"));
    }

    #[test]
    fn test_same_environment() {
        assert!(same_environment("a", "prod", "b", "prod").is_ok());
        let err = same_environment("a", "prod", "b", "dev").unwrap_err();
        assert!(err
            .to_string()
            .starts_with("Unable to connect services from different environments"));
    }
}
