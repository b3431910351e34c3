//! Pairwise service connections
//!
//! `source.connect_to(target)` validates everything first, then grants the
//! source ingress to the target's proxy, records the upstream, rewrites the
//! mesh-init command and forwards a `<NAME>_URL` variable to the app
//! container. A rejected connection changes nothing.

use ecsmesh_common::container::APP_CONTAINER_NAME;
use ecsmesh_common::extension::ConnectContext;
use ecsmesh_common::network::Port;
use ecsmesh_common::task::KeyValuePair;
use ecsmesh_common::{Error, Result};
use tracing::info;

use crate::command::build_init_command;
use crate::config::MeshConfig;
use crate::extension::ConsulMeshExtension;
use crate::mesh::{INIT_CONTAINER, MESH_EXTENSION, PROXY_PORT};
use crate::upstream::UpstreamRegistry;
use crate::validate;

/// Per-service connection state; grows with every successful `connect`
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionState {
    upstreams: UpstreamRegistry,
    forwarded_environment: Option<Vec<KeyValuePair>>,
}

impl ConnectionState {
    /// No connections yet; `upstreams` carries the task's reserved ports
    pub(crate) fn new(upstreams: UpstreamRegistry) -> Self {
        Self {
            upstreams,
            forwarded_environment: None,
        }
    }

    /// Declared upstreams
    pub fn upstreams(&self) -> &UpstreamRegistry {
        &self.upstreams
    }

    /// Environment written to the app container, once any connection exists
    pub fn forwarded_environment(&self) -> Option<&[KeyValuePair]> {
        self.forwarded_environment.as_deref()
    }
}

/// Name of the variable carrying an upstream's local URL
pub fn upstream_env_name(service_name: &str) -> String {
    format!("{}_URL", service_name.to_uppercase())
}

/// Connect the service described by `config` to `ctx.target`
///
/// `primary_environment` is the app container's declared environment as
/// captured while the service was built.
pub fn resolve_connection(
    config: &MeshConfig,
    state: &mut ConnectionState,
    primary_environment: &[KeyValuePair],
    ctx: ConnectContext<'_>,
) -> Result<()> {
    let target_mesh = ctx
        .target
        .description()
        .get_as::<ConsulMeshExtension>(MESH_EXTENSION)
        .ok_or_else(|| Error::missing_extension(ctx.target.id(), MESH_EXTENSION))?;
    let target = target_mesh.config().ok_or_else(|| {
        Error::uninitialized(
            "connect_to_service",
            format!("mesh extension of {} was never built", ctx.target.id()),
        )
    })?;

    validate::same_environment(
        &ctx.source.id,
        &ctx.source.environment_id,
        ctx.target.id(),
        &target.environment_id,
    )?;
    validate::security_group_ceiling(&ctx.source.id, ctx.source_security_groups.len())?;

    if ctx.task_definition.container(INIT_CONTAINER).is_none()
        || ctx.task_definition.container(APP_CONTAINER_NAME).is_none()
    {
        return Err(Error::uninitialized(
            "connect_to_service",
            format!("sidecars of {} have not been created", ctx.source.id),
        ));
    }
    let target_group = ctx
        .target
        .ecs_service()
        .own_security_group()
        .ok_or_else(|| Error::uninitialized("connect_to_service", "target service has no security group"))?;
    let source_group = ctx
        .source_security_groups
        .first()
        .ok_or_else(|| Error::uninitialized("connect_to_service", "source service has no security group"))?;

    let reservation = state
        .upstreams
        .reserve(&ctx.source.id, &target.service_name, ctx.options.local_bind_port)?;
    let port = reservation.port();
    let mut upstreams = state.upstreams.clone();
    upstreams.commit(reservation);
    let init_command = build_init_command(config, &upstreams)?;

    let mut environment = state
        .forwarded_environment
        .clone()
        .unwrap_or_else(|| primary_environment.to_vec());
    environment.push(KeyValuePair::new(
        upstream_env_name(&target.service_name),
        format!("http://localhost:{port}"),
    ));

    // only fallible mutation; runs first
    ctx.network.allow_from(
        target_group,
        source_group,
        Port::tcp(PROXY_PORT),
        format!("Accept inbound traffic from {}", ctx.source.id),
    )?;
    if let Some(init) = ctx.task_definition.container_mut(INIT_CONTAINER) {
        init.command = Some(init_command);
    }
    if let Some(app) = ctx.task_definition.container_mut(APP_CONTAINER_NAME) {
        app.environment = environment.clone();
    }
    state.upstreams = upstreams;
    state.forwarded_environment = Some(environment);

    info!(
        source = %ctx.source.id,
        target = %ctx.target.id(),
        upstream = %target.service_name,
        port,
        "connected mesh services"
    );
    Ok(())
}
