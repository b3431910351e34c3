//! ecsmesh CLI
//!
//! Builds Consul-meshed ECS services from a YAML manifest.

use clap::Parser;

use ecsmesh_cli::{Cli, Result};
use ecsmesh_common::telemetry::{init_telemetry, TelemetryConfig};

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_telemetry(TelemetryConfig {
        format: cli.log_format.into(),
        ..Default::default()
    })?;

    cli.run()
}
