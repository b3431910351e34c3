//! Integration tests for the ecsmesh commands
//!
//! Manifests are written to temporary directories and run through the same
//! entry points the binary uses.

use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use ecsmesh_cli::commands::synth::{self, SynthArgs};
use ecsmesh_cli::commands::validate::{self, ValidateArgs};
use ecsmesh_cli::manifest::Manifest;
use ecsmesh_cli::{Cli, Error};
use tempfile::TempDir;

// =============================================================================
// Test Fixtures
// =============================================================================

fn demo_manifest() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../demos/greeter.yaml")
}

fn write_manifest(dir: &TempDir, contents: &str) -> PathBuf {
    let path = dir.path().join("mesh.yaml");
    fs::write(&path, contents).unwrap();
    path
}

const CROSS_ENVIRONMENT: &str = r#"
name: split
region: us-west-2
environments: [production, development]
securityGroups:
  - id: consul-server
  - id: consul-client
services:
  - id: name
    environment: development
    container: { image: nathanpeck/name, cpu: 256, memoryMib: 512, trafficPort: 3000 }
    mesh:
      retryJoin: "provider=aws tag_key=Name tag_value=consul-server"
      serverSecurityGroup: consul-server
      clientSecurityGroup: consul-client
  - id: greeter
    environment: production
    container: { image: nathanpeck/greeter, cpu: 256, memoryMib: 512, trafficPort: 3000 }
    mesh:
      retryJoin: "provider=aws tag_key=Name tag_value=consul-server"
      serverSecurityGroup: consul-server
      clientSecurityGroup: consul-client
connections:
  - { from: greeter, to: name }
"#;

// =============================================================================
// Story: synthesizing the demo manifest
// =============================================================================

#[test]
fn story_synth_writes_document() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("out.json");

    synth::run(SynthArgs {
        file: demo_manifest(),
        output: Some(output.clone()),
    })
    .unwrap();

    let doc: serde_json::Value = serde_json::from_str(&fs::read_to_string(&output).unwrap()).unwrap();
    let resources = doc["Resources"].as_object().unwrap();
    assert_eq!(resources["ProductionCluster"]["Type"], "AWS::ECS::Cluster");
    assert_eq!(resources["GreeterService"]["Properties"]["DesiredCount"], 2);

    let containers = resources["GreeterTaskDefinition"]["Properties"]["ContainerDefinitions"]
        .as_array()
        .unwrap();
    let init = containers
        .iter()
        .find(|c| c["Name"] == "consul-ecs-mesh-init")
        .unwrap();
    assert!(init["Command"]
        .as_array()
        .unwrap()
        .iter()
        .any(|arg| arg == "-upstreams=name:8080,greeting:3001"));

    let app = &containers[0];
    assert_eq!(app["Environment"][0]["Name"], "NAME_URL");
    assert_eq!(app["Environment"][1]["Value"], "http://localhost:3001");

    let greeting = resources["GreetingTaskDefinition"]["Properties"]["ContainerDefinitions"]
        .as_array()
        .unwrap();
    assert!(greeting.iter().any(|c| c["Name"] == "consul-ecs-health-sync"));
}

#[test]
fn story_synth_is_reproducible() {
    let args = || SynthArgs {
        file: demo_manifest(),
        output: None,
    };
    assert_eq!(synth::render(&args()).unwrap(), synth::render(&args()).unwrap());
}

#[test]
fn story_validate_accepts_demo() {
    validate::run(ValidateArgs { file: demo_manifest() }).unwrap();
}

// =============================================================================
// Story: broken manifests fail with a useful error
// =============================================================================

#[test]
fn story_cross_environment_manifest_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write_manifest(&dir, CROSS_ENVIRONMENT);

    let err = validate::run(ValidateArgs { file: path }).unwrap_err();
    assert!(matches!(
        err,
        Error::Build(ecsmesh_common::Error::CrossEnvironmentConnection { .. })
    ));
}

#[test]
fn story_missing_manifest_reported_with_path() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("absent.yaml");

    let err = Manifest::load(&path).unwrap_err();
    assert!(matches!(err, Error::ReadManifest { .. }));
    assert!(err.to_string().contains("absent.yaml"));
}

#[test]
fn story_malformed_yaml_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write_manifest(&dir, "name: [unclosed\n");

    let err = Manifest::load(&path).unwrap_err();
    assert!(err.to_string().contains("invalid YAML"));
}

#[test]
fn test_cli_parses_synth_invocation() {
    let cli = Cli::try_parse_from(["ecsmesh", "--log-format", "json", "synth", "--file", "demos/greeter.yaml"]).unwrap();
    assert_eq!(cli.log_format, ecsmesh_cli::LogFormatArg::Json);
}
