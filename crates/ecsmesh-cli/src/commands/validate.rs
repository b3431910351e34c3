//! Validate command

use std::path::PathBuf;

use clap::Args;

use crate::manifest::Manifest;
use crate::Result;

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Manifest to check
    #[arg(short, long, env = "ECSMESH_MANIFEST")]
    pub file: PathBuf,
}

pub fn run(args: ValidateArgs) -> Result<()> {
    let manifest = Manifest::load(&args.file)?;
    let deployment = manifest.build()?;

    for service in deployment.services() {
        println!(
            "  {} valid ({} containers)",
            service.id(),
            service.task_definition().container_definitions.len()
        );
    }
    println!();
    println!(
        "All validations passed: {} services, {} connections",
        deployment.services().len(),
        manifest.connections.len()
    );
    Ok(())
}
