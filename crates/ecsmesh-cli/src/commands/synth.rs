//! Synth command

use std::path::PathBuf;

use clap::Args;
use tracing::info;

use crate::manifest::Manifest;
use crate::Result;

#[derive(Args, Debug)]
pub struct SynthArgs {
    /// Manifest to build
    #[arg(short, long, env = "ECSMESH_MANIFEST")]
    pub file: PathBuf,

    /// Write the document here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

pub fn run(args: SynthArgs) -> Result<()> {
    let json = render(&args)?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, &json)?;
            info!(path = %path.display(), "wrote deployment document");
        }
        None => println!("{json}"),
    }
    Ok(())
}

/// Build the manifest and render the document as pretty JSON
pub fn render(args: &SynthArgs) -> Result<String> {
    let deployment = Manifest::load(&args.file)?.build()?;
    Ok(deployment.synth()?.to_json_pretty()?)
}
