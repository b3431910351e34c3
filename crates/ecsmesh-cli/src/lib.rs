//! ecsmesh CLI library

pub mod commands;
pub mod error;
pub mod manifest;

pub use error::{Error, Result};

use clap::{Parser, Subcommand, ValueEnum};
use ecsmesh_common::telemetry::LogFormat;

/// ecsmesh - Consul service mesh for ECS services
#[derive(Parser, Debug)]
#[command(name = "ecsmesh")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Log output format
    #[arg(long, global = true, env = "ECSMESH_LOG_FORMAT", value_enum, default_value_t = LogFormatArg::Text)]
    pub log_format: LogFormatArg,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build a manifest and print the deployment document
    Synth(commands::synth::SynthArgs),
    /// Build a manifest and report whether it is valid
    Validate(commands::validate::ValidateArgs),
}

/// `--log-format` values
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    Text,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Text => LogFormat::Text,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

impl Cli {
    /// Run the CLI command
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Synth(args) => commands::synth::run(args),
            Commands::Validate(args) => commands::validate::run(args),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synth_args_parse() {
        let cli = Cli::try_parse_from(["ecsmesh", "synth", "-f", "mesh.yaml", "-o", "out.json"]).unwrap();
        assert_eq!(cli.log_format, LogFormatArg::Text);
        match cli.command {
            Commands::Synth(args) => {
                assert_eq!(args.file.to_str(), Some("mesh.yaml"));
                assert_eq!(args.output.as_deref().and_then(|p| p.to_str()), Some("out.json"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_global_log_format_flag() {
        let cli = Cli::try_parse_from(["ecsmesh", "validate", "-f", "mesh.yaml", "--log-format", "json"]).unwrap();
        assert_eq!(LogFormat::from(cli.log_format), LogFormat::Json);
    }

    #[test]
    fn test_manifest_flag_required() {
        if std::env::var_os("ECSMESH_MANIFEST").is_some() {
            return;
        }
        assert!(Cli::try_parse_from(["ecsmesh", "synth"]).is_err());
    }
}
