//! CLI commands

pub mod synth;
pub mod validate;
