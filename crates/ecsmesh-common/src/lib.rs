//! Host framework for ecsmesh: task definitions, security groups, the
//! service lifecycle and shared utilities

#![deny(missing_docs)]

pub mod container;
pub mod error;
pub mod extension;
pub mod network;
pub mod secret;
pub mod service;
pub mod stack;
pub mod task;
pub mod telemetry;
pub mod yaml;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
