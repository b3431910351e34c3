//! Error types for ecsmesh builds
//!
//! Every error is fatal to the current build pass. Variants carry the
//! service id (or hook context) that tripped them so a failed synth points
//! at the declaration that needs fixing.

use thiserror::Error;

/// Main error type for ecsmesh build passes
#[derive(Debug, Error)]
pub enum Error {
    /// A required collaborator (e.g. the application container) is absent
    #[error("missing dependency for {service}: {message}")]
    MissingDependency {
        /// Service being built
        service: String,
        /// What is missing
        message: String,
    },

    /// Two mutually exclusive options were both configured
    #[error("configuration conflict for {service}: {message}")]
    ConfigurationConflict {
        /// Service whose configuration conflicts
        service: String,
        /// Which options conflict
        message: String,
    },

    /// `connect` across two environments
    #[error("Unable to connect services from different environments ({source_service} in {source_environment}, {target_service} in {target_environment})")]
    CrossEnvironmentConnection {
        /// Calling service
        source_service: String,
        /// Environment of the calling service
        source_environment: String,
        /// Called service
        target_service: String,
        /// Environment of the called service
        target_environment: String,
    },

    /// `connect` target has no extension of the required kind
    #[error("service {service} doesn't have the {extension} extension added to it")]
    MissingExtension {
        /// Service lacking the extension
        service: String,
        /// Extension name that was looked up
        extension: String,
    },

    /// A fixed resource ceiling would be exceeded
    #[error("Cannot have more than {limit} {resource} associated with service {service} (requested {requested})")]
    ResourceLimit {
        /// Service that hit the ceiling
        service: String,
        /// Kind of resource being counted
        resource: String,
        /// Ceiling
        limit: usize,
        /// Count that would result
        requested: usize,
    },

    /// A hook ran before the resources it references were created
    #[error("uninitialized state [{context}]: {message}")]
    UninitializedState {
        /// Hook or operation that observed the problem
        context: String,
        /// What was missing
        message: String,
    },

    /// A credential required by the configuration was not supplied
    #[error("service {service} requires credential {credential}")]
    MissingCredential {
        /// Service missing the credential
        service: String,
        /// Credential description
        credential: String,
    },

    /// An explicitly requested local port is already bound
    #[error("local port {port} is already bound in the task of {service}")]
    PortConflict {
        /// Service whose task binds the port
        service: String,
        /// Port that collided
        port: u16,
    },

    /// Invalid manifest or props
    #[error("config error: {message}")]
    Config {
        /// Description of what's invalid
        message: String,
        /// Field path when known (e.g. "services[1].mesh.caCert")
        field: Option<String>,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },
}

impl Error {
    /// Missing dependency for a service
    pub fn missing_dependency(service: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::MissingDependency {
            service: service.into(),
            message: msg.into(),
        }
    }

    /// Configuration conflict for a service
    pub fn configuration_conflict(service: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ConfigurationConflict {
            service: service.into(),
            message: msg.into(),
        }
    }

    /// Missing extension on a service
    pub fn missing_extension(service: impl Into<String>, extension: impl Into<String>) -> Self {
        Self::MissingExtension {
            service: service.into(),
            extension: extension.into(),
        }
    }

    /// Security-group (or other) ceiling exceeded
    pub fn resource_limit(
        service: impl Into<String>,
        resource: impl Into<String>,
        limit: usize,
        requested: usize,
    ) -> Self {
        Self::ResourceLimit {
            service: service.into(),
            resource: resource.into(),
            limit,
            requested,
        }
    }

    /// Hook invoked out of order
    pub fn uninitialized(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::UninitializedState {
            context: context.into(),
            message: msg.into(),
        }
    }

    /// Credential not supplied
    pub fn missing_credential(service: impl Into<String>, credential: impl Into<String>) -> Self {
        Self::MissingCredential {
            service: service.into(),
            credential: credential.into(),
        }
    }

    /// Config error without a field path
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
            field: None,
        }
    }

    /// Config error pointing at a field path
    pub fn config_for_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Service id this error is attributed to, if any
    pub fn service(&self) -> Option<&str> {
        match self {
            Error::MissingDependency { service, .. }
            | Error::ConfigurationConflict { service, .. }
            | Error::MissingExtension { service, .. }
            | Error::ResourceLimit { service, .. }
            | Error::MissingCredential { service, .. }
            | Error::PortConflict { service, .. } => Some(service),
            Error::CrossEnvironmentConnection { source_service, .. } => Some(source_service),
            Error::UninitializedState { .. }
            | Error::Config { .. }
            | Error::Serialization { .. } => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::serialization(err.to_string())
    }
}
