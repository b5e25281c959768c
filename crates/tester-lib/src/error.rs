//! Error types for the scheduler tester

use thiserror::Error;

/// Errors raised while talking to the cluster API
#[derive(Debug, Error)]
pub enum ClusterError {
    /// The API server could not be reached or the client could not be built
    #[error("cluster unreachable: {0}")]
    Connectivity(String),

    /// A canary deployment could not be created
    #[error("failed to create deployment {name}: {message}")]
    Create { name: String, message: String },

    /// Deployments could not be listed
    #[error("failed to list deployments matching {selector}: {message}")]
    List { selector: String, message: String },

    /// The watch stream could not be opened or failed mid-stream
    #[error("deployment watch failed: {0}")]
    Watch(String),

    /// A deployment could not be deleted
    #[error("failed to delete deployment {name}: {message}")]
    Delete { name: String, message: String },
}

/// Invalid tester configuration
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("target namespace is required")]
    MissingNamespace,

    #[error("replica count must be positive, got {0}")]
    InvalidReplicas(i32),

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("timeout of {got}s exceeds the {max}s limit of a single deployment watch")]
    TimeoutTooLong { got: u64, max: u64 },

    #[error("{0} must not be empty")]
    Empty(&'static str),
}

pub type ClusterResult<T> = std::result::Result<T, ClusterError>;
