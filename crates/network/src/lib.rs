//! Fleet deployment configuration and remote connections for a distributed
//! OCR processing server.
//!
//! - [`config`] turns the deployment file into an immutable object graph.
//! - [`remote`] opens ssh shells and Docker API clients to the configured hosts.
//! - [`processor`] memoizes processor instances by their parameters.

pub mod config;
pub mod deploy_type;
pub mod error;
pub mod processor;
pub mod remote;

pub use config::{
    HostConfig, MongoConfig, ProcessingServerConfig, QueueConfig, ServiceCredentials, SshLogin,
    WorkerConfig,
};
pub use deploy_type::DeployType;
pub use error::{ConfigError, ConnectionError, ConstructionError, CredentialError, RemoteError};
