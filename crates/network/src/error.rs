use std::path::PathBuf;

/// Malformed or missing deployment configuration.
///
/// Every variant that originates in the config walker carries the full key path
/// of the offending entry, e.g. `hosts[1].workers[0].number_of_instance`.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required key `{path}`")]
    Missing { path: String },
    #[error("`{path}` must be {expected}, found {found}")]
    InvalidType {
        path: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("invalid value for `{path}`: {reason}")]
    InvalidValue { path: String, reason: String },
    #[error("unknown deploy type `{value}` at `{path}`, expected one of: {recognized}")]
    UnknownDeployType {
        path: String,
        value: String,
        recognized: String,
    },
    #[error("failed to parse configuration: {0}")]
    Syntax(#[from] serde_yaml::Error),
    #[error("failed to read configuration file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    /// Rewrites the key path of a path-carrying error. Used when a value is
    /// validated before its location in the document is known.
    pub(crate) fn at(self, path: &str) -> Self {
        match self {
            ConfigError::UnknownDeployType {
                value, recognized, ..
            } => ConfigError::UnknownDeployType {
                path: path.to_string(),
                value,
                recognized,
            },
            other => other,
        }
    }
}

/// Ambiguous or absent authentication material for a remote channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    #[error("`{field}` is required to open a remote connection")]
    MissingField { field: &'static str },
    #[error("`{field}` is set but empty")]
    EmptyField { field: &'static str },
    #[error("expected either `password` or `path_to_privkey`, but both are set")]
    Conflicting,
    #[error("expected either `password` or `path_to_privkey`, but neither is set")]
    Missing,
}

/// Transport-level failure while establishing or using a remote channel.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("ssh connection to {address} failed: {source}")]
    Transport {
        address: String,
        #[source]
        source: russh::Error,
    },
    #[error("ssh authentication of `{username}` at {address} was rejected")]
    AuthenticationRejected { address: String, username: String },
    #[error("failed to load private key {}: {source}", .path.display())]
    PrivateKey {
        path: PathBuf,
        #[source]
        source: russh_keys::Error,
    },
    #[error("remote command `{command}` on {address} failed: {reason}")]
    Command {
        address: String,
        command: String,
        reason: String,
    },
    #[error("failed to set up the container client for {address}: {source}")]
    Runtime {
        address: String,
        #[source]
        source: bollard::errors::Error,
    },
    #[error("connection to {address} is already closed")]
    Closed { address: String },
}

/// Error raised by a factory call: either the credential bundle was unusable,
/// or the channel could not be established with it.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// Failure reported by a processor while it is being built.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct ConstructionError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ConstructionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}
