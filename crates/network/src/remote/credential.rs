use crate::error::CredentialError;
use std::fmt;
use std::path::{Path, PathBuf};

pub const DEFAULT_SSH_PORT: u16 = 22;

/// A password that never shows up in logs or debug output.
#[derive(Clone, PartialEq, Eq)]
pub struct Password(String);

impl Password {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(<redacted>)")
    }
}

/// The single piece of authentication material used for an ssh login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    Password(Password),
    KeyPath(PathBuf),
}

impl Credential {
    /// Picks the credential out of an optional password / key path pair.
    ///
    /// Exactly one of the two must be present and non-empty.
    pub fn from_parts(
        password: Option<&str>,
        keypath: Option<&Path>,
    ) -> Result<Self, CredentialError> {
        match (password, keypath) {
            (Some(_), Some(_)) => Err(CredentialError::Conflicting),
            (None, None) => Err(CredentialError::Missing),
            (Some(""), None) => Err(CredentialError::EmptyField { field: "password" }),
            (Some(password), None) => Ok(Credential::Password(Password::new(password))),
            (None, Some(path)) if path.as_os_str().is_empty() => Err(CredentialError::EmptyField {
                field: "path_to_privkey",
            }),
            (None, Some(path)) => Ok(Credential::KeyPath(path.to_path_buf())),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Credential::Password(_) => "password",
            Credential::KeyPath(_) => "private key",
        }
    }
}

/// Raw login data for one remote host, as found in the configuration.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CredentialBundle {
    pub address: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keypath: Option<PathBuf>,
}

impl fmt::Debug for CredentialBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialBundle")
            .field("address", &self.address)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("keypath", &self.keypath)
            .finish()
    }
}

impl CredentialBundle {
    /// Validates the bundle into a connectable target on the default ssh port.
    pub fn resolve(&self) -> Result<SshTarget, CredentialError> {
        let address = required(self.address.as_deref(), "address")?;
        let username = required(self.username.as_deref(), "username")?;
        let credential = Credential::from_parts(self.password.as_deref(), self.keypath.as_deref())?;

        Ok(SshTarget {
            address: address.to_string(),
            port: DEFAULT_SSH_PORT,
            username: username.to_string(),
            credential,
        })
    }
}

fn required<'a>(value: Option<&'a str>, field: &'static str) -> Result<&'a str, CredentialError> {
    match value {
        None | Some("") => Err(CredentialError::MissingField { field }),
        Some(value) => Ok(value),
    }
}

/// Anything in the deployment configuration that can be reached over ssh.
pub trait HasCredentials {
    fn credentials(&self) -> CredentialBundle;
}

impl HasCredentials for CredentialBundle {
    fn credentials(&self) -> CredentialBundle {
        self.clone()
    }
}

/// A validated ssh endpoint with exactly one credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub address: String,
    pub port: u16,
    pub username: String,
    pub credential: Credential,
}

impl SshTarget {
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

impl fmt::Display for SshTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.username, self.address, self.port)
    }
}
