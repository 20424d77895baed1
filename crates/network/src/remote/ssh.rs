use super::closable::Closable;
use super::credential::{Credential, SshTarget};
use super::transport::{CommandOutput, RemoteSession, Transport};
use crate::error::ConnectionError;
use async_trait::async_trait;
use log::{debug, info, warn};
use russh::client::{self, Handle, Msg};
use russh::{ChannelMsg, ChannelStream, Disconnect};
use russh_keys::key::PublicKey;
use std::fmt;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;

/// How the identity of a remote host is verified during the ssh handshake.
///
/// `AutoAdd` accepts any host key without consulting `known_hosts`. It is the
/// default because fleet hosts are routinely re-provisioned; deployments on
/// untrusted networks should pick one of the verifying policies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HostKeyPolicy {
    #[default]
    AutoAdd,
    /// Unknown hosts are appended to `~/.ssh/known_hosts`; changed keys are rejected.
    TrustOnFirstUse,
    /// Only hosts already present in `~/.ssh/known_hosts` are accepted.
    Strict,
}

impl HostKeyPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            HostKeyPolicy::AutoAdd => "auto-add",
            HostKeyPolicy::TrustOnFirstUse => "trust-on-first-use",
            HostKeyPolicy::Strict => "strict",
        }
    }
}

impl fmt::Display for HostKeyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown host key policy `{0}`, expected one of: auto-add, trust-on-first-use, strict")]
pub struct UnknownHostKeyPolicy(pub String);

impl FromStr for HostKeyPolicy {
    type Err = UnknownHostKeyPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto-add" => Ok(HostKeyPolicy::AutoAdd),
            "trust-on-first-use" => Ok(HostKeyPolicy::TrustOnFirstUse),
            "strict" => Ok(HostKeyPolicy::Strict),
            other => Err(UnknownHostKeyPolicy(other.to_string())),
        }
    }
}

pub(crate) struct HostKeyVerifier {
    host: String,
    port: u16,
    policy: HostKeyPolicy,
}

#[async_trait]
impl client::Handler for HostKeyVerifier {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let fingerprint = server_public_key.fingerprint();
        let (host, port) = (self.host.as_str(), self.port);

        if self.policy == HostKeyPolicy::AutoAdd {
            debug!("Trusting host key {fingerprint} of {host}:{port} without verification");
            return Ok(true);
        }

        match russh_keys::check_known_hosts(host, port, server_public_key) {
            Ok(true) => Ok(true),
            Ok(false) if self.policy == HostKeyPolicy::TrustOnFirstUse => {
                info!("Adding host key {fingerprint} of {host}:{port} to known hosts");
                russh_keys::learn_known_hosts(host, port, server_public_key)?;
                Ok(true)
            }
            Ok(false) => {
                warn!("Host key {fingerprint} of {host}:{port} is not in known hosts");
                Ok(false)
            }
            Err(russh_keys::Error::KeyChanged { line }) => {
                warn!(
                    "Host key of {host}:{port} does not match known hosts entry on line {line}"
                );
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Establishes ssh sessions with `russh`, authenticating with the single
/// credential carried by the target.
#[derive(Debug, Clone, Default)]
pub struct SshTransport {
    policy: HostKeyPolicy,
}

impl SshTransport {
    pub fn new(policy: HostKeyPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> HostKeyPolicy {
        self.policy
    }
}

#[async_trait]
impl Transport for SshTransport {
    type Session = SshSession;

    async fn connect(&self, target: &SshTarget) -> Result<SshSession, ConnectionError> {
        let transport_error = |source: russh::Error| ConnectionError::Transport {
            address: target.address.clone(),
            source,
        };

        debug!(
            "Opening ssh session to {target} with {} authentication",
            target.credential.kind()
        );
        let config = Arc::new(client::Config::default());
        let verifier = HostKeyVerifier {
            host: target.address.clone(),
            port: target.port,
            policy: self.policy,
        };
        let mut handle = client::connect(config, (target.address.as_str(), target.port), verifier)
            .await
            .map_err(transport_error)?;

        let authenticated = match &target.credential {
            Credential::Password(password) => {
                handle
                    .authenticate_password(target.username.as_str(), password.expose())
                    .await
            }
            Credential::KeyPath(path) => {
                let key = russh_keys::load_secret_key(path, None).map_err(|source| {
                    ConnectionError::PrivateKey {
                        path: path.clone(),
                        source,
                    }
                })?;
                handle
                    .authenticate_publickey(target.username.as_str(), Arc::new(key))
                    .await
            }
        }
        .map_err(transport_error)?;

        if !authenticated {
            return Err(ConnectionError::AuthenticationRejected {
                address: target.address.clone(),
                username: target.username.clone(),
            });
        }

        debug!("Authenticated ssh session to {target}");
        Ok(SshSession {
            address: target.address.clone(),
            handle: Some(handle),
        })
    }
}

/// An authenticated ssh connection. Each command runs on its own channel.
pub struct SshSession {
    address: String,
    handle: Option<Handle<HostKeyVerifier>>,
}

impl SshSession {
    fn handle(&self) -> Result<&Handle<HostKeyVerifier>, ConnectionError> {
        self.handle.as_ref().ok_or_else(|| ConnectionError::Closed {
            address: self.address.clone(),
        })
    }

    fn transport_error(&self, source: russh::Error) -> ConnectionError {
        ConnectionError::Transport {
            address: self.address.clone(),
            source,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_none()
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    type Stream = Pin<Box<ChannelStream<Msg>>>;

    fn address(&self) -> &str {
        &self.address
    }

    async fn exec(&self, command: &str) -> Result<CommandOutput, ConnectionError> {
        let mut channel = self
            .handle()?
            .channel_open_session()
            .await
            .map_err(|e| self.transport_error(e))?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| self.transport_error(e))?;

        let mut output = CommandOutput::default();
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => output.stdout.extend_from_slice(data),
                // stderr is extended data stream 1
                ChannelMsg::ExtendedData { ref data, ext: 1 } => {
                    output.stderr.extend_from_slice(data)
                }
                ChannelMsg::ExitStatus { exit_status } => output.exit_status = Some(exit_status),
                _ => {}
            }
        }

        debug!(
            "Command `{command}` on {} exited with {:?}",
            self.address, output.exit_status
        );
        Ok(output)
    }

    async fn open_stream(&self, command: &str) -> Result<Self::Stream, ConnectionError> {
        let channel = self
            .handle()?
            .channel_open_session()
            .await
            .map_err(|e| self.transport_error(e))?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| self.transport_error(e))?;
        Ok(Box::pin(channel.into_stream()))
    }
}

#[async_trait]
impl Closable for SshSession {
    async fn close(&mut self) -> Result<(), ConnectionError> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        debug!("Closing ssh session to {}", self.address);
        handle
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
            .map_err(|e| self.transport_error(e))
    }
}
