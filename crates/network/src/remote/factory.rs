use super::container::{ContainerClient, DockerSshAdapter};
use super::credential::HasCredentials;
use super::ssh::{HostKeyPolicy, SshTransport};
use super::transport::Transport;
use crate::error::RemoteError;
use log::debug;

/// Opens remote channels to fleet hosts.
///
/// Every call validates the host's credentials first and performs exactly one
/// connection attempt; there is no retry and no timeout. Callers that need a
/// deadline wrap the call in `tokio::time::timeout`. The returned channels are
/// owned by the caller and must be released through [`super::Closable`].
#[derive(Debug, Clone, Default)]
pub struct RemoteConnectionFactory<T: Transport = SshTransport> {
    transport: T,
}

impl RemoteConnectionFactory<SshTransport> {
    pub fn new(policy: HostKeyPolicy) -> Self {
        Self::with_transport(SshTransport::new(policy))
    }
}

impl<T: Transport> RemoteConnectionFactory<T> {
    pub fn with_transport(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Opens an interactive shell session.
    pub async fn shell(&self, host: &impl HasCredentials) -> Result<T::Session, RemoteError> {
        let target = host.credentials().resolve()?;
        debug!("Creating shell session for {target}");
        Ok(self.transport.connect(&target).await?)
    }

    /// Opens a Docker Engine API client tunneled through ssh.
    pub async fn container_client(
        &self,
        host: &impl HasCredentials,
    ) -> Result<ContainerClient<T::Session>, RemoteError> {
        let target = host.credentials().resolve()?;
        debug!("Creating container client for {target}");
        let adapter = DockerSshAdapter::with_transport(target, self.transport.clone());
        Ok(adapter.connect().await?)
    }
}
