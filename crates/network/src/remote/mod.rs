//! Remote channels to fleet hosts: ssh shell sessions and Docker Engine API
//! clients tunneled through ssh.

mod closable;
mod container;
mod credential;
mod factory;
mod ssh;
#[cfg(test)]
mod testing;
mod transport;

pub use closable::{close_clients, Closable};
pub use container::{api_prefix, ContainerClient, DockerSshAdapter, DOCKER_API_VERSION};
pub use credential::{
    Credential, CredentialBundle, HasCredentials, Password, SshTarget, DEFAULT_SSH_PORT,
};
pub use factory::RemoteConnectionFactory;
pub use ssh::{HostKeyPolicy, SshSession, SshTransport, UnknownHostKeyPolicy};
pub use transport::{CommandOutput, RemoteSession, Transport};
