use super::closable::Closable;
use super::credential::SshTarget;
use crate::error::ConnectionError;
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

/// Captured result of a command run on a remote host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// `None` when the remote side closed the channel without reporting one.
    pub exit_status: Option<u32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_status == Some(0)
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// An authenticated session to one host.
#[async_trait]
pub trait RemoteSession: Closable + Sync + 'static {
    /// Bidirectional byte stream bound to a remote command's stdin/stdout.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    fn address(&self) -> &str;

    async fn exec(&self, command: &str) -> Result<CommandOutput, ConnectionError>;

    async fn open_stream(&self, command: &str) -> Result<Self::Stream, ConnectionError>;

    /// Runs `command` and fails unless it exits with status 0.
    async fn exec_checked(&self, command: &str) -> Result<CommandOutput, ConnectionError> {
        let output = self.exec(command).await?;
        if output.success() {
            return Ok(output);
        }

        let reason = match output.exit_status {
            Some(code) => format!("exit status {code}: {}", output.stderr_lossy().trim()),
            None => "channel closed without an exit status".to_string(),
        };
        Err(ConnectionError::Command {
            address: self.address().to_string(),
            command: command.to_string(),
            reason,
        })
    }
}

/// Establishes authenticated sessions. Transports are cheap handles that
/// container clients clone into their request path.
#[async_trait]
pub trait Transport: Clone + Send + Sync + 'static {
    type Session: RemoteSession;

    async fn connect(&self, target: &SshTarget) -> Result<Self::Session, ConnectionError>;
}
