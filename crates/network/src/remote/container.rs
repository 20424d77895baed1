use super::closable::Closable;
use super::credential::{Credential, CredentialBundle, SshTarget};
use super::ssh::SshTransport;
use super::transport::{RemoteSession, Transport};
use crate::error::{ConnectionError, CredentialError};
use async_trait::async_trait;
use bollard::errors::Error as DockerError;
use bollard::{BollardRequest, ClientVersion, Docker};
use hyper::body::Incoming;
use hyper::client::conn::http1;
use hyper::header::{HeaderValue, HOST};
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use log::{debug, warn};
use std::fmt;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Docker Engine API version every request is pinned to. The client cannot
/// negotiate before a working session exists, so it is fixed up front.
pub const DOCKER_API_VERSION: ClientVersion = ClientVersion {
    major_version: 1,
    minor_version: 41,
};

/// Remote command that bridges the daemon socket to the channel's stdio.
const DIAL_STDIO_COMMAND: &str = "docker system dial-stdio";

const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Path prefix of the pinned API version, e.g. `/v1.41`.
pub fn api_prefix() -> String {
    format!(
        "/v{}.{}",
        DOCKER_API_VERSION.major_version, DOCKER_API_VERSION.minor_version
    )
}

enum SessionState<S> {
    Idle,
    Open(S),
    Closed,
}

type SharedSession<S> = Arc<Mutex<SessionState<S>>>;

async fn close_session<S: RemoteSession>(session: &SharedSession<S>) -> Result<(), ConnectionError> {
    let previous = std::mem::replace(&mut *session.lock().await, SessionState::Closed);
    match previous {
        SessionState::Open(mut session) => session.close().await,
        SessionState::Idle | SessionState::Closed => Ok(()),
    }
}

/// Closes the session on a failure path, where the close error has no caller
/// left to report to.
async fn release_session<S: RemoteSession>(session: &SharedSession<S>, address: &str) {
    if let Err(e) = close_session(session).await {
        warn!("Failed to close ssh session to {address}: {e}");
    }
}

/// Custom transport for [`bollard::Docker`] that reaches a remote daemon with an
/// explicitly supplied password or private key.
///
/// The adapter runs the ssh handshake itself with the injected credential and
/// serves every request over a fresh `docker system dial-stdio` channel of that
/// session. HTTP framing is left to hyper; everything above it is bollard's.
pub struct DockerSshAdapter<T: Transport = SshTransport> {
    target: SshTarget,
    transport: T,
    session: SharedSession<T::Session>,
}

impl<T: Transport> Clone for DockerSshAdapter<T> {
    fn clone(&self) -> Self {
        Self {
            target: self.target.clone(),
            transport: self.transport.clone(),
            session: self.session.clone(),
        }
    }
}

impl<T: Transport> fmt::Debug for DockerSshAdapter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DockerSshAdapter")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

impl DockerSshAdapter<SshTransport> {
    pub fn new(
        address: &str,
        username: &str,
        password: Option<&str>,
        keypath: Option<&Path>,
    ) -> Result<Self, CredentialError> {
        let bundle = CredentialBundle {
            address: Some(address.to_string()),
            username: Some(username.to_string()),
            password: password.map(String::from),
            keypath: keypath.map(Path::to_path_buf),
        };
        Ok(Self::with_transport(bundle.resolve()?, SshTransport::default()))
    }
}

impl<T: Transport> DockerSshAdapter<T> {
    pub fn with_transport(target: SshTarget, transport: T) -> Self {
        Self {
            target,
            transport,
            session: Arc::new(Mutex::new(SessionState::Idle)),
        }
    }

    pub fn target(&self) -> &SshTarget {
        &self.target
    }

    pub fn credential(&self) -> &Credential {
        &self.target.credential
    }

    pub fn api_version(&self) -> &'static ClientVersion {
        &DOCKER_API_VERSION
    }

    async fn open_session(&self, state: &mut SessionState<T::Session>) -> Result<(), ConnectionError> {
        if matches!(state, SessionState::Idle) {
            *state = SessionState::Open(self.transport.connect(&self.target).await?);
        }
        Ok(())
    }

    async fn dial(&self) -> Result<<T::Session as RemoteSession>::Stream, ConnectionError> {
        let mut state = self.session.lock().await;
        self.open_session(&mut state).await?;
        match &*state {
            SessionState::Open(session) => session.open_stream(DIAL_STDIO_COMMAND).await,
            SessionState::Idle | SessionState::Closed => Err(ConnectionError::Closed {
                address: self.target.address.clone(),
            }),
        }
    }

    async fn dispatch(self, request: BollardRequest) -> Result<Response<Incoming>, DockerError> {
        let request = pin_api_version(request)?;
        let stream = self
            .dial()
            .await
            .map_err(|e| DockerError::from(io::Error::other(e)))?;

        let (mut sender, connection) = http1::handshake(TokioIo::new(stream)).await?;
        let address = self.target.address.clone();
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!("Container api connection to {address} ended: {e}");
            }
        });

        debug!("{} {} on {}", request.method(), request.uri(), self.target);
        sender.ready().await?;
        Ok(sender.send_request(request).await?)
    }

    /// Runs the ssh handshake and returns a Docker client served by this
    /// adapter. The session is closed again if the client cannot be built.
    pub async fn connect(self) -> Result<ContainerClient<T::Session>, ConnectionError> {
        let address = self.target.address.clone();
        {
            let mut state = self.session.lock().await;
            self.open_session(&mut state).await?;
        }

        let session = self.session.clone();
        // bollard takes any `Fn(BollardRequest) -> Future` as its custom transport
        let transport = move |request: BollardRequest| self.clone().dispatch(request);
        match Docker::connect_with_custom_transport(
            transport,
            Some(format!("ssh://{address}")),
            REQUEST_TIMEOUT_SECS,
            &DOCKER_API_VERSION,
        ) {
            Ok(docker) => {
                debug!("Attached container client to {address} (api {})", api_prefix());
                Ok(ContainerClient {
                    address,
                    docker,
                    session,
                })
            }
            Err(source) => {
                release_session(&session, &address).await;
                Err(ConnectionError::Runtime { address, source })
            }
        }
    }
}

/// Rewrites bollard's absolute request URI into origin form under the pinned
/// version prefix, keeping the authority as the `Host` header.
fn pin_api_version(request: BollardRequest) -> Result<BollardRequest, DockerError> {
    let (mut parts, body) = request.into_parts();
    let prefix = api_prefix();

    let target = parts.uri.path_and_query().map_or("/", |pq| pq.as_str());
    let pinned = if target.starts_with(&format!("{prefix}/")) {
        target.to_string()
    } else {
        format!("{prefix}{target}")
    };

    if let Some(authority) = parts.uri.authority() {
        let host = HeaderValue::from_str(authority.as_str()).map_err(hyper::http::Error::from)?;
        parts.headers.insert(HOST, host);
    }
    parts.uri = pinned.parse()?;
    Ok(Request::from_parts(parts, body))
}

/// Docker Engine API client bound to one remote host.
pub struct ContainerClient<S: RemoteSession> {
    address: String,
    docker: Docker,
    session: SharedSession<S>,
}

impl<S: RemoteSession> ContainerClient<S> {
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn docker(&self) -> &Docker {
        &self.docker
    }

    pub async fn is_closed(&self) -> bool {
        matches!(*self.session.lock().await, SessionState::Closed)
    }
}

#[async_trait]
impl<S: RemoteSession> Closable for ContainerClient<S> {
    async fn close(&mut self) -> Result<(), ConnectionError> {
        debug!("Closing container client for {}", self.address);
        close_session(&self.session).await
    }
}
