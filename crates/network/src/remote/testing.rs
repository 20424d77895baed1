//! In-memory transport for tests: sessions run commands from a fixed table and
//! serve a fake Docker Engine API over a duplex pipe.

use super::closable::Closable;
use super::credential::SshTarget;
use super::transport::{CommandOutput, RemoteSession, Transport};
use crate::error::ConnectionError;
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::json;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use tokio::io::DuplexStream;

#[derive(Debug, Default)]
struct Journal {
    connected: Vec<SshTarget>,
    streams: Vec<String>,
    requests: Vec<String>,
    closed: usize,
    fail_close: bool,
}

#[derive(Debug, Default, Clone)]
pub(crate) struct MockTransport {
    journal: Arc<Mutex<Journal>>,
}

impl MockTransport {
    /// Sessions of this transport report an error when closed.
    pub(crate) fn with_failing_close() -> Self {
        let transport = Self::default();
        transport.journal().fail_close = true;
        transport
    }

    fn journal(&self) -> std::sync::MutexGuard<'_, Journal> {
        self.journal.lock().unwrap()
    }

    pub(crate) fn connected(&self) -> Vec<SshTarget> {
        self.journal().connected.clone()
    }

    pub(crate) fn streams_opened(&self) -> Vec<String> {
        self.journal().streams.clone()
    }

    pub(crate) fn requests(&self) -> Vec<String> {
        self.journal().requests.clone()
    }

    pub(crate) fn sessions_closed(&self) -> usize {
        self.journal().closed
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Session = MockSession;

    async fn connect(&self, target: &SshTarget) -> Result<MockSession, ConnectionError> {
        self.journal().connected.push(target.clone());
        Ok(MockSession {
            address: target.address.clone(),
            journal: self.journal.clone(),
            open: true,
        })
    }
}

pub(crate) struct MockSession {
    address: String,
    journal: Arc<Mutex<Journal>>,
    open: bool,
}

#[async_trait]
impl RemoteSession for MockSession {
    type Stream = DuplexStream;

    fn address(&self) -> &str {
        &self.address
    }

    async fn exec(&self, command: &str) -> Result<CommandOutput, ConnectionError> {
        let output = match command {
            "uname -a" => CommandOutput {
                stdout: b"Linux worker-1 6.1.0 x86_64 GNU/Linux\n".to_vec(),
                stderr: Vec::new(),
                exit_status: Some(0),
            },
            _ => CommandOutput {
                stdout: Vec::new(),
                stderr: format!("{command}: command not found\n").into_bytes(),
                exit_status: Some(127),
            },
        };
        Ok(output)
    }

    async fn open_stream(&self, command: &str) -> Result<DuplexStream, ConnectionError> {
        self.journal.lock().unwrap().streams.push(command.to_string());

        let (client, server) = tokio::io::duplex(64 * 1024);
        let journal = self.journal.clone();
        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let journal = journal.clone();
                async move { Ok::<_, Infallible>(fake_docker(&journal, req)) }
            });
            let _ = hyper::server::conn::http1::Builder::new()
                .serve_connection(TokioIo::new(server), service)
                .await;
        });
        Ok(client)
    }
}

#[async_trait]
impl Closable for MockSession {
    async fn close(&mut self) -> Result<(), ConnectionError> {
        if self.open {
            self.open = false;
            let mut journal = self.journal.lock().unwrap();
            journal.closed += 1;
            if journal.fail_close {
                return Err(ConnectionError::Command {
                    address: self.address.clone(),
                    command: "exit".to_string(),
                    reason: "channel reset by peer".to_string(),
                });
            }
        }
        Ok(())
    }
}

fn fake_docker(journal: &Mutex<Journal>, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let target = req
        .uri()
        .path_and_query()
        .map(|pq| pq.to_string())
        .unwrap_or_default();
    journal.lock().unwrap().requests.push(target.clone());

    let path = req.uri().path();
    let (status, body) = match (req.method(), path) {
        (&Method::GET, "/v1.41/_ping") => (StatusCode::OK, "OK".to_string()),
        (&Method::GET, "/v1.41/version") => (
            StatusCode::OK,
            json!({ "Version": "24.0.7", "ApiVersion": "1.43", "Os": "linux" }).to_string(),
        ),
        (&Method::GET, "/v1.41/containers/json") => (
            StatusCode::OK,
            json!([{ "Id": "3f4e1a", "Names": ["/ocrd-dummy-0"], "Image": "ocrd/core", "State": "running" }])
                .to_string(),
        ),
        (&Method::POST, "/v1.41/containers/create") => (
            StatusCode::CREATED,
            json!({ "Id": "9b2c7d", "Warnings": [] }).to_string(),
        ),
        (&Method::POST, p) if p.ends_with("/start") => (StatusCode::NO_CONTENT, String::new()),
        (&Method::POST, p) if p.ends_with("/stop") => (StatusCode::NOT_MODIFIED, String::new()),
        (&Method::DELETE, "/v1.41/containers/missing") => (
            StatusCode::NOT_FOUND,
            json!({ "message": "No such container: missing" }).to_string(),
        ),
        _ => (
            StatusCode::NOT_FOUND,
            json!({ "message": "page not found" }).to_string(),
        ),
    };

    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
}
