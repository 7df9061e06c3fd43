// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Newline-delimited JSON request/response protocol over TCP or a unix socket.
//!
//! Every request line is a [`RequestFrame`]; the server answers each with
//! exactly one [`ResponseFrame`] carrying the same `id`. A connection may carry
//! any number of requests, answered in order. A request line longer than
//! [`MAX_REQUEST_LEN`] is answered with an error frame and the connection is
//! closed.

use crate::attributes::{AttributesError, ProcessAttributes};
use crate::command::{Command, DEFAULT_GRACE, parse_signal};
use crate::config::Network;
use crate::duration::{DurationError, parse_duration};
use crate::engine::Supervisor;
use crate::error::SubmitError;
use crate::process::Metadata;
use anyhow::{Context, Result, bail};
use futures::StreamExt;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;

/// Longest request line the server buffers.
pub const MAX_REQUEST_LEN: usize = 64 * 1024;
/// Longest response line the client buffers. `list` replies carry every
/// process with its journal, so this is far larger than a request.
pub const MAX_RESPONSE_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Call {
    List,
    Start {
        attributes: ProcessAttributes,
    },
    Kill {
        uuid: String,
        #[serde(default)]
        prune: bool,
    },
    /// `gracefully` is a duration string; absent means 5s.
    Stop {
        uuid: String,
        #[serde(default)]
        gracefully: Option<String>,
        #[serde(default)]
        prune: bool,
    },
    Restart {
        uuid: String,
        #[serde(default)]
        gracefully: Option<String>,
    },
    Signal {
        uuid: String,
        signal: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Reply {
    /// Accepted for serialized processing.
    Ack,
    List(Vec<Metadata>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFrame {
    pub id: u64,
    pub call: Call,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub id: u64,
    pub outcome: Result<Reply, String>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    #[error("invalid start request: {0}")]
    Invalid(#[from] AttributesError),
    #[error("invalid grace period: {0}")]
    Grace(#[from] DurationError),
    #[error(transparent)]
    Submit(#[from] SubmitError),
}

fn grace_from(raw: Option<&str>) -> Result<Duration, DurationError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(DEFAULT_GRACE),
        Some(s) => parse_duration(s),
    }
}

/// Translates calls into engine commands.
#[derive(Clone)]
pub struct RpcService {
    supervisor: Arc<Supervisor>,
    submit_timeout: Duration,
}

impl RpcService {
    pub fn new(supervisor: Arc<Supervisor>, submit_timeout: Duration) -> Self {
        Self {
            supervisor,
            submit_timeout,
        }
    }

    pub async fn handle(&self, call: Call) -> Result<Reply, RpcError> {
        let command = match call {
            Call::List => return Ok(Reply::List(self.supervisor.list())),
            Call::Start { attributes } => {
                attributes.validate()?;
                Command::Start(attributes)
            }
            Call::Kill { uuid, prune } => Command::Kill { id: uuid, prune },
            Call::Stop {
                uuid,
                gracefully,
                prune,
            } => Command::Stop {
                id: uuid,
                grace: grace_from(gracefully.as_deref())?,
                prune,
            },
            Call::Restart { uuid, gracefully } => Command::Restart {
                id: uuid,
                grace: grace_from(gracefully.as_deref())?,
            },
            Call::Signal { uuid, signal } => Command::Signal {
                id: uuid,
                signal: parse_signal(&signal),
            },
        };
        self.supervisor.submit(command, self.submit_timeout).await?;
        Ok(Reply::Ack)
    }
}

trait Connection: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Connection for T {}

pub enum Listener {
    Tcp(TcpListener),
    Unix(UnixListener, PathBuf),
}

impl Listener {
    pub async fn bind(network: Network, address: &str) -> Result<Self> {
        match network {
            Network::Tcp => {
                let listener = TcpListener::bind(address)
                    .await
                    .with_context(|| format!("failed to listen on tcp://{address}"))?;
                Ok(Listener::Tcp(listener))
            }
            Network::Unix => {
                let path = Path::new(address);
                std::fs::remove_file(path)
                    .or_else(|e| {
                        if e.kind() == ErrorKind::NotFound {
                            Ok(())
                        } else {
                            Err(e)
                        }
                    })
                    .context("failed to remove existing socket")?;
                if let Some(parent) = path.parent()
                    && !parent.as_os_str().is_empty()
                {
                    std::fs::create_dir_all(parent).with_context(|| {
                        format!("failed to create socket directory {}", parent.display())
                    })?;
                }
                let listener = UnixListener::bind(path)
                    .with_context(|| format!("failed to listen on unix://{address}"))?;
                Ok(Listener::Unix(listener, path.to_path_buf()))
            }
        }
    }

    /// Address callers should dial; resolves an ephemeral tcp port.
    pub fn local_address(&self) -> String {
        match self {
            Listener::Tcp(listener) => listener
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_default(),
            Listener::Unix(_, path) => path.display().to_string(),
        }
    }

    async fn accept(&self) -> std::io::Result<Box<dyn Connection>> {
        match self {
            Listener::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                debug!("accepted connection from {peer}");
                Ok(Box::new(stream))
            }
            Listener::Unix(listener, _) => {
                let (stream, _) = listener.accept().await?;
                Ok(Box::new(stream))
            }
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Listener::Unix(_, path) = self
            && let Err(e) = std::fs::remove_file(path.as_path())
            && e.kind() != ErrorKind::NotFound
        {
            warn!("failed to remove socket {}: {e}", path.display());
        }
    }
}

/// Accept connections until `token` is cancelled. Each connection is served
/// on its own task.
pub async fn serve(listener: Listener, service: RpcService, token: CancellationToken) {
    info!("listening on {}", listener.local_address());
    loop {
        let conn = tokio::select! {
            _ = token.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match conn {
            Ok(conn) => {
                let service = service.clone();
                let token = token.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve_connection(conn, service, token).await {
                        debug!("connection closed: {e}");
                    }
                });
            }
            Err(e) => warn!("accept failed: {e}"),
        }
    }
    info!("rpc server stopped");
}

async fn serve_connection(
    conn: Box<dyn Connection>,
    service: RpcService,
    token: CancellationToken,
) -> std::io::Result<()> {
    let (reader, mut writer) = tokio::io::split(conn);
    let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_REQUEST_LEN));
    loop {
        let next = tokio::select! {
            _ = token.cancelled() => return Ok(()),
            next = lines.next() => next,
        };
        let line = match next {
            None => return Ok(()),
            Some(Ok(line)) => line,
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                warn!("dropping connection: request exceeds {MAX_REQUEST_LEN} bytes");
                let response = ResponseFrame {
                    id: 0,
                    outcome: Err(format!("request exceeds {MAX_REQUEST_LEN} bytes")),
                };
                write_frame(&mut writer, &response).await?;
                return writer.shutdown().await;
            }
            Some(Err(LinesCodecError::Io(e))) => return Err(e),
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<RequestFrame>(&line) {
            Ok(frame) => ResponseFrame {
                id: frame.id,
                outcome: service.handle(frame.call).await.map_err(|e| e.to_string()),
            },
            Err(e) => ResponseFrame {
                id: 0,
                outcome: Err(format!("malformed request: {e}")),
            },
        };
        write_frame(&mut writer, &response).await?;
    }
}

async fn write_frame(
    writer: &mut WriteHalf<Box<dyn Connection>>,
    response: &ResponseFrame,
) -> std::io::Result<()> {
    let mut encoded = serde_json::to_vec(response).map_err(std::io::Error::other)?;
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await
}

/// Client side of the protocol. Requests are sent one at a time.
pub struct Client {
    reader: FramedRead<ReadHalf<Box<dyn Connection>>, LinesCodec>,
    writer: WriteHalf<Box<dyn Connection>>,
    next_id: u64,
}

impl Client {
    pub async fn connect(network: Network, address: &str) -> Result<Self> {
        let conn: Box<dyn Connection> = match network {
            Network::Tcp => Box::new(
                TcpStream::connect(address)
                    .await
                    .with_context(|| format!("failed to connect to tcp://{address}"))?,
            ),
            Network::Unix => Box::new(
                UnixStream::connect(address)
                    .await
                    .with_context(|| format!("failed to connect to unix://{address}"))?,
            ),
        };
        let (reader, writer) = tokio::io::split(conn);
        Ok(Self {
            reader: FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_RESPONSE_LEN)),
            writer,
            next_id: 1,
        })
    }

    pub async fn call(&mut self, call: Call) -> Result<Reply> {
        let id = self.next_id;
        self.next_id += 1;

        let mut encoded = serde_json::to_vec(&RequestFrame { id, call })?;
        encoded.push(b'\n');
        self.writer.write_all(&encoded).await?;
        self.writer.flush().await?;

        let line = match self.reader.next().await {
            Some(line) => line.context("failed to read response")?,
            None => bail!("connection closed by server"),
        };
        let response: ResponseFrame =
            serde_json::from_str(&line).context("malformed response from server")?;
        if response.id != id {
            bail!("response id {} does not match request id {id}", response.id);
        }
        response.outcome.map_err(anyhow::Error::msg)
    }

    async fn expect_ack(&mut self, call: Call) -> Result<()> {
        match self.call(call).await? {
            Reply::Ack => Ok(()),
            other => bail!("unexpected reply: {other:?}"),
        }
    }

    pub async fn list(&mut self) -> Result<Vec<Metadata>> {
        match self.call(Call::List).await? {
            Reply::List(processes) => Ok(processes),
            other => bail!("unexpected reply: {other:?}"),
        }
    }

    pub async fn start(&mut self, attributes: ProcessAttributes) -> Result<()> {
        self.expect_ack(Call::Start { attributes }).await
    }

    pub async fn kill(&mut self, uuid: &str, prune: bool) -> Result<()> {
        self.expect_ack(Call::Kill {
            uuid: uuid.to_string(),
            prune,
        })
        .await
    }

    pub async fn stop(&mut self, uuid: &str, gracefully: Option<&str>, prune: bool) -> Result<()> {
        self.expect_ack(Call::Stop {
            uuid: uuid.to_string(),
            gracefully: gracefully.map(str::to_string),
            prune,
        })
        .await
    }

    pub async fn restart(&mut self, uuid: &str, gracefully: Option<&str>) -> Result<()> {
        self.expect_ack(Call::Restart {
            uuid: uuid.to_string(),
            gracefully: gracefully.map(str::to_string),
        })
        .await
    }

    pub async fn signal(&mut self, uuid: &str, signal: &str) -> Result<()> {
        self.expect_ack(Call::Signal {
            uuid: uuid.to_string(),
            signal: signal.to_string(),
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::tests::make_attributes;
    use crate::engine::EngineSettings;
    use std::time::Instant;
    use tokio::io::{AsyncBufReadExt, BufReader};

    async fn wait_until(limit: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + limit;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        cond()
    }

    struct Harness {
        supervisor: Arc<Supervisor>,
        token: CancellationToken,
        network: Network,
        address: String,
        _dir: tempfile::TempDir,
    }

    impl Harness {
        async fn new(network: Network) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let address = match network {
                Network::Tcp => "127.0.0.1:0".to_string(),
                Network::Unix => dir.path().join("procsup.sock").display().to_string(),
            };
            let supervisor = Arc::new(Supervisor::new(EngineSettings::default()));
            let token = CancellationToken::new();

            let runner = Arc::clone(&supervisor);
            let t = token.clone();
            tokio::spawn(async move { runner.run(t).await });

            let listener = Listener::bind(network, &address).await.unwrap();
            let address = listener.local_address();
            let service = RpcService::new(Arc::clone(&supervisor), Duration::from_secs(1));
            tokio::spawn(serve(listener, service, token.clone()));

            Self {
                supervisor,
                token,
                network,
                address,
                _dir: dir,
            }
        }

        async fn client(&self) -> Client {
            Client::connect(self.network, &self.address).await.unwrap()
        }
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            self.token.cancel();
        }
    }

    // -- wire format --

    #[test]
    fn test_request_frame_shape() {
        let frame = RequestFrame {
            id: 3,
            call: Call::Kill {
                uuid: "abc".into(),
                prune: true,
            },
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"id": 3, "call": {"method": "kill", "uuid": "abc", "prune": true}})
        );
    }

    #[test]
    fn test_optional_fields_default() {
        let frame: RequestFrame =
            serde_json::from_str(r#"{"id":1,"call":{"method":"stop","uuid":"abc"}}"#).unwrap();
        assert_eq!(
            frame.call,
            Call::Stop {
                uuid: "abc".into(),
                gracefully: None,
                prune: false,
            }
        );
    }

    #[test]
    fn test_grace_from() {
        assert_eq!(grace_from(None).unwrap(), DEFAULT_GRACE);
        assert_eq!(grace_from(Some("  ")).unwrap(), DEFAULT_GRACE);
        assert_eq!(grace_from(Some("250ms")).unwrap(), Duration::from_millis(250));
        assert!(grace_from(Some("soon")).is_err());
    }

    // -- service --

    #[tokio::test]
    async fn test_start_requires_dir_cmd_files() {
        let service = RpcService::new(Arc::new(Supervisor::default()), Duration::from_millis(50));

        let mut attrs = make_attributes("/bin/true", &[], &[]);
        let err = service.handle(Call::Start { attributes: attrs.clone() }).await;
        assert_eq!(err, Err(RpcError::Invalid(AttributesError::MissingFiles)));

        attrs.files = vec!["/dev/null".into()];
        attrs.cmd = String::new();
        let err = service.handle(Call::Start { attributes: attrs.clone() }).await;
        assert_eq!(err, Err(RpcError::Invalid(AttributesError::MissingCmd)));

        attrs.cmd = "/bin/true".into();
        attrs.dir = String::new();
        let err = service.handle(Call::Start { attributes: attrs }).await;
        assert_eq!(err, Err(RpcError::Invalid(AttributesError::MissingDir)));
    }

    #[tokio::test]
    async fn test_bad_grace_is_rejected() {
        let service = RpcService::new(Arc::new(Supervisor::default()), Duration::from_millis(50));
        let call = Call::Restart {
            uuid: "abc".into(),
            gracefully: Some("5 parsecs".into()),
        };
        assert!(matches!(service.handle(call).await, Err(RpcError::Grace(_))));
    }

    #[tokio::test]
    async fn test_submit_failure_is_surfaced() {
        let supervisor = Arc::new(Supervisor::new(EngineSettings {
            queue_capacity: 1,
            ..EngineSettings::default()
        }));
        let service = RpcService::new(supervisor, Duration::from_millis(50));
        let call = || Call::Signal {
            uuid: "abc".into(),
            signal: "TERM".into(),
        };
        assert_eq!(service.handle(call()).await, Ok(Reply::Ack));
        assert_eq!(
            service.handle(call()).await,
            Err(RpcError::Submit(SubmitError::Busy(Duration::from_millis(50))))
        );
    }

    // -- end to end --

    #[tokio::test]
    async fn test_tcp_start_list_kill() {
        let harness = Harness::new(Network::Tcp).await;
        let mut client = harness.client().await;

        assert!(client.list().await.unwrap().is_empty());
        client
            .start(make_attributes("/bin/sleep", &["sleep", "60"], &["/dev/null"]))
            .await
            .unwrap();
        assert!(
            wait_until(Duration::from_secs(5), || harness
                .supervisor
                .list()
                .first()
                .is_some_and(|m| m.alive))
            .await
        );

        let listed = client.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].alive);
        let uuid = listed[0].id.clone();

        client.kill(&uuid, true).await.unwrap();
        assert!(wait_until(Duration::from_secs(5), || harness.supervisor.list().is_empty()).await);
    }

    #[tokio::test]
    async fn test_unix_socket_round_trip() {
        let harness = Harness::new(Network::Unix).await;
        let mut client = harness.client().await;
        client
            .start(make_attributes("/bin/sleep", &["sleep", "60"], &["/dev/null"]))
            .await
            .unwrap();
        assert!(wait_until(Duration::from_secs(5), || harness.supervisor.list().len() == 1).await);
        let uuid = client.list().await.unwrap()[0].id.clone();

        client.signal(&uuid, "sig0").await.unwrap();
        client.stop(&uuid, Some("2s"), true).await.unwrap();
        assert!(wait_until(Duration::from_secs(5), || harness.supervisor.list().is_empty()).await);
    }

    #[tokio::test]
    async fn test_error_reply_keeps_connection_open() {
        let harness = Harness::new(Network::Tcp).await;
        let mut client = harness.client().await;

        let err = client
            .start(make_attributes("/bin/true", &[], &[]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("at least one file is required"));
        assert!(client.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_request_gets_error_frame() {
        let harness = Harness::new(Network::Tcp).await;
        let stream = TcpStream::connect(&harness.address).await.unwrap();
        let (reader, mut writer) = tokio::io::split(stream);
        let mut lines = BufReader::new(reader).lines();

        writer.write_all(b"{not json}\n").await.unwrap();
        let line = lines.next_line().await.unwrap().unwrap();
        let response: ResponseFrame = serde_json::from_str(&line).unwrap();
        assert_eq!(response.id, 0);
        assert!(response.outcome.unwrap_err().starts_with("malformed request"));
    }

    #[tokio::test]
    async fn test_oversized_request_gets_error_frame_and_close() {
        let harness = Harness::new(Network::Tcp).await;
        let stream = TcpStream::connect(&harness.address).await.unwrap();
        let (reader, mut writer) = tokio::io::split(stream);
        let mut lines = BufReader::new(reader).lines();

        // No newline: the server must give up once the limit is crossed.
        writer.write_all(&vec![b'a'; MAX_REQUEST_LEN + 1]).await.unwrap();
        let line = lines.next_line().await.unwrap().unwrap();
        let response: ResponseFrame = serde_json::from_str(&line).unwrap();
        assert_eq!(response.id, 0);
        assert!(response.outcome.unwrap_err().contains("exceeds"));
        assert!(lines.next_line().await.unwrap().is_none());

        // Other connections are unaffected.
        let mut client = harness.client().await;
        assert!(client.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_request_at_limit_is_served() {
        let harness = Harness::new(Network::Tcp).await;
        let stream = TcpStream::connect(&harness.address).await.unwrap();
        let (reader, mut writer) = tokio::io::split(stream);
        let mut lines = BufReader::new(reader).lines();

        let mut request = br#"{"id":9,"call":{"method":"list"}}"#.to_vec();
        request.resize(MAX_REQUEST_LEN, b' ');
        request.push(b'\n');
        writer.write_all(&request).await.unwrap();
        let line = lines.next_line().await.unwrap().unwrap();
        let response: ResponseFrame = serde_json::from_str(&line).unwrap();
        assert_eq!(response.id, 9);
        assert_eq!(response.outcome, Ok(Reply::List(Vec::new())));
    }

    #[tokio::test]
    async fn test_unknown_uuid_is_acknowledged() {
        let harness = Harness::new(Network::Tcp).await;
        let mut client = harness.client().await;
        client.kill("no-such-process", true).await.unwrap();
        client.restart("no-such-process", None).await.unwrap();
    }

    #[tokio::test]
    async fn test_stale_socket_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("procsup.sock");
        std::fs::write(&path, "stale").unwrap();

        let listener = Listener::bind(Network::Unix, path.to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(listener.local_address(), path.display().to_string());
        drop(listener);
        assert!(!path.exists());
    }
}
