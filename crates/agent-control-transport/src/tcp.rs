//! Reference TCP transport: JSON lines over a plain socket.

use std::{
    collections::HashMap,
    io,
    net::SocketAddr,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use agent_control_core::{Connection, ConnectionId, IdentityReport, TransportError};
use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader, WriteHalf},
    net::{TcpListener, TcpStream},
    sync::{Notify, mpsc, oneshot},
};
use uuid::Uuid;

use crate::{
    profile::{
        Authenticator, BoxedStream, ConnectionEvent, Server, ServerFactory, ServerOptions,
        StreamFactory,
    },
    protocol::{AgentMessage, ServerMessage},
};

/// Name of the only transport the TCP server speaks.
pub const JSONL: &str = "jsonl";

/// Transport kwarg bounding how long a new agent may take to say hello.
pub const HELLO_TIMEOUT_KWARG: &str = "hello_timeout_secs";

const DEFAULT_HELLO_TIMEOUT: Duration = Duration::from_secs(30);

/// Pause after an accept error that is not tied to a single peer.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

type PendingCalls = HashMap<String, oneshot::Sender<Result<IdentityReport, TransportError>>>;

/// Binds [`TcpServer`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpServerFactory;

#[async_trait]
impl ServerFactory for TcpServerFactory {
    async fn bind(&self, options: ServerOptions) -> Result<Box<dyn Server>, TransportError> {
        if options.transport != JSONL {
            return Err(TransportError::Unsupported(options.transport));
        }
        let hello_timeout = options
            .transport_kwargs
            .get(HELLO_TIMEOUT_KWARG)
            .and_then(Value::as_u64)
            .map_or(DEFAULT_HELLO_TIMEOUT, Duration::from_secs);

        let listener = TcpListener::bind((options.address.as_str(), options.port)).await?;
        tracing::info!(
            addr = ?listener.local_addr().ok(),
            transport = JSONL,
            "TCP server listening"
        );

        Ok(Box::new(TcpServer {
            listener,
            stream: options.stream,
            authenticator: options.authenticator,
            hello_timeout,
        }))
    }
}

/// A bound TCP listener producing [`JsonLineConnection`]s.
pub struct TcpServer {
    listener: TcpListener,
    stream: Arc<dyn StreamFactory>,
    authenticator: Option<Arc<dyn Authenticator>>,
    hello_timeout: Duration,
}

#[async_trait]
impl Server for TcpServer {
    fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().ok()
    }

    async fn serve(
        self: Box<Self>,
        events: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Result<(), TransportError> {
        let Self {
            listener,
            stream,
            authenticator,
            hello_timeout,
        } = *self;

        loop {
            let (socket, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    let backoff = accept_backoff(&e);
                    tracing::warn!(?backoff, "Accept failed: {e}");
                    if let Some(backoff) = backoff {
                        tokio::time::sleep(backoff).await;
                    }
                    continue;
                }
            };
            if events.is_closed() {
                return Ok(());
            }
            tracing::debug!(%peer, "Accepted TCP connection");

            let stream = Arc::clone(&stream);
            let authenticator = authenticator.clone();
            let events = events.clone();
            tokio::spawn(async move {
                if let Err(e) =
                    handle_socket(socket, peer, stream, authenticator, hello_timeout, events).await
                {
                    tracing::warn!(%peer, "Connection dropped: {e}");
                }
            });
        }
    }
}

/// Backoff before the next accept, or `None` when only one peer was affected.
fn accept_backoff(error: &io::Error) -> Option<Duration> {
    match error.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionRefused
        | io::ErrorKind::Interrupted
        | io::ErrorKind::WouldBlock => None,
        _ => Some(ACCEPT_BACKOFF),
    }
}

async fn handle_socket(
    socket: TcpStream,
    peer: SocketAddr,
    stream: Arc<dyn StreamFactory>,
    authenticator: Option<Arc<dyn Authenticator>>,
    hello_timeout: Duration,
    events: mpsc::UnboundedSender<ConnectionEvent>,
) -> Result<(), TransportError> {
    if let Err(e) = socket.set_nodelay(true) {
        tracing::debug!(%peer, "Failed to set TCP_NODELAY: {e}");
    }
    let local = socket.local_addr().ok();
    let mut channel = stream.wrap(Box::new(socket));
    if let Some(authenticator) = &authenticator {
        authenticator.authenticate(&mut channel).await?;
    }

    let (reader, writer) = tokio::io::split(channel);
    let mut reader = BufReader::new(reader);
    let hello = tokio::time::timeout(hello_timeout, read_message(&mut reader))
        .await
        .map_err(|_| TransportError::Timeout("waiting for hello".into()))??;
    let AgentMessage::Hello {
        launcher,
        launcher_args,
    } = hello
    else {
        return Err(TransportError::Protocol("expected hello".into()));
    };

    let mut infos = Map::new();
    if let Some(launcher) = launcher {
        infos.insert("launcher".into(), Value::String(launcher));
    }
    infos.insert(
        "launcher_args".into(),
        Value::Array(launcher_args.into_iter().map(Value::String).collect()),
    );

    let conn = Arc::new(JsonLineConnection::new(peer, local, writer, infos));
    let handle: Arc<dyn Connection> = conn.clone();
    if events.send(ConnectionEvent::Accepted(Arc::clone(&handle))).is_err() {
        return Ok(());
    }

    let result = conn.read_loop(reader).await;
    conn.mark_closed();
    tracing::debug!(%peer, id = %conn.id, "Connection closed");
    let _ = events.send(ConnectionEvent::Closed(handle));
    result
}

/// Read the next non-empty line, trimmed.
async fn next_line<R>(reader: &mut R) -> Result<String, TransportError>
where
    R: AsyncBufRead + Unpin + Send,
{
    let mut buffer = String::new();
    loop {
        buffer.clear();
        if reader.read_line(&mut buffer).await? == 0 {
            return Err(TransportError::Closed);
        }
        let line = buffer.trim();
        if !line.is_empty() {
            return Ok(line.to_string());
        }
    }
}

/// Read the next non-empty line as an agent message.
async fn read_message<R>(reader: &mut R) -> Result<AgentMessage, TransportError>
where
    R: AsyncBufRead + Unpin + Send,
{
    let line = next_line(reader).await?;
    Ok(serde_json::from_str(&line)?)
}

/// A connection speaking newline-delimited JSON.
pub struct JsonLineConnection {
    id: ConnectionId,
    peer: SocketAddr,
    local: Option<SocketAddr>,
    writer: tokio::sync::Mutex<WriteHalf<BoxedStream>>,
    pending: Mutex<PendingCalls>,
    infos: Map<String, Value>,
    closed: AtomicBool,
    shutdown: Notify,
}

impl JsonLineConnection {
    fn new(
        peer: SocketAddr,
        local: Option<SocketAddr>,
        writer: WriteHalf<BoxedStream>,
        infos: Map<String, Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer,
            local,
            writer: tokio::sync::Mutex::new(writer),
            pending: Mutex::new(HashMap::new()),
            infos,
            closed: AtomicBool::new(false),
            shutdown: Notify::new(),
        }
    }

    async fn send_json(&self, message: &ServerMessage) -> Result<(), TransportError> {
        let line = message.to_line()?;
        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Send a keepalive.
    ///
    /// # Errors
    /// Returns error if write fails.
    pub async fn ping(&self) -> Result<(), TransportError> {
        self.send_json(&ServerMessage::Ping).await
    }

    async fn read_loop<R>(&self, mut reader: R) -> Result<(), TransportError>
    where
        R: AsyncBufRead + Unpin + Send,
    {
        loop {
            let line = tokio::select! {
                line = next_line(&mut reader) => line,
                () = self.shutdown.notified() => return Ok(()),
            };
            match line {
                Ok(line) => match serde_json::from_str::<AgentMessage>(&line) {
                    Ok(message) => self.dispatch(message),
                    Err(e) => self.reject(&line, &e),
                },
                Err(TransportError::Closed) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    /// Fail the call a malformed reply belongs to, if it names one.
    fn reject(&self, line: &str, error: &serde_json::Error) {
        let request_id = serde_json::from_str::<Value>(line).ok().and_then(|v| {
            v.get("request_id")
                .and_then(Value::as_str)
                .map(ToString::to_string)
        });
        match request_id {
            Some(request_id) => self.complete(
                &request_id,
                Err(TransportError::Protocol(format!("unusable reply: {error}"))),
            ),
            None => tracing::warn!(peer = %self.peer, "Ignoring malformed message: {error}"),
        }
    }

    fn dispatch(&self, message: AgentMessage) {
        match message {
            AgentMessage::Identity { request_id, report } => self.complete(&request_id, Ok(report)),
            AgentMessage::Error {
                request_id,
                message,
            } => self.complete(&request_id, Err(TransportError::Remote(message))),
            AgentMessage::Pong => tracing::trace!(peer = %self.peer, "Pong"),
            AgentMessage::Hello { .. } => {
                tracing::debug!(peer = %self.peer, "Ignoring repeated hello");
            }
        }
    }

    fn complete(&self, request_id: &str, result: Result<IdentityReport, TransportError>) {
        let sender = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(request_id);
        match sender {
            Some(tx) => {
                let _ = tx.send(result);
            }
            None => tracing::debug!(peer = %self.peer, request_id, "Reply to unknown request"),
        }
    }

    /// Mark closed and fail every outstanding call.
    fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[async_trait]
impl Connection for JsonLineConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        Some(self.peer)
    }

    fn server_addr(&self) -> Option<SocketAddr> {
        self.local
    }

    fn info(&self, key: &str) -> Option<Value> {
        self.infos.get(key).cloned()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn call_identity(&self) -> Result<IdentityReport, TransportError> {
        let request_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            if self.is_closed() {
                return Err(TransportError::Closed);
            }
            pending.insert(request_id.clone(), tx);
        }

        let request = ServerMessage::GetIdentity {
            request_id: request_id.clone(),
        };
        if let Err(e) = self.send_json(&request).await {
            self.pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&request_id);
            return Err(e);
        }

        rx.await.map_err(|_| TransportError::Closed)?
    }

    async fn close(&self) {
        self.mark_closed();
        self.shutdown.notify_one();
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            tracing::debug!(peer = %self.peer, "Shutdown failed: {e}");
        }
        tracing::debug!(peer = %self.peer, id = %self.id, "Connection dropped by server");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_backoff_only_for_listener_errors() {
        let peer_gone = io::Error::from(io::ErrorKind::ConnectionAborted);
        assert_eq!(accept_backoff(&peer_gone), None);
        let reset = io::Error::from(io::ErrorKind::ConnectionReset);
        assert_eq!(accept_backoff(&reset), None);

        let too_many_files = io::Error::other("Too many open files");
        assert_eq!(accept_backoff(&too_many_files), Some(ACCEPT_BACKOFF));
    }
}
