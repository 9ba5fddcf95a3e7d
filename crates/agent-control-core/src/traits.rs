//! Core traits for connections and lifecycle notification.

use std::net::SocketAddr;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::{IdentityReport, SessionEvent};

/// Session identifier, assigned by the session registry.
pub type SessionId = u64;

/// Identifier of a transport connection, used for logging only.
///
/// Connections are matched by handle identity, never by this id.
pub type ConnectionId = Uuid;

/// Transport error.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection closed")]
    Closed,
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Remote error: {0}")]
    Remote(String),
    #[error("Unsupported transport: {0}")]
    Unsupported(String),
    #[error("Authentication failed: {0}")]
    Authentication(String),
    #[error("Timed out: {0}")]
    Timeout(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// An established, authenticated bidirectional call channel to an agent.
///
/// The transport owns the connection; sessions only hold a shared handle
/// for identity and lifecycle checks.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Connection id for log correlation.
    fn id(&self) -> ConnectionId;

    /// Remote endpoint of the underlying socket.
    fn peer_addr(&self) -> Option<SocketAddr>;

    /// Local endpoint the agent connected to.
    fn server_addr(&self) -> Option<SocketAddr>;

    /// Transport-level session metadata (`launcher`, `launcher_args`, ...).
    fn info(&self, key: &str) -> Option<Value>;

    /// Whether the transport has observed the connection closing.
    fn is_closed(&self) -> bool;

    /// Ask the agent to self-report its identity attributes.
    ///
    /// # Errors
    /// Returns error if the round-trip cannot be completed.
    async fn call_identity(&self) -> Result<IdentityReport, TransportError>;

    /// Drop the connection. Outstanding and later calls fail with `Closed`.
    async fn close(&self);
}

/// Display collaborator notified of session lifecycle events.
pub trait Handler: Send + Sync {
    /// Show a server-side informational event.
    fn display_info(&self, event: &SessionEvent);
}
