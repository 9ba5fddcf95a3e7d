//! Identity handshake for freshly accepted connections.

use agent_control_core::{Connection, SessionDescriptor, TransportError};
use serde_json::Value;
use thiserror::Error;

/// Handshake error. No session is created when this is returned.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("Identity call failed: {0}")]
    Transport(#[from] TransportError),
}

/// Builds session descriptors from connected agents.
#[derive(Debug, Default, Clone, Copy)]
pub struct SessionFactory;

impl SessionFactory {
    /// Create a new session factory.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Run the identity round-trip and build the descriptor.
    ///
    /// Attributes the agent could not collect stay empty; only a failure of
    /// the call itself aborts the handshake.
    ///
    /// # Errors
    /// Returns error if the identity call cannot be completed.
    pub async fn handshake(
        &self,
        connection: &dyn Connection,
    ) -> Result<SessionDescriptor, HandshakeError> {
        let report = connection.call_identity().await?;

        let address = connection.peer_addr().map(|addr| addr.ip().to_string());
        let launcher = connection.info("launcher").map(value_text);
        let launcher_args = connection.info("launcher_args").map(value_list);

        tracing::debug!(
            connection_id = %connection.id(),
            address = address.as_deref().unwrap_or("?"),
            "Identity handshake completed"
        );

        Ok(SessionDescriptor::from_report(
            report,
            address,
            launcher,
            launcher_args,
        ))
    }
}

fn value_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

fn value_list(value: Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.into_iter().map(value_text).collect(),
        Value::Null => Vec::new(),
        other => vec![value_text(other)],
    }
}
