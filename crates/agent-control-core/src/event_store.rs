//! Broadcast + history store for session lifecycle events.

use std::{
    collections::VecDeque,
    fmt,
    net::SocketAddr,
    sync::{PoisonError, RwLock},
};

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::{Handler, SessionId};

/// Default number of events kept for late subscribers.
const HISTORY_LIMIT: usize = 1024;

/// Session lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A handshake completed and a session was registered.
    Opened {
        session_id: SessionId,
        server: Option<SocketAddr>,
        client: Option<SocketAddr>,
    },
    /// A session's connection closed and the session was removed.
    Closed { session_id: SessionId },
}

impl SessionEvent {
    /// Session the event refers to.
    #[must_use]
    pub const fn session_id(&self) -> SessionId {
        match self {
            Self::Opened { session_id, .. } | Self::Closed { session_id } => *session_id,
        }
    }
}

fn endpoint(addr: Option<&SocketAddr>) -> (String, String) {
    addr.map_or_else(
        || ("?".to_string(), "?".to_string()),
        |a| (a.ip().to_string(), a.port().to_string()),
    )
}

impl fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Opened {
                session_id,
                server,
                client,
            } => {
                let (server_ip, server_port) = endpoint(server.as_ref());
                let (client_ip, client_port) = endpoint(client.as_ref());
                write!(
                    f,
                    "Session {session_id} opened ({server_ip}:{server_port} <- {client_ip}:{client_port})"
                )
            }
            Self::Closed { session_id } => write!(f, "Session {session_id} closed"),
        }
    }
}

/// Event store with broadcast and history support.
///
/// A display layer that attaches late receives history first and then
/// switches to live events.
pub struct EventStore {
    history: RwLock<VecDeque<SessionEvent>>,
    limit: usize,
    sender: broadcast::Sender<SessionEvent>,
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStore {
    /// Create a new event store.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limit(HISTORY_LIMIT)
    }

    /// Create a store keeping at most `limit` events of history.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        let (sender, _) = broadcast::channel(limit.max(1));
        Self {
            history: RwLock::new(VecDeque::with_capacity(32)),
            limit,
            sender,
        }
    }

    /// Push an event to both live listeners and history.
    pub fn push(&self, event: SessionEvent) {
        let _ = self.sender.send(event.clone()); // live listeners

        let mut history = self.history.write().unwrap_or_else(PoisonError::into_inner);
        while history.len() >= self.limit {
            if history.pop_front().is_none() {
                break;
            }
        }
        if self.limit > 0 {
            history.push_back(event);
        }
    }

    /// Get a receiver for live events.
    #[must_use]
    pub fn get_receiver(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    /// Get a snapshot of the history.
    #[must_use]
    pub fn get_history(&self) -> Vec<SessionEvent> {
        self.history
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Stream that yields history first, then live events.
    #[must_use]
    pub fn history_plus_stream(&self) -> futures::stream::BoxStream<'static, SessionEvent> {
        let (history, rx) = (self.get_history(), self.get_receiver());

        let hist = futures::stream::iter(history);
        let live = BroadcastStream::new(rx).filter_map(|res| async move {
            if let Err(e) = &res {
                tracing::debug!("Event subscriber lagged: {e}");
            }
            res.ok()
        });

        Box::pin(hist.chain(live))
    }
}

impl Handler for EventStore {
    fn display_info(&self, event: &SessionEvent) {
        self.push(event.clone());
    }
}
