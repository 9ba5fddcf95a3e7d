//! Registry of live agent sessions.

use std::{
    collections::BTreeMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock},
};

use agent_control_core::{Connection, Handler, SessionDescriptor, SessionEvent, SessionId};
use async_trait::async_trait;

use crate::{
    error::{LookupError, parse_id},
    search::SessionQuery,
};

/// One live agent connection with its identity snapshot.
pub struct Session {
    id: SessionId,
    connection: Arc<dyn Connection>,
    descriptor: SessionDescriptor,
}

impl Session {
    /// Registry-assigned id.
    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// Shared handle to the owning connection.
    #[must_use]
    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    /// Identity attributes collected at handshake.
    #[must_use]
    pub const fn descriptor(&self) -> &SessionDescriptor {
        &self.descriptor
    }

    /// Whether this session is bound to `connection` (handle identity).
    #[must_use]
    pub fn is_bound_to(&self, connection: &Arc<dyn Connection>) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.connection), Arc::as_ptr(connection))
    }

    /// Rendered attribute value; `id` is searchable alongside the descriptor.
    #[must_use]
    pub fn attribute(&self, field: &str) -> Option<String> {
        if field == "id" {
            Some(self.id.to_string())
        } else {
            self.descriptor.get(field)
        }
    }

    /// `id` followed by every descriptor attribute.
    pub fn attributes(&self) -> impl Iterator<Item = (&'static str, Option<String>)> + '_ {
        std::iter::once(("id", Some(self.id.to_string()))).chain(self.descriptor.fields())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("connection", &self.connection.id())
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

/// Hook run after a session is registered, outside the registry lock.
#[async_trait]
pub trait ConnectHook: Send + Sync {
    /// Called once per new session.
    async fn on_connect(&self, session: Arc<Session>);
}

struct Inner {
    sessions: BTreeMap<SessionId, Arc<Session>>,
    next_id: SessionId,
}

/// Thread-safe store of live sessions.
///
/// Every read and write goes through one exclusive lock, so id assignment,
/// insertion and scan-for-removal never interleave.
pub struct SessionRegistry {
    inner: Mutex<Inner>,
    handler: RwLock<Option<Arc<dyn Handler>>>,
    hooks: Vec<Arc<dyn ConnectHook>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                sessions: BTreeMap::new(),
                next_id: 1,
            }),
            handler: RwLock::new(None),
            hooks: Vec::new(),
        }
    }

    /// Add a hook run for every new session.
    #[must_use]
    pub fn with_connect_hook(mut self, hook: Arc<dyn ConnectHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Attach the display handler notified of opened/closed sessions.
    pub fn attach_handler(&self, handler: Arc<dyn Handler>) {
        *self.handler.write().unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, event: &SessionEvent) {
        let handler = self
            .handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(handler) = handler {
            handler.display_info(event);
        }
    }

    /// Register a new session and return it.
    ///
    /// Connect hooks run after the registry lock has been released.
    pub async fn add_session(
        &self,
        descriptor: SessionDescriptor,
        connection: Arc<dyn Connection>,
    ) -> Arc<Session> {
        let session = {
            let mut inner = self.lock();
            let id = inner.next_id;
            inner.next_id += 1;

            let session = Arc::new(Session {
                id,
                connection,
                descriptor,
            });
            inner.sessions.insert(id, Arc::clone(&session));

            self.notify(&SessionEvent::Opened {
                session_id: id,
                server: session.connection.server_addr(),
                client: session.connection.peer_addr(),
            });
            session
        };

        tracing::info!(
            session_id = session.id,
            connection_id = %session.connection.id(),
            "Session opened: {}",
            session.descriptor
        );

        for hook in &self.hooks {
            hook.on_connect(Arc::clone(&session)).await;
        }

        session
    }

    /// Remove the session bound to `connection`, if any.
    ///
    /// Removing an unknown connection is a no-op.
    pub fn remove_session(&self, connection: &Arc<dyn Connection>) -> Option<Arc<Session>> {
        let mut inner = self.lock();
        let id = inner
            .sessions
            .values()
            .find(|s| s.is_bound_to(connection))
            .map(|s| s.id)?;
        let removed = inner.sessions.remove(&id)?;

        self.notify(&SessionEvent::Closed { session_id: id });
        tracing::info!(session_id = id, connection_id = %connection.id(), "Session closed");

        Some(removed)
    }

    /// Sessions matching `query`, ordered by id.
    #[must_use]
    pub fn search(&self, query: &str) -> Vec<Arc<Session>> {
        let query = SessionQuery::parse(query);
        self.lock()
            .sessions
            .values()
            .filter(|s| query.matches(s))
            .cloned()
            .collect()
    }

    /// All sessions, ordered by id.
    #[must_use]
    pub fn list(&self) -> Vec<Arc<Session>> {
        self.lock().sessions.values().cloned().collect()
    }

    /// Look up a session by its textual id.
    ///
    /// # Errors
    /// Returns `InvalidArgument` if `key` is not an integer and `NotFound`
    /// if no live session has that id.
    pub fn get_session(&self, key: &str) -> Result<Arc<Session>, LookupError> {
        let id = parse_id("session", key)?;
        self.lock()
            .sessions
            .get(&id)
            .cloned()
            .ok_or(LookupError::NotFound { kind: "session", id })
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().sessions.len()
    }

    /// Whether no session is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use agent_control_core::EventStore;

    use super::*;
    use crate::test_support::{MockConnection, descriptor};

    #[tokio::test]
    async fn test_ids_start_at_one_and_are_never_reused() {
        let registry = SessionRegistry::new();
        let a = MockConnection::new();
        let b = MockConnection::new();

        let first = registry.add_session(descriptor("alice", "ws01", "Windows"), a.clone()).await;
        assert_eq!(first.id(), 1);

        registry.remove_session(&a);
        let second = registry.add_session(descriptor("bob", "srv", "Linux"), b).await;
        assert_eq!(second.id(), 2);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let store = Arc::new(EventStore::new());
        let registry = SessionRegistry::new();
        registry.attach_handler(store.clone());

        let conn = MockConnection::new();
        registry.add_session(descriptor("alice", "ws01", "Windows"), conn.clone()).await;

        assert!(registry.remove_session(&conn).is_some());
        assert!(registry.remove_session(&conn).is_none());
        assert!(registry.is_empty());

        let texts: Vec<_> = store.get_history().iter().map(ToString::to_string).collect();
        assert_eq!(
            texts,
            vec![
                "Session 1 opened (10.0.0.1:4433 <- 192.168.1.20:50312)".to_string(),
                "Session 1 closed".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_remove_matches_handle_not_equal_fields() {
        let registry = SessionRegistry::new();
        let kept = MockConnection::new();
        let other = MockConnection::new();
        registry.add_session(descriptor("alice", "ws01", "Windows"), kept).await;

        assert!(registry.remove_session(&other).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_no_notification_without_handler() {
        let registry = SessionRegistry::new();
        let conn = MockConnection::new();
        registry.add_session(descriptor("alice", "ws01", "Windows"), conn.clone()).await;
        assert!(registry.remove_session(&conn).is_some());
    }

    struct CountingHook(AtomicUsize);

    #[async_trait]
    impl ConnectHook for CountingHook {
        async fn on_connect(&self, session: Arc<Session>) {
            assert!(session.id() > 0);
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_connect_hook_runs_per_session() {
        let hook = Arc::new(CountingHook(AtomicUsize::new(0)));
        let registry = SessionRegistry::new().with_connect_hook(hook.clone());

        registry.add_session(descriptor("a", "h1", "Linux"), MockConnection::new()).await;
        registry.add_session(descriptor("b", "h2", "Linux"), MockConnection::new()).await;

        assert_eq!(hook.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_get_session_errors() {
        let registry = SessionRegistry::new();
        registry.add_session(descriptor("a", "h1", "Linux"), MockConnection::new()).await;

        assert_eq!(registry.get_session("1").map(|s| s.id()), Ok(1));
        assert_eq!(
            registry.get_session("one").map(|s| s.id()),
            Err(LookupError::InvalidArgument {
                kind: "session",
                key: "one".into(),
            })
        );
        assert_eq!(
            registry.get_session("9").map(|s| s.id()),
            Err(LookupError::NotFound { kind: "session", id: 9 })
        );
    }
}
