//! Named transport profiles and the server/stream/authenticator seams.

use std::{collections::BTreeMap, fmt, net::SocketAddr, sync::Arc};

use agent_control_core::{Connection, TransportError};
use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::mpsc,
};

/// Byte stream a connection runs over.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

/// Boxed byte stream.
pub type BoxedStream = Box<dyn AsyncStream>;

/// Wraps accepted sockets into the profile's stream layer.
pub trait StreamFactory: Send + Sync {
    fn wrap(&self, stream: BoxedStream) -> BoxedStream;
}

/// Pass-through stream layer.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainStream;

impl StreamFactory for PlainStream {
    fn wrap(&self, stream: BoxedStream) -> BoxedStream {
        stream
    }
}

/// Authenticates a freshly accepted stream before any protocol traffic.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// # Errors
    /// Returns error if the peer is rejected or the exchange fails.
    async fn authenticate(&self, stream: &mut BoxedStream) -> Result<(), TransportError>;
}

/// Creates the authenticator a server instance uses.
pub trait AuthenticatorFactory: Send + Sync {
    fn create(&self) -> Arc<dyn Authenticator>;
}

/// Connection lifecycle reported by a running server.
pub enum ConnectionEvent {
    /// A connection is established and ready for the identity call.
    Accepted(Arc<dyn Connection>),
    /// A previously accepted connection closed.
    Closed(Arc<dyn Connection>),
}

impl fmt::Debug for ConnectionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accepted(c) => f.debug_tuple("Accepted").field(&c.id()).finish(),
            Self::Closed(c) => f.debug_tuple("Closed").field(&c.id()).finish(),
        }
    }
}

/// Everything a server factory needs to bind a listener.
#[derive(Clone)]
pub struct ServerOptions {
    pub address: String,
    pub port: u16,
    pub stream: Arc<dyn StreamFactory>,
    pub authenticator: Option<Arc<dyn Authenticator>>,
    pub transport: String,
    pub transport_kwargs: Map<String, Value>,
}

/// A bound listener.
#[async_trait]
pub trait Server: Send + Sync {
    /// Address the listener is bound to.
    fn local_addr(&self) -> Option<SocketAddr>;

    /// Accept connections until the listener fails or `events` is closed.
    ///
    /// # Errors
    /// Returns error if the listener itself fails.
    async fn serve(
        self: Box<Self>,
        events: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Result<(), TransportError>;
}

/// Binds servers for a profile.
#[async_trait]
pub trait ServerFactory: Send + Sync {
    /// # Errors
    /// Returns error if the transport is unsupported or binding fails.
    async fn bind(&self, options: ServerOptions) -> Result<Box<dyn Server>, TransportError>;
}

/// A named bundle of server, stream and authenticator implementations.
#[derive(Clone)]
pub struct TransportProfile {
    pub server: Arc<dyn ServerFactory>,
    pub stream: Arc<dyn StreamFactory>,
    pub authenticator: Option<Arc<dyn AuthenticatorFactory>>,
    pub transport: String,
    pub transport_kwargs: Map<String, Value>,
}

impl TransportProfile {
    /// Create a profile without authenticator or kwargs.
    pub fn new(
        server: Arc<dyn ServerFactory>,
        stream: Arc<dyn StreamFactory>,
        transport: impl Into<String>,
    ) -> Self {
        Self {
            server,
            stream,
            authenticator: None,
            transport: transport.into(),
            transport_kwargs: Map::new(),
        }
    }

    /// Set the authenticator factory.
    #[must_use]
    pub fn with_authenticator(mut self, authenticator: Arc<dyn AuthenticatorFactory>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    /// Set one transport parameter.
    #[must_use]
    pub fn with_kwarg(mut self, key: impl Into<String>, value: Value) -> Self {
        self.transport_kwargs.insert(key.into(), value);
        self
    }

    /// Server options for `address:port`, creating a fresh authenticator.
    #[must_use]
    pub fn server_options(&self, address: &str, port: u16) -> ServerOptions {
        ServerOptions {
            address: address.to_string(),
            port,
            stream: Arc::clone(&self.stream),
            authenticator: self.authenticator.as_ref().map(|f| f.create()),
            transport: self.transport.clone(),
            transport_kwargs: self.transport_kwargs.clone(),
        }
    }
}

/// Registry of transport profiles by name.
#[derive(Clone, Default)]
pub struct TransportRegistry {
    profiles: BTreeMap<String, TransportProfile>,
}

impl TransportRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in profiles (`tcp`).
    #[cfg(feature = "tcp")]
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(
            "tcp",
            TransportProfile::new(
                Arc::new(crate::tcp::TcpServerFactory),
                Arc::new(PlainStream),
                crate::tcp::JSONL,
            ),
        );
        registry
    }

    /// Register or replace a profile.
    pub fn register(&mut self, name: impl Into<String>, profile: TransportProfile) {
        self.profiles.insert(name.into(), profile);
    }

    /// Look up a profile.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&TransportProfile> {
        self.profiles.get(name)
    }

    /// Registered profile names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.profiles.keys().cloned().collect()
    }
}
