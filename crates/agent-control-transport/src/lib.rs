//! Transport layer between the server and agents.
//!
//! Provides:
//! - Transport profiles and the server/stream/authenticator seams
//! - Wire protocol (JSON lines)
//! - Reference TCP transport (feature: tcp)

pub mod auth;
pub mod profile;
pub mod protocol;

#[cfg(feature = "tcp")]
pub mod tcp;

pub use auth::{PresharedKeyAuthenticator, PresharedKeyFactory};
pub use profile::{
    AsyncStream, Authenticator, AuthenticatorFactory, BoxedStream, ConnectionEvent, PlainStream,
    Server, ServerFactory, ServerOptions, StreamFactory, TransportProfile, TransportRegistry,
};
pub use protocol::{AgentMessage, ServerMessage};
#[cfg(feature = "tcp")]
pub use tcp::{JSONL, JsonLineConnection, TcpServer, TcpServerFactory};
