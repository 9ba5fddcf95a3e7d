//! Core abstractions for agent session orchestration.
//!
//! This crate provides the fundamental building blocks:
//! - `SessionDescriptor` - Named identity attributes of a connected agent
//! - `IdentityReport` - Wire form of the agent's identity self-report
//! - `Connection` - Established call channel to an agent
//! - `Handler` - Display collaborator for lifecycle events
//! - `EventStore` - Broadcast + history feed of lifecycle events

pub mod descriptor;
pub mod event_store;
pub mod traits;

pub use descriptor::{DESCRIPTOR_FIELDS, IdentityProbe, IdentityReport, SessionDescriptor};
pub use event_store::{EventStore, SessionEvent};
pub use traits::{Connection, ConnectionId, Handler, SessionId, TransportError};
