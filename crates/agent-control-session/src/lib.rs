//! Session and job registries for connected agents.
//!
//! Provides:
//! - `SessionRegistry` - Searchable store of live sessions
//! - `SessionFactory` - Identity handshake for accepted connections
//! - `JobRegistry` - Store of dispatched module jobs

pub mod error;
pub mod factory;
pub mod jobs;
pub mod registry;
pub mod search;

#[cfg(test)]
mod test_support;

pub use error::LookupError;
pub use factory::{HandshakeError, SessionFactory};
pub use jobs::{Job, JobId, JobRegistry, NewJob};
pub use registry::{ConnectHook, Session, SessionRegistry};
pub use search::SessionQuery;
