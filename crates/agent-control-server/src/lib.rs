//! Server orchestration for connected agents.
//!
//! Provides:
//! - `ServerConfig` - Layered listener configuration
//! - `ServerOrchestrator` - Handler gate, transport startup, connection routing and job dispatch

pub mod config;
pub mod orchestrator;

pub use config::{ConfigError, ServerConfig};
pub use orchestrator::{JobError, ServerError, ServerOrchestrator, ServerState};
