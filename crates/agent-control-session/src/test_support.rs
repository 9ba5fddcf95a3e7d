//! In-process connection double for unit tests.

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use agent_control_core::{
    Connection, ConnectionId, IdentityReport, SessionDescriptor, TransportError,
};
use async_trait::async_trait;
use serde_json::{Value, json};
use uuid::Uuid;

pub struct MockConnection {
    id: ConnectionId,
    report: Option<IdentityReport>,
    closed: AtomicBool,
}

impl MockConnection {
    pub fn new() -> Arc<dyn Connection> {
        Self::reporting(Some(IdentityReport::default()))
    }

    /// A connection whose identity call answers with `report`, or fails
    /// with `Closed` when `report` is `None`.
    pub fn reporting(report: Option<IdentityReport>) -> Arc<dyn Connection> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            report,
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        "192.168.1.20:50312".parse().ok()
    }

    fn server_addr(&self) -> Option<SocketAddr> {
        "10.0.0.1:4433".parse().ok()
    }

    fn info(&self, key: &str) -> Option<Value> {
        match key {
            "launcher" => Some(json!("connect")),
            "launcher_args" => Some(json!(["--host", "10.0.0.1:4433"])),
            _ => None,
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn call_identity(&self) -> Result<IdentityReport, TransportError> {
        self.report.clone().ok_or(TransportError::Closed)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

pub fn descriptor(user: &str, hostname: &str, platform: &str) -> SessionDescriptor {
    SessionDescriptor {
        user: Some(user.to_string()),
        hostname: Some(hostname.to_string()),
        platform: Some(platform.to_string()),
        ..SessionDescriptor::default()
    }
}
