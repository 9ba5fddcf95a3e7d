//! Wire protocol between the server and agents (JSON, one message per line).

use agent_control_core::IdentityReport;
use serde::{Deserialize, Serialize};

/// Message from server to agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Ask the agent to self-report its identity.
    GetIdentity { request_id: String },
    /// Keepalive.
    Ping,
}

/// Message from agent to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentMessage {
    /// First message after authentication, carrying launch metadata.
    Hello {
        #[serde(default)]
        launcher: Option<String>,
        #[serde(default)]
        launcher_args: Vec<String>,
    },
    /// Answer to `get_identity`.
    Identity {
        request_id: String,
        report: IdentityReport,
    },
    /// A request failed on the agent.
    Error { request_id: String, message: String },
    /// Keepalive answer.
    Pong,
}

impl ServerMessage {
    /// Encode as one newline-terminated line.
    ///
    /// # Errors
    /// Returns error if serialization fails.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

impl AgentMessage {
    /// Encode as one newline-terminated line.
    ///
    /// # Errors
    /// Returns error if serialization fails.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}
