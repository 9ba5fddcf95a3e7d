//! Lookup errors shared by the session and job registries.

use thiserror::Error;

/// Error returned when looking up a registry entry by its textual id.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    #[error("{kind} id must be an integer, got {key:?}")]
    InvalidArgument { kind: &'static str, key: String },
    #[error("{id}: no such {kind}")]
    NotFound { kind: &'static str, id: u64 },
}

/// Parse a textual registry key into a numeric id.
pub(crate) fn parse_id(kind: &'static str, key: &str) -> Result<u64, LookupError> {
    key.trim()
        .parse::<u64>()
        .map_err(|_| LookupError::InvalidArgument {
            kind,
            key: key.to_string(),
        })
}
