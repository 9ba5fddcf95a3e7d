//! Pre-shared key authenticator.

use std::sync::Arc;

use agent_control_core::TransportError;
use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::profile::{Authenticator, AuthenticatorFactory, BoxedStream};

/// Longest key line accepted from a peer.
const MAX_KEY_LINE: usize = 512;

/// Requires the agent's first line to equal a shared key.
///
/// The server answers `OK` on success and `DENIED` before closing otherwise.
pub struct PresharedKeyAuthenticator {
    key: String,
}

impl PresharedKeyAuthenticator {
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

async fn read_key_line(stream: &mut BoxedStream) -> Result<Vec<u8>, TransportError> {
    let mut line = Vec::new();
    loop {
        let byte = match stream.read_u8().await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(TransportError::Closed);
            }
            Err(e) => return Err(e.into()),
        };
        if byte == b'\n' {
            break;
        }
        if line.len() >= MAX_KEY_LINE {
            return Err(TransportError::Authentication("key line too long".into()));
        }
        line.push(byte);
    }
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    Ok(line)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[async_trait]
impl Authenticator for PresharedKeyAuthenticator {
    async fn authenticate(&self, stream: &mut BoxedStream) -> Result<(), TransportError> {
        let offered = read_key_line(stream).await?;
        if constant_time_eq(&offered, self.key.as_bytes()) {
            stream.write_all(b"OK\n").await?;
            stream.flush().await?;
            Ok(())
        } else {
            let _ = stream.write_all(b"DENIED\n").await;
            Err(TransportError::Authentication("invalid key".into()))
        }
    }
}

/// Factory handing out [`PresharedKeyAuthenticator`]s for one key.
#[derive(Clone)]
pub struct PresharedKeyFactory {
    key: String,
}

impl PresharedKeyFactory {
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl AuthenticatorFactory for PresharedKeyFactory {
    fn create(&self) -> Arc<dyn Authenticator> {
        Arc::new(PresharedKeyAuthenticator::new(self.key.clone()))
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::duplex;

    use super::*;

    #[tokio::test]
    async fn test_accepts_matching_key() {
        let (mut agent, server) = duplex(64);
        let mut server: BoxedStream = Box::new(server);
        agent.write_all(b"s3cret\r\n").await.unwrap();

        let auth = PresharedKeyFactory::new("s3cret").create();
        auth.authenticate(&mut server).await.unwrap();

        let mut reply = [0u8; 3];
        agent.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"OK\n");
    }

    #[tokio::test]
    async fn test_rejects_wrong_key() {
        let (mut agent, server) = duplex(64);
        let mut server: BoxedStream = Box::new(server);
        agent.write_all(b"guess\n").await.unwrap();

        let err = PresharedKeyAuthenticator::new("s3cret")
            .authenticate(&mut server)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Authentication(_)));
    }

    #[tokio::test]
    async fn test_eof_before_key() {
        let (agent, server) = duplex(64);
        let mut server: BoxedStream = Box::new(server);
        drop(agent);

        let err = PresharedKeyAuthenticator::new("k")
            .authenticate(&mut server)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }
}
