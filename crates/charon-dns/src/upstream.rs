use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::debug;

/// Relays query datagrams to a primary/secondary upstream pair over UDP.
/// One ephemeral socket per call; the secondary is tried once when the
/// primary times out or errors.
pub struct UpstreamForwarder {
    primary: SocketAddr,
    secondary: SocketAddr,
    timeout: Duration,
}

impl UpstreamForwarder {
    pub fn new(primary: SocketAddr, secondary: SocketAddr, timeout_ms: u64) -> Self {
        Self {
            primary,
            secondary,
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    /// Forward the exact received query bytes upstream and return the
    /// reply. The query is relayed unchanged, so the upstream's reply
    /// carries the client's own ID.
    pub async fn forward(&self, query: &[u8]) -> Result<Vec<u8>> {
        if query.len() < 12 {
            anyhow::bail!("query too short to forward");
        }

        for server in [self.primary, self.secondary] {
            match self.attempt(query, server).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    debug!("upstream {} failed: {}", server, e);
                }
            }
        }

        anyhow::bail!("all upstream servers failed")
    }

    async fn attempt(&self, query: &[u8], server: SocketAddr) -> Result<Vec<u8>> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.send_to(query, server).await?;

        let mut buf = vec![0u8; 4096];
        // Use recv_from to validate the source address (RFC 5452)
        let (len, src) = timeout(self.timeout, socket.recv_from(&mut buf)).await??;
        buf.truncate(len);

        if src.ip() != server.ip() {
            anyhow::bail!("response from unexpected source {} (expected {})", src.ip(), server.ip());
        }

        if buf.len() < 12 {
            anyhow::bail!("response too short: {} bytes", buf.len());
        }

        // Defensive: the relayed query kept its ID, so the reply must too
        if buf[0..2] != query[0..2] {
            anyhow::bail!(
                "TXID mismatch: expected {:02x}{:02x}, got {:02x}{:02x}",
                query[0],
                query[1],
                buf[0],
                buf[1]
            );
        }

        // Validate QR bit is set (this is a response)
        if buf[2] & 0x80 == 0 {
            anyhow::bail!("response missing QR flag");
        }

        Ok(buf)
    }
}
