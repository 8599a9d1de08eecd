//! MCP transport layer.
//!
//! Defines the `McpTransport` trait for sending/receiving JSON-RPC messages,
//! a `LineTransport` for newline-delimited JSON over any async byte stream
//! (a child's stdio in production), and an in-memory `ChannelTransport`.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::McpError;

/// Trait for MCP message transport.
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Read the next JSON-RPC message line from the transport.
    /// Returns `None` when the transport is closed.
    ///
    /// Must be cancel safe: a dropped `receive` future may not lose data.
    async fn receive(&mut self) -> Result<Option<String>, McpError>;

    /// Write a JSON-RPC message line to the transport.
    ///
    /// Not cancel safe: a dropped `send` may leave part of a line written.
    async fn send(&mut self, message: &str) -> Result<(), McpError>;

    /// Close the sending half. For a child process this closes its stdin,
    /// which is the polite way to ask a stdio server to exit.
    async fn close(&mut self) -> Result<(), McpError> {
        Ok(())
    }
}

/// Newline-delimited JSON over a reader/writer pair.
pub struct LineTransport<R, W> {
    reader: BufReader<R>,
    writer: Option<W>,
    /// Bytes of a line whose read was interrupted.
    pending: Vec<u8>,
}

impl<R, W> LineTransport<R, W>
where
    R: AsyncRead + Unpin + Send + Sync,
    W: AsyncWrite + Unpin + Send + Sync,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer: Some(writer),
            pending: Vec::new(),
        }
    }
}

#[async_trait]
impl<R, W> McpTransport for LineTransport<R, W>
where
    R: AsyncRead + Unpin + Send + Sync,
    W: AsyncWrite + Unpin + Send + Sync,
{
    async fn receive(&mut self) -> Result<Option<String>, McpError> {
        loop {
            // read_until keeps partial bytes in `pending` if cancelled
            let n = self.reader.read_until(b'\n', &mut self.pending).await?;
            if n == 0 && self.pending.is_empty() {
                return Ok(None); // EOF
            }
            let line = String::from_utf8_lossy(&self.pending).trim().to_string();
            self.pending.clear();
            if n == 0 && line.is_empty() {
                return Ok(None);
            }
            if !line.is_empty() {
                return Ok(Some(line));
            }
        }
    }

    async fn send(&mut self, message: &str) -> Result<(), McpError> {
        let writer = self.writer.as_mut().ok_or(McpError::Closed)?;
        writer.write_all(message.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), McpError> {
        if let Some(mut writer) = self.writer.take() {
            writer.shutdown().await?;
        }
        Ok(())
    }
}

/// In-memory transport backed by channel pairs.
pub struct ChannelTransport {
    rx: tokio::sync::mpsc::Receiver<String>,
    tx: Option<tokio::sync::mpsc::Sender<String>>,
}

impl ChannelTransport {
    /// Create a pair of connected transports.
    ///
    /// Messages sent on one transport are received by the other.
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_b) = tokio::sync::mpsc::channel(32);
        let (tx_b, rx_a) = tokio::sync::mpsc::channel(32);
        (
            Self { rx: rx_a, tx: Some(tx_a) },
            Self { rx: rx_b, tx: Some(tx_b) },
        )
    }
}

#[async_trait]
impl McpTransport for ChannelTransport {
    async fn receive(&mut self) -> Result<Option<String>, McpError> {
        Ok(self.rx.recv().await)
    }

    async fn send(&mut self, message: &str) -> Result<(), McpError> {
        let tx = self.tx.as_ref().ok_or(McpError::Closed)?;
        tx.send(message.to_string())
            .await
            .map_err(|_| McpError::Closed)
    }

    async fn close(&mut self) -> Result<(), McpError> {
        self.tx = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_channel_transport_pair() {
        let (mut a, mut b) = ChannelTransport::pair();

        a.send("hello from a").await.unwrap();
        assert_eq!(b.receive().await.unwrap(), Some("hello from a".to_string()));

        b.send("hello from b").await.unwrap();
        assert_eq!(a.receive().await.unwrap(), Some("hello from b".to_string()));
    }

    #[tokio::test]
    async fn test_channel_transport_close_signals_eof() {
        let (mut a, mut b) = ChannelTransport::pair();
        a.close().await.unwrap();
        assert_eq!(b.receive().await.unwrap(), None);
        assert!(matches!(a.send("late").await, Err(McpError::Closed)));
    }

    #[tokio::test]
    async fn test_line_transport_skips_blank_lines() {
        let (client, mut server) = tokio::io::duplex(1024);
        let (read_half, write_half) = tokio::io::split(client);
        let mut transport = LineTransport::new(read_half, write_half);

        server.write_all(b"\n  \n{\"id\":1}\r\n").await.unwrap();
        assert_eq!(transport.receive().await.unwrap(), Some("{\"id\":1}".to_string()));

        drop(server);
        assert_eq!(transport.receive().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_line_transport_survives_cancelled_read() {
        let (client, mut server) = tokio::io::duplex(1024);
        let (read_half, write_half) = tokio::io::split(client);
        let mut transport = LineTransport::new(read_half, write_half);

        server.write_all(b"{\"partial\":").await.unwrap();
        let first = tokio::time::timeout(Duration::from_millis(50), transport.receive()).await;
        assert!(first.is_err());

        server.write_all(b"true}\n").await.unwrap();
        assert_eq!(
            transport.receive().await.unwrap(),
            Some("{\"partial\":true}".to_string())
        );
    }

    #[tokio::test]
    async fn test_line_transport_send_and_close() {
        let (client, server) = tokio::io::duplex(1024);
        let (read_half, write_half) = tokio::io::split(client);
        let mut transport = LineTransport::new(read_half, write_half);

        let (server_read, _server_write) = tokio::io::split(server);
        let mut lines = BufReader::new(server_read).lines();

        transport.send("{\"method\":\"ping\"}").await.unwrap();
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("{\"method\":\"ping\"}"));

        transport.close().await.unwrap();
        assert!(matches!(transport.send("x").await, Err(McpError::Closed)));
    }
}
