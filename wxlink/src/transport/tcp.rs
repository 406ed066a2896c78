//! TCP socket transport.
//!
//! Network-attached consoles expose the same byte protocol on a TCP port.
//! The socket has no equivalent of the serial driver's pending-byte count,
//! so received data is pulled into an internal buffer with `try_read` and
//! the buffer length stands in for it.

use async_trait::async_trait;
use bytes::BytesMut;
use std::io;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use super::{read_exact_deadline, Transport, TransportError};
use crate::tracing::prelude::*;

const DIAL_ATTEMPTS: u32 = 3;
const DIAL_TIMEOUT: Duration = Duration::from_secs(10);
const DIAL_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Console link over a TCP socket.
pub struct TcpTransport {
    host: String,
    port: u16,
    stream: Option<TcpStream>,
    rx: BytesMut,
}

impl TcpTransport {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            stream: None,
            rx: BytesMut::new(),
        }
    }

    /// Drain everything the socket currently has into the internal buffer.
    fn fill_rx(&mut self) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;
        let mut chunk = [0u8; 512];
        loop {
            match stream.try_read(&mut chunk) {
                Ok(0) => {
                    self.stream = None;
                    return Err(TransportError::Closed);
                }
                Ok(n) => self.rx.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn open(&mut self) -> Result<(), TransportError> {
        self.stream = None;
        self.rx.clear();
        let address = format!("{}:{}", self.host, self.port);
        let mut last_error: Option<io::Error> = None;
        for attempt in 1..=DIAL_ATTEMPTS {
            debug!(%address, attempt, "dialing console");
            match tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(&address)).await {
                Ok(Ok(stream)) => {
                    info!(%address, "console socket connected");
                    self.stream = Some(stream);
                    return Ok(());
                }
                Ok(Err(e)) => {
                    warn!(%address, attempt, error = %e, "dial failed");
                    last_error = Some(e);
                }
                Err(_) => {
                    warn!(%address, attempt, "dial timed out");
                    last_error = Some(io::Error::new(io::ErrorKind::TimedOut, "dial timed out"));
                }
            }
            if attempt < DIAL_ATTEMPTS {
                tokio::time::sleep(DIAL_RETRY_DELAY).await;
            }
        }
        Err(TransportError::Io(last_error.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, "dial failed")
        })))
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    async fn write(&mut self, buf: &[u8]) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;
        stream.write_all(buf).await?;
        stream.flush().await?;
        Ok(())
    }

    async fn read_exact(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<(), TransportError> {
        // Serve buffered bytes first, then block on the socket.
        let buffered = self.rx.len().min(buf.len());
        if buffered > 0 {
            let head = self.rx.split_to(buffered);
            buf[..buffered].copy_from_slice(&head);
        }
        if buffered < buf.len() {
            let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;
            read_exact_deadline(stream, &mut buf[buffered..], timeout).await?;
        }
        Ok(())
    }

    async fn bytes_available(&mut self) -> Result<usize, TransportError> {
        self.fill_rx()?;
        Ok(self.rx.len())
    }

    async fn discard_input(&mut self) -> Result<(), TransportError> {
        self.fill_rx()?;
        if !self.rx.is_empty() {
            trace!(discarded = self.rx.len(), "dropping buffered input");
        }
        self.rx.clear();
        Ok(())
    }

    async fn close(&mut self) {
        if self.stream.take().is_some() {
            debug!(host = %self.host, port = self.port, "console socket closed");
        }
        self.rx.clear();
    }

    fn describe(&self) -> String {
        format!("tcp {}:{}", self.host, self.port)
    }
}
