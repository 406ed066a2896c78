//! Byte transports for the console link.
//!
//! The protocol engine is written once against the [`Transport`] trait;
//! the serial line and the TCP socket are two interchangeable adapters.
//! The trait is deliberately small: the console protocol only ever needs
//! to open/reopen the channel, write raw bytes, read with a timeout, ask
//! how many bytes are pending, throw away buffered input, and close.

pub mod mock;
pub mod serial;
pub mod tcp;

pub use mock::{MockState, MockTransport};
pub use serial::SerialTransport;
pub use tcp::TcpTransport;

use async_trait::async_trait;
use std::io;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Transport-level failure.
///
/// `Timeout` is separated from `Io` because the protocol engine retries
/// timeouts in place but escalates I/O faults to the reconnection path.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("read timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport is not open")]
    Closed,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A half-duplex byte channel to the console.
#[async_trait]
pub trait Transport: Send {
    /// Open (or reopen) the underlying channel.
    async fn open(&mut self) -> Result<(), TransportError>;

    /// Whether the channel is currently open.
    fn is_open(&self) -> bool;

    /// Write all of `buf`.
    async fn write(&mut self, buf: &[u8]) -> Result<(), TransportError>;

    /// Read exactly `buf.len()` bytes, or fail with
    /// [`TransportError::Timeout`] once `timeout` elapses.
    async fn read_exact(&mut self, buf: &mut [u8], timeout: Duration)
        -> Result<(), TransportError>;

    /// Read a single byte.
    async fn read_byte(&mut self, timeout: Duration) -> Result<u8, TransportError> {
        let mut byte = [0u8; 1];
        self.read_exact(&mut byte, timeout).await?;
        Ok(byte[0])
    }

    /// Number of received bytes waiting to be read.
    async fn bytes_available(&mut self) -> Result<usize, TransportError>;

    /// Throw away any buffered input.
    async fn discard_input(&mut self) -> Result<(), TransportError>;

    /// Close the channel. Closing an already-closed channel is a no-op.
    async fn close(&mut self);

    /// Human-readable endpoint description for logs.
    fn describe(&self) -> String;
}

/// Fill `buf` from `reader`, giving up when `timeout` elapses.
///
/// Partial data read before the deadline stays in `buf`; the caller is
/// expected to treat the unit (frame, page) as lost and re-request it.
pub(crate) async fn read_exact_deadline<R>(
    reader: &mut R,
    buf: &mut [u8],
    timeout: Duration,
) -> Result<(), TransportError>
where
    R: AsyncRead + Unpin + Send,
{
    let deadline = Instant::now() + timeout;
    let mut filled = 0;
    while filled < buf.len() {
        let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
            return Err(TransportError::Timeout(timeout));
        };
        match tokio::time::timeout(remaining, reader.read(&mut buf[filled..])).await {
            Err(_) => return Err(TransportError::Timeout(timeout)),
            Ok(Ok(0)) => return Err(TransportError::Closed),
            Ok(Ok(n)) => filled += n,
            Ok(Err(e)) => return Err(e.into()),
        }
    }
    Ok(())
}
