//! Serial line transport.

use async_trait::async_trait;
use std::io;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt, SerialStream};

use super::{read_exact_deadline, Transport, TransportError};
use crate::tracing::prelude::*;

/// Console link over a serial device.
///
/// The device is opened lazily so a [`SerialTransport`] can be built from
/// configuration before the hardware is present, and reopened wholesale by
/// the reconnection path.
pub struct SerialTransport {
    device: String,
    baud: u32,
    stream: Option<SerialStream>,
}

impl SerialTransport {
    pub fn new(device: impl Into<String>, baud: u32) -> Self {
        Self {
            device: device.into(),
            baud,
            stream: None,
        }
    }

    fn stream(&mut self) -> Result<&mut SerialStream, TransportError> {
        self.stream.as_mut().ok_or(TransportError::Closed)
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn open(&mut self) -> Result<(), TransportError> {
        self.stream = None;
        let stream = tokio_serial::new(&self.device, self.baud)
            .open_native_async()
            .map_err(|e| TransportError::Io(io::Error::other(e)))?;
        debug!(device = %self.device, baud = self.baud, "serial port open");
        self.stream = Some(stream);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    async fn write(&mut self, buf: &[u8]) -> Result<(), TransportError> {
        let stream = self.stream()?;
        stream.write_all(buf).await?;
        stream.flush().await?;
        Ok(())
    }

    async fn read_exact(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let stream = self.stream()?;
        read_exact_deadline(stream, buf, timeout).await
    }

    async fn bytes_available(&mut self) -> Result<usize, TransportError> {
        let stream = self.stream()?;
        let pending = stream
            .bytes_to_read()
            .map_err(|e| TransportError::Io(io::Error::other(e)))?;
        Ok(pending as usize)
    }

    async fn discard_input(&mut self) -> Result<(), TransportError> {
        let stream = self.stream()?;
        stream
            .clear(ClearBuffer::Input)
            .map_err(|e| TransportError::Io(io::Error::other(e)))?;
        Ok(())
    }

    async fn close(&mut self) {
        if self.stream.take().is_some() {
            debug!(device = %self.device, "serial port closed");
        }
    }

    fn describe(&self) -> String {
        format!("serial {} @ {} baud", self.device, self.baud)
    }
}
