//! Scripted in-memory transport.
//!
//! Plays the console's side of the protocol for tests: queued bytes are
//! served to reads, and an optional responder closure inspects each write
//! and queues the reply the real console would send. Reads past the end of
//! the queued data fail immediately with a timeout instead of sleeping, so
//! retry-bound tests run in microseconds.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{Transport, TransportError};

/// Shared observable state of a [`MockTransport`].
#[derive(Default)]
pub struct MockState {
    /// Bytes waiting to be read by the engine.
    pub rx: VecDeque<u8>,
    /// Everything the engine has written, in order.
    pub written: Vec<u8>,
    pub write_count: usize,
    pub discard_count: usize,
    pub open_count: usize,
    pub open: bool,
    /// When set, `open()` fails until the flag is cleared.
    pub fail_open: bool,
}

impl MockState {
    /// Queue bytes for the engine to read.
    pub fn queue(&mut self, bytes: &[u8]) {
        self.rx.extend(bytes);
    }
}

type Responder = Box<dyn FnMut(&[u8], &mut MockState) + Send>;

/// Test double implementing [`Transport`].
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    responder: Option<Responder>,
}

impl MockTransport {
    /// A mock that starts out open with an empty read queue.
    pub fn new() -> Self {
        let state = MockState {
            open: true,
            ..MockState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            responder: None,
        }
    }

    /// Install a closure that sees every write and may queue a reply.
    pub fn with_responder(
        mut self,
        responder: impl FnMut(&[u8], &mut MockState) + Send + 'static,
    ) -> Self {
        self.responder = Some(Box::new(responder));
        self
    }

    /// Handle for inspecting and seeding state from the test.
    pub fn handle(&self) -> Arc<Mutex<MockState>> {
        Arc::clone(&self.state)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().expect("mock transport lock poisoned")
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&mut self) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.open_count += 1;
        if state.fail_open {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "mock open failure",
            )));
        }
        state.open = true;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.lock().open
    }

    async fn write(&mut self, buf: &[u8]) -> Result<(), TransportError> {
        let mut state = self.state.lock().expect("mock transport lock poisoned");
        if !state.open {
            return Err(TransportError::Closed);
        }
        state.written.extend_from_slice(buf);
        state.write_count += 1;
        if let Some(responder) = self.responder.as_mut() {
            responder(buf, &mut state);
        }
        Ok(())
    }

    async fn read_exact(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let mut state = self.lock();
        if !state.open {
            return Err(TransportError::Closed);
        }
        // Partial data stays consumed on timeout, as on a real channel.
        for slot in buf.iter_mut() {
            match state.rx.pop_front() {
                Some(byte) => *slot = byte,
                None => return Err(TransportError::Timeout(timeout)),
            }
        }
        Ok(())
    }

    async fn bytes_available(&mut self) -> Result<usize, TransportError> {
        Ok(self.lock().rx.len())
    }

    async fn discard_input(&mut self) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.discard_count += 1;
        state.rx.clear();
        Ok(())
    }

    async fn close(&mut self) {
        self.lock().open = false;
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }
}
