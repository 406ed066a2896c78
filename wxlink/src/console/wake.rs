//! Console wake handshake.
//!
//! The console drops into a low-power doze between exchanges and ignores
//! commands until prodded. A bare line-feed wakes it; it answers with
//! line-feed carriage-return once ready. A successful handshake leaves the
//! console responsive for roughly two minutes, so the last wake time is
//! remembered and redundant wakes inside a safety-margined window skipped.

use std::time::{Duration, Instant};

use super::{LinkSession, CR, LF};
use crate::tracing::prelude::*;
use crate::transport::{Transport, TransportError};

/// How long a successful wake is trusted. The console's own awake window
/// is ~2 minutes; this leaves margin.
pub const WAKE_WINDOW: Duration = Duration::from_secs(110);

/// Bound on wake handshake attempts.
pub const WAKE_ATTEMPTS: usize = 4;

/// How long to wait for the LF CR answer per attempt.
const WAKE_REPLY_TIMEOUT: Duration = Duration::from_millis(1200);

/// Make sure the console is listening.
///
/// Returns `Ok(false)` once the attempt bound is exhausted; the caller
/// treats that as fatal for the current operation. Transport I/O faults
/// propagate.
pub(crate) async fn ensure_awake(
    session: &mut LinkSession,
    force: bool,
) -> Result<bool, TransportError> {
    if !force {
        if let Some(at) = session.last_wake {
            if at.elapsed() < WAKE_WINDOW {
                trace!("console still inside wake window");
                return Ok(true);
            }
        }
    }

    for attempt in 1..=WAKE_ATTEMPTS {
        session.transport.discard_input().await?;
        session.transport.write(&[LF]).await?;
        if scan_for_reply(session.transport.as_mut(), WAKE_REPLY_TIMEOUT).await? {
            debug!(attempt, "console awake");
            session.last_wake = Some(Instant::now());
            return Ok(true);
        }
        debug!(attempt, "no answer to wake");
    }

    warn!(attempts = WAKE_ATTEMPTS, "console failed to wake");
    Ok(false)
}

/// Scan byte-by-byte for the LF CR wake answer, ignoring anything before it.
async fn scan_for_reply(
    transport: &mut dyn Transport,
    window: Duration,
) -> Result<bool, TransportError> {
    let deadline = Instant::now() + window;
    let mut previous = 0u8;
    loop {
        let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
            return Ok(false);
        };
        match transport.read_byte(remaining).await {
            Ok(byte) => {
                if previous == LF && byte == CR {
                    return Ok(true);
                }
                previous = byte;
            }
            Err(TransportError::Timeout(_)) => return Ok(false),
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;

    fn session_with(transport: MockTransport) -> LinkSession {
        LinkSession::new(Box::new(transport))
    }

    #[tokio::test]
    async fn wake_succeeds_on_lf_cr() {
        let transport = MockTransport::new().with_responder(|written, state| {
            if written == [LF] {
                state.queue(&[LF, CR]);
            }
        });
        let mut session = session_with(transport);
        assert!(ensure_awake(&mut session, false).await.unwrap());
        assert!(session.last_wake.is_some());
    }

    #[tokio::test]
    async fn wake_ignores_leading_noise() {
        let transport = MockTransport::new().with_responder(|written, state| {
            if written == [LF] {
                state.queue(&[0x00, b'x', LF, CR]);
            }
        });
        let mut session = session_with(transport);
        assert!(ensure_awake(&mut session, false).await.unwrap());
    }

    #[tokio::test]
    async fn fresh_wake_is_skipped() {
        let transport = MockTransport::new();
        let handle = transport.handle();
        let mut session = session_with(transport);
        session.last_wake = Some(Instant::now());
        assert!(ensure_awake(&mut session, false).await.unwrap());
        assert_eq!(handle.lock().unwrap().write_count, 0);
    }

    #[tokio::test]
    async fn force_rewakes_inside_the_window() {
        let transport = MockTransport::new().with_responder(|written, state| {
            if written == [LF] {
                state.queue(&[LF, CR]);
            }
        });
        let handle = transport.handle();
        let mut session = session_with(transport);
        session.last_wake = Some(Instant::now());
        assert!(ensure_awake(&mut session, true).await.unwrap());
        assert_eq!(handle.lock().unwrap().write_count, 1);
    }

    #[tokio::test]
    async fn silent_console_exhausts_attempts() {
        let transport = MockTransport::new();
        let handle = transport.handle();
        let mut session = session_with(transport);
        assert!(!ensure_awake(&mut session, false).await.unwrap());
        assert_eq!(handle.lock().unwrap().write_count, WAKE_ATTEMPTS);
        assert!(session.last_wake.is_none());
    }
}
