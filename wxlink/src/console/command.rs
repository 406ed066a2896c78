//! Framed command exchange.
//!
//! Every console command is a short ASCII line answered by a single status
//! byte before any payload follows. Classification and retry live here so
//! the decoders above never see raw acknowledgement bytes, and the same
//! logic runs unmodified over either transport.

use std::time::{Duration, Instant};

use super::{ACK, CANCEL, CR, LF, NACK};
use crate::tracing::prelude::*;
use crate::transport::{Transport, TransportError};

/// Bound on full send+read cycles for one exchange.
pub const EXCHANGE_ATTEMPTS: usize = 3;

/// Result of one command/response exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Ack,
    Nack,
    Cancel,
    Timeout,
}

/// Send `command` and classify the console's single-byte answer.
///
/// Stray input is discarded before each send. CR/LF bytes ahead of the
/// status byte are skipped without counting against anything; any other
/// unexpected byte wastes the attempt. The full cycle is retried up to
/// [`EXCHANGE_ATTEMPTS`] times when no classifiable answer arrives;
/// `Nack` and `Cancel` are returned immediately.
pub(crate) async fn exchange(
    transport: &mut dyn Transport,
    command: &str,
    ack_timeout: Duration,
) -> Result<CommandOutcome, TransportError> {
    let mut line = Vec::with_capacity(command.len() + 1);
    line.extend_from_slice(command.as_bytes());
    line.push(LF);

    for attempt in 1..=EXCHANGE_ATTEMPTS {
        transport.discard_input().await?;
        transport.write(&line).await?;

        match read_status(transport, command, ack_timeout).await? {
            Some(outcome) => {
                trace!(command, attempt, ?outcome, "command answered");
                return Ok(outcome);
            }
            None => debug!(command, attempt, "no answer to command"),
        }
    }

    debug!(
        command,
        attempts = EXCHANGE_ATTEMPTS,
        "command exchange exhausted retries"
    );
    Ok(CommandOutcome::Timeout)
}

/// Scan for the status byte until `ack_timeout` elapses.
///
/// Returns `None` for a wasted attempt (timeout or noise byte).
pub(crate) async fn read_status(
    transport: &mut dyn Transport,
    command: &str,
    ack_timeout: Duration,
) -> Result<Option<CommandOutcome>, TransportError> {
    let deadline = Instant::now() + ack_timeout;
    loop {
        let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
            return Ok(None);
        };
        match transport.read_byte(remaining).await {
            Ok(ACK) => return Ok(Some(CommandOutcome::Ack)),
            Ok(NACK) => return Ok(Some(CommandOutcome::Nack)),
            Ok(CANCEL) => return Ok(Some(CommandOutcome::Cancel)),
            Ok(CR) | Ok(LF) => continue,
            Ok(other) => {
                warn!(command, byte = format_args!("{other:#04x}"), "noise while waiting for ACK");
                return Ok(None);
            }
            Err(TransportError::Timeout(_)) => return Ok(None),
            Err(e) => return Err(e),
        }
    }
}
