//! Link-level error taxonomy.

use thiserror::Error;

use super::command::CommandOutcome;
use crate::transport::TransportError;

/// Failure of one protocol operation.
///
/// Only `Transport` is fatal to the link itself; everything else is
/// resolved by the caller re-issuing the operation on its own schedule.
#[derive(Debug, Error)]
pub enum LinkError {
    /// No (or partial) response within the allotted window, after the
    /// operation's own bounded in-place retries.
    #[error("timed out waiting for console response")]
    Timeout,

    /// The console did not answer the wake handshake.
    #[error("console failed to wake after {attempts} attempts")]
    WakeFailed { attempts: usize },

    /// Live-frame signature mismatch. The stream was drained; the caller
    /// must re-issue the stream request. Not a transport fault.
    #[error("live stream lost sync: {0}")]
    Desync(&'static str),

    /// CRC mismatch that survived the unit's bounded re-requests.
    #[error("checksum failure on {what} after {attempts} attempts")]
    Checksum { what: &'static str, attempts: usize },

    /// A binary block parsed but did not make sense.
    #[error("malformed {0} block from console")]
    Malformed(&'static str),

    /// The console answered a command with NACK or CANCEL.
    #[error("console rejected {command:?}: {outcome:?}")]
    NegativeAck {
        command: String,
        outcome: CommandOutcome,
    },

    /// I/O fault; escalates to the reconnection supervisor.
    #[error("transport fault: {0}")]
    Transport(TransportError),
}

impl From<TransportError> for LinkError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout(_) => LinkError::Timeout,
            other => LinkError::Transport(other),
        }
    }
}

impl LinkError {
    /// Whether the link must be rebuilt before the next operation.
    pub fn is_fatal(&self) -> bool {
        matches!(self, LinkError::Transport(_))
    }
}
