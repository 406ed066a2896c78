//! Console link protocol engine for vendor weather stations.
//!
//! The console speaks a half-duplex, checksum-protected command/response
//! protocol over either a serial line or a TCP socket. This crate owns the
//! whole exchange: waking the sleeping console, framed command exchange,
//! decoding the continuous live-sample stream and the paged historical
//! archive, validating every payload with a 16-bit CRC, and recovering
//! from timeouts, malformed frames and dropped connections.
//!
//! Decoded samples are handed upward through the [`sink::SampleSink`]
//! trait; day-boundary bookkeeping hooks fire exactly once per calendar
//! boundary as records stream past.

pub mod config;
pub mod console;
pub mod sink;
pub mod tracing;
pub mod transport;
