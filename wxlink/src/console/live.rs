//! Live-sample stream decoder.
//!
//! After an acknowledged stream request the console pushes fixed 99-byte
//! frames, one every couple of seconds. Each frame carries the `LOO`
//! signature, a subtype discriminator (two frame layouts share the
//! signature and differ in one byte), a flat set of current sensor
//! readings, and a CRC trailer. The frame itself has no timestamp; the
//! engine stamps it on receipt.

use std::time::Duration;
use time::OffsetDateTime;

use super::{crc, sane, LinkConfig, LinkError, LinkSession, CR, LIVE_FRAME_LEN};
use crate::console::command::{self, CommandOutcome};
use crate::tracing::prelude::*;
use crate::transport::{Transport, TransportError};

/// First three frame bytes.
pub const LIVE_SIGNATURE: [u8; 3] = *b"LOO";

/// Subtype discriminator (offset 4) of the current-conditions frame.
pub const LIVE_SUBTYPE_CURRENT: u8 = 0;

/// Pause after the stop-stream byte before draining, letting an in-flight
/// frame finish arriving.
const RESYNC_SETTLE: Duration = Duration::from_millis(200);

const DASH_I16: i16 = 0x7fff;
const DASH_I16_U: u16 = 0x7fff;
const DASH_U8: u8 = 0xff;
const DASH_U16: u16 = 0xffff;

/// One decoded live frame.
///
/// Fields the station does not report, or that fail range sanity checks,
/// are withheld as `None` rather than forwarded as zeros.
#[derive(Debug, Clone)]
pub struct LiveSample {
    /// Receipt time assigned by the engine.
    pub timestamp: OffsetDateTime,
    pub barometer_inhg: Option<f64>,
    pub inside_temp_f: Option<f64>,
    pub inside_humidity: Option<u8>,
    pub outside_temp_f: Option<f64>,
    pub outside_humidity: Option<u8>,
    pub wind_speed_mph: Option<u8>,
    pub wind_avg_mph: Option<u8>,
    pub wind_dir_degrees: Option<u16>,
    /// Rain rate in rain-gauge clicks per hour.
    pub rain_rate: Option<u16>,
    /// Rain since the daily reset, in clicks.
    pub day_rain: Option<u16>,
    pub console_battery_volts: Option<f64>,
    /// Raw per-transmitter low-battery bitmap.
    pub transmitter_battery: u8,
}

impl LiveSample {
    /// Decode a signature- and CRC-validated frame.
    pub(crate) fn decode(frame: &[u8], timestamp: OffsetDateTime) -> LiveSample {
        debug_assert_eq!(frame.len(), LIVE_FRAME_LEN);
        let u16_at = |off: usize| u16::from_le_bytes([frame[off], frame[off + 1]]);
        let i16_at = |off: usize| i16::from_le_bytes([frame[off], frame[off + 1]]);

        let barometer = u16_at(7);
        let battery_raw = u16_at(87);

        LiveSample {
            timestamp,
            barometer_inhg: if barometer == 0 || barometer == DASH_U16 {
                None
            } else {
                sane("barometer", f64::from(barometer) / 1000.0, 20.0, 32.5)
            },
            inside_temp_f: tenths_f("inside_temp", i16_at(9)),
            inside_humidity: humidity("inside_humidity", frame[11]),
            outside_temp_f: tenths_f("outside_temp", i16_at(12)),
            outside_humidity: humidity("outside_humidity", frame[33]),
            wind_speed_mph: wind("wind_speed", frame[14]),
            wind_avg_mph: wind("wind_avg", frame[15]),
            wind_dir_degrees: match u16_at(16) {
                DASH_I16_U => None,
                dir => sane("wind_dir", dir, 0, 360),
            },
            rain_rate: match u16_at(41) {
                DASH_U16 => None,
                rate => Some(rate),
            },
            day_rain: match u16_at(50) {
                DASH_U16 => None,
                rain => Some(rain),
            },
            console_battery_volts: Some(f64::from(battery_raw) * 300.0 / 512.0 / 100.0),
            transmitter_battery: frame[86],
        }
    }
}

fn tenths_f(field: &'static str, raw: i16) -> Option<f64> {
    if raw == DASH_I16 {
        return None;
    }
    sane(field, f64::from(raw) / 10.0, -60.0, 150.0)
}

fn humidity(field: &'static str, raw: u8) -> Option<u8> {
    if raw == DASH_U8 {
        return None;
    }
    sane(field, raw, 0, 100)
}

fn wind(field: &'static str, raw: u8) -> Option<u8> {
    if raw == DASH_U8 {
        return None;
    }
    sane(field, raw, 0, 200)
}

/// Request `count` live frames and feed decoded samples to `emit`.
///
/// CRC failures lose only the offending frame. A signature or subtype
/// mismatch means the stream is desynchronized: the stop-stream byte is
/// written, buffered bytes are drained, and the remaining iterations are
/// abandoned for the caller to re-issue the request.
pub(crate) async fn request_and_decode(
    session: &mut LinkSession,
    count: usize,
    config: &LinkConfig,
    emit: &mut dyn FnMut(LiveSample),
) -> Result<(), LinkError> {
    let command = format!("LOOP {count}");
    match command::exchange(session.transport.as_mut(), &command, config.ack_timeout).await? {
        CommandOutcome::Ack => {}
        CommandOutcome::Timeout => return Err(LinkError::Timeout),
        outcome => return Err(LinkError::NegativeAck { command, outcome }),
    }

    let mut frame = [0u8; LIVE_FRAME_LEN];
    for i in 0..count {
        match session
            .transport
            .read_exact(&mut frame, config.frame_timeout)
            .await
        {
            Ok(()) => {}
            Err(TransportError::Timeout(_)) if i > 0 => {
                debug!(received = i, requested = count, "live stream dried up early");
                break;
            }
            Err(TransportError::Timeout(_)) => return Err(LinkError::Timeout),
            Err(e) => return Err(e.into()),
        }

        if frame[0..3] != LIVE_SIGNATURE || frame[4] != LIVE_SUBTYPE_CURRENT {
            warn!(
                header = format_args!("{:02x?}", &frame[0..5]),
                "live frame signature mismatch, resynchronizing"
            );
            resync(session.transport.as_mut()).await?;
            return Err(LinkError::Desync("bad live frame signature"));
        }

        if !crc::is_valid(&frame) {
            warn!(frame = i, "live frame failed CRC, skipping");
            continue;
        }

        emit(LiveSample::decode(&frame, OffsetDateTime::now_utc()));
    }
    Ok(())
}

/// Stop the stream and throw away whatever is in flight.
async fn resync(transport: &mut dyn Transport) -> Result<(), TransportError> {
    transport.write(&[CR]).await?;
    tokio::time::sleep(RESYNC_SETTLE).await;
    transport.discard_input().await?;
    Ok(())
}
