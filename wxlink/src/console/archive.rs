//! Historical archive replay.
//!
//! The console's internal logger stores timestamped records that are
//! downloaded in fixed-size pages: one sequence byte, five 52-byte
//! records, and a CRC trailer. A dump session starts by negotiating a
//! start pointer (packed date/time of the last record we already hold),
//! after which the console reports how many pages follow and how many
//! leading records of the first page are stale. Pages are requested with
//! ACK, re-requested with NACK on checksum failure, and the whole dump is
//! abandoned with CANCEL when a page never comes back clean.
//!
//! Records are only forwarded when strictly newer than the download
//! cursor, which makes a restarted replay that re-fetches already-seen
//! pages idempotent. Day-rollover and midnight hooks fire before the
//! record that crossed the boundary.

use std::time::Duration;
use time::{Date, Month, PrimitiveDateTime, Time};
use tokio_util::sync::CancellationToken;

use super::{
    crc, sane, LinkError, ACK, ARCHIVE_PAGE_LEN, ARCHIVE_RECORDS_PER_PAGE, ARCHIVE_RECORD_LEN,
    CANCEL, NACK,
};
use crate::console::command::{self, CommandOutcome};
use crate::console::rollover::RolloverState;
use crate::sink::SampleSink;
use crate::tracing::prelude::*;
use crate::transport::{Transport, TransportError};

/// Bound on download attempts for a single page.
pub const PAGE_ATTEMPTS: usize = 4;

const DASH_U16: u16 = 0xffff;
const DASH_I16_HI: i16 = 0x7fff;
const DASH_I16_LO: i16 = i16::MIN;
const DASH_U8: u8 = 0xff;

/// Pack a calendar date the way the console's dump command expects.
pub fn pack_date(date: Date) -> u16 {
    let year = (date.year() - 2000).clamp(0, 127) as u16;
    u16::from(date.day()) + u16::from(u8::from(date.month())) * 32 + year * 512
}

/// Pack a time of day the way the console's dump command expects.
pub fn pack_time(time: Time) -> u16 {
    u16::from(time.hour()) * 100 + u16::from(time.minute())
}

/// Decode a packed date/time pair. `None` for the all-ones pattern that
/// marks an unwritten record slot, or for nonsense field values.
pub fn unpack_stamp(date: u16, time: u16) -> Option<PrimitiveDateTime> {
    if date == DASH_U16 {
        return None;
    }
    let day = (date & 0x1f) as u8;
    let month = Month::try_from(((date >> 5) & 0x0f) as u8).ok()?;
    let year = 2000 + i32::from(date >> 9);
    let date = Date::from_calendar_date(year, month, day).ok()?;
    let time = Time::from_hms((time / 100) as u8, (time % 100) as u8, 0).ok()?;
    Some(PrimitiveDateTime::new(date, time))
}

/// One decoded historical record.
#[derive(Debug, Clone)]
pub struct ArchiveRecord {
    /// Timestamp stored by the console's logger.
    pub timestamp: PrimitiveDateTime,
    pub outside_temp_f: Option<f64>,
    pub outside_temp_hi_f: Option<f64>,
    pub outside_temp_lo_f: Option<f64>,
    /// Rainfall over the interval, in rain-gauge clicks.
    pub rain_clicks: u16,
    /// Highest rain rate over the interval, in clicks per hour.
    pub rain_rate_hi: u16,
    pub barometer_inhg: Option<f64>,
    pub solar_radiation: Option<u16>,
    pub inside_temp_f: Option<f64>,
    pub inside_humidity: Option<u8>,
    pub outside_humidity: Option<u8>,
    pub wind_avg_mph: Option<u8>,
    pub wind_hi_mph: Option<u8>,
    /// 16-sector compass code of the gust direction.
    pub wind_hi_dir: Option<u8>,
    pub wind_prevailing_dir: Option<u8>,
}

impl ArchiveRecord {
    /// Decode one 52-byte record slot. `None` means the slot was never
    /// written (dashed timestamp) and should be skipped silently.
    pub(crate) fn decode(raw: &[u8]) -> Option<ArchiveRecord> {
        debug_assert_eq!(raw.len(), ARCHIVE_RECORD_LEN);
        let u16_at = |off: usize| u16::from_le_bytes([raw[off], raw[off + 1]]);
        let i16_at = |off: usize| i16::from_le_bytes([raw[off], raw[off + 1]]);

        let timestamp = unpack_stamp(u16_at(0), u16_at(2))?;
        let barometer = u16_at(14);
        let solar = u16_at(16);

        Some(ArchiveRecord {
            timestamp,
            outside_temp_f: temp("outside_temp", i16_at(4)),
            outside_temp_hi_f: temp("outside_temp_hi", i16_at(6)),
            outside_temp_lo_f: temp("outside_temp_lo", i16_at(8)),
            rain_clicks: u16_at(10),
            rain_rate_hi: u16_at(12),
            barometer_inhg: if barometer == 0 {
                None
            } else {
                sane("barometer", f64::from(barometer) / 1000.0, 20.0, 32.5)
            },
            solar_radiation: if solar == 32767 { None } else { Some(solar) },
            inside_temp_f: temp("inside_temp", i16_at(20)),
            inside_humidity: humidity("inside_humidity", raw[22]),
            outside_humidity: humidity("outside_humidity", raw[23]),
            wind_avg_mph: byte_field("wind_avg", raw[24], 200),
            wind_hi_mph: byte_field("wind_hi", raw[25], 200),
            wind_hi_dir: byte_field("wind_hi_dir", raw[26], 15),
            wind_prevailing_dir: byte_field("wind_prevailing_dir", raw[27], 15),
        })
    }
}

fn temp(field: &'static str, raw: i16) -> Option<f64> {
    if raw == DASH_I16_HI || raw == DASH_I16_LO {
        return None;
    }
    sane(field, f64::from(raw) / 10.0, -60.0, 150.0)
}

fn humidity(field: &'static str, raw: u8) -> Option<u8> {
    byte_field(field, raw, 100)
}

fn byte_field(field: &'static str, raw: u8, max: u8) -> Option<u8> {
    if raw == DASH_U8 {
        return None;
    }
    sane(field, raw, 0, max)
}

/// Replay position. Created from the caller-supplied resume timestamp and
/// advanced record-by-record; records at or before `last_accepted` are
/// never forwarded, so re-fetched pages cannot produce duplicates.
#[derive(Debug)]
pub struct DownloadCursor {
    last_accepted: PrimitiveDateTime,
    pages_remaining: u16,
    first_page_offset: usize,
    emitted: u32,
}

impl DownloadCursor {
    fn new(resume_after: PrimitiveDateTime, pages: u16, first_page_offset: usize) -> Self {
        Self {
            last_accepted: resume_after,
            pages_remaining: pages,
            first_page_offset,
            emitted: 0,
        }
    }

    fn accepts(&self, timestamp: PrimitiveDateTime) -> bool {
        timestamp > self.last_accepted
    }

    /// Minutes since the previous accepted record; the configured logging
    /// interval for the first record of a replay.
    fn interval_for(&self, timestamp: PrimitiveDateTime, logger_interval: u16) -> u16 {
        if self.emitted == 0 {
            logger_interval
        } else {
            (timestamp - self.last_accepted)
                .whole_minutes()
                .clamp(0, i64::from(u16::MAX)) as u16
        }
    }

    fn advance(&mut self, timestamp: PrimitiveDateTime) {
        self.last_accepted = timestamp;
        self.emitted += 1;
    }
}

/// Fixed parameters of one replay session.
pub(crate) struct ReplayParams {
    pub resume_after: PrimitiveDateTime,
    pub logger_interval_minutes: u16,
    pub rollover_hour: u8,
    pub ack_timeout: Duration,
    pub page_timeout: Duration,
}

/// Run one dump session against an already-awake console.
///
/// Returns the number of records forwarded. No record from a page that
/// failed validation is ever emitted.
pub(crate) async fn replay(
    transport: &mut dyn Transport,
    params: &ReplayParams,
    sink: &mut dyn SampleSink,
    stop: &CancellationToken,
) -> Result<u32, LinkError> {
    let command = "DMPAFT";
    match command::exchange(transport, command, params.ack_timeout).await? {
        CommandOutcome::Ack => {}
        CommandOutcome::Timeout => return Err(LinkError::Timeout),
        outcome => {
            return Err(LinkError::NegativeAck {
                command: command.to_string(),
                outcome,
            })
        }
    }

    // Start pointer: packed date, packed time, CRC trailer.
    let mut pointer = Vec::with_capacity(6);
    pointer.extend_from_slice(&pack_date(params.resume_after.date()).to_le_bytes());
    pointer.extend_from_slice(&pack_time(params.resume_after.time()).to_le_bytes());
    crc::append(&mut pointer);
    transport.write(&pointer).await?;

    match command::read_status(transport, "dump start pointer", params.ack_timeout).await? {
        Some(CommandOutcome::Ack) => {}
        Some(outcome) => {
            return Err(LinkError::NegativeAck {
                command: "dump start pointer".to_string(),
                outcome,
            })
        }
        None => return Err(LinkError::Timeout),
    }

    let mut header = [0u8; 6];
    transport
        .read_exact(&mut header, params.ack_timeout)
        .await?;
    if !crc::is_valid(&header) {
        transport.write(&[CANCEL]).await?;
        return Err(LinkError::Checksum {
            what: "dump header",
            attempts: 1,
        });
    }
    let pages = u16::from_le_bytes([header[0], header[1]]);
    let first_offset = u16::from_le_bytes([header[2], header[3]]);
    if usize::from(first_offset) >= ARCHIVE_RECORDS_PER_PAGE {
        transport.write(&[CANCEL]).await?;
        return Err(LinkError::Malformed("dump header"));
    }

    info!(
        pages,
        first_offset,
        resume_after = %params.resume_after,
        "archive dump negotiated"
    );

    let mut cursor = DownloadCursor::new(params.resume_after, pages, usize::from(first_offset));
    let mut rollover = RolloverState::new(params.rollover_hour);

    for page_index in 0..pages {
        if stop.is_cancelled() {
            info!(page_index, "replay cancelled, abandoning dump");
            transport.write(&[CANCEL]).await?;
            break;
        }

        let page = download_page(transport, page_index, params.page_timeout).await?;
        cursor.pages_remaining = pages - page_index - 1;
        trace!(
            page_index,
            sequence = page[0],
            remaining = cursor.pages_remaining,
            "archive page validated"
        );

        emit_page_records(&page, page_index, &mut cursor, &mut rollover, params, sink);
    }

    debug!(records = cursor.emitted, "archive replay finished");
    Ok(cursor.emitted)
}

/// Request one page (ACK) and re-request it (NACK) until it validates,
/// bounded by [`PAGE_ATTEMPTS`]. Sends CANCEL and gives up on exhaustion.
async fn download_page(
    transport: &mut dyn Transport,
    page_index: u16,
    page_timeout: Duration,
) -> Result<[u8; ARCHIVE_PAGE_LEN], LinkError> {
    let mut page = [0u8; ARCHIVE_PAGE_LEN];
    for attempt in 1..=PAGE_ATTEMPTS {
        let request = if attempt == 1 { ACK } else { NACK };
        transport.write(&[request]).await?;
        match transport.read_exact(&mut page, page_timeout).await {
            Ok(()) if crc::is_valid(&page) => return Ok(page),
            Ok(()) => warn!(page_index, attempt, "archive page failed CRC"),
            Err(TransportError::Timeout(_)) => {
                warn!(page_index, attempt, "timed out waiting for archive page");
            }
            Err(e) => return Err(e.into()),
        }
    }
    transport.write(&[CANCEL]).await?;
    Err(LinkError::Checksum {
        what: "archive page",
        attempts: PAGE_ATTEMPTS,
    })
}

/// Decode and forward the acceptable records of a validated page.
fn emit_page_records(
    page: &[u8; ARCHIVE_PAGE_LEN],
    page_index: u16,
    cursor: &mut DownloadCursor,
    rollover: &mut RolloverState,
    params: &ReplayParams,
    sink: &mut dyn SampleSink,
) {
    for slot in 0..ARCHIVE_RECORDS_PER_PAGE {
        if page_index == 0 && slot < cursor.first_page_offset {
            trace!(slot, "skipping stale leading record");
            continue;
        }
        let start = 1 + slot * ARCHIVE_RECORD_LEN;
        let Some(record) = ArchiveRecord::decode(&page[start..start + ARCHIVE_RECORD_LEN]) else {
            trace!(page_index, slot, "unwritten record slot");
            continue;
        };
        if !cursor.accepts(record.timestamp) {
            trace!(page_index, slot, timestamp = %record.timestamp, "record not newer than cursor");
            continue;
        }

        let actions = rollover.observe(record.timestamp);
        if actions.day_rollover {
            sink.on_day_rollover(record.timestamp);
        }
        if actions.midnight_reset {
            sink.on_midnight_reset(record.timestamp);
        }

        let interval = cursor.interval_for(record.timestamp, params.logger_interval_minutes);
        sink.on_archive_record(&record, interval);
        cursor.advance(record.timestamp);
    }
}
