//! Console link protocol engine.
//!
//! Everything above the byte transports lives here: the wake handshake,
//! framed command exchange, CRC validation, live-frame decoding, archive
//! replay, and the supervisor that serializes access to the link and
//! rebuilds it after faults.
//!
//! The console is strictly half duplex and single-session. All protocol
//! operations go through one [`LinkSession`] guarded by an async mutex;
//! ancillary operations (clock checks, reception counters) use `try_lock`
//! and simply skip their cycle when a replay or live poll holds the link.

pub mod archive;
pub mod command;
pub mod crc;
pub mod error;
pub mod live;
pub mod rollover;
pub mod wake;

pub use archive::{ArchiveRecord, DownloadCursor};
pub use command::CommandOutcome;
pub use error::LinkError;
pub use live::LiveSample;
pub use rollover::{RolloverActions, RolloverState};

use std::time::{Duration, Instant};

use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::sink::SampleSink;
use crate::tracing::prelude::*;
use crate::transport::{Transport, TransportError};

/// Positive acknowledgement byte.
pub const ACK: u8 = 0x06;
/// Negative acknowledgement byte; also re-requests an archive page.
pub const NACK: u8 = 0x21;
/// Abandons an in-progress archive dump.
pub const CANCEL: u8 = 0x18;
pub const CR: u8 = 0x0d;
pub const LF: u8 = 0x0a;

/// Fixed size of one live frame, CRC trailer included.
pub const LIVE_FRAME_LEN: usize = 99;
/// Size of one archive record slot.
pub const ARCHIVE_RECORD_LEN: usize = 52;
/// Record slots per archive page.
pub const ARCHIVE_RECORDS_PER_PAGE: usize = 5;
/// One archive page: sequence byte, five records, CRC trailer.
pub const ARCHIVE_PAGE_LEN: usize = 1 + ARCHIVE_RECORDS_PER_PAGE * ARCHIVE_RECORD_LEN + 2;

/// Range-check a decoded reading. Implausible values are logged and
/// withheld rather than forwarded.
pub(crate) fn sane<T>(field: &'static str, value: T, min: T, max: T) -> Option<T>
where
    T: PartialOrd + Copy + std::fmt::Display,
{
    if value < min || value > max {
        warn!(field, %value, "implausible reading withheld");
        return None;
    }
    Some(value)
}

/// Wall-clock time in the station's frame of reference. Archive records
/// and the console clock both carry local civil time.
pub fn local_now() -> PrimitiveDateTime {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    PrimitiveDateTime::new(now.date(), now.time())
}

/// Exclusive state of one console link.
pub struct LinkSession {
    pub(crate) transport: Box<dyn Transport>,
    /// When the console last answered a wake handshake.
    pub(crate) last_wake: Option<Instant>,
    /// Cleared on I/O faults; the reconnection path restores it.
    pub(crate) connected: bool,
}

impl LinkSession {
    pub(crate) fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            last_wake: None,
            connected: true,
        }
    }
}

/// Tunable link parameters.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Interval the console's logger is expected to record at.
    pub logger_interval_minutes: u16,
    /// Local hour at which the meteorological day rolls over.
    pub rollover_hour: u8,
    /// Window for the status byte answering a command.
    pub ack_timeout: Duration,
    /// Window for one live frame; the console pushes one every ~2 s.
    pub frame_timeout: Duration,
    /// Window for one archive page.
    pub page_timeout: Duration,
    /// Pause between live polling cycles.
    pub poll_interval: Duration,
    /// Pause between reconnection passes.
    pub reconnect_cooldown: Duration,
    /// Bound on reconnection passes per fault.
    pub reconnect_passes: usize,
    /// Live frames requested per polling cycle.
    pub live_frames_per_poll: usize,
    /// Console clock drift tolerated before a resync.
    pub clock_drift_threshold_secs: i64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            logger_interval_minutes: 5,
            rollover_hour: 9,
            ack_timeout: Duration::from_millis(1200),
            frame_timeout: Duration::from_secs(3),
            page_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_secs(10),
            reconnect_cooldown: Duration::from_secs(30),
            reconnect_passes: 3,
            live_frames_per_poll: 4,
            clock_drift_threshold_secs: 10,
        }
    }
}

/// Station reception counters, as reported by the console.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceptionStats {
    pub packets_received: u32,
    pub packets_missed: u32,
    pub resynchronizations: u32,
    pub max_consecutive: u32,
    pub crc_errors: u32,
}

impl ReceptionStats {
    fn parse(line: &str) -> Option<ReceptionStats> {
        let values: Vec<u32> = line
            .split_whitespace()
            .map(str::parse)
            .collect::<Result<_, _>>()
            .ok()?;
        let [received, missed, resyncs, max_consecutive, crc_errors] = values[..] else {
            return None;
        };
        Some(ReceptionStats {
            packets_received: received,
            packets_missed: missed,
            resynchronizations: resyncs,
            max_consecutive,
            crc_errors,
        })
    }
}

/// Owner of the console link.
///
/// Serializes protocol operations, stamps and forwards decoded samples,
/// and rebuilds the link after transport faults. Shared across tasks
/// behind an `Arc`.
pub struct LinkSupervisor {
    session: Mutex<LinkSession>,
    config: LinkConfig,
}

impl LinkSupervisor {
    pub fn new(transport: Box<dyn Transport>, config: LinkConfig) -> Self {
        Self {
            session: Mutex::new(LinkSession::new(transport)),
            config,
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Open the transport for the first time.
    pub async fn connect(&self) -> Result<(), LinkError> {
        let mut session = self.session.lock().await;
        session.transport.open().await?;
        session.transport.discard_input().await?;
        session.connected = true;
        session.last_wake = None;
        info!(endpoint = %session.transport.describe(), "console link open");
        Ok(())
    }

    /// Run one live polling cycle: wake if needed, request a burst of
    /// frames, and forward each decoded sample to `sink`. Rollover hooks
    /// fire before the sample that crossed the boundary.
    pub async fn poll_live(
        &self,
        sink: &mut dyn SampleSink,
        rollover: &mut RolloverState,
    ) -> Result<usize, LinkError> {
        let mut session = self.session.lock().await;
        Self::require_awake(&mut session).await?;

        let mut emitted = 0usize;
        let res = {
            let mut emit = |sample: LiveSample| {
                let stamp = local_now();
                let actions = rollover.observe(stamp);
                if actions.day_rollover {
                    sink.on_day_rollover(stamp);
                }
                if actions.midnight_reset {
                    sink.on_midnight_reset(stamp);
                }
                sink.on_live_sample(&sample);
                emitted += 1;
            };
            live::request_and_decode(
                &mut session,
                self.config.live_frames_per_poll,
                &self.config,
                &mut emit,
            )
            .await
        };
        Self::note_fatal(&mut session, &res);
        res.map(|()| emitted)
    }

    /// Replay archive records newer than `resume_after`.
    ///
    /// A resume point in the future means the caller's bookkeeping and the
    /// console clock disagree; the replay is skipped rather than asked to
    /// produce records that cannot exist.
    pub async fn replay_archive(
        &self,
        resume_after: PrimitiveDateTime,
        sink: &mut dyn SampleSink,
        stop: &CancellationToken,
    ) -> Result<u32, LinkError> {
        let now = local_now();
        if resume_after >= now {
            warn!(%resume_after, %now, "resume point is in the future, skipping replay");
            return Ok(0);
        }

        let mut session = self.session.lock().await;
        Self::require_awake(&mut session).await?;
        let params = archive::ReplayParams {
            resume_after,
            logger_interval_minutes: self.config.logger_interval_minutes,
            rollover_hour: self.config.rollover_hour,
            ack_timeout: self.config.ack_timeout,
            page_timeout: self.config.page_timeout,
        };
        let res = archive::replay(session.transport.as_mut(), &params, sink, stop).await;
        Self::note_fatal(&mut session, &res);
        res
    }

    /// Rebuild the link after a fault: reopen the transport, force a wake,
    /// and verify the console echoes a probe command. Bounded by
    /// `reconnect_passes`; returns whether the link is usable again.
    pub async fn reconnect(&self) -> bool {
        let mut session = self.session.lock().await;
        if session.connected && session.transport.is_open() {
            return true;
        }

        for pass in 1..=self.config.reconnect_passes {
            if pass > 1 {
                tokio::time::sleep(self.config.reconnect_cooldown).await;
            }
            session.transport.close().await;
            if let Err(e) = session.transport.open().await {
                warn!(pass, error = %e, "reopen failed");
                continue;
            }
            session.last_wake = None;
            match Self::verify_link(&mut session, self.config.ack_timeout).await {
                Ok(true) => {
                    session.connected = true;
                    info!(pass, endpoint = %session.transport.describe(), "console link reestablished");
                    return true;
                }
                Ok(false) => warn!(pass, "console not responding after reopen"),
                Err(e) => warn!(pass, error = %e, "probe failed after reopen"),
            }
        }

        warn!(
            passes = self.config.reconnect_passes,
            "could not reestablish console link"
        );
        false
    }

    /// Compare the console clock against the local clock. `Ok(None)` when
    /// the link is busy with a higher-priority operation.
    pub async fn check_clock_drift(&self) -> Result<Option<i64>, LinkError> {
        let Ok(mut session) = self.session.try_lock() else {
            trace!("link busy, skipping clock check");
            return Ok(None);
        };
        Self::require_awake(&mut session).await?;
        let res = read_console_time(session.transport.as_mut(), self.config.ack_timeout).await;
        Self::note_fatal(&mut session, &res);
        let drift = (res? - local_now()).whole_seconds();
        debug!(drift, "console clock checked");
        Ok(Some(drift))
    }

    /// Set the console clock to local time. `Ok(false)` when the link is
    /// busy.
    pub async fn sync_clock(&self) -> Result<bool, LinkError> {
        let Ok(mut session) = self.session.try_lock() else {
            trace!("link busy, skipping clock sync");
            return Ok(false);
        };
        Self::require_awake(&mut session).await?;
        let res = write_console_time(session.transport.as_mut(), self.config.ack_timeout).await;
        Self::note_fatal(&mut session, &res);
        res?;
        info!("console clock synchronized");
        Ok(true)
    }

    /// Read the station reception counters. `Ok(None)` when the link is
    /// busy.
    pub async fn reception_stats(&self) -> Result<Option<ReceptionStats>, LinkError> {
        let Ok(mut session) = self.session.try_lock() else {
            trace!("link busy, skipping reception check");
            return Ok(None);
        };
        Self::require_awake(&mut session).await?;
        let res = read_ok_line(session.transport.as_mut(), "RXCHECK", self.config.ack_timeout).await;
        Self::note_fatal(&mut session, &res);
        let line = res?;
        let stats =
            ReceptionStats::parse(&line).ok_or(LinkError::Malformed("reception counters"))?;
        debug!(?stats, "reception counters read");
        Ok(Some(stats))
    }

    /// Check that the console's logger interval matches the configured
    /// one; archive interval arithmetic depends on it. `Ok(None)` when the
    /// link is busy.
    pub async fn verify_logger_interval(&self) -> Result<Option<bool>, LinkError> {
        let Ok(mut session) = self.session.try_lock() else {
            trace!("link busy, skipping logger interval check");
            return Ok(None);
        };
        Self::require_awake(&mut session).await?;
        let res = read_eeprom_byte(session.transport.as_mut(), 0x2d, self.config.ack_timeout).await;
        Self::note_fatal(&mut session, &res);
        let minutes = u16::from(res?);
        let matches = minutes == self.config.logger_interval_minutes;
        if !matches {
            warn!(
                console = minutes,
                configured = self.config.logger_interval_minutes,
                "logger interval mismatch, archive intervals may be wrong"
            );
        }
        Ok(Some(matches))
    }

    /// Poll live samples until `stop` is cancelled, reconnecting after
    /// fatal faults.
    pub async fn run_poll_loop(&self, sink: &mut dyn SampleSink, stop: &CancellationToken) {
        let mut rollover = RolloverState::new(self.config.rollover_hour);
        while !stop.is_cancelled() {
            match self.poll_live(sink, &mut rollover).await {
                Ok(count) => trace!(samples = count, "live poll complete"),
                Err(e) if e.is_fatal() => {
                    warn!(error = %e, "link fault during live poll");
                    if !self.reconnect().await {
                        debug!("reconnect failed, retrying next cycle");
                    }
                    continue;
                }
                Err(e) => warn!(error = %e, "live poll failed"),
            }
            tokio::select! {
                () = stop.cancelled() => break,
                () = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
        info!("poll loop stopped");
    }

    async fn require_awake(session: &mut LinkSession) -> Result<(), LinkError> {
        let res = match wake::ensure_awake(session, false).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(LinkError::WakeFailed {
                attempts: wake::WAKE_ATTEMPTS,
            }),
            Err(e) => Err(e.into()),
        };
        Self::note_fatal(session, &res);
        res
    }

    async fn verify_link(
        session: &mut LinkSession,
        timeout: Duration,
    ) -> Result<bool, TransportError> {
        session.transport.discard_input().await?;
        if !wake::ensure_awake(session, true).await? {
            return Ok(false);
        }
        probe_echo(session.transport.as_mut(), timeout).await
    }

    fn note_fatal<T>(session: &mut LinkSession, res: &Result<T, LinkError>) {
        if let Err(e) = res {
            if e.is_fatal() {
                session.connected = false;
            }
        }
    }
}

/// Echo probe used after a reconnect: the console answers the probe
/// command by echoing its name back.
async fn probe_echo(
    transport: &mut dyn Transport,
    timeout: Duration,
) -> Result<bool, TransportError> {
    const ECHO: &[u8] = b"TEST";
    transport.discard_input().await?;
    transport.write(b"TEST\n").await?;

    let deadline = Instant::now() + timeout;
    let mut matched = 0usize;
    loop {
        let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
            return Ok(false);
        };
        match transport.read_byte(remaining).await {
            Ok(byte) => {
                if byte == ECHO[matched] {
                    matched += 1;
                    if matched == ECHO.len() {
                        return Ok(true);
                    }
                } else {
                    matched = usize::from(byte == ECHO[0]);
                }
            }
            Err(TransportError::Timeout(_)) => return Ok(false),
            Err(e) => return Err(e),
        }
    }
}

async fn read_console_time(
    transport: &mut dyn Transport,
    timeout: Duration,
) -> Result<PrimitiveDateTime, LinkError> {
    let command = "GETTIME";
    match command::exchange(transport, command, timeout).await? {
        CommandOutcome::Ack => {}
        CommandOutcome::Timeout => return Err(LinkError::Timeout),
        outcome => {
            return Err(LinkError::NegativeAck {
                command: command.to_string(),
                outcome,
            })
        }
    }
    let mut block = [0u8; 8];
    transport.read_exact(&mut block, timeout).await?;
    if !crc::is_valid(&block) {
        return Err(LinkError::Checksum {
            what: "console time",
            attempts: 1,
        });
    }
    decode_console_time(&block).ok_or(LinkError::Malformed("console time"))
}

async fn write_console_time(
    transport: &mut dyn Transport,
    timeout: Duration,
) -> Result<(), LinkError> {
    let command = "SETTIME";
    match command::exchange(transport, command, timeout).await? {
        CommandOutcome::Ack => {}
        CommandOutcome::Timeout => return Err(LinkError::Timeout),
        outcome => {
            return Err(LinkError::NegativeAck {
                command: command.to_string(),
                outcome,
            })
        }
    }
    let block = encode_console_time(local_now());
    transport.write(&block).await?;
    match command::read_status(transport, command, timeout).await? {
        Some(CommandOutcome::Ack) => Ok(()),
        Some(outcome) => Err(LinkError::NegativeAck {
            command: command.to_string(),
            outcome,
        }),
        None => Err(LinkError::Timeout),
    }
}

/// Console time block: seconds, minutes, hours, day, month, years since
/// 1900, CRC trailer.
fn decode_console_time(block: &[u8]) -> Option<PrimitiveDateTime> {
    let month = Month::try_from(block[4]).ok()?;
    let date = Date::from_calendar_date(1900 + i32::from(block[5]), month, block[3]).ok()?;
    let time = Time::from_hms(block[2], block[1], block[0]).ok()?;
    Some(PrimitiveDateTime::new(date, time))
}

fn encode_console_time(stamp: PrimitiveDateTime) -> Vec<u8> {
    let mut block = vec![
        stamp.second(),
        stamp.minute(),
        stamp.hour(),
        stamp.day(),
        u8::from(stamp.month()),
        (stamp.year() - 1900).clamp(0, 255) as u8,
    ];
    crc::append(&mut block);
    block
}

/// Issue a text command. These answer with an `OK` line followed by one
/// data line instead of an ACK byte; the data line is returned.
async fn read_ok_line(
    transport: &mut dyn Transport,
    command: &str,
    timeout: Duration,
) -> Result<String, LinkError> {
    transport.discard_input().await?;
    let mut line = Vec::with_capacity(command.len() + 1);
    line.extend_from_slice(command.as_bytes());
    line.push(LF);
    transport.write(&line).await?;

    let deadline = Instant::now() + timeout;
    let mut buf = Vec::new();
    loop {
        let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
            return Err(LinkError::Timeout);
        };
        let byte = match transport.read_byte(remaining).await {
            Ok(byte) => byte,
            Err(TransportError::Timeout(_)) => return Err(LinkError::Timeout),
            Err(e) => return Err(e.into()),
        };
        buf.push(byte);
        if byte != CR {
            continue;
        }
        let text = String::from_utf8_lossy(&buf);
        let mut lines = text
            .split(['\n', '\r'])
            .map(str::trim)
            .filter(|l| !l.is_empty());
        if lines.next() == Some("OK") {
            if let Some(data) = lines.next() {
                return Ok(data.to_string());
            }
        }
    }
}

async fn read_eeprom_byte(
    transport: &mut dyn Transport,
    address: u8,
    timeout: Duration,
) -> Result<u8, LinkError> {
    let command = format!("EEBRD {address:02X} 01");
    match command::exchange(transport, &command, timeout).await? {
        CommandOutcome::Ack => {}
        CommandOutcome::Timeout => return Err(LinkError::Timeout),
        outcome => return Err(LinkError::NegativeAck { command, outcome }),
    }
    let mut block = [0u8; 3];
    transport.read_exact(&mut block, timeout).await?;
    if !crc::is_valid(&block) {
        return Err(LinkError::Checksum {
            what: "eeprom read",
            attempts: 1,
        });
    }
    Ok(block[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockState, MockTransport};
    use time::macros::datetime;

    fn test_config() -> LinkConfig {
        LinkConfig {
            ack_timeout: Duration::from_millis(50),
            frame_timeout: Duration::from_millis(50),
            page_timeout: Duration::from_millis(50),
            reconnect_cooldown: Duration::ZERO,
            live_frames_per_poll: 2,
            ..LinkConfig::default()
        }
    }

    fn live_frame() -> Vec<u8> {
        let mut frame = vec![0u8; LIVE_FRAME_LEN - 2];
        frame[0..3].copy_from_slice(&live::LIVE_SIGNATURE);
        frame[4] = live::LIVE_SUBTYPE_CURRENT;
        frame[7..9].copy_from_slice(&29_920u16.to_le_bytes());
        frame[12..14].copy_from_slice(&655i16.to_le_bytes());
        frame[33] = 55;
        crc::append(&mut frame);
        frame
    }

    fn wake_then(
        mut inner: impl FnMut(&[u8], &mut MockState) + Send + 'static,
    ) -> impl FnMut(&[u8], &mut MockState) + Send + 'static {
        move |written, state| {
            if written == [LF] {
                state.queue(&[LF, CR]);
            } else {
                inner(written, state);
            }
        }
    }

    #[derive(Default)]
    struct CountingSink {
        live: usize,
        archive: usize,
        rollovers: usize,
        midnights: usize,
    }

    impl SampleSink for CountingSink {
        fn on_live_sample(&mut self, _sample: &LiveSample) {
            self.live += 1;
        }
        fn on_archive_record(&mut self, _record: &ArchiveRecord, _interval_minutes: u16) {
            self.archive += 1;
        }
        fn on_day_rollover(&mut self, _at: PrimitiveDateTime) {
            self.rollovers += 1;
        }
        fn on_midnight_reset(&mut self, _at: PrimitiveDateTime) {
            self.midnights += 1;
        }
    }

    #[tokio::test]
    async fn poll_live_wakes_and_forwards_samples() {
        let transport = MockTransport::new().with_responder(wake_then(|written, state| {
            if written.starts_with(b"LOOP") {
                state.queue(&[ACK]);
                state.queue(&live_frame());
                state.queue(&live_frame());
            }
        }));
        let handle = transport.handle();
        let supervisor = LinkSupervisor::new(Box::new(transport), test_config());

        let mut sink = CountingSink::default();
        let mut rollover = RolloverState::new(9);
        let count = supervisor
            .poll_live(&mut sink, &mut rollover)
            .await
            .unwrap();

        assert_eq!(count, 2);
        assert_eq!(sink.live, 2);
        let state = handle.lock().unwrap();
        assert_eq!(state.written[0], LF, "wake precedes the stream request");
        assert!(state.written.windows(4).any(|w| w == b"LOOP"));
    }

    #[tokio::test]
    async fn replay_with_future_resume_point_is_skipped() {
        let transport = MockTransport::new();
        let handle = transport.handle();
        let supervisor = LinkSupervisor::new(Box::new(transport), test_config());

        let mut sink = CountingSink::default();
        let emitted = supervisor
            .replay_archive(
                local_now() + time::Duration::days(1),
                &mut sink,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(emitted, 0);
        assert_eq!(handle.lock().unwrap().write_count, 0);
    }

    #[tokio::test]
    async fn reconnect_reopens_and_probes() {
        let transport = MockTransport::new().with_responder(wake_then(|written, state| {
            if written == b"TEST\n" {
                state.queue(b"\n\rTEST\n\r");
            }
        }));
        let handle = transport.handle();
        handle.lock().unwrap().open = false;
        let supervisor = LinkSupervisor::new(Box::new(transport), test_config());

        assert!(supervisor.reconnect().await);
        let state = handle.lock().unwrap();
        assert!(state.open);
        assert_eq!(state.open_count, 1);
    }

    #[tokio::test]
    async fn reconnect_gives_up_after_bounded_passes() {
        let transport = MockTransport::new();
        let handle = transport.handle();
        {
            let mut state = handle.lock().unwrap();
            state.open = false;
            state.fail_open = true;
        }
        let config = test_config();
        let passes = config.reconnect_passes;
        let supervisor = LinkSupervisor::new(Box::new(transport), config);

        assert!(!supervisor.reconnect().await);
        assert_eq!(handle.lock().unwrap().open_count, passes);
    }

    #[tokio::test]
    async fn clock_drift_is_measured_against_local_time() {
        let transport = MockTransport::new().with_responder(wake_then(|written, state| {
            if written.starts_with(b"GETTIME") {
                state.queue(&[ACK]);
                let ahead = local_now() + time::Duration::minutes(2);
                state.queue(&encode_console_time(ahead));
            }
        }));
        let supervisor = LinkSupervisor::new(Box::new(transport), test_config());

        let drift = supervisor.check_clock_drift().await.unwrap().unwrap();
        assert!((118..=122).contains(&drift), "drift was {drift}");
    }

    #[tokio::test]
    async fn sync_clock_sends_a_validated_time_block() {
        let transport = MockTransport::new().with_responder(wake_then(|written, state| {
            if written.starts_with(b"SETTIME") {
                state.queue(&[ACK]);
            } else if written.len() == 8 && crc::is_valid(written) {
                state.queue(&[ACK]);
            }
        }));
        let supervisor = LinkSupervisor::new(Box::new(transport), test_config());

        assert!(supervisor.sync_clock().await.unwrap());
    }

    #[tokio::test]
    async fn reception_stats_parse_the_counter_line() {
        let transport = MockTransport::new().with_responder(wake_then(|written, state| {
            if written.starts_with(b"RXCHECK") {
                state.queue(b"\n\rOK\n\r 21629 15 0 3204 128\n\r");
            }
        }));
        let supervisor = LinkSupervisor::new(Box::new(transport), test_config());

        let stats = supervisor.reception_stats().await.unwrap().unwrap();
        assert_eq!(
            stats,
            ReceptionStats {
                packets_received: 21629,
                packets_missed: 15,
                resynchronizations: 0,
                max_consecutive: 3204,
                crc_errors: 128,
            }
        );
    }

    #[tokio::test]
    async fn logger_interval_mismatch_is_reported() {
        let transport = MockTransport::new().with_responder(wake_then(|written, state| {
            if written.starts_with(b"EEBRD 2D 01") {
                state.queue(&[ACK]);
                let mut block = vec![30u8];
                crc::append(&mut block);
                state.queue(&block);
            }
        }));
        let supervisor = LinkSupervisor::new(Box::new(transport), test_config());

        // Configured interval is 5 minutes; the console says 30.
        assert_eq!(supervisor.verify_logger_interval().await.unwrap(), Some(false));
    }

    #[test]
    fn console_time_round_trip() {
        let stamp = datetime!(2024-06-15 09:05:42);
        let block = encode_console_time(stamp);
        assert_eq!(block.len(), 8);
        assert!(crc::is_valid(&block));
        assert_eq!(decode_console_time(&block), Some(stamp));
    }

    #[test]
    fn short_counter_line_is_rejected() {
        assert_eq!(ReceptionStats::parse("21629 15 0"), None);
        assert_eq!(ReceptionStats::parse("21629 15 0 3204 bogus"), None);
    }
}
