//! Upward interface for decoded samples.

use time::PrimitiveDateTime;

use crate::console::{ArchiveRecord, LiveSample};

/// Receiver for everything the link engine produces.
///
/// Callbacks are invoked synchronously while the exchange lock is held, and
/// archive records arrive in strict chronological order. The rollover hooks
/// fire at most once per calendar boundary per session, always before the
/// record that triggered them is forwarded.
///
/// Implementations must not panic; nothing in the engine throws across this
/// boundary.
pub trait SampleSink: Send {
    fn on_live_sample(&mut self, sample: &LiveSample);

    /// `interval_minutes` is the elapsed time since the previous accepted
    /// record, or the station's configured logging interval for the first
    /// record of a replay.
    fn on_archive_record(&mut self, record: &ArchiveRecord, interval_minutes: u16);

    /// The configured meteorological-day boundary was crossed.
    fn on_day_rollover(&mut self, timestamp: PrimitiveDateTime);

    /// Midnight was crossed; daily rain/sun/extreme counters reset here.
    fn on_midnight_reset(&mut self, timestamp: PrimitiveDateTime);
}
