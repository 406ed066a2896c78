//! Console link daemon.
//!
//! Opens the configured transport, optionally replays the archive to catch
//! up after downtime, then polls live samples until interrupted. Decoded
//! samples are written to the log; this binary doubles as the reference
//! [`SampleSink`] implementation.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use time::PrimitiveDateTime;
use tokio_util::sync::CancellationToken;

use wxlink::config::Config;
use wxlink::console::{local_now, ArchiveRecord, LinkSupervisor, LiveSample};
use wxlink::sink::SampleSink;
use wxlink::tracing::prelude::*;

const CLOCK_CHECK_INTERVAL: Duration = Duration::from_secs(3600);

struct LogSink;

impl SampleSink for LogSink {
    fn on_live_sample(&mut self, sample: &LiveSample) {
        info!(
            at = %sample.timestamp,
            outside_temp_f = ?sample.outside_temp_f,
            outside_humidity = ?sample.outside_humidity,
            wind_mph = ?sample.wind_speed_mph,
            barometer_inhg = ?sample.barometer_inhg,
            "live sample"
        );
    }

    fn on_archive_record(&mut self, record: &ArchiveRecord, interval_minutes: u16) {
        info!(
            at = %record.timestamp,
            interval_minutes,
            outside_temp_f = ?record.outside_temp_f,
            rain_clicks = record.rain_clicks,
            "archive record"
        );
    }

    fn on_day_rollover(&mut self, at: PrimitiveDateTime) {
        info!(%at, "day rollover");
    }

    fn on_midnight_reset(&mut self, at: PrimitiveDateTime) {
        info!(%at, "midnight reset");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    wxlink::tracing::init();

    let path = env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("wxlink.toml"));
    let config = Config::load(&path).with_context(|| format!("loading {}", path.display()))?;

    let supervisor = Arc::new(LinkSupervisor::new(
        config.build_transport(),
        config.link_config(),
    ));
    supervisor.connect().await.context("opening console link")?;

    let stop = CancellationToken::new();
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, shutting down");
                stop.cancel();
            }
        });
    }

    match supervisor.verify_logger_interval().await {
        Ok(Some(true)) => debug!("console logger interval confirmed"),
        Ok(_) => {}
        Err(e) => warn!(error = %e, "could not verify logger interval"),
    }

    if config.station.catchup_hours > 0 {
        let resume = local_now() - time::Duration::hours(i64::from(config.station.catchup_hours));
        let mut sink = LogSink;
        match supervisor.replay_archive(resume, &mut sink, &stop).await {
            Ok(records) => info!(records, "catch-up replay complete"),
            Err(e) => warn!(error = %e, "catch-up replay failed"),
        }
    }

    let maintenance = tokio::spawn(maintain_link(Arc::clone(&supervisor), stop.clone()));

    let mut sink = LogSink;
    supervisor.run_poll_loop(&mut sink, &stop).await;

    let _ = maintenance.await;
    Ok(())
}

/// Hourly housekeeping: keep the console clock honest and surface the
/// station reception counters. Every operation here yields to live polls
/// and replays; a busy link just skips the cycle.
async fn maintain_link(supervisor: Arc<LinkSupervisor>, stop: CancellationToken) {
    let threshold = supervisor.config().clock_drift_threshold_secs;
    loop {
        tokio::select! {
            () = stop.cancelled() => break,
            () = tokio::time::sleep(CLOCK_CHECK_INTERVAL) => {}
        }

        match supervisor.check_clock_drift().await {
            Ok(Some(drift)) if drift.abs() > threshold => {
                warn!(drift, "console clock drifted, resynchronizing");
                if let Err(e) = supervisor.sync_clock().await {
                    warn!(error = %e, "clock sync failed");
                }
            }
            Ok(Some(drift)) => trace!(drift, "console clock within tolerance"),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "clock check failed"),
        }

        match supervisor.reception_stats().await {
            Ok(Some(stats)) => info!(?stats, "station reception counters"),
            Ok(None) => {}
            Err(e) => debug!(error = %e, "reception check failed"),
        }
    }
}
