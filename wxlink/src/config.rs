//! Daemon configuration.
//!
//! Loaded from a TOML file. Station settings default to the common factory
//! configuration; the timing section exists mostly for unusual links (slow
//! serial radios, high-latency network bridges) and is rarely needed.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::console::LinkConfig;
use crate::transport::{SerialTransport, TcpTransport, Transport};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read {path}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("could not parse {path}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub transport: TransportSettings,
    #[serde(default)]
    pub station: StationSettings,
    #[serde(default)]
    pub timing: TimingSettings,
}

/// Which byte channel to use.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransportSettings {
    Serial {
        device: String,
        #[serde(default = "default_baud")]
        baud: u32,
    },
    Tcp {
        host: String,
        port: u16,
    },
}

fn default_baud() -> u32 {
    19_200
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StationSettings {
    /// Interval the console's internal logger records at.
    pub logger_interval_minutes: u16,
    /// Local hour at which the meteorological day rolls over.
    pub rollover_hour: u8,
    /// How far back to replay the archive on startup. Zero disables the
    /// catch-up replay.
    pub catchup_hours: u32,
}

impl Default for StationSettings {
    fn default() -> Self {
        Self {
            logger_interval_minutes: 5,
            rollover_hour: 9,
            catchup_hours: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimingSettings {
    pub ack_timeout_ms: u64,
    pub frame_timeout_ms: u64,
    pub page_timeout_ms: u64,
    pub poll_interval_secs: u64,
    pub reconnect_cooldown_secs: u64,
    pub reconnect_passes: usize,
    pub live_frames_per_poll: usize,
    pub clock_drift_threshold_secs: i64,
}

impl Default for TimingSettings {
    fn default() -> Self {
        let link = LinkConfig::default();
        Self {
            ack_timeout_ms: link.ack_timeout.as_millis() as u64,
            frame_timeout_ms: link.frame_timeout.as_millis() as u64,
            page_timeout_ms: link.page_timeout.as_millis() as u64,
            poll_interval_secs: link.poll_interval.as_secs(),
            reconnect_cooldown_secs: link.reconnect_cooldown.as_secs(),
            reconnect_passes: link.reconnect_passes,
            live_frames_per_poll: link.live_frames_per_poll,
            clock_drift_threshold_secs: link.clock_drift_threshold_secs,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Config = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.station.rollover_hour > 23 {
            return Err(ConfigError::Invalid("rollover_hour must be 0-23"));
        }
        if self.station.logger_interval_minutes == 0 {
            return Err(ConfigError::Invalid("logger_interval_minutes must be nonzero"));
        }
        if self.timing.live_frames_per_poll == 0 {
            return Err(ConfigError::Invalid("live_frames_per_poll must be nonzero"));
        }
        if self.timing.reconnect_passes == 0 {
            return Err(ConfigError::Invalid("reconnect_passes must be nonzero"));
        }
        Ok(())
    }

    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            logger_interval_minutes: self.station.logger_interval_minutes,
            rollover_hour: self.station.rollover_hour,
            ack_timeout: Duration::from_millis(self.timing.ack_timeout_ms),
            frame_timeout: Duration::from_millis(self.timing.frame_timeout_ms),
            page_timeout: Duration::from_millis(self.timing.page_timeout_ms),
            poll_interval: Duration::from_secs(self.timing.poll_interval_secs),
            reconnect_cooldown: Duration::from_secs(self.timing.reconnect_cooldown_secs),
            reconnect_passes: self.timing.reconnect_passes,
            live_frames_per_poll: self.timing.live_frames_per_poll,
            clock_drift_threshold_secs: self.timing.clock_drift_threshold_secs,
        }
    }

    pub fn build_transport(&self) -> Box<dyn Transport> {
        match &self.transport {
            TransportSettings::Serial { device, baud } => {
                Box::new(SerialTransport::new(device.clone(), *baud))
            }
            TransportSettings::Tcp { host, port } => Box::new(TcpTransport::new(host.clone(), *port)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_serial_configuration() {
        let config: Config = toml::from_str(
            r#"
            [transport]
            kind = "serial"
            device = "/dev/ttyUSB0"

            [station]
            logger_interval_minutes = 10
            rollover_hour = 9
            catchup_hours = 24
            "#,
        )
        .unwrap();

        assert!(matches!(
            config.transport,
            TransportSettings::Serial { ref device, baud: 19_200 } if device == "/dev/ttyUSB0"
        ));
        assert_eq!(config.station.logger_interval_minutes, 10);
        assert_eq!(config.station.catchup_hours, 24);
        let link = config.link_config();
        assert_eq!(link.logger_interval_minutes, 10);
        assert_eq!(link.ack_timeout, Duration::from_millis(1200));
    }

    #[test]
    fn parses_a_tcp_configuration_with_timing_overrides() {
        let config: Config = toml::from_str(
            r#"
            [transport]
            kind = "tcp"
            host = "console.lan"
            port = 22222

            [timing]
            ack_timeout_ms = 2500
            poll_interval_secs = 30
            "#,
        )
        .unwrap();

        let link = config.link_config();
        assert_eq!(link.ack_timeout, Duration::from_millis(2500));
        assert_eq!(link.poll_interval, Duration::from_secs(30));
        assert_eq!(link.frame_timeout, Duration::from_secs(3));
    }

    #[test]
    fn rejects_an_out_of_range_rollover_hour() {
        let config: Config = toml::from_str(
            r#"
            [transport]
            kind = "tcp"
            host = "console.lan"
            port = 22222

            [station]
            rollover_hour = 24
            "#,
        )
        .unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_unknown_sections() {
        let res = toml::from_str::<Config>(
            r#"
            [transport]
            kind = "serial"
            device = "/dev/ttyUSB0"

            [consoles]
            extra = true
            "#,
        );
        assert!(res.is_err());
    }
}
