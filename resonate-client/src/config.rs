//! resonate-client specific configuration

use std::time::Duration;

/// Client session configuration.
///
/// Timing constants that define the protocol (tick period, playout window,
/// queue cap) live next to their components; this struct only carries the
/// knobs a deployment actually tunes.
#[derive(Debug, Clone)]
pub struct Config {
    /// Human-readable client name sent in `client/hello`
    pub name: String,
    /// Output device name (None = system default)
    pub device: Option<String>,
    /// Back-pressure budget for PCM queued toward the sink, in bytes
    pub sink_capacity_bytes: usize,
    /// Handshake must complete within this window
    pub handshake_timeout: Duration,
    /// Number of `client/time` probes in the initial burst
    pub probe_burst: u32,
    /// Spacing between burst probes
    pub probe_burst_spacing: Duration,
    /// Steady-state probe cadence after the burst
    pub probe_interval: Duration,
    /// Initial volume, 0.0..=1.0
    pub initial_volume: f32,
}

impl Config {
    /// Config with a given client name and defaults for everything else.
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: "resonate-client".to_string(),
            device: None,
            sink_capacity_bytes: 2 * 1024 * 1024,
            handshake_timeout: Duration::from_secs(5),
            probe_burst: 5,
            probe_burst_spacing: Duration::from_millis(100),
            probe_interval: Duration::from_secs(5),
            initial_volume: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.sink_capacity_bytes, 2 * 1024 * 1024);
        assert_eq!(cfg.probe_burst, 5);
        assert_eq!(cfg.handshake_timeout, Duration::from_secs(5));
        assert_eq!(cfg.probe_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_with_name() {
        let cfg = Config::with_name("kitchen");
        assert_eq!(cfg.name, "kitchen");
        assert_eq!(cfg.probe_burst, Config::default().probe_burst);
    }
}
