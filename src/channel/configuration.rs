//! Channel timing configuration.

use std::process;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Default total lifetime of a channel.
pub const DEFAULT_EXPIRATION: Duration = Duration::from_secs(90 * 60);

/// Default tolerated inbound silence before the channel is dropped.
pub const DEFAULT_INACTIVITY: Duration = Duration::from_secs(30 * 60);

/// Default period of the consumer-driven revival timer.
pub const DEFAULT_REVIVAL: Duration = Duration::from_secs(60);

/// Durations of the three channel deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelTimeouts {
    /// Total channel lifetime. The armed duration is drawn uniformly from
    /// ±40% around this value so that many channels opened together do not
    /// all expire together.
    pub expiration: Duration,
    /// Maximum inbound silence. Rearmed on every completed read step.
    pub inactivity: Duration,
    /// Revival period. Rearmed only by an explicit reset; its meaning is
    /// set by the layer above.
    pub revival: Duration,
}

impl Default for ChannelTimeouts {
    fn default() -> Self {
        Self {
            expiration: DEFAULT_EXPIRATION,
            inactivity: DEFAULT_INACTIVITY,
            revival: DEFAULT_REVIVAL,
        }
    }
}

impl ChannelTimeouts {
    /// Draw an expiration duration uniformly from ±40% around the
    /// configured value.
    ///
    /// Uses wall-clock nanoseconds mixed with the process id for cheap
    /// non-cryptographic entropy; desynchronizing timers does not need a
    /// random number generator.
    pub fn randomized_expiration(&self) -> Duration {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("System time is before the Unix epoch")
            .as_nanos() as u64;
        let pid = process::id() as u64;
        let entropy = now ^ pid.rotate_left(32);

        let unit = (entropy % 10_000) as f64 / 10_000.0;
        self.expiration.mul_f64(0.6 + 0.8 * unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_randomized_expiration_stays_in_band() {
        let timeouts = ChannelTimeouts::default();
        for _ in 0..100 {
            let drawn = timeouts.randomized_expiration();
            assert!(drawn >= timeouts.expiration.mul_f64(0.6));
            assert!(drawn <= timeouts.expiration.mul_f64(1.4));
        }
    }
}
