//! Driver configuration

use std::time::Duration;

use crate::bringup::DEFAULT_SAMPLE_RATE;

/// Tunables of an [`APS2`][`crate::APS2`] driver instance.
///
/// Built with chained setters on top of [`Config::default`]:
///
/// ```
/// use std::time::Duration;
/// use libaps2::Config;
///
/// let config = Config::default()
///     .reply_timeout(Duration::from_millis(200))
///     .status_poll_attempts(20)
///     .sample_rate(600);
///
/// assert_eq!(config.get_status_poll_attempts(), 20);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    reply_timeout: Duration,
    status_poll_attempts: u32,
    status_poll_interval: Duration,
    acknowledge_writes: bool,
    firmware_skew: u32,
    sample_rate: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            reply_timeout: Duration::from_millis(500),
            status_poll_attempts: 10,
            status_poll_interval: Duration::from_millis(10),
            acknowledge_writes: true,
            firmware_skew: 0,
            sample_rate: DEFAULT_SAMPLE_RATE,
        }
    }
}

impl Config {

    /// How long to wait for the reply to each frame (default: 500 ms)
    pub fn reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    /// How many times a status register is polled before giving up
    /// (default: 10). At least one poll is always made.
    pub fn status_poll_attempts(mut self, n: u32) -> Self {
        self.status_poll_attempts = n.max(1);
        self
    }

    /// Delay between status polls (default: 10 ms)
    pub fn status_poll_interval(mut self, interval: Duration) -> Self {
        self.status_poll_interval = interval;
        self
    }

    /// Wait for the device to confirm every register write (default:
    /// true). When disabled writes are fire-and-forget.
    pub fn acknowledge_writes(mut self, enabled: bool) -> Self {
        self.acknowledge_writes = enabled;
        self
    }

    /// Tolerated difference between host and user firmware versions
    /// (default: 0)
    pub fn firmware_skew(mut self, skew: u32) -> Self {
        self.firmware_skew = skew;
        self
    }

    /// Sample rate for the first PLL bring-up, in MHz (default: 1200)
    pub fn sample_rate(mut self, rate: u32) -> Self {
        self.sample_rate = rate;
        self
    }

    pub fn get_reply_timeout(&self) -> Duration {
        self.reply_timeout
    }

    pub fn get_status_poll_attempts(&self) -> u32 {
        self.status_poll_attempts
    }

    pub fn get_status_poll_interval(&self) -> Duration {
        self.status_poll_interval
    }

    pub fn get_acknowledge_writes(&self) -> bool {
        self.acknowledge_writes
    }

    pub fn get_firmware_skew(&self) -> u32 {
        self.firmware_skew
    }

    pub fn get_sample_rate(&self) -> u32 {
        self.sample_rate
    }
}


#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.get_reply_timeout(), Duration::from_millis(500));
        assert_eq!(config.get_status_poll_attempts(), 10);
        assert_eq!(config.get_status_poll_interval(), Duration::from_millis(10));
        assert!(config.get_acknowledge_writes());
        assert_eq!(config.get_firmware_skew(), 0);
        assert_eq!(config.get_sample_rate(), 1200);
    }

    #[test]
    fn chained() {
        let config = Config::default()
            .acknowledge_writes(false)
            .status_poll_attempts(0)
            .firmware_skew(2);

        assert!(!config.get_acknowledge_writes());
        assert_eq!(config.get_status_poll_attempts(), 1);
        assert_eq!(config.get_firmware_skew(), 2);
    }
}
