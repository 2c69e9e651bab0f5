use mahayatra_core::lock::{DEFAULT_HOLD_SECONDS, DEFAULT_MAX_SEATS_PER_SESSION};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ClientConfig {
    pub base_url: String,
    /// Countdown length when a lock response does not report the server's hold.
    #[serde(default = "default_hold_seconds")]
    pub hold_seconds: u64,
    #[serde(default = "default_max_seats")]
    pub max_seats: usize,
    /// How long before expiry the user is warned.
    #[serde(default = "default_warning_seconds")]
    pub warning_seconds: u64,
}

fn default_hold_seconds() -> u64 {
    DEFAULT_HOLD_SECONDS
}

fn default_max_seats() -> usize {
    DEFAULT_MAX_SEATS_PER_SESSION
}

fn default_warning_seconds() -> u64 {
    30
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            hold_seconds: default_hold_seconds(),
            max_seats: default_max_seats(),
            warning_seconds: default_warning_seconds(),
        }
    }

    pub fn hold_duration(&self) -> Duration {
        Duration::from_secs(self.hold_seconds)
    }

    /// Offset from the start of a `hold`-long countdown at which the warning fires, if any.
    pub fn warning_after(&self, hold: Duration) -> Option<Duration> {
        let warning = Duration::from_secs(self.warning_seconds);
        (!warning.is_zero() && warning < hold).then(|| hold - warning)
    }
}
