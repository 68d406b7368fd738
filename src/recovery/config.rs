use std::time::Duration;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Settings for the recovery sweep.
///
/// Zero values mean "use the default"; see [`RecoveryConfig::normalized`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryConfig {
    /// Time between sweeps.
    pub interval: Duration,
    /// Max pending envelopes fetched per sweep.
    pub batch_size: usize,
    /// Max retry attempts in flight at once.
    pub concurrency: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            batch_size: DEFAULT_BATCH_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

impl RecoveryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the sweep interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the batch size (max envelopes per sweep).
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Set the number of concurrent retry slots.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Replace unset (zero) fields with their defaults.
    pub fn normalized(self) -> Self {
        Self {
            interval: if self.interval.is_zero() {
                DEFAULT_INTERVAL
            } else {
                self.interval
            },
            batch_size: if self.batch_size == 0 {
                DEFAULT_BATCH_SIZE
            } else {
                self.batch_size
            },
            concurrency: if self.concurrency == 0 {
                DEFAULT_CONCURRENCY
            } else {
                self.concurrency
            },
        }
    }
}
