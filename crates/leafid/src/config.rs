use crate::{Error, Result};
use core::time::Duration;

/// Consumed fraction of the active segment at which the standby is
/// prefetched.
pub const DEFAULT_WATERMARK: f64 = 0.85;

/// How often each buffer's refill task wakes up.
pub const DEFAULT_REFILL_INTERVAL: Duration = Duration::from_millis(500);

/// Largest step a caller may request.
pub const DEFAULT_MAX_STEP: u32 = 100_000;

/// Tuning for a single [`Buffer`](crate::Buffer).
#[derive(Clone, Debug, PartialEq)]
pub struct BufferConfig {
    pub watermark: f64,
    pub refill_interval: Duration,
    /// Upper bound on every store call. `None` waits indefinitely.
    pub fetch_timeout: Option<Duration>,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            watermark: DEFAULT_WATERMARK,
            refill_interval: DEFAULT_REFILL_INTERVAL,
            fetch_timeout: None,
        }
    }
}

impl BufferConfig {
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the watermark is outside
    /// `(0, 1]` or either duration is zero.
    pub fn validate(&self) -> Result<()> {
        if !(self.watermark > 0.0 && self.watermark <= 1.0) {
            return Err(Error::invalid(format!(
                "watermark {} must be in (0, 1]",
                self.watermark
            )));
        }
        if self.refill_interval.is_zero() {
            return Err(Error::invalid("refill interval must be greater than 0"));
        }
        if self.fetch_timeout.is_some_and(|t| t.is_zero()) {
            return Err(Error::invalid("fetch timeout must be greater than 0"));
        }
        Ok(())
    }
}

/// Tuning for a [`Dispenser`](crate::Dispenser).
#[derive(Clone, Debug, PartialEq)]
pub struct DispenserConfig {
    pub max_step: u32,
    pub buffer: BufferConfig,
}

impl Default for DispenserConfig {
    fn default() -> Self {
        Self {
            max_step: DEFAULT_MAX_STEP,
            buffer: BufferConfig::default(),
        }
    }
}

impl DispenserConfig {
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `max_step` is zero or the buffer
    /// configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.max_step == 0 {
            return Err(Error::invalid("max step must be greater than 0"));
        }
        self.buffer.validate()
    }
}
