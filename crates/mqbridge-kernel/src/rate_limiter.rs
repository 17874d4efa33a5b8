//! [`RateLimiter`] – minimum-interval gate for one bridge.
//!
//! A delivery passes iff `now - last_forwarded >= min_interval`; passing
//! moves `last_forwarded` to `now`.  The compare and the update happen under
//! one mutex so two concurrent deliveries on the same bridge can never both
//! pass when only one should.
//!
//! `last_forwarded` starts at construction time, so with a non-zero interval
//! the first delivery passes only once a full interval has elapsed since the
//! bridge was created.  A zero interval passes every delivery.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use mqbridge_kernel::rate_limiter::{ManualClock, RateLimiter};
//!
//! let clock = Arc::new(ManualClock::new());
//! let limiter = RateLimiter::new(Duration::from_millis(100), clock.clone());
//!
//! assert!(!limiter.try_acquire());
//! clock.advance(Duration::from_millis(100));
//! assert!(limiter.try_acquire());
//! assert!(!limiter.try_acquire());
//! ```

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use mqbridge_types::BridgeError;

// ────────────────────────────────────────────────────────────────────────────
// Clocks
// ────────────────────────────────────────────────────────────────────────────

/// Monotonic time source.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// The process's monotonic clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Hand-driven clock for deterministic timing tests.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Move the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(|e| e.into_inner());
        *offset += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// RateLimiter
// ────────────────────────────────────────────────────────────────────────────

/// Per-bridge forwarding gate.
pub struct RateLimiter {
    min_interval: Duration,
    last_forwarded: Mutex<Instant>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a limiter enforcing `min_interval` between forwards.
    pub fn new(min_interval: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            min_interval,
            last_forwarded: Mutex::new(clock.now()),
            clock,
        }
    }

    /// A limiter that passes every delivery.
    pub fn unlimited(clock: Arc<dyn Clock>) -> Self {
        Self::new(Duration::ZERO, clock)
    }

    /// Convert a forwarding `frequency` in Hz into `min_interval = 1 /
    /// frequency`; `None` means unlimited.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Config`] for zero, negative or non-finite frequencies.
    pub fn from_frequency(frequency: Option<f64>, clock: Arc<dyn Clock>) -> Result<Self, BridgeError> {
        match frequency {
            None => Ok(Self::unlimited(clock)),
            Some(hz) if hz.is_finite() && hz > 0.0 => {
                let interval = Duration::try_from_secs_f64(1.0 / hz).map_err(|e| {
                    BridgeError::Config(format!("frequency {hz} Hz has no valid interval: {e}"))
                })?;
                Ok(Self::new(interval, clock))
            }
            Some(hz) => Err(BridgeError::Config(format!(
                "frequency must be a positive number of Hz, got {hz}"
            ))),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Atomically decide whether a delivery arriving now may be forwarded,
    /// recording it as the latest forward when it may.
    pub fn try_acquire(&self) -> bool {
        let mut last = self
            .last_forwarded
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let now = self.clock.now();
        if now.saturating_duration_since(*last) >= self.min_interval {
            *last = now;
            true
        } else {
            false
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("min_interval", &self.min_interval)
            .finish()
    }
}
