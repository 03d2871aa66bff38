//! Clock abstractions used by process-local stores.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Clock abstraction so timing can be faked in tests.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current time as seconds since an arbitrary, fixed epoch.
    fn now_secs(&self) -> f64;
}

/// Wall clock backed by `SystemTime::now()`.
///
/// Notes: seconds are measured from 2017-01-01 rather than the Unix epoch, which
/// keeps more sub-millisecond precision in an `f64`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

/// 2017-01-01T00:00:00Z as Unix seconds.
pub const EPOCH_OFFSET_SECS: u64 = 1_483_228_800;

impl Clock for SystemClock {
    fn now_secs(&self) -> f64 {
        let since_unix = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        since_unix.saturating_sub(Duration::from_secs(EPOCH_OFFSET_SECS)).as_secs_f64()
    }
}

/// Manually advanced clock for deterministic tests. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    micros: Arc<AtomicU64>,
}

impl ManualClock {
    /// Start at `start` past the epoch.
    pub fn new(start: Duration) -> Self {
        let clock = Self::default();
        clock.set(start);
        clock
    }

    /// Move time forward.
    pub fn advance(&self, by: Duration) {
        self.micros.fetch_add(duration_micros(by), Ordering::SeqCst);
    }

    /// Jump to an absolute time.
    pub fn set(&self, at: Duration) {
        self.micros.store(duration_micros(at), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_secs(&self) -> f64 {
        self.micros.load(Ordering::SeqCst) as f64 / 1_000_000.0
    }
}

fn duration_micros(d: Duration) -> u64 {
    u64::try_from(d.as_micros()).unwrap_or(u64::MAX)
}
