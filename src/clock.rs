//! Virtual clocks for pacing replays
//!
//! A replay never reads the OS clock directly; it waits on a [`Clock`]
//! handed in at construction. Two implementations:
//!
//! - [`WallClock`]: real time, `until` sleeps.
//! - [`FastClock`]: a logical time advanced on demand — waiting on the
//!   clock advances it, so a replay runs as fast as the pipeline can
//!   consume. A test harness may also advance it explicitly with
//!   [`FastClock::set`].
//!
//! Both expose a `zero` reference instant so a deterministic replay can
//! pin "the beginning" to a fixed wall-clock value.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Time source for replays.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Reference instant treated as the beginning of the replay timeline.
    fn zero(&self) -> DateTime<Utc>;

    /// Current reading of the clock.
    fn now(&self) -> DateTime<Utc>;

    /// Block until the clock reaches `t`.
    async fn until(&self, t: DateTime<Utc>);
}

/// Real-time clock.
#[derive(Debug, Clone, Copy)]
pub struct WallClock {
    zero: DateTime<Utc>,
}

impl WallClock {
    /// Create a wall clock whose zero is the current instant.
    pub fn new() -> Self {
        Self { zero: Utc::now() }
    }

    /// Create a wall clock with an explicit zero.
    pub fn with_zero(zero: DateTime<Utc>) -> Self {
        Self { zero }
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for WallClock {
    fn zero(&self) -> DateTime<Utc> {
        self.zero
    }

    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn until(&self, t: DateTime<Utc>) {
        let now = Utc::now();
        if t <= now {
            return;
        }
        // to_std fails only on negative durations, excluded above
        if let Ok(d) = (t - now).to_std() {
            tokio::time::sleep(d).await;
        }
    }
}

/// Logical clock that advances on demand.
///
/// `until` advances the internal time to the target and returns
/// immediately; `now` reads whatever the last wait (or `set`) advanced it
/// to. Time never moves backwards.
#[derive(Debug)]
pub struct FastClock {
    zero: DateTime<Utc>,
    now: Mutex<DateTime<Utc>>,
}

impl FastClock {
    /// Create a fast clock pinned to the given zero instant.
    pub fn new(zero: DateTime<Utc>) -> Self {
        Self {
            zero,
            now: Mutex::new(zero),
        }
    }

    /// Advance the clock to `t`. Earlier instants are ignored.
    pub fn set(&self, t: DateTime<Utc>) {
        let mut now = self.now.lock();
        if t > *now {
            *now = t;
        }
    }
}

#[async_trait]
impl Clock for FastClock {
    fn zero(&self) -> DateTime<Utc> {
        self.zero
    }

    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }

    async fn until(&self, t: DateTime<Utc>) {
        self.set(t);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn epoch_1971() -> DateTime<Utc> {
        // Not epoch 0, so a forgotten zero shows up in assertions
        Utc.with_ymd_and_hms(1971, 1, 1, 0, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_fast_clock_advances_on_until() {
        let clock = FastClock::new(epoch_1971());
        assert_eq!(clock.now(), epoch_1971());

        let target = epoch_1971() + Duration::seconds(21);
        clock.until(target).await;
        assert_eq!(clock.now(), target);
    }

    #[tokio::test]
    async fn test_fast_clock_never_moves_backwards() {
        let clock = FastClock::new(epoch_1971());
        let far = epoch_1971() + Duration::seconds(30);
        clock.set(far);
        clock.until(epoch_1971() + Duration::seconds(10)).await;
        assert_eq!(clock.now(), far);

        clock.set(epoch_1971());
        assert_eq!(clock.now(), far);
    }

    #[tokio::test]
    async fn test_wall_clock_until_past_returns_immediately() {
        let clock = WallClock::new();
        let before = Utc::now();
        clock.until(before - Duration::seconds(5)).await;
        // No sleep happened; generous bound for slow CI
        assert!(Utc::now() - before < Duration::seconds(1));
    }

    #[test]
    fn test_wall_clock_zero_is_fixed() {
        let zero = epoch_1971();
        let clock = WallClock::with_zero(zero);
        assert_eq!(clock.zero(), zero);
    }
}
