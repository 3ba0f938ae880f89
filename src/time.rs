//! Monotonic time for deadlines and keep-alive.
//!
//! Scheduling never looks at wall-clock time: an [`Instant`] is a count of
//! milliseconds from an arbitrary origin supplied by a [`Clock`]. Hosted
//! builds use [`StdClock`]; tests and simulations drive a [`ManualClock`].

use core::cell::Cell;
use core::ops::Add;
use core::time::Duration;

/// A point on a monotonic millisecond timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Instant {
    millis: u64,
}

impl Instant {
    /// The origin of the timeline.
    pub const ZERO: Instant = Instant { millis: 0 };

    /// An instant `millis` milliseconds after the origin.
    pub const fn from_millis(millis: u64) -> Self {
        Self { millis }
    }

    /// Milliseconds since the origin.
    pub const fn as_millis(&self) -> u64 {
        self.millis
    }

    /// Time elapsed since `earlier`, or zero if `earlier` is later.
    pub fn saturating_duration_since(&self, earlier: Instant) -> Duration {
        Duration::from_millis(self.millis.saturating_sub(earlier.millis))
    }

    /// Time elapsed since `earlier`, or `None` if `earlier` is later.
    pub fn checked_duration_since(&self, earlier: Instant) -> Option<Duration> {
        self.millis.checked_sub(earlier.millis).map(Duration::from_millis)
    }
}

impl Add<Duration> for Instant {
    type Output = Instant;

    fn add(self, rhs: Duration) -> Instant {
        let delta = u64::try_from(rhs.as_millis()).unwrap_or(u64::MAX);
        Instant {
            millis: self.millis.saturating_add(delta),
        }
    }
}

/// Source of monotonic time.
pub trait Clock {
    /// The current instant. Successive calls never go backwards.
    fn now(&self) -> Instant;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Instant {
        (**self).now()
    }
}

/// Seconds since the Unix epoch, used only to stamp samples.
pub trait WallClock {
    /// Current UTC time in whole seconds.
    fn unix_seconds(&self) -> i64;
}

impl<W: WallClock + ?Sized> WallClock for &W {
    fn unix_seconds(&self) -> i64 {
        (**self).unix_seconds()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: Cell<u64>,
}

impl ManualClock {
    /// A clock stopped at the origin.
    pub fn new() -> Self {
        Self::default()
    }

    /// Jump to `millis`. Moving backwards is ignored.
    pub fn set_millis(&self, millis: u64) {
        if millis > self.millis.get() {
            self.millis.set(millis);
        }
    }

    /// Move forward by `delta`.
    pub fn advance(&self, delta: Duration) {
        self.millis.set((Instant::from_millis(self.millis.get()) + delta).as_millis());
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        Instant::from_millis(self.millis.get())
    }
}

impl WallClock for ManualClock {
    fn unix_seconds(&self) -> i64 {
        i64::try_from(self.millis.get() / 1000).unwrap_or(i64::MAX)
    }
}

/// Monotonic clock backed by `std::time::Instant`.
#[cfg(feature = "std")]
#[derive(Debug, Clone, Copy)]
pub struct StdClock {
    origin: std::time::Instant,
}

#[cfg(feature = "std")]
impl StdClock {
    /// A clock whose origin is the moment of construction.
    pub fn new() -> Self {
        Self {
            origin: std::time::Instant::now(),
        }
    }
}

#[cfg(feature = "std")]
impl Default for StdClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "std")]
impl Clock for StdClock {
    fn now(&self) -> Instant {
        let elapsed = self.origin.elapsed().as_millis();
        Instant::from_millis(u64::try_from(elapsed).unwrap_or(u64::MAX))
    }
}

/// The host's real-time clock.
#[cfg(feature = "std")]
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemWallClock;

#[cfg(feature = "std")]
impl WallClock for SystemWallClock {
    fn unix_seconds(&self) -> i64 {
        match std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) {
            Ok(since) => i64::try_from(since.as_secs()).unwrap_or(i64::MAX),
            Err(before) => -i64::try_from(before.duration().as_secs()).unwrap_or(i64::MAX),
        }
    }
}

/// `embedded_hal` delay that puts the thread to sleep.
#[cfg(feature = "std")]
#[derive(Debug, Clone, Copy, Default)]
pub struct StdDelay;

#[cfg(feature = "std")]
impl embedded_hal::delay::DelayNs for StdDelay {
    fn delay_ns(&mut self, ns: u32) {
        std::thread::sleep(Duration::from_nanos(u64::from(ns)));
    }

    fn delay_us(&mut self, us: u32) {
        std::thread::sleep(Duration::from_micros(u64::from(us)));
    }

    fn delay_ms(&mut self, ms: u32) {
        std::thread::sleep(Duration::from_millis(u64::from(ms)));
    }
}
