//! Producers of [`TelemetrySample`]s for the publish loop.
//!
//! Every source keeps `time_utc` non-decreasing: a timestamp earlier than
//! the previous one is clamped to it.

use super::TelemetrySample;
use super::nmea::{self, Gga, NMEA_MAX_LENGTH, Rmc, Sentence};
use crate::time::WallClock;
use heapless::Vec;
use log::{debug, trace};
use rand::{Rng, RngCore};

/// Something that can be asked for the next sample.
pub trait SampleSource {
    /// The next sample, or `None` if none is available right now.
    fn next_sample(&mut self) -> Option<TelemetrySample>;
}

impl<F> SampleSource for F
where
    F: FnMut() -> Option<TelemetrySample>,
{
    fn next_sample(&mut self) -> Option<TelemetrySample> {
        self()
    }
}

/// Clamps timestamps so they never go backwards.
#[derive(Debug, Clone, Copy, Default)]
struct Monotonic {
    last: Option<i64>,
}

impl Monotonic {
    fn clamp(&mut self, time_utc: i64) -> i64 {
        let time_utc = self.last.map_or(time_utc, |last| time_utc.max(last));
        self.last = Some(time_utc);
        time_utc
    }
}

/// Random fixes stamped with wall-clock time, for exercising a link without
/// a receiver.
#[derive(Debug)]
pub struct RandomSource<R, W> {
    device: u64,
    rng: R,
    wall: W,
    stamp: Monotonic,
}

impl<R: RngCore, W: WallClock> RandomSource<R, W> {
    /// A source reporting as `device`.
    pub fn new(device: u64, rng: R, wall: W) -> Self {
        Self {
            device,
            rng,
            wall,
            stamp: Monotonic::default(),
        }
    }
}

impl<R: RngCore, W: WallClock> SampleSource for RandomSource<R, W> {
    fn next_sample(&mut self) -> Option<TelemetrySample> {
        Some(TelemetrySample {
            device: self.device,
            latitude_e7: self.rng.gen_range(-900_000_000..=900_000_000),
            longitude_e7: self.rng.gen_range(-1_800_000_000..=1_800_000_000),
            altitude_mm: self.rng.gen_range(-100_000..=9_000_000),
            radius_mm: self.rng.gen_range(0..10_000),
            speed_mm_s: self.rng.gen_range(0..100),
            satellites: self.rng.gen_range(0..5),
            time_utc: self.stamp.clamp(self.wall.unix_seconds()),
        })
    }
}

/// Replays a fixed list of samples.
#[derive(Debug, Clone)]
pub struct FixtureSource<'a> {
    samples: &'a [TelemetrySample],
    next: usize,
    cycle: bool,
    stamp: Monotonic,
}

impl<'a> FixtureSource<'a> {
    /// Yield each of `samples` once, then `None`.
    pub fn new(samples: &'a [TelemetrySample]) -> Self {
        Self {
            samples,
            next: 0,
            cycle: false,
            stamp: Monotonic::default(),
        }
    }

    /// Start over from the first sample after the last one.
    pub fn cycled(mut self) -> Self {
        self.cycle = true;
        self
    }

    /// Samples handed out so far.
    pub fn served(&self) -> usize {
        self.next
    }
}

impl SampleSource for FixtureSource<'_> {
    fn next_sample(&mut self) -> Option<TelemetrySample> {
        let index = if self.cycle && !self.samples.is_empty() {
            self.next % self.samples.len()
        } else {
            self.next
        };
        let mut sample = *self.samples.get(index)?;
        self.next += 1;
        sample.time_utc = self.stamp.clamp(sample.time_utc);
        Some(sample)
    }
}

/// Assembles samples from the NMEA stream of a GPS receiver.
///
/// Feed raw bytes with [`feed`](NmeaSource::feed). A sample becomes
/// available once a valid GGA and a valid RMC for the same UTC time have
/// been seen. The uncertainty radius is HDOP x 5 m.
#[derive(Debug)]
pub struct NmeaSource {
    device: u64,
    line: Vec<u8, NMEA_MAX_LENGTH>,
    overflowed: bool,
    gga: Option<Gga>,
    rmc: Option<Rmc>,
    pending: Option<TelemetrySample>,
    stamp: Monotonic,
    rejected: u32,
}

impl NmeaSource {
    /// A source reporting as `device`.
    pub fn new(device: u64) -> Self {
        Self {
            device,
            line: Vec::new(),
            overflowed: false,
            gga: None,
            rmc: None,
            pending: None,
            stamp: Monotonic::default(),
            rejected: 0,
        }
    }

    /// Sentences dropped so far because they failed to parse.
    pub fn rejected(&self) -> u32 {
        self.rejected
    }

    /// Consume bytes from the receiver.
    pub fn feed(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            match byte {
                // '$' always starts a sentence; resync after noise.
                b'$' => {
                    self.line.clear();
                    self.overflowed = false;
                    self.push(byte);
                }
                b'\n' => {
                    if !self.overflowed && !self.line.is_empty() {
                        self.finish_line();
                    }
                    self.line.clear();
                    self.overflowed = false;
                }
                _ => self.push(byte),
            }
        }
    }

    fn push(&mut self, byte: u8) {
        if self.line.push(byte).is_err() {
            self.overflowed = true;
        }
    }

    fn finish_line(&mut self) {
        let parsed = core::str::from_utf8(&self.line)
            .map_err(|_| nmea::NmeaError::InvalidStart)
            .and_then(nmea::parse);
        match parsed {
            Ok(Sentence::Gga(gga)) => self.gga = Some(gga),
            Ok(Sentence::Rmc(rmc)) => self.rmc = Some(rmc),
            Err(nmea::NmeaError::UnsupportedSentence) => return,
            Err(err) => {
                self.rejected = self.rejected.saturating_add(1);
                debug!("dropping NMEA sentence: {err}");
                return;
            }
        }
        self.assemble();
    }

    fn assemble(&mut self) {
        let (Some(gga), Some(rmc)) = (self.gga, self.rmc) else {
            return;
        };
        if gga.time.is_none() || gga.time != rmc.time {
            return;
        }
        self.gga = None;
        self.rmc = None;

        let (Some(time), Some(date), Some(position)) = (gga.time, rmc.date, gga.position) else {
            trace!("GGA/RMC pair without a usable fix");
            return;
        };
        if gga.fix_quality == 0 || !rmc.valid {
            trace!("receiver reports no fix");
            return;
        }

        let time_utc = date.and_time(time).and_utc().timestamp();
        let radius_mm = gga
            .hdop_e2
            .and_then(|hdop| hdop.checked_mul(50))
            .and_then(|mm| i32::try_from(mm).ok())
            .unwrap_or(i32::MAX);
        self.pending = Some(TelemetrySample {
            device: self.device,
            latitude_e7: position.latitude_e7,
            longitude_e7: position.longitude_e7,
            altitude_mm: gga.altitude_mm.unwrap_or(0),
            radius_mm,
            speed_mm_s: rmc.speed_mm_s.unwrap_or(0),
            satellites: gga.satellites,
            time_utc: self.stamp.clamp(time_utc),
        });
    }
}

impl SampleSource for NmeaSource {
    fn next_sample(&mut self) -> Option<TelemetrySample> {
        self.pending.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::ManualClock;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    #[test]
    fn random_samples_stay_in_range() {
        let clock = ManualClock::new();
        clock.set_millis(1_700_000_000_000);
        let mut source = RandomSource::new(42, SmallRng::seed_from_u64(7), &clock);

        let mut last = i64::MIN;
        for _ in 0..200 {
            let sample = source.next_sample().unwrap();
            assert_eq!(sample.device, 42);
            assert!(sample.is_valid());
            assert!(sample.latitude_e7.abs() <= 900_000_000);
            assert!((0..10_000).contains(&sample.radius_mm));
            assert!((0..100).contains(&sample.speed_mm_s));
            assert!(sample.satellites < 5);
            assert!(sample.time_utc >= last);
            last = sample.time_utc;
        }
        assert_eq!(last, 1_700_000_000);
    }

    #[test]
    fn fixture_clamps_time_and_cycles() {
        let samples = [
            TelemetrySample {
                time_utc: 10,
                ..TelemetrySample::default()
            },
            TelemetrySample {
                time_utc: 5,
                ..TelemetrySample::default()
            },
        ];
        let mut once = FixtureSource::new(&samples);
        assert_eq!(once.next_sample().unwrap().time_utc, 10);
        assert_eq!(once.next_sample().unwrap().time_utc, 10);
        assert_eq!(once.next_sample(), None);
        assert_eq!(once.served(), 2);

        let mut cycled = FixtureSource::new(&samples).cycled();
        for _ in 0..5 {
            assert!(cycled.next_sample().is_some());
        }
    }

    #[test]
    fn closures_are_sources() {
        let mut count = 0u8;
        let mut source = || {
            count += 1;
            (count < 3).then(TelemetrySample::default)
        };
        assert!(source.next_sample().is_some());
        assert!(source.next_sample().is_some());
        assert!(source.next_sample().is_none());
    }
}
