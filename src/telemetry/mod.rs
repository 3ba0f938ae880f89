//! GPS telemetry: the sample record, its wire codecs and sample producers.

use core::fmt;
use serde::{Deserialize, Serialize};

/// Payload encoders and decoders
pub mod codec;

/// NMEA 0183 sentence parsing
pub mod nmea;

/// Producers of samples for the publish loop
pub mod source;

pub use codec::{AnyCodec, Codec, CodecKind, DecodeError, EncodeError, Payload};
pub use source::SampleSource;

/// One GPS fix.
///
/// Angles are fixed-point degrees scaled by 1e7, lengths are millimetres and
/// `time_utc` counts seconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TelemetrySample {
    /// Identifier of the producing device.
    pub device: u64,
    /// Latitude in degrees x 1e7, north positive.
    pub latitude_e7: i32,
    /// Longitude in degrees x 1e7, east positive.
    pub longitude_e7: i32,
    /// Altitude above mean sea level in millimetres.
    pub altitude_mm: i32,
    /// Horizontal uncertainty radius in millimetres.
    pub radius_mm: i32,
    /// Ground speed in millimetres per second.
    pub speed_mm_s: i32,
    /// Satellites used in the fix.
    pub satellites: u8,
    /// Fix time, seconds since the Unix epoch.
    pub time_utc: i64,
}

impl TelemetrySample {
    /// Whether the sample satisfies the record's invariants.
    pub fn is_valid(&self) -> bool {
        self.radius_mm >= 0
    }
}

impl fmt::Display for TelemetrySample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "device={} latitude_e7={} longitude_e7={} altitude_mm={} radius_mm={} speed_mm_s={} satellites={} time_utc={}",
            self.device,
            self.latitude_e7,
            self.longitude_e7,
            self.altitude_mm,
            self.radius_mm,
            self.speed_mm_s,
            self.satellites,
            self.time_utc
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_lists_every_field() {
        let sample = TelemetrySample {
            device: 7,
            latitude_e7: -1,
            longitude_e7: 2,
            altitude_mm: 3,
            radius_mm: 4,
            speed_mm_s: 5,
            satellites: 6,
            time_utc: 8,
        };
        let mut out: heapless::String<160> = heapless::String::new();
        core::fmt::write(&mut out, format_args!("{sample}")).unwrap();
        assert_eq!(
            out.as_str(),
            "device=7 latitude_e7=-1 longitude_e7=2 altitude_mm=3 radius_mm=4 speed_mm_s=5 satellites=6 time_utc=8"
        );
    }

    #[test]
    fn negative_radius_is_invalid() {
        let mut sample = TelemetrySample::default();
        assert!(sample.is_valid());
        sample.radius_mm = -1;
        assert!(!sample.is_valid());
    }
}
