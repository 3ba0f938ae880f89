//! GPS NMEA 0183 sentence parser
//!
//! Parses the two sentences a telemetry fix is assembled from:
//!
//! - `GGA` (fix data): time, position, fix quality, satellites, HDOP, altitude
//! - `RMC` (recommended minimum): time, validity, position, speed, date
//!
//! Any talker ID is accepted (`GP`, `GN`, `GL`, ...). Values are converted to
//! the fixed-point units of [`TelemetrySample`](super::TelemetrySample)
//! without going through floating point.

use chrono::{NaiveDate, NaiveTime};
use heapless::Vec;

/// Maximum length of an NMEA sentence including \r\n
pub const NMEA_MAX_LENGTH: usize = 82;

const KNOTS_TO_MM_S_NUM: i64 = 1_852_000;
const KNOTS_TO_MM_S_DEN: i64 = 3_600;

/// NMEA parsing errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NmeaError {
    /// Sentence length is invalid (too short or too long)
    #[error("invalid sentence length")]
    InvalidLength,
    /// Sentence doesn't start with '$'
    #[error("sentence does not start with '$'")]
    InvalidStart,
    /// Address field is not five uppercase letters followed by a comma
    #[error("invalid address field")]
    InvalidPrefix,
    /// Checksum validation failed
    #[error("checksum mismatch")]
    InvalidChecksum,
    /// A non-empty field could not be parsed; carries the field index
    #[error("unparsable field {0}")]
    ParseError(usize),
    /// Sentence type is not supported
    #[error("unsupported sentence")]
    UnsupportedSentence,
}

/// A latitude/longitude pair in degrees x 1e7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coordinates {
    /// Latitude, north positive.
    pub latitude_e7: i32,
    /// Longitude, east positive.
    pub longitude_e7: i32,
}

/// GGA: Global Positioning System Fix Data.
///
/// Empty fields, as sent before the receiver has a fix, are `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Gga {
    /// UTC time of the fix.
    pub time: Option<NaiveTime>,
    /// Position of the fix.
    pub position: Option<Coordinates>,
    /// Fix quality (0 = invalid, 1 = GPS, 2 = DGPS, ...).
    pub fix_quality: u8,
    /// Satellites used.
    pub satellites: u8,
    /// Horizontal dilution of precision x 100.
    pub hdop_e2: Option<u32>,
    /// Altitude above mean sea level in millimetres.
    pub altitude_mm: Option<i32>,
}

/// RMC: Recommended Minimum Specific GNSS Data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rmc {
    /// UTC time of the fix.
    pub time: Option<NaiveTime>,
    /// Status flag `A`.
    pub valid: bool,
    /// Position of the fix.
    pub position: Option<Coordinates>,
    /// Speed over ground in millimetres per second.
    pub speed_mm_s: Option<i32>,
    /// UTC date of the fix.
    pub date: Option<NaiveDate>,
}

/// A parsed sentence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sentence {
    /// Fix data
    Gga(Gga),
    /// Recommended minimum data
    Rmc(Rmc),
}

/// XOR of every byte between `$` and `*`.
pub fn checksum(body: &str) -> u8 {
    body.bytes().fold(0, |acc, b| acc ^ b)
}

/// Check framing and checksum; returns the text between `$` and `*`.
///
/// A trailing `\r\n` is optional. Sentences without a checksum are accepted.
pub fn validate(sentence: &str) -> Result<&str, NmeaError> {
    let sentence = sentence.trim_end_matches(['\r', '\n']);
    if sentence.len() < 7 || sentence.len() + 2 > NMEA_MAX_LENGTH {
        return Err(NmeaError::InvalidLength);
    }
    let Some(rest) = sentence.strip_prefix('$') else {
        return Err(NmeaError::InvalidStart);
    };

    let body = match rest.split_once('*') {
        Some((body, sum)) => {
            let expected = u8::from_str_radix(sum, 16).map_err(|_| NmeaError::InvalidChecksum)?;
            if sum.len() != 2 || checksum(body) != expected {
                return Err(NmeaError::InvalidChecksum);
            }
            body
        }
        None => rest,
    };

    let address = body.as_bytes();
    if address.len() < 6 || !address[..5].iter().all(u8::is_ascii_uppercase) || address[5] != b',' {
        return Err(NmeaError::InvalidPrefix);
    }
    Ok(body)
}

/// Parse a GGA or RMC sentence.
pub fn parse(sentence: &str) -> Result<Sentence, NmeaError> {
    let body = validate(sentence)?;
    let formatter = &body[2..5];
    let mut fields: Vec<&str, 24> = Vec::new();
    for field in body[6..].split(',') {
        fields.push(field).map_err(|_| NmeaError::InvalidLength)?;
    }

    match formatter {
        "GGA" => parse_gga(&fields).map(Sentence::Gga),
        "RMC" => parse_rmc(&fields).map(Sentence::Rmc),
        _ => Err(NmeaError::UnsupportedSentence),
    }
}

fn field<'a>(fields: &[&'a str], index: usize) -> Option<&'a str> {
    fields.get(index).copied().filter(|f| !f.is_empty())
}

fn parse_gga(fields: &[&str]) -> Result<Gga, NmeaError> {
    let num = |index: usize| -> Result<Option<u8>, NmeaError> {
        field(fields, index)
            .map(|f| f.parse().map_err(|_| NmeaError::ParseError(index)))
            .transpose()
    };

    Ok(Gga {
        time: field(fields, 0).map(|f| parse_time(f, 0)).transpose()?,
        position: parse_coordinates(fields, 1)?,
        fix_quality: num(5)?.unwrap_or(0),
        satellites: num(6)?.unwrap_or(0),
        hdop_e2: field(fields, 7)
            .map(|f| {
                parse_scaled(f, 2)
                    .ok()
                    .and_then(|v| u32::try_from(v).ok())
                    .ok_or(NmeaError::ParseError(7))
            })
            .transpose()?,
        altitude_mm: field(fields, 8)
            .map(|f| {
                parse_scaled(f, 3)
                    .ok()
                    .and_then(|v| i32::try_from(v).ok())
                    .ok_or(NmeaError::ParseError(8))
            })
            .transpose()?,
    })
}

fn parse_rmc(fields: &[&str]) -> Result<Rmc, NmeaError> {
    Ok(Rmc {
        time: field(fields, 0).map(|f| parse_time(f, 0)).transpose()?,
        valid: field(fields, 1) == Some("A"),
        position: parse_coordinates(fields, 2)?,
        speed_mm_s: field(fields, 6)
            .map(|f| {
                parse_scaled(f, 3)
                    .ok()
                    .and_then(|milli_knots| milli_knots.checked_mul(KNOTS_TO_MM_S_NUM / 1000))
                    .and_then(|v| i32::try_from(v / KNOTS_TO_MM_S_DEN).ok())
                    .ok_or(NmeaError::ParseError(6))
            })
            .transpose()?,
        date: field(fields, 8).map(|f| parse_date(f, 8)).transpose()?,
    })
}

/// Latitude at `index`, longitude at `index + 2`, each followed by its
/// hemisphere.
fn parse_coordinates(fields: &[&str], index: usize) -> Result<Option<Coordinates>, NmeaError> {
    let (Some(lat), Some(lon)) = (field(fields, index), field(fields, index + 2)) else {
        return Ok(None);
    };
    let latitude_e7 = parse_angle(lat, 90, index)?;
    let longitude_e7 = parse_angle(lon, 180, index + 2)?;

    let latitude_e7 = match field(fields, index + 1) {
        Some("N") => latitude_e7,
        Some("S") => -latitude_e7,
        _ => return Err(NmeaError::ParseError(index + 1)),
    };
    let longitude_e7 = match field(fields, index + 3) {
        Some("E") => longitude_e7,
        Some("W") => -longitude_e7,
        _ => return Err(NmeaError::ParseError(index + 3)),
    };
    Ok(Some(Coordinates {
        latitude_e7,
        longitude_e7,
    }))
}

/// `dddmm.mmmm` to degrees x 1e7.
fn parse_angle(value: &str, max_degrees: i64, index: usize) -> Result<i32, NmeaError> {
    let err = NmeaError::ParseError(index);
    // Minutes start 2 digits before the decimal point
    let int_len = value.find('.').unwrap_or(value.len());
    if int_len < 2 || value.starts_with('-') {
        return Err(err);
    }
    let (degrees, minutes) = value.split_at(int_len - 2);
    let degrees = if degrees.is_empty() {
        0
    } else {
        degrees.parse::<i64>().map_err(|_| err)?
    };
    let minutes_e7 = parse_scaled(minutes, 7).map_err(|_| err)?;
    if minutes_e7 >= 60 * 10_000_000 {
        return Err(err);
    }

    let e7 = degrees * 10_000_000 + minutes_e7 / 60;
    if e7 > max_degrees * 10_000_000 {
        return Err(err);
    }
    i32::try_from(e7).map_err(|_| err)
}

/// `hhmmss[.sss]`; fractional seconds are dropped.
fn parse_time(value: &str, index: usize) -> Result<NaiveTime, NmeaError> {
    let err = NmeaError::ParseError(index);
    let whole = value.split_once('.').map_or(value, |(whole, _)| whole);
    if whole.len() != 6 {
        return Err(err);
    }
    let hms = whole.parse::<u32>().map_err(|_| err)?;
    NaiveTime::from_hms_opt(hms / 10_000, hms / 100 % 100, hms % 100).ok_or(err)
}

/// `ddmmyy`; two-digit years from 80 on are in the 1900s.
fn parse_date(value: &str, index: usize) -> Result<NaiveDate, NmeaError> {
    let err = NmeaError::ParseError(index);
    if value.len() != 6 {
        return Err(err);
    }
    let dmy = value.parse::<u32>().map_err(|_| err)?;
    let short_year = (dmy % 100) as i32;
    let year = if short_year >= 80 {
        1900 + short_year
    } else {
        2000 + short_year
    };
    NaiveDate::from_ymd_opt(year, dmy / 100 % 100, dmy / 10_000).ok_or(err)
}

/// Parse a decimal such as `-12.345` into an integer scaled by
/// `10^digits`. Extra fraction digits are truncated.
fn parse_scaled(value: &str, digits: usize) -> Result<i64, ()> {
    let (negative, body) = match value.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, value),
    };
    let (whole, fraction) = body.split_once('.').unwrap_or((body, ""));
    if whole.is_empty() && fraction.is_empty() {
        return Err(());
    }
    if !whole.bytes().chain(fraction.bytes()).all(|b| b.is_ascii_digit()) {
        return Err(());
    }

    let digit_values = whole
        .bytes()
        .chain(fraction.bytes().chain(core::iter::repeat(b'0')).take(digits));
    let mut value = 0i64;
    for b in digit_values {
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_add(i64::from(b - b'0')))
            .ok_or(())?;
    }
    Ok(if negative { -value } else { value })
}

#[cfg(test)]
mod tests {
    use super::*;

    const GGA: &str = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47\r\n";
    const RMC: &str = "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A\r\n";

    #[test]
    fn parses_gga() {
        let Sentence::Gga(gga) = parse(GGA).unwrap() else {
            panic!("expected GGA");
        };
        assert_eq!(gga.time, NaiveTime::from_hms_opt(12, 35, 19));
        assert_eq!(
            gga.position,
            Some(Coordinates {
                latitude_e7: 481_173_000,
                longitude_e7: 115_166_666,
            })
        );
        assert_eq!(gga.fix_quality, 1);
        assert_eq!(gga.satellites, 8);
        assert_eq!(gga.hdop_e2, Some(90));
        assert_eq!(gga.altitude_mm, Some(545_400));
    }

    #[test]
    fn parses_rmc() {
        let Sentence::Rmc(rmc) = parse(RMC).unwrap() else {
            panic!("expected RMC");
        };
        assert!(rmc.valid);
        assert_eq!(rmc.date, NaiveDate::from_ymd_opt(1994, 3, 23));
        // 22.4 knots
        assert_eq!(rmc.speed_mm_s, Some(11_523));
    }

    #[test]
    fn southern_and_western_hemispheres_are_negative() {
        let fields = ["", "3352.000", "S", "15112.000", "W"];
        let position = parse_coordinates(&fields, 1).unwrap().unwrap();
        assert_eq!(position.latitude_e7, -338_666_666);
        assert_eq!(position.longitude_e7, -1_512_000_000);
    }

    #[test]
    fn rejects_bad_framing() {
        assert_eq!(parse("GPGGA,123519*00"), Err(NmeaError::InvalidStart));
        assert_eq!(parse("$GP"), Err(NmeaError::InvalidLength));
        assert_eq!(
            parse("$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*48"),
            Err(NmeaError::InvalidChecksum)
        );
        assert_eq!(parse("$gpgga,123519"), Err(NmeaError::InvalidPrefix));
        assert_eq!(parse("$GPGSV,1,1,00"), Err(NmeaError::UnsupportedSentence));
    }

    #[test]
    fn empty_fields_before_a_fix_are_none() {
        let Sentence::Gga(gga) = parse("$GPGGA,,,,,,0,00,,,M,,M,,").unwrap() else {
            panic!("expected GGA");
        };
        assert_eq!(gga, Gga::default());
    }

    #[test]
    fn rejects_out_of_range_fields() {
        assert_eq!(
            parse("$GPGGA,256000,4807.038,N,01131.000,E,1,08,0.9,545.4,M,,M,,"),
            Err(NmeaError::ParseError(0))
        );
        assert_eq!(
            parse("$GPGGA,123519,9107.038,N,01131.000,E,1,08,0.9,545.4,M,,M,,"),
            Err(NmeaError::ParseError(1))
        );
        assert_eq!(
            parse("$GPGGA,123519,4807.038,X,01131.000,E,1,08,0.9,545.4,M,,M,,"),
            Err(NmeaError::ParseError(2))
        );
    }

    #[test]
    fn scaled_decimal_parsing() {
        assert_eq!(parse_scaled("545.4", 3), Ok(545_400));
        assert_eq!(parse_scaled("-0.25", 2), Ok(-25));
        assert_eq!(parse_scaled("1.23456", 2), Ok(123));
        assert_eq!(parse_scaled(".5", 1), Ok(5));
        assert_eq!(parse_scaled("1e3", 0), Err(()));
        assert_eq!(parse_scaled("", 0), Err(()));
    }
}
