use gpslink::TelemetrySample;
use gpslink::telemetry::SampleSource;
use gpslink::telemetry::nmea::{self, NmeaError, Sentence};
use gpslink::telemetry::source::NmeaSource;

const GGA: &str = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47\r\n";
const RMC: &str = "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A\r\n";

fn expected() -> TelemetrySample {
    TelemetrySample {
        device: 3,
        latitude_e7: 481_173_000,
        longitude_e7: 115_166_666,
        altitude_mm: 545_400,
        radius_mm: 4_500,
        speed_mm_s: 11_523,
        satellites: 8,
        time_utc: 764_426_119,
    }
}

#[test]
fn test_fix_is_assembled_from_chunked_stream() {
    let mut source = NmeaSource::new(3);
    let stream = [GGA, RMC].concat();

    for chunk in stream.as_bytes().chunks(5) {
        assert_eq!(source.next_sample(), None);
        source.feed(chunk);
    }

    assert_eq!(source.next_sample(), Some(expected()));
    assert_eq!(source.next_sample(), None);
    assert_eq!(source.rejected(), 0);
}

#[test]
fn test_noise_and_bad_checksums_are_counted() {
    let mut source = NmeaSource::new(3);
    source.feed(b"\xff\x00garbage\r\n");
    source.feed(b"$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*48\r\n");
    source.feed(RMC.as_bytes());
    assert_eq!(source.next_sample(), None);
    assert_eq!(source.rejected(), 2);

    // A sentence starting mid-line resyncs on '$'.
    source.feed(b"$GPG");
    source.feed(GGA.as_bytes());
    assert_eq!(source.next_sample(), Some(expected()));
}

#[test]
fn test_other_sentences_are_ignored() {
    let mut source = NmeaSource::new(3);
    source.feed(b"$GPGSV,3,1,11,03,03,111,00,04,15,270,00,06,01,010,00,13,06,292,00\r\n");
    source.feed(b"$GPVTG,054.7,T,034.4,M,005.5,N,010.2,K\r\n");
    assert_eq!(source.rejected(), 0);
    assert_eq!(source.next_sample(), None);
}

#[test]
fn test_no_fix_yields_nothing() {
    let mut source = NmeaSource::new(3);
    source.feed(b"$GPGGA,123520,4807.038,N,01131.000,E,0,00,,,M,,M,,*58\r\n");
    source.feed(b"$GPRMC,123520,V,,,,,,,230394,,*39\r\n");
    assert_eq!(source.next_sample(), None);
    assert_eq!(source.rejected(), 0);
}

#[test]
fn test_fix_needs_matching_times() {
    let mut source = NmeaSource::new(3);
    source.feed(GGA.as_bytes());
    source.feed(b"$GPRMC,123520,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W\r\n");
    assert_eq!(source.next_sample(), None);

    source.feed(RMC.as_bytes());
    assert_eq!(source.next_sample(), Some(expected()));
}

#[test]
fn test_parse_exposes_sentence_fields() {
    let Ok(Sentence::Rmc(rmc)) = nmea::parse(RMC) else {
        panic!("RMC did not parse");
    };
    assert!(rmc.valid);
    assert_eq!(rmc.speed_mm_s, Some(11_523));
    assert_eq!(rmc.date, chrono::NaiveDate::from_ymd_opt(1994, 3, 23));

    assert_eq!(nmea::parse("$GPGSV,3,1,11"), Err(NmeaError::UnsupportedSentence));
    assert_eq!(nmea::parse("$GP"), Err(NmeaError::InvalidLength));
}
