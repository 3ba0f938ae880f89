use criterion::{BenchmarkId, Criterion, Throughput};
use gpslink::TelemetrySample;
use gpslink::telemetry::{AnyCodec, Codec, CodecKind};
use std::hint::black_box;

const KINDS: [CodecKind; 3] = [CodecKind::Frame, CodecKind::Protobuf, CodecKind::Json];

fn sample() -> TelemetrySample {
    TelemetrySample {
        device: 0x6770_736c,
        latitude_e7: -338_688_000,
        longitude_e7: 1_512_093_000,
        altitude_mm: 58_000,
        radius_mm: 2_500,
        speed_mm_s: 13_400,
        satellites: 9,
        time_utc: 1_717_171_717,
    }
}

pub fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec_encode");
    let sample = sample();
    for kind in KINDS {
        let codec = AnyCodec::new(kind);
        let len = codec.encode(&sample).expect("encode").len();
        group.throughput(Throughput::Bytes(len as u64));
        let id = BenchmarkId::from_parameter(format!("{kind:?}"));
        group.bench_with_input(id, &codec, |b, codec| {
            b.iter(|| codec.encode(black_box(&sample)).expect("encode"));
        });
    }
    group.finish();
}

pub fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec_decode");
    let sample = sample();
    for kind in KINDS {
        let codec = AnyCodec::new(kind);
        let payload = codec.encode(&sample).expect("encode");
        group.throughput(Throughput::Bytes(payload.len() as u64));
        let id = BenchmarkId::from_parameter(format!("{kind:?}"));
        group.bench_with_input(id, &payload, |b, payload| {
            b.iter(|| codec.decode(black_box(payload)).expect("decode"));
        });
    }
    group.finish();
}
