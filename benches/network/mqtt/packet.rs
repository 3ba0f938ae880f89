use criterion::{BatchSize, Criterion, Throughput};
use gpslink::network::error::Error;
use gpslink::network::mqtt::QoS;
use gpslink::network::mqtt::packet::{self, FrameReader, MAX_PACKET_LEN};
use gpslink::network::Read;
use std::hint::black_box;

const TOPIC: &str = "esp32/gps/publish";
const PAYLOAD: [u8; 39] = [0x47; 39];

/// Replays a byte buffer, then reports nothing pending.
struct Replay {
    bytes: Vec<u8>,
    pos: usize,
}

impl Read for Replay {
    type Error = Error;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let rest = &self.bytes[self.pos..];
        if rest.is_empty() {
            return Err(Error::WouldBlock);
        }
        let n = rest.len().min(buf.len());
        buf[..n].copy_from_slice(&rest[..n]);
        self.pos += n;
        Ok(n)
    }
}

pub fn bench_encode_publish(c: &mut Criterion) {
    let mut group = c.benchmark_group("mqtt_encode");
    group.throughput(Throughput::Bytes(PAYLOAD.len() as u64));
    group.bench_function("publish_qos1", |b| {
        b.iter(|| {
            packet::encode_publish(
                black_box(TOPIC),
                black_box(&PAYLOAD),
                QoS::AtLeastOnce,
                Some(7),
                false,
            )
            .expect("encode")
        });
    });
    group.finish();
}

pub fn bench_frame_reader(c: &mut Criterion) {
    let frame = packet::encode_publish(TOPIC, &PAYLOAD, QoS::AtMostOnce, None, false)
        .expect("encode");
    let stream: Vec<u8> = frame.iter().copied().cycle().take(frame.len() * 16).collect();

    let mut group = c.benchmark_group("mqtt_decode");
    group.throughput(Throughput::Bytes(stream.len() as u64));
    group.bench_function("frame_reader_16_publishes", |b| {
        b.iter_batched_ref(
            || Replay {
                bytes: stream.clone(),
                pos: 0,
            },
            |replay| {
                let mut reader = FrameReader::<MAX_PACKET_LEN>::new();
                let mut frames = 0;
                loop {
                    while let Some(frame) = reader.next_frame().expect("frame") {
                        black_box(frame.packet().expect("packet"));
                        frames += 1;
                    }
                    if reader.fill(replay).expect("fill") == 0 {
                        break;
                    }
                }
                assert_eq!(frames, 16);
            },
            BatchSize::SmallInput,
        );
    });
    group.finish();
}
