use criterion::{criterion_group, criterion_main};

mod network;
mod telemetry;

criterion_group!(
    benches,
    telemetry::codec::bench_encode,
    telemetry::codec::bench_decode,
    network::mqtt::packet::bench_encode_publish,
    network::mqtt::packet::bench_frame_reader
);
criterion_main!(benches);
