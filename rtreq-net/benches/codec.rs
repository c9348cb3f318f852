use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rtreq_net::{decode, encode, Encoding, Message};

criterion_group!(codec, encode_short, decode_short, encode_large);
criterion_main!(codec);

fn encode_short(c: &mut Criterion) {
    c.bench_function("encode_short", |b| {
        b.iter(|| black_box(encode("bench-client", "ping", &Encoding::Bincode).unwrap()))
    });
}

fn decode_short(c: &mut Criterion) {
    let bytes = encode("bench-client", "reply msg #1", &Encoding::Bincode).unwrap();
    c.bench_function("decode_short", |b| {
        b.iter(|| black_box(decode(&bytes, &Encoding::Bincode).unwrap()))
    });
}

fn encode_large(c: &mut Criterion) {
    let payload = "x".repeat(64 * 1024);
    let msg = Message::new("bench-client", &payload);
    c.bench_function("encode_64k", |b| {
        b.iter(|| black_box(msg.to_bytes(&Encoding::Bincode).unwrap()))
    });
}
