//! Codec benchmarks for parley-protocol.

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use parley_protocol::{
    codec, InboundFrame, MessageFrame, MessageId, OutboundFrame, PresenceState, RoomId, UserId,
};

fn bench_decode_inbound(c: &mut Criterion) {
    let frame = InboundFrame::text(UserId::new_v4(), UserId::new_v4(), "x".repeat(64));
    let raw = serde_json::to_vec(&frame).unwrap();

    let mut group = c.benchmark_group("decode_inbound");
    group.throughput(Throughput::Bytes(raw.len() as u64));
    group.bench_function("text_64B", |b| {
        b.iter(|| codec::decode_inbound(black_box(&raw), codec::MAX_FRAME_SIZE))
    });
    group.finish();
}

fn bench_encode_message(c: &mut Criterion) {
    let frame = OutboundFrame::from(MessageFrame {
        id: MessageId::new_v4(),
        content: "x".repeat(256),
        sender_id: UserId::new_v4(),
        chat_room_id: RoomId::new_v4(),
        timestamp: Utc::now(),
    });

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(256));
    group.bench_function("message_256B", |b| b.iter(|| codec::encode(black_box(&frame))));
    group.finish();
}

fn bench_encode_status(c: &mut Criterion) {
    let frame = OutboundFrame::status(UserId::new_v4(), PresenceState::Online);

    c.bench_function("encode_status", |b| {
        b.iter(|| codec::encode(black_box(&frame)).unwrap())
    });
}

criterion_group!(
    benches,
    bench_decode_inbound,
    bench_encode_message,
    bench_encode_status
);
criterion_main!(benches);
