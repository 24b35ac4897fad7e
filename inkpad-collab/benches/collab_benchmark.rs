use criterion::{criterion_group, criterion_main, Criterion};
use inkpad_collab::channel::{BroadcastHub, Channel};
use inkpad_collab::protocol::{ChangeEvent, ClientMessage, ServerMessage};
use inkpad_collab::version::diff::change_stats;
use std::hint::black_box;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

fn sample_content(len: usize) -> String {
    "<p>The quick brown fox jumps over the lazy dog.</p>"
        .chars()
        .cycle()
        .take(len)
        .collect()
}

fn bench_content_change_encode(c: &mut Criterion) {
    let msg = ClientMessage::ContentChange {
        document_id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        username: "alice".into(),
        content: sample_content(4096),
        timestamp: 1,
    };

    c.bench_function("content_change_encode_4KB", |b| {
        b.iter(|| black_box(black_box(&msg).encode().unwrap()))
    });
}

fn bench_event_decode(c: &mut Criterion) {
    let msg = ServerMessage::Event(ChangeEvent::ContentChange {
        document_id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        username: "alice".into(),
        content: sample_content(4096),
        timestamp: 1,
        reverted_from: None,
    });
    let encoded = msg.encode().unwrap();

    c.bench_function("event_decode_4KB", |b| {
        b.iter(|| black_box(ServerMessage::decode(black_box(&encoded)).unwrap()))
    });
}

fn bench_change_stats(c: &mut Criterion) {
    let old = sample_content(10_000);
    let mut new = old.clone();
    new.insert_str(5_000, "an inserted sentence in the middle ");
    new.truncate(9_000);

    c.bench_function("change_stats_10K_chars", |b| {
        b.iter(|| black_box(change_stats(black_box(&old), black_box(&new))))
    });
}

fn bench_hub_fanout(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
    let hub = BroadcastHub::new();
    let topic = Uuid::new_v4();
    let mut receivers = Vec::new();
    rt.block_on(async {
        for _ in 0..100 {
            let (tx, rx) = mpsc::channel(128);
            hub.subscribe(topic, Uuid::new_v4(), tx).await;
            receivers.push(rx);
        }
    });
    let event = Arc::new(ChangeEvent::ContentChange {
        document_id: topic,
        user_id: Uuid::new_v4(),
        username: "alice".into(),
        content: sample_content(1024),
        timestamp: 1,
        reverted_from: None,
    });

    c.bench_function("hub_publish_100_subscribers", |b| {
        b.iter(|| {
            rt.block_on(hub.publish(topic, event.clone(), None));
            for rx in receivers.iter_mut() {
                while rx.try_recv().is_ok() {}
            }
        })
    });
}

criterion_group!(
    benches,
    bench_content_change_encode,
    bench_event_decode,
    bench_change_stats,
    bench_hub_fanout,
);
criterion_main!(benches);
