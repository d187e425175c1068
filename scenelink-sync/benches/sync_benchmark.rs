use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use scenelink_core::{Color, NoDependencies, SceneObject, SceneStore, Transform};
use scenelink_sync::{
    encode_context, encode_frame, FrameDecoder, PeerMessage, ReplicationSession, SnapshotTarget,
    Source,
};

fn scene(objects: usize) -> SceneStore {
    let mut store = SceneStore::new();
    for i in 0..objects {
        let object = SceneObject::geometry(format!("obj{i}"))
            .with_color(Color::new(0.25, 0.5, 0.75))
            .with_xform(Transform::translation(i as f64, 0.0, 0.0))
            .with_payload(vec![7u8; 256]);
        store.add_object(object).unwrap();
    }
    store.take_events();
    store
}

fn bench_full_snapshot_encode(c: &mut Criterion) {
    let store = scene(100);
    let session = ReplicationSession::default();

    c.bench_function("full_snapshot_encode_100", |b| {
        b.iter(|| {
            let records = session.full_snapshot(black_box(&store), &NoDependencies, SnapshotTarget::Peer);
            black_box(encode_context(&records));
        })
    });
}

fn bench_apply_join_context(c: &mut Criterion) {
    let store = scene(100);
    let body = encode_context(&ReplicationSession::default().full_snapshot(
        &store,
        &NoDependencies,
        SnapshotTarget::Peer,
    ));

    c.bench_function("apply_join_context_100", |b| {
        b.iter(|| {
            let mut replica = SceneStore::new();
            let mut session = ReplicationSession::default();
            black_box(session.apply_context(&mut replica, black_box(&body), Source::File).unwrap());
        })
    });
}

fn bench_local_edit_pump(c: &mut Criterion) {
    let mut store = scene(10);
    let mut session = ReplicationSession::default();

    c.bench_function("local_edit_pump", |b| {
        b.iter(|| {
            store.set_color("obj3", black_box(Color::BLACK)).unwrap();
            session.pump(&mut store);
            black_box(session.take_outbound());
        })
    });
}

fn bench_frame_reassembly(c: &mut Criterion) {
    let body = "COLOR { name obj1 color { 0 0 0 } }\nDONE { }\n";
    let mut stream = Vec::new();
    for _ in 0..1000 {
        stream.extend(encode_frame(&PeerMessage::context(body).encode().unwrap()));
    }

    c.bench_function("frame_reassembly_1000_in_1k_chunks", |b| {
        b.iter(|| {
            let mut decoder = FrameDecoder::default();
            let mut frames = 0;
            for chunk in stream.chunks(1024) {
                frames += decoder.decode(black_box(chunk)).unwrap().len();
            }
            assert_eq!(frames, 1000);
        })
    });
}

fn bench_message_roundtrip(c: &mut Criterion) {
    let msg = PeerMessage::context("XFORM { name obj1 xform { 1 0 0 0 0 1 0 0 0 0 1 0 0 0 0 1 } }\nDONE { }\n");

    c.bench_function("peer_message_roundtrip", |b| {
        b.iter(|| {
            let encoded = black_box(&msg).encode().unwrap();
            black_box(PeerMessage::decode(&encoded).unwrap());
        })
    });
}

criterion_group!(
    benches,
    bench_full_snapshot_encode,
    bench_apply_join_context,
    bench_local_edit_pump,
    bench_frame_reassembly,
    bench_message_roundtrip,
);
criterion_main!(benches);
