//! Benchmark live playlist generation.
//!
//! The manifest is rebuilt on every published segment and rendered on every
//! playlist request, so both paths sit on the latency budget.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use glasscast::streaming::{parse_media_playlist, SegmentStore};

fn filled_store(retain: usize) -> SegmentStore {
    let store = SegmentStore::new(retain);
    let payload = Bytes::from(vec![0x47u8; 188 * 64]);
    for _ in 0..retain * 2 {
        store.publish(0.5, payload.clone());
    }
    store
}

fn bench_manifest(c: &mut Criterion) {
    let mut group = c.benchmark_group("manifest");

    for retain in [4usize, 8, 32] {
        let store = filled_store(retain);
        let manifest = store.manifest();

        // Rendering the current window for a playlist request.
        group.bench_with_input(BenchmarkId::new("render", retain), &manifest, |b, m| {
            b.iter(|| black_box(m).render());
        });

        // Publishing one segment (eviction + manifest rebuild) then rendering.
        let payload = Bytes::from(vec![0x47u8; 188 * 64]);
        group.bench_with_input(BenchmarkId::new("publish_render", retain), &store, |b, s| {
            b.iter(|| {
                s.publish(0.5, payload.clone());
                s.manifest().render()
            });
        });

        // Player-side parse of what we serve.
        let text = manifest.render();
        group.bench_with_input(BenchmarkId::new("parse", retain), &text, |b, t| {
            b.iter(|| parse_media_playlist(black_box(t)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_manifest);
criterion_main!(benches);
