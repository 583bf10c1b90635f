use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tiempo::{RainThresholds, RiskThresholds, Snapshot, TiempoConfig};

const PAGE: &str = include_str!("../fixtures/estacion_sample.html");

fn bench_snapshot(c: &mut Criterion) {
    let config = TiempoConfig::builder()
        .url("https://example.org/estacion.html")
        .risk(RiskThresholds::new(20.0, 60.0).unwrap())
        .rain(RainThresholds::new(0.5, 4.0, 15.0).unwrap())
        .build();
    let now = Utc::now();

    c.bench_function("snapshot_from_html", |b| {
        b.iter(|| Snapshot::from_html(black_box(PAGE), &config, now))
    });
}

criterion_group!(benches, bench_snapshot);
criterion_main!(benches);
