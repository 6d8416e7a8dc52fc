use criterion::{criterion_group, criterion_main, Criterion};
use sysgate::{ExportIndex, NameHash, Sha1Hash};

/// Roughly the shape of a real system library's export surface.
fn export_surface(count: usize) -> Vec<(String, u32)> {
    (0..count)
        .map(|i| (format!("NtBenchExport{i:04}"), 0x1000 + (i as u32) * 0x20))
        .collect()
}

fn bench_index_build(c: &mut Criterion) {
    let exports = export_surface(2048);

    c.bench_function("export_index_build_sha1_2048", |b| {
        b.iter(|| ExportIndex::build(&exports, 0x0100_0000, &Sha1Hash).unwrap())
    });
}

fn bench_index_lookup(c: &mut Criterion) {
    let exports = export_surface(2048);
    let index = ExportIndex::build(&exports, 0x0100_0000, &Sha1Hash).unwrap();
    let digest = Sha1Hash.digest("ntbenchexport1024");

    c.bench_function("export_index_lookup_sha1", |b| {
        b.iter(|| index.lookup(&digest, 0x7FF8_0000_0000).unwrap())
    });
}

criterion_group!(benches, bench_index_build, bench_index_lookup);
criterion_main!(benches);
