//! Benchmarks for stage resolution and query listing.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use curation::core::DataStage;
use curation::registry::{resolve_stage, StageRegistry};
use curation::report::Reporter;
use curation::rules::RuleArgs;
use std::collections::BTreeMap;

fn registry_benchmark(c: &mut Criterion) {
    let registry = StageRegistry::builtin().unwrap();
    let base = RuleArgs::new("project_id", "dataset_id", "dataset_id_sandbox");
    let params = BTreeMap::new();

    c.bench_function("resolve_combined", |b| {
        b.iter(|| resolve_stage(black_box(&registry), DataStage::Combined, &base, &params).unwrap())
    });

    c.bench_function("list_all_stages", |b| {
        let reporter = Reporter::new(&registry);
        b.iter(|| {
            for stage in DataStage::ALL {
                black_box(reporter.stage_rows(stage, &params).unwrap_or_default());
            }
        })
    });
}

criterion_group!(benches, registry_benchmark);
criterion_main!(benches);
