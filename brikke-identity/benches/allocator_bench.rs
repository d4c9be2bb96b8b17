#[macro_use]
extern crate criterion;

use std::sync::Arc;

use criterion::Criterion;

use brikke_identity::allocator::{AllocatorConfig, CachingIdentityAllocator};
use brikke_identity::error::IdentityError;
use brikke_identity::model::{IdentityMap, LabelSet};
use brikke_identity::owner::AllocatorOwner;
use brikke_telemetry::MetricsRecorder;

struct InertOwner;

impl AllocatorOwner for InertOwner {
    fn update_identities(&self, _added: &IdentityMap, _deleted: &IdentityMap) {}

    fn node_suffix(&self) -> Result<String, IdentityError> {
        Ok("192.0.2.1".into())
    }
}

fn bench_allocate_release(c: &mut Criterion) {
    let mut group = c.benchmark_group("identity_allocation");

    group.bench_function("reuse_hit", |b| {
        let allocator = CachingIdentityAllocator::new(
            Arc::new(InertOwner),
            AllocatorConfig::default(),
            Arc::new(MetricsRecorder::new()),
        );
        let labels = LabelSet::new(["app=bench"]);
        let pinned = allocator.allocate(&labels).unwrap();
        b.iter(|| {
            let identity = allocator.allocate(&labels).unwrap();
            allocator.release(identity.numeric).unwrap();
        });
        allocator.release(pinned.numeric).unwrap();
    });

    group.bench_function("allocate_release_cycle", |b| {
        let allocator = CachingIdentityAllocator::new(
            Arc::new(InertOwner),
            AllocatorConfig::default(),
            Arc::new(MetricsRecorder::new()),
        );
        let labels = LabelSet::new(["app=bench"]);
        b.iter(|| {
            let identity = allocator.allocate(&labels).unwrap();
            allocator.release(identity.numeric).unwrap();
        });
    });

    group.finish();
}

criterion_group!(benches, bench_allocate_release);
criterion_main!(benches);
