use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use sitebinder::core::asset::{Asset, AssetSet};
use sitebinder::core::backend::RemoteObject;
use sitebinder::core::binder::build_grant_policy;
use sitebinder::core::iam::{Caller, PolicyEngine, Request};
use sitebinder::core::plan::ObjectSyncPlanner;
use sitebinder::core::validation::DistributionId;
use sitebinder::{BinderConfig, StorageTarget};

/// Site of `count` small pages spread over a few directories
fn create_site(count: usize) -> AssetSet {
    (0..count)
        .map(|i| {
            Asset::new(
                format!("section-{}/page-{}.html", i % 16, i),
                format!("<p>page {}</p>", i).into_bytes(),
                "text/html",
            )
        })
        .collect()
}

/// Remote state matching `assets`, with every `stale_every`th object outdated
fn remote_state(
    assets: &AssetSet,
    target: &StorageTarget,
    stale_every: usize,
) -> Vec<RemoteObject> {
    assets
        .iter()
        .enumerate()
        .map(|(i, asset)| RemoteObject {
            key: target.object_key(asset.path()),
            content_type: asset.content_type().to_string(),
            fingerprint: if i % stale_every == 0 {
                None
            } else {
                Some(asset.fingerprint().clone())
            },
            revision: i.to_string(),
            size: asset.size(),
        })
        .collect()
}

/// Benchmark diffing against an empty remote (first publish)
fn bench_plan_first_publish(c: &mut Criterion) {
    let sizes = vec![100, 1_000, 10_000];
    let target = StorageTarget::new("arn:aws:s3:::bench").unwrap();

    let mut group = c.benchmark_group("plan_first_publish");

    for size in sizes {
        group.throughput(Throughput::Elements(size as u64));

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let assets = create_site(size);

            b.iter(|| {
                let plan = ObjectSyncPlanner::compute(&assets, Vec::new(), &target).unwrap();
                black_box(plan);
            });
        });
    }

    group.finish();
}

/// Benchmark diffing against a mostly up-to-date remote (republish)
fn bench_plan_republish(c: &mut Criterion) {
    let sizes = vec![100, 1_000, 10_000];
    let target = StorageTarget::new("arn:aws:s3:::bench").unwrap();

    let mut group = c.benchmark_group("plan_republish");

    for size in sizes {
        group.throughput(Throughput::Elements(size as u64));

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let assets = create_site(size);
            let remote = remote_state(&assets, &target, 10);

            b.iter(|| {
                let plan = ObjectSyncPlanner::compute(&assets, remote.clone(), &target).unwrap();
                black_box(plan);
            });
        });
    }

    group.finish();
}

/// Benchmark evaluating the generated grant
fn bench_grant_evaluation(c: &mut Criterion) {
    let target = StorageTarget::new("arn:aws:s3:::bench").unwrap();
    let distribution = DistributionId::new("E123ABC").unwrap();
    let policy = build_grant_policy(&BinderConfig::default(), &target, &distribution);
    let engine = PolicyEngine::new();

    let request = Request::new(
        Caller::Service("cloudfront.amazonaws.com".to_string()),
        "s3:GetObject",
        "arn:aws:s3:::bench/section-3/page-42.html",
    )
    .with_context("AWS:SourceArn", "E123ABC");

    c.bench_function("grant_evaluation", |b| {
        b.iter(|| black_box(engine.is_allowed(&policy, &request)));
    });
}

criterion_group!(
    benches,
    bench_plan_first_publish,
    bench_plan_republish,
    bench_grant_evaluation
);
criterion_main!(benches);
