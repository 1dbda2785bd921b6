//! ECS hot-path benchmarks: table churn, world-matrix propagation and
//! subtree destruction.
//!
//! Run with: `cargo bench --bench ecs_benchmarks`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use ferrule_ecs::prelude::*;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// A group with `roots` roots, each carrying a chain of `depth` descendants.
fn forest(roots: usize, depth: usize) -> (EntityGroup, Vec<EntityId>) {
    let mut group = EntityGroup::new();
    let mut root_ids = Vec::with_capacity(roots);
    for r in 0..roots {
        let root = group.create_entity("root");
        group
            .set_local_position(root, Vec3::new(r as f32, 0.0, 0.0))
            .unwrap();
        let mut parent = root;
        for _ in 0..depth {
            let child = group.create_entity("link");
            group
                .set_local_position(child, Vec3::new(0.0, 1.0, 0.0))
                .unwrap();
            group.attach_keep_local(child, parent).unwrap();
            parent = child;
        }
        root_ids.push(root);
    }
    (group, root_ids)
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

fn bench_table_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("table_churn");
    for &n in &[1_000usize, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| {
                let mut table: ComponentTable<PointLight> = ComponentTable::new();
                for i in 0..n as u32 {
                    table.add(EntityId::new(i), PointLight::default()).unwrap();
                }
                for i in (0..n as u32).step_by(2) {
                    table.remove(EntityId::new(i));
                }
                black_box(table.len())
            });
        });
    }
    group.finish();
}

fn bench_propagation(c: &mut Criterion) {
    let mut group = c.benchmark_group("world_propagation");
    for &(roots, depth) in &[(100usize, 10usize), (10, 100)] {
        let (mut ecs, root_ids) = forest(roots, depth);
        group.bench_with_input(
            BenchmarkId::new("move_roots", format!("{roots}x{depth}")),
            &root_ids,
            |b, root_ids| {
                let mut t = 0.0f32;
                b.iter(|| {
                    t += 0.01;
                    for &root in root_ids {
                        ecs.set_local_rotation(root, Quat::from_rotation_y(t)).unwrap();
                    }
                    black_box(ecs.entity_count())
                });
            },
        );
    }
    group.finish();
}

fn bench_destroy_subtree(c: &mut Criterion) {
    c.bench_function("destroy_forest_100x10", |b| {
        b.iter_batched(
            || forest(100, 10),
            |(mut ecs, roots)| {
                for root in roots {
                    ecs.destroy_entity(root);
                }
                black_box(ecs.entity_count())
            },
            criterion::BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, bench_table_churn, bench_propagation, bench_destroy_subtree);
criterion_main!(benches);
