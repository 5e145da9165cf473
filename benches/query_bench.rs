use archon_ecs_core::layout::{ComponentKind, FieldSpec, LayoutPolicy, PrimitiveKind};
use archon_ecs_core::registry::ComponentTypeSpec;
use archon_ecs_core::World;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn vec3_spec(key: &str) -> ComponentTypeSpec {
    ComponentTypeSpec::new(key, ComponentKind::InstanceUnmanaged, LayoutPolicy::Sequential)
        .with_field(FieldSpec::primitive("x", PrimitiveKind::F32))
        .with_field(FieldSpec::primitive("y", PrimitiveKind::F32))
        .with_field(FieldSpec::primitive("z", PrimitiveKind::F32))
}

fn populated_world() -> (World, archon_ecs_core::ComponentTypeId, archon_ecs_core::ComponentTypeId) {
    let world = World::new();
    let pos = world.registry().register(vec3_spec("Position")).unwrap();
    let vel = world.registry().register(vec3_spec("Velocity")).unwrap();
    for _ in 0..5000 {
        world.create_entity(&[pos, vel]).unwrap();
    }
    for _ in 0..5000 {
        world.create_entity(&[pos]).unwrap();
    }
    (world, pos, vel)
}

fn query_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("query_bench");

    group.bench_function("count_with_without", |b| {
        let (world, pos, vel) = populated_world();
        b.iter(|| black_box(world.query().with(pos).without(vel).count()));
    });

    group.bench_function("for_each_entity_reads_bytes", |b| {
        let (world, pos, vel) = populated_world();
        b.iter(|| {
            let mut total = 0u64;
            world
                .query()
                .with(pos)
                .with(vel)
                .fetch(pos)
                .for_each_entity(|view| {
                    if let Some(bytes) = view.component_bytes(pos) {
                        total += bytes.len() as u64;
                    }
                });
            black_box(total);
        });
    });

    #[cfg(feature = "parallel")]
    group.bench_function("for_each_parallel_reads_bytes", |b| {
        use std::sync::atomic::{AtomicU64, Ordering};
        let (world, pos, vel) = populated_world();
        b.iter(|| {
            let total = AtomicU64::new(0);
            world
                .query()
                .with(pos)
                .with(vel)
                .fetch(pos)
                .for_each_parallel(|view| {
                    if let Some(bytes) = view.component_bytes(pos) {
                        total.fetch_add(bytes.len() as u64, Ordering::Relaxed);
                    }
                });
            black_box(total.load(Ordering::Relaxed));
        });
    });

    group.finish();
}

criterion_group!(benches, query_benchmark);
criterion_main!(benches);
