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

fn spawn_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("spawn_bench");

    group.bench_function("spawn_two_components", |b| {
        let world = World::new();
        let pos = world.registry().register(vec3_spec("Position")).unwrap();
        let vel = world.registry().register(vec3_spec("Velocity")).unwrap();
        b.iter(|| {
            for _ in 0..1000 {
                black_box(world.create_entity(&[pos, vel]).unwrap());
            }
        });
    });

    group.bench_function("spawn_three_components", |b| {
        let world = World::new();
        let pos = world.registry().register(vec3_spec("Position")).unwrap();
        let vel = world.registry().register(vec3_spec("Velocity")).unwrap();
        let health = world
            .registry()
            .register(ComponentTypeSpec::new("Health", ComponentKind::InstanceUnmanaged, LayoutPolicy::Sequential).with_field(FieldSpec::primitive("hp", PrimitiveKind::I32)))
            .unwrap();
        b.iter(|| {
            for _ in 0..1000 {
                black_box(world.create_entity(&[pos, vel, health]).unwrap());
            }
        });
    });

    group.finish();
}

criterion_group!(benches, spawn_benchmark);
criterion_main!(benches);
