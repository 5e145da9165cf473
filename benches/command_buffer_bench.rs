use archon_ecs_core::layout::{ComponentKind, FieldSpec, LayoutPolicy, PrimitiveKind};
use archon_ecs_core::registry::ComponentTypeSpec;
use archon_ecs_core::World;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn tag_spec(key: &str) -> ComponentTypeSpec {
    ComponentTypeSpec::new(key, ComponentKind::InstanceUnmanaged, LayoutPolicy::Sequential)
        .with_field(FieldSpec::primitive("value", PrimitiveKind::I32))
}

fn command_buffer_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("command_buffer_bench");

    group.bench_function("record_and_playback_add_component", |b| {
        let world = World::new();
        let base = world.registry().register(tag_spec("Base")).unwrap();
        let extra = world.registry().register(tag_spec("Extra")).unwrap();
        let entities: Vec<_> = (0..1000)
            .map(|_| world.create_entity(&[base]).unwrap())
            .collect();

        b.iter(|| {
            world.begin_commands();
            let mut writer = world.command_writer();
            for &entity in &entities {
                writer.add_component(entity, extra);
            }
            world.finish_writer(writer);
            world.playback_commands();
            black_box(&entities);

            world.begin_commands();
            let mut writer = world.command_writer();
            for &entity in &entities {
                writer.remove_component(entity, extra);
            }
            world.finish_writer(writer);
            world.playback_commands();
        });
    });

    group.bench_function("record_from_multiple_lanes", |b| {
        let world = World::new();
        let base = world.registry().register(tag_spec("BaseMulti")).unwrap();
        let extra = world.registry().register(tag_spec("ExtraMulti")).unwrap();
        let entities: Vec<_> = (0..1000)
            .map(|_| world.create_entity(&[base]).unwrap())
            .collect();

        b.iter(|| {
            world.begin_commands();
            for chunk in entities.chunks(100) {
                let mut writer = world.command_writer();
                for &entity in chunk {
                    writer.add_component(entity, extra);
                }
                world.finish_writer(writer);
            }
            world.playback_commands();

            world.begin_commands();
            for chunk in entities.chunks(100) {
                let mut writer = world.command_writer();
                for &entity in chunk {
                    writer.remove_component(entity, extra);
                }
                world.finish_writer(writer);
            }
            world.playback_commands();
        });
    });

    group.finish();
}

criterion_group!(benches, command_buffer_benchmark);
criterion_main!(benches);
