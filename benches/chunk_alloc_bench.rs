use archon_ecs_core::arena::new_arena;
use archon_ecs_core::chunk_group::ChunkGroup;
use archon_ecs_core::entity::EntityAllocator;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn alloc_free_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("chunk_alloc_bench");

    group.bench_function("add_then_remove_single", |b| {
        let group = ChunkGroup::new(new_arena(), 512, vec![12], 0);
        let allocator = EntityAllocator::new();
        b.iter(|| {
            let id = allocator.allocate();
            let location = group.add_entity(id);
            black_box(&location);
            group.remove_entity(location);
        });
    });

    group.bench_function("fill_one_chunk", |b| {
        let chunk_group = ChunkGroup::new(new_arena(), 512, vec![12], 0);
        let allocator = EntityAllocator::new();
        b.iter(|| {
            let locations: Vec<_> = (0..512)
                .map(|_| chunk_group.add_entity(allocator.allocate()))
                .collect();
            black_box(&locations);
            chunk_group.remove_entities(&locations);
        });
    });

    group.bench_function("add_entities_batch", |b| {
        let chunk_group = ChunkGroup::new(new_arena(), 512, vec![12], 0);
        let allocator = EntityAllocator::new();
        let ids: Vec<_> = (0..256).map(|_| allocator.allocate()).collect();
        b.iter(|| {
            let locations = chunk_group.add_entities(&ids);
            black_box(&locations);
            chunk_group.remove_entities(&locations);
        });
    });

    group.finish();
}

criterion_group!(benches, alloc_free_benchmark);
criterion_main!(benches);
