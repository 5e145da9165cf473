//! `ChunkGroup`: amortized-O(1) entity allocation across a growable,
//! copy-on-grow vector of chunks, with a lock-free "ready queue" hinting
//! which chunks likely have free space.

use std::sync::Arc;

use arc_swap::ArcSwap;
use crossbeam::queue::SegQueue;
use parking_lot::Mutex;

use crate::arena::ArenaHandle;
use crate::chunk::Chunk;
use crate::entity::EntityId;

/// One allocated location: which chunk (by index within the group) and slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLocation {
    pub chunk_index: usize,
    pub slot: usize,
}

pub struct ChunkGroup {
    chunks: ArcSwap<Vec<Arc<Chunk>>>,
    append_lock: Mutex<()>,
    /// Held by the Structural Engine across the multi-step `move_entity`
    /// sequence (allocate in new group, copy columns, free in old group) so
    /// two concurrent moves touching the same group pair serialize instead
    /// of interleaving. Distinct from `append_lock`, which only guards
    /// growing the chunk vector.
    move_lock: Mutex<()>,
    ready: SegQueue<usize>,
    arena: ArenaHandle,
    chunk_capacity: usize,
    unmanaged_strides: Vec<usize>,
    managed_count: usize,
}

impl ChunkGroup {
    pub fn new(arena: ArenaHandle, chunk_capacity: usize, unmanaged_strides: Vec<usize>, managed_count: usize) -> Self {
        Self {
            chunks: ArcSwap::from_pointee(Vec::new()),
            append_lock: Mutex::new(()),
            move_lock: Mutex::new(()),
            ready: SegQueue::new(),
            arena,
            chunk_capacity,
            unmanaged_strides,
            managed_count,
        }
    }

    /// Stable identity used to order lock acquisition across two groups.
    pub fn identity(self: &Arc<Self>) -> usize {
        Arc::as_ptr(self) as usize
    }

    pub fn lock_for_move(&self) -> parking_lot::MutexGuard<'_, ()> {
        self.move_lock.lock()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.load().len()
    }

    pub fn chunk(&self, index: usize) -> Option<Arc<Chunk>> {
        self.chunks.load().get(index).cloned()
    }

    /// Snapshot of the chunk vector for weakly-consistent iteration.
    pub fn snapshot(&self) -> Arc<Vec<Arc<Chunk>>> {
        self.chunks.load_full()
    }

    fn new_chunk(&self) -> Chunk {
        Chunk::new(&self.arena, self.chunk_capacity, &self.unmanaged_strides, self.managed_count)
    }

    fn requeue_if_space(&self, index: usize, chunk: &Chunk) {
        if !chunk.is_full() && chunk.try_mark_queued() {
            self.ready.push(index);
        }
    }

    /// Allocate one slot for `entity_id`. Fast path drains the ready queue;
    /// slow path grows the chunk vector under the append lock.
    pub fn add_entity(&self, entity_id: EntityId) -> ChunkLocation {
        while let Some(index) = self.ready.pop() {
            if let Some(chunk) = self.chunk(index) {
                chunk.mark_dequeued();
                if let Some(slot) = chunk.allocate_slot(entity_id) {
                    self.requeue_if_space(index, &chunk);
                    return ChunkLocation { chunk_index: index, slot };
                }
            }
        }

        let _guard = self.append_lock.lock();
        // Retry: another thread may have produced capacity while we waited.
        while let Some(index) = self.ready.pop() {
            if let Some(chunk) = self.chunk(index) {
                chunk.mark_dequeued();
                if let Some(slot) = chunk.allocate_slot(entity_id) {
                    self.requeue_if_space(index, &chunk);
                    return ChunkLocation { chunk_index: index, slot };
                }
            }
        }

        let new_chunk = Arc::new(self.new_chunk());
        let slot = new_chunk.allocate_slot(entity_id).expect("freshly built chunk has free slots");
        let index = {
            let current = self.chunks.load_full();
            let mut next: Vec<Arc<Chunk>> = (*current).clone();
            next.push(new_chunk.clone());
            let index = next.len() - 1;
            self.chunks.store(Arc::new(next));
            index
        };
        self.requeue_if_space(index, &new_chunk);
        ChunkLocation { chunk_index: index, slot }
    }

    pub fn remove_entity(&self, location: ChunkLocation) {
        if let Some(chunk) = self.chunk(location.chunk_index) {
            chunk.free_slot(location.slot);
            self.requeue_if_space(location.chunk_index, &chunk);
        }
    }

    /// Allocate `count` slots, preferring to fill existing chunks (via the
    /// ready queue) before growing. Returns locations in allocation order.
    pub fn add_entities(&self, entity_ids: &[EntityId]) -> Vec<ChunkLocation> {
        let mut out = Vec::with_capacity(entity_ids.len());
        for &id in entity_ids {
            out.push(self.add_entity(id));
        }
        out
    }

    pub fn remove_entities(&self, locations: &[ChunkLocation]) {
        for &loc in locations {
            self.remove_entity(loc);
        }
    }
}
