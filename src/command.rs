// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Command Buffer: per-thread byte lanes for near-zero-synchronization
//! structural writes, played back deterministically on a single thread.

use std::mem::size_of;
use std::sync::Mutex as StdMutex;

use smallvec::SmallVec;
use tracing::warn;

use crate::entity::EntityId;
use crate::registry::ComponentTypeId;
use crate::structural::{self, StructuralContext};

const OP_ADD_COMPONENT: u32 = 1;
const OP_REMOVE_COMPONENT: u32 = 2;
const OP_SET_SHARED_MANAGED: u32 = 3;
const OP_DESTROY_ENTITY: u32 = 4;
const OP_MUTATE_COMPONENTS: u32 = 5;

/// A single thread's append-only write buffer. No locking on the write
/// path; the buffer is handed back to the owning [`CommandBuffer`] when the
/// writer is finished.
pub struct LaneWriter {
    bytes: Vec<u8>,
}

impl LaneWriter {
    fn new(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
        }
    }

    fn push_u32(&mut self, value: u32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub fn add_component(&mut self, entity: EntityId, type_id: ComponentTypeId) {
        self.push_u32(OP_ADD_COMPONENT);
        self.push_u32(entity);
        self.push_u32(type_id);
    }

    pub fn remove_component(&mut self, entity: EntityId, type_id: ComponentTypeId) {
        self.push_u32(OP_REMOVE_COMPONENT);
        self.push_u32(entity);
        self.push_u32(type_id);
    }

    /// `shared_index` must already be a valid, referenced index (the writer
    /// is expected to have called `SharedValueStore::get_or_add` itself
    /// before recording this command).
    pub fn set_shared_managed(&mut self, entity: EntityId, type_id: ComponentTypeId, shared_index: i32) {
        self.push_u32(OP_SET_SHARED_MANAGED);
        self.push_u32(entity);
        self.push_u32(type_id);
        self.push_u32(shared_index as u32);
    }

    pub fn destroy_entity(&mut self, entity: EntityId) {
        self.push_u32(OP_DESTROY_ENTITY);
        self.push_u32(entity);
    }

    pub fn mutate_components(&mut self, entity: EntityId, add_ids: &[ComponentTypeId], remove_ids: &[ComponentTypeId]) {
        self.push_u32(OP_MUTATE_COMPONENTS);
        self.push_u32(entity);
        self.push_u32(add_ids.len() as u32);
        self.push_u32(remove_ids.len() as u32);
        for &id in add_ids {
            self.push_u32(id);
        }
        for &id in remove_ids {
            self.push_u32(id);
        }
    }
}

#[derive(Debug, Clone)]
enum Interpreted {
    Destroy {
        entity: EntityId,
    },
    Add {
        entity: EntityId,
        type_id: ComponentTypeId,
    },
    Remove {
        entity: EntityId,
        type_id: ComponentTypeId,
    },
    SetSharedManaged {
        entity: EntityId,
        type_id: ComponentTypeId,
        shared_index: i32,
    },
    Mutate {
        entity: EntityId,
        add_ids: SmallVec<[ComponentTypeId; 4]>,
        remove_ids: SmallVec<[ComponentTypeId; 4]>,
    },
}

/// Total order over interpreted commands: destroys first, then by op,
/// `Mutate` secondary-sorted by its (sorted) add/remove id sets, other ops
/// by type id (and shared index for `SetSharedManaged`), finally by entity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct SortKey {
    rank: u8,
    add_ids: SmallVec<[ComponentTypeId; 4]>,
    remove_ids: SmallVec<[ComponentTypeId; 4]>,
    type_id: ComponentTypeId,
    shared_index: i32,
    entity: EntityId,
}

impl Interpreted {
    fn sort_key(&self) -> SortKey {
        match self {
            Interpreted::Destroy { entity } => SortKey {
                rank: 0,
                add_ids: SmallVec::new(),
                remove_ids: SmallVec::new(),
                type_id: 0,
                shared_index: 0,
                entity: *entity,
            },
            Interpreted::Add { entity, type_id } => SortKey {
                rank: 1,
                add_ids: SmallVec::new(),
                remove_ids: SmallVec::new(),
                type_id: *type_id,
                shared_index: 0,
                entity: *entity,
            },
            Interpreted::Remove { entity, type_id } => SortKey {
                rank: 2,
                add_ids: SmallVec::new(),
                remove_ids: SmallVec::new(),
                type_id: *type_id,
                shared_index: 0,
                entity: *entity,
            },
            Interpreted::SetSharedManaged {
                entity,
                type_id,
                shared_index,
            } => SortKey {
                rank: 3,
                add_ids: SmallVec::new(),
                remove_ids: SmallVec::new(),
                type_id: *type_id,
                shared_index: *shared_index,
                entity: *entity,
            },
            Interpreted::Mutate {
                entity,
                add_ids,
                remove_ids,
            } => {
                let mut add_ids = add_ids.clone();
                let mut remove_ids = remove_ids.clone();
                add_ids.sort_unstable();
                remove_ids.sort_unstable();
                SortKey {
                    rank: 4,
                    add_ids,
                    remove_ids,
                    type_id: 0,
                    shared_index: 0,
                    entity: *entity,
                }
            }
        }
    }

    /// The fields a run of consecutive commands must share to be played
    /// back as a single batch (everything in `SortKey` except the entity).
    fn batch_key(key: &SortKey) -> (u8, &SmallVec<[ComponentTypeId; 4]>, &SmallVec<[ComponentTypeId; 4]>, ComponentTypeId, i32) {
        (key.rank, &key.add_ids, &key.remove_ids, key.type_id, key.shared_index)
    }
}

fn decode_lane(bytes: &[u8], out: &mut Vec<Interpreted>) {
    let mut cursor = 0usize;
    let read_u32 = |bytes: &[u8], at: usize| -> Option<u32> {
        bytes.get(at..at + 4).map(|s| u32::from_le_bytes(s.try_into().unwrap()))
    };

    while cursor + 4 <= bytes.len() {
        let Some(op) = read_u32(bytes, cursor) else { break };
        match op {
            OP_ADD_COMPONENT => {
                let (Some(entity), Some(type_id)) = (read_u32(bytes, cursor + 4), read_u32(bytes, cursor + 8)) else {
                    break;
                };
                out.push(Interpreted::Add { entity, type_id });
                cursor += size_of::<u32>() * 3;
            }
            OP_REMOVE_COMPONENT => {
                let (Some(entity), Some(type_id)) = (read_u32(bytes, cursor + 4), read_u32(bytes, cursor + 8)) else {
                    break;
                };
                out.push(Interpreted::Remove { entity, type_id });
                cursor += size_of::<u32>() * 3;
            }
            OP_SET_SHARED_MANAGED => {
                let (Some(entity), Some(type_id), Some(shared_index)) = (
                    read_u32(bytes, cursor + 4),
                    read_u32(bytes, cursor + 8),
                    read_u32(bytes, cursor + 12),
                ) else {
                    break;
                };
                out.push(Interpreted::SetSharedManaged {
                    entity,
                    type_id,
                    shared_index: shared_index as i32,
                });
                cursor += size_of::<u32>() * 4;
            }
            OP_DESTROY_ENTITY => {
                let Some(entity) = read_u32(bytes, cursor + 4) else { break };
                out.push(Interpreted::Destroy { entity });
                cursor += size_of::<u32>() * 2;
            }
            OP_MUTATE_COMPONENTS => {
                let (Some(entity), Some(add_count), Some(remove_count)) = (
                    read_u32(bytes, cursor + 4),
                    read_u32(bytes, cursor + 8),
                    read_u32(bytes, cursor + 12),
                ) else {
                    break;
                };
                let header_len = size_of::<u32>() * 4;
                let ids_len = (add_count as usize + remove_count as usize) * size_of::<u32>();
                let Some(ids_bytes) = bytes.get(cursor + header_len..cursor + header_len + ids_len) else {
                    break;
                };
                let mut add_ids = SmallVec::with_capacity(add_count as usize);
                let mut remove_ids = SmallVec::with_capacity(remove_count as usize);
                for i in 0..add_count as usize {
                    add_ids.push(read_u32(ids_bytes, i * 4).unwrap());
                }
                for i in 0..remove_count as usize {
                    remove_ids.push(read_u32(ids_bytes, (add_count as usize + i) * 4).unwrap());
                }
                out.push(Interpreted::Mutate {
                    entity,
                    add_ids,
                    remove_ids,
                });
                cursor += header_len + ids_len;
            }
            unknown => {
                warn!(op = unknown, "command buffer: skipping unrecognized opcode");
                cursor += size_of::<u32>();
            }
        }
    }
}

/// Collects lanes from many writers and plays them back deterministically
/// on a single thread. Not `Sync` for playback — only one thread may call
/// [`CommandBuffer::playback`] at a time (enforced by the caller; see the
/// concurrency contract: playback is never concurrent with itself).
pub struct CommandBuffer {
    lane_byte_capacity: usize,
    lanes: StdMutex<Vec<Vec<u8>>>,
}

impl CommandBuffer {
    pub fn new(lane_byte_capacity: usize) -> Self {
        Self {
            lane_byte_capacity,
            lanes: StdMutex::new(Vec::new()),
        }
    }

    /// Reset for a new recording pass, returning any previously recorded
    /// (but never played back) lanes to the allocator for reuse.
    pub fn begin(&self) {
        self.lanes.lock().unwrap().clear();
    }

    /// Open a new per-thread lane. The writer owns its buffer exclusively
    /// until `finish` hands it back.
    pub fn writer(&self) -> LaneWriter {
        LaneWriter::new(self.lane_byte_capacity)
    }

    /// Hand a finished lane's bytes back to the buffer for the next
    /// playback.
    pub fn finish(&self, writer: LaneWriter) {
        if writer.bytes.is_empty() {
            return;
        }
        self.lanes.lock().unwrap().push(writer.bytes);
    }

    /// Decode every lane, sort into the deterministic total order, batch
    /// consecutive same-key commands, and dispatch each batch into the
    /// Structural Engine. Must not be called concurrently with itself or
    /// with another playback.
    pub fn playback(&self, ctx: &StructuralContext<'_>, allocator: &crate::entity::EntityAllocator) {
        let mut lanes = self.lanes.lock().unwrap();
        let mut interpreted = Vec::new();
        for lane in lanes.iter() {
            decode_lane(lane, &mut interpreted);
        }

        let mut keyed: Vec<(SortKey, Interpreted)> = interpreted.into_iter().map(|cmd| (cmd.sort_key(), cmd)).collect();
        keyed.sort_by(|a, b| a.0.cmp(&b.0));

        let mut i = 0;
        while i < keyed.len() {
            let mut j = i + 1;
            while j < keyed.len() && Interpreted::batch_key(&keyed[j].0) == Interpreted::batch_key(&keyed[i].0) {
                j += 1;
            }
            dispatch_batch(ctx, allocator, &keyed[i..j]);
            i = j;
        }

        for lane in lanes.iter_mut() {
            lane.clear();
        }
        lanes.clear();
    }
}

/// Dispatches one same-key run of commands into the Structural Engine.
/// Add/remove-single-type runs go through the batched `add_components`/
/// `remove_components` entry points as a single call covering every entity
/// in the run; every other op is still applied per entity (destroys always
/// are, and mutate/set-shared-managed runs are rare enough not to warrant
/// their own batched primitive).
fn dispatch_batch(ctx: &StructuralContext<'_>, allocator: &crate::entity::EntityAllocator, batch: &[(SortKey, Interpreted)]) {
    match &batch[0].1 {
        Interpreted::Add { type_id, .. } => {
            let type_id = *type_id;
            let entities: Vec<EntityId> = batch
                .iter()
                .map(|(_, cmd)| match cmd {
                    Interpreted::Add { entity, .. } => *entity,
                    _ => unreachable!("batch_key groups commands by op"),
                })
                .collect();
            for (entity, result) in entities.iter().zip(structural::add_components(ctx, &entities, type_id)) {
                if let Err(err) = result {
                    warn!(%err, entity = *entity, "command buffer: playback add_component failed");
                }
            }
        }
        Interpreted::Remove { type_id, .. } => {
            let type_id = *type_id;
            let entities: Vec<EntityId> = batch
                .iter()
                .map(|(_, cmd)| match cmd {
                    Interpreted::Remove { entity, .. } => *entity,
                    _ => unreachable!("batch_key groups commands by op"),
                })
                .collect();
            for (entity, result) in entities.iter().zip(structural::remove_components(ctx, &entities, type_id)) {
                if let Err(err) = result {
                    warn!(%err, entity = *entity, "command buffer: playback remove_component failed");
                }
            }
        }
        _ => {
            for (_, cmd) in batch {
                let result = match cmd {
                    Interpreted::Destroy { entity } => structural::destroy_entity(ctx, *entity, allocator).map(|_| ()),
                    Interpreted::SetSharedManaged {
                        entity,
                        type_id,
                        shared_index,
                    } => structural::set_shared_managed(ctx, *entity, *type_id, *shared_index).map(|_| ()),
                    Interpreted::Mutate {
                        entity,
                        add_ids,
                        remove_ids,
                    } => structural::mutate_components(ctx, *entity, add_ids, remove_ids).map(|_| ()),
                    Interpreted::Add { .. } | Interpreted::Remove { .. } => unreachable!("handled above"),
                };
                if let Err(err) = result {
                    warn!(%err, "command buffer: playback command failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archetype_manager::ArchetypeManager;
    use crate::config::WorldConfig;
    use crate::entity::EntityAllocator;
    use crate::entity_index::EntityIndex;
    use crate::layout::{ComponentKind, LayoutPolicy};
    use crate::managed::ManagedObjectStore;
    use crate::mask::ComponentMask;
    use crate::registry::{ComponentRegistry, ComponentTypeSpec};
    use crate::shared_key::SharedValueKey;
    use crate::shared_store::SharedValueStore;
    use crate::structural::BatchCallCounters;

    #[test]
    fn sort_key_orders_destroys_first_then_by_op_then_entity() {
        let destroy = Interpreted::Destroy { entity: 9 };
        let add = Interpreted::Add { entity: 1, type_id: 5 };
        assert!(destroy.sort_key() < add.sort_key());

        let add_low_entity = Interpreted::Add { entity: 1, type_id: 5 };
        let add_high_entity = Interpreted::Add { entity: 2, type_id: 5 };
        assert!(add_low_entity.sort_key() < add_high_entity.sort_key());
    }

    #[test]
    fn decode_roundtrips_every_command_kind() {
        let mut writer = LaneWriter::new(256);
        writer.add_component(1, 10);
        writer.remove_component(2, 11);
        writer.set_shared_managed(3, 12, 4);
        writer.destroy_entity(4);
        writer.mutate_components(5, &[1, 2], &[3]);

        let mut out = Vec::new();
        decode_lane(&writer.bytes, &mut out);
        assert_eq!(out.len(), 5);
        assert!(matches!(out[0], Interpreted::Add { entity: 1, type_id: 10 }));
        assert!(matches!(out[4], Interpreted::Mutate { entity: 5, .. }));
    }

    #[test]
    fn playback_applies_add_then_reflects_in_entity_mask() {
        let registry = ComponentRegistry::new();
        let pos = registry
            .register(ComponentTypeSpec::new("Position", ComponentKind::InstanceUnmanaged, LayoutPolicy::Sequential))
            .unwrap();
        let archetypes = ArchetypeManager::new();
        let entities = EntityIndex::new();
        let managed = ManagedObjectStore::new();
        let shared = SharedValueStore::new();
        let config = WorldConfig::default();
        let allocator = EntityAllocator::new();
        let batch_calls = BatchCallCounters::default();

        let ctx = StructuralContext {
            registry: &registry,
            archetypes: &archetypes,
            entities: &entities,
            managed: &managed,
            shared: &shared,
            config: &config,
            batch_calls: &batch_calls,
        };

        let entity_id = allocator.allocate();
        let empty_mask = ComponentMask::new();
        let archetype = archetypes.get_or_create(&empty_mask, &registry, config.chunk_byte_budget).unwrap();
        let key = SharedValueKey::empty(0, 0);
        let group = archetype.or_create_group(&key);
        let loc = group.add_entity(entity_id);
        entities.insert(entity_id, crate::entity::EntityRecord::new(empty_mask, key, loc.chunk_index, loc.slot));

        let buffer = CommandBuffer::new(4096);
        buffer.begin();
        let mut writer = buffer.writer();
        writer.add_component(entity_id, pos);
        buffer.finish(writer);
        buffer.playback(&ctx, &allocator);

        let record = entities.get(entity_id).unwrap();
        assert!(record.archetype_mask.has(pos));
    }

    #[test]
    fn playback_runs_destroys_before_other_ops_on_same_entity() {
        let registry = ComponentRegistry::new();
        let archetypes = ArchetypeManager::new();
        let entities = EntityIndex::new();
        let managed = ManagedObjectStore::new();
        let shared = SharedValueStore::new();
        let config = WorldConfig::default();
        let allocator = EntityAllocator::new();
        let batch_calls = BatchCallCounters::default();
        let ctx = StructuralContext {
            registry: &registry,
            archetypes: &archetypes,
            entities: &entities,
            managed: &managed,
            shared: &shared,
            config: &config,
            batch_calls: &batch_calls,
        };

        let entity_id = allocator.allocate();
        let empty_mask = ComponentMask::new();
        let archetype = archetypes.get_or_create(&empty_mask, &registry, config.chunk_byte_budget).unwrap();
        let key = SharedValueKey::empty(0, 0);
        let group = archetype.or_create_group(&key);
        let loc = group.add_entity(entity_id);
        entities.insert(entity_id, crate::entity::EntityRecord::new(empty_mask, key, loc.chunk_index, loc.slot));

        let buffer = CommandBuffer::new(4096);
        buffer.begin();
        let mut writer = buffer.writer();
        writer.destroy_entity(entity_id);
        buffer.finish(writer);
        buffer.playback(&ctx, &allocator);

        assert!(!entities.contains(entity_id));
    }
}
