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

//! Archetype: groups `ChunkGroup`s sharing one component mask and exposes
//! column-index lookups over its four kind-partitioned id lists.

use std::sync::Arc;

use dashmap::DashMap;
use rustc_hash::FxHashMap;

use crate::arena::{new_arena, ArenaHandle};
use crate::chunk::Chunk;
use crate::chunk_group::ChunkGroup;
use crate::mask::ComponentMask;
use crate::registry::ComponentTypeId;
use crate::shared_key::SharedValueKey;

/// A mask's component ids partitioned by storage kind; the concatenation of
/// the four lists is a permutation of `mask.to_id_array()`.
#[derive(Debug, Clone, Default)]
pub struct KindPartition {
    pub unmanaged: Vec<ComponentTypeId>,
    pub managed: Vec<ComponentTypeId>,
    pub shared_unmanaged: Vec<ComponentTypeId>,
    pub shared_managed: Vec<ComponentTypeId>,
}

pub struct Archetype {
    mask: ComponentMask,
    partition: KindPartition,
    unmanaged_strides: Vec<usize>,
    chunk_capacity: usize,
    arena: ArenaHandle,
    groups: DashMap<SharedValueKey, Arc<ChunkGroup>, ahash::RandomState>,
    column_index: FxHashMap<ComponentTypeId, usize>,
    managed_index: FxHashMap<ComponentTypeId, usize>,
    shared_managed_index: FxHashMap<ComponentTypeId, usize>,
    shared_unmanaged_index: FxHashMap<ComponentTypeId, usize>,
}

impl Archetype {
    pub fn new(mask: ComponentMask, partition: KindPartition, unmanaged_strides: Vec<usize>, chunk_capacity: usize) -> Self {
        let column_index = partition
            .unmanaged
            .iter()
            .enumerate()
            .map(|(i, &id)| (id, i))
            .collect();
        let managed_index = partition
            .managed
            .iter()
            .enumerate()
            .map(|(i, &id)| (id, i))
            .collect();
        let shared_managed_index = partition
            .shared_managed
            .iter()
            .enumerate()
            .map(|(i, &id)| (id, i))
            .collect();
        let shared_unmanaged_index = partition
            .shared_unmanaged
            .iter()
            .enumerate()
            .map(|(i, &id)| (id, i))
            .collect();

        Self {
            mask,
            partition,
            unmanaged_strides,
            chunk_capacity,
            arena: new_arena(),
            groups: DashMap::default(),
            column_index,
            managed_index,
            shared_managed_index,
            shared_unmanaged_index,
        }
    }

    pub fn mask(&self) -> &ComponentMask {
        &self.mask
    }

    pub fn partition(&self) -> &KindPartition {
        &self.partition
    }

    pub fn column_index(&self, type_id: ComponentTypeId) -> Option<usize> {
        self.column_index.get(&type_id).copied()
    }

    pub fn managed_type_index(&self, type_id: ComponentTypeId) -> Option<usize> {
        self.managed_index.get(&type_id).copied()
    }

    pub fn shared_managed_index(&self, type_id: ComponentTypeId) -> Option<usize> {
        self.shared_managed_index.get(&type_id).copied()
    }

    pub fn shared_unmanaged_index(&self, type_id: ComponentTypeId) -> Option<usize> {
        self.shared_unmanaged_index.get(&type_id).copied()
    }

    /// Fetch or lazily create the `ChunkGroup` for `shared_key`.
    pub fn or_create_group(&self, shared_key: &SharedValueKey) -> Arc<ChunkGroup> {
        if let Some(existing) = self.groups.get(shared_key) {
            return existing.clone();
        }
        self.groups
            .entry(shared_key.clone())
            .or_insert_with(|| {
                Arc::new(ChunkGroup::new(
                    self.arena.clone(),
                    self.chunk_capacity,
                    self.unmanaged_strides.clone(),
                    self.partition.managed.len(),
                ))
            })
            .clone()
    }

    pub fn group(&self, shared_key: &SharedValueKey) -> Option<Arc<ChunkGroup>> {
        self.groups.get(shared_key).map(|g| g.clone())
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Weakly consistent snapshot iteration over every `(key, group)` pair.
    pub fn for_each_group(&self, mut visitor: impl FnMut(&SharedValueKey, &Arc<ChunkGroup>)) {
        for entry in self.groups.iter() {
            visitor(entry.key(), entry.value());
        }
    }

    /// Visit every occupied `(entity_id, chunk, slot)` triple across every
    /// group whose key matches `key_filter` (wildcard positions accepted via
    /// the filter closure itself).
    pub fn for_each_entity(
        &self,
        mut key_filter: impl FnMut(&SharedValueKey) -> bool,
        mut visitor: impl FnMut(&SharedValueKey, &Arc<Chunk>, usize, crate::entity::EntityId),
    ) {
        for entry in self.groups.iter() {
            if !key_filter(entry.key()) {
                continue;
            }
            let snapshot = entry.value().snapshot();
            for chunk in snapshot.iter() {
                let mut cursor = 0usize;
                while let Some(slot) = chunk.next_occupied(cursor) {
                    if let Some(entity_id) = chunk.entity_at(slot) {
                        visitor(entry.key(), chunk, slot, entity_id);
                    }
                    cursor = slot + 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{ComponentKind, LayoutPolicy};
    use crate::registry::{ComponentRegistry, ComponentTypeSpec};

    fn position_id(registry: &ComponentRegistry) -> ComponentTypeId {
        registry
            .register(ComponentTypeSpec::new(
                "Position",
                ComponentKind::InstanceUnmanaged,
                LayoutPolicy::Sequential,
            ))
            .unwrap()
    }

    #[test]
    fn or_create_group_is_idempotent_per_key() {
        let registry = ComponentRegistry::new();
        let pos = position_id(&registry);
        let mask = ComponentMask::from_ids([pos]);
        let partition = KindPartition {
            unmanaged: vec![pos],
            ..Default::default()
        };
        let archetype = Archetype::new(mask, partition, vec![0], 16);
        let key = SharedValueKey::empty(0, 0);
        let a = archetype.or_create_group(&key);
        let b = archetype.or_create_group(&key);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(archetype.group_count(), 1);
    }

    #[test]
    fn for_each_entity_visits_every_occupied_slot_once() {
        let registry = ComponentRegistry::new();
        let pos = position_id(&registry);
        let mask = ComponentMask::from_ids([pos]);
        let partition = KindPartition {
            unmanaged: vec![pos],
            ..Default::default()
        };
        let archetype = Archetype::new(mask, partition, vec![0], 2);
        let key = SharedValueKey::empty(0, 0);
        let group = archetype.or_create_group(&key);
        group.add_entity(1);
        group.add_entity(2);
        group.add_entity(3);

        let mut seen = Vec::new();
        archetype.for_each_entity(|_| true, |_, _, _, eid| seen.push(eid));
        seen.sort_unstable();
        assert_eq!(seen, vec![1, 2, 3]);
    }
}
