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

//! Entity identifiers and the record the Entity Index keeps per entity.

use std::sync::atomic::{AtomicU32, Ordering};

use crossbeam::queue::SegQueue;

use crate::mask::ComponentMask;
use crate::shared_key::SharedValueKey;

/// Dense positive entity identifier. `0` is reserved to mean "no entity";
/// `u32::MAX` encodes a free chunk slot in `entity_ids` columns.
pub type EntityId = u32;

pub const NO_ENTITY: EntityId = 0;
pub const FREE_SLOT: EntityId = u32::MAX;

/// Monotonic id source with recycling: destroyed ids are pushed here and
/// handed back out before the counter advances, bounding growth for
/// workloads that churn entities.
pub struct EntityAllocator {
    next: AtomicU32,
    recycled: SegQueue<EntityId>,
}

impl Default for EntityAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityAllocator {
    pub fn new() -> Self {
        Self {
            // id 0 is reserved, so the counter starts at 1.
            next: AtomicU32::new(1),
            recycled: SegQueue::new(),
        }
    }

    pub fn allocate(&self) -> EntityId {
        if let Some(id) = self.recycled.pop() {
            return id;
        }
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    pub fn recycle(&self, id: EntityId) {
        self.recycled.push(id);
    }
}

/// Per-entity bookkeeping owned by the Entity Index. Replaced wholesale on
/// every structural transition.
#[derive(Debug, Clone)]
pub struct EntityRecord {
    pub archetype_mask: ComponentMask,
    pub shared_key: SharedValueKey,
    pub chunk_index: usize,
    pub slot: usize,
}

impl EntityRecord {
    pub fn new(archetype_mask: ComponentMask, shared_key: SharedValueKey, chunk_index: usize, slot: usize) -> Self {
        Self {
            archetype_mask,
            shared_key,
            chunk_index,
            slot,
        }
    }
}
