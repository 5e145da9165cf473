//! Archetype Manager: atomic insert-if-absent map from `ComponentMask` to
//! `Archetype`, computing each archetype's kind partition and chunk
//! capacity on first creation.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::archetype::{Archetype, KindPartition};
use crate::error::{EcsError, Result};
use crate::layout::ComponentKind;
use crate::mask::ComponentMask;
use crate::registry::ComponentRegistry;

const FALLBACK_CAPACITY: usize = 64;

#[derive(Default)]
pub struct ArchetypeManager {
    archetypes: DashMap<ComponentMask, Arc<Archetype>, ahash::RandomState>,
}

impl ArchetypeManager {
    pub fn new() -> Self {
        Self {
            archetypes: DashMap::default(),
        }
    }

    /// Fetches the archetype for `mask`, building it on first use. Building
    /// fails with `BadArgument` if `mask` includes an unmanaged component
    /// whose registered layout has a zero byte size.
    pub fn get_or_create(&self, mask: &ComponentMask, registry: &ComponentRegistry, chunk_byte_budget: usize) -> Result<Arc<Archetype>> {
        if let Some(existing) = self.archetypes.get(mask) {
            return Ok(existing.clone());
        }
        match self.archetypes.entry(mask.clone()) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                let archetype = Arc::new(build_archetype(mask, registry, chunk_byte_budget)?);
                entry.insert(archetype.clone());
                Ok(archetype)
            }
        }
    }

    pub fn get(&self, mask: &ComponentMask) -> Option<Arc<Archetype>> {
        self.archetypes.get(mask).map(|a| a.clone())
    }

    pub fn len(&self) -> usize {
        self.archetypes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.archetypes.is_empty()
    }

    pub fn for_each_archetype(&self, mut visitor: impl FnMut(&ComponentMask, &Arc<Archetype>)) {
        for entry in self.archetypes.iter() {
            visitor(entry.key(), entry.value());
        }
    }
}

fn build_archetype(mask: &ComponentMask, registry: &ComponentRegistry, chunk_byte_budget: usize) -> Result<Archetype> {
    let mut partition = KindPartition::default();
    let mut unmanaged_strides = Vec::new();

    for id in mask.to_id_array() {
        let Some(descriptor) = registry.descriptor(id) else {
            continue;
        };
        match descriptor.kind {
            ComponentKind::InstanceUnmanaged => {
                if descriptor.total_size == 0 {
                    return Err(EcsError::BadArgument(format!(
                        "unmanaged component class {id} has a zero-byte layout; cannot allocate chunk storage for it"
                    )));
                }
                partition.unmanaged.push(id);
                unmanaged_strides.push(descriptor.total_size);
            }
            ComponentKind::InstanceManaged => partition.managed.push(id),
            ComponentKind::SharedUnmanaged => partition.shared_unmanaged.push(id),
            ComponentKind::SharedManaged => partition.shared_managed.push(id),
        }
    }

    let total_stride: usize = unmanaged_strides.iter().sum();
    let chunk_capacity = if total_stride == 0 {
        FALLBACK_CAPACITY
    } else {
        (chunk_byte_budget / total_stride).max(1)
    };

    Ok(Archetype::new(mask.clone(), partition, unmanaged_strides, chunk_capacity))
}
