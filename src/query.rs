//! Query Evaluator: a builder over `with`/`without`/`any` masks and an
//! optional set of exact-match shared-value filters, executed against an
//! [`ArchetypeManager`] snapshot. Terminal methods stream matching
//! `(archetype, chunk, slot)` triples without collecting them, except the
//! parallel variant, which must flatten first to hand work to a pool.

use std::any::Any;
use std::sync::Arc;

use crate::archetype::Archetype;
use crate::archetype_manager::ArchetypeManager;
use crate::chunk::Chunk;
use crate::entity::EntityId;
use crate::managed::{ManagedObjectStore, Ticket};
use crate::mask::ComponentMask;
use crate::registry::ComponentTypeId;
use crate::shared_key::{SharedValueKey, UNSET_UNMANAGED};
use crate::shared_store::SharedValueStore;

#[derive(Debug, Clone, Copy)]
enum SharedFilter {
    Managed(ComponentTypeId, i32),
    Unmanaged(ComponentTypeId, i64),
}

/// A single matched entity, with accessors that resolve its requested
/// components lazily against the owning archetype's column layout.
pub struct EntityView<'q> {
    pub entity: EntityId,
    archetype: &'q Archetype,
    chunk: &'q Chunk,
    slot: usize,
    shared_key: &'q SharedValueKey,
    managed_store: &'q ManagedObjectStore,
    shared_store: &'q SharedValueStore,
}

impl<'q> EntityView<'q> {
    /// Zero-copy byte slice for an unmanaged instance component, or `None`
    /// if this archetype carries no column for `type_id`.
    pub fn component_bytes(&self, type_id: ComponentTypeId) -> Option<&'q [u8]> {
        let col = self.archetype.column_index(type_id)?;
        self.chunk.get_column_slice(col, self.slot).ok()
    }

    /// The managed-object ticket stored for `type_id` at this slot, if any.
    pub fn managed_ticket(&self, type_id: ComponentTypeId) -> Option<Ticket> {
        let idx = self.archetype.managed_type_index(type_id)?;
        let ticket = self.chunk.get_managed_ticket(idx, self.slot).ok()?;
        (ticket >= 0).then_some(ticket as Ticket)
    }

    pub fn managed<T: Any + Send + Sync + Clone>(&self, type_id: ComponentTypeId) -> Option<Arc<T>> {
        self.managed_store.get(self.managed_ticket(type_id)?)
    }

    pub fn shared_managed<T: Any + Send + Sync + Clone>(&self, type_id: ComponentTypeId) -> Option<Arc<T>> {
        let pos = self.archetype.shared_managed_index(type_id)?;
        let index = *self.shared_key.managed_shared_indices.get(pos)?;
        self.shared_store.value_at(index)
    }

    pub fn shared_unmanaged(&self, type_id: ComponentTypeId) -> Option<i64> {
        let pos = self.archetype.shared_unmanaged_index(type_id)?;
        let value = *self.shared_key.unmanaged_shared_values.get(pos)?;
        (value != UNSET_UNMANAGED).then_some(value)
    }
}

/// Builder for a query over an [`ArchetypeManager`]. Cheap to construct and
/// re-execute; holds no state beyond the filter description and borrowed
/// references into the owning `World`'s stores.
pub struct QueryBuilder<'w> {
    archetypes: &'w ArchetypeManager,
    managed_store: &'w ManagedObjectStore,
    shared_store: &'w SharedValueStore,
    with_mask: ComponentMask,
    without_mask: ComponentMask,
    any_masks: Vec<ComponentMask>,
    requested: Vec<ComponentTypeId>,
    shared_filters: Vec<SharedFilter>,
}

impl<'w> QueryBuilder<'w> {
    pub fn new(archetypes: &'w ArchetypeManager, managed_store: &'w ManagedObjectStore, shared_store: &'w SharedValueStore) -> Self {
        Self {
            archetypes,
            managed_store,
            shared_store,
            with_mask: ComponentMask::new(),
            without_mask: ComponentMask::new(),
            any_masks: Vec::new(),
            requested: Vec::new(),
            shared_filters: Vec::new(),
        }
    }

    pub fn with(mut self, type_id: ComponentTypeId) -> Self {
        self.with_mask.set(type_id);
        self
    }

    pub fn without(mut self, type_id: ComponentTypeId) -> Self {
        self.without_mask.set(type_id);
        self
    }

    /// Each call adds one *alternative* mask; the archetype must intersect
    /// at least one of the masks supplied across all `any` calls.
    pub fn any(mut self, ids: impl IntoIterator<Item = ComponentTypeId>) -> Self {
        self.any_masks.push(ComponentMask::from_ids(ids));
        self
    }

    /// Request that `type_id`'s column/ticket/shared-slot be resolvable on
    /// every matched archetype; archetypes missing it are skipped entirely.
    pub fn fetch(mut self, type_id: ComponentTypeId) -> Self {
        self.requested.push(type_id);
        self
    }

    pub fn with_shared_managed(mut self, type_id: ComponentTypeId, index: i32) -> Self {
        self.shared_filters.push(SharedFilter::Managed(type_id, index));
        self
    }

    pub fn with_shared_unmanaged(mut self, type_id: ComponentTypeId, value: i64) -> Self {
        self.shared_filters.push(SharedFilter::Unmanaged(type_id, value));
        self
    }

    fn matches_mask(&self, mask: &ComponentMask) -> bool {
        if !mask.contains_all(&self.with_mask) {
            return false;
        }
        if mask.intersects(&self.without_mask) {
            return false;
        }
        if !self.any_masks.is_empty() && !self.any_masks.iter().any(|m| mask.intersects(m)) {
            return false;
        }
        true
    }

    fn resolvable(&self, archetype: &Archetype) -> bool {
        self.requested.iter().all(|&id| {
            archetype.column_index(id).is_some()
                || archetype.managed_type_index(id).is_some()
                || archetype.shared_managed_index(id).is_some()
                || archetype.shared_unmanaged_index(id).is_some()
        })
    }

    fn shared_key_matches(&self, archetype: &Archetype, key: &SharedValueKey) -> bool {
        self.shared_filters.iter().all(|filter| match *filter {
            SharedFilter::Managed(type_id, want) => match archetype.shared_managed_index(type_id) {
                Some(pos) => key.managed_shared_indices.get(pos).copied() == Some(want),
                None => false,
            },
            SharedFilter::Unmanaged(type_id, want) => match archetype.shared_unmanaged_index(type_id) {
                Some(pos) => key.unmanaged_shared_values.get(pos).copied() == Some(want),
                None => false,
            },
        })
    }

    /// Iterate archetypes satisfying the mask filters and `resolvable`,
    /// shared by `for_each_chunk` and `for_each_entity`.
    fn for_each_archetype_matched(&self, mut per_archetype: impl FnMut(&Archetype)) {
        self.archetypes.for_each_archetype(|mask, archetype| {
            if self.matches_mask(mask) && self.resolvable(archetype) {
                per_archetype(archetype);
            }
        });
    }

    pub fn for_each_archetype(&self, mut visitor: impl FnMut(&Archetype)) {
        self.for_each_archetype_matched(|archetype| visitor(archetype));
    }

    pub fn for_each_chunk(&self, mut visitor: impl FnMut(&Archetype, &Chunk)) {
        self.for_each_archetype_matched(|archetype| {
            archetype.for_each_group(|key, group| {
                if !self.shared_key_matches(archetype, key) {
                    return;
                }
                for chunk in group.snapshot().iter() {
                    visitor(archetype, chunk);
                }
            });
        });
    }

    pub fn for_each_entity(&self, mut visitor: impl FnMut(EntityView<'_>)) {
        self.for_each_archetype_matched(|archetype| {
            archetype.for_each_entity(
                |key| self.shared_key_matches(archetype, key),
                |key, chunk, slot, entity| {
                    visitor(EntityView {
                        entity,
                        archetype,
                        chunk,
                        slot,
                        shared_key: key,
                        managed_store: self.managed_store,
                        shared_store: self.shared_store,
                    });
                },
            );
        });
    }

    pub fn count(&self) -> usize {
        let mut total = 0usize;
        self.for_each_entity(|_| total += 1);
        total
    }

    /// Flattens matching `(archetype, chunk, slot)` triples and dispatches
    /// them over rayon's default pool. `visitor` must be safe to call from
    /// any worker thread; it may not mutate archetype structure.
    #[cfg(feature = "parallel")]
    pub fn for_each_parallel(&self, visitor: impl Fn(EntityView<'_>) + Sync) {
        use rayon::prelude::*;

        struct WorkItem {
            archetype: Arc<Archetype>,
            shared_key: SharedValueKey,
            chunk: Arc<Chunk>,
            slot: usize,
            entity: EntityId,
        }

        let mut items: Vec<WorkItem> = Vec::new();
        self.archetypes.for_each_archetype(|mask, archetype| {
            if !self.matches_mask(mask) || !self.resolvable(archetype) {
                return;
            }
            archetype.for_each_group(|key, group| {
                if !self.shared_key_matches(archetype, key) {
                    return;
                }
                for chunk in group.snapshot().iter() {
                    let mut cursor = 0usize;
                    while let Some(slot) = chunk.next_occupied(cursor) {
                        if let Some(entity) = chunk.entity_at(slot) {
                            items.push(WorkItem {
                                archetype: archetype.clone(),
                                shared_key: key.clone(),
                                chunk: chunk.clone(),
                                slot,
                                entity,
                            });
                        }
                        cursor = slot + 1;
                    }
                }
            });
        });

        items.par_iter().for_each(|item| {
            visitor(EntityView {
                entity: item.entity,
                archetype: &item.archetype,
                chunk: &item.chunk,
                slot: item.slot,
                shared_key: &item.shared_key,
                managed_store: self.managed_store,
                shared_store: self.shared_store,
            });
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archetype_manager::ArchetypeManager;
    use crate::layout::{ComponentKind, FieldSpec, LayoutPolicy, PrimitiveKind};
    use crate::registry::{ComponentRegistry, ComponentTypeSpec};

    fn unmanaged(key: &str) -> ComponentTypeSpec {
        ComponentTypeSpec::new(key, ComponentKind::InstanceUnmanaged, LayoutPolicy::Sequential)
            .with_field(FieldSpec::primitive("x", PrimitiveKind::F32))
    }

    #[test]
    fn for_each_archetype_respects_with_without_masks() {
        let registry = ComponentRegistry::new();
        let pos = registry.register(unmanaged("Position")).unwrap();
        let frozen = registry
            .register(ComponentTypeSpec::new("Frozen", ComponentKind::InstanceUnmanaged, LayoutPolicy::Sequential))
            .unwrap();
        let manager = ArchetypeManager::new();
        let moving_mask = ComponentMask::from_ids([pos]);
        let frozen_mask = ComponentMask::from_ids([pos, frozen]);
        manager.get_or_create(&moving_mask, &registry, 16 * 1024).unwrap();
        manager.get_or_create(&frozen_mask, &registry, 16 * 1024).unwrap();

        let managed_store = ManagedObjectStore::new();
        let shared_store = SharedValueStore::new();
        let mut seen = Vec::new();
        QueryBuilder::new(&manager, &managed_store, &shared_store)
            .with(pos)
            .without(frozen)
            .for_each_archetype(|archetype| seen.push(archetype.mask().clone()));
        assert_eq!(seen, vec![moving_mask]);
    }

    #[test]
    fn count_matches_total_occupied_slots_across_chunks() {
        let registry = ComponentRegistry::new();
        let pos = registry.register(unmanaged("Position")).unwrap();
        let manager = ArchetypeManager::new();
        let mask = ComponentMask::from_ids([pos]);
        let archetype = manager.get_or_create(&mask, &registry, 16 * 1024).unwrap();
        let group = archetype.or_create_group(&SharedValueKey::empty(0, 0));
        group.add_entity(1);
        group.add_entity(2);
        group.add_entity(3);

        let managed_store = ManagedObjectStore::new();
        let shared_store = SharedValueStore::new();
        let count = QueryBuilder::new(&manager, &managed_store, &shared_store).with(pos).count();
        assert_eq!(count, 3);
    }

    #[test]
    fn fetch_of_absent_type_skips_archetype_entirely() {
        let registry = ComponentRegistry::new();
        let pos = registry.register(unmanaged("Position")).unwrap();
        let mesh = registry
            .register(ComponentTypeSpec::new("Mesh", ComponentKind::InstanceManaged, LayoutPolicy::Sequential))
            .unwrap();
        let manager = ArchetypeManager::new();
        let mask = ComponentMask::from_ids([pos]);
        let archetype = manager.get_or_create(&mask, &registry, 16 * 1024).unwrap();
        archetype.or_create_group(&SharedValueKey::empty(0, 0)).add_entity(1);

        let managed_store = ManagedObjectStore::new();
        let shared_store = SharedValueStore::new();
        let count = QueryBuilder::new(&manager, &managed_store, &shared_store)
            .with(pos)
            .fetch(mesh)
            .count();
        assert_eq!(count, 0);
    }

    #[test]
    fn shared_unmanaged_filter_restricts_to_matching_group() {
        let registry = ComponentRegistry::new();
        let team = registry
            .register(ComponentTypeSpec::new("Team", ComponentKind::SharedUnmanaged, LayoutPolicy::Sequential))
            .unwrap();
        let pos = registry.register(unmanaged("Position")).unwrap();
        let manager = ArchetypeManager::new();
        let mask = ComponentMask::from_ids([team, pos]);
        let archetype = manager.get_or_create(&mask, &registry, 16 * 1024).unwrap();
        let slot = archetype.shared_unmanaged_index(team).unwrap();
        let key_a = SharedValueKey::empty(0, 1).with_unmanaged(slot, 1);
        let key_b = SharedValueKey::empty(0, 1).with_unmanaged(slot, 2);
        archetype.or_create_group(&key_a).add_entity(1);
        archetype.or_create_group(&key_a).add_entity(2);
        archetype.or_create_group(&key_b).add_entity(3);

        let managed_store = ManagedObjectStore::new();
        let shared_store = SharedValueStore::new();
        let count = QueryBuilder::new(&manager, &managed_store, &shared_store)
            .with(team)
            .with(pos)
            .with_shared_unmanaged(team, 1)
            .count();
        assert_eq!(count, 2);
    }

    #[test]
    fn for_each_entity_exposes_component_bytes() {
        let registry = ComponentRegistry::new();
        let pos = registry.register(unmanaged("Position")).unwrap();
        let manager = ArchetypeManager::new();
        let mask = ComponentMask::from_ids([pos]);
        let archetype = manager.get_or_create(&mask, &registry, 16 * 1024).unwrap();
        let group = archetype.or_create_group(&SharedValueKey::empty(0, 0));
        let loc = group.add_entity(1);
        let chunk = group.chunk(loc.chunk_index).unwrap();
        chunk.set_column(0, loc.slot, &7.5f32.to_le_bytes()).unwrap();

        let managed_store = ManagedObjectStore::new();
        let shared_store = SharedValueStore::new();
        let mut seen = None;
        QueryBuilder::new(&manager, &managed_store, &shared_store)
            .with(pos)
            .fetch(pos)
            .for_each_entity(|view| {
                seen = view.component_bytes(pos).map(|b| f32::from_le_bytes(b.try_into().unwrap()));
            });
        assert_eq!(seen, Some(7.5));
    }
}
