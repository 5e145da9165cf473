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

//! `World`: the thin facade gluing the five core subsystems together.
//! `World` owns no storage of its own; every method here routes into the
//! registry, archetype manager, entity index, managed/shared stores, or the
//! structural engine and command buffer that sit on top of them.

use std::any::Any;
use std::hash::Hash;
use std::sync::Arc;

use crate::archetype_manager::ArchetypeManager;
use crate::command::{CommandBuffer, LaneWriter};
use crate::config::WorldConfig;
use crate::entity::{EntityAllocator, EntityId, EntityRecord};
use crate::entity_index::EntityIndex;
use crate::error::{EcsError, Result};
use crate::managed::{ManagedObjectStore, Ticket};
use crate::mask::ComponentMask;
use crate::query::QueryBuilder;
use crate::registry::{ComponentRegistry, ComponentTypeId};
use crate::shared_key::SharedValueKey;
use crate::shared_store::SharedValueStore;
use crate::structural::{self, BatchCallCounters, StructuralContext};

/// Owns one of each core subsystem. Multiple `World`s may coexist; nothing
/// here is global state.
pub struct World {
    registry: ComponentRegistry,
    archetypes: ArchetypeManager,
    entities: EntityIndex,
    managed: ManagedObjectStore,
    shared: SharedValueStore,
    allocator: EntityAllocator,
    commands: CommandBuffer,
    config: WorldConfig,
    batch_calls: BatchCallCounters,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    pub fn new() -> Self {
        Self::with_config(WorldConfig::default())
    }

    pub fn with_config(config: WorldConfig) -> Self {
        Self {
            registry: ComponentRegistry::new(),
            archetypes: ArchetypeManager::new(),
            entities: EntityIndex::new(),
            managed: ManagedObjectStore::new(),
            shared: SharedValueStore::new(),
            allocator: EntityAllocator::new(),
            commands: CommandBuffer::new(config.lane_byte_capacity),
            config,
            batch_calls: BatchCallCounters::default(),
        }
    }

    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn archetype_count(&self) -> usize {
        self.archetypes.len()
    }

    fn ctx(&self) -> StructuralContext<'_> {
        StructuralContext {
            registry: &self.registry,
            archetypes: &self.archetypes,
            entities: &self.entities,
            managed: &self.managed,
            shared: &self.shared,
            config: &self.config,
            batch_calls: &self.batch_calls,
        }
    }

    /// Number of batched `structural::add_components` calls made so far
    /// (command-buffer playback and any direct batched callers).
    pub fn add_components_batch_calls(&self) -> usize {
        self.batch_calls.add_components_calls()
    }

    /// Number of batched `structural::remove_components` calls made so far.
    pub fn remove_components_batch_calls(&self) -> usize {
        self.batch_calls.remove_components_calls()
    }

    /// Spawn a new entity carrying the given (already-registered) component
    /// types, each at its zero-initialized/unset default value.
    pub fn create_entity(&self, type_ids: &[ComponentTypeId]) -> Result<EntityId> {
        let entity_id = self.allocator.allocate();
        let mask = ComponentMask::from_ids(type_ids.iter().copied());
        let archetype = self.archetypes.get_or_create(&mask, &self.registry, self.config.chunk_byte_budget)?;
        let partition = archetype.partition();
        let key = SharedValueKey::empty(partition.shared_managed.len(), partition.shared_unmanaged.len());
        let group = archetype.or_create_group(&key);
        let location = group.add_entity(entity_id);
        self.entities
            .insert(entity_id, EntityRecord::new(mask, key, location.chunk_index, location.slot));
        Ok(entity_id)
    }

    /// Add `type_id` to `entity`'s mask and write its initial byte payload.
    /// No-op on the mask side if the entity already carries `type_id`, but
    /// `bytes` is still written in that case.
    pub fn add_component(&self, entity: EntityId, type_id: ComponentTypeId, bytes: &[u8]) -> Result<()> {
        let record = structural::add_component(&self.ctx(), entity, type_id)?;
        self.write_bytes(&record, type_id, bytes)
    }

    pub fn add_managed_component<T: Any + Send + Sync>(&self, entity: EntityId, type_id: ComponentTypeId, value: T) -> Result<()> {
        let record = structural::add_component(&self.ctx(), entity, type_id)?;
        let ticket = self.managed.store(value);
        self.write_managed_ticket(&record, type_id, ticket)
    }

    pub fn remove_component(&self, entity: EntityId, type_id: ComponentTypeId) -> Result<()> {
        structural::remove_component(&self.ctx(), entity, type_id).map(|_| ())
    }

    /// Replace an entity's managed-instance value for `type_id`, releasing
    /// the previous ticket. Errors if the entity does not carry `type_id`.
    pub fn set_managed_component<T: Any + Send + Sync>(&self, entity: EntityId, type_id: ComponentTypeId, value: T) -> Result<()> {
        let record = self.entities.get(entity).map(|r| r.clone()).ok_or(EcsError::EntityNotFound)?;
        if !record.archetype_mask.has(type_id) {
            return Err(EcsError::BadArgument(format!("entity does not carry managed type {type_id}")));
        }
        let archetype = self.archetypes.get_or_create(&record.archetype_mask, &self.registry, self.config.chunk_byte_budget)?;
        let managed_index = archetype.managed_type_index(type_id).ok_or(EcsError::UnregisteredType)?;
        let chunk = self.live_chunk(&archetype, &record)?;
        let old_ticket = chunk.get_managed_ticket(managed_index, record.slot)?;
        let new_ticket = self.managed.store(value);
        chunk.set_managed_ticket(managed_index, record.slot, new_ticket as i32)?;
        if old_ticket >= 0 {
            self.managed.release(old_ticket as u32);
        }
        Ok(())
    }

    /// Intern `value` and relocate `entity` to the chunk group keyed by it.
    /// A no-op if `entity` already holds exactly this value for `type_id`:
    /// interning unconditionally here would increment the refcount for a
    /// value the entity already references, leaving it permanently
    /// over-counted since the move itself sees no change to release.
    pub fn set_shared_managed<T: Any + Send + Sync + Eq + Hash>(&self, entity: EntityId, type_id: ComponentTypeId, value: T) -> Result<()> {
        let record = self.entities.get(entity).map(|r| r.clone()).ok_or(EcsError::EntityNotFound)?;
        if !record.archetype_mask.has(type_id) {
            return Err(EcsError::BadArgument(format!("entity does not carry shared-managed type {type_id}")));
        }
        let archetype = self.archetypes.get_or_create(&record.archetype_mask, &self.registry, self.config.chunk_byte_budget)?;
        let position = archetype.shared_managed_index(type_id).ok_or(EcsError::UnregisteredType)?;
        let current = record.shared_key.managed_shared_indices.get(position).copied().unwrap_or(-1);
        if current >= 0 && self.shared.find(&value) == current {
            return Ok(());
        }
        let index = self.shared.get_or_add(value);
        structural::set_shared_managed(&self.ctx(), entity, type_id, index).map(|_| ())
    }

    pub fn set_shared_unmanaged(&self, entity: EntityId, type_id: ComponentTypeId, value: i64) -> Result<()> {
        structural::set_shared_unmanaged(&self.ctx(), entity, type_id, value).map(|_| ())
    }

    pub fn destroy_entity(&self, entity: EntityId) -> Result<()> {
        structural::destroy_entity(&self.ctx(), entity, &self.allocator)
    }

    pub fn has_component(&self, entity: EntityId, type_id: ComponentTypeId) -> bool {
        self.entities.get(entity).map(|r| r.archetype_mask.has(type_id)).unwrap_or(false)
    }

    pub fn get_component(&self, entity: EntityId, type_id: ComponentTypeId) -> Option<Vec<u8>> {
        let record = self.entities.get(entity)?.clone();
        let archetype = self.archetypes.get(&record.archetype_mask)?;
        let column = archetype.column_index(type_id)?;
        let chunk = self.live_chunk(&archetype, &record).ok()?;
        chunk.get_column_slice(column, record.slot).ok().map(|bytes| bytes.to_vec())
    }

    pub fn get_managed<T: Any + Send + Sync + Clone>(&self, entity: EntityId, type_id: ComponentTypeId) -> Option<Arc<T>> {
        let record = self.entities.get(entity)?.clone();
        let archetype = self.archetypes.get(&record.archetype_mask)?;
        let managed_index = archetype.managed_type_index(type_id)?;
        let chunk = self.live_chunk(&archetype, &record).ok()?;
        let ticket = chunk.get_managed_ticket(managed_index, record.slot).ok()?;
        if ticket < 0 {
            return None;
        }
        self.managed.get(ticket as u32)
    }

    pub fn query(&self) -> QueryBuilder<'_> {
        QueryBuilder::new(&self.archetypes, &self.managed, &self.shared)
    }

    /// Look up `value`'s shared-value index without interning it. Returns
    /// `-1` if no entity currently references an equal value.
    pub fn find_shared_managed_index<T: Any + Send + Sync + Eq + Hash>(&self, value: &T) -> i32 {
        self.shared.find(value)
    }

    pub fn shared_refcount(&self, index: i32) -> u32 {
        self.shared.refcount(index)
    }

    /// Clear any previously recorded but unplayed command-buffer lanes.
    pub fn begin_commands(&self) {
        self.commands.begin();
    }

    pub fn command_writer(&self) -> LaneWriter {
        self.commands.writer()
    }

    pub fn finish_writer(&self, writer: LaneWriter) {
        self.commands.finish(writer);
    }

    /// Apply every recorded command in deterministic order. Must not be
    /// called concurrently with itself.
    pub fn playback_commands(&self) {
        self.commands.playback(&self.ctx(), &self.allocator);
    }

    fn live_chunk(&self, archetype: &Arc<crate::archetype::Archetype>, record: &EntityRecord) -> Result<Arc<crate::chunk::Chunk>> {
        let group = archetype
            .group(&record.shared_key)
            .ok_or_else(|| EcsError::InvariantViolation("missing chunk group for a live entity".into()))?;
        group
            .chunk(record.chunk_index)
            .ok_or_else(|| EcsError::InvariantViolation("missing chunk for a live entity".into()))
    }

    fn write_bytes(&self, record: &EntityRecord, type_id: ComponentTypeId, bytes: &[u8]) -> Result<()> {
        let archetype = self.archetypes.get_or_create(&record.archetype_mask, &self.registry, self.config.chunk_byte_budget)?;
        let column = archetype.column_index(type_id).ok_or(EcsError::UnregisteredType)?;
        let chunk = self.live_chunk(&archetype, record)?;
        chunk.set_column(column, record.slot, bytes)
    }

    fn write_managed_ticket(&self, record: &EntityRecord, type_id: ComponentTypeId, ticket: Ticket) -> Result<()> {
        let archetype = self.archetypes.get_or_create(&record.archetype_mask, &self.registry, self.config.chunk_byte_budget)?;
        let managed_index = archetype.managed_type_index(type_id).ok_or(EcsError::UnregisteredType)?;
        let chunk = self.live_chunk(&archetype, record)?;
        chunk.set_managed_ticket(managed_index, record.slot, ticket as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{ComponentKind, FieldSpec, LayoutPolicy, PrimitiveKind};
    use crate::registry::ComponentTypeSpec;

    fn position_type(world: &World) -> ComponentTypeId {
        world
            .registry()
            .register(
                ComponentTypeSpec::new("Position", ComponentKind::InstanceUnmanaged, LayoutPolicy::Sequential)
                    .with_field(FieldSpec::primitive("x", PrimitiveKind::F32)),
            )
            .unwrap()
    }

    #[test]
    fn create_entity_then_add_and_read_component_bytes() {
        let world = World::new();
        let pos = position_type(&world);
        let entity = world.create_entity(&[]).unwrap();
        assert!(!world.has_component(entity, pos));

        world.add_component(entity, pos, &3.5f32.to_le_bytes()).unwrap();
        assert!(world.has_component(entity, pos));
        let bytes = world.get_component(entity, pos).unwrap();
        assert_eq!(f32::from_le_bytes(bytes.try_into().unwrap()), 3.5);
    }

    #[test]
    fn add_managed_component_then_get_and_remove() {
        let world = World::new();
        let mesh = world
            .registry()
            .register(ComponentTypeSpec::new("Mesh", ComponentKind::InstanceManaged, LayoutPolicy::Sequential))
            .unwrap();
        let entity = world.create_entity(&[]).unwrap();
        world.add_managed_component(entity, mesh, String::from("cube.mesh")).unwrap();
        let value = world.get_managed::<String>(entity, mesh).unwrap();
        assert_eq!(*value, "cube.mesh");

        world.remove_component(entity, mesh).unwrap();
        assert!(!world.has_component(entity, mesh));
        assert!(world.get_managed::<String>(entity, mesh).is_none());
    }

    #[test]
    fn destroy_entity_removes_it_from_queries() {
        let world = World::new();
        let pos = position_type(&world);
        let entity = world.create_entity(&[pos]).unwrap();
        assert_eq!(world.query().with(pos).count(), 1);
        world.destroy_entity(entity).unwrap();
        assert_eq!(world.query().with(pos).count(), 0);
    }

    #[test]
    fn command_buffer_playback_applies_recorded_add() {
        let world = World::new();
        let pos = position_type(&world);
        let entity = world.create_entity(&[]).unwrap();

        world.begin_commands();
        let mut writer = world.command_writer();
        writer.add_component(entity, pos);
        world.finish_writer(writer);
        world.playback_commands();

        assert!(world.has_component(entity, pos));
    }

    #[test]
    fn set_shared_managed_groups_entities_by_value() {
        let world = World::new();
        let team = world
            .registry()
            .register(ComponentTypeSpec::new("Team", ComponentKind::SharedManaged, LayoutPolicy::Sequential))
            .unwrap();
        let a = world.create_entity(&[team]).unwrap();
        let b = world.create_entity(&[team]).unwrap();
        world.set_shared_managed(a, team, String::from("red")).unwrap();
        world.set_shared_managed(b, team, String::from("red")).unwrap();
        assert_eq!(world.query().with(team).count(), 2);
    }
}
