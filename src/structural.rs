//! Structural Engine: `move_entity` relocates an entity from its current
//! archetype/shared-value slot to a new one, copying over the columns and
//! tickets that survive the transition.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::archetype::Archetype;
use crate::archetype_manager::ArchetypeManager;
use crate::chunk_group::{ChunkGroup, ChunkLocation};
use crate::config::WorldConfig;
use crate::entity::{EntityId, EntityRecord};
use crate::entity_index::EntityIndex;
use crate::managed::ManagedObjectStore;
use crate::mask::ComponentMask;
use crate::registry::ComponentRegistry;
use crate::shared_key::SharedValueKey;
use crate::shared_store::SharedValueStore;

/// Call-arity counters for the batched entry points (`add_components`,
/// `remove_components`), incremented once per call regardless of how many
/// entities the batch covers or how many archetype boundaries it crosses
/// internally. Lets tests assert a command-buffer playback collapsed N
/// entities into a single structural call instead of looping N times.
#[derive(Default)]
pub struct BatchCallCounters {
    add_components: AtomicUsize,
    remove_components: AtomicUsize,
}

impl BatchCallCounters {
    pub fn add_components_calls(&self) -> usize {
        self.add_components.load(Ordering::Relaxed)
    }

    pub fn remove_components_calls(&self) -> usize {
        self.remove_components.load(Ordering::Relaxed)
    }
}

/// Everything `move_entity` needs reference access to. Grouped into one
/// struct so call sites (the `World` facade, command-buffer playback) don't
/// have to thread five separate borrows through every call.
pub struct StructuralContext<'a> {
    pub registry: &'a ComponentRegistry,
    pub archetypes: &'a ArchetypeManager,
    pub entities: &'a EntityIndex,
    pub managed: &'a ManagedObjectStore,
    pub shared: &'a SharedValueStore,
    pub config: &'a WorldConfig,
    pub batch_calls: &'a BatchCallCounters,
}

fn lock_ordered<'g>(a: &'g Arc<ChunkGroup>, b: &'g Arc<ChunkGroup>) -> (parking_lot::MutexGuard<'g, ()>, parking_lot::MutexGuard<'g, ()>) {
    if a.identity() <= b.identity() {
        let ga = a.lock_for_move();
        let gb = b.lock_for_move();
        (ga, gb)
    } else {
        let gb = b.lock_for_move();
        let ga = a.lock_for_move();
        (ga, gb)
    }
}

/// Move `entity_id` from its current archetype/shared-key into `new_mask` /
/// `new_shared_key`. The caller is responsible for having already interned
/// (or referenced) every shared-managed value present in `new_shared_key`;
/// `move_entity` only releases the indices that are no longer referenced.
pub fn move_entity(
    ctx: &StructuralContext<'_>,
    entity_id: EntityId,
    old_record: &EntityRecord,
    new_mask: ComponentMask,
    new_shared_key: SharedValueKey,
) -> crate::error::Result<EntityRecord> {
    let new_archetype = ctx
        .archetypes
        .get_or_create(&new_mask, ctx.registry, ctx.config.chunk_byte_budget)?;
    let new_group = new_archetype.or_create_group(&new_shared_key);

    let old_archetype = ctx
        .archetypes
        .get_or_create(&old_record.archetype_mask, ctx.registry, ctx.config.chunk_byte_budget)?;
    let old_group = old_archetype.group(&old_record.shared_key);

    let same_group = old_group.as_ref().is_some_and(|g| Arc::ptr_eq(g, &new_group));

    let new_location = match &old_group {
        Some(old) if !same_group => {
            let _guards = lock_ordered(old, &new_group);
            perform_move(
                ctx,
                entity_id,
                old_record,
                &old_archetype,
                old,
                &new_archetype,
                &new_group,
            )
        }
        _ => {
            let _guard = new_group.lock_for_move();
            perform_move_same_or_no_old(ctx, entity_id, old_record, &old_archetype, old_group.as_ref(), &new_archetype, &new_group)
        }
    };

    release_stale_shared_managed(ctx, &old_archetype, &old_record.shared_key, &new_archetype, &new_shared_key);

    let new_record = EntityRecord::new(new_mask, new_shared_key, new_location.chunk_index, new_location.slot);
    ctx.entities.replace(entity_id, new_record.clone());
    Ok(new_record)
}

/// Indices this transition stops referencing: a shared-managed type dropped
/// entirely by the mask change, or one whose value changed. One release per
/// entity that held the index is still required to keep its refcount equal
/// to the number of referencing entities.
fn stale_shared_managed(old_archetype: &Arc<Archetype>, old_key: &SharedValueKey, new_archetype: &Arc<Archetype>, new_key: &SharedValueKey) -> Vec<i32> {
    let mut stale = Vec::new();
    for (old_pos, &type_id) in old_archetype.partition().shared_managed.iter().enumerate() {
        let old_value = old_key.managed_shared_indices.get(old_pos).copied().unwrap_or(-1);
        if old_value < 0 {
            continue;
        }
        let kept = new_archetype
            .shared_managed_index(type_id)
            .and_then(|new_pos| new_key.managed_shared_indices.get(new_pos).copied())
            == Some(old_value);
        if !kept {
            stale.push(old_value);
        }
    }
    stale
}

/// Release every shared-managed index `entity_id` no longer references
/// after moving from `old_key` to `new_key`.
fn release_stale_shared_managed(
    ctx: &StructuralContext<'_>,
    old_archetype: &Arc<Archetype>,
    old_key: &SharedValueKey,
    new_archetype: &Arc<Archetype>,
    new_key: &SharedValueKey,
) {
    for value in stale_shared_managed(old_archetype, old_key, new_archetype, new_key) {
        ctx.shared.release(value);
    }
}

/// Build a correctly-shaped `SharedValueKey` for `new_archetype`, carrying
/// over values for shared types present in both archetypes (matched by
/// type id, not position — the two archetypes partition their shared types
/// independently).
pub fn rebuild_shared_key(old_archetype: &Arc<Archetype>, old_key: &SharedValueKey, new_archetype: &Arc<Archetype>) -> SharedValueKey {
    let partition = new_archetype.partition();
    let mut new_key = SharedValueKey::empty(partition.shared_managed.len(), partition.shared_unmanaged.len());

    for (new_pos, &type_id) in partition.shared_managed.iter().enumerate() {
        if let Some(old_pos) = old_archetype.shared_managed_index(type_id) {
            if let Some(&value) = old_key.managed_shared_indices.get(old_pos) {
                new_key.managed_shared_indices[new_pos] = value;
            }
        }
    }
    for (new_pos, &type_id) in partition.shared_unmanaged.iter().enumerate() {
        if let Some(old_pos) = old_archetype.shared_unmanaged_index(type_id) {
            if let Some(&value) = old_key.unmanaged_shared_values.get(old_pos) {
                new_key.unmanaged_shared_values[new_pos] = value;
            }
        }
    }
    new_key
}

/// Add `type_id` to `entity_id`'s mask. A no-op (returns the current record)
/// if the entity already carries the type.
pub fn add_component(ctx: &StructuralContext<'_>, entity_id: EntityId, type_id: crate::registry::ComponentTypeId) -> crate::error::Result<EntityRecord> {
    let record = ctx
        .entities
        .get(entity_id)
        .map(|r| r.clone())
        .ok_or(crate::error::EcsError::EntityNotFound)?;
    if record.archetype_mask.has(type_id) {
        return Ok(record);
    }
    let old_archetype = ctx
        .archetypes
        .get_or_create(&record.archetype_mask, ctx.registry, ctx.config.chunk_byte_budget)?;
    let new_mask = record.archetype_mask.clone().with(type_id);
    let new_archetype = ctx.archetypes.get_or_create(&new_mask, ctx.registry, ctx.config.chunk_byte_budget)?;
    let new_key = rebuild_shared_key(&old_archetype, &record.shared_key, &new_archetype);
    move_entity(ctx, entity_id, &record, new_mask, new_key)
}

/// Remove `type_id` from `entity_id`'s mask, releasing any managed ticket
/// or shared-managed reference it held for that type. A no-op if the entity
/// does not carry the type.
pub fn remove_component(ctx: &StructuralContext<'_>, entity_id: EntityId, type_id: crate::registry::ComponentTypeId) -> crate::error::Result<EntityRecord> {
    let record = ctx
        .entities
        .get(entity_id)
        .map(|r| r.clone())
        .ok_or(crate::error::EcsError::EntityNotFound)?;
    if !record.archetype_mask.has(type_id) {
        return Ok(record);
    }
    let old_archetype = ctx
        .archetypes
        .get_or_create(&record.archetype_mask, ctx.registry, ctx.config.chunk_byte_budget)?;
    let new_mask = record.archetype_mask.clone().without(type_id);
    let new_archetype = ctx.archetypes.get_or_create(&new_mask, ctx.registry, ctx.config.chunk_byte_budget)?;
    let new_key = rebuild_shared_key(&old_archetype, &record.shared_key, &new_archetype);
    move_entity(ctx, entity_id, &record, new_mask, new_key)
}

/// Apply a combined add/remove set in a single structural transition.
pub fn mutate_components(
    ctx: &StructuralContext<'_>,
    entity_id: EntityId,
    add_ids: &[crate::registry::ComponentTypeId],
    remove_ids: &[crate::registry::ComponentTypeId],
) -> crate::error::Result<EntityRecord> {
    let record = ctx
        .entities
        .get(entity_id)
        .map(|r| r.clone())
        .ok_or(crate::error::EcsError::EntityNotFound)?;
    let old_archetype = ctx
        .archetypes
        .get_or_create(&record.archetype_mask, ctx.registry, ctx.config.chunk_byte_budget)?;
    let mut new_mask = record.archetype_mask.clone();
    for &id in add_ids {
        new_mask.set(id);
    }
    for &id in remove_ids {
        new_mask.clear(id);
    }
    let new_archetype = ctx.archetypes.get_or_create(&new_mask, ctx.registry, ctx.config.chunk_byte_budget)?;
    let new_key = rebuild_shared_key(&old_archetype, &record.shared_key, &new_archetype);
    move_entity(ctx, entity_id, &record, new_mask, new_key)
}

/// Set a shared-managed value already interned as `shared_index` on
/// `entity_id`'s existing `type_id` slot. The mask is unchanged; this only
/// relocates the entity to the `ChunkGroup` keyed by the new value.
pub fn set_shared_managed(
    ctx: &StructuralContext<'_>,
    entity_id: EntityId,
    type_id: crate::registry::ComponentTypeId,
    shared_index: i32,
) -> crate::error::Result<EntityRecord> {
    let record = ctx
        .entities
        .get(entity_id)
        .map(|r| r.clone())
        .ok_or(crate::error::EcsError::EntityNotFound)?;
    if !record.archetype_mask.has(type_id) {
        return Err(crate::error::EcsError::BadArgument(format!(
            "entity does not carry shared-managed type {type_id}"
        )));
    }
    let archetype = ctx
        .archetypes
        .get_or_create(&record.archetype_mask, ctx.registry, ctx.config.chunk_byte_budget)?;
    let position = archetype
        .shared_managed_index(type_id)
        .ok_or(crate::error::EcsError::UnregisteredType)?;
    let mut new_key = record.shared_key.clone();
    new_key.managed_shared_indices[position] = shared_index;
    move_entity(ctx, entity_id, &record, record.archetype_mask.clone(), new_key)
}

/// Set a shared-unmanaged `value` on `entity_id`'s existing `type_id` slot.
/// The mask is unchanged; this only relocates the entity to the
/// `ChunkGroup` keyed by the new value. No refcounting applies since
/// shared-unmanaged values are raw payloads, not interned.
pub fn set_shared_unmanaged(
    ctx: &StructuralContext<'_>,
    entity_id: EntityId,
    type_id: crate::registry::ComponentTypeId,
    value: i64,
) -> crate::error::Result<EntityRecord> {
    let record = ctx
        .entities
        .get(entity_id)
        .map(|r| r.clone())
        .ok_or(crate::error::EcsError::EntityNotFound)?;
    if !record.archetype_mask.has(type_id) {
        return Err(crate::error::EcsError::BadArgument(format!(
            "entity does not carry shared-unmanaged type {type_id}"
        )));
    }
    let archetype = ctx
        .archetypes
        .get_or_create(&record.archetype_mask, ctx.registry, ctx.config.chunk_byte_budget)?;
    let position = archetype
        .shared_unmanaged_index(type_id)
        .ok_or(crate::error::EcsError::UnregisteredType)?;
    let mut new_key = record.shared_key.clone();
    new_key.unmanaged_shared_values[position] = value;
    move_entity(ctx, entity_id, &record, record.archetype_mask.clone(), new_key)
}

/// Remove `entity_id` entirely: releases every managed ticket and
/// shared-managed reference it holds, frees its chunk slot, and recycles
/// its id.
pub fn destroy_entity(ctx: &StructuralContext<'_>, entity_id: EntityId, allocator: &crate::entity::EntityAllocator) -> crate::error::Result<()> {
    let Some(record) = ctx.entities.remove(entity_id) else {
        return Err(crate::error::EcsError::EntityNotFound);
    };
    let archetype = ctx
        .archetypes
        .get_or_create(&record.archetype_mask, ctx.registry, ctx.config.chunk_byte_budget)?;
    if let Some(group) = archetype.group(&record.shared_key) {
        if let Some(chunk) = group.chunk(record.chunk_index) {
            for (mi, _) in archetype.partition().managed.iter().enumerate() {
                let ticket = chunk.get_managed_ticket(mi, record.slot).unwrap_or(-1);
                if ticket >= 0 {
                    ctx.managed.release(ticket as u32);
                }
            }
        }
        group.remove_entity(ChunkLocation {
            chunk_index: record.chunk_index,
            slot: record.slot,
        });
    }
    for (pos, &value) in record.shared_key.managed_shared_indices.iter().enumerate() {
        let _ = pos;
        if value >= 0 {
            ctx.shared.release(value);
        }
    }
    allocator.recycle(entity_id);
    Ok(())
}

fn perform_move(
    ctx: &StructuralContext<'_>,
    entity_id: EntityId,
    old_record: &EntityRecord,
    old_archetype: &Arc<Archetype>,
    old_group: &Arc<ChunkGroup>,
    new_archetype: &Arc<Archetype>,
    new_group: &Arc<ChunkGroup>,
) -> ChunkLocation {
    let old_chunk = old_group.chunk(old_record.chunk_index);
    let new_location = new_group.add_entity(entity_id);
    let new_chunk = new_group.chunk(new_location.chunk_index).expect("just allocated");

    if let Some(old_chunk) = &old_chunk {
        copy_surviving_state(
            ctx,
            old_record.slot,
            old_chunk,
            old_archetype,
            new_location.slot,
            &new_chunk,
            new_archetype,
        );
        old_group.remove_entity(ChunkLocation {
            chunk_index: old_record.chunk_index,
            slot: old_record.slot,
        });
    }

    new_location
}

fn perform_move_same_or_no_old(
    ctx: &StructuralContext<'_>,
    entity_id: EntityId,
    old_record: &EntityRecord,
    old_archetype: &Arc<Archetype>,
    old_group: Option<&Arc<ChunkGroup>>,
    new_archetype: &Arc<Archetype>,
    new_group: &Arc<ChunkGroup>,
) -> ChunkLocation {
    let old_chunk = old_group.and_then(|g| g.chunk(old_record.chunk_index));
    let new_location = new_group.add_entity(entity_id);
    let new_chunk = new_group.chunk(new_location.chunk_index).expect("just allocated");

    if let (Some(group), Some(old_chunk)) = (old_group, &old_chunk) {
        copy_surviving_state(
            ctx,
            old_record.slot,
            old_chunk,
            old_archetype,
            new_location.slot,
            &new_chunk,
            new_archetype,
        );
        group.remove_entity(ChunkLocation {
            chunk_index: old_record.chunk_index,
            slot: old_record.slot,
        });
    }

    new_location
}

/// Precomputed column/ticket index correspondence between two archetypes,
/// hoisted out of the per-entity copy loop so a batched move computes it
/// once per archetype-boundary instead of once per entity.
struct CopyPlan {
    unmanaged: Vec<(usize, usize)>,
    managed_kept: Vec<(usize, usize)>,
    managed_dropped: Vec<usize>,
}

fn build_copy_plan(old_archetype: &Archetype, new_archetype: &Archetype) -> CopyPlan {
    let mut unmanaged = Vec::new();
    for &type_id in &old_archetype.partition().unmanaged {
        if let Some(new_col) = new_archetype.column_index(type_id) {
            let old_col = old_archetype.column_index(type_id).expect("partition is self-consistent");
            unmanaged.push((old_col, new_col));
        }
    }

    let mut managed_kept = Vec::new();
    let mut managed_dropped = Vec::new();
    for &type_id in &old_archetype.partition().managed {
        let old_mi = old_archetype.managed_type_index(type_id).expect("partition is self-consistent");
        match new_archetype.managed_type_index(type_id) {
            Some(new_mi) => managed_kept.push((old_mi, new_mi)),
            None => managed_dropped.push(old_mi),
        }
    }

    CopyPlan {
        unmanaged,
        managed_kept,
        managed_dropped,
    }
}

fn apply_copy_plan(
    ctx: &StructuralContext<'_>,
    plan: &CopyPlan,
    old_slot: usize,
    old_chunk: &crate::chunk::Chunk,
    new_slot: usize,
    new_chunk: &crate::chunk::Chunk,
) {
    for &(old_col, new_col) in &plan.unmanaged {
        if let Ok(bytes) = old_chunk.get_column_slice(old_col, old_slot) {
            let bytes = bytes.to_vec();
            let _ = new_chunk.set_column(new_col, new_slot, &bytes);
        }
    }

    for &(old_mi, new_mi) in &plan.managed_kept {
        let ticket = old_chunk.get_managed_ticket(old_mi, old_slot).unwrap_or(-1);
        let _ = new_chunk.set_managed_ticket(new_mi, new_slot, ticket);
    }

    for &old_mi in &plan.managed_dropped {
        let ticket = old_chunk.get_managed_ticket(old_mi, old_slot).unwrap_or(-1);
        if ticket >= 0 {
            ctx.managed.release(ticket as u32);
        }
    }
}

fn copy_surviving_state(
    ctx: &StructuralContext<'_>,
    old_slot: usize,
    old_chunk: &Arc<crate::chunk::Chunk>,
    old_archetype: &Arc<Archetype>,
    new_slot: usize,
    new_chunk: &Arc<crate::chunk::Chunk>,
    new_archetype: &Arc<Archetype>,
) {
    let plan = build_copy_plan(old_archetype, new_archetype);
    apply_copy_plan(ctx, &plan, old_slot, old_chunk, new_slot, new_chunk);
}

/// Bucket key a live entity is grouped by before a batched structural move:
/// entities sharing one key go through the exact same archetype transition
/// and so can be allocated, copied, and freed as one group.
type BatchBucketKey = (ComponentMask, SharedValueKey);

/// Buckets `entity_ids` by their current `(archetype mask, shared key)`,
/// applies `compute_new_mask` once per bucket (every member of a bucket
/// shares the same starting state, so they share the same outcome), and
/// batch-moves each bucket whose mask actually changes. Returns one result
/// per input entity, in the same order; entities missing from the entity
/// index come back `EntityNotFound`, and entities `compute_new_mask` maps
/// to `None` come back unchanged with no structural move performed.
fn batched_transition(
    ctx: &StructuralContext<'_>,
    entity_ids: &[EntityId],
    mut compute_new_mask: impl FnMut(&ComponentMask) -> Option<ComponentMask>,
) -> Vec<crate::error::Result<EntityRecord>> {
    let mut results: Vec<Option<crate::error::Result<EntityRecord>>> = (0..entity_ids.len()).map(|_| None).collect();
    let mut buckets: HashMap<BatchBucketKey, Vec<usize>> = HashMap::new();

    for (i, &entity_id) in entity_ids.iter().enumerate() {
        match ctx.entities.get(entity_id).map(|r| r.clone()) {
            None => results[i] = Some(Err(crate::error::EcsError::EntityNotFound)),
            Some(record) => buckets
                .entry((record.archetype_mask.clone(), record.shared_key.clone()))
                .or_default()
                .push(i),
        }
    }

    for ((old_mask, old_key), indices) in buckets {
        let Some(new_mask) = compute_new_mask(&old_mask) else {
            for &i in &indices {
                match ctx.entities.get(entity_ids[i]).map(|r| r.clone()) {
                    Some(record) => results[i] = Some(Ok(record)),
                    None => results[i] = Some(Err(crate::error::EcsError::EntityNotFound)),
                }
            }
            continue;
        };

        let outcome = move_batch_bucket(ctx, &entity_ids, &indices, &old_mask, &old_key, new_mask);
        match outcome {
            Ok(new_records) => {
                for (&i, record) in indices.iter().zip(new_records) {
                    results[i] = Some(Ok(record));
                }
            }
            Err(err) => {
                for &i in &indices {
                    results[i] = Some(Err(err.clone()));
                }
            }
        }
    }

    results.into_iter().map(|r| r.expect("every index assigned exactly once")).collect()
}

fn move_batch_bucket(
    ctx: &StructuralContext<'_>,
    entity_ids: &[EntityId],
    indices: &[usize],
    old_mask: &ComponentMask,
    old_key: &SharedValueKey,
    new_mask: ComponentMask,
) -> crate::error::Result<Vec<EntityRecord>> {
    let old_archetype = ctx.archetypes.get_or_create(old_mask, ctx.registry, ctx.config.chunk_byte_budget)?;
    let new_archetype = ctx.archetypes.get_or_create(&new_mask, ctx.registry, ctx.config.chunk_byte_budget)?;
    let new_key = rebuild_shared_key(&old_archetype, old_key, &new_archetype);

    let batch_entities: Vec<EntityId> = indices.iter().map(|&i| entity_ids[i]).collect();
    let batch_old_locations: Vec<ChunkLocation> = indices
        .iter()
        .map(|&i| {
            let record = ctx.entities.get(entity_ids[i]).map(|r| r.clone()).expect("bucketed from a live record");
            ChunkLocation {
                chunk_index: record.chunk_index,
                slot: record.slot,
            }
        })
        .collect();

    Ok(move_entities_batch(
        ctx,
        &batch_entities,
        &batch_old_locations,
        &old_archetype,
        old_key,
        &new_archetype,
        &new_key,
        new_mask,
    ))
}

/// Batched counterpart to `move_entity`: every entity in `entity_ids` shares
/// the same starting archetype/shared-key (and so the same destination
/// group), letting the whole group allocate its new slots, copy surviving
/// state, and free its old slots in three calls instead of looping
/// `move_entity` once per entity.
#[allow(clippy::too_many_arguments)]
fn move_entities_batch(
    ctx: &StructuralContext<'_>,
    entity_ids: &[EntityId],
    old_locations: &[ChunkLocation],
    old_archetype: &Arc<Archetype>,
    old_key: &SharedValueKey,
    new_archetype: &Arc<Archetype>,
    new_key: &SharedValueKey,
    new_mask: ComponentMask,
) -> Vec<EntityRecord> {
    let new_group = new_archetype.or_create_group(new_key);
    let old_group = old_archetype.group(old_key);
    let same_group = old_group.as_ref().is_some_and(|g| Arc::ptr_eq(g, &new_group));

    let new_locations = match &old_group {
        Some(old) if !same_group => {
            let _guards = lock_ordered(old, &new_group);
            perform_batch_move(old_archetype, Some(old), new_archetype, &new_group, ctx, entity_ids, old_locations)
        }
        _ => {
            let _guard = new_group.lock_for_move();
            perform_batch_move(
                old_archetype,
                old_group.as_ref(),
                new_archetype,
                &new_group,
                ctx,
                entity_ids,
                old_locations,
            )
        }
    };

    let stale = stale_shared_managed(old_archetype, old_key, new_archetype, new_key);

    let mut new_records = Vec::with_capacity(entity_ids.len());
    for (&entity_id, location) in entity_ids.iter().zip(&new_locations) {
        for &value in &stale {
            ctx.shared.release(value);
        }
        let new_record = EntityRecord::new(new_mask.clone(), new_key.clone(), location.chunk_index, location.slot);
        ctx.entities.replace(entity_id, new_record.clone());
        new_records.push(new_record);
    }
    new_records
}

#[allow(clippy::too_many_arguments)]
fn perform_batch_move(
    old_archetype: &Arc<Archetype>,
    old_group: Option<&Arc<ChunkGroup>>,
    new_archetype: &Arc<Archetype>,
    new_group: &Arc<ChunkGroup>,
    ctx: &StructuralContext<'_>,
    entity_ids: &[EntityId],
    old_locations: &[ChunkLocation],
) -> Vec<ChunkLocation> {
    let new_locations = new_group.add_entities(entity_ids);

    if let Some(group) = old_group {
        let plan = build_copy_plan(old_archetype, new_archetype);
        for (old_location, new_location) in old_locations.iter().zip(&new_locations) {
            if let Some(old_chunk) = group.chunk(old_location.chunk_index) {
                let new_chunk = new_group.chunk(new_location.chunk_index).expect("just allocated");
                apply_copy_plan(ctx, &plan, old_location.slot, &old_chunk, new_location.slot, &new_chunk);
            }
        }
        group.remove_entities(old_locations);
    }

    new_locations
}

/// Add `type_id` to every entity in `entity_ids` as one batched structural
/// move. Entities already carrying `type_id`, or missing from the entity
/// index, are left untouched (returned as-is / `EntityNotFound`).
pub fn add_components(
    ctx: &StructuralContext<'_>,
    entity_ids: &[EntityId],
    type_id: crate::registry::ComponentTypeId,
) -> Vec<crate::error::Result<EntityRecord>> {
    ctx.batch_calls.add_components.fetch_add(1, Ordering::Relaxed);
    batched_transition(ctx, entity_ids, |old_mask| {
        if old_mask.has(type_id) {
            None
        } else {
            Some(old_mask.clone().with(type_id))
        }
    })
}

/// Remove `type_id` from every entity in `entity_ids` as one batched
/// structural move. Entities that don't carry `type_id`, or are missing
/// from the entity index, are left untouched.
pub fn remove_components(
    ctx: &StructuralContext<'_>,
    entity_ids: &[EntityId],
    type_id: crate::registry::ComponentTypeId,
) -> Vec<crate::error::Result<EntityRecord>> {
    ctx.batch_calls.remove_components.fetch_add(1, Ordering::Relaxed);
    batched_transition(ctx, entity_ids, |old_mask| {
        if !old_mask.has(type_id) {
            None
        } else {
            Some(old_mask.clone().without(type_id))
        }
    })
}
