//! Component type registry: assigns stable [`ComponentTypeId`]s to
//! caller-described component types and computes their byte layout.
//!
//! Registration is append-only and idempotent by key: registering the same
//! `key` twice returns the existing id rather than creating a duplicate.
//! Reads (`descriptor`, `kind_of`, ...) are lock-free via `ArcSwap`; the
//! write path is serialized by a mutex since registration is rare compared
//! to lookup.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::error::{EcsError, Result};
use crate::layout::{compute_layout, ComponentDescriptor, ComponentKind, FieldKind, FieldSpec, LayoutPolicy};

/// Dense, stable identifier assigned on first registration of a component
/// type. Never reused, never reassigned.
pub type ComponentTypeId = u32;

/// Caller-supplied description of a component type, submitted to
/// [`ComponentRegistry::register`] or [`ComponentRegistry::register_batch`].
#[derive(Debug, Clone)]
pub struct ComponentTypeSpec {
    /// Stable identity used for idempotent re-registration and for composite
    /// field references, within this call or against previously registered
    /// types.
    pub key: String,
    pub kind: ComponentKind,
    pub fields: Vec<FieldSpec>,
    pub layout_policy: LayoutPolicy,
}

impl ComponentTypeSpec {
    pub fn new(key: impl Into<String>, kind: ComponentKind, layout_policy: LayoutPolicy) -> Self {
        Self {
            key: key.into(),
            kind,
            fields: Vec::new(),
            layout_policy,
        }
    }

    pub fn with_field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }
}

struct Inner {
    descriptors: ArcSwap<Vec<Arc<ComponentDescriptor>>>,
    by_key: Mutex<HashMap<String, ComponentTypeId>>,
    write_lock: Mutex<()>,
    next_id: AtomicU32,
}

/// Registry of all component types known to a [`crate::world::World`].
pub struct ComponentRegistry {
    inner: Inner,
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self {
            inner: Inner {
                descriptors: ArcSwap::from_pointee(Vec::new()),
                by_key: Mutex::new(HashMap::new()),
                write_lock: Mutex::new(()),
                next_id: AtomicU32::new(0),
            },
        }
    }

    /// Register a single component type, or return its existing id if `key`
    /// was already registered.
    pub fn register(&self, spec: ComponentTypeSpec) -> Result<ComponentTypeId> {
        Ok(self.register_batch(vec![spec])?[0])
    }

    /// Register many component types at once, resolving composite field
    /// references (by key) across the whole batch as well as against
    /// already-registered types. Composite references must form a DAG;
    /// cycles are reported as [`EcsError::RegistrationCycle`].
    pub fn register_batch(&self, specs: Vec<ComponentTypeSpec>) -> Result<Vec<ComponentTypeId>> {
        let _guard = self.inner.write_lock.lock();

        let mut by_key = self.inner.by_key.lock();
        let mut pending_by_key: HashMap<&str, usize> = HashMap::new();
        let mut results = vec![0u32; specs.len()];

        for (i, spec) in specs.iter().enumerate() {
            if let Some(&existing) = by_key.get(&spec.key) {
                results[i] = existing;
            } else {
                pending_by_key.insert(spec.key.as_str(), i);
            }
        }

        let current = self.inner.descriptors.load();
        let mut resolved: HashMap<String, ComponentDescriptor> = HashMap::new();
        for (key, &id) in by_key.iter() {
            if let Some(desc) = current.get(id as usize) {
                resolved.insert(key.clone(), (**desc).clone());
            }
        }

        let order = topological_order(&specs, &pending_by_key, &by_key)?;

        let mut next_descriptors: Vec<Arc<ComponentDescriptor>> = (**current).clone();

        for idx in order {
            let spec = &specs[idx];
            let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

            let resolve_composite = |key: &str| -> Option<ComponentDescriptor> {
                resolved.get(key).cloned()
            };

            let descriptor = compute_layout(
                id,
                &spec.key,
                spec.kind,
                &spec.fields,
                spec.layout_policy,
                resolve_composite,
            )?;

            by_key.insert(spec.key.clone(), id);
            resolved.insert(spec.key.clone(), descriptor.clone());
            next_descriptors.push(Arc::new(descriptor));
            results[idx] = id;
        }

        self.inner.descriptors.store(Arc::new(next_descriptors));
        Ok(results)
    }

    pub fn descriptor(&self, id: ComponentTypeId) -> Option<Arc<ComponentDescriptor>> {
        self.inner.descriptors.load().get(id as usize).cloned()
    }

    pub fn kind_of(&self, id: ComponentTypeId) -> Option<ComponentKind> {
        self.descriptor(id).map(|d| d.kind)
    }

    pub fn id_of(&self, key: &str) -> Option<ComponentTypeId> {
        self.inner.by_key.lock().get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.inner.descriptors.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Depth-first topological order over the pending specs by composite
/// dependency, so every composite field is resolvable when its owner is
/// laid out. Returns [`EcsError::RegistrationCycle`] on a cycle and
/// [`EcsError::BadArgument`] when a composite references a key that is
/// neither pending in this batch nor already registered.
fn topological_order(
    specs: &[ComponentTypeSpec],
    pending_by_key: &HashMap<&str, usize>,
    already: &HashMap<String, ComponentTypeId>,
) -> Result<Vec<usize>> {
    let mut order = Vec::with_capacity(pending_by_key.len());
    let mut visiting = vec![false; specs.len()];
    let mut visited = vec![false; specs.len()];

    fn visit(
        i: usize,
        specs: &[ComponentTypeSpec],
        pending_by_key: &HashMap<&str, usize>,
        already: &HashMap<String, ComponentTypeId>,
        visiting: &mut [bool],
        visited: &mut [bool],
        order: &mut Vec<usize>,
    ) -> Result<()> {
        if visited[i] {
            return Ok(());
        }
        if visiting[i] {
            return Err(EcsError::RegistrationCycle(format!(
                "composite field cycle detected at '{}'",
                specs[i].key
            )));
        }
        visiting[i] = true;
        for field in &specs[i].fields {
            if let FieldKind::Composite(target_key) = &field.kind {
                if already.contains_key(target_key) {
                    continue;
                }
                let Some(&dep_idx) = pending_by_key.get(target_key.as_str()) else {
                    return Err(EcsError::BadArgument(format!(
                        "composite field '{}' in '{}' references unregistered component '{}'",
                        field.name, specs[i].key, target_key
                    )));
                };
                visit(dep_idx, specs, pending_by_key, already, visiting, visited, order)?;
            }
        }
        visiting[i] = false;
        visited[i] = true;
        order.push(i);
        Ok(())
    }

    for &i in pending_by_key.values() {
        visit(i, specs, pending_by_key, already, &mut visiting, &mut visited, &mut order)?;
    }

    Ok(order)
}
