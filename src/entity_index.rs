//! Concurrent `entityId → EntityRecord` map. Structural operations read
//! then atomically replace the record for an entity.

use dashmap::DashMap;
use dashmap::mapref::one::Ref;

use crate::entity::{EntityId, EntityRecord};

#[derive(Default)]
pub struct EntityIndex {
    records: DashMap<EntityId, EntityRecord, ahash::RandomState>,
}

impl EntityIndex {
    pub fn new() -> Self {
        Self {
            records: DashMap::default(),
        }
    }

    pub fn insert(&self, id: EntityId, record: EntityRecord) {
        self.records.insert(id, record);
    }

    pub fn get(&self, id: EntityId) -> Option<Ref<'_, EntityId, EntityRecord, ahash::RandomState>> {
        self.records.get(&id)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.records.contains_key(&id)
    }

    /// Atomically replace `id`'s record, returning the prior one if present.
    pub fn replace(&self, id: EntityId, record: EntityRecord) -> Option<EntityRecord> {
        self.records.insert(id, record)
    }

    pub fn remove(&self, id: EntityId) -> Option<EntityRecord> {
        self.records.remove(&id).map(|(_, r)| r)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mask::ComponentMask;
    use crate::shared_key::SharedValueKey;

    fn record() -> EntityRecord {
        EntityRecord::new(ComponentMask::new(), SharedValueKey::default(), 0, 0)
    }

    #[test]
    fn insert_get_remove_roundtrip() {
        let index = EntityIndex::new();
        index.insert(1, record());
        assert!(index.contains(1));
        assert!(index.get(1).is_some());
        let removed = index.remove(1);
        assert!(removed.is_some());
        assert!(!index.contains(1));
    }

    #[test]
    fn replace_returns_previous_record() {
        let index = EntityIndex::new();
        index.insert(1, record());
        let mut next = record();
        next.chunk_index = 3;
        let prev = index.replace(1, next);
        assert_eq!(prev.unwrap().chunk_index, 0);
        assert_eq!(index.get(1).unwrap().chunk_index, 3);
    }
}
