//! `ComponentMask`: the immutable, value-equal, hashable set of
//! `ComponentTypeId`s that identifies an archetype.

use smallvec::SmallVec;

use crate::bitset::BitSet;
use crate::registry::ComponentTypeId;

/// Inline capacity for the cached ascending id array before it spills to the heap.
const INLINE_IDS: usize = 8;

/// An ordered set of [`ComponentTypeId`]. Two masks are equal iff they
/// contain the same ids; hashing and equality both ignore unused trailing
/// capacity so masks built against registries of different sizes still
/// compare correctly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ComponentMask {
    bits: BitSet,
}

impl ComponentMask {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_ids(ids: impl IntoIterator<Item = ComponentTypeId>) -> Self {
        let mut mask = Self::new();
        for id in ids {
            mask.set(id);
        }
        mask
    }

    pub fn set(&mut self, id: ComponentTypeId) {
        self.bits.set(id as usize);
    }

    pub fn clear(&mut self, id: ComponentTypeId) {
        self.bits.clear(id as usize);
    }

    pub fn has(&self, id: ComponentTypeId) -> bool {
        self.bits.contains(id as usize)
    }

    pub fn contains_all(&self, other: &ComponentMask) -> bool {
        self.bits.contains_all(&other.bits)
    }

    pub fn contains_none(&self, other: &ComponentMask) -> bool {
        self.bits.contains_none(&other.bits)
    }

    pub fn intersects(&self, other: &ComponentMask) -> bool {
        self.bits.intersects(&other.bits)
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Ascending array of the ids present in this mask.
    pub fn to_id_array(&self) -> SmallVec<[ComponentTypeId; INLINE_IDS]> {
        self.bits.ones().map(|i| i as ComponentTypeId).collect()
    }

    pub fn with(mut self, id: ComponentTypeId) -> Self {
        self.set(id);
        self
    }

    pub fn without(mut self, id: ComponentTypeId) -> Self {
        self.clear(id);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_has_and_to_id_array() {
        let mask = ComponentMask::from_ids([3, 1, 7]);
        assert!(mask.has(1));
        assert!(mask.has(3));
        assert!(mask.has(7));
        assert!(!mask.has(2));
        assert_eq!(mask.to_id_array().into_vec(), vec![1, 3, 7]);
    }

    #[test]
    fn contains_all_none_intersects() {
        let pv = ComponentMask::from_ids([0, 1]);
        let p = ComponentMask::from_ids([0]);
        let w = ComponentMask::from_ids([5]);
        assert!(pv.contains_all(&p));
        assert!(pv.contains_none(&w));
        assert!(!pv.intersects(&w));

        let mixed = ComponentMask::from_ids([1, 5]);
        assert!(mixed.intersects(&w));
        assert!(!pv.contains_all(&mixed));
    }

    #[test]
    fn equal_masks_built_differently_hash_equal() {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let a = ComponentMask::from_ids([1, 2, 3]);
        let b = ComponentMask::new().with(3).with(1).with(2);
        assert_eq!(a, b);

        let mut ha = DefaultHasher::new();
        a.hash(&mut ha);
        let mut hb = DefaultHasher::new();
        b.hash(&mut hb);
        assert_eq!(ha.finish(), hb.finish());
    }
}
