//! `SharedValueKey`: identifies which `ChunkGroup` within an archetype an
//! entity belongs to, based on the concrete shared-component values it
//! carries.

use smallvec::SmallVec;

/// Sentinel for an unset shared-managed slot (no value assigned yet).
pub const UNSET_MANAGED: i32 = -1;
/// Sentinel for an unset shared-unmanaged slot.
pub const UNSET_UNMANAGED: i64 = i64::MIN;

const INLINE: usize = 4;

/// Immutable pair of arrays identifying a concrete shared-value combination.
/// `managed_shared_indices[i]` is the `SharedValueStore` index for the i-th
/// shared-managed type in the archetype's kind partition (or
/// [`UNSET_MANAGED`]); `unmanaged_shared_values[i]` is the raw i64 payload
/// for the i-th shared-unmanaged type (or [`UNSET_UNMANAGED`]).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SharedValueKey {
    pub managed_shared_indices: SmallVec<[i32; INLINE]>,
    pub unmanaged_shared_values: SmallVec<[i64; INLINE]>,
}

impl SharedValueKey {
    pub fn empty(managed_len: usize, unmanaged_len: usize) -> Self {
        Self {
            managed_shared_indices: SmallVec::from_elem(UNSET_MANAGED, managed_len),
            unmanaged_shared_values: SmallVec::from_elem(UNSET_UNMANAGED, unmanaged_len),
        }
    }

    pub fn with_managed(mut self, position: usize, index: i32) -> Self {
        self.managed_shared_indices[position] = index;
        self
    }

    pub fn with_unmanaged(mut self, position: usize, value: i64) -> Self {
        self.unmanaged_shared_values[position] = value;
        self
    }

    /// Positions whose value differs between `self` and `other` amongst the
    /// managed-shared slots. Used by structural moves to adjust refcounts.
    pub fn managed_diff_positions(&self, other: &Self) -> impl Iterator<Item = usize> + '_ {
        let len = self.managed_shared_indices.len().min(other.managed_shared_indices.len());
        (0..len).filter(move |&i| self.managed_shared_indices[i] != other.managed_shared_indices[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_keys_of_same_shape_are_equal() {
        let a = SharedValueKey::empty(2, 1);
        let b = SharedValueKey::empty(2, 1);
        assert_eq!(a, b);
    }

    #[test]
    fn diff_positions_reports_changed_managed_slots() {
        let a = SharedValueKey::empty(3, 0).with_managed(1, 5);
        let b = SharedValueKey::empty(3, 0).with_managed(1, 9).with_managed(2, 1);
        let diffs: Vec<usize> = a.managed_diff_positions(&b).collect();
        assert_eq!(diffs, vec![1, 2]);
    }
}
