//! Arena-backed slice allocation for chunk storage.
//!
//! Each [`crate::archetype::Archetype`] owns one `bumpalo::Bump`. Every chunk
//! it spawns carries its unmanaged-instance columns, managed-ticket columns,
//! `entity_ids`, free-list links and occupancy words as slices allocated out
//! of that arena. `Bump` never moves or frees an individual allocation until
//! the whole arena drops, so a raw pointer into it stays valid for as long as
//! something keeps the owning `Arc<Mutex<Bump>>` alive — which is exactly
//! what `ArenaSlice` does. Dropping the `World` drops every archetype's arena
//! in one shot: releasing the world releases all chunks at once.

use std::ptr::NonNull;
use std::sync::Arc;

use bumpalo::Bump;
use parking_lot::Mutex;

/// Shared handle to an archetype's backing arena.
pub type ArenaHandle = Arc<Mutex<Bump>>;

pub fn new_arena() -> ArenaHandle {
    Arc::new(Mutex::new(Bump::new()))
}

/// A fixed-length slice carved out of an [`ArenaHandle`], kept alive by
/// holding a clone of the arena's `Arc`.
pub struct ArenaSlice<T> {
    ptr: NonNull<T>,
    len: usize,
    _arena: ArenaHandle,
}

// SAFETY: `ArenaSlice<T>` is just a `(NonNull<T>, usize)` plus a keep-alive
// handle; it never aliases a `&mut` to the same element from two threads at
// once. Callers (`Chunk`) enforce that distinct slots are only ever touched
// by the thread that won the CAS allocating/freeing them.
unsafe impl<T: Send> Send for ArenaSlice<T> {}
unsafe impl<T: Sync> Sync for ArenaSlice<T> {}

impl<T> ArenaSlice<T> {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Raw pointer to element `index`. Bounds are the caller's responsibility;
    /// every call site in this crate bounds-checks before calling.
    #[inline]
    pub fn ptr_at(&self, index: usize) -> *mut T {
        debug_assert!(index < self.len, "arena slice index out of bounds");
        // SAFETY: `index < self.len` is a precondition enforced by the
        // caller (debug-checked above); `self.ptr` points at `self.len`
        // contiguous, live `T`s for the lifetime of `self`.
        unsafe { self.ptr.as_ptr().add(index) }
    }

    pub fn as_slice(&self) -> &[T] {
        // SAFETY: `ptr` points at `len` initialized, contiguous `T`s kept
        // alive by `_arena`.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

/// Allocate `len` copies of `value` (or more) out of `arena`, filled via `f`.
pub fn alloc_fill_with<T>(
    arena: &ArenaHandle,
    len: usize,
    mut f: impl FnMut(usize) -> T,
) -> ArenaSlice<T> {
    let alloc_len = len.max(1);
    let mut guard = arena.lock();
    let slice: &mut [T] = guard.alloc_slice_fill_with(alloc_len, &mut f);
    let ptr = NonNull::new(slice.as_mut_ptr()).expect("bumpalo never returns a null pointer");
    drop(guard);
    ArenaSlice {
        ptr,
        len,
        _arena: Arc::clone(arena),
    }
}

/// Allocate `len` zeroed bytes (or more) out of `arena`.
pub fn alloc_zeroed_bytes(arena: &ArenaHandle, len: usize) -> ArenaSlice<u8> {
    let alloc_len = len.max(1);
    let mut guard = arena.lock();
    let slice: &mut [u8] = guard.alloc_slice_fill_copy(alloc_len, 0u8);
    let ptr = NonNull::new(slice.as_mut_ptr()).expect("bumpalo never returns a null pointer");
    drop(guard);
    ArenaSlice {
        ptr,
        len,
        _arena: Arc::clone(arena),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn slice_survives_arena_handle_clones() {
        let arena = new_arena();
        let slice = alloc_fill_with(&arena, 8, |_| AtomicI32::new(-1));
        assert_eq!(slice.len(), 8);
        for i in 0..8 {
            assert_eq!(slice.as_slice()[i].load(Ordering::Relaxed), -1);
        }
        drop(arena);
        // The arena is still alive because `slice` holds its own clone.
        slice.as_slice()[0].store(42, Ordering::Relaxed);
        assert_eq!(slice.as_slice()[0].load(Ordering::Relaxed), 42);
    }

    #[test]
    fn zeroed_bytes_are_zero() {
        let arena = new_arena();
        let bytes = alloc_zeroed_bytes(&arena, 16);
        assert!(bytes.as_slice().iter().all(|&b| b == 0));
    }
}
