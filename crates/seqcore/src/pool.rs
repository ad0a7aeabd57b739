//! Fixed-size object pool (§4.1).
//!
//! A pool is a statically sized arena of slots. Free slots are threaded as a
//! singly-linked list through their own storage (a [`PoolIndex`] stashed in
//! the slot in place of its payload), so `acquire`/`release` are O(1) and
//! allocate nothing. Handed-out indices, not pointers, so the arena can be
//! inspected or snapshotted without lifetime entanglement — this is Design
//! Note (b): "an arena of slots addressed by 32-bit indices."
//!
//! `acquire` on an exhausted pool is a fatal error (§4.1): real-time paths
//! size their pools statically and are not expected to handle allocation
//! failure locally.

use crate::error::{Error, Result};
use std::fmt;

/// An index into a [`Pool`]. `u32` keeps slots cache-dense and cheap to copy
/// around the arena-based track/state lists that hand these out by value.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolIndex(u32);

impl fmt::Debug for PoolIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl PoolIndex {
    #[inline]
    fn as_usize(self) -> usize {
        self.0 as usize
    }
}

enum Slot<T> {
    Occupied(T),
    Free { next: Option<PoolIndex> },
}

/// A fixed-capacity pool of `T` slots.
pub struct Pool<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<PoolIndex>,
    live: usize,
}

impl<T> Pool<T> {
    /// Creates a pool with `capacity` pre-allocated, all-free slots.
    pub fn with_capacity(capacity: usize) -> Self
    where
        T: Default,
    {
        let mut slots = Vec::with_capacity(capacity);
        for i in 0..capacity {
            let next = if i + 1 < capacity {
                Some(PoolIndex((i + 1) as u32))
            } else {
                None
            };
            slots.push(Slot::Free { next });
        }
        let free_head = if capacity > 0 {
            Some(PoolIndex(0))
        } else {
            None
        };
        Pool {
            slots,
            free_head,
            live: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn live(&self) -> usize {
        self.live
    }

    /// Unlinks the head of the free list and installs `value` into it.
    ///
    /// Returns [`Error::Fatal`] if the free list is empty — the pool is
    /// sized statically, so exhaustion indicates a sizing bug, not a
    /// recoverable runtime condition.
    pub fn acquire(&mut self, value: T) -> Result<PoolIndex> {
        let idx = self
            .free_head
            .ok_or_else(|| Error::fatal("pool exhausted"))?;
        let next = match &self.slots[idx.as_usize()] {
            Slot::Free { next } => *next,
            Slot::Occupied(_) => unreachable!("free list pointed at an occupied slot"),
        };
        self.slots[idx.as_usize()] = Slot::Occupied(value);
        self.free_head = next;
        self.live += 1;
        Ok(idx)
    }

    /// Links `idx` back at the head of the free list.
    ///
    /// In debug builds the released payload is dropped and replaced with a
    /// poisoned placeholder marker so a stray `get`/`get_mut` on a freed
    /// index panics instead of silently reading stale data.
    pub fn release(&mut self, idx: PoolIndex) {
        debug_assert!(
            matches!(self.slots[idx.as_usize()], Slot::Occupied(_)),
            "double free of {idx:?}"
        );
        self.slots[idx.as_usize()] = Slot::Free {
            next: self.free_head,
        };
        self.free_head = Some(idx);
        self.live -= 1;
    }

    pub fn get(&self, idx: PoolIndex) -> &T {
        match &self.slots[idx.as_usize()] {
            Slot::Occupied(value) => value,
            Slot::Free { .. } => panic!("use-after-free of {idx:?}"),
        }
    }

    /// Like [`get`](Self::get), but returns `None` instead of panicking on
    /// a freed slot — for callers that may legitimately hold a stale index
    /// (e.g. a handle to a timeout that already fired).
    pub fn try_get(&self, idx: PoolIndex) -> Option<&T> {
        match &self.slots[idx.as_usize()] {
            Slot::Occupied(value) => Some(value),
            Slot::Free { .. } => None,
        }
    }

    pub fn get_mut(&mut self, idx: PoolIndex) -> &mut T {
        match &mut self.slots[idx.as_usize()] {
            Slot::Occupied(value) => value,
            Slot::Free { .. } => panic!("use-after-free of {idx:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default, Debug, PartialEq)]
    struct Rec(u32);

    #[test]
    fn acquire_release_reuses_slots_without_aliasing() {
        let mut pool: Pool<Rec> = Pool::with_capacity(2);
        let a = pool.acquire(Rec(1)).unwrap();
        let b = pool.acquire(Rec(2)).unwrap();
        assert_ne!(a, b);
        assert_eq!(pool.get(a), &Rec(1));
        assert_eq!(pool.get(b), &Rec(2));

        pool.release(a);
        let c = pool.acquire(Rec(3)).unwrap();
        assert_eq!(c, a, "freed slot should be reused");
        assert_eq!(pool.get(c), &Rec(3));
        assert_eq!(pool.get(b), &Rec(2));
    }

    #[test]
    fn acquire_on_exhausted_pool_is_fatal() {
        let mut pool: Pool<Rec> = Pool::with_capacity(1);
        pool.acquire(Rec(1)).unwrap();
        let err = pool.acquire(Rec(2)).unwrap_err();
        assert!(matches!(err, Error::Fatal(_)));
    }

    #[test]
    #[should_panic(expected = "use-after-free")]
    fn released_slot_is_unreadable() {
        let mut pool: Pool<Rec> = Pool::with_capacity(1);
        let a = pool.acquire(Rec(1)).unwrap();
        pool.release(a);
        pool.get(a);
    }
}
