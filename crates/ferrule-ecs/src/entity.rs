//! Entity identifiers and allocation.
//!
//! An [`EntityId`] is a plain 32-bit handle. The value `u32::MAX` is reserved
//! as the [`EntityId::INVALID`] sentinel and is never handed out.
//!
//! Ids are never recycled within the lifetime of an [`IdentityAllocator`]:
//! other subsystems cache ids across frames, and reuse would silently alias a
//! destroyed entity with a new one.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// EntityId
// ---------------------------------------------------------------------------

/// A stable entity identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(u32);

impl EntityId {
    /// The "no entity" sentinel. Used for root parents and unresolved
    /// cross-references.
    pub const INVALID: EntityId = EntityId(u32::MAX);

    /// Construct an `EntityId` from its raw value.
    #[inline]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw `u32` representation.
    #[inline]
    pub const fn to_raw(self) -> u32 {
        self.0
    }

    /// Whether this id is anything other than [`EntityId::INVALID`].
    #[inline]
    pub const fn is_valid(self) -> bool {
        self.0 != u32::MAX
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "EntityId({})", self.0)
        } else {
            write!(f, "EntityId(INVALID)")
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "{}", self.0)
        } else {
            write!(f, "invalid")
        }
    }
}

// ---------------------------------------------------------------------------
// IdentityAllocator
// ---------------------------------------------------------------------------

/// Issues unique [`EntityId`]s from a monotonic counter.
///
/// A loader may insert entities with literal ids (e.g. when restoring a
/// snapshot), so [`allocate`](Self::allocate) skips any value the caller
/// reports as taken. Not synchronized: one allocator belongs to exactly one
/// [`EntityGroup`](crate::group::EntityGroup).
#[derive(Debug, Clone, Default)]
pub struct IdentityAllocator {
    /// Next candidate value.
    next: u32,
}

impl IdentityAllocator {
    /// Create an allocator starting at id 0.
    pub fn new() -> Self {
        Self { next: 0 }
    }

    /// Create an allocator whose next candidate is `next`.
    pub fn starting_at(next: u32) -> Self {
        Self { next }
    }

    /// Allocate a fresh id, skipping every value for which `is_taken`
    /// returns `true`.
    ///
    /// # Panics
    ///
    /// Panics if the 32-bit id space is exhausted.
    pub fn allocate(&mut self, mut is_taken: impl FnMut(EntityId) -> bool) -> EntityId {
        loop {
            assert!(
                self.next != u32::MAX,
                "entity id space exhausted ({} ids issued)",
                u32::MAX
            );
            let candidate = EntityId(self.next);
            self.next += 1;
            if !is_taken(candidate) {
                return candidate;
            }
        }
    }

    /// Make sure future allocations start after `id`.
    ///
    /// Called when a caller inserts an explicit id so that the common case
    /// does not need to skip over it later.
    pub fn observe(&mut self, id: EntityId) {
        if id.is_valid() && id.0 >= self.next {
            self.next = id.0.saturating_add(1);
        }
    }

    /// The next candidate value (for snapshots).
    pub fn peek_next(&self) -> u32 {
        self.next
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn allocate_unique_ids() {
        let mut alloc = IdentityAllocator::new();
        let ids: HashSet<EntityId> = (0..100).map(|_| alloc.allocate(|_| false)).collect();
        assert_eq!(ids.len(), 100);
    }

    #[test]
    fn allocate_skips_taken_ids() {
        let mut alloc = IdentityAllocator::new();
        let taken: HashSet<EntityId> = [EntityId::new(0), EntityId::new(1), EntityId::new(3)]
            .into_iter()
            .collect();
        let a = alloc.allocate(|id| taken.contains(&id));
        let b = alloc.allocate(|id| taken.contains(&id));
        assert_eq!(a, EntityId::new(2));
        assert_eq!(b, EntityId::new(4));
    }

    #[test]
    fn ids_are_never_recycled() {
        let mut alloc = IdentityAllocator::new();
        let first = alloc.allocate(|_| false);
        // Even if the caller reports nothing as taken, the counter moves on.
        let second = alloc.allocate(|_| false);
        assert_ne!(first, second);
        assert!(second > first);
    }

    #[test]
    fn observe_moves_counter_past_explicit_id() {
        let mut alloc = IdentityAllocator::new();
        alloc.observe(EntityId::new(41));
        assert_eq!(alloc.allocate(|_| false), EntityId::new(42));
        // Observing a smaller id never rewinds.
        alloc.observe(EntityId::new(5));
        assert_eq!(alloc.allocate(|_| false), EntityId::new(43));
    }

    #[test]
    fn invalid_sentinel_is_not_valid() {
        assert!(!EntityId::INVALID.is_valid());
        assert!(EntityId::new(0).is_valid());
        assert_eq!(EntityId::default(), EntityId::INVALID);
        assert_eq!(format!("{}", EntityId::INVALID), "invalid");
        assert_eq!(format!("{:?}", EntityId::new(7)), "EntityId(7)");
    }

    #[test]
    #[should_panic(expected = "entity id space exhausted")]
    fn allocator_never_returns_sentinel() {
        let mut alloc = IdentityAllocator::starting_at(u32::MAX - 1);
        let last = alloc.allocate(|_| false);
        assert_eq!(last.to_raw(), u32::MAX - 1);
        alloc.allocate(|_| false);
    }
}
