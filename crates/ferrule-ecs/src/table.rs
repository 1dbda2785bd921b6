//! Dense component storage keyed by entity id.
//!
//! A [`ComponentTable`] stores all records of one component kind in a packed
//! array, with a parallel `Vec<EntityId>` mapping row index to entity and a
//! `HashMap` mapping entity to row index. Removal uses swap-and-pop so the
//! array stays dense; row order is therefore not stable and must never be
//! relied on. Only id lookup is a contract.
//!
//! # Invariant
//!
//! For every id `k` in the index map, `ids[index[k]] == k`, and
//! `ids.len() == records.len() == index.len()`.

use std::collections::HashMap;

use crate::entity::EntityId;
use crate::EcsError;

// ---------------------------------------------------------------------------
// ComponentTable
// ---------------------------------------------------------------------------

/// Dense array + id-index-map storage for one component kind.
#[derive(Debug, Clone)]
pub struct ComponentTable<T> {
    /// Row index -> owning entity.
    ids: Vec<EntityId>,
    /// Row index -> record. Parallel to `ids`.
    records: Vec<T>,
    /// Entity -> row index.
    index: HashMap<EntityId, usize>,
}

impl<T> ComponentTable<T> {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            ids: Vec::new(),
            records: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Number of stored records.
    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the table is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Whether `id` has a record in this table.
    #[inline]
    pub fn contains(&self, id: EntityId) -> bool {
        self.index.contains_key(&id)
    }

    /// Append a record for `id`.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::DuplicateKey`] if `id` already has a record. The
    /// table is left unchanged.
    pub fn add(&mut self, id: EntityId, record: T) -> Result<&mut T, EcsError> {
        if self.index.contains_key(&id) {
            return Err(EcsError::DuplicateKey { id });
        }
        let row = self.records.len();
        self.ids.push(id);
        self.records.push(record);
        self.index.insert(id, row);
        Ok(&mut self.records[row])
    }

    /// Look up the record for `id`.
    #[inline]
    pub fn get(&self, id: EntityId) -> Option<&T> {
        self.index.get(&id).map(|&row| &self.records[row])
    }

    /// Look up the record for `id` mutably.
    #[inline]
    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut T> {
        match self.index.get(&id) {
            Some(&row) => Some(&mut self.records[row]),
            None => None,
        }
    }

    /// Remove the record for `id`, returning it.
    ///
    /// The last record is moved into the vacated row and its index entry is
    /// updated. Returns `None` if `id` has no record.
    pub fn remove(&mut self, id: EntityId) -> Option<T> {
        let row = self.index.remove(&id)?;
        let last = self.records.len() - 1;
        self.ids.swap_remove(row);
        let record = self.records.swap_remove(row);
        if row != last {
            let moved = self.ids[row];
            let slot = self
                .index
                .get_mut(&moved)
                .expect("component table index desync: moved record has no index entry");
            *slot = row;
        }
        debug_assert_eq!(self.ids.len(), self.index.len());
        Some(record)
    }

    /// Remove every record.
    pub fn clear(&mut self) {
        self.ids.clear();
        self.records.clear();
        self.index.clear();
    }

    /// Entity ids in storage order.
    pub fn ids(&self) -> &[EntityId] {
        &self.ids
    }

    /// Iterate `(id, record)` pairs in storage order.
    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &T)> + '_ {
        self.ids.iter().copied().zip(self.records.iter())
    }

    /// Iterate `(id, record)` pairs mutably in storage order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (EntityId, &mut T)> + '_ {
        self.ids.iter().copied().zip(self.records.iter_mut())
    }

    /// Check the id/index invariant over the whole table.
    ///
    /// Intended for tests and debug assertions; O(n).
    pub fn is_consistent(&self) -> bool {
        self.ids.len() == self.records.len()
            && self.ids.len() == self.index.len()
            && self
                .index
                .iter()
                .all(|(&id, &row)| self.ids.get(row) == Some(&id))
    }
}

impl<T> Default for ComponentTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
