use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use grid::TileIndex;
use rand::Rng;

use crate::ContentId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityTableError {
    EmptyCatalog,
}

impl fmt::Display for IdentityTableError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityTableError::EmptyCatalog => {
                write!(formatter, "content catalog must hold at least one item")
            }
        }
    }
}

impl std::error::Error for IdentityTableError {}

/// Lazily-populated mapping from tile index to content id. An id is drawn
/// uniformly from `[0, catalog_size)` the first time an index is resolved
/// and stays assigned until the failure path evicts it. Resolution and
/// eviction go through one table-wide lock, so concurrent resolutions for
/// the same index always observe a single draw.
#[derive(Debug)]
pub struct IdentityTable {
    catalog_size: u32,
    assignments: Mutex<HashMap<TileIndex, ContentId>>,
}

impl IdentityTable {
    pub fn new(catalog_size: u32) -> Result<Self, IdentityTableError> {
        if catalog_size == 0 {
            return Err(IdentityTableError::EmptyCatalog);
        }
        Ok(Self {
            catalog_size,
            assignments: Mutex::new(HashMap::new()),
        })
    }

    pub fn catalog_size(&self) -> u32 {
        self.catalog_size
    }

    pub fn resolve(&self, index: TileIndex) -> ContentId {
        let mut assignments = self
            .assignments
            .lock()
            .expect("identity table lock poisoned");
        *assignments
            .entry(index)
            .or_insert_with(|| rand::rng().random_range(0..self.catalog_size))
    }

    /// Drops the assignment so the next `resolve` draws a fresh id. Used by
    /// the fetch failure path to skip broken or missing catalog items.
    pub fn evict(&self, index: TileIndex) -> Option<ContentId> {
        self.assignments
            .lock()
            .expect("identity table lock poisoned")
            .remove(&index)
    }

    pub fn assigned_count(&self) -> usize {
        self.assignments
            .lock()
            .expect("identity table lock poisoned")
            .len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    const INDEX: TileIndex = TileIndex { column: 3, row: -7 };

    #[test]
    fn rejects_empty_catalog() {
        assert_eq!(
            IdentityTable::new(0).map(|_| ()),
            Err(IdentityTableError::EmptyCatalog)
        );
    }

    #[test]
    fn resolve_is_stable_without_eviction() {
        let table = IdentityTable::new(1085).expect("create identity table");
        let first = table.resolve(INDEX);
        for _ in 0..100 {
            assert_eq!(table.resolve(INDEX), first);
        }
        assert_eq!(table.assigned_count(), 1);
    }

    #[test]
    fn draws_stay_inside_the_catalog_bound() {
        let table = IdentityTable::new(3).expect("create identity table");
        for column in 0..200 {
            let id = table.resolve(TileIndex { column, row: 0 });
            assert!(id < 3);
        }
    }

    #[test]
    fn evict_forces_a_fresh_draw() {
        let table = IdentityTable::new(1_000_000).expect("create identity table");
        let first = table.resolve(INDEX);
        assert_eq!(table.evict(INDEX), Some(first));
        assert_eq!(table.assigned_count(), 0);

        // A million-item catalog makes a repeat draw vanishingly unlikely,
        // but eviction itself must always clear the assignment.
        let second = table.resolve(INDEX);
        assert_ne!(first, second);
    }

    #[test]
    fn evicting_an_unassigned_index_is_a_no_op() {
        let table = IdentityTable::new(10).expect("create identity table");
        assert_eq!(table.evict(INDEX), None);
    }

    #[test]
    fn concurrent_resolutions_observe_one_draw_per_index() {
        let table = Arc::new(IdentityTable::new(1_000_000).expect("create identity table"));
        let mut join_handles = Vec::new();
        for _ in 0..8 {
            let table = Arc::clone(&table);
            join_handles.push(std::thread::spawn(move || {
                (0..64)
                    .map(|column| table.resolve(TileIndex { column, row: 0 }))
                    .collect::<Vec<_>>()
            }));
        }

        let observed: Vec<Vec<ContentId>> = join_handles
            .into_iter()
            .map(|handle| handle.join().expect("join resolver thread"))
            .collect();
        for ids in &observed[1..] {
            assert_eq!(ids, &observed[0]);
        }
        assert_eq!(table.assigned_count(), 64);
    }
}
