//! Communication channel between the two endpoints of a move.
//!
//! A move's source and destination marks may be visited in either order,
//! possibly in separate passes. Each endpoint stores what the other needs
//! under its `(revision, local id)` range; when a store overwrites a range
//! that was already read this pass with a different value, the table flags
//! itself invalidated and the driver re-runs the pass.
//!
//! A missed invalidation is a silent correctness bug, not a runtime error:
//! every `get` that could affect a `set` elsewhere must register as a
//! dependency. That property is guarded by tests, not checked at runtime.

use std::collections::BTreeMap;

use crate::mark::{ChangesetLocalId, RevisionTag};

/// Which endpoint of a move pair an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrossFieldTarget {
    Source,
    Destination,
}

/// An entry returned by [`CrossFieldTable::get`]: the stored value and the
/// id range it covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeEntry<V> {
    pub id: ChangesetLocalId,
    pub count: u32,
    pub value: V,
}

type RangeKey = (Option<RevisionTag>, ChangesetLocalId);
type RangeMap<V> = BTreeMap<RangeKey, (u32, V)>;

#[derive(Debug, Clone)]
pub struct CrossFieldTable<V> {
    source: RangeMap<V>,
    destination: RangeMap<V>,
    source_queries: BTreeMap<RangeKey, u32>,
    destination_queries: BTreeMap<RangeKey, u32>,
    is_invalidated: bool,
}

impl<V> Default for CrossFieldTable<V> {
    fn default() -> Self {
        Self {
            source: BTreeMap::new(),
            destination: BTreeMap::new(),
            source_queries: BTreeMap::new(),
            destination_queries: BTreeMap::new(),
            is_invalidated: false,
        }
    }
}

impl<V: Clone + PartialEq> CrossFieldTable<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a previously read range was overwritten since the last
    /// [`reset`](Self::reset). The consuming driver must re-run its pass.
    pub fn is_invalidated(&self) -> bool {
        self.is_invalidated
    }

    /// Looks up the first stored entry overlapping `[id, id + count)`.
    /// With `add_dependency`, the queried range is recorded so a later
    /// overwrite can invalidate this pass.
    pub fn get(
        &mut self,
        target: CrossFieldTarget,
        revision: Option<RevisionTag>,
        id: ChangesetLocalId,
        count: u32,
        add_dependency: bool,
    ) -> Option<RangeEntry<V>> {
        assert!(count > 0, "empty cross-field query");
        if add_dependency {
            let queries = match target {
                CrossFieldTarget::Source => &mut self.source_queries,
                CrossFieldTarget::Destination => &mut self.destination_queries,
            };
            queries.insert((revision, id), count);
        }
        let map = match target {
            CrossFieldTarget::Source => &self.source,
            CrossFieldTarget::Destination => &self.destination,
        };
        first_overlap(map, revision, id, count).map(|(key, entry_count, value)| RangeEntry {
            id: key.1,
            count: entry_count,
            value: value.clone(),
        })
    }

    /// Stores `value` for `[id, id + count)`, trimming any entries it
    /// overlaps. With `invalidate_dependents`, flips the invalidation bit
    /// when the range was already read this pass and the stored value
    /// actually changes.
    pub fn set(
        &mut self,
        target: CrossFieldTarget,
        revision: Option<RevisionTag>,
        id: ChangesetLocalId,
        count: u32,
        value: V,
        invalidate_dependents: bool,
    ) {
        assert!(count > 0, "empty cross-field entry");
        let map = match target {
            CrossFieldTarget::Source => &self.source,
            CrossFieldTarget::Destination => &self.destination,
        };
        let unchanged = matches!(
            first_overlap(map, revision, id, count),
            Some((key, entry_count, existing))
                if key.1 == id && entry_count == count && *existing == value
        );
        if invalidate_dependents && !unchanged {
            let queries = match target {
                CrossFieldTarget::Source => &self.source_queries,
                CrossFieldTarget::Destination => &self.destination_queries,
            };
            if ranges_overlap_queries(queries, revision, id, count) {
                self.is_invalidated = true;
            }
        }
        let map = match target {
            CrossFieldTarget::Source => &mut self.source,
            CrossFieldTarget::Destination => &mut self.destination,
        };
        set_in_map(map, revision, id, count, value);
    }

    /// Clears the invalidation bit and both query sets between passes.
    /// Stored values persist for the lifetime of the operation.
    pub fn reset(&mut self) {
        self.source_queries.clear();
        self.destination_queries.clear();
        self.is_invalidated = false;
    }
}

fn first_overlap<'a, V>(
    map: &'a RangeMap<V>,
    revision: Option<RevisionTag>,
    id: ChangesetLocalId,
    count: u32,
) -> Option<(RangeKey, u32, &'a V)> {
    map.range((revision, 0)..=(revision, id + count - 1))
        .find(|(key, (entry_count, _))| key.1 + entry_count > id)
        .map(|(key, (entry_count, value))| (*key, *entry_count, value))
}

fn ranges_overlap_queries(
    queries: &BTreeMap<RangeKey, u32>,
    revision: Option<RevisionTag>,
    id: ChangesetLocalId,
    count: u32,
) -> bool {
    queries
        .range((revision, 0)..=(revision, id + count - 1))
        .any(|(key, query_count)| key.1 + query_count > id)
}

fn set_in_map<V: Clone>(
    map: &mut RangeMap<V>,
    revision: Option<RevisionTag>,
    id: ChangesetLocalId,
    count: u32,
    value: V,
) {
    let overlapped: Vec<RangeKey> = map
        .range((revision, 0)..=(revision, id + count - 1))
        .filter(|(key, (entry_count, _))| key.1 + entry_count > id)
        .map(|(key, _)| *key)
        .collect();
    for key in overlapped {
        let (entry_count, existing) = map.remove(&key).expect("overlapped key must be present");
        // Keep the non-overlapping remnants of the trimmed entry.
        if key.1 < id {
            map.insert((revision, key.1), (id - key.1, existing.clone()));
        }
        let entry_end = key.1 + entry_count;
        if entry_end > id + count {
            map.insert((revision, id + count), (entry_end - (id + count), existing));
        }
    }
    map.insert((revision, id), (count, value));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_returns_overlapping_entry() {
        let mut table: CrossFieldTable<u32> = CrossFieldTable::new();
        table.set(CrossFieldTarget::Source, None, 5, 3, 7, false);
        let entry = table.get(CrossFieldTarget::Source, None, 6, 1, false);
        assert_eq!(
            entry,
            Some(RangeEntry {
                id: 5,
                count: 3,
                value: 7
            })
        );
        assert_eq!(table.get(CrossFieldTarget::Source, None, 8, 2, false), None);
        assert_eq!(
            table.get(CrossFieldTarget::Destination, None, 6, 1, false),
            None
        );
    }

    #[test]
    fn set_after_dependent_get_invalidates() {
        let mut table: CrossFieldTable<u32> = CrossFieldTable::new();
        assert_eq!(table.get(CrossFieldTarget::Source, None, 5, 2, true), None);
        table.set(CrossFieldTarget::Source, None, 5, 2, 1, true);
        assert!(table.is_invalidated());
    }

    #[test]
    fn set_without_prior_get_does_not_invalidate() {
        let mut table: CrossFieldTable<u32> = CrossFieldTable::new();
        table.set(CrossFieldTarget::Source, None, 5, 2, 1, true);
        assert!(!table.is_invalidated());
    }

    #[test]
    fn rewriting_same_value_does_not_invalidate() {
        let mut table: CrossFieldTable<u32> = CrossFieldTable::new();
        table.set(CrossFieldTarget::Source, None, 5, 2, 1, true);
        table.reset();
        assert!(table.get(CrossFieldTarget::Source, None, 5, 2, true).is_some());
        table.set(CrossFieldTarget::Source, None, 5, 2, 1, true);
        assert!(!table.is_invalidated());
    }

    #[test]
    fn reset_clears_queries_but_keeps_values() {
        let mut table: CrossFieldTable<u32> = CrossFieldTable::new();
        table.get(CrossFieldTarget::Destination, None, 0, 4, true);
        table.set(CrossFieldTarget::Destination, None, 0, 4, 9, true);
        assert!(table.is_invalidated());
        table.reset();
        assert!(!table.is_invalidated());
        assert!(
            table
                .get(CrossFieldTarget::Destination, None, 2, 1, false)
                .is_some()
        );
        // The query set was cleared, so the same overwrite is quiet now.
        table.set(CrossFieldTarget::Destination, None, 0, 4, 10, true);
        assert!(!table.is_invalidated());
    }

    #[test]
    fn partial_overwrite_preserves_remnants() {
        let mut table: CrossFieldTable<u32> = CrossFieldTable::new();
        table.set(CrossFieldTarget::Source, None, 0, 10, 1, false);
        table.set(CrossFieldTarget::Source, None, 3, 4, 2, false);
        let left = table.get(CrossFieldTarget::Source, None, 0, 1, false);
        let middle = table.get(CrossFieldTarget::Source, None, 4, 1, false);
        let right = table.get(CrossFieldTarget::Source, None, 8, 1, false);
        assert_eq!(left.map(|e| (e.id, e.count, e.value)), Some((0, 3, 1)));
        assert_eq!(middle.map(|e| (e.id, e.count, e.value)), Some((3, 4, 2)));
        assert_eq!(right.map(|e| (e.id, e.count, e.value)), Some((7, 3, 1)));
    }
}
