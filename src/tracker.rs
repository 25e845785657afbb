//! Detached-node tracking and changeset consistency checkers.
//!
//! These structures validate generator and fuzz-test output before it can
//! corrupt state. They are O(n) in the number of tracked nodes and belong
//! in test and validation paths, not the production rebase/compose
//! pipeline, which never runs them per operation.

use std::collections::BTreeMap;

use crate::changeset::{Changeset, TaggedChange};
use crate::mark::{CellId, Mark, RevisionTag, same_cell};

/// A rename of detached content caused by detaching it again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Equivalence {
    pub old: CellId,
    pub new: CellId,
}

/// Tracks where revived content currently sits in a field, keyed by index,
/// with the detach identity it was last known by. Scoped to one validation
/// or test run; never persisted.
#[derive(Debug, Clone, Default)]
pub struct DetachedNodeTracker {
    nodes: BTreeMap<usize, CellId>,
    equivalences: Vec<Equivalence>,
}

impl DetachedNodeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tracked(&self) -> &BTreeMap<usize, CellId> {
        &self.nodes
    }

    pub fn equivalences(&self) -> &[Equivalence] {
        &self.equivalences
    }

    /// Advances the tracker through one changeset: first the detaches in
    /// input position order, then the revives in output position order.
    ///
    /// Panics when a detach cannot be attributed a revision from its mark,
    /// the change's rollback target, or the change itself.
    pub fn apply<T>(&mut self, change: &TaggedChange<T>) {
        let mut index = 0usize;
        for mark in &change.change {
            let input_length = mark.input_length() as usize;
            if mark.empties_cells() {
                assert!(mark.effect.is_detach(), "only detaches empty cells");
                let fallback = change.rollback_of.or(change.revision);
                let detach_id = mark
                    .output_cell_id(fallback)
                    .expect("detach must produce an output cell id");
                assert!(
                    detach_id.revision.is_some(),
                    "unable to track detached nodes"
                );
                let after = index + input_length;
                let nodes = std::mem::take(&mut self.nodes);
                for (tracked, identity) in nodes {
                    if tracked < index {
                        self.nodes.insert(tracked, identity);
                    } else if tracked >= after {
                        self.nodes.insert(tracked - input_length, identity);
                    } else {
                        // Re-detached under a new name.
                        let offset = (tracked - index) as u32;
                        self.equivalences.push(Equivalence {
                            old: identity,
                            new: detach_id.offset(offset),
                        });
                    }
                }
            }
            index += input_length;
        }
        let mut index = 0usize;
        for mark in &change.change {
            if is_active_reattach(mark, change.revision) {
                let cell = mark
                    .input_cell_id(change.revision)
                    .expect("reattach must address a cell id");
                let count = mark.count as usize;
                let nodes = std::mem::take(&mut self.nodes);
                for (tracked, identity) in nodes {
                    let shifted = if tracked >= index {
                        tracked + count
                    } else {
                        tracked
                    };
                    self.nodes.insert(shifted, identity);
                }
                for i in 0..count {
                    self.nodes.insert(index + i, cell.offset(i as u32));
                }
            }
            index += mark.output_length() as usize;
        }
    }

    /// Whether `change` can be applied after everything this tracker has
    /// seen: `false` when it revives content that a tracked change already
    /// revived somewhere else. A `false` result means "not composable",
    /// not an error.
    pub fn is_applicable<T>(&self, change: &TaggedChange<T>) -> bool {
        for mark in &change.change {
            if is_active_reattach(mark, change.revision) {
                let cell = mark
                    .input_cell_id(change.revision)
                    .expect("reattach must address a cell id");
                for i in 0..mark.count {
                    let updated = self.updated_detach(cell.offset(i));
                    if self
                        .nodes
                        .values()
                        .any(|tracked| same_cell(tracked, &updated))
                    {
                        return false;
                    }
                }
            }
        }
        true
    }

    /// Follows the recorded rename chain to the identity the cell is known
    /// by today.
    fn updated_detach(&self, cell: CellId) -> CellId {
        let mut current = cell;
        for equivalence in &self.equivalences {
            if same_cell(&current, &equivalence.old) {
                current = equivalence.new.clone();
            }
        }
        current
    }
}

fn is_active_reattach<T>(mark: &Mark<T>, fallback: Option<RevisionTag>) -> bool {
    // A transient reattach never makes content live; only fills count.
    mark.is_reattach(fallback) && mark.fills_cells()
}

/// Checks that two changesets authored against the same context agree on
/// where shared detached content goes: same relative field order and same
/// relative sequence among the revived nodes themselves. A contradiction
/// means the pair cannot be rebased onto one another.
pub fn are_rebasable<T>(branch: &Changeset<T>, target: &Changeset<T>) -> bool {
    type Key = (Option<RevisionTag>, u32);
    let mut index_to_reattach: BTreeMap<usize, Vec<Key>> = BTreeMap::new();
    let mut reattach_to_index: BTreeMap<Key, usize> = BTreeMap::new();
    let mut index = 0usize;
    for mark in branch {
        if is_active_reattach(mark, None) {
            let cell = mark.cell_id.as_ref().expect("reattach must carry a cell id");
            for i in 0..mark.count {
                let key = (cell.revision, cell.local_id + i);
                assert!(
                    !reattach_to_index.contains_key(&key),
                    "inconsistent characterization of detached content"
                );
                index_to_reattach.entry(index).or_default().push(key);
                reattach_to_index.insert(key, index);
            }
        }
        index += mark.input_length() as usize;
    }
    let mut last: Option<(usize, usize)> = None;
    for mark in target {
        if is_active_reattach(mark, None) {
            let cell = mark.cell_id.as_ref().expect("reattach must carry a cell id");
            for i in 0..mark.count {
                let key = (cell.revision, cell.local_id + i);
                let Some(&branch_index) = reattach_to_index.get(&key) else {
                    continue;
                };
                let ordinal = index_to_reattach[&branch_index]
                    .iter()
                    .position(|candidate| candidate == &key)
                    .expect("key was recorded under this index");
                if let Some(previous) = last {
                    if (branch_index, ordinal) < previous {
                        return false;
                    }
                }
                last = Some((branch_index, ordinal));
            }
        }
    }
    true
}

/// Whether the changes can be composed in order without contradicting each
/// other's description of detached content. Short-circuits on the first
/// inapplicable change.
pub fn are_composable<T>(changes: &[TaggedChange<T>]) -> bool {
    let mut tracker = DetachedNodeTracker::new();
    for change in changes {
        if !tracker.is_applicable(change) {
            return false;
        }
        tracker.apply(change);
    }
    true
}
