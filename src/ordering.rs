//! Relative ordering of cells referenced by marks from different revisions.
//!
//! Positions shift under concurrent edits and are meaningless across
//! changesets, so the order of two cells is established only through
//! tombstone knowledge or the documented lineage tie-break, never through
//! raw indices.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use crate::mark::{CellId, ChangesetLocalId, IdRange, RevisionTag};

/// Outcome of comparing an older changeset's cell against a newer one's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellOrder {
    SameCell,
    OldThenNew,
    NewThenOld,
}

/// Consult-only total order over the revisions in scope for one rebase or
/// compose operation. Supplied by the sequencing layer, never computed here.
pub trait RevisionMetadataSource {
    fn get_index(&self, revision: RevisionTag) -> Option<usize>;
}

/// Metadata backed by an explicit revision list, oldest first.
#[derive(Debug, Clone, Default)]
pub struct RevisionMetadata {
    indices: BTreeMap<RevisionTag, usize>,
}

impl RevisionMetadata {
    pub fn from_revisions(revisions: impl IntoIterator<Item = RevisionTag>) -> Self {
        let indices = revisions
            .into_iter()
            .enumerate()
            .map(|(index, revision)| (revision, index))
            .collect();
        Self { indices }
    }
}

impl RevisionMetadataSource for RevisionMetadata {
    fn get_index(&self, revision: RevisionTag) -> Option<usize> {
        self.indices.get(&revision).copied()
    }
}

/// Determines the relative order of two cells using tombstone knowledge,
/// falling back to the merge-left tie-break.
///
/// Preconditions (caller-enforced): both cells describe the same logical
/// position context; `old_cell` comes from the changeset that is strictly
/// older in rebase order; each knowledge set contains every revision its
/// changeset carries marks or tombstones for.
///
/// Panics when the two changesets contradict each other about cell order,
/// or when no ordering evidence exists at all; both indicate corrupted
/// input rather than a recoverable condition.
pub fn compare_cell_positions(
    old_cell: &CellId,
    new_cell: &CellId,
    old_knowledge: &BTreeSet<RevisionTag>,
    new_knowledge: &BTreeSet<RevisionTag>,
    metadata: &dyn RevisionMetadataSource,
) -> CellOrder {
    if old_cell.revision == new_cell.revision {
        if let Some(order) = compare_cells_from_same_revision(old_cell, new_cell) {
            return match order {
                Ordering::Equal => CellOrder::SameCell,
                Ordering::Less => CellOrder::OldThenNew,
                Ordering::Greater => CellOrder::NewThenOld,
            };
        }
    }
    let old_known_by_new = old_cell
        .revision
        .is_some_and(|revision| new_knowledge.contains(&revision));
    let new_known_by_old = new_cell
        .revision
        .is_some_and(|revision| old_knowledge.contains(&revision));
    match (old_known_by_new, new_known_by_old) {
        // Each changeset placed the other's cell later in its own mark
        // sequence; they disagree about relative order.
        (true, true) => panic!("inconsistent cell ordering"),
        (true, false) => CellOrder::NewThenOld,
        (false, true) => CellOrder::OldThenNew,
        (false, false) => merge_left_tie_break(old_cell, new_cell, metadata),
    }
}

/// Merge-left policy: lineage evidence first, then the younger cell sorts
/// first. Fixed and deliberately arbitrary; client interoperability depends
/// on every implementation choosing identically.
fn merge_left_tie_break(
    old_cell: &CellId,
    new_cell: &CellId,
    metadata: &dyn RevisionMetadataSource,
) -> CellOrder {
    if let Some(order) = compare_by_lineage(old_cell, new_cell) {
        return order;
    }
    let Some(new_revision) = new_cell.revision else {
        // Created on the branch currently being reconciled: youngest.
        return CellOrder::NewThenOld;
    };
    let Some(old_revision) = old_cell.revision else {
        return CellOrder::OldThenNew;
    };
    match (
        metadata.get_index(old_revision),
        metadata.get_index(new_revision),
    ) {
        (Some(old_index), Some(new_index)) => {
            if new_index > old_index {
                CellOrder::NewThenOld
            } else {
                CellOrder::OldThenNew
            }
        }
        // An unindexed revision predates the window the metadata tracks;
        // the indexed one is the newer of the two.
        (None, Some(_)) => CellOrder::NewThenOld,
        (Some(_), None) => CellOrder::OldThenNew,
        (None, None) => panic!("unable to order cells from unknown revisions"),
    }
}

/// Orders two cells from their recorded lineage. Direct evidence wins: a
/// cell whose lineage names the range the other cell was detached into is
/// placed by the stored offset. Failing that, shared lineage revisions are
/// compared through [`compare_lineages`]. `None` means the lineage offers
/// no evidence either way.
fn compare_by_lineage(old_cell: &CellId, new_cell: &CellId) -> Option<CellOrder> {
    if let Some(new_revision) = new_cell.revision {
        for event in old_cell.lineage.iter().rev() {
            if event.revision != new_revision {
                continue;
            }
            if let Some(position) = get_offset_in_cell_range(event.id, event.count, new_cell.local_id)
            {
                // `event.offset` cells of the range sort before the old
                // cell; the new cell sits at `position` within the range.
                return Some(if position < event.offset {
                    CellOrder::NewThenOld
                } else {
                    CellOrder::OldThenNew
                });
            }
        }
    }
    if let Some(old_revision) = old_cell.revision {
        for event in new_cell.lineage.iter().rev() {
            if event.revision != old_revision {
                continue;
            }
            if let Some(position) = get_offset_in_cell_range(event.id, event.count, old_cell.local_id)
            {
                return Some(if position < event.offset {
                    CellOrder::OldThenNew
                } else {
                    CellOrder::NewThenOld
                });
            }
        }
    }
    match compare_lineages(old_cell, new_cell) {
        Ordering::Less => Some(CellOrder::OldThenNew),
        Ordering::Greater => Some(CellOrder::NewThenOld),
        Ordering::Equal => None,
    }
}

/// Orders two cells using only the lineage events recorded on them.
/// Scans `cell2`'s lineage from the end for a revision `cell1` also has an
/// event for and compares the stored offsets. `Ordering::Equal` means the
/// lineage offers no evidence.
pub fn compare_lineages(cell1: &CellId, cell2: &CellId) -> Ordering {
    let mut offsets1 = BTreeMap::new();
    for event in &cell1.lineage {
        offsets1.insert(event.revision, event.offset);
    }
    for event in cell2.lineage.iter().rev() {
        if let Some(offset1) = offsets1.get(&event.revision) {
            match offset1.cmp(&event.offset) {
                Ordering::Equal => continue,
                order => return order,
            }
        }
    }
    Ordering::Equal
}

/// Whether `[id1, id1 + count1)` and `[id2, id2 + count2)` intersect.
pub fn are_overlapping_id_ranges(
    id1: ChangesetLocalId,
    count1: u32,
    id2: ChangesetLocalId,
    count2: u32,
) -> bool {
    id1 < id2 + count2 && id2 < id1 + count1
}

/// Offset of `id` within `[start, start + count)`, if it falls inside.
pub fn get_offset_in_cell_range(
    start: ChangesetLocalId,
    count: u32,
    id: ChangesetLocalId,
) -> Option<u32> {
    (id >= start && id < start + count).then(|| id - start)
}

/// Position of `id` in a list of contiguous id ranges, counting cells from
/// the front of the list.
pub fn get_position_among_adjacent_cells(
    adjacent: &[IdRange],
    id: ChangesetLocalId,
) -> Option<u32> {
    let mut position = 0u32;
    for range in adjacent {
        if let Some(offset) = get_offset_in_cell_range(range.id, range.count, id) {
            return Some(position + offset);
        }
        position += range.count;
    }
    None
}

/// Orders two cells minted by the same revision. Returns `None` when the
/// ids are distinct and no `adjacent_cells` hint covers both; the caller
/// must have other means to order them.
pub fn compare_cells_from_same_revision(cell1: &CellId, cell2: &CellId) -> Option<Ordering> {
    debug_assert_eq!(cell1.revision, cell2.revision);
    if cell1.local_id == cell2.local_id {
        return Some(Ordering::Equal);
    }
    for adjacent in [&cell1.adjacent_cells, &cell2.adjacent_cells]
        .into_iter()
        .flatten()
    {
        if let (Some(position1), Some(position2)) = (
            get_position_among_adjacent_cells(adjacent, cell1.local_id),
            get_position_among_adjacent_cells(adjacent, cell2.local_id),
        ) {
            return Some(position1.cmp(&position2));
        }
    }
    None
}
