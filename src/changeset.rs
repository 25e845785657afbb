//! Changesets: ordered mark lists spanning one field edit.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::mark::algebra::MarkListBuilder;
use crate::mark::{
    AttachAndDetach, AttachEffect, CellId, ChangesetLocalId, Delete, DetachEffect, Insert, Mark,
    MarkEffect, MoveId, MoveIn, MoveOut, RevisionTag,
};

/// One edit to a sequence field, as an ordered list of marks whose
/// cumulative counts span the field's full input (equivalently output)
/// length. Marks cover disjoint contiguous runs; order is input-context
/// position order except for content a mark itself creates, which sits at
/// its output-context position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Changeset<T> {
    pub marks: Vec<Mark<T>>,
}

impl<T> Changeset<T> {
    pub fn empty() -> Self {
        Self { marks: Vec::new() }
    }

    pub fn from_marks(marks: Vec<Mark<T>>) -> Self {
        Self { marks }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Mark<T>> {
        self.marks.iter()
    }

    /// Length of the field this changeset applies to.
    pub fn input_length(&self) -> u32 {
        self.marks.iter().map(Mark::input_length).sum()
    }

    /// Length of the field after this changeset applies.
    pub fn output_length(&self) -> u32 {
        self.marks.iter().map(Mark::output_length).sum()
    }

    /// Every revision this changeset carries marks or tombstones for.
    /// Lineage is hearsay about other revisions' cells and does not count.
    pub fn revision_knowledge(&self, own: Option<RevisionTag>) -> BTreeSet<RevisionTag> {
        let mut knowledge = BTreeSet::new();
        knowledge.extend(own);
        for mark in &self.marks {
            if let Some(cell) = &mark.cell_id {
                knowledge.extend(cell.revision);
            }
            knowledge.extend(self.mark_effect_revisions(mark));
        }
        knowledge
    }

    fn mark_effect_revisions(&self, mark: &Mark<T>) -> Vec<RevisionTag> {
        let mut revisions = Vec::new();
        match &mark.effect {
            MarkEffect::NoOp => {}
            MarkEffect::Insert(e) => revisions.extend(e.revision),
            MarkEffect::Delete(e) => revisions.extend(e.revision),
            MarkEffect::MoveIn(e) => revisions.extend(e.revision),
            MarkEffect::MoveOut(e) => revisions.extend(e.revision),
            MarkEffect::AttachAndDetach(e) => {
                revisions.extend(e.attach.revision());
                revisions.extend(e.detach.revision());
            }
        }
        revisions
    }
}

impl<'a, T> IntoIterator for &'a Changeset<T> {
    type Item = &'a Mark<T>;
    type IntoIter = std::slice::Iter<'a, Mark<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.marks.iter()
    }
}

/// A changeset together with its revision identity.
///
/// `revision: None` marks an anonymous changeset (a local edit not yet
/// sequenced). `rollback_of` is set on changesets that undo a prior
/// revision; the detached-node tracker uses it to attribute detach
/// identities when the marks themselves carry none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaggedChange<T> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<RevisionTag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_of: Option<RevisionTag>,
    pub change: Changeset<T>,
}

impl<T> TaggedChange<T> {
    pub fn tagged(revision: RevisionTag, change: Changeset<T>) -> Self {
        Self {
            revision: Some(revision),
            rollback_of: None,
            change,
        }
    }

    pub fn anonymous(change: Changeset<T>) -> Self {
        Self {
            revision: None,
            rollback_of: None,
            change,
        }
    }

    pub fn rollback(revision: RevisionTag, rolled_back: RevisionTag, change: Changeset<T>) -> Self {
        Self {
            revision: Some(revision),
            rollback_of: Some(rolled_back),
            change,
        }
    }

    pub fn knowledge(&self) -> BTreeSet<RevisionTag> {
        self.change.revision_knowledge(self.revision)
    }
}

/// Source of local ids unique within one changeset. The core never invents
/// global identifiers; fresh ids are always drawn from an injected
/// allocator.
pub trait IdAllocator {
    /// Reserves `count` consecutive ids and returns the first.
    fn allocate(&mut self, count: u32) -> ChangesetLocalId;
}

#[derive(Debug, Clone, Default)]
pub struct SequentialIdAllocator {
    next: ChangesetLocalId,
}

impl SequentialIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(next: ChangesetLocalId) -> Self {
        Self { next }
    }
}

impl IdAllocator for SequentialIdAllocator {
    fn allocate(&mut self, count: u32) -> ChangesetLocalId {
        let id = self.next;
        self.next += count;
        id
    }
}

/// Builds a normalized changeset for a local edit, drawing ids from the
/// given allocator. Marks are emitted in field position order.
pub struct ChangesetBuilder<'a, T> {
    marks: MarkListBuilder<T>,
    allocator: &'a mut dyn IdAllocator,
}

impl<'a, T: Clone> ChangesetBuilder<'a, T> {
    pub fn new(allocator: &'a mut dyn IdAllocator) -> Self {
        Self {
            marks: MarkListBuilder::new(),
            allocator,
        }
    }

    /// Leaves `count` cells untouched.
    pub fn skip(&mut self, count: u32) -> &mut Self {
        self.marks.push(Mark::skip(count));
        self
    }

    /// Records `count` empty cells without acting on them.
    pub fn tombstone(&mut self, count: u32, cell_id: CellId) -> &mut Self {
        self.marks.push(Mark::tombstone(count, cell_id));
        self
    }

    /// Inserts `count` new cells and fills them.
    pub fn insert(&mut self, count: u32) -> &mut Self {
        let id = self.allocator.allocate(count);
        self.marks.push(
            Mark::new(count, MarkEffect::Insert(Insert { id, revision: None }))
                .with_cell_id(CellId::new(None, id)),
        );
        self
    }

    /// Revives `count` previously detached cells.
    pub fn revive(&mut self, count: u32, cell_id: CellId) -> &mut Self {
        let id = self.allocator.allocate(count);
        self.marks.push(
            Mark::new(count, MarkEffect::Insert(Insert { id, revision: None }))
                .with_cell_id(cell_id),
        );
        self
    }

    /// Deletes the next `count` filled cells.
    pub fn delete(&mut self, count: u32) -> &mut Self {
        let id = self.allocator.allocate(count);
        self.marks.push(Mark::new(
            count,
            MarkEffect::Delete(Delete {
                id,
                revision: None,
                id_override: None,
            }),
        ));
        self
    }

    /// Emits the source half of a move; the returned id pairs it with a
    /// later [`move_in`](Self::move_in).
    pub fn move_out(&mut self, count: u32) -> MoveId {
        let id = self.allocator.allocate(count);
        self.marks.push(Mark::new(
            count,
            MarkEffect::MoveOut(MoveOut {
                id,
                revision: None,
                final_endpoint: None,
                id_override: None,
            }),
        ));
        id
    }

    /// Emits the destination half of a move pair.
    pub fn move_in(&mut self, count: u32, id: MoveId) -> &mut Self {
        self.marks.push(
            Mark::new(
                count,
                MarkEffect::MoveIn(MoveIn {
                    id,
                    revision: None,
                    final_endpoint: None,
                }),
            )
            .with_cell_id(CellId::new(None, id)),
        );
        self
    }

    /// Attaches nested node changes to the next single cell.
    pub fn modify(&mut self, changes: T) -> &mut Self {
        self.marks.push(Mark::skip(1).with_changes(changes));
        self
    }

    pub fn build(self) -> Changeset<T> {
        self.marks.build()
    }
}

/// Structural problems in a changeset received from an untrusted source.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChangesetError {
    #[error("mark with zero count")]
    EmptyMark,
    #[error("nested changes on a mark spanning {count} cells")]
    UnsplittableChanges { count: u32 },
    #[error("attach-and-detach mark without a cell id")]
    MissingCellId,
    #[error("move endpoint {id} has no pair of matching length")]
    UnpairedMove { id: MoveId },
    #[error("lineage event with empty range")]
    EmptyLineageRange,
    #[error("lineage offset {offset} exceeds range count {count}")]
    LineageOffsetOutOfRange { offset: u32, count: u32 },
}

/// Checks structural well-formedness: positive counts, paired moves of
/// matching length, sane lineage. Semantic validity against a peer's state
/// is the reconciliation algorithms' concern, not this function's.
pub fn validate_changeset<T>(changeset: &Changeset<T>) -> Result<(), ChangesetError> {
    // Unit-granular so that unevenly split pairs still match up.
    let mut sources: BTreeSet<(Option<RevisionTag>, MoveId)> = BTreeSet::new();
    let mut destinations: BTreeSet<(Option<RevisionTag>, MoveId)> = BTreeSet::new();
    for mark in changeset {
        if mark.count == 0 {
            return Err(ChangesetError::EmptyMark);
        }
        // Nested changes cannot be split, so reconciliation can only align
        // spans around them when they sit on single-cell marks.
        if mark.count > 1 && mark.changes.is_some() {
            return Err(ChangesetError::UnsplittableChanges { count: mark.count });
        }
        if let Some(cell) = &mark.cell_id {
            for event in &cell.lineage {
                if event.count == 0 {
                    return Err(ChangesetError::EmptyLineageRange);
                }
                if event.offset > event.count {
                    return Err(ChangesetError::LineageOffsetOutOfRange {
                        offset: event.offset,
                        count: event.count,
                    });
                }
            }
        }
        match &mark.effect {
            MarkEffect::NoOp
            | MarkEffect::Insert(_)
            | MarkEffect::Delete(_) => {}
            MarkEffect::MoveIn(e) => {
                destinations.extend((0..mark.count).map(|i| (e.revision, e.id + i)));
            }
            MarkEffect::MoveOut(e) => {
                sources.extend((0..mark.count).map(|i| (e.revision, e.id + i)));
            }
            MarkEffect::AttachAndDetach(AttachAndDetach { attach, detach }) => {
                if mark.cell_id.is_none() {
                    return Err(ChangesetError::MissingCellId);
                }
                if let AttachEffect::MoveIn(e) = attach {
                    destinations.extend((0..mark.count).map(|i| (e.revision, e.id + i)));
                }
                if let DetachEffect::MoveOut(e) = detach {
                    sources.extend((0..mark.count).map(|i| (e.revision, e.id + i)));
                }
            }
        }
    }
    if let Some(unit) = sources.symmetric_difference(&destinations).next() {
        return Err(ChangesetError::UnpairedMove { id: unit.1 });
    }
    Ok(())
}
