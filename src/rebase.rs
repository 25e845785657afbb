//! Rebasing a changeset over a concurrent change.
//!
//! `rebase(change, base, ..)` rewrites `change`, authored against some
//! input context, so that it applies to the context produced by `base`,
//! which was authored against that same input context but sequenced first.
//! The output walks both mark lists once per pass, aligning spans with
//! [`MarkQueue`] and ordering empty-cell runs with
//! [`compare_cell_positions`]; move pairs communicate through a fresh
//! [`CrossFieldTable`], and the pass re-runs when the table reports that a
//! pair was resolved after its counterpart had already been read.

use tracing::{debug, trace};

use crate::changeset::{Changeset, TaggedChange};
use crate::cross_field::{CrossFieldTable, CrossFieldTarget};
use crate::mark::algebra::{settle_mark, MarkListBuilder};
use crate::mark::{
    ChangesetLocalId, Delete, LineageEvent, Mark, MarkEffect, RevisionTag,
};
use crate::ordering::{compare_cell_positions, CellOrder, RevisionMetadataSource};
use crate::queue::MarkQueue;

/// What one endpoint of a move records for its pair to find.
#[derive(Debug, Clone, PartialEq)]
pub struct MoveEffect<T> {
    /// Nested changes that travel with the moved content.
    pub changes: Option<T>,
    /// The paired endpoint was eliminated; the surviving endpoint becomes
    /// a plain detach.
    pub cancelled: bool,
}

impl<T> Default for MoveEffect<T> {
    fn default() -> Self {
        Self {
            changes: None,
            cancelled: false,
        }
    }
}

/// A run of cells detached by the base change, remembered so that empty
/// cells passing by it gain lineage evidence.
#[derive(Debug, Clone, Copy)]
struct DetachBlock {
    step: usize,
    revision: RevisionTag,
    id: ChangesetLocalId,
    count: u32,
}

/// Rebases `change` over `base`.
///
/// `rebase_child` rebases a nested node-level change over the base's
/// nested change for the same node; it must be pure, as an invalidated
/// pass re-runs it with the same inputs.
pub fn rebase<T: Clone + PartialEq>(
    change: &TaggedChange<T>,
    base: &TaggedChange<T>,
    metadata: &dyn RevisionMetadataSource,
    mut rebase_child: impl FnMut(Option<&T>, Option<&T>) -> Option<T>,
) -> Changeset<T> {
    let mut table = CrossFieldTable::new();
    loop {
        let result = rebase_pass(change, base, metadata, &mut rebase_child, &mut table);
        if !table.is_invalidated() {
            return result;
        }
        debug!("rebase pass invalidated by move pairing; re-running");
        table.reset();
    }
}

fn rebase_pass<T: Clone + PartialEq>(
    change: &TaggedChange<T>,
    base: &TaggedChange<T>,
    metadata: &dyn RevisionMetadataSource,
    rebase_child: &mut impl FnMut(Option<&T>, Option<&T>) -> Option<T>,
    table: &mut CrossFieldTable<MoveEffect<T>>,
) -> Changeset<T> {
    let change_knowledge = change.knowledge();
    let base_knowledge = base.knowledge();
    let mut curr_queue = MarkQueue::new(&change.change.marks);
    let mut base_queue = MarkQueue::new(&base.change.marks);
    let mut output: Vec<(usize, Mark<T>)> = Vec::new();
    let mut detaches: Vec<DetachBlock> = Vec::new();
    let mut step = 0usize;

    loop {
        step += 1;
        let (base_empty_input, curr_empty_input) = match (base_queue.peek(), curr_queue.peek()) {
            (None, None) => break,
            (None, Some(_)) => {
                let mark = curr_queue.pop().expect("peeked mark");
                output.push((step, rebase_over_nothing(mark, change, table)));
                continue;
            }
            (Some(_), None) => {
                let mark = base_queue.pop().expect("peeked mark");
                output.push((step, represent_base_mark(mark, base, step, &mut detaches, table)));
                continue;
            }
            (Some(base_mark), Some(curr_mark)) => (
                base_mark.input_cells_empty(),
                curr_mark.input_cells_empty(),
            ),
        };
        match (base_empty_input, curr_empty_input) {
            (false, false) => {
                let length = base_queue
                    .peek()
                    .map(|m| m.count)
                    .expect("peeked mark")
                    .min(curr_queue.peek().map(|m| m.count).expect("peeked mark"));
                let base_mark = base_queue.pop_up_to(length).expect("peeked mark");
                let curr_mark = curr_queue.pop_up_to(length).expect("peeked mark");
                output.push((
                    step,
                    rebase_aligned_filled(
                        curr_mark,
                        base_mark,
                        change,
                        base,
                        step,
                        &mut detaches,
                        rebase_child,
                        table,
                    ),
                ));
            }
            (true, false) => {
                let mark = base_queue.pop().expect("peeked mark");
                output.push((step, represent_base_mark(mark, base, step, &mut detaches, table)));
            }
            (false, true) => {
                let mark = curr_queue.pop().expect("peeked mark");
                output.push((step, rebase_over_nothing(mark, change, table)));
            }
            (true, true) => {
                let base_cell = base_queue
                    .peek()
                    .and_then(|m| m.input_cell_id(base.revision))
                    .expect("empty input cells carry a cell id");
                let curr_cell = curr_queue
                    .peek()
                    .and_then(|m| m.input_cell_id(change.revision))
                    .expect("empty input cells carry a cell id");
                match compare_cell_positions(
                    &base_cell,
                    &curr_cell,
                    &base_knowledge,
                    &change_knowledge,
                    metadata,
                ) {
                    CellOrder::SameCell => {
                        let length = base_queue
                            .peek()
                            .map(|m| m.count)
                            .expect("peeked mark")
                            .min(curr_queue.peek().map(|m| m.count).expect("peeked mark"));
                        let base_mark = base_queue.pop_up_to(length).expect("peeked mark");
                        let curr_mark = curr_queue.pop_up_to(length).expect("peeked mark");
                        output.push((
                            step,
                            rebase_same_cells(
                                curr_mark,
                                base_mark,
                                change,
                                base,
                                step,
                                &mut detaches,
                                rebase_child,
                                table,
                            ),
                        ));
                    }
                    CellOrder::OldThenNew => {
                        let mark = base_queue.pop().expect("peeked mark");
                        output
                            .push((step, represent_base_mark(mark, base, step, &mut detaches, table)));
                    }
                    CellOrder::NewThenOld => {
                        let mark = curr_queue.pop().expect("peeked mark");
                        output.push((step, rebase_over_nothing(mark, change, table)));
                    }
                }
            }
        }
    }

    trace!(
        marks = output.len(),
        detach_blocks = detaches.len(),
        "rebase pass complete"
    );
    add_lineage(&mut output, &detaches);
    let mut builder = MarkListBuilder::new();
    for (_, mark) in output {
        builder.push(settle_mark(&mark, change.revision));
    }
    builder.build()
}

/// The rebased representation of cells only the base change describes:
/// a skip for cells the base fills, a tombstone for cells it leaves or
/// makes empty.
fn represent_base_mark<T: Clone + PartialEq>(
    mark: Mark<T>,
    base: &TaggedChange<T>,
    step: usize,
    detaches: &mut Vec<DetachBlock>,
    table: &mut CrossFieldTable<MoveEffect<T>>,
) -> Mark<T> {
    if mark.empties_cells() {
        record_detach(&mark, base, step, detaches);
    }
    match mark.output_cell_id(base.revision) {
        Some(cell) => Mark::tombstone(mark.count, cell),
        None => {
            let mut skip = Mark::skip(mark.count);
            // Changes that travelled with moved-in content land here.
            if let MarkEffect::MoveIn(move_in) = &mark.effect {
                let revision = move_in.revision.or(base.revision);
                if let Some(entry) = table.get(
                    CrossFieldTarget::Destination,
                    revision,
                    move_in.id,
                    mark.count,
                    true,
                ) {
                    if entry.id == move_in.id {
                        skip.changes = entry.value.changes;
                    }
                }
            }
            skip
        }
    }
}

/// Rebases a mark over no base counterpart: the cells it addresses are
/// unknown to the base and stay where they are.
fn rebase_over_nothing<T: Clone + PartialEq>(
    mark: Mark<T>,
    change: &TaggedChange<T>,
    table: &mut CrossFieldTable<MoveEffect<T>>,
) -> Mark<T> {
    resolve_cancelled_move(mark, change, table)
}

#[allow(clippy::too_many_arguments)]
fn rebase_aligned_filled<T: Clone + PartialEq>(
    curr_mark: Mark<T>,
    base_mark: Mark<T>,
    change: &TaggedChange<T>,
    base: &TaggedChange<T>,
    step: usize,
    detaches: &mut Vec<DetachBlock>,
    rebase_child: &mut impl FnMut(Option<&T>, Option<&T>) -> Option<T>,
    table: &mut CrossFieldTable<MoveEffect<T>>,
) -> Mark<T> {
    let changes = rebase_child(curr_mark.changes.as_ref(), base_mark.changes.as_ref());
    if !base_mark.empties_cells() {
        // Base leaves the content in place.
        let mut rebased = curr_mark;
        rebased.changes = changes;
        return resolve_cancelled_move(rebased, change, table);
    }
    record_detach(&base_mark, base, step, detaches);
    let cell = base_mark
        .output_cell_id(base.revision)
        .expect("detach must produce an output cell id");
    let (effect, changes) = match curr_mark.effect {
        MarkEffect::NoOp => (MarkEffect::NoOp, changes),
        MarkEffect::Delete(delete) => (
            // Deleting content the base already removed: same input and
            // output identity, settled to a tombstone below.
            MarkEffect::Delete(Delete {
                id_override: Some(cell.clone()),
                ..delete
            }),
            changes,
        ),
        MarkEffect::MoveOut(move_out) => (MarkEffect::MoveOut(move_out), changes),
        MarkEffect::Insert(_) | MarkEffect::MoveIn(_) | MarkEffect::AttachAndDetach(_) => {
            unreachable!("attach marks have empty input cells")
        }
    };
    // Changes on content the base moved follow it to the destination.
    let changes = if let MarkEffect::MoveOut(base_move) = &base_mark.effect {
        if changes.is_some() {
            let revision = base_move.revision.or(base.revision);
            table.set(
                CrossFieldTarget::Destination,
                revision,
                base_move.id,
                base_mark.count,
                MoveEffect {
                    changes,
                    cancelled: false,
                },
                true,
            );
        }
        None
    } else {
        changes
    };
    let rebased = Mark {
        count: curr_mark.count,
        cell_id: Some(cell),
        changes,
        effect,
    };
    resolve_cancelled_move(rebased, change, table)
}

/// Rebases a mark over a base mark addressing the very same empty cells.
#[allow(clippy::too_many_arguments)]
fn rebase_same_cells<T: Clone + PartialEq>(
    curr_mark: Mark<T>,
    base_mark: Mark<T>,
    change: &TaggedChange<T>,
    base: &TaggedChange<T>,
    step: usize,
    detaches: &mut Vec<DetachBlock>,
    rebase_child: &mut impl FnMut(Option<&T>, Option<&T>) -> Option<T>,
    table: &mut CrossFieldTable<MoveEffect<T>>,
) -> Mark<T> {
    let changes = rebase_child(curr_mark.changes.as_ref(), base_mark.changes.as_ref());
    if base_mark.empties_cells() {
        record_detach(&base_mark, base, step, detaches);
    }
    let new_cell = base_mark.output_cell_id(base.revision);
    let effect = match (new_cell.is_some(), curr_mark.effect) {
        // Base filled the cells: a curr attach is now redundant, a curr
        // detach now acts on real content.
        (false, MarkEffect::Insert(_)) => MarkEffect::NoOp,
        (false, MarkEffect::MoveIn(move_in)) => {
            let revision = move_in.revision.or(change.revision);
            table.set(
                CrossFieldTarget::Source,
                revision,
                move_in.id,
                curr_mark.count,
                MoveEffect {
                    changes: None,
                    cancelled: true,
                },
                true,
            );
            MarkEffect::NoOp
        }
        (false, MarkEffect::AttachAndDetach(pair)) => pair.detach.into(),
        (false, effect) => effect,
        // Base left or renamed the cells; the curr effect still applies,
        // readdressed to the cells' current identity.
        (true, effect) => effect,
    };
    let rebased = Mark {
        count: curr_mark.count,
        cell_id: new_cell,
        changes,
        effect,
    };
    resolve_cancelled_move(rebased, change, table)
}

/// Converts a move-out whose destination was eliminated into a delete.
fn resolve_cancelled_move<T: Clone + PartialEq>(
    mut mark: Mark<T>,
    change: &TaggedChange<T>,
    table: &mut CrossFieldTable<MoveEffect<T>>,
) -> Mark<T> {
    if let MarkEffect::MoveOut(move_out) = &mark.effect {
        let revision = move_out.revision.or(change.revision);
        let cancelled = table
            .get(
                CrossFieldTarget::Source,
                revision,
                move_out.id,
                mark.count,
                true,
            )
            .is_some_and(|entry| entry.id == move_out.id && entry.value.cancelled);
        if cancelled {
            mark.effect = MarkEffect::Delete(Delete {
                id: move_out.id,
                revision: move_out.revision,
                id_override: move_out.id_override.clone(),
            });
        }
    }
    mark
}

fn record_detach<T>(
    mark: &Mark<T>,
    base: &TaggedChange<T>,
    step: usize,
    detaches: &mut Vec<DetachBlock>,
) {
    let Some(cell) = mark.output_cell_id(base.revision) else {
        return;
    };
    // Lineage events name a concrete revision; an anonymous base detach
    // leaves no usable evidence.
    let Some(revision) = cell.revision else {
        return;
    };
    detaches.push(DetachBlock {
        step,
        revision,
        id: cell.local_id,
        count: mark.count,
    });
}

/// Gives every surviving empty cell lineage evidence against the base's
/// detached ranges, so later reconciliations can order cells that share no
/// tombstone knowledge.
fn add_lineage<T>(output: &mut [(usize, Mark<T>)], detaches: &[DetachBlock]) {
    for (step, mark) in output.iter_mut() {
        let Some(cell) = mark.cell_id.as_mut() else {
            continue;
        };
        for block in detaches {
            if cell.revision == Some(block.revision) {
                continue;
            }
            if cell
                .lineage
                .iter()
                .any(|event| event.revision == block.revision)
            {
                continue;
            }
            let offset = if *step < block.step { 0 } else { block.count };
            cell.lineage.push(LineageEvent {
                revision: block.revision,
                id: block.id,
                count: block.count,
                offset,
            });
        }
    }
}
