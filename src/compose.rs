//! Composing two consecutive changesets into one.
//!
//! `compose(first, second, ..)` produces a single changeset equivalent to
//! applying `first` and then `second`, where `second` was authored against
//! the output context of `first`. The walk aligns `first`'s output cells
//! with `second`'s input cells; runs of empty cells are matched with
//! [`compare_cell_positions`], and move endpoints exchange nested changes
//! and cancellations through a [`CrossFieldTable`], re-running the pass
//! when an endpoint resolved after its pair had already been read.

use tracing::{debug, trace};

use crate::changeset::{Changeset, TaggedChange};
use crate::cross_field::{CrossFieldTable, CrossFieldTarget};
use crate::mark::algebra::{normalize_cell_rename, settle_mark, MarkListBuilder};
use crate::mark::{
    AttachAndDetach, AttachEffect, CellId, Delete, DetachEffect, Mark, MarkEffect, RevisionTag,
};
use crate::ordering::{compare_cell_positions, CellOrder, RevisionMetadataSource};
use crate::queue::MarkQueue;
use crate::rebase::MoveEffect;

/// Composes `first` then `second` into one changeset.
///
/// `compose_child` composes the two changesets' nested node-level changes
/// for the same node; it must be pure, as an invalidated pass re-runs it
/// with the same inputs.
pub fn compose<T: Clone + PartialEq>(
    first: &TaggedChange<T>,
    second: &TaggedChange<T>,
    metadata: &dyn RevisionMetadataSource,
    mut compose_child: impl FnMut(Option<&T>, Option<&T>) -> Option<T>,
) -> Changeset<T> {
    let mut table = CrossFieldTable::new();
    loop {
        let result = compose_pass(first, second, metadata, &mut compose_child, &mut table);
        if !table.is_invalidated() {
            return result;
        }
        debug!("compose pass invalidated by move pairing; re-running");
        table.reset();
    }
}

fn compose_pass<T: Clone + PartialEq>(
    first: &TaggedChange<T>,
    second: &TaggedChange<T>,
    metadata: &dyn RevisionMetadataSource,
    compose_child: &mut impl FnMut(Option<&T>, Option<&T>) -> Option<T>,
    table: &mut CrossFieldTable<MoveEffect<T>>,
) -> Changeset<T> {
    let first_knowledge = first.knowledge();
    let second_knowledge = second.knowledge();
    let mut first_queue = MarkQueue::new(&first.change.marks);
    let mut second_queue = MarkQueue::new(&second.change.marks);
    let mut output: Vec<Mark<T>> = Vec::new();

    loop {
        let (first_empty_output, second_empty_input) =
            match (first_queue.peek(), second_queue.peek()) {
                (None, None) => break,
                (Some(_), None) => {
                    let mark = first_queue.pop().expect("peeked mark");
                    output.push(render_first(mark, first, compose_child, table));
                    continue;
                }
                (None, Some(_)) => {
                    let mark = second_queue.pop().expect("peeked mark");
                    output.push(render_second(mark, second));
                    continue;
                }
                (Some(first_mark), Some(second_mark)) => (
                    first_mark.output_cells_empty(),
                    second_mark.input_cells_empty(),
                ),
            };
        match (first_empty_output, second_empty_input) {
            // First's cells end up empty; second does not describe them.
            (true, false) => {
                let mark = first_queue.pop().expect("peeked mark");
                output.push(render_first(mark, first, compose_child, table));
            }
            // Second acts on empty cells first leaves alone.
            (false, true) => {
                let mark = second_queue.pop().expect("peeked mark");
                output.push(render_second(mark, second));
            }
            (false, false) => {
                let length = first_queue
                    .peek()
                    .map(|m| m.count)
                    .expect("peeked mark")
                    .min(second_queue.peek().map(|m| m.count).expect("peeked mark"));
                let first_mark = first_queue.pop_up_to(length).expect("peeked mark");
                let second_mark = second_queue.pop_up_to(length).expect("peeked mark");
                output.push(compose_filled(
                    first_mark,
                    second_mark,
                    first,
                    second,
                    compose_child,
                    table,
                ));
            }
            (true, true) => {
                let first_cell = first_queue
                    .peek()
                    .and_then(|m| m.output_cell_id(first.revision))
                    .expect("empty output cells carry a cell id");
                let second_cell = second_queue
                    .peek()
                    .and_then(|m| m.input_cell_id(second.revision))
                    .expect("empty input cells carry a cell id");
                match compare_cell_positions(
                    &first_cell,
                    &second_cell,
                    &first_knowledge,
                    &second_knowledge,
                    metadata,
                ) {
                    CellOrder::SameCell => {
                        let length = first_queue
                            .peek()
                            .map(|m| m.count)
                            .expect("peeked mark")
                            .min(second_queue.peek().map(|m| m.count).expect("peeked mark"));
                        let first_mark = first_queue.pop_up_to(length).expect("peeked mark");
                        let second_mark = second_queue.pop_up_to(length).expect("peeked mark");
                        output.push(compose_same_cells(
                            first_mark,
                            second_mark,
                            first,
                            second,
                            compose_child,
                            table,
                        ));
                    }
                    CellOrder::OldThenNew => {
                        let mark = first_queue.pop().expect("peeked mark");
                        output.push(render_first(mark, first, compose_child, table));
                    }
                    CellOrder::NewThenOld => {
                        let mark = second_queue.pop().expect("peeked mark");
                        output.push(render_second(mark, second));
                    }
                }
            }
        }
    }

    trace!(marks = output.len(), "compose pass complete");
    let mut builder = MarkListBuilder::new();
    for mark in output {
        builder.push(settle_mark(&mark, None));
    }
    builder.build()
}

/// Composes marks over content that exists in the intermediate context:
/// first's output cells and second's input cells are both filled.
fn compose_filled<T: Clone + PartialEq>(
    first_mark: Mark<T>,
    second_mark: Mark<T>,
    first: &TaggedChange<T>,
    second: &TaggedChange<T>,
    compose_child: &mut impl FnMut(Option<&T>, Option<&T>) -> Option<T>,
    table: &mut CrossFieldTable<MoveEffect<T>>,
) -> Mark<T> {
    let count = first_mark.count;
    let cell_id = first_mark.input_cell_id(first.revision);
    let changes = compose_child(first_mark.changes.as_ref(), second_mark.changes.as_ref());

    // Nested changes on moved-in content belong at the move's source mark,
    // which addresses the content's position in the composite input.
    let changes = if let MarkEffect::MoveIn(move_in) = &first_mark.effect {
        if changes.is_some() {
            let revision = move_in.revision.or(first.revision);
            table.set(
                CrossFieldTarget::Source,
                revision,
                move_in.id,
                count,
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

    let first_effect = stamp_revision(first_mark.effect, first.revision);
    let second_effect = stamp_revision(second_mark.effect, second.revision);
    let mark = match (first_effect, second_effect) {
        (effect, MarkEffect::NoOp) => Mark {
            count,
            cell_id,
            changes,
            effect,
        },
        (MarkEffect::NoOp, effect) => Mark {
            count,
            cell_id: None,
            changes,
            effect,
        },
        // Attached by first, detached by second: the content is transient
        // in the composite, but its cells and their provenance remain.
        (attach, detach) => {
            let attach = as_attach(attach);
            let detach = as_detach(detach);
            // A move-in keeps the paired form so its source endpoint stays
            // paired; everything else folds to a rename where possible.
            let keep_pair = matches!(attach, AttachEffect::MoveIn(_));
            let mark = Mark {
                count,
                cell_id,
                changes,
                effect: MarkEffect::AttachAndDetach(AttachAndDetach { attach, detach }),
            };
            if keep_pair {
                mark
            } else {
                normalize_cell_rename(&mark)
            }
        }
    };
    resolve_cancelled_destination(mark, table)
}

/// Composes marks addressing the very same empty intermediate cells:
/// first's output cells and second's input cells share an identity.
fn compose_same_cells<T: Clone + PartialEq>(
    first_mark: Mark<T>,
    second_mark: Mark<T>,
    first: &TaggedChange<T>,
    second: &TaggedChange<T>,
    compose_child: &mut impl FnMut(Option<&T>, Option<&T>) -> Option<T>,
    table: &mut CrossFieldTable<MoveEffect<T>>,
) -> Mark<T> {
    let count = first_mark.count;
    let changes = compose_child(first_mark.changes.as_ref(), second_mark.changes.as_ref());
    let cell_id = first_mark.input_cell_id(first.revision);
    let second_fills = !second_mark.output_cells_empty();
    let first_empties = first_mark.empties_cells();
    let second_output_cell = second_mark.output_cell_id(second.revision);
    let first_effect = stamp_revision(first_mark.effect, first.revision);
    let second_effect = stamp_revision(second_mark.effect, second.revision);

    if second_fills {
        // Second revives the cells first emptied or left empty.
        if first_empties {
            // Detach then revive cancel out; the content never leaves the
            // composite's input context.
            if let MarkEffect::MoveOut(move_out) = &first_effect {
                table.set(
                    CrossFieldTarget::Destination,
                    move_out.revision,
                    move_out.id,
                    count,
                    MoveEffect {
                        changes: None,
                        cancelled: true,
                    },
                    true,
                );
            }
            return Mark {
                count,
                cell_id: None,
                changes,
                effect: MarkEffect::NoOp,
            };
        }
        return Mark {
            count,
            cell_id,
            changes,
            effect: second_effect,
        };
    }

    match second_effect {
        // Second only records the cells as empty; first's account stands.
        MarkEffect::NoOp => Mark {
            count,
            cell_id,
            changes,
            effect: first_effect,
        },
        second_effect => {
            let redirect = second_output_cell.expect("detach must produce an output cell id");
            if matches!(first_effect, MarkEffect::NoOp) {
                // Second re-detaches cells first merely observed.
                Mark {
                    count,
                    cell_id,
                    changes,
                    effect: second_effect,
                }
            } else {
                // Both detach: first's detach wins, its output redirected
                // to the identity second gave the cells.
                Mark {
                    count,
                    cell_id,
                    changes,
                    effect: redirect_detach(first_effect, redirect),
                }
            }
        }
    }
}

/// First's contribution for cells second does not describe.
fn render_first<T: Clone + PartialEq>(
    mark: Mark<T>,
    first: &TaggedChange<T>,
    compose_child: &mut impl FnMut(Option<&T>, Option<&T>) -> Option<T>,
    table: &mut CrossFieldTable<MoveEffect<T>>,
) -> Mark<T> {
    let cell_id = mark.input_cell_id(first.revision);
    let effect = stamp_revision(mark.effect, first.revision);
    let mut changes = mark.changes;
    // Changes second made at the move's destination surface here, at the
    // content's position in the composite input.
    if let MarkEffect::MoveOut(move_out) = &effect {
        if let Some(entry) = table.get(
            CrossFieldTarget::Source,
            move_out.revision,
            move_out.id,
            mark.count,
            true,
        ) {
            if entry.id == move_out.id {
                changes = compose_child(changes.as_ref(), entry.value.changes.as_ref());
            }
        }
    }
    let rendered = Mark {
        count: mark.count,
        cell_id,
        changes,
        effect,
    };
    resolve_cancelled_destination(rendered, table)
}

/// Second's contribution for cells first does not describe.
fn render_second<T: Clone>(mark: Mark<T>, second: &TaggedChange<T>) -> Mark<T> {
    let cell_id = mark.input_cell_id(second.revision);
    Mark {
        count: mark.count,
        cell_id,
        changes: mark.changes,
        effect: stamp_revision(mark.effect, second.revision),
    }
}

/// Converts a move-in whose content was reclaimed at the source into a
/// transient attach: the destination cells exist but stay empty.
fn resolve_cancelled_destination<T: Clone + PartialEq>(
    mut mark: Mark<T>,
    table: &mut CrossFieldTable<MoveEffect<T>>,
) -> Mark<T> {
    if let MarkEffect::MoveIn(move_in) = &mark.effect {
        let cancelled = table
            .get(
                CrossFieldTarget::Destination,
                move_in.revision,
                move_in.id,
                mark.count,
                true,
            )
            .is_some_and(|entry| entry.id == move_in.id && entry.value.cancelled);
        if cancelled {
            mark.effect = MarkEffect::AttachAndDetach(AttachAndDetach {
                attach: AttachEffect::MoveIn(move_in.clone()),
                detach: DetachEffect::Delete(Delete {
                    id: move_in.id,
                    revision: move_in.revision,
                    id_override: None,
                }),
            });
        }
    }
    mark
}

/// Stamps an inherited revision into the effect so identities survive
/// outside the owning tagged change.
fn stamp_revision(effect: MarkEffect, revision: Option<RevisionTag>) -> MarkEffect {
    if revision.is_none() {
        return effect;
    }
    match effect {
        MarkEffect::NoOp => MarkEffect::NoOp,
        MarkEffect::Insert(mut e) => {
            e.revision = e.revision.or(revision);
            MarkEffect::Insert(e)
        }
        MarkEffect::Delete(mut e) => {
            e.revision = e.revision.or(revision);
            MarkEffect::Delete(e)
        }
        MarkEffect::MoveIn(mut e) => {
            e.revision = e.revision.or(revision);
            MarkEffect::MoveIn(e)
        }
        MarkEffect::MoveOut(mut e) => {
            e.revision = e.revision.or(revision);
            MarkEffect::MoveOut(e)
        }
        MarkEffect::AttachAndDetach(pair) => {
            let attach = match pair.attach {
                AttachEffect::Insert(mut e) => {
                    e.revision = e.revision.or(revision);
                    AttachEffect::Insert(e)
                }
                AttachEffect::MoveIn(mut e) => {
                    e.revision = e.revision.or(revision);
                    AttachEffect::MoveIn(e)
                }
            };
            let detach = match pair.detach {
                DetachEffect::Delete(mut e) => {
                    e.revision = e.revision.or(revision);
                    DetachEffect::Delete(e)
                }
                DetachEffect::MoveOut(mut e) => {
                    e.revision = e.revision.or(revision);
                    DetachEffect::MoveOut(e)
                }
            };
            MarkEffect::AttachAndDetach(AttachAndDetach { attach, detach })
        }
    }
}

/// Points a detach's output at `target` instead of its own fresh identity.
fn redirect_detach(effect: MarkEffect, target: CellId) -> MarkEffect {
    match effect {
        MarkEffect::Delete(mut e) => {
            e.id_override = Some(target);
            MarkEffect::Delete(e)
        }
        MarkEffect::MoveOut(mut e) => {
            e.id_override = Some(target);
            MarkEffect::MoveOut(e)
        }
        MarkEffect::AttachAndDetach(AttachAndDetach { attach, detach }) => {
            let detach = match detach {
                DetachEffect::Delete(mut e) => {
                    e.id_override = Some(target);
                    DetachEffect::Delete(e)
                }
                DetachEffect::MoveOut(mut e) => {
                    e.id_override = Some(target);
                    DetachEffect::MoveOut(e)
                }
            };
            MarkEffect::AttachAndDetach(AttachAndDetach { attach, detach })
        }
        effect => effect,
    }
}

fn as_attach(effect: MarkEffect) -> AttachEffect {
    match effect {
        MarkEffect::Insert(e) => AttachEffect::Insert(e),
        MarkEffect::MoveIn(e) => AttachEffect::MoveIn(e),
        _ => unreachable!("marks with filled output cells attach content"),
    }
}

fn as_detach(effect: MarkEffect) -> DetachEffect {
    match effect {
        MarkEffect::Delete(e) => DetachEffect::Delete(e),
        MarkEffect::MoveOut(e) => DetachEffect::MoveOut(e),
        _ => unreachable!("marks with empty output cells detach content"),
    }
}
