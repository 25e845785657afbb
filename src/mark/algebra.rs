//! Pure functions over marks: splitting, merging, normalization, impact.
//!
//! Splitting and merging are exact inverses: for any mark `m` and any
//! `1 <= k < m.count`, merging the two halves of `split_mark(&m, k)` yields
//! a mark structurally equal to `m`.

use super::{
    AttachAndDetach, AttachEffect, CellId, Delete, DetachEffect, Insert, Mark, MarkEffect, MoveIn,
    MoveOut, RevisionTag, same_cell,
};
use crate::Changeset;

/// Splits `mark` into `[head, tail]` with `head.count == length`.
///
/// The halves are structurally independent clones; mutating one never
/// affects the other or the source. Panics if `length` is not strictly
/// inside the mark, or if the mark carries nested changes (node-level
/// changes are not splittable).
pub fn split_mark<T: Clone>(mark: &Mark<T>, length: u32) -> (Mark<T>, Mark<T>) {
    assert!(
        length >= 1 && length < mark.count,
        "split length out of bounds"
    );
    assert!(mark.changes.is_none(), "unable to split a mark with changes");
    let mut head = mark.clone();
    head.count = length;
    let tail = Mark {
        count: mark.count - length,
        cell_id: mark.cell_id.as_ref().map(|cell| cell.offset(length)),
        changes: None,
        effect: split_effect_tail(&mark.effect, length),
    };
    (head, tail)
}

fn split_effect_tail(effect: &MarkEffect, length: u32) -> MarkEffect {
    match effect {
        MarkEffect::NoOp => MarkEffect::NoOp,
        MarkEffect::Insert(e) => MarkEffect::Insert(split_insert_tail(e, length)),
        MarkEffect::Delete(e) => MarkEffect::Delete(split_delete_tail(e, length)),
        MarkEffect::MoveIn(e) => MarkEffect::MoveIn(split_move_in_tail(e, length)),
        MarkEffect::MoveOut(e) => MarkEffect::MoveOut(split_move_out_tail(e, length)),
        MarkEffect::AttachAndDetach(e) => MarkEffect::AttachAndDetach(AttachAndDetach {
            attach: match &e.attach {
                AttachEffect::Insert(a) => AttachEffect::Insert(split_insert_tail(a, length)),
                AttachEffect::MoveIn(a) => AttachEffect::MoveIn(split_move_in_tail(a, length)),
            },
            detach: match &e.detach {
                DetachEffect::Delete(d) => DetachEffect::Delete(split_delete_tail(d, length)),
                DetachEffect::MoveOut(d) => DetachEffect::MoveOut(split_move_out_tail(d, length)),
            },
        }),
    }
}

fn split_insert_tail(effect: &Insert, length: u32) -> Insert {
    Insert {
        id: effect.id + length,
        revision: effect.revision,
    }
}

fn split_delete_tail(effect: &Delete, length: u32) -> Delete {
    Delete {
        id: effect.id + length,
        revision: effect.revision,
        id_override: effect.id_override.as_ref().map(|cell| cell.offset(length)),
    }
}

fn split_move_in_tail(effect: &MoveIn, length: u32) -> MoveIn {
    MoveIn {
        id: effect.id + length,
        revision: effect.revision,
        final_endpoint: effect
            .final_endpoint
            .as_ref()
            .map(|cell| cell.offset(length)),
    }
}

fn split_move_out_tail(effect: &MoveOut, length: u32) -> MoveOut {
    MoveOut {
        id: effect.id + length,
        revision: effect.revision,
        final_endpoint: effect
            .final_endpoint
            .as_ref()
            .map(|cell| cell.offset(length)),
        id_override: effect.id_override.as_ref().map(|cell| cell.offset(length)),
    }
}

/// Merges two adjacent marks into one, or returns `None` when they cannot
/// be concatenated. The exact inverse of [`split_mark`].
pub fn try_merge_marks<T: Clone>(lhs: &Mark<T>, rhs: &Mark<T>) -> Option<Mark<T>> {
    if lhs.changes.is_some() || rhs.changes.is_some() {
        // Node-level changes are opaque and not concatenable.
        return None;
    }
    let cell_id = match (&lhs.cell_id, &rhs.cell_id) {
        (None, None) => None,
        (Some(a), Some(b)) => Some(try_merge_cell_ids(a, lhs.count, b)?),
        _ => return None,
    };
    let effect = try_merge_effects(&lhs.effect, lhs.count, &rhs.effect)?;
    Some(Mark {
        count: lhs.count + rhs.count,
        cell_id,
        changes: None,
        effect,
    })
}

fn try_merge_cell_ids(lhs: &CellId, count: u32, rhs: &CellId) -> Option<CellId> {
    (lhs.revision == rhs.revision
        && rhs.local_id == lhs.local_id + count
        && lhs.lineage == rhs.lineage
        && lhs.adjacent_cells == rhs.adjacent_cells)
        .then(|| lhs.clone())
}

fn try_merge_optional_cells(
    lhs: &Option<CellId>,
    count: u32,
    rhs: &Option<CellId>,
) -> Option<Option<CellId>> {
    match (lhs, rhs) {
        (None, None) => Some(None),
        (Some(a), Some(b)) => Some(Some(try_merge_cell_ids(a, count, b)?)),
        _ => None,
    }
}

fn try_merge_effects(lhs: &MarkEffect, count: u32, rhs: &MarkEffect) -> Option<MarkEffect> {
    match (lhs, rhs) {
        (MarkEffect::NoOp, MarkEffect::NoOp) => Some(MarkEffect::NoOp),
        (MarkEffect::Insert(a), MarkEffect::Insert(b)) => {
            Some(MarkEffect::Insert(try_merge_inserts(a, count, b)?))
        }
        (MarkEffect::Delete(a), MarkEffect::Delete(b)) => {
            Some(MarkEffect::Delete(try_merge_deletes(a, count, b)?))
        }
        (MarkEffect::MoveIn(a), MarkEffect::MoveIn(b)) => {
            Some(MarkEffect::MoveIn(try_merge_move_ins(a, count, b)?))
        }
        (MarkEffect::MoveOut(a), MarkEffect::MoveOut(b)) => {
            Some(MarkEffect::MoveOut(try_merge_move_outs(a, count, b)?))
        }
        (MarkEffect::AttachAndDetach(a), MarkEffect::AttachAndDetach(b)) => {
            let attach = match (&a.attach, &b.attach) {
                (AttachEffect::Insert(x), AttachEffect::Insert(y)) => {
                    AttachEffect::Insert(try_merge_inserts(x, count, y)?)
                }
                (AttachEffect::MoveIn(x), AttachEffect::MoveIn(y)) => {
                    AttachEffect::MoveIn(try_merge_move_ins(x, count, y)?)
                }
                _ => return None,
            };
            let detach = match (&a.detach, &b.detach) {
                (DetachEffect::Delete(x), DetachEffect::Delete(y)) => {
                    DetachEffect::Delete(try_merge_deletes(x, count, y)?)
                }
                (DetachEffect::MoveOut(x), DetachEffect::MoveOut(y)) => {
                    DetachEffect::MoveOut(try_merge_move_outs(x, count, y)?)
                }
                _ => return None,
            };
            Some(MarkEffect::AttachAndDetach(AttachAndDetach {
                attach,
                detach,
            }))
        }
        _ => None,
    }
}

fn try_merge_inserts(lhs: &Insert, count: u32, rhs: &Insert) -> Option<Insert> {
    (lhs.revision == rhs.revision && rhs.id == lhs.id + count).then(|| *lhs)
}

fn try_merge_deletes(lhs: &Delete, count: u32, rhs: &Delete) -> Option<Delete> {
    if lhs.revision != rhs.revision || rhs.id != lhs.id + count {
        return None;
    }
    let id_override = try_merge_optional_cells(&lhs.id_override, count, &rhs.id_override)?;
    Some(Delete {
        id: lhs.id,
        revision: lhs.revision,
        id_override,
    })
}

fn try_merge_move_ins(lhs: &MoveIn, count: u32, rhs: &MoveIn) -> Option<MoveIn> {
    if lhs.revision != rhs.revision || rhs.id != lhs.id + count {
        return None;
    }
    let final_endpoint = try_merge_optional_cells(&lhs.final_endpoint, count, &rhs.final_endpoint)?;
    Some(MoveIn {
        id: lhs.id,
        revision: lhs.revision,
        final_endpoint,
    })
}

fn try_merge_move_outs(lhs: &MoveOut, count: u32, rhs: &MoveOut) -> Option<MoveOut> {
    if lhs.revision != rhs.revision || rhs.id != lhs.id + count {
        return None;
    }
    let final_endpoint = try_merge_optional_cells(&lhs.final_endpoint, count, &rhs.final_endpoint)?;
    let id_override = try_merge_optional_cells(&lhs.id_override, count, &rhs.id_override)?;
    Some(MoveOut {
        id: lhs.id,
        revision: lhs.revision,
        final_endpoint,
        id_override,
    })
}

/// Folds an attach-and-detach whose attach is a revival into a plain
/// detach of removed content. Reviving cells and immediately re-detaching
/// them is a cell rename; only a fresh transient insert keeps the paired
/// form. Marks of any other kind are returned unchanged.
pub fn normalize_cell_rename<T: Clone>(mark: &Mark<T>) -> Mark<T> {
    let MarkEffect::AttachAndDetach(effect) = &mark.effect else {
        return mark.clone();
    };
    assert!(
        mark.cell_id.is_some(),
        "attach-and-detach requires a cell id"
    );
    if matches!(effect.attach, AttachEffect::Insert(_)) && mark.is_new_attach(None) {
        return mark.clone();
    }
    Mark {
        count: mark.count,
        cell_id: mark.cell_id.clone(),
        changes: mark.changes.clone(),
        effect: effect.detach.clone().into(),
    }
}

/// Whether the mark changes field contents when applied, ignoring nested
/// node changes.
pub fn is_impactful<T>(mark: &Mark<T>, fallback: Option<RevisionTag>) -> bool {
    match &mark.effect {
        MarkEffect::NoOp => false,
        // An insert without a cell id targets cells that are already
        // filled; there is nothing left for it to do.
        MarkEffect::Insert(_) => mark.cell_id.is_some(),
        MarkEffect::Delete(_) => {
            match (mark.input_cell_id(fallback), mark.output_cell_id(fallback)) {
                (Some(input), Some(output)) => !same_cell(&input, &output),
                _ => true,
            }
        }
        MarkEffect::MoveIn(_) => true,
        MarkEffect::MoveOut(_) | MarkEffect::AttachAndDetach(_) => true,
    }
}

/// Strips a non-impactful mark down to a bare no-op, keeping only its cell
/// id, nested changes, and count. Impactful marks are cloned unchanged.
/// Idempotent.
pub fn settle_mark<T: Clone>(mark: &Mark<T>, fallback: Option<RevisionTag>) -> Mark<T> {
    if is_impactful(mark, fallback) {
        return mark.clone();
    }
    Mark {
        count: mark.count,
        cell_id: mark.cell_id.clone(),
        changes: mark.changes.clone(),
        effect: MarkEffect::NoOp,
    }
}

/// Accumulates marks into a normalized list: every pushed mark is merged
/// into its predecessor when the two are concatenable, so the output never
/// contains silently unmerged neighbors.
#[derive(Debug, Clone)]
pub struct MarkListBuilder<T> {
    marks: Vec<Mark<T>>,
}

impl<T: Clone> MarkListBuilder<T> {
    pub fn new() -> Self {
        Self { marks: Vec::new() }
    }

    pub fn push(&mut self, mark: Mark<T>) {
        if mark.count == 0 {
            return;
        }
        if let Some(last) = self.marks.last() {
            if let Some(merged) = try_merge_marks(last, &mark) {
                *self.marks.last_mut().expect("just observed a last mark") = merged;
                return;
            }
        }
        self.marks.push(mark);
    }

    pub fn build(self) -> Changeset<T> {
        Changeset::from_marks(self.marks)
    }
}

impl<T: Clone> Default for MarkListBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Extend<Mark<T>> for MarkListBuilder<T> {
    fn extend<I: IntoIterator<Item = Mark<T>>>(&mut self, iter: I) {
        for mark in iter {
            self.push(mark);
        }
    }
}
