//! A naive, simple oracle implementation for differential testing.
//!
//! The oracle applies changesets to an explicit field state: a vector of
//! live nodes plus a map from detached-cell identity to the node resting
//! there. Nodes are named by the cell that created them, which is stable
//! across every application order, so two ways of reaching the same state
//! (for example, applying two changesets in sequence versus applying their
//! composition) must produce equal oracle states.

use std::collections::BTreeMap;

use seqmark::{AttachEffect, ChangesetLocalId, MarkEffect, RevisionTag, TaggedChange};

/// The birth identity of a node: the cell it was inserted into.
pub type NodeId = (Option<RevisionTag>, ChangesetLocalId);

/// Identity of the cell a detached node currently rests in.
pub type DetachKey = (Option<RevisionTag>, ChangesetLocalId);

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct NaiveField {
    live: Vec<NodeId>,
    detached: BTreeMap<DetachKey, NodeId>,
}

impl NaiveField {
    pub fn new() -> Self {
        Self::default()
    }

    /// A field seeded with `count` nodes attributed to `revision`.
    pub fn of_length(revision: RevisionTag, count: u32) -> Self {
        Self {
            live: (0..count).map(|i| (Some(revision), i)).collect(),
            detached: BTreeMap::new(),
        }
    }

    pub fn live(&self) -> &[NodeId] {
        &self.live
    }

    pub fn detached(&self) -> &BTreeMap<DetachKey, NodeId> {
        &self.detached
    }

    /// Applies `change` to the field. The change's input length must match
    /// the current number of live nodes it walks over.
    ///
    /// Moves are not modeled; a changeset containing move marks panics.
    pub fn apply<T>(&mut self, change: &TaggedChange<T>) {
        let fallback = change.revision;
        let mut cursor = 0usize;
        for mark in change.change.iter() {
            match &mark.effect {
                MarkEffect::NoOp => {
                    if mark.cell_id.is_none() {
                        cursor += mark.count as usize;
                    }
                }
                MarkEffect::Insert(_) => {
                    let cell = mark
                        .input_cell_id(fallback)
                        .expect("attach marks carry a cell id");
                    if mark.is_new_attach(fallback) {
                        for i in 0..mark.count {
                            self.live.insert(cursor, (cell.revision, cell.local_id + i));
                            cursor += 1;
                        }
                    } else {
                        for i in 0..mark.count {
                            let key = (cell.revision, cell.local_id + i);
                            let node = self
                                .detached
                                .remove(&key)
                                .expect("revive targets a tracked detached node");
                            self.live.insert(cursor, node);
                            cursor += 1;
                        }
                    }
                }
                MarkEffect::Delete(_) => {
                    let output = mark
                        .output_cell_id(fallback)
                        .expect("detach must produce an output cell id");
                    if mark.cell_id.is_some() {
                        // Re-detach of already empty cells: the resting
                        // nodes change identity, not position.
                        let input = mark
                            .input_cell_id(fallback)
                            .expect("empty input cells carry a cell id");
                        for i in 0..mark.count {
                            if let Some(node) =
                                self.detached.remove(&(input.revision, input.local_id + i))
                            {
                                self.detached
                                    .insert((output.revision, output.local_id + i), node);
                            }
                        }
                    } else {
                        for i in 0..mark.count {
                            let node = self.live.remove(cursor);
                            self.detached
                                .insert((output.revision, output.local_id + i), node);
                        }
                    }
                }
                MarkEffect::AttachAndDetach(pair) => {
                    let cell = mark
                        .input_cell_id(fallback)
                        .expect("attach-and-detach marks carry a cell id");
                    let output = mark
                        .output_cell_id(fallback)
                        .expect("detach must produce an output cell id");
                    match &pair.attach {
                        AttachEffect::Insert(_) => {
                            if mark.is_new_attach(fallback) {
                                // Transient insert: the nodes only ever
                                // exist as detached content.
                                for i in 0..mark.count {
                                    self.detached.insert(
                                        (output.revision, output.local_id + i),
                                        (cell.revision, cell.local_id + i),
                                    );
                                }
                            } else {
                                // Revive-and-redetach: a cell rename.
                                for i in 0..mark.count {
                                    if let Some(node) = self
                                        .detached
                                        .remove(&(cell.revision, cell.local_id + i))
                                    {
                                        self.detached
                                            .insert((output.revision, output.local_id + i), node);
                                    }
                                }
                            }
                        }
                        AttachEffect::MoveIn(_) => {
                            unimplemented!("moves are not supported by the naive oracle")
                        }
                    }
                }
                MarkEffect::MoveIn(_) | MarkEffect::MoveOut(_) => {
                    unimplemented!("moves are not supported by the naive oracle")
                }
            }
        }
    }
}
