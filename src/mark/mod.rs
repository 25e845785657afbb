//! Mark and cell model for sequence changesets.
//!
//! A changeset describes an edit to an ordered field as a list of marks,
//! each applying one effect to a contiguous run of cells. Cells are stable
//! position slots addressed by `(revision, local id)` rather than by index,
//! so concurrently deleted and revived content stays addressable.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod algebra;

/// Identifier local to one changeset. Unique within the owning changeset,
/// never globally; fresh values come from an injected [`crate::IdAllocator`].
pub type ChangesetLocalId = u32;

/// Identifier pairing a move's source and destination marks.
pub type MoveId = ChangesetLocalId;

/// Identity of one edit generation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct RevisionTag(Uuid);

impl RevisionTag {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RevisionTag {
    fn default() -> Self {
        Self::new()
    }
}

/// A half-open run of local ids `[id, id + count)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdRange {
    pub id: ChangesetLocalId,
    pub count: u32,
}

/// Records where an empty cell sits relative to a range of cells detached
/// by another revision. `offset` is the number of cells in that range which
/// sort before this cell (`0` = before all of them, `count` = after all).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineageEvent {
    pub revision: RevisionTag,
    pub id: ChangesetLocalId,
    pub count: u32,
    pub offset: u32,
}

/// Stable identity for a position slot.
///
/// `revision: None` means the cell was created by the changeset currently
/// being built or reconciled (an anonymous changeset).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellId {
    pub revision: Option<RevisionTag>,
    pub local_id: ChangesetLocalId,
    /// Ordering evidence against other revisions' detached ranges.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lineage: Vec<LineageEvent>,
    /// Id ranges known to be contiguous with this cell, as alternative
    /// ordering evidence for cells from the same revision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adjacent_cells: Option<Vec<IdRange>>,
}

impl CellId {
    pub fn new(revision: Option<RevisionTag>, local_id: ChangesetLocalId) -> Self {
        Self {
            revision,
            local_id,
            lineage: Vec::new(),
            adjacent_cells: None,
        }
    }

    /// The same cell range shifted `by` ids forward. Lineage and adjacency
    /// evidence applies to the whole range and is carried along.
    pub fn offset(&self, by: u32) -> Self {
        Self {
            revision: self.revision,
            local_id: self.local_id + by,
            lineage: self.lineage.clone(),
            adjacent_cells: self.adjacent_cells.clone(),
        }
    }
}

/// Whether two cell ids name the same slot. Lineage and adjacency are
/// evidence about a cell, not part of its identity.
pub fn same_cell(a: &CellId, b: &CellId) -> bool {
    a.revision == b.revision && a.local_id == b.local_id
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Insert {
    pub id: ChangesetLocalId,
    /// Absent means "inherit from the enclosing changeset revision".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<RevisionTag>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delete {
    pub id: ChangesetLocalId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<RevisionTag>,
    /// Redirects the detach's output identity when it resolves to something
    /// other than a fresh detach under `(revision, id)`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_override: Option<CellId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveIn {
    pub id: MoveId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<RevisionTag>,
    /// Where the moved content ultimately lands when the pair has been
    /// split across rebases.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_endpoint: Option<CellId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveOut {
    pub id: MoveId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<RevisionTag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_endpoint: Option<CellId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_override: Option<CellId>,
}

/// Attach half of an attach-and-detach pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttachEffect {
    Insert(Insert),
    MoveIn(MoveIn),
}

impl AttachEffect {
    pub fn id(&self) -> ChangesetLocalId {
        match self {
            AttachEffect::Insert(e) => e.id,
            AttachEffect::MoveIn(e) => e.id,
        }
    }

    pub fn revision(&self) -> Option<RevisionTag> {
        match self {
            AttachEffect::Insert(e) => e.revision,
            AttachEffect::MoveIn(e) => e.revision,
        }
    }
}

/// Detach half of an attach-and-detach pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetachEffect {
    Delete(Delete),
    MoveOut(MoveOut),
}

impl DetachEffect {
    pub fn id(&self) -> ChangesetLocalId {
        match self {
            DetachEffect::Delete(e) => e.id,
            DetachEffect::MoveOut(e) => e.id,
        }
    }

    pub fn revision(&self) -> Option<RevisionTag> {
        match self {
            DetachEffect::Delete(e) => e.revision,
            DetachEffect::MoveOut(e) => e.revision,
        }
    }

    pub fn id_override(&self) -> Option<&CellId> {
        match self {
            DetachEffect::Delete(e) => e.id_override.as_ref(),
            DetachEffect::MoveOut(e) => e.id_override.as_ref(),
        }
    }

    /// The identity the detached cells carry afterwards.
    pub fn output_id(&self, fallback: Option<RevisionTag>) -> CellId {
        if let Some(id) = self.id_override() {
            return id.clone();
        }
        CellId::new(self.revision().or(fallback), self.id())
    }
}

impl From<DetachEffect> for MarkEffect {
    fn from(detach: DetachEffect) -> Self {
        match detach {
            DetachEffect::Delete(e) => MarkEffect::Delete(e),
            DetachEffect::MoveOut(e) => MarkEffect::MoveOut(e),
        }
    }
}

impl From<AttachEffect> for MarkEffect {
    fn from(attach: AttachEffect) -> Self {
        match attach {
            AttachEffect::Insert(e) => MarkEffect::Insert(e),
            AttachEffect::MoveIn(e) => MarkEffect::MoveIn(e),
        }
    }
}

/// Content attached and detached by the same changeset. The content never
/// appears in the output context, but the cells and their provenance do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachAndDetach {
    pub attach: AttachEffect,
    pub detach: DetachEffect,
}

/// The closed set of effects a mark can apply.
///
/// Every predicate over marks dispatches on this enum exhaustively; adding
/// a variant is a compile error at each of those sites until handled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarkEffect {
    NoOp,
    Insert(Insert),
    Delete(Delete),
    MoveIn(MoveIn),
    MoveOut(MoveOut),
    AttachAndDetach(AttachAndDetach),
}

impl MarkEffect {
    /// The revision that produced this effect, if it carries its own.
    pub fn revision(&self) -> Option<RevisionTag> {
        match self {
            MarkEffect::NoOp => None,
            MarkEffect::Insert(e) => e.revision,
            MarkEffect::Delete(e) => e.revision,
            MarkEffect::MoveIn(e) => e.revision,
            MarkEffect::MoveOut(e) => e.revision,
            MarkEffect::AttachAndDetach(e) => e.attach.revision(),
        }
    }

    /// Whether the effect attaches content, even transiently. The attach
    /// half of an attach-and-detach counts; its revision is the one
    /// [`revision`](Self::revision) reports.
    pub fn is_attach(&self) -> bool {
        matches!(
            self,
            MarkEffect::Insert(_) | MarkEffect::MoveIn(_) | MarkEffect::AttachAndDetach(_)
        )
    }

    pub fn is_detach(&self) -> bool {
        matches!(self, MarkEffect::Delete(_) | MarkEffect::MoveOut(_))
    }
}

/// One effect applied to a contiguous run of `count` cells.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mark<T> {
    pub count: u32,
    /// Identity of the input cell range. Present iff the input cells are
    /// empty (the mark creates or revives content, or records a tombstone).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cell_id: Option<CellId>,
    /// Opaque node-level change nested at this mark.
    // The path form keeps the derived impl from demanding `T: Default`.
    #[serde(default = "Option::default", skip_serializing_if = "Option::is_none")]
    pub changes: Option<T>,
    pub effect: MarkEffect,
}

impl<T> Mark<T> {
    pub fn new(count: u32, effect: MarkEffect) -> Self {
        Self {
            count,
            cell_id: None,
            changes: None,
            effect,
        }
    }

    pub fn with_cell_id(mut self, cell_id: CellId) -> Self {
        self.cell_id = Some(cell_id);
        self
    }

    pub fn with_changes(mut self, changes: T) -> Self {
        self.changes = Some(changes);
        self
    }

    /// A no-op mark over `count` filled cells.
    pub fn skip(count: u32) -> Self {
        Self::new(count, MarkEffect::NoOp)
    }

    /// A no-op mark that records empty cells: a tombstone.
    pub fn tombstone(count: u32, cell_id: CellId) -> Self {
        Self::new(count, MarkEffect::NoOp).with_cell_id(cell_id)
    }

    pub fn input_cells_empty(&self) -> bool {
        self.cell_id.is_some()
    }

    pub fn output_cells_empty(&self) -> bool {
        match &self.effect {
            MarkEffect::NoOp => self.cell_id.is_some(),
            MarkEffect::Delete(_) | MarkEffect::MoveOut(_) | MarkEffect::AttachAndDetach(_) => true,
            MarkEffect::Insert(_) | MarkEffect::MoveIn(_) => false,
        }
    }

    /// Filled input cells, empty output cells: the mark detaches content.
    pub fn empties_cells(&self) -> bool {
        !self.input_cells_empty() && self.output_cells_empty()
    }

    /// Empty input cells, filled output cells: the mark attaches content.
    pub fn fills_cells(&self) -> bool {
        self.input_cells_empty() && !self.output_cells_empty()
    }

    pub fn has_cell_effect(&self) -> bool {
        self.input_cells_empty() != self.output_cells_empty()
    }

    pub fn input_length(&self) -> u32 {
        if self.input_cells_empty() { 0 } else { self.count }
    }

    pub fn output_length(&self) -> u32 {
        if self.output_cells_empty() { 0 } else { self.count }
    }

    /// An attach whose target cells were created by this very mark's
    /// revision: a brand-new insert, not a revival.
    pub fn is_new_attach(&self, fallback: Option<RevisionTag>) -> bool {
        match &self.cell_id {
            Some(cell) if self.effect.is_attach() => {
                // An anonymous cell id always belongs to the mark's own
                // changeset.
                cell.revision.is_none() || cell.revision == self.effect.revision().or(fallback)
            }
            _ => false,
        }
    }

    /// An attach reviving previously detached cells.
    pub fn is_reattach(&self, fallback: Option<RevisionTag>) -> bool {
        self.effect.is_attach() && self.cell_id.is_some() && !self.is_new_attach(fallback)
    }

    /// Identity of the input cells, with an inherited revision resolved.
    pub fn input_cell_id(&self, fallback: Option<RevisionTag>) -> Option<CellId> {
        let cell = self.cell_id.as_ref()?;
        if cell.revision.is_some() {
            return Some(cell.clone());
        }
        let mut resolved = cell.clone();
        resolved.revision = self.effect.revision().or(fallback);
        Some(resolved)
    }

    /// Identity of the output cells, or `None` when they are filled.
    pub fn output_cell_id(&self, fallback: Option<RevisionTag>) -> Option<CellId> {
        match &self.effect {
            MarkEffect::NoOp => {
                if self.cell_id.is_some() {
                    self.input_cell_id(fallback)
                } else {
                    None
                }
            }
            MarkEffect::Insert(_) | MarkEffect::MoveIn(_) => None,
            MarkEffect::Delete(e) => Some(
                e.id_override
                    .clone()
                    .unwrap_or_else(|| CellId::new(e.revision.or(fallback), e.id)),
            ),
            MarkEffect::MoveOut(e) => Some(
                e.id_override
                    .clone()
                    .unwrap_or_else(|| CellId::new(e.revision.or(fallback), e.id)),
            ),
            MarkEffect::AttachAndDetach(e) => Some(e.detach.output_id(fallback)),
        }
    }
}
