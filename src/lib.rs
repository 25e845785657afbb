//! seqmark: change reconciliation for collaboratively edited sequences.
//!
//! This crate implements the mark-and-cell changeset model used to rebase
//! and compose concurrent edits to an ordered field. It includes:
//!
//! - **Mark and cell model** - changesets as mark lists over stable cells
//! - **Mark algebra** - splitting, merging, normalizing, and settling marks
//! - **Cell ordering** - position comparison with lineage tie-breaking
//! - **Cross-field effects** - move-pair communication with invalidation
//! - **Detached-node tracking** - tombstone identity and consistency checks
//! - **Drivers** - the rebase and compose walks over aligned mark queues
//!
//! # Quick Start
//!
//! ```rust
//! use seqmark::{ChangesetBuilder, SequentialIdAllocator, TaggedChange};
//!
//! // Build a changeset that inserts two nodes after the first position.
//! let mut ids = SequentialIdAllocator::new();
//! let mut builder = ChangesetBuilder::<()>::new(&mut ids);
//! builder.skip(1);
//! builder.insert(2);
//! let change = TaggedChange::anonymous(builder.build());
//! assert_eq!(change.change.output_length(), change.change.input_length() + 2);
//! ```

// Mark and cell model, plus the mark algebra
pub mod mark;

// Changeset container, builders, and validation
pub mod changeset;

// Cell position comparison and revision metadata
pub mod ordering;

// Cross-field effect table for move pairs
pub mod cross_field;

// Detached-node tracker and consistency checkers
pub mod tracker;

// Mark queue shared by the drivers
pub mod queue;

// Rebase driver
pub mod rebase;

// Compose driver
pub mod compose;

// Re-export mark and cell types
pub use mark::{
    AttachAndDetach, AttachEffect, CellId, ChangesetLocalId, Delete, DetachEffect, IdRange, Insert,
    LineageEvent, Mark, MarkEffect, MoveId, MoveIn, MoveOut, RevisionTag, same_cell,
};

// Re-export the mark algebra
pub use mark::algebra::{
    MarkListBuilder, is_impactful, normalize_cell_rename, settle_mark, split_mark, try_merge_marks,
};

// Re-export changeset types
pub use changeset::{
    Changeset, ChangesetBuilder, ChangesetError, IdAllocator, SequentialIdAllocator, TaggedChange,
    validate_changeset,
};

// Re-export ordering
pub use ordering::{
    CellOrder, RevisionMetadata, RevisionMetadataSource, compare_cell_positions,
};

// Re-export cross-field types
pub use cross_field::{CrossFieldTable, CrossFieldTarget, RangeEntry};

// Re-export the tracker and consistency checkers
pub use tracker::{DetachedNodeTracker, Equivalence, are_composable, are_rebasable};

// Re-export the drivers
pub use compose::compose;
pub use rebase::{MoveEffect, rebase};
