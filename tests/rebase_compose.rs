use seqmark::{
    CellId, ChangesetBuilder, Delete, Mark, MarkEffect, MoveIn, MoveOut, RevisionMetadata,
    RevisionTag, SequentialIdAllocator, TaggedChange, compose, rebase,
};
use seqmark_oracle::NaiveField;

type Change = TaggedChange<u8>;

fn cell(revision: RevisionTag, local_id: u32) -> CellId {
    CellId::new(Some(revision), local_id)
}

/// Child rebaser for tests: nested changes survive rebasing unchanged.
fn keep_child(curr: Option<&u8>, _base: Option<&u8>) -> Option<u8> {
    curr.copied()
}

/// Child composer for tests: later changes win, reasserting earlier ones.
fn merge_child(first: Option<&u8>, second: Option<&u8>) -> Option<u8> {
    second.or(first).copied()
}

#[test]
fn concurrent_inserts_at_the_same_position_rebase_deterministically() {
    // A one-node field; both sides insert a new node in front of it.
    let base_revision = RevisionTag::new();
    let metadata = RevisionMetadata::from_revisions([base_revision]);

    let mut ids = SequentialIdAllocator::new();
    let mut builder = ChangesetBuilder::<u8>::new(&mut ids);
    builder.insert(1);
    builder.skip(1);
    let base = Change::tagged(base_revision, builder.build());

    let mut ids = SequentialIdAllocator::new();
    let mut builder = ChangesetBuilder::<u8>::new(&mut ids);
    builder.insert(1);
    builder.skip(1);
    let local = Change::anonymous(builder.build());

    let rebased = rebase(&local, &base, &metadata, keep_child);
    let marks: Vec<_> = rebased.iter().collect();
    assert_eq!(marks.len(), 2);
    // The local insert keeps its place ahead of the base's new node.
    assert!(matches!(marks[0].effect, MarkEffect::Insert(_)));
    assert_eq!(marks[0].cell_id.as_ref().map(|c| c.revision), Some(None));
    assert_eq!(marks[1].effect, MarkEffect::NoOp);
    assert_eq!(marks[1].count, 2);
    assert!(marks[1].cell_id.is_none());

    // The outcome is a pure function of its inputs.
    let again = rebase(&local, &base, &metadata, keep_child);
    assert_eq!(again, rebased);
}

#[test]
fn delete_over_identical_delete_settles_to_tombstones() {
    let base_revision = RevisionTag::new();
    let metadata = RevisionMetadata::from_revisions([base_revision]);

    let mut ids = SequentialIdAllocator::new();
    let mut builder = ChangesetBuilder::<u8>::new(&mut ids);
    builder.delete(3);
    let base = Change::tagged(base_revision, builder.build());

    let mut ids = SequentialIdAllocator::new();
    let mut builder = ChangesetBuilder::<u8>::new(&mut ids);
    builder.delete(3);
    let local = Change::anonymous(builder.build());

    let rebased = rebase(&local, &base, &metadata, keep_child);
    let marks: Vec<_> = rebased.iter().collect();
    assert_eq!(marks.len(), 1);
    // Nothing left to delete: the mark degrades to a tombstone record.
    assert_eq!(marks[0].effect, MarkEffect::NoOp);
    assert_eq!(marks[0].count, 3);
    let id = marks[0].cell_id.as_ref().expect("tombstone carries a cell id");
    assert_eq!(id.revision, Some(base_revision));
    assert_eq!(rebased.input_length(), 0);
    assert_eq!(rebased.output_length(), 0);
}

#[test]
fn surviving_cells_gain_lineage_against_base_detaches() {
    let base_revision = RevisionTag::new();
    let metadata = RevisionMetadata::from_revisions([base_revision]);

    let mut ids = SequentialIdAllocator::new();
    let mut builder = ChangesetBuilder::<u8>::new(&mut ids);
    builder.delete(2);
    let base = Change::tagged(base_revision, builder.build());

    let mut ids = SequentialIdAllocator::new();
    let mut builder = ChangesetBuilder::<u8>::new(&mut ids);
    builder.skip(2);
    builder.insert(1);
    let local = Change::anonymous(builder.build());

    let rebased = rebase(&local, &base, &metadata, keep_child);
    let marks: Vec<_> = rebased.iter().collect();
    assert_eq!(marks.len(), 2);
    let insert_cell = marks[1].cell_id.as_ref().expect("insert carries a cell id");
    // The insert sits after both deleted cells and records that fact.
    assert_eq!(insert_cell.lineage.len(), 1);
    let event = &insert_cell.lineage[0];
    assert_eq!(event.revision, base_revision);
    assert_eq!(event.count, 2);
    assert_eq!(event.offset, 2);
}

#[test]
fn changes_on_moved_content_follow_it_to_the_destination() {
    // Base moves the first node to the back; the local change edits it.
    let base_revision = RevisionTag::new();
    let metadata = RevisionMetadata::from_revisions([base_revision]);

    let mut ids = SequentialIdAllocator::new();
    let mut builder = ChangesetBuilder::<u8>::new(&mut ids);
    let move_id = builder.move_out(1);
    builder.skip(1);
    builder.move_in(1, move_id);
    let base = Change::tagged(base_revision, builder.build());

    let mut ids = SequentialIdAllocator::new();
    let mut builder = ChangesetBuilder::<u8>::new(&mut ids);
    builder.modify(42);
    builder.skip(1);
    let local = Change::anonymous(builder.build());

    let rebased = rebase(&local, &base, &metadata, keep_child);
    let marks: Vec<_> = rebased.iter().collect();
    assert_eq!(marks.len(), 3);
    // Tombstone where the content used to be, no changes left on it.
    assert_eq!(marks[0].effect, MarkEffect::NoOp);
    assert!(marks[0].cell_id.is_some());
    assert_eq!(marks[0].changes, None);
    // The nested change re-targets the content at its destination.
    assert_eq!(marks[2].changes, Some(42));
}

#[test]
fn move_destination_ahead_of_its_source_needs_a_second_pass() {
    // Base moves the second node to the front, so the rebase walk reads
    // the destination before the source has published the nested change.
    let base_revision = RevisionTag::new();
    let metadata = RevisionMetadata::from_revisions([base_revision]);

    let base = Change::tagged(
        base_revision,
        seqmark::Changeset::from_marks(vec![
            Mark::new(
                1,
                MarkEffect::MoveIn(MoveIn {
                    id: 0,
                    revision: None,
                    final_endpoint: None,
                }),
            )
            .with_cell_id(CellId::new(None, 0)),
            Mark::skip(1),
            Mark::new(
                1,
                MarkEffect::MoveOut(MoveOut {
                    id: 0,
                    revision: None,
                    final_endpoint: None,
                    id_override: None,
                }),
            ),
        ]),
    );

    let mut ids = SequentialIdAllocator::new();
    let mut builder = ChangesetBuilder::<u8>::new(&mut ids);
    builder.skip(1);
    builder.modify(42);
    let local = Change::anonymous(builder.build());

    let rebased = rebase(&local, &base, &metadata, keep_child);
    let marks: Vec<_> = rebased.iter().collect();
    assert_eq!(marks.len(), 3);
    assert_eq!(marks[0].changes, Some(42));
    assert_eq!(marks[0].effect, MarkEffect::NoOp);
    assert!(marks[0].cell_id.is_none());
    // The source position is now a tombstone.
    assert!(marks[2].cell_id.is_some());
    assert_eq!(marks[2].changes, None);
}

#[test]
fn compose_of_insert_and_delete_keeps_transient_cells() {
    let first_revision = RevisionTag::new();
    let second_revision = RevisionTag::new();
    let metadata = RevisionMetadata::from_revisions([first_revision, second_revision]);

    let mut ids = SequentialIdAllocator::new();
    let mut builder = ChangesetBuilder::<u8>::new(&mut ids);
    builder.insert(1);
    let first = Change::tagged(first_revision, builder.build());

    let mut ids = SequentialIdAllocator::new();
    let mut builder = ChangesetBuilder::<u8>::new(&mut ids);
    builder.delete(1);
    let second = Change::tagged(second_revision, builder.build());

    let composed = compose(&first, &second, &metadata, merge_child);
    let marks: Vec<_> = composed.iter().collect();
    assert_eq!(marks.len(), 1);
    assert!(matches!(marks[0].effect, MarkEffect::AttachAndDetach(_)));
    let id = marks[0].cell_id.as_ref().expect("transient cells keep their identity");
    assert_eq!(id.revision, Some(first_revision));
    assert_eq!(composed.input_length(), 0);
    assert_eq!(composed.output_length(), 0);
}

#[test]
fn compose_of_delete_and_revive_cancels_out() {
    let first_revision = RevisionTag::new();
    let second_revision = RevisionTag::new();
    let metadata = RevisionMetadata::from_revisions([first_revision, second_revision]);

    let mut ids = SequentialIdAllocator::new();
    let mut builder = ChangesetBuilder::<u8>::new(&mut ids);
    builder.delete(1);
    let first = Change::tagged(first_revision, builder.build());

    let mut ids = SequentialIdAllocator::new();
    let mut builder = ChangesetBuilder::<u8>::new(&mut ids);
    builder.revive(1, cell(first_revision, 0));
    let second = Change::tagged(second_revision, builder.build());

    let composed = compose(&first, &second, &metadata, merge_child);
    let marks: Vec<_> = composed.iter().collect();
    assert_eq!(marks.len(), 1);
    assert_eq!(marks[0].effect, MarkEffect::NoOp);
    assert!(marks[0].cell_id.is_none());
    assert_eq!(composed.input_length(), 1);
    assert_eq!(composed.output_length(), 1);
}

#[test]
fn compose_redirects_a_redetach_to_its_final_identity() {
    let first_revision = RevisionTag::new();
    let second_revision = RevisionTag::new();
    let metadata = RevisionMetadata::from_revisions([first_revision, second_revision]);

    let mut ids = SequentialIdAllocator::new();
    let mut builder = ChangesetBuilder::<u8>::new(&mut ids);
    builder.delete(1);
    let first = Change::tagged(first_revision, builder.build());

    // Second re-detaches the tombstone under its own identity.
    let second = Change::tagged(
        second_revision,
        seqmark::Changeset::from_marks(vec![
            Mark::new(
                1,
                MarkEffect::Delete(Delete {
                    id: 0,
                    revision: None,
                    id_override: None,
                }),
            )
            .with_cell_id(cell(first_revision, 0)),
        ]),
    );

    let composed = compose(&first, &second, &metadata, merge_child);
    let marks: Vec<_> = composed.iter().collect();
    assert_eq!(marks.len(), 1);
    let MarkEffect::Delete(delete) = &marks[0].effect else {
        panic!("composite removes the content");
    };
    // The first delete consumed the content, but the cells end up under
    // the identity the second change gave them.
    let final_id = delete.id_override.as_ref().expect("redirected output identity");
    assert_eq!(final_id.revision, Some(second_revision));
    assert!(marks[0].cell_id.is_none());
}

#[test]
fn applying_a_composition_matches_applying_in_sequence() {
    let seed = RevisionTag::new();
    let first_revision = RevisionTag::new();
    let second_revision = RevisionTag::new();
    let metadata = RevisionMetadata::from_revisions([seed, first_revision, second_revision]);

    let mut ids = SequentialIdAllocator::new();
    let mut builder = ChangesetBuilder::<u8>::new(&mut ids);
    builder.delete(1);
    builder.skip(2);
    let first = Change::tagged(first_revision, builder.build());

    let mut ids = SequentialIdAllocator::new();
    let mut builder = ChangesetBuilder::<u8>::new(&mut ids);
    builder.skip(1);
    builder.insert(1);
    builder.skip(1);
    let second = Change::tagged(second_revision, builder.build());

    let mut sequential = NaiveField::of_length(seed, 3);
    sequential.apply(&first);
    sequential.apply(&second);

    let composed = Change::anonymous(compose(&first, &second, &metadata, merge_child));
    let mut folded = NaiveField::of_length(seed, 3);
    folded.apply(&composed);

    assert_eq!(folded, sequential);
}
