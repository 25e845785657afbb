use seqmark::{
    CellId, ChangesetBuilder, DetachedNodeTracker, RevisionTag, SequentialIdAllocator,
    TaggedChange, are_composable, are_rebasable, same_cell,
};

fn cell(revision: RevisionTag, local_id: u32) -> CellId {
    CellId::new(Some(revision), local_id)
}

/// An anonymous changeset reviving `count` cells at `skip` positions in.
fn revive_at<T: Clone>(skip: u32, count: u32, id: CellId) -> TaggedChange<T> {
    let mut ids = SequentialIdAllocator::new();
    let mut builder = ChangesetBuilder::new(&mut ids);
    if skip > 0 {
        builder.skip(skip);
    }
    builder.revive(count, id);
    TaggedChange::anonymous(builder.build())
}

/// A changeset tagged `revision` deleting `count` cells at `skip` in.
fn delete_at<T: Clone>(revision: RevisionTag, skip: u32, count: u32) -> TaggedChange<T> {
    let mut ids = SequentialIdAllocator::new();
    let mut builder = ChangesetBuilder::new(&mut ids);
    if skip > 0 {
        builder.skip(skip);
    }
    builder.delete(count);
    TaggedChange::tagged(revision, builder.build())
}

#[test]
fn revived_content_is_tracked_at_its_output_position() {
    let detach = RevisionTag::new();
    let mut tracker = DetachedNodeTracker::new();
    tracker.apply(&revive_at::<()>(1, 2, cell(detach, 5)));
    let tracked = tracker.tracked();
    assert_eq!(tracked.len(), 2);
    assert!(same_cell(&tracked[&1], &cell(detach, 5)));
    assert!(same_cell(&tracked[&2], &cell(detach, 6)));
}

#[test]
fn redetaching_tracked_content_records_an_equivalence() {
    let detach = RevisionTag::new();
    let second = RevisionTag::new();
    let mut tracker = DetachedNodeTracker::new();
    tracker.apply(&revive_at::<()>(0, 2, cell(detach, 5)));
    tracker.apply(&delete_at::<()>(second, 0, 2));
    assert!(tracker.tracked().is_empty());
    let equivalences = tracker.equivalences();
    assert_eq!(equivalences.len(), 2);
    assert!(same_cell(&equivalences[0].old, &cell(detach, 5)));
    assert_eq!(equivalences[0].new.revision, Some(second));
    assert!(same_cell(&equivalences[1].old, &cell(detach, 6)));
}

#[test]
fn detach_shifts_tracked_indices_down() {
    let detach = RevisionTag::new();
    let second = RevisionTag::new();
    let mut tracker = DetachedNodeTracker::new();
    tracker.apply(&revive_at::<()>(3, 1, cell(detach, 0)));
    // Deleting two earlier nodes moves the tracked node from 3 to 1.
    tracker.apply(&delete_at::<()>(second, 0, 2));
    let tracked = tracker.tracked();
    assert_eq!(tracked.len(), 1);
    assert!(same_cell(&tracked[&1], &cell(detach, 0)));
}

#[test]
fn conflicting_revival_is_not_applicable() {
    let detach = RevisionTag::new();
    let mut tracker = DetachedNodeTracker::new();
    tracker.apply(&revive_at::<()>(0, 1, cell(detach, 5)));
    // A second change reviving the same detached node elsewhere conflicts.
    assert!(!tracker.is_applicable(&revive_at::<()>(2, 1, cell(detach, 5))));
    // Reviving a different node from the same detach does not.
    assert!(tracker.is_applicable(&revive_at::<()>(2, 1, cell(detach, 9))));
}

#[test]
fn applicability_follows_the_rename_chain() {
    let detach = RevisionTag::new();
    let second = RevisionTag::new();
    let mut tracker = DetachedNodeTracker::new();
    // Revive, re-detach under a new name, revive under the new name.
    tracker.apply(&revive_at::<()>(0, 1, cell(detach, 5)));
    tracker.apply(&delete_at::<()>(second, 0, 1));
    let renamed = tracker.equivalences()[0].new.clone();
    tracker.apply(&revive_at::<()>(0, 1, renamed));
    // A change still using the original name resolves to the tracked node.
    assert!(!tracker.is_applicable(&revive_at::<()>(1, 1, cell(detach, 5))));
}

#[test]
fn composable_changes_fold_through_the_tracker() {
    let detach = RevisionTag::new();
    let first = revive_at::<()>(0, 1, cell(detach, 5));
    let conflicting = revive_at::<()>(2, 1, cell(detach, 5));
    let unrelated = revive_at::<()>(0, 1, cell(detach, 9));
    assert!(are_composable::<()>(&[]));
    assert!(are_composable(&[first.clone(), unrelated]));
    assert!(!are_composable(&[first, conflicting]));
}

#[test]
fn rebasable_requires_agreement_on_shared_revivals() {
    let detach = RevisionTag::new();
    let mut ids = SequentialIdAllocator::new();
    let mut builder = ChangesetBuilder::<()>::new(&mut ids);
    builder.revive(1, cell(detach, 0));
    builder.skip(1);
    builder.revive(1, cell(detach, 1));
    let branch = builder.build();

    // Same relative order of the shared cells.
    let mut ids = SequentialIdAllocator::new();
    let mut builder = ChangesetBuilder::<()>::new(&mut ids);
    builder.revive(1, cell(detach, 0));
    builder.revive(1, cell(detach, 1));
    let agreeing = builder.build();
    assert!(are_rebasable(&branch, &agreeing));

    // Opposite relative order.
    let mut ids = SequentialIdAllocator::new();
    let mut builder = ChangesetBuilder::<()>::new(&mut ids);
    builder.revive(1, cell(detach, 1));
    builder.revive(1, cell(detach, 0));
    let contradicting = builder.build();
    assert!(!are_rebasable(&branch, &contradicting));
}

#[test]
#[should_panic(expected = "inconsistent characterization of detached content")]
fn rebasable_rejects_a_branch_reviving_a_cell_twice() {
    let detach = RevisionTag::new();
    let mut ids = SequentialIdAllocator::new();
    let mut builder = ChangesetBuilder::<()>::new(&mut ids);
    builder.revive(1, cell(detach, 0));
    builder.skip(1);
    builder.revive(1, cell(detach, 0));
    let branch = builder.build();
    let _ = are_rebasable(&branch, &branch);
}
