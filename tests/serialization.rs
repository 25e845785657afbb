use seqmark::{
    AttachAndDetach, AttachEffect, CellId, Changeset, ChangesetBuilder, Delete, DetachEffect,
    Insert, LineageEvent, Mark, MarkEffect, RevisionTag, SequentialIdAllocator, TaggedChange,
};

#[test]
fn cell_id_round_trips_with_lineage() {
    let mut id = CellId::new(Some(RevisionTag::new()), 7);
    id.lineage.push(LineageEvent {
        revision: RevisionTag::new(),
        id: 0,
        count: 3,
        offset: 1,
    });
    let json = serde_json::to_string(&id).expect("serialize");
    let back: CellId = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(back, id);
}

#[test]
fn bare_cell_id_serializes_compactly() {
    let id = CellId::new(None, 0);
    let json = serde_json::to_string(&id).expect("serialize");
    // Empty lineage and absent adjacency are omitted from the wire form.
    assert!(!json.contains("lineage"));
    assert!(!json.contains("adjacent_cells"));
    let back: CellId = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(back, id);
}

#[test]
fn transient_mark_round_trips() {
    let revision = RevisionTag::new();
    let mark: Mark<u8> = Mark::new(
        2,
        MarkEffect::AttachAndDetach(AttachAndDetach {
            attach: AttachEffect::Insert(Insert {
                id: 0,
                revision: Some(revision),
            }),
            detach: DetachEffect::Delete(Delete {
                id: 2,
                revision: Some(revision),
                id_override: Some(CellId::new(Some(revision), 9)),
            }),
        }),
    )
    .with_cell_id(CellId::new(Some(revision), 0))
    .with_changes(5);
    let json = serde_json::to_string(&mark).expect("serialize");
    let back: Mark<u8> = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(back, mark);
}

#[test]
fn changeset_serializes_as_its_mark_list() {
    let mut ids = SequentialIdAllocator::new();
    let mut builder = ChangesetBuilder::<u8>::new(&mut ids);
    builder.skip(1);
    builder.insert(2);
    builder.delete(1);
    let changeset = builder.build();
    let json = serde_json::to_string(&changeset).expect("serialize");
    // The container is transparent: the wire form is a plain array.
    assert!(json.starts_with('['));
    let back: Changeset<u8> = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(back, changeset);
}

#[test]
fn tagged_change_round_trips() {
    let revision = RevisionTag::new();
    let mut ids = SequentialIdAllocator::new();
    let mut builder = ChangesetBuilder::<u8>::new(&mut ids);
    builder.delete(2);
    let change = TaggedChange::tagged(revision, builder.build());
    let json = serde_json::to_string(&change).expect("serialize");
    let back: TaggedChange<u8> = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(back, change);

    let anonymous = TaggedChange::<u8>::anonymous(Changeset::empty());
    let json = serde_json::to_string(&anonymous).expect("serialize");
    assert!(!json.contains("revision"));
    let back: TaggedChange<u8> = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(back, anonymous);
}
