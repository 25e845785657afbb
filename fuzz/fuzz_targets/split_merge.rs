#![no_main]

//! Fuzz target for the split/merge round-trip property: merging the two
//! halves of any split must restore the original mark exactly.

use libfuzzer_sys::fuzz_target;
use seqmark::{
    CellId, Delete, Insert, Mark, MarkEffect, MoveOut, RevisionTag, split_mark, try_merge_marks,
};

fn cell_from(bytes: &[u8]) -> CellId {
    let revision = if bytes.first().copied().unwrap_or(0) % 2 == 0 {
        None
    } else {
        Some(RevisionTag::new())
    };
    CellId::new(revision, bytes.get(1).copied().unwrap_or(0) as u32)
}

fuzz_target!(|data: &[u8]| {
    if data.len() < 4 {
        return;
    }
    let count = 2 + (data[0] % 16) as u32;
    let id = data[1] as u32;
    let mark: Mark<u8> = match data[2] % 5 {
        0 => Mark::skip(count),
        1 => Mark::tombstone(count, cell_from(&data[3..])),
        2 => Mark::new(
            count,
            MarkEffect::Insert(Insert { id, revision: None }),
        )
        .with_cell_id(cell_from(&data[3..])),
        3 => Mark::new(
            count,
            MarkEffect::Delete(Delete {
                id,
                revision: None,
                id_override: (data[3] % 2 == 0).then(|| cell_from(&data[3..])),
            }),
        ),
        _ => Mark::new(
            count,
            MarkEffect::MoveOut(MoveOut {
                id,
                revision: None,
                final_endpoint: None,
                id_override: None,
            }),
        ),
    };
    for length in 1..mark.count {
        let (head, tail) = split_mark(&mark, length);
        assert_eq!(head.count + tail.count, mark.count);
        assert_eq!(try_merge_marks(&head, &tail), Some(mark.clone()));
    }
});
