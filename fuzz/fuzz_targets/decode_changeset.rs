#![no_main]

//! Fuzz target for changeset decoding: arbitrary JSON must either fail to
//! parse or produce a changeset the validator and mark algebra can walk
//! without panicking.

use libfuzzer_sys::fuzz_target;
use seqmark::{Changeset, settle_mark, validate_changeset};

fuzz_target!(|data: &[u8]| {
    let Ok(changeset) = serde_json::from_slice::<Changeset<u8>>(data) else {
        return;
    };
    let _ = validate_changeset(&changeset);
    let _ = changeset.input_length();
    let _ = changeset.output_length();
    let _ = changeset.revision_knowledge(None);
    for mark in &changeset {
        if mark.count > 0 {
            let _ = settle_mark(mark, None);
        }
    }
});
