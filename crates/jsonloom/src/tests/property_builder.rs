use alloc::vec::Vec;

use quickcheck::QuickCheck;
use quickcheck_macros::quickcheck;

use super::{CountingResource, arbitrary::Doc};
use crate::{MonotonicResource, Storage, ValueBuilder, build};

/// Property: building the events of a document, with strings and keys cut
/// into arbitrary parts, yields that document, and dropping it returns every
/// allocation.
#[test]
fn events_roundtrip_quickcheck() {
    #[allow(clippy::needless_pass_by_value)]
    fn prop(doc: Doc, splits: Vec<usize>) -> bool {
        let mr = CountingResource::new();
        let value = build(Storage::new(mr.clone()), doc.events(&splits)).unwrap();
        let ok = doc.matches(&value);
        drop(value);
        ok && mr.outstanding() == 0
    }

    #[cfg(not(miri))]
    let tests = 1_000;
    #[cfg(miri)]
    let tests = 10;

    QuickCheck::new()
        .tests(tests)
        .quickcheck(prop as fn(Doc, Vec<usize>) -> bool);
}

/// Property: one builder can produce any number of documents in a row.
#[quickcheck]
fn builder_reuse(docs: Vec<Doc>) -> bool {
    let mut builder = ValueBuilder::new(Storage::default());
    docs.iter().all(|doc| {
        builder.reset();
        for event in doc.events(&[3]) {
            builder.handle(event).unwrap();
        }
        builder.release().is_ok_and(|v| doc.matches(&v))
    })
}

/// Property: documents built in an arena match the same documents built on
/// the heap.
#[quickcheck]
fn arena_and_heap_agree(doc: Doc, splits: Vec<usize>) -> bool {
    let mr = MonotonicResource::with_block_size(256);
    // SAFETY: `mr` outlives both values.
    let arena = unsafe { Storage::borrowed(&mr) };
    let in_arena = build(arena, doc.events(&splits)).unwrap();
    let on_heap = build(Storage::default(), doc.events(&[])).unwrap();
    in_arena == on_heap && doc.matches(&in_arena)
}
