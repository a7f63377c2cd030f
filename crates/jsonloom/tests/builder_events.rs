#![allow(missing_docs)]

use jsonloom::{
    BuilderOptions, Error, Event, JsonString, Kind, Limits, LogicError, MonotonicResource,
    NullResource, SBO_CHARS, Storage, Value, ValueBuilder, build,
};
use rstest::rstest;

#[test]
fn object_with_three_members() {
    let mut b = ValueBuilder::new(Storage::default());
    b.reset();
    b.begin_object().unwrap();
    b.insert_key("a").unwrap();
    b.insert_int64(1).unwrap();
    b.insert_key("b").unwrap();
    b.insert_null().unwrap();
    b.insert_key("c").unwrap();
    b.insert_string("hello").unwrap();
    b.end_object(3).unwrap();
    let v = b.release().unwrap();

    assert_eq!(v.kind(), Kind::Object);
    let o = v.as_object().unwrap();
    assert_eq!(o.len(), 3);
    assert_eq!(o.get("a").and_then(Value::as_i64), Some(1));
    assert!(o.get("b").is_some_and(Value::is_null));
    assert_eq!(o.get("c").and_then(Value::as_string).unwrap(), "hello");
}

#[test]
fn shape_follows_nesting() {
    let v = build(
        Storage::default(),
        [
            Event::BeginObject,
            Event::Key(b"rows"),
            Event::BeginArray,
            Event::BeginArray,
            Event::Int64(1),
            Event::Int64(2),
            Event::EndArray(2),
            Event::BeginArray,
            Event::EndArray(0),
            Event::EndArray(2),
            Event::Key(b"meta"),
            Event::BeginObject,
            Event::EndObject(0),
            Event::EndObject(2),
        ],
    )
    .unwrap();

    let o = v.as_object().unwrap();
    let rows = o.get("rows").and_then(Value::as_array).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].as_array().map(|a| a.len()), Some(2));
    assert_eq!(rows[1].as_array().map(|a| a.len()), Some(0));
    assert!(o.get("meta").and_then(Value::as_object).is_some_and(|m| m.is_empty()));
}

#[test]
fn later_duplicate_wins() {
    let v = build(
        Storage::default(),
        [
            Event::BeginObject,
            Event::Key(b"a"),
            Event::Int64(1),
            Event::Key(b"b"),
            Event::Int64(2),
            Event::KeyPart(b""),
            Event::Key(b"a"),
            Event::Int64(3),
            Event::EndObject(3),
        ],
    )
    .unwrap();
    let o = v.as_object().unwrap();
    assert_eq!(o.len(), 2);
    assert_eq!(o.get("a").and_then(Value::as_i64), Some(3));
    assert_eq!(o.get("b").and_then(Value::as_i64), Some(2));
}

#[rstest]
#[case(SBO_CHARS, true)]
#[case(SBO_CHARS + 1, false)]
fn inline_threshold_through_the_builder(#[case] len: usize, #[case] inline: bool) {
    let text = "x".repeat(len);
    let (head, tail) = text.split_at(len / 2);
    let v = build(
        Storage::default(),
        [Event::StringPart(head.as_bytes()), Event::String(tail.as_bytes())],
    )
    .unwrap();
    let s = v.as_string().unwrap();
    assert_eq!(s.is_inline(), inline);
    assert_eq!(s.as_bytes(), text.as_bytes());
    assert_eq!(s.as_bytes_with_nul().last(), Some(&0));
}

#[test]
fn release_errors() {
    let mut b = ValueBuilder::default();
    b.reset();
    b.begin_array().unwrap();
    assert_eq!(
        b.release(),
        Err(Error::Logic(LogicError::Incomplete { open: 1 }))
    );

    b.reset();
    b.insert_bool(true).unwrap();
    assert!(b.release().is_ok());
    assert_eq!(b.release(), Err(Error::Logic(LogicError::NoValue)));
}

#[test]
fn null_resource_builds_scalars_and_short_strings_only() {
    let sp = Storage::new(NullResource);
    assert_eq!(build(sp.clone(), [Event::Double(1.5)]), Ok(Value::Double(1.5)));
    let short = build(sp.clone(), [Event::String(b"tiny")]).unwrap();
    assert_eq!(short.as_string().unwrap(), "tiny");

    let err = build(sp, [Event::BeginArray, Event::Null, Event::EndArray(1)]).unwrap_err();
    assert!(matches!(err, Error::BadAlloc(_)));
}

#[test]
fn configured_limits_are_enforced() {
    let options = BuilderOptions {
        limits: Limits {
            max_object_size: 1,
            ..Limits::default()
        },
        value_capacity: 64,
        char_capacity: 256,
    };
    let mut b = ValueBuilder::with_options(Storage::default(), options);
    b.reset();
    b.begin_object().unwrap();
    b.insert_key("one").unwrap();
    b.insert_null().unwrap();
    b.insert_key("two").unwrap();
    let err = b.insert_null().unwrap_err();
    assert!(matches!(err, Error::Length(e) if e.what == "object" && e.max == 1));
    assert_eq!(b.depth(), 0);
}

#[test]
fn values_move_between_storages_by_copy() {
    let arena = Storage::new(MonotonicResource::new());
    let v = build(
        arena.clone(),
        [
            Event::BeginArray,
            Event::String(b"this string lives in the arena"),
            Event::EndArray(1),
        ],
    )
    .unwrap();
    assert_eq!(v.storage(), Some(&arena));

    let heap = v.clone().into_storage(&Storage::default()).unwrap();
    assert_eq!(heap.storage(), Some(&Storage::default()));
    assert_eq!(heap, v);

    let same = v.into_storage(&arena).unwrap();
    assert_eq!(same.storage(), Some(&arena));
}

#[test]
fn strings_support_editing() {
    let mut s = JsonString::from_bytes_in("hello", Storage::default()).unwrap();
    s.push_bytes(" world, this is long").unwrap();
    s.replace_range(0..5, "HELLO").unwrap();
    s.erase(11, 9);
    assert_eq!(s, "HELLO world long");
    s.truncate(5);
    s.shrink_to_fit().unwrap();
    assert!(s.is_inline());
}
