#![no_main]

use arbitrary::{Arbitrary, Unstructured};
use jsonloom::{MonotonicResource, Storage, ValueBuilder};
use libfuzzer_sys::fuzz_target;
use serde_json::{Map, Number, Value};

#[derive(Debug)]
struct ArbitraryValue(Value);

impl<'a> Arbitrary<'a> for ArbitraryValue {
    fn arbitrary(u: &mut Unstructured<'_>) -> arbitrary::Result<Self> {
        let node_type = u.choose_index(21)?;
        let value = match node_type {
            0 => Value::Null,
            1 => Value::Bool(u.arbitrary()?),
            2 => {
                let n: f64 = u.arbitrary()?;
                Value::Number(Number::from_f64(n).ok_or(arbitrary::Error::IncorrectFormat)?)
            }
            3 => Value::Number(Number::from(u.arbitrary::<i64>()?)),
            4 => Value::Number(Number::from(u.arbitrary::<u64>()?)),
            5..=10 => Value::String(u.arbitrary()?),
            11..=15 => {
                let elems: Vec<ArbitraryValue> = u.arbitrary()?;
                Value::Array(elems.into_iter().map(|v| v.0).collect())
            }
            16..=20 => {
                let m: Vec<(String, ArbitraryValue)> = u.arbitrary()?;
                Value::Object(Map::from_iter(m.into_iter().map(|(k, v)| (k, v.0))))
            }
            _ => Err(arbitrary::Error::IncorrectFormat)?,
        };
        Ok(ArbitraryValue(value))
    }
}

/// Feed `text` as a run of parts cut at `split`-derived offsets, finishing
/// with `last`.
fn feed_parts(
    builder: &mut ValueBuilder,
    text: &[u8],
    split: &mut u64,
    part: fn(&mut ValueBuilder, &[u8]) -> jsonloom::Result<()>,
    last: fn(&mut ValueBuilder, &[u8]) -> jsonloom::Result<()>,
) -> jsonloom::Result<()> {
    let mut rest = text;
    while !rest.is_empty() && *split & 1 == 1 {
        *split = split.rotate_right(7) ^ 0x9e37_79b9_7f4a_7c15;
        let at = (*split as usize) % (rest.len() + 1);
        let (head, tail) = rest.split_at(at);
        part(builder, head)?;
        rest = tail;
    }
    last(builder, rest)
}

fn feed(builder: &mut ValueBuilder, value: &Value, split: &mut u64) -> jsonloom::Result<()> {
    match value {
        Value::Null => builder.insert_null(),
        Value::Bool(b) => builder.insert_bool(*b),
        Value::Number(n) => match (n.as_u64(), n.as_i64(), n.as_f64()) {
            (Some(u), _, _) => builder.insert_uint64(u),
            (None, Some(i), _) => builder.insert_int64(i),
            (None, None, Some(d)) => builder.insert_double(d),
            (None, None, None) => unreachable!(),
        },
        Value::String(s) => feed_parts(
            builder,
            s.as_bytes(),
            split,
            |b, p| b.insert_string_part(p),
            |b, p| b.insert_string(p),
        ),
        Value::Array(elems) => {
            builder.begin_array()?;
            for elem in elems {
                feed(builder, elem, split)?;
            }
            builder.end_array(elems.len())
        }
        Value::Object(members) => {
            builder.begin_object()?;
            for (key, elem) in members {
                feed_parts(
                    builder,
                    key.as_bytes(),
                    split,
                    |b, p| b.insert_key_part(p),
                    |b, p| b.insert_key(p),
                )?;
                feed(builder, elem, split)?;
            }
            builder.end_object(members.len())
        }
    }
}

fn builder(data: &[u8]) {
    if data.len() < 9 {
        return;
    }
    let flags = data[0];
    let mut split = u64::from_le_bytes(data[1..9].try_into().unwrap());
    let Ok(ArbitraryValue(expected)) = ArbitraryValue::arbitrary(&mut Unstructured::new(&data[9..]))
    else {
        return;
    };

    let mr = MonotonicResource::with_block_size(64);
    let sp = if flags & 1 == 0 {
        Storage::default()
    } else {
        // SAFETY: `mr` outlives the builder and every value built here.
        unsafe { Storage::borrowed(&mr) }
    };

    let mut builder = ValueBuilder::new(sp);
    builder.reset();
    feed(&mut builder, &expected, &mut split).expect("feed failed");
    let value = builder.release().expect("release failed");

    let actual = serde_json::to_value(&value).expect("serialize failed");
    assert_eq!(actual, expected);

    let copied = value.try_clone_in(Storage::default()).expect("copy failed");
    assert_eq!(copied, value);
}

fuzz_target!(|data: &[u8]| builder(data));
