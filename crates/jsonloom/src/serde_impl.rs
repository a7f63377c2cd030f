//! `serde::Serialize` for values. Strings that are not valid UTF-8 are
//! emitted with replacement characters.

use bstr::ByteSlice;
use serde::{
    Serialize, Serializer,
    ser::{SerializeMap, SerializeSeq},
};

use crate::{array::Array, object::Object, string::JsonString, value::Value};

impl Serialize for JsonString {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.as_bytes().to_str_lossy())
    }
}

impl Serialize for Array {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut seq = serializer.serialize_seq(Some(self.len()))?;
        for value in self {
            seq.serialize_element(value)?;
        }
        seq.end()
    }
}

impl Serialize for Object {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for pair in self {
            map.serialize_entry(&pair.key().to_str_lossy(), pair.value())?;
        }
        map.end()
    }
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int64(i) => serializer.serialize_i64(*i),
            Value::Uint64(u) => serializer.serialize_u64(*u),
            Value::Double(d) => serializer.serialize_f64(*d),
            Value::String(s) => s.serialize(serializer),
            Value::Array(a) => a.serialize(serializer),
            Value::Object(o) => o.serialize(serializer),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{Event, Storage, build};

    #[test]
    fn serializes_through_serde_json() {
        let v = build(
            Storage::default(),
            [
                Event::BeginArray,
                Event::Null,
                Event::Bool(true),
                Event::Int64(-3),
                Event::Uint64(u64::MAX),
                Event::Double(0.25),
                Event::String(b"s\xffs"),
                Event::BeginObject,
                Event::Key(b"k"),
                Event::BeginArray,
                Event::EndArray(0),
                Event::EndObject(1),
                Event::EndArray(7),
            ],
        )
        .unwrap();
        insta::assert_snapshot!(
            serde_json::to_string(&v).unwrap(),
            @r#"[null,true,-3,18446744073709551615,0.25,"s�s",{"k":[]}]"#
        );
    }
}
