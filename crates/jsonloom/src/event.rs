//! Structural events, as produced by a parser, and a driver feeding them to
//! a [`ValueBuilder`].
//!
//! # Examples
//!
//! ```
//! use jsonloom::{Event, Storage, build};
//!
//! let value = build(
//!     Storage::default(),
//!     [
//!         Event::BeginArray,
//!         Event::StringPart(b"foo"),
//!         Event::String(b"bar"),
//!         Event::Uint64(7),
//!         Event::EndArray(2),
//!     ],
//! )
//! .unwrap();
//!
//! let array = value.as_array().unwrap();
//! assert_eq!(array[0].as_string().unwrap(), "foobar");
//! assert_eq!(array[1].as_u64(), Some(7));
//! ```

use crate::{builder::ValueBuilder, error::Result, storage::Storage, value::Value};

/// One call on the builder's event interface.
///
/// `*Part` events may repeat any number of times before the event that
/// finishes the key or string. The counts carried by `EndArray` and
/// `EndObject` are the number of elements or members since the matching
/// `Begin*`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Event<'a> {
    BeginArray,
    EndArray(usize),
    BeginObject,
    EndObject(usize),
    KeyPart(&'a [u8]),
    Key(&'a [u8]),
    StringPart(&'a [u8]),
    String(&'a [u8]),
    Int64(i64),
    Uint64(u64),
    Double(f64),
    Bool(bool),
    Null,
}

impl ValueBuilder {
    /// Apply one event.
    ///
    /// # Errors
    ///
    /// Whatever the corresponding `begin_*`/`end_*`/`insert_*` call returns.
    pub fn handle(&mut self, event: Event<'_>) -> Result<()> {
        match event {
            Event::BeginArray => self.begin_array(),
            Event::EndArray(n) => self.end_array(n),
            Event::BeginObject => self.begin_object(),
            Event::EndObject(n) => self.end_object(n),
            Event::KeyPart(bytes) => self.insert_key_part(bytes),
            Event::Key(bytes) => self.insert_key(bytes),
            Event::StringPart(bytes) => self.insert_string_part(bytes),
            Event::String(bytes) => self.insert_string(bytes),
            Event::Int64(i) => self.insert_int64(i),
            Event::Uint64(u) => self.insert_uint64(u),
            Event::Double(d) => self.insert_double(d),
            Event::Bool(b) => self.insert_bool(b),
            Event::Null => self.insert_null(),
        }
    }
}

/// Build one document from `events`, allocating it from `sp`.
///
/// # Errors
///
/// The first error returned by the builder, or a
/// [`LogicError`](crate::LogicError) if the events do not form exactly one
/// complete value.
///
/// # Panics
///
/// If the events are unbalanced in a way the builder treats as a contract
/// violation (see [`ValueBuilder`]).
pub fn build<'a>(sp: Storage, events: impl IntoIterator<Item = Event<'a>>) -> Result<Value> {
    let mut builder = ValueBuilder::new(sp);
    builder.reset();
    for event in events {
        builder.handle(event)?;
    }
    builder.release()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::Error, error::LogicError};

    #[test]
    fn unclosed_array_is_incomplete() {
        let err = build(Storage::default(), [Event::BeginArray, Event::BeginArray]).unwrap_err();
        assert_eq!(err, Error::Logic(LogicError::Incomplete { open: 2 }));
    }

    #[test]
    fn empty_stream_has_no_value() {
        let err = build(Storage::default(), core::iter::empty()).unwrap_err();
        assert_eq!(err, Error::Logic(LogicError::NoValue));
    }

    #[test]
    fn pending_key_parts_in_an_open_object_are_incomplete() {
        let err = build(
            Storage::default(),
            [Event::BeginObject, Event::KeyPart(b"k")],
        )
        .unwrap_err();
        assert_eq!(err, Error::Logic(LogicError::Incomplete { open: 1 }));
    }
}
