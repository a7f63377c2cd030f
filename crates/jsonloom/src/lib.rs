//! Allocator-aware JSON values and a non-recursive incremental builder.
//!
//! A [`Value`] is a closed sum over null, booleans, 64-bit integers,
//! doubles, strings, arrays and objects. Strings, arrays and objects each
//! own a single backing allocation obtained from a [`Storage`], a handle to
//! a user-supplied [`MemoryResource`]. The [`ValueBuilder`] turns the flat
//! event stream of a parser (`begin_array`, `insert_key`, `insert_string`,
//! ...) into one finished value without recursing on nesting depth.
//!
//! ```rust
//! use jsonloom::{Storage, Value, ValueBuilder};
//!
//! let mut builder = ValueBuilder::new(Storage::default());
//! builder.reset();
//! builder.begin_array().unwrap();
//! builder.insert_int64(-1).unwrap();
//! builder.insert_string("two").unwrap();
//! builder.end_array(2).unwrap();
//!
//! let value = builder.release().unwrap();
//! assert_eq!(value.as_array().unwrap()[0], Value::Int64(-1));
//! ```

#![no_std]
#![allow(missing_docs)]
extern crate alloc;

#[cfg(test)]
extern crate std;

mod array;
mod builder;
mod digest;
mod error;
mod event;
mod object;
mod options;
mod resource;
mod stack;
mod storage;
mod string;
mod value;

#[cfg(any(test, feature = "serde"))]
mod serde_impl;

#[cfg(test)]
mod tests;

pub use array::Array;
pub use builder::ValueBuilder;
pub use error::{BadAlloc, Error, LengthError, LogicError, Result};
pub use event::{Event, build};
pub use object::{KeyValuePair, Object};
pub use options::{BuilderOptions, Limits, MAX_STRING_SIZE, MAX_STRUCTURED_SIZE};
pub use resource::{DefaultResource, MonotonicResource, NullResource, StaticResource};
pub use storage::{MemoryResource, Storage};
pub use string::{JsonString, SBO_CHARS};
pub use value::{Kind, Value, ValueMut};
