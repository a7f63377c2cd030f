use crate::{array::Array, object::Object, string::JsonString};

/// Configured ceiling on the number of elements in an array or object.
///
/// The effective maximum is the smaller of this and what the address width
/// allows for the element size.
pub const MAX_STRUCTURED_SIZE: usize = 0x7fff_fffe;

/// Configured ceiling on the length of a string or key, in bytes.
pub const MAX_STRING_SIZE: usize = 0x7fff_fffe;

/// Size limits enforced by the [`ValueBuilder`](crate::ValueBuilder).
///
/// Exceeding a limit fails the offending insert or `end_*` call with a
/// [`LengthError`](crate::LengthError) and unwinds the builder.
///
/// # Examples
///
/// ```rust
/// use jsonloom::{BuilderOptions, Limits, Storage, ValueBuilder};
///
/// let options = BuilderOptions {
///     limits: Limits {
///         max_string_size: 1024,
///         ..Limits::default()
///     },
///     ..BuilderOptions::default()
/// };
/// let builder = ValueBuilder::with_options(Storage::default(), options);
/// # drop(builder);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Maximum number of elements in one array.
    ///
    /// # Default
    ///
    /// [`Array::max_size()`]
    pub max_array_size: usize,

    /// Maximum number of members in one object, counted before duplicate
    /// keys are merged.
    ///
    /// # Default
    ///
    /// [`Object::max_size()`]
    pub max_object_size: usize,

    /// Maximum length of one string or key in bytes, including every part
    /// accumulated through `insert_*_part`.
    ///
    /// # Default
    ///
    /// [`JsonString::max_size()`]
    pub max_string_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_array_size: Array::max_size(),
            max_object_size: Object::max_size(),
            max_string_size: JsonString::max_size(),
        }
    }
}

/// Configuration for a [`ValueBuilder`](crate::ValueBuilder).
///
/// The capacities only pre-size the builder's temporary stacks; they are
/// reserved best-effort and grow on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuilderOptions {
    pub limits: Limits,

    /// Number of committed values and key-value pairs to make room for up
    /// front.
    ///
    /// # Default
    ///
    /// `0`
    pub value_capacity: usize,

    /// Number of pending key and string bytes to make room for up front.
    ///
    /// # Default
    ///
    /// `0`
    pub char_capacity: usize,
}

impl Default for BuilderOptions {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            value_capacity: 0,
            char_capacity: 0,
        }
    }
}
