//! The [`Value`] type.
//!
//! Scalars are stored inline and carry no storage. Strings, arrays and
//! objects own their backing store together with the [`Storage`] it was
//! allocated from.

use core::fmt;

use crate::{
    array::Array,
    error::{Result, clone_or_abort},
    object::Object,
    storage::Storage,
    string::JsonString,
};

/// A JSON value.
///
/// # Examples
///
/// ```
/// use jsonloom::{Array, Storage, Value};
///
/// let mut array = Array::new_in(Storage::default());
/// array.push(Value::from(1)).unwrap();
/// array.push(Value::Null).unwrap();
///
/// let v = Value::Array(array);
/// assert_eq!(v.as_array().map(|a| a.len()), Some(2));
/// ```
pub enum Value {
    Null,
    Bool(bool),
    Int64(i64),
    Uint64(u64),
    Double(f64),
    String(JsonString),
    Array(Array),
    Object(Object),
}

/// The discriminant of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Null,
    Bool,
    Int64,
    Uint64,
    Double,
    String,
    Array,
    Object,
}

impl Default for Value {
    fn default() -> Self {
        Self::Null
    }
}

impl Value {
    #[must_use]
    pub fn kind(&self) -> Kind {
        match self {
            Self::Null => Kind::Null,
            Self::Bool(_) => Kind::Bool,
            Self::Int64(_) => Kind::Int64,
            Self::Uint64(_) => Kind::Uint64,
            Self::Double(_) => Kind::Double,
            Self::String(_) => Kind::String,
            Self::Array(_) => Kind::Array,
            Self::Object(_) => Kind::Object,
        }
    }

    /// Returns `true` if the value is [`Null`].
    ///
    /// [`Null`]: Value::Null
    ///
    /// # Examples
    ///
    /// ```
    /// use jsonloom::Value;
    ///
    /// assert!(Value::Null.is_null());
    /// assert!(!Value::Bool(false).is_null());
    /// ```
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn is_bool(&self) -> bool {
        matches!(self, Self::Bool(_))
    }

    /// Returns `true` for [`Int64`], [`Uint64`] and [`Double`].
    ///
    /// [`Int64`]: Value::Int64
    /// [`Uint64`]: Value::Uint64
    /// [`Double`]: Value::Double
    #[must_use]
    pub fn is_number(&self) -> bool {
        matches!(self, Self::Int64(_) | Self::Uint64(_) | Self::Double(_))
    }

    #[must_use]
    pub fn is_string(&self) -> bool {
        matches!(self, Self::String(_))
    }

    #[must_use]
    pub fn is_array(&self) -> bool {
        matches!(self, Self::Array(_))
    }

    #[must_use]
    pub fn is_object(&self) -> bool {
        matches!(self, Self::Object(_))
    }

    /// Whether this value owns a backing store (and so a [`Storage`]).
    #[must_use]
    pub fn is_structured(&self) -> bool {
        matches!(self, Self::String(_) | Self::Array(_) | Self::Object(_))
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The value as an `i64`, if it is an integer that fits.
    ///
    /// # Examples
    ///
    /// ```
    /// use jsonloom::Value;
    ///
    /// assert_eq!(Value::Uint64(7).as_i64(), Some(7));
    /// assert_eq!(Value::Uint64(u64::MAX).as_i64(), None);
    /// assert_eq!(Value::Double(1.0).as_i64(), None);
    /// ```
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int64(i) => Some(*i),
            Self::Uint64(u) => i64::try_from(*u).ok(),
            _ => None,
        }
    }

    /// The value as a `u64`, if it is a non-negative integer.
    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Int64(i) => u64::try_from(*i).ok(),
            Self::Uint64(u) => Some(*u),
            _ => None,
        }
    }

    /// The value as an `f64`; integers are converted.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int64(i) => Some(*i as f64),
            Self::Uint64(u) => Some(*u as f64),
            Self::Double(d) => Some(*d),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_string(&self) -> Option<&JsonString> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_string_mut(&mut self) -> Option<&mut JsonString> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_array_mut(&mut self) -> Option<&mut Array> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_object_mut(&mut self) -> Option<&mut Object> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    /// The storage owning this value's backing store; `None` for scalars.
    #[must_use]
    pub fn storage(&self) -> Option<&Storage> {
        match self {
            Self::String(s) => Some(s.storage()),
            Self::Array(a) => Some(a.storage()),
            Self::Object(o) => Some(o.storage()),
            _ => None,
        }
    }

    /// Move the value out, leaving [`Null`](Value::Null) behind.
    ///
    /// # Examples
    ///
    /// ```
    /// use jsonloom::Value;
    ///
    /// let mut v = Value::from(true);
    /// assert_eq!(v.take(), Value::Bool(true));
    /// assert!(v.is_null());
    /// ```
    #[must_use]
    pub fn take(&mut self) -> Self {
        core::mem::take(self)
    }

    /// Deep-copy the value so that everything it owns is allocated from
    /// `sp`.
    ///
    /// # Errors
    ///
    /// `BadAlloc` when `sp` is exhausted. Partial copies are released.
    pub fn try_clone_in(&self, sp: Storage) -> Result<Self> {
        Ok(match self {
            Self::Null => Self::Null,
            Self::Bool(b) => Self::Bool(*b),
            Self::Int64(i) => Self::Int64(*i),
            Self::Uint64(u) => Self::Uint64(*u),
            Self::Double(d) => Self::Double(*d),
            Self::String(s) => Self::String(s.try_clone_in(sp)?),
            Self::Array(a) => Self::Array(a.try_clone_in(sp)?),
            Self::Object(o) => Self::Object(o.try_clone_in(sp)?),
        })
    }

    /// Rehome the value under `sp`: moved as-is when its storage compares
    /// equal to `sp`, deep-copied otherwise.
    ///
    /// # Errors
    ///
    /// `BadAlloc` if the copy fails; the original is dropped either way.
    pub fn into_storage(self, sp: &Storage) -> Result<Self> {
        let foreign = matches!(self.storage(), Some(own) if own != sp);
        if foreign {
            self.try_clone_in(sp.clone())
        } else {
            Ok(self)
        }
    }
}

/// Exclusive access to an element of an [`Array`] or a member of an
/// [`Object`].
///
/// Whatever the slot holds when the guard drops is rehomed under the
/// container's storage, so assigning a value from another storage through
/// the guard deep-copies it. [`set`](Self::set) does the same eagerly and
/// reports allocation failure instead of aborting.
///
/// # Examples
///
/// ```
/// use jsonloom::{Array, MonotonicResource, Storage, Value};
///
/// let mr = MonotonicResource::new();
/// // SAFETY: `mr` outlives the array.
/// let arena = unsafe { Storage::borrowed(&mr) };
/// let mut array = Array::new_in(arena.clone());
/// array.push(Value::Null).unwrap();
///
/// let mut on_heap = Array::new_in(Storage::default());
/// on_heap.push(Value::from(1)).unwrap();
/// *array.get_mut(0).unwrap() = Value::Array(on_heap);
/// assert_eq!(array[0].storage(), Some(&arena));
/// ```
pub struct ValueMut<'a> {
    sp: &'a Storage,
    value: &'a mut Value,
}

impl<'a> ValueMut<'a> {
    pub(crate) fn new(value: &'a mut Value, sp: &'a Storage) -> Self {
        Self { sp, value }
    }

    /// Replace the value, copying `value` into the container's storage when
    /// it lives elsewhere. Returns the previous value.
    ///
    /// # Errors
    ///
    /// `BadAlloc` if the copy fails; the slot is unchanged.
    pub fn set(&mut self, value: Value) -> Result<Value> {
        let value = value.into_storage(self.sp)?;
        Ok(core::mem::replace(self.value, value))
    }
}

impl core::ops::Deref for ValueMut<'_> {
    type Target = Value;

    fn deref(&self) -> &Value {
        self.value
    }
}

impl core::ops::DerefMut for ValueMut<'_> {
    fn deref_mut(&mut self) -> &mut Value {
        self.value
    }
}

impl Drop for ValueMut<'_> {
    fn drop(&mut self) {
        if matches!(self.value.storage(), Some(own) if own != self.sp) {
            let foreign = self.value.take();
            *self.value = clone_or_abort(foreign.into_storage(self.sp));
        }
    }
}

impl fmt::Debug for ValueMut<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.value, f)
    }
}

impl Clone for Value {
    fn clone(&self) -> Self {
        match self.storage() {
            Some(sp) => clone_or_abort(self.try_clone_in(sp.clone())),
            None => clone_or_abort(self.try_clone_in(Storage::default())),
        }
    }
}

/// Structural equality. Objects compare as unordered maps, and an
/// [`Int64`](Value::Int64) equals a [`Uint64`](Value::Uint64) holding the
/// same non-negative number.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int64(a), Self::Int64(b)) => a == b,
            (Self::Uint64(a), Self::Uint64(b)) => a == b,
            (Self::Int64(i), Self::Uint64(u)) | (Self::Uint64(u), Self::Int64(i)) => {
                u64::try_from(*i).is_ok_and(|i| i == *u)
            }
            #[allow(clippy::float_cmp)]
            (Self::Double(a), Self::Double(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => fmt::Debug::fmt(b, f),
            Self::Int64(i) => fmt::Debug::fmt(i, f),
            Self::Uint64(u) => write!(f, "{u}u"),
            Self::Double(d) => fmt::Debug::fmt(d, f),
            Self::String(s) => fmt::Debug::fmt(s, f),
            Self::Array(a) => fmt::Debug::fmt(a, f),
            Self::Object(o) => fmt::Debug::fmt(o, f),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int64(v.into())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::Uint64(v.into())
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Self::Uint64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<JsonString> for Value {
    fn from(v: JsonString) -> Self {
        Self::String(v)
    }
}

impl From<Array> for Value {
    fn from(v: Array) -> Self {
        Self::Array(v)
    }
}

impl From<Object> for Value {
    fn from(v: Object) -> Self {
        Self::Object(v)
    }
}
