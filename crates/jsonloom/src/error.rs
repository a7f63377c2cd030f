use core::alloc::Layout;

use thiserror::Error;

/// A requested size exceeds what a string, array, or object can hold.
///
/// Raised before anything is mutated, so the structure that reported it is
/// left exactly as it was.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("{what} size {requested} exceeds the maximum of {max}")]
pub struct LengthError {
    /// Which structure refused the request (`"array"`, `"object"`, ...).
    pub what: &'static str,
    pub requested: usize,
    pub max: usize,
}

impl LengthError {
    pub(crate) const fn new(what: &'static str, requested: usize, max: usize) -> Self {
        Self {
            what,
            requested,
            max,
        }
    }
}

/// The memory resource could not satisfy an allocation.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("memory resource exhausted allocating {size} bytes", size = .layout.size())]
pub struct BadAlloc {
    pub layout: Layout,
}

/// `release` was called on a builder that does not hold exactly one
/// completed top-level value.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicError {
    #[error("no value")]
    NoValue,
    #[error("incomplete document: {open} unclosed array(s) or object(s)")]
    Incomplete { open: usize },
    #[error("document has {0} top-level values, expected exactly one")]
    MultipleValues(usize),
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error(transparent)]
    Length(#[from] LengthError),
    #[error(transparent)]
    BadAlloc(#[from] BadAlloc),
    #[error(transparent)]
    Logic(#[from] LogicError),
}

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Unwrap the result of a deep copy made for `Clone`, which cannot report
/// failure. Exhaustion aborts the way the standard collections do.
pub(crate) fn clone_or_abort<T>(result: Result<T>) -> T {
    match result {
        Ok(value) => value,
        Err(Error::BadAlloc(BadAlloc { layout })) => alloc::alloc::handle_alloc_error(layout),
        Err(e) => panic!("clone failed: {e}"),
    }
}
