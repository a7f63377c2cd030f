//! Non-recursive construction of a [`Value`] from a flat stream of
//! structural events.
//!
//! Finished cells are kept on typed stacks: plain values for the top level
//! and for arrays, key-value pairs for objects. Key and string bytes that
//! arrive in parts accumulate on a separate byte stack. Closing a container
//! moves its top `n` cells into a freshly allocated backing store in one
//! step, so nesting depth never turns into call depth.
//!
//! # Examples
//!
//! ```
//! use jsonloom::{Storage, ValueBuilder};
//!
//! let mut builder = ValueBuilder::new(Storage::default());
//! builder.reset();
//! builder.begin_object().unwrap();
//! builder.insert_key("a").unwrap();
//! builder.insert_int64(1).unwrap();
//! builder.insert_key_part("gree").unwrap();
//! builder.insert_key("ting").unwrap();
//! builder.insert_string_part("hel").unwrap();
//! builder.insert_string("lo").unwrap();
//! builder.end_object(2).unwrap();
//!
//! let value = builder.release().unwrap();
//! let object = value.as_object().unwrap();
//! assert_eq!(object.get("greeting").and_then(|v| v.as_string()).unwrap(), "hello");
//! ```

use crate::{
    array::Array,
    error::{LengthError, LogicError, Result},
    object::{KeyValuePair, Object},
    options::{BuilderOptions, Limits},
    stack::RawStack,
    storage::Storage,
    string::{JsonString, KeyString},
    value::Value,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Freshly constructed or cleared.
    Ready,
    /// The last document was released.
    NeedsReset,
    /// Expecting the single top-level value.
    Top,
    Array,
    /// Expecting a key or the end of the object.
    Object,
    /// A complete key is on the byte stack, waiting for its value.
    Key,
}

/// What a nesting level saves about its parent.
#[derive(Debug, Clone, Copy)]
struct Frame {
    state: State,
    count: usize,
    /// Length of the parent's key, which stays on the byte stack while the
    /// child is built.
    key_len: usize,
}

/// Incremental, non-recursive JSON value builder.
///
/// Feed it the events of one document between [`reset`](Self::reset) and
/// [`release`](Self::release). Every fallible call that fails unwinds the
/// whole partial document (as [`clear`](Self::clear) does) before returning
/// the error. Nothing is leaked, but the builder must be
/// [`reset`](Self::reset) before it accepts the next document.
///
/// Calls that the event stream could only produce if it were malformed
/// (unbalanced `end_*`, a wrong element count, a value where a key is
/// expected) panic.
pub struct ValueBuilder {
    sp: Storage,
    values: RawStack<Value>,
    pairs: RawStack<KeyValuePair>,
    frames: RawStack<Frame>,
    chars: RawStack<u8>,
    state: State,
    count: usize,
    key_len: usize,
    pending: usize,
    limits: Limits,
}

impl ValueBuilder {
    /// A builder whose values are allocated from `sp`.
    #[must_use]
    pub fn new(sp: Storage) -> Self {
        Self::with_options(sp, BuilderOptions::default())
    }

    #[must_use]
    pub fn with_options(sp: Storage, options: BuilderOptions) -> Self {
        Self::with_stack_storage(sp, Storage::default(), options)
    }

    /// A builder whose construction stacks are allocated from `stack`
    /// instead of the global allocator, for example a [`StaticResource`]
    /// over a scratch buffer. Finished values still come from `sp`.
    ///
    /// [`StaticResource`]: crate::StaticResource
    #[must_use]
    pub fn with_stack_storage(sp: Storage, stack: Storage, options: BuilderOptions) -> Self {
        let mut builder = Self {
            sp,
            values: RawStack::new_in(stack.clone()),
            pairs: RawStack::new_in(stack.clone()),
            frames: RawStack::new_in(stack.clone()),
            chars: RawStack::new_in(stack),
            state: State::Ready,
            count: 0,
            key_len: 0,
            pending: 0,
            limits: options.limits,
        };
        builder.reserve(options.value_capacity, options.char_capacity);
        builder
    }

    /// The storage finished values are allocated from.
    #[must_use]
    pub fn storage(&self) -> &Storage {
        &self.sp
    }

    #[must_use]
    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Number of arrays and objects currently open.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Pre-size the construction stacks for `values` cells and `chars`
    /// pending bytes. Failure to allocate is ignored; the stacks grow on
    /// demand anyway.
    pub fn reserve(&mut self, values: usize, chars: usize) {
        let result = self
            .values
            .reserve(values)
            .and_then(|()| self.pairs.reserve(values))
            .and_then(|()| self.chars.reserve(chars));
        if let Err(e) = result {
            log::debug!("builder: ignoring failed reservation: {e}");
        }
    }

    /// Discard any partial document and start a new one.
    pub fn reset(&mut self) {
        self.clear();
        self.state = State::Top;
        log::debug!("builder: reset");
    }

    /// Like [`reset`](Self::reset), allocating the next document from `sp`.
    pub fn reset_in(&mut self, sp: Storage) {
        self.clear();
        self.sp = sp;
        self.state = State::Top;
        log::debug!("builder: reset with new storage");
    }

    /// Destroy every committed cell and pending byte.
    ///
    /// When the result storage neither frees memory nor counts references,
    /// the cells are abandoned without visiting them.
    pub fn clear(&mut self) {
        if self.sp.needs_drop() {
            while let Some(pair) = self.pairs.pop() {
                // SAFETY: every pair's key was allocated from `self.sp`.
                unsafe { pair.destroy(&self.sp) };
            }
            self.values.clear();
        } else {
            // SAFETY: the cells own nothing that needs releasing.
            unsafe {
                self.pairs.forget_top(self.pairs.len());
                self.values.forget_top(self.values.len());
            }
        }
        self.frames.clear();
        self.chars.truncate(0);
        self.state = State::Ready;
        self.count = 0;
        self.key_len = 0;
        self.pending = 0;
    }

    /// Take the finished document.
    ///
    /// # Errors
    ///
    /// [`LogicError`] unless exactly one top-level value is complete. The
    /// builder is cleared either way and must be [`reset`](Self::reset)
    /// before the next document.
    pub fn release(&mut self) -> Result<Value> {
        let problem = match self.state {
            State::Top if self.pending > 0 => Some(LogicError::Incomplete { open: 0 }),
            State::Top if self.count == 1 => None,
            State::Top if self.count > 1 => Some(LogicError::MultipleValues(self.count)),
            State::Top | State::Ready | State::NeedsReset => Some(LogicError::NoValue),
            State::Array | State::Object | State::Key => Some(LogicError::Incomplete {
                open: self.frames.len(),
            }),
        };
        if let Some(e) = problem {
            log::debug!("builder: release failed: {e}");
            self.clear();
            return Err(e.into());
        }
        let Some(value) = self.values.pop() else {
            unreachable!("the top level holds one committed value")
        };
        self.clear();
        self.state = State::NeedsReset;
        log::debug!("builder: released {:?} value", value.kind());
        Ok(value)
    }

    // ─────────────────────────────────────────────────────────────────────
    //  Containers
    // ─────────────────────────────────────────────────────────────────────

    /// # Errors
    ///
    /// `BadAlloc` if a stack cannot grow.
    pub fn begin_array(&mut self) -> Result<()> {
        self.unwind_on_err(|b| b.begin(State::Array))
    }

    /// Close the innermost array, which must hold `n` elements.
    ///
    /// # Errors
    ///
    /// [`LengthError`] if `n` exceeds the array limit, `BadAlloc` on
    /// exhaustion.
    ///
    /// # Panics
    ///
    /// If the innermost open container is not an array or `n` is not its
    /// element count.
    pub fn end_array(&mut self, n: usize) -> Result<()> {
        self.unwind_on_err(|b| {
            b.expect_end(State::Array, n);
            if n > b.limits.max_array_size {
                return Err(LengthError::new("array", n, b.limits.max_array_size).into());
            }
            // SAFETY: the top `n` values belong to this array and were
            // allocated from `sp`; they are forgotten only once moved.
            let array = unsafe { Array::from_relocated(b.values.top_ptr(n), n, b.sp.clone())? };
            unsafe { b.values.forget_top(n) };
            b.pop_frame();
            b.commit(Value::Array(array))
        })
    }

    /// # Errors
    ///
    /// `BadAlloc` if a stack cannot grow.
    pub fn begin_object(&mut self) -> Result<()> {
        self.unwind_on_err(|b| b.begin(State::Object))
    }

    /// Close the innermost object, which must hold `n` members. Repeated
    /// keys keep their last value and count once in the result.
    ///
    /// # Errors
    ///
    /// [`LengthError`] if `n` exceeds the object limit, `BadAlloc` on
    /// exhaustion.
    ///
    /// # Panics
    ///
    /// If the innermost open container is not an object waiting for a key,
    /// or `n` is not its member count.
    pub fn end_object(&mut self, n: usize) -> Result<()> {
        self.unwind_on_err(|b| {
            b.expect_end(State::Object, n);
            if n > b.limits.max_object_size {
                return Err(LengthError::new("object", n, b.limits.max_object_size).into());
            }
            // SAFETY: as in `end_array`, for the top `n` pairs.
            let object = unsafe { Object::from_relocated(b.pairs.top_ptr(n), n, b.sp.clone())? };
            unsafe { b.pairs.forget_top(n) };
            b.pop_frame();
            b.commit(Value::Object(object))
        })
    }

    fn begin(&mut self, state: State) -> Result<()> {
        self.expect_value_position();
        self.frames.push(Frame {
            state: self.state,
            count: self.count,
            key_len: self.key_len,
        })?;
        self.state = state;
        self.count = 0;
        self.key_len = 0;
        Ok(())
    }

    fn expect_end(&self, state: State, n: usize) {
        assert!(
            self.state == state && self.pending == 0,
            "closing {state:?} while in {:?} state",
            self.state
        );
        assert_eq!(n, self.count, "wrong element count closing {state:?}");
    }

    fn pop_frame(&mut self) {
        let Some(frame) = self.frames.pop() else {
            unreachable!("every open container saved a frame")
        };
        self.state = frame.state;
        self.count = frame.count;
        self.key_len = frame.key_len;
    }

    // ─────────────────────────────────────────────────────────────────────
    //  Keys and strings
    // ─────────────────────────────────────────────────────────────────────

    /// Append to the key being accumulated.
    ///
    /// # Errors
    ///
    /// [`LengthError`] past the string limit, `BadAlloc` on exhaustion.
    pub fn insert_key_part(&mut self, part: impl AsRef<[u8]>) -> Result<()> {
        let part = part.as_ref();
        self.unwind_on_err(|b| {
            b.expect_key_position();
            b.push_pending(part)
        })
    }

    /// Finish the key with `last`. The next value becomes its member.
    ///
    /// # Errors
    ///
    /// [`LengthError`] past the string limit, `BadAlloc` on exhaustion.
    pub fn insert_key(&mut self, last: impl AsRef<[u8]>) -> Result<()> {
        let last = last.as_ref();
        self.unwind_on_err(|b| {
            b.expect_key_position();
            b.push_pending(last)?;
            b.key_len = b.pending;
            b.pending = 0;
            b.state = State::Key;
            Ok(())
        })
    }

    /// Append to the string being accumulated.
    ///
    /// # Errors
    ///
    /// [`LengthError`] past the string limit, `BadAlloc` on exhaustion.
    pub fn insert_string_part(&mut self, part: impl AsRef<[u8]>) -> Result<()> {
        let part = part.as_ref();
        self.unwind_on_err(|b| {
            b.expect_string_position();
            b.push_pending(part)
        })
    }

    /// Finish the string with `last` and insert it.
    ///
    /// # Errors
    ///
    /// [`LengthError`] past a limit, `BadAlloc` on exhaustion.
    pub fn insert_string(&mut self, last: impl AsRef<[u8]>) -> Result<()> {
        let last = last.as_ref();
        self.unwind_on_err(|b| {
            b.expect_string_position();
            b.check_string_len(b.pending.saturating_add(last.len()))?;
            let string = if b.pending == 0 {
                JsonString::from_bytes_in(last, b.sp.clone())?
            } else {
                let string = JsonString::concat_in(&[b.chars.top(b.pending), last], b.sp.clone())?;
                b.chars.truncate(b.chars.len() - b.pending);
                b.pending = 0;
                string
            };
            b.commit(Value::String(string))
        })
    }

    fn push_pending(&mut self, bytes: &[u8]) -> Result<()> {
        self.check_string_len(self.pending.saturating_add(bytes.len()))?;
        self.chars.extend_from_slice(bytes)?;
        self.pending += bytes.len();
        Ok(())
    }

    fn check_string_len(&self, len: usize) -> Result<(), LengthError> {
        let max = self.limits.max_string_size.min(JsonString::max_size());
        if len > max {
            return Err(LengthError::new("string", len, max));
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    //  Scalars
    // ─────────────────────────────────────────────────────────────────────

    /// # Errors
    ///
    /// [`LengthError`] past the container limit, `BadAlloc` on exhaustion.
    pub fn insert_int64(&mut self, i: i64) -> Result<()> {
        self.insert_scalar(Value::Int64(i))
    }

    /// # Errors
    ///
    /// As [`insert_int64`](Self::insert_int64).
    pub fn insert_uint64(&mut self, u: u64) -> Result<()> {
        self.insert_scalar(Value::Uint64(u))
    }

    /// # Errors
    ///
    /// As [`insert_int64`](Self::insert_int64).
    pub fn insert_double(&mut self, d: f64) -> Result<()> {
        self.insert_scalar(Value::Double(d))
    }

    /// # Errors
    ///
    /// As [`insert_int64`](Self::insert_int64).
    pub fn insert_bool(&mut self, b: bool) -> Result<()> {
        self.insert_scalar(Value::Bool(b))
    }

    /// # Errors
    ///
    /// As [`insert_int64`](Self::insert_int64).
    pub fn insert_null(&mut self) -> Result<()> {
        self.insert_scalar(Value::Null)
    }

    fn insert_scalar(&mut self, value: Value) -> Result<()> {
        self.unwind_on_err(|b| {
            b.expect_value_position();
            b.commit(value)
        })
    }

    // ─────────────────────────────────────────────────────────────────────
    //  Committing
    // ─────────────────────────────────────────────────────────────────────

    /// Add a finished value to the current level.
    fn commit(&mut self, value: Value) -> Result<()> {
        match self.state {
            State::Top => {
                self.values.push(value)?;
            }
            State::Array => {
                if self.count >= self.limits.max_array_size {
                    let max = self.limits.max_array_size;
                    return Err(LengthError::new("array", self.count + 1, max).into());
                }
                self.values.push(value)?;
            }
            State::Key => {
                if self.count >= self.limits.max_object_size {
                    let max = self.limits.max_object_size;
                    return Err(LengthError::new("object", self.count + 1, max).into());
                }
                // Room for the pair first, so a failure cannot strand the key.
                self.pairs.reserve(1)?;
                let key = KeyString::new_in(self.chars.top(self.key_len), &self.sp)?;
                self.chars.truncate(self.chars.len() - self.key_len);
                self.key_len = 0;
                self.pairs.push_within_capacity(KeyValuePair::new(key, value));
                self.state = State::Object;
            }
            state => unreachable!("commit in {state:?} state"),
        }
        self.count += 1;
        Ok(())
    }

    fn expect_value_position(&self) {
        self.expect_string_position();
        assert!(self.pending == 0, "a string is still being accumulated");
    }

    fn expect_string_position(&self) {
        match self.state {
            State::Top | State::Array | State::Key => {}
            State::Object => panic!("expected a key, got a value"),
            State::Ready | State::NeedsReset => panic!("reset() must be called before building"),
        }
    }

    fn expect_key_position(&self) {
        assert!(
            self.state == State::Object,
            "expected a key in {:?} state",
            self.state
        );
    }

    /// Run `op`, unwinding the partial document if it fails.
    fn unwind_on_err<T>(&mut self, op: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let result = op(self);
        if let Err(e) = &result {
            log::debug!("builder: unwinding after error: {e}");
            self.clear();
        }
        result
    }
}

impl Default for ValueBuilder {
    fn default() -> Self {
        Self::new(Storage::default())
    }
}

impl Drop for ValueBuilder {
    fn drop(&mut self) {
        self.clear();
    }
}

impl core::fmt::Debug for ValueBuilder {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ValueBuilder")
            .field("state", &self.state)
            .field("depth", &self.frames.len())
            .field("count", &self.count)
            .field("values", &self.values)
            .field("pairs", &self.pairs)
            .field("chars", &self.chars)
            .finish_non_exhaustive()
    }
}
