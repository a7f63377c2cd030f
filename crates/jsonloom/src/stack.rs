use core::{
    alloc::Layout,
    fmt,
    mem::size_of,
    ptr::{self, NonNull},
    slice,
};

use crate::{
    error::{LengthError, Result},
    storage::Storage,
};

const MIN_CAPACITY: usize = 16;

/// A growable stack over memory from a [`Storage`].
///
/// Unlike `Vec`, growth failures surface as `BadAlloc` instead of
/// aborting, and the top `n` elements can be handed off in place through
/// [`top_ptr`](Self::top_ptr) and [`forget_top`](Self::forget_top).
pub(crate) struct RawStack<T> {
    sp: Storage,
    buf: NonNull<T>,
    len: usize,
    cap: usize,
}

impl<T> RawStack<T> {
    pub(crate) fn new_in(sp: Storage) -> Self {
        const { assert!(size_of::<T>() != 0) };
        Self {
            sp,
            buf: NonNull::dangling(),
            len: 0,
            cap: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn capacity(&self) -> usize {
        self.cap
    }

    pub(crate) fn as_slice(&self) -> &[T] {
        // SAFETY: `[0, len)` are initialized.
        unsafe { slice::from_raw_parts(self.buf.as_ptr(), self.len) }
    }

    fn layout(cap: usize) -> Result<Layout, LengthError> {
        Layout::array::<T>(cap).map_err(|_| LengthError::new("stack", cap, isize::MAX as usize))
    }

    /// Make room for `additional` more elements, doubling the buffer.
    pub(crate) fn reserve(&mut self, additional: usize) -> Result<()> {
        let needed = self
            .len
            .checked_add(additional)
            .ok_or(LengthError::new("stack", usize::MAX, isize::MAX as usize))?;
        if needed <= self.cap {
            return Ok(());
        }
        let cap = needed.max(self.cap.saturating_mul(2)).max(MIN_CAPACITY);
        let layout = Self::layout(cap)?;
        let buf = self.sp.allocate(layout)?.cast::<T>();
        log::trace!("construction stack: {} -> {cap} slots of {} bytes", self.cap, size_of::<T>());
        // SAFETY: the new buffer is disjoint and holds `cap >= len` slots.
        unsafe { ptr::copy_nonoverlapping(self.buf.as_ptr(), buf.as_ptr(), self.len) };
        self.release_buffer();
        self.buf = buf;
        self.cap = cap;
        Ok(())
    }

    /// Push without growing.
    ///
    /// # Panics
    ///
    /// If the stack is full.
    pub(crate) fn push_within_capacity(&mut self, value: T) {
        assert!(self.len < self.cap, "construction stack is full");
        // SAFETY: slot `len` is in bounds and vacant.
        unsafe { self.buf.as_ptr().add(self.len).write(value) };
        self.len += 1;
    }

    pub(crate) fn push(&mut self, value: T) -> Result<()> {
        self.reserve(1)?;
        self.push_within_capacity(value);
        Ok(())
    }

    pub(crate) fn pop(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        self.len -= 1;
        // SAFETY: slot `len` was initialized and is now outside the stack.
        Some(unsafe { self.buf.as_ptr().add(self.len).read() })
    }

    /// Pointer to the first of the top `n` elements.
    ///
    /// # Panics
    ///
    /// If fewer than `n` elements are on the stack.
    pub(crate) fn top_ptr(&self, n: usize) -> *const T {
        assert!(n <= self.len, "popping {n} elements from a stack of {}", self.len);
        // SAFETY: `len - n` is in bounds.
        unsafe { self.buf.as_ptr().add(self.len - n) }
    }

    /// Drop the top `n` elements from the stack without running their
    /// destructors.
    ///
    /// # Safety
    ///
    /// Ownership of those elements must have been moved elsewhere.
    pub(crate) unsafe fn forget_top(&mut self, n: usize) {
        debug_assert!(n <= self.len);
        self.len -= n;
    }

    /// Drop every element.
    pub(crate) fn clear(&mut self) {
        let len = self.len;
        self.len = 0;
        // SAFETY: `[0, len)` were initialized and are no longer reachable.
        unsafe { ptr::drop_in_place(ptr::slice_from_raw_parts_mut(self.buf.as_ptr(), len)) };
    }

    fn release_buffer(&mut self) {
        if self.cap == 0 {
            return;
        }
        if let Ok(layout) = Self::layout(self.cap) {
            // SAFETY: `buf` was allocated from `sp` with this layout.
            unsafe { self.sp.deallocate(self.buf.cast(), layout) };
        }
        self.cap = 0;
        self.buf = NonNull::dangling();
    }
}

impl RawStack<u8> {
    pub(crate) fn extend_from_slice(&mut self, bytes: &[u8]) -> Result<()> {
        self.reserve(bytes.len())?;
        // SAFETY: `reserve` made room for `bytes.len()` more bytes.
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), self.buf.as_ptr().add(self.len), bytes.len());
        }
        self.len += bytes.len();
        Ok(())
    }

    /// The top `n` bytes.
    pub(crate) fn top(&self, n: usize) -> &[u8] {
        &self.as_slice()[self.len - n..]
    }

    pub(crate) fn truncate(&mut self, len: usize) {
        self.len = self.len.min(len);
    }
}

impl<T> Drop for RawStack<T> {
    fn drop(&mut self) {
        self.clear();
        self.release_buffer();
    }
}

impl<T> fmt::Debug for RawStack<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawStack")
            .field("len", &self.len)
            .field("cap", &self.cap)
            .finish_non_exhaustive()
    }
}
