//! String cells.
//!
//! A string is either *short*, with its bytes stored inline in the cell, or
//! *heap*, pointing at a `StringTable { size, capacity }` header followed by
//! `capacity + 1` bytes. Both forms keep a NUL byte after the last
//! character. Object keys use the separate exact-fit [`KeyString`].

use core::{
    alloc::Layout,
    fmt,
    mem::size_of,
    ops::Range,
    ptr::{self, NonNull},
    slice,
    str::Utf8Error,
};

use bstr::{BStr, ByteSlice};

use crate::{
    error::{Error, LengthError, Result, clone_or_abort},
    options::MAX_STRING_SIZE,
    storage::Storage,
};

/// Bytes a short string can hold inline: the cell's two payload words minus
/// the discriminant and length bytes (14 on 64-bit targets, 6 on 32-bit).
pub const SBO_CHARS: usize = 2 * size_of::<usize>() - 2;

#[repr(C)]
struct StringTable {
    size: usize,
    capacity: usize,
}

const fn max_size() -> usize {
    let derived = (isize::MAX as usize) - size_of::<StringTable>() - 1;
    if derived < MAX_STRING_SIZE {
        derived
    } else {
        MAX_STRING_SIZE
    }
}

/// New capacity for a string that must hold `new_size` bytes and currently
/// has room for `capacity`.
fn growth(new_size: usize, capacity: usize) -> Result<usize, LengthError> {
    let max = max_size();
    if new_size > max {
        return Err(LengthError::new("string", new_size, max));
    }
    if capacity > max - capacity {
        return Ok(max);
    }
    Ok(new_size.max(capacity * 2))
}

fn table_layout(capacity: usize) -> Result<Layout, LengthError> {
    let err = || LengthError::new("string", capacity, max_size());
    let bytes = Layout::array::<u8>(capacity.checked_add(1).ok_or_else(err)?).map_err(|_| err())?;
    let (layout, _) = Layout::new::<StringTable>().extend(bytes).map_err(|_| err())?;
    Ok(layout.pad_to_align())
}

fn allocate_table(capacity: usize, sp: &Storage) -> Result<NonNull<StringTable>> {
    if capacity > max_size() {
        return Err(LengthError::new("string", capacity, max_size()).into());
    }
    let layout = table_layout(capacity)?;
    let table = sp.allocate(layout)?.cast::<StringTable>();
    log::trace!("string table: capacity {capacity}");
    // SAFETY: freshly allocated with room for the header.
    unsafe { table.as_ptr().write(StringTable { size: 0, capacity }) };
    Ok(table)
}

/// # Safety
///
/// `table` must be live and allocated by `allocate_table`.
unsafe fn table_data(table: NonNull<StringTable>) -> *mut u8 {
    // SAFETY: the bytes start right after the header.
    unsafe { table.as_ptr().cast::<u8>().add(size_of::<StringTable>()) }
}

/// The representation of a string value; never owns its storage handle.
pub(crate) enum StringImpl {
    /// `buf[SBO_CHARS]` holds `SBO_CHARS - size`, which doubles as the
    /// terminator when the buffer is full.
    Short([u8; SBO_CHARS + 1]),
    Heap(NonNull<StringTable>),
}

impl StringImpl {
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) const fn new() -> Self {
        let mut buf = [0u8; SBO_CHARS + 1];
        buf[SBO_CHARS] = SBO_CHARS as u8;
        Self::Short(buf)
    }

    /// A string holding the concatenation of `parts`, with no slack.
    pub(crate) fn from_parts(parts: &[&[u8]], sp: &Storage) -> Result<Self> {
        let size = parts
            .iter()
            .try_fold(0usize, |n, p| n.checked_add(p.len()))
            .ok_or(LengthError::new("string", usize::MAX, max_size()))?;
        if size > max_size() {
            return Err(LengthError::new("string", size, max_size()).into());
        }
        let mut imp = Self::new();
        if size > SBO_CHARS {
            imp = Self::Heap(allocate_table(size, sp)?);
        }
        let mut dest = imp.data_mut_ptr();
        for part in parts {
            // SAFETY: the cell has room for `size` bytes in total.
            unsafe {
                ptr::copy_nonoverlapping(part.as_ptr(), dest, part.len());
                dest = dest.add(part.len());
            }
        }
        imp.term(size);
        Ok(imp)
    }

    pub(crate) fn is_short(&self) -> bool {
        matches!(self, Self::Short(_))
    }

    pub(crate) fn size(&self) -> usize {
        match self {
            Self::Short(buf) => SBO_CHARS - buf[SBO_CHARS] as usize,
            // SAFETY: heap tables are live for as long as the cell.
            Self::Heap(t) => unsafe { t.as_ref().size },
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        match self {
            Self::Short(_) => SBO_CHARS,
            // SAFETY: as above.
            Self::Heap(t) => unsafe { t.as_ref().capacity },
        }
    }

    fn data_ptr(&self) -> *const u8 {
        match self {
            Self::Short(buf) => buf.as_ptr(),
            // SAFETY: as above.
            Self::Heap(t) => unsafe { table_data(*t) },
        }
    }

    fn data_mut_ptr(&mut self) -> *mut u8 {
        match self {
            Self::Short(buf) => buf.as_mut_ptr(),
            // SAFETY: as above.
            Self::Heap(t) => unsafe { table_data(*t) },
        }
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        // SAFETY: `[0, size)` is always initialized.
        unsafe { slice::from_raw_parts(self.data_ptr(), self.size()) }
    }

    pub(crate) fn as_bytes_with_nul(&self) -> &[u8] {
        // SAFETY: `term` always writes the byte at `size`.
        unsafe { slice::from_raw_parts(self.data_ptr(), self.size() + 1) }
    }

    /// Set the size to `n` and write the terminator after it.
    #[allow(clippy::cast_possible_truncation)]
    fn term(&mut self, n: usize) {
        assert!(n <= self.capacity());
        match self {
            Self::Short(buf) => {
                buf[SBO_CHARS] = (SBO_CHARS - n) as u8;
                buf[n] = 0;
            }
            Self::Heap(t) => {
                // SAFETY: `n <= capacity` and the table has `capacity + 1`
                // bytes.
                unsafe {
                    t.as_mut().size = n;
                    table_data(*t).add(n).write(0);
                }
            }
        }
    }

    /// Make room for `new_size` bytes, keeping the current contents.
    fn grow_to(&mut self, new_size: usize, sp: &Storage) -> Result<()> {
        let capacity = self.capacity();
        if new_size <= capacity {
            return Ok(());
        }
        let table = allocate_table(growth(new_size, capacity)?, sp)?;
        let size = self.size();
        // SAFETY: the new table holds at least `size + 1` bytes.
        unsafe { ptr::copy_nonoverlapping(self.data_ptr(), table_data(table), size + 1) };
        self.destroy(sp);
        *self = Self::Heap(table);
        self.term(size);
        Ok(())
    }

    fn checked_size(&self, extra: usize) -> Result<usize, LengthError> {
        self.size()
            .checked_add(extra)
            .filter(|n| *n <= max_size())
            .ok_or(LengthError::new("string", self.size().saturating_add(extra), max_size()))
    }

    pub(crate) fn reserve(&mut self, additional: usize, sp: &Storage) -> Result<()> {
        let new_size = self.checked_size(additional)?;
        self.grow_to(new_size, sp)
    }

    pub(crate) fn append(&mut self, bytes: &[u8], sp: &Storage) -> Result<()> {
        let size = self.size();
        let new_size = self.checked_size(bytes.len())?;
        self.grow_to(new_size, sp)?;
        // SAFETY: capacity is at least `new_size`.
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), self.data_mut_ptr().add(size), bytes.len());
        }
        self.term(new_size);
        Ok(())
    }

    /// Replace `count` bytes at `pos` with `bytes`.
    pub(crate) fn replace(
        &mut self,
        pos: usize,
        count: usize,
        bytes: &[u8],
        sp: &Storage,
    ) -> Result<()> {
        let size = self.size();
        assert!(pos <= size, "position {pos} out of range for string of length {size}");
        let count = count.min(size - pos);
        let new_size = (size - count)
            .checked_add(bytes.len())
            .filter(|n| *n <= max_size())
            .ok_or(LengthError::new("string", size - count + bytes.len().min(max_size()), max_size()))?;
        self.grow_to(new_size, sp)?;
        let data = self.data_mut_ptr();
        // SAFETY: all offsets stay within the (possibly grown) capacity;
        // `ptr::copy` handles the overlapping tail shift.
        unsafe {
            ptr::copy(
                data.add(pos + count),
                data.add(pos + bytes.len()),
                size - pos - count,
            );
            ptr::copy_nonoverlapping(bytes.as_ptr(), data.add(pos), bytes.len());
        }
        self.term(new_size);
        Ok(())
    }

    pub(crate) fn erase(&mut self, pos: usize, count: usize) {
        let size = self.size();
        assert!(pos <= size, "position {pos} out of range for string of length {size}");
        let count = count.min(size - pos);
        let data = self.data_mut_ptr();
        // SAFETY: both ranges lie within `[0, size)`.
        unsafe { ptr::copy(data.add(pos + count), data.add(pos), size - pos - count) };
        self.term(size - count);
    }

    pub(crate) fn truncate(&mut self, len: usize) {
        if len < self.size() {
            self.term(len);
        }
    }

    pub(crate) fn shrink_to_fit(&mut self, sp: &Storage) -> Result<()> {
        let size = self.size();
        if self.is_short() || size == self.capacity() {
            return Ok(());
        }
        let shrunk = Self::from_parts(&[self.as_bytes()], sp)?;
        self.destroy(sp);
        *self = shrunk;
        Ok(())
    }

    /// Release the heap table, if any. The cell must not be read again
    /// without being reassigned.
    pub(crate) fn destroy(&mut self, sp: &Storage) {
        if let Self::Heap(t) = *self {
            if !sp.need_free() {
                return;
            }
            // SAFETY: the table was allocated from `sp` with this layout,
            // which cannot fail to compute for a table that exists.
            unsafe {
                let capacity = t.as_ref().capacity;
                if let Ok(layout) = table_layout(capacity) {
                    sp.deallocate(t.cast(), layout);
                }
            }
        }
    }
}

/// A JSON string: a byte string owned by a [`Storage`].
///
/// Bytes are not validated; the producer of the events is expected to hand
/// in UTF-8. Up to [`SBO_CHARS`] bytes are stored without allocating.
pub struct JsonString {
    sp: Storage,
    imp: StringImpl,
}

impl JsonString {
    #[must_use]
    pub fn new_in(sp: Storage) -> Self {
        Self {
            sp,
            imp: StringImpl::new(),
        }
    }

    /// # Errors
    ///
    /// [`LengthError`] if `bytes` is longer than [`max_size`](Self::max_size),
    /// `BadAlloc` if a heap table cannot be allocated.
    pub fn from_bytes_in(bytes: impl AsRef<[u8]>, sp: Storage) -> Result<Self> {
        Self::concat_in(&[bytes.as_ref()], sp)
    }

    pub(crate) fn concat_in(parts: &[&[u8]], sp: Storage) -> Result<Self> {
        let imp = StringImpl::from_parts(parts, &sp)?;
        Ok(Self { sp, imp })
    }

    #[must_use]
    pub const fn max_size() -> usize {
        max_size()
    }

    #[must_use]
    pub fn storage(&self) -> &Storage {
        &self.sp
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.imp.size()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.imp.capacity()
    }

    /// Whether the bytes live inside the cell rather than in a heap table.
    #[must_use]
    pub fn is_inline(&self) -> bool {
        self.imp.is_short()
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.imp.as_bytes()
    }

    /// The contents followed by the terminating NUL byte.
    #[must_use]
    pub fn as_bytes_with_nul(&self) -> &[u8] {
        self.imp.as_bytes_with_nul()
    }

    #[must_use]
    pub fn as_bstr(&self) -> &BStr {
        self.as_bytes().as_bstr()
    }

    /// # Errors
    ///
    /// Fails if the bytes are not valid UTF-8.
    pub fn to_str(&self) -> Result<&str, Utf8Error> {
        core::str::from_utf8(self.as_bytes())
    }

    /// Append `bytes`, growing the capacity geometrically.
    ///
    /// # Errors
    ///
    /// [`LengthError`] or `BadAlloc`; the string is unchanged on failure.
    pub fn push_bytes(&mut self, bytes: impl AsRef<[u8]>) -> Result<()> {
        self.imp.append(bytes.as_ref(), &self.sp)
    }

    /// Insert `bytes` at byte offset `pos`.
    ///
    /// # Panics
    ///
    /// If `pos > len()`.
    ///
    /// # Errors
    ///
    /// [`LengthError`] or `BadAlloc`; the string is unchanged on failure.
    pub fn insert_bytes(&mut self, pos: usize, bytes: impl AsRef<[u8]>) -> Result<()> {
        self.imp.replace(pos, 0, bytes.as_ref(), &self.sp)
    }

    /// Replace the bytes in `range` with `bytes`.
    ///
    /// # Panics
    ///
    /// If `range.start > len()`.
    ///
    /// # Errors
    ///
    /// [`LengthError`] or `BadAlloc`; the string is unchanged on failure.
    pub fn replace_range(&mut self, range: Range<usize>, bytes: impl AsRef<[u8]>) -> Result<()> {
        let count = range.end.saturating_sub(range.start);
        self.imp.replace(range.start, count, bytes.as_ref(), &self.sp)
    }

    /// Remove up to `count` bytes starting at `pos`.
    ///
    /// # Panics
    ///
    /// If `pos > len()`.
    pub fn erase(&mut self, pos: usize, count: usize) {
        self.imp.erase(pos, count);
    }

    pub fn truncate(&mut self, len: usize) {
        self.imp.truncate(len);
    }

    pub fn clear(&mut self) {
        self.imp.truncate(0);
    }

    /// # Errors
    ///
    /// [`LengthError`] or `BadAlloc`; the string is unchanged on failure.
    pub fn reserve(&mut self, additional: usize) -> Result<()> {
        self.imp.reserve(additional, &self.sp)
    }

    /// Drop excess capacity, moving back inline when the contents fit.
    ///
    /// # Errors
    ///
    /// `BadAlloc`; the string is unchanged on failure.
    pub fn shrink_to_fit(&mut self) -> Result<()> {
        self.imp.shrink_to_fit(&self.sp)
    }

    /// Copy into `sp`.
    ///
    /// # Errors
    ///
    /// `BadAlloc` when `sp` is exhausted.
    pub fn try_clone_in(&self, sp: Storage) -> Result<Self> {
        Self::from_bytes_in(self.as_bytes(), sp)
    }
}

impl Drop for JsonString {
    fn drop(&mut self) {
        self.imp.destroy(&self.sp);
    }
}

impl Clone for JsonString {
    fn clone(&self) -> Self {
        clone_or_abort(self.try_clone_in(self.sp.clone()))
    }
}

impl fmt::Debug for JsonString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_bstr(), f)
    }
}

impl AsRef<[u8]> for JsonString {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl PartialEq for JsonString {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for JsonString {}

impl PartialEq<str> for JsonString {
    fn eq(&self, other: &str) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl PartialEq<&str> for JsonString {
    fn eq(&self, other: &&str) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl PartialEq<[u8]> for JsonString {
    fn eq(&self, other: &[u8]) -> bool {
        self.as_bytes() == other
    }
}

/// An object key: allocated once at its exact length (plus the NUL) and
/// never modified. Freed by the owning object through its storage.
pub(crate) struct KeyString {
    ptr: NonNull<u8>,
    len: usize,
}

impl KeyString {
    fn layout(len: usize) -> Result<Layout, LengthError> {
        Layout::array::<u8>(len + 1).map_err(|_| LengthError::new("key", len, max_size()))
    }

    pub(crate) fn new_in(bytes: &[u8], sp: &Storage) -> Result<Self> {
        let len = bytes.len();
        if len > max_size() {
            return Err(Error::Length(LengthError::new("key", len, max_size())));
        }
        let ptr = sp.allocate(Self::layout(len)?)?;
        // SAFETY: the block holds `len + 1` bytes.
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.as_ptr(), len);
            ptr.as_ptr().add(len).write(0);
        }
        Ok(Self { ptr, len })
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        // SAFETY: `[0, len)` was written at construction.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// # Safety
    ///
    /// `sp` must be equal to the storage the key was allocated from.
    pub(crate) unsafe fn destroy(self, sp: &Storage) {
        if let Ok(layout) = Self::layout(self.len) {
            // SAFETY: allocated from `sp` with this layout.
            unsafe { sp.deallocate(self.ptr, layout) };
        }
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    use rstest::rstest;

    use super::*;
    use crate::{
        resource::NullResource,
        tests::{CountingResource, counting_storage},
    };

    fn bytes(n: usize) -> Vec<u8> {
        (0..n).map(|i| b'a' + (i % 26) as u8).collect()
    }

    #[rstest]
    #[case(0)]
    #[case(1)]
    #[case(SBO_CHARS - 1)]
    #[case(SBO_CHARS)]
    #[case(SBO_CHARS + 1)]
    #[case(SBO_CHARS + 2)]
    #[case(300)]
    fn inline_threshold(#[case] n: usize) {
        let data = bytes(n);
        let s = JsonString::from_bytes_in(&data, Storage::default()).unwrap();
        assert_eq!(s.is_inline(), n <= SBO_CHARS);
        assert_eq!(s.as_bytes(), data.as_slice());
        assert_eq!(s.as_bytes_with_nul().last(), Some(&0));
        assert_eq!(s.len(), n);
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn sbo_holds_fourteen_bytes_on_64_bit() {
        assert_eq!(SBO_CHARS, 14);
    }

    #[test]
    fn append_switches_to_heap_once() {
        let (mr, sp) = counting_storage();
        let mut s = JsonString::new_in(sp);
        for i in 0..SBO_CHARS {
            s.push_bytes([b'0' + (i % 10) as u8]).unwrap();
        }
        assert!(s.is_inline());
        assert_eq!(mr.allocations(), 0);

        s.push_bytes("x").unwrap();
        assert!(!s.is_inline());
        assert_eq!(s.capacity(), 2 * SBO_CHARS);
        assert_eq!(mr.allocations(), 1);
        assert_eq!(&s.as_bytes()[..3], b"012");
        assert_eq!(s.as_bytes().last(), Some(&b'x'));
        drop(s);
        assert_eq!(mr.outstanding(), 0);
    }

    #[test]
    fn growth_doubles_capacity() {
        let mut s = JsonString::new_in(Storage::default());
        let mut reallocs = 0;
        let mut cap = s.capacity();
        for _ in 0..4096 {
            s.push_bytes("z").unwrap();
            if s.capacity() != cap {
                assert!(s.capacity() >= cap * 2);
                cap = s.capacity();
                reallocs += 1;
            }
        }
        assert!(reallocs <= 12, "{reallocs} reallocations");
        assert!(s.as_bytes().iter().all(|b| *b == b'z'));
    }

    #[test]
    fn insert_replace_erase() {
        let mut s = JsonString::from_bytes_in("hello world", Storage::default()).unwrap();
        s.insert_bytes(5, ", big").unwrap();
        assert_eq!(s, "hello, big world");
        s.replace_range(7..10, "wide, wide").unwrap();
        assert_eq!(s, "hello, wide, wide world");
        assert!(!s.is_inline());
        s.erase(5, 12);
        assert_eq!(s, "hello world");
        s.truncate(5);
        assert_eq!(s, "hello");
        assert_eq!(s.as_bytes_with_nul(), b"hello\0");
    }

    #[test]
    fn shrink_moves_back_inline() {
        let (mr, sp) = counting_storage();
        let mut s = JsonString::from_bytes_in(bytes(40), sp).unwrap();
        s.truncate(4);
        s.shrink_to_fit().unwrap();
        assert!(s.is_inline());
        assert_eq!(s, "abcd");
        assert_eq!(mr.outstanding(), 0);
    }

    #[test]
    fn reserve_past_max_leaves_string_unchanged() {
        let mut s = JsonString::from_bytes_in("keep", Storage::default()).unwrap();
        let err = s.reserve(JsonString::max_size()).unwrap_err();
        assert!(matches!(err, Error::Length(LengthError { what: "string", .. })));
        assert_eq!(s, "keep");
        assert!(s.is_inline());
    }

    #[test]
    fn short_strings_never_touch_the_resource() {
        let sp = Storage::new(NullResource);
        let s = JsonString::from_bytes_in(bytes(SBO_CHARS), sp.clone()).unwrap();
        assert_eq!(s.len(), SBO_CHARS);
        let err = JsonString::from_bytes_in(bytes(SBO_CHARS + 1), sp).unwrap_err();
        assert!(matches!(err, Error::BadAlloc(_)));
    }

    #[test]
    fn failed_growth_keeps_contents() {
        let mr = CountingResource::failing_after(0);
        let sp = Storage::new(mr);
        let mut s = JsonString::from_bytes_in("short", sp).unwrap();
        assert!(s.push_bytes(bytes(SBO_CHARS)).is_err());
        assert_eq!(s, "short");
    }

    #[test]
    fn keys_are_exact_fit_and_terminated() {
        let (mr, sp) = counting_storage();
        let key = KeyString::new_in(b"name", &sp).unwrap();
        assert_eq!(key.as_bytes(), b"name");
        assert_eq!(mr.bytes_outstanding(), 5);
        // SAFETY: allocated from `sp`.
        unsafe { key.destroy(&sp) };
        assert_eq!(mr.outstanding(), 0);
    }
}
