//! The array backing store: one allocation holding an `ArrayTable` header
//! followed by `capacity` value cells, of which the first `size` are live.

use core::{
    alloc::Layout,
    fmt,
    mem::{align_of, size_of},
    ops::Deref,
    ptr::{self, NonNull},
    slice,
};

use crate::{
    error::{LengthError, Result, clone_or_abort},
    options::MAX_STRUCTURED_SIZE,
    storage::Storage,
    value::{Value, ValueMut},
};

#[repr(C)]
struct ArrayTable {
    capacity: usize,
    size: usize,
}

const DATA_OFFSET: usize = size_of::<ArrayTable>().next_multiple_of(align_of::<Value>());

const fn max_size() -> usize {
    let derived = ((isize::MAX as usize) - DATA_OFFSET) / size_of::<Value>();
    if derived < MAX_STRUCTURED_SIZE {
        derived
    } else {
        MAX_STRUCTURED_SIZE
    }
}

fn table_layout(capacity: usize) -> Result<Layout, LengthError> {
    let err = || LengthError::new("array", capacity, max_size());
    if capacity > max_size() {
        return Err(err());
    }
    let cells = Layout::array::<Value>(capacity).map_err(|_| err())?;
    let (layout, offset) = Layout::new::<ArrayTable>().extend(cells).map_err(|_| err())?;
    debug_assert_eq!(offset, DATA_OFFSET);
    Ok(layout.pad_to_align())
}

/// A JSON array.
///
/// Elements always share the array's [`Storage`]; values coming from a
/// storage that does not compare equal are deep-copied on insertion or
/// assignment. There is no `&mut [Value]` view: elements are changed through
/// [`get_mut`](Self::get_mut) or [`set`](Self::set).
pub struct Array {
    sp: Storage,
    tab: Option<NonNull<ArrayTable>>,
}

impl Array {
    #[must_use]
    pub fn new_in(sp: Storage) -> Self {
        Self { sp, tab: None }
    }

    /// # Errors
    ///
    /// [`LengthError`] if `capacity > max_size()`, `BadAlloc` on exhaustion.
    pub fn with_capacity_in(capacity: usize, sp: Storage) -> Result<Self> {
        let mut array = Self::new_in(sp);
        if capacity > 0 {
            array.tab = Some(allocate(capacity, &array.sp)?);
        }
        Ok(array)
    }

    /// Take ownership of `len` values starting at `src`, which are moved
    /// bitwise into a table of exactly `len` cells.
    ///
    /// # Safety
    ///
    /// `src..src + len` must hold initialized values allocated from storage
    /// equal to `sp`. On success the caller must treat them as moved out; on
    /// failure they are untouched.
    pub(crate) unsafe fn from_relocated(src: *const Value, len: usize, sp: Storage) -> Result<Self> {
        let array = Self::with_capacity_in(len, sp)?;
        if let Some(tab) = array.tab {
            // SAFETY: the new table holds `len` cells and cannot overlap the
            // caller's buffer.
            unsafe {
                ptr::copy_nonoverlapping(src, cells(tab), len);
                (*tab.as_ptr()).size = len;
            }
        }
        Ok(array)
    }

    /// The largest number of elements an array can hold.
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
        // SAFETY: the table lives as long as `self`.
        self.tab.map_or(0, |t| unsafe { t.as_ref().size })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        // SAFETY: as above.
        self.tab.map_or(0, |t| unsafe { t.as_ref().capacity })
    }

    #[must_use]
    pub fn as_slice(&self) -> &[Value] {
        match self.tab {
            // SAFETY: `[0, size)` are live cells.
            Some(t) => unsafe { slice::from_raw_parts(cells(t), t.as_ref().size) },
            None => &[],
        }
    }

    /// Mutable access to the element at `index`. Anything assigned through
    /// the guard ends up allocated from this array's storage.
    pub fn get_mut(&mut self, index: usize) -> Option<ValueMut<'_>> {
        if index >= self.len() {
            return None;
        }
        let tab = self.tab?;
        // SAFETY: `index < size`, and `&mut self` is exclusive.
        let value = unsafe { &mut *cells(tab).add(index) };
        Some(ValueMut::new(value, &self.sp))
    }

    /// Replace the element at `index`, returning the old one.
    ///
    /// # Panics
    ///
    /// If `index >= len()`.
    ///
    /// # Errors
    ///
    /// `BadAlloc` if `value` has to be copied into this array's storage and
    /// the copy fails; the array is unchanged.
    pub fn set(&mut self, index: usize, value: Value) -> Result<Value> {
        let len = self.len();
        let Some(mut slot) = self.get_mut(index) else {
            panic!("index {index} out of bounds for length {len}")
        };
        slot.set(value)
    }

    /// Position of the element `elem` points at, if it lies in this array.
    #[must_use]
    pub fn index_of(&self, elem: *const Value) -> Option<usize> {
        let range = self.as_slice().as_ptr_range();
        if !range.contains(&elem) {
            return None;
        }
        Some((elem as usize - range.start as usize) / size_of::<Value>())
    }

    fn growth(&self, new_size: usize) -> Result<usize, LengthError> {
        let max = max_size();
        if new_size > max {
            return Err(LengthError::new("array", new_size, max));
        }
        let capacity = self.capacity();
        if capacity == 0 {
            return Ok(new_size);
        }
        if capacity > max - capacity {
            return Ok(max);
        }
        Ok(new_size.max(capacity * 2))
    }

    /// Move the elements into a table of `capacity` cells.
    fn relocate(&mut self, capacity: usize) -> Result<()> {
        let len = self.len();
        debug_assert!(capacity >= len);
        let tab = if capacity == 0 {
            None
        } else {
            let tab = allocate(capacity, &self.sp)?;
            if let Some(old) = self.tab {
                // SAFETY: both tables hold at least `len` cells.
                unsafe {
                    ptr::copy_nonoverlapping(cells(old), cells(tab), len);
                    (*tab.as_ptr()).size = len;
                }
            }
            Some(tab)
        };
        if let Some(old) = core::mem::replace(&mut self.tab, tab) {
            // SAFETY: the cells were moved out above.
            unsafe { deallocate(old, &self.sp) };
        }
        Ok(())
    }

    /// Make room for at least `additional` more elements.
    ///
    /// # Errors
    ///
    /// [`LengthError`] or `BadAlloc`; the array is unchanged on failure.
    pub fn reserve(&mut self, additional: usize) -> Result<()> {
        let new_size = self
            .len()
            .checked_add(additional)
            .ok_or(LengthError::new("array", usize::MAX, max_size()))?;
        if new_size <= self.capacity() {
            return Ok(());
        }
        let capacity = self.growth(new_size)?;
        self.relocate(capacity)
    }

    /// Reallocate to exactly `len()` cells, or free the table when empty.
    ///
    /// # Errors
    ///
    /// `BadAlloc`; the array is unchanged on failure.
    pub fn shrink_to_fit(&mut self) -> Result<()> {
        if self.capacity() == self.len() {
            return Ok(());
        }
        self.relocate(self.len())
    }

    /// Append `value`.
    ///
    /// # Errors
    ///
    /// [`LengthError`] or `BadAlloc`; `value` is dropped on failure.
    pub fn push(&mut self, value: Value) -> Result<()> {
        let len = self.len();
        self.insert(len, value)
    }

    /// Insert `value` at `index`, shifting later elements up.
    ///
    /// # Panics
    ///
    /// If `index > len()`.
    ///
    /// # Errors
    ///
    /// [`LengthError`] or `BadAlloc`; `value` is dropped on failure.
    pub fn insert(&mut self, index: usize, value: Value) -> Result<()> {
        let len = self.len();
        assert!(index <= len, "insertion index {index} out of bounds for length {len}");
        let value = value.into_storage(&self.sp)?;
        self.reserve(1)?;
        let Some(tab) = self.tab else {
            unreachable!("reserve(1) allocates a table")
        };
        // SAFETY: capacity > len after `reserve`; the tail shift overlaps.
        unsafe {
            let at = cells(tab).add(index);
            ptr::copy(at, at.add(1), len - index);
            at.write(value);
            (*tab.as_ptr()).size = len + 1;
        }
        Ok(())
    }

    /// Remove and return the element at `index`, shifting later elements
    /// down.
    ///
    /// # Panics
    ///
    /// If `index >= len()`.
    pub fn remove(&mut self, index: usize) -> Value {
        let len = self.len();
        assert!(index < len, "removal index {index} out of bounds for length {len}");
        let Some(tab) = self.tab else {
            unreachable!("a non-empty array has a table")
        };
        // SAFETY: `index < len`; the removed cell is read out before the
        // tail is moved over it.
        unsafe {
            let at = cells(tab).add(index);
            let value = at.read();
            ptr::copy(at.add(1), at, len - index - 1);
            (*tab.as_ptr()).size = len - 1;
            value
        }
    }

    pub fn pop(&mut self) -> Option<Value> {
        let len = self.len();
        let tab = self.tab?;
        if len == 0 {
            return None;
        }
        // SAFETY: the last live cell is read out and excluded from `size`.
        unsafe {
            (*tab.as_ptr()).size = len - 1;
            Some(cells(tab).add(len - 1).read())
        }
    }

    /// Drop every element past `len`.
    pub fn truncate(&mut self, len: usize) {
        let old = self.len();
        let Some(tab) = self.tab else { return };
        if len >= old {
            return;
        }
        // SAFETY: the size is lowered first so a panicking destructor cannot
        // cause a double drop.
        unsafe {
            (*tab.as_ptr()).size = len;
            if self.sp.needs_drop() {
                ptr::drop_in_place(ptr::slice_from_raw_parts_mut(cells(tab).add(len), old - len));
            }
        }
    }

    pub fn clear(&mut self) {
        self.truncate(0);
    }

    /// Deep-copy into `sp`.
    ///
    /// # Errors
    ///
    /// `BadAlloc` when `sp` is exhausted; nothing is leaked.
    pub fn try_clone_in(&self, sp: Storage) -> Result<Self> {
        let mut copy = Self::with_capacity_in(self.len(), sp)?;
        for value in self.as_slice() {
            let value = value.try_clone_in(copy.sp.clone())?;
            copy.push(value)?;
        }
        Ok(copy)
    }
}

fn allocate(capacity: usize, sp: &Storage) -> Result<NonNull<ArrayTable>> {
    let layout = table_layout(capacity)?;
    let tab = sp.allocate(layout)?.cast::<ArrayTable>();
    log::trace!("array table: capacity {capacity}");
    // SAFETY: freshly allocated with room for the header.
    unsafe { tab.as_ptr().write(ArrayTable { capacity, size: 0 }) };
    Ok(tab)
}

/// # Safety
///
/// The table's cells must already be dropped or moved out.
unsafe fn deallocate(tab: NonNull<ArrayTable>, sp: &Storage) {
    // SAFETY: the table is live, and its layout was valid when allocated.
    unsafe {
        if let Ok(layout) = table_layout(tab.as_ref().capacity) {
            sp.deallocate(tab.cast(), layout);
        }
    }
}

/// # Safety
///
/// `tab` must be a live table.
unsafe fn cells(tab: NonNull<ArrayTable>) -> *mut Value {
    // SAFETY: the cells start `DATA_OFFSET` bytes into the allocation.
    unsafe { tab.as_ptr().cast::<u8>().add(DATA_OFFSET).cast::<Value>() }
}

impl Drop for Array {
    fn drop(&mut self) {
        let Some(tab) = self.tab else { return };
        if !self.sp.needs_drop() {
            return;
        }
        self.clear();
        // SAFETY: every cell was dropped by `clear`.
        unsafe { deallocate(tab, &self.sp) };
    }
}

impl Deref for Array {
    type Target = [Value];

    fn deref(&self) -> &[Value] {
        self.as_slice()
    }
}

impl<'a> IntoIterator for &'a Array {
    type Item = &'a Value;
    type IntoIter = slice::Iter<'a, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.as_slice().iter()
    }
}

impl Clone for Array {
    fn clone(&self) -> Self {
        clone_or_abort(self.try_clone_in(self.sp.clone()))
    }
}

impl PartialEq for Array {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl fmt::Debug for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.as_slice()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::Error,
        resource::MonotonicResource,
        string::JsonString,
        tests::{CountingResource, counting_storage},
    };

    #[test]
    fn first_allocation_is_exact_then_doubles() {
        let mut a = Array::new_in(Storage::default());
        a.reserve(3).unwrap();
        assert_eq!(a.capacity(), 3);
        for i in 0..4 {
            a.push(Value::from(i)).unwrap();
        }
        assert_eq!(a.capacity(), 6);
        a.reserve(20).unwrap();
        assert_eq!(a.capacity(), 24);
    }

    #[test]
    fn growth_is_logarithmic_and_preserves_elements() {
        let (mr, sp) = counting_storage();
        let mut a = Array::new_in(sp);
        for i in 0..10_000i64 {
            a.push(Value::from(i)).unwrap();
        }
        assert!(mr.allocations() <= 16, "{} allocations", mr.allocations());
        assert!(a.iter().enumerate().all(|(i, v)| v.as_i64() == Some(i as i64)));
        drop(a);
        assert_eq!(mr.outstanding(), 0);
    }

    #[test]
    fn insert_remove_pop_shift_elements() {
        let mut a = Array::new_in(Storage::default());
        for i in [1, 2, 4] {
            a.push(Value::from(i)).unwrap();
        }
        a.insert(2, Value::from(3)).unwrap();
        a.insert(0, Value::from(0)).unwrap();
        let ints: alloc::vec::Vec<_> = a.iter().filter_map(Value::as_i64).collect();
        assert_eq!(ints, [0, 1, 2, 3, 4]);
        assert_eq!(a.remove(1).as_i64(), Some(1));
        assert_eq!(a.pop().and_then(|v| v.as_i64()), Some(4));
        assert_eq!(a.len(), 3);
        assert_eq!(a.index_of(&a[2]), Some(2));
        assert_eq!(a.index_of(&Value::Null), None);
    }

    #[test]
    fn shrink_to_fit_frees_an_empty_table() {
        let (mr, sp) = counting_storage();
        let mut a = Array::with_capacity_in(8, sp).unwrap();
        a.push(Value::Null).unwrap();
        a.shrink_to_fit().unwrap();
        assert_eq!(a.capacity(), 1);
        a.clear();
        a.shrink_to_fit().unwrap();
        assert_eq!(a.capacity(), 0);
        assert_eq!(mr.outstanding(), 0);
    }

    #[test]
    fn reserve_past_max_size_leaves_array_unchanged() {
        let mut a = Array::new_in(Storage::default());
        a.push(Value::Bool(true)).unwrap();
        let cap = a.capacity();
        let err = a.reserve(Array::max_size()).unwrap_err();
        assert!(matches!(err, Error::Length(LengthError { what: "array", .. })));
        assert_eq!(a.len(), 1);
        assert_eq!(a.capacity(), cap);
        assert!(Array::with_capacity_in(Array::max_size() + 1, Storage::default()).is_err());
    }

    #[test]
    fn pushing_from_another_storage_copies() {
        let (mr, sp) = counting_storage();
        let mut a = Array::new_in(sp.clone());
        let s = JsonString::from_bytes_in("a string too long to be inline", Storage::default()).unwrap();
        a.push(Value::String(s)).unwrap();
        assert_eq!(a[0].storage(), Some(&sp));
        assert_eq!(mr.allocations(), 2);
    }

    #[test]
    fn assigning_into_an_arena_array_copies_and_frees_the_original() {
        let (mr, foreign) = counting_storage();
        let arena_mr = MonotonicResource::new();
        // SAFETY: `arena_mr` outlives the array.
        let arena = unsafe { Storage::borrowed(&arena_mr) };
        let mut a = Array::new_in(arena.clone());
        a.push(Value::Null).unwrap();
        a.push(Value::Null).unwrap();

        let s = JsonString::from_bytes_in("a string too long to be inline", foreign.clone()).unwrap();
        *a.get_mut(0).unwrap() = Value::String(s);
        assert_eq!(a[0].storage(), Some(&arena));

        let s = JsonString::from_bytes_in("another string kept on the heap", foreign.clone()).unwrap();
        assert!(a.set(1, Value::String(s)).unwrap().is_null());
        assert_eq!(a[1].storage(), Some(&arena));
        assert_eq!(a[1].as_string().unwrap(), "another string kept on the heap");
        assert_eq!(mr.outstanding(), 0);

        drop(a);
        drop(foreign);
        assert_eq!(mr.outstanding(), 0);
    }

    #[test]
    fn nested_edits_stay_in_the_array_storage() {
        let (mr, sp) = counting_storage();
        let mut a = Array::new_in(sp.clone());
        a.push(Value::Array(Array::new_in(sp.clone()))).unwrap();
        {
            let mut slot = a.get_mut(0).unwrap();
            let inner = slot.as_array_mut().unwrap();
            inner.push(Value::from(1)).unwrap();
            *inner = Array::new_in(Storage::default());
            inner.push(Value::from(2)).unwrap();
        }
        assert_eq!(a[0].storage(), Some(&sp));
        assert_eq!(a[0].as_array().unwrap()[0], Value::Int64(2));
        assert!(a.get_mut(1).is_none());
        drop(a);
        assert_eq!(mr.outstanding(), 0);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn set_past_the_end_panics() {
        let mut a = Array::new_in(Storage::default());
        let _ = a.set(0, Value::Null);
    }

    #[test]
    fn failed_growth_keeps_elements() {
        let mr = CountingResource::failing_after(1);
        let mut a = Array::new_in(Storage::new(mr.clone()));
        a.push(Value::from(7)).unwrap();
        assert!(matches!(a.push(Value::from(8)), Err(Error::BadAlloc(_))));
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].as_i64(), Some(7));
        drop(a);
        assert_eq!(mr.outstanding(), 0);
    }

    #[test]
    fn borrowed_monotonic_storage_skips_element_drops() {
        let mr = MonotonicResource::new();
        // SAFETY: `mr` outlives the array.
        let sp = unsafe { Storage::borrowed(&mr) };
        let mut a = Array::new_in(sp.clone());
        for _ in 0..4 {
            let s = JsonString::from_bytes_in("heap allocated string contents", sp.clone()).unwrap();
            a.push(Value::String(s)).unwrap();
        }
        assert!(!a.storage().needs_drop());
        drop(a);
    }
}
