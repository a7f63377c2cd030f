//! The object backing store.
//!
//! One allocation holds an `ObjectTable` header, `capacity` key-value cells,
//! and `capacity` bucket heads. Chains are threaded through the cells by
//! index (`KeyValuePair::next`), so a table can be moved bitwise and then
//! relinked with [`rebuild`].

use core::{
    alloc::Layout,
    fmt,
    mem::{self, align_of, size_of},
    ptr::{self, NonNull},
    slice,
};

use bstr::{BStr, ByteSlice};

use crate::{
    digest::digest,
    error::{LengthError, Result, clone_or_abort},
    options::MAX_STRUCTURED_SIZE,
    storage::Storage,
    string::KeyString,
    value::{Value, ValueMut},
};

const NULL_INDEX: u32 = u32::MAX;

/// Bucket counts; a table uses the smallest one that fits. The last entry
/// is the largest prime below `MAX_STRUCTURED_SIZE`.
const BUCKET_SIZES: [usize; 40] = [
    3, 7, 11, 17, 29, 37, 53, 67, 79, 97, 131, 193, 257, 389, 521, 769, 1031, 1543, 2053, 3079,
    6151, 12289, 24593, 49157, 98317, 196_613, 393_241, 786_433, 1_572_869, 3_145_739,
    6_291_469, 12_582_917, 25_165_843, 50_331_653, 100_663_319, 201_326_611, 402_653_189,
    805_306_457, 1_610_612_741, 2_147_483_629,
];

#[repr(C)]
struct ObjectTable {
    size: usize,
    capacity: usize,
    prime_index: usize,
    salt: usize,
}

const PAIRS_OFFSET: usize =
    size_of::<ObjectTable>().next_multiple_of(align_of::<KeyValuePair>());

/// The largest bucket count that fits both the address space and
/// `MAX_STRUCTURED_SIZE`, so no request up to it rounds up past it.
const fn max_size() -> usize {
    let derived =
        ((isize::MAX as usize) - PAIRS_OFFSET) / (size_of::<KeyValuePair>() + size_of::<u32>());
    let ceiling = if derived < MAX_STRUCTURED_SIZE {
        derived
    } else {
        MAX_STRUCTURED_SIZE
    };
    let mut i = BUCKET_SIZES.len();
    while i > 0 {
        i -= 1;
        if BUCKET_SIZES[i] <= ceiling {
            return BUCKET_SIZES[i];
        }
    }
    0
}

/// Index of the smallest bucket count holding `capacity` members.
fn bucket_index(capacity: usize) -> Result<usize, LengthError> {
    BUCKET_SIZES
        .iter()
        .position(|n| *n >= capacity)
        .filter(|_| capacity <= max_size())
        .ok_or(LengthError::new("object", capacity, max_size()))
}

fn table_layout(capacity: usize) -> Result<Layout, LengthError> {
    let err = || LengthError::new("object", capacity, max_size());
    let pairs = Layout::array::<KeyValuePair>(capacity).map_err(|_| err())?;
    let buckets = Layout::array::<u32>(capacity).map_err(|_| err())?;
    let (layout, pairs_at) = Layout::new::<ObjectTable>().extend(pairs).map_err(|_| err())?;
    let (layout, buckets_at) = layout.extend(buckets).map_err(|_| err())?;
    debug_assert_eq!(pairs_at, PAIRS_OFFSET);
    debug_assert_eq!(buckets_at, buckets_offset(capacity));
    Ok(layout.pad_to_align())
}

const fn buckets_offset(capacity: usize) -> usize {
    PAIRS_OFFSET + capacity * size_of::<KeyValuePair>()
}

/// One member of an object.
pub struct KeyValuePair {
    key: KeyString,
    next: u32,
    value: Value,
}

impl KeyValuePair {
    pub(crate) fn new(key: KeyString, value: Value) -> Self {
        Self {
            key,
            next: NULL_INDEX,
            value,
        }
    }

    #[must_use]
    pub fn key(&self) -> &[u8] {
        self.key.as_bytes()
    }

    #[must_use]
    pub fn key_bstr(&self) -> &BStr {
        self.key().as_bstr()
    }

    #[must_use]
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Free the key and drop the value. Pairs have no `Drop` of their own
    /// because the key's storage lives in the owner.
    ///
    /// # Safety
    ///
    /// `sp` must equal the storage the key was allocated from.
    pub(crate) unsafe fn destroy(self, sp: &Storage) {
        // SAFETY: forwarded from the caller.
        unsafe { self.key.destroy(sp) };
        drop(self.value);
    }
}

impl fmt::Debug for KeyValuePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("KeyValuePair")
            .field(&self.key_bstr())
            .field(&self.value)
            .finish()
    }
}

/// # Safety
///
/// `tab` must be a live table for every helper below.
unsafe fn pairs(tab: NonNull<ObjectTable>) -> *mut KeyValuePair {
    // SAFETY: the cells start `PAIRS_OFFSET` bytes into the allocation.
    unsafe { tab.as_ptr().cast::<u8>().add(PAIRS_OFFSET).cast() }
}

unsafe fn buckets(tab: NonNull<ObjectTable>) -> *mut u32 {
    // SAFETY: the bucket heads follow the `capacity` cells.
    unsafe {
        let capacity = tab.as_ref().capacity;
        tab.as_ptr().cast::<u8>().add(buckets_offset(capacity)).cast()
    }
}

unsafe fn bucket(tab: NonNull<ObjectTable>, key: &[u8]) -> *mut u32 {
    // SAFETY: the index is reduced modulo the bucket count.
    unsafe {
        let t = tab.as_ref();
        buckets(tab).add(digest(key, t.salt) % t.capacity)
    }
}

/// Walk the chain for `key`, returning its bucket head and the index of the
/// live entry holding `key`, if any.
unsafe fn find_slot(tab: NonNull<ObjectTable>, key: &[u8]) -> (*mut u32, Option<usize>) {
    // SAFETY: every index on a chain is below `size`.
    unsafe {
        let head = bucket(tab, key);
        let cells = pairs(tab);
        let mut i = *head;
        while i != NULL_INDEX {
            let pair = &*cells.add(i as usize);
            if pair.key() == key {
                return (head, Some(i as usize));
            }
            i = pair.next;
        }
        (head, None)
    }
}

/// Relink every chain from scratch.
unsafe fn rebuild(tab: NonNull<ObjectTable>) {
    // SAFETY: `[0, size)` are live cells and there are `capacity` buckets.
    unsafe {
        let t = tab.as_ref();
        let heads = buckets(tab);
        for b in 0..t.capacity {
            heads.add(b).write(NULL_INDEX);
        }
        let cells = pairs(tab);
        for i in 0..t.size {
            let pair = &mut *cells.add(i);
            let head = bucket(tab, pair.key());
            pair.next = *head;
            #[allow(clippy::cast_possible_truncation)]
            head.write(i as u32);
        }
    }
}

/// Point whichever link refers to entry `from` at `to` instead.
unsafe fn relink(tab: NonNull<ObjectTable>, head: *mut u32, from: usize, to: u32) {
    // SAFETY: `from` is on the chain starting at `head`.
    unsafe {
        let cells = pairs(tab);
        let mut link = head;
        while *link as usize != from {
            link = &raw mut (*cells.add(*link as usize)).next;
        }
        *link = to;
    }
}

fn allocate(capacity: usize, sp: &Storage) -> Result<NonNull<ObjectTable>> {
    let prime_index = bucket_index(capacity)?;
    let capacity = BUCKET_SIZES[prime_index];
    let tab = sp.allocate(table_layout(capacity)?)?.cast::<ObjectTable>();
    log::trace!("object table: capacity {capacity}");
    // SAFETY: freshly allocated for `capacity` cells and buckets; the table's
    // own address salts the digest.
    unsafe {
        tab.as_ptr().write(ObjectTable {
            size: 0,
            capacity,
            prime_index,
            salt: tab.as_ptr() as usize,
        });
        let heads = buckets(tab);
        for b in 0..capacity {
            heads.add(b).write(NULL_INDEX);
        }
    }
    Ok(tab)
}

/// # Safety
///
/// The cells must already be destroyed or moved out.
unsafe fn deallocate(tab: NonNull<ObjectTable>, sp: &Storage) {
    // SAFETY: the layout was valid when the table was allocated.
    unsafe {
        if let Ok(layout) = table_layout(tab.as_ref().capacity) {
            sp.deallocate(tab.cast(), layout);
        }
    }
}

/// A JSON object: a hash table of unique byte-string keys.
///
/// Iteration visits members in table order, which is insertion order except
/// that [`remove`](Self::remove) moves the last member into the hole.
pub struct Object {
    sp: Storage,
    tab: Option<NonNull<ObjectTable>>,
}

impl Object {
    #[must_use]
    pub fn new_in(sp: Storage) -> Self {
        Self { sp, tab: None }
    }

    /// # Errors
    ///
    /// [`LengthError`] if `capacity > max_size()`, `BadAlloc` on exhaustion.
    pub fn with_capacity_in(capacity: usize, sp: Storage) -> Result<Self> {
        let mut object = Self::new_in(sp);
        if capacity > 0 {
            object.tab = Some(allocate(capacity, &object.sp)?);
        }
        Ok(object)
    }

    /// Take ownership of `len` pairs starting at `src`. When a key repeats,
    /// the later value replaces the earlier one in its cell and the object
    /// ends up smaller than `len`.
    ///
    /// # Safety
    ///
    /// `src..src + len` must hold initialized pairs allocated from storage
    /// equal to `sp`. On success the caller must treat them as moved out; on
    /// failure they are untouched.
    pub(crate) unsafe fn from_relocated(
        src: *const KeyValuePair,
        len: usize,
        sp: Storage,
    ) -> Result<Self> {
        let object = Self::with_capacity_in(len, sp)?;
        let Some(tab) = object.tab else {
            return Ok(object);
        };
        // SAFETY: the table has room for `len` cells; each source pair is
        // read exactly once.
        unsafe {
            let cells = pairs(tab);
            for i in 0..len {
                let mut pair = src.add(i).read();
                let (head, found) = find_slot(tab, pair.key());
                if let Some(j) = found {
                    let slot = &mut *cells.add(j);
                    let earlier = mem::replace(&mut slot.value, pair.value);
                    pair.key.destroy(&object.sp);
                    if object.sp.needs_drop() {
                        drop(earlier);
                    } else {
                        mem::forget(earlier);
                    }
                    continue;
                }
                let size = (*tab.as_ptr()).size;
                pair.next = *head;
                cells.add(size).write(pair);
                #[allow(clippy::cast_possible_truncation)]
                head.write(size as u32);
                (*tab.as_ptr()).size = size + 1;
            }
        }
        Ok(object)
    }

    /// The largest number of members an object can hold.
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

    /// Index into the bucket-count table, or `None` before the first
    /// allocation.
    #[must_use]
    pub fn prime_index(&self) -> Option<usize> {
        // SAFETY: as above.
        self.tab.map(|t| unsafe { t.as_ref().prime_index })
    }

    #[must_use]
    pub fn as_slice(&self) -> &[KeyValuePair] {
        match self.tab {
            // SAFETY: `[0, size)` are live cells.
            Some(t) => unsafe { slice::from_raw_parts(pairs(t), t.as_ref().size) },
            None => &[],
        }
    }

    pub fn iter(&self) -> slice::Iter<'_, KeyValuePair> {
        self.as_slice().iter()
    }

    fn position(&self, key: &[u8]) -> Option<usize> {
        // SAFETY: the table is live.
        self.tab.and_then(|t| unsafe { find_slot(t, key).1 })
    }

    #[must_use]
    pub fn get(&self, key: impl AsRef<[u8]>) -> Option<&Value> {
        let i = self.position(key.as_ref())?;
        Some(&self.as_slice()[i].value)
    }

    /// Mutable access to the value under `key`. Anything assigned through
    /// the guard ends up allocated from this object's storage.
    pub fn get_mut(&mut self, key: impl AsRef<[u8]>) -> Option<ValueMut<'_>> {
        let i = self.position(key.as_ref())?;
        let tab = self.tab?;
        // SAFETY: `i < size`, and `&mut self` is exclusive. The cell lives
        // in the table, so borrowing `self.sp` alongside it is disjoint.
        let value = unsafe { &mut (*pairs(tab).add(i)).value };
        Some(ValueMut::new(value, &self.sp))
    }

    fn slot_mut(&mut self, key: &[u8]) -> Option<&mut Value> {
        let i = self.position(key)?;
        let tab = self.tab?;
        // SAFETY: `i < size`, and `&mut self` is exclusive.
        Some(unsafe { &mut (*pairs(tab).add(i)).value })
    }

    #[must_use]
    pub fn contains_key(&self, key: impl AsRef<[u8]>) -> bool {
        self.position(key.as_ref()).is_some()
    }

    /// Set `key` to `value`, returning the value it replaced.
    ///
    /// # Errors
    ///
    /// [`LengthError`] or `BadAlloc`; the object is unchanged on failure.
    pub fn insert(&mut self, key: impl AsRef<[u8]>, value: Value) -> Result<Option<Value>> {
        let key = key.as_ref();
        let value = value.into_storage(&self.sp)?;
        if let Some(slot) = self.slot_mut(key) {
            return Ok(Some(mem::replace(slot, value)));
        }
        self.reserve(1)?;
        let key = KeyString::new_in(key, &self.sp)?;
        let Some(tab) = self.tab else {
            unreachable!("reserve(1) allocates a table")
        };
        // SAFETY: `size < capacity` after `reserve`.
        unsafe {
            let size = (*tab.as_ptr()).size;
            let head = bucket(tab, key.as_bytes());
            let mut pair = KeyValuePair::new(key, value);
            pair.next = *head;
            pairs(tab).add(size).write(pair);
            #[allow(clippy::cast_possible_truncation)]
            head.write(size as u32);
            (*tab.as_ptr()).size = size + 1;
        }
        Ok(None)
    }

    /// Remove `key`, moving the last member into its cell.
    pub fn remove(&mut self, key: impl AsRef<[u8]>) -> Option<Value> {
        let tab = self.tab?;
        // SAFETY: all indices are below `size`; the removed cell is read out
        // once and the last cell is moved into its place after every link
        // to it has been redirected.
        unsafe {
            let (head, found) = find_slot(tab, key.as_ref());
            let i = found?;
            let cells = pairs(tab);
            relink(tab, head, i, (*cells.add(i)).next);
            let removed = cells.add(i).read();
            let last = (*tab.as_ptr()).size - 1;
            if i != last {
                let moved = bucket(tab, (*cells.add(last)).key());
                #[allow(clippy::cast_possible_truncation)]
                relink(tab, moved, last, i as u32);
                ptr::copy_nonoverlapping(cells.add(last), cells.add(i), 1);
            }
            (*tab.as_ptr()).size = last;
            removed.key.destroy(&self.sp);
            Some(removed.value)
        }
    }

    /// Move the members into a table sized for `capacity`.
    fn relocate(&mut self, capacity: usize) -> Result<()> {
        let tab = allocate(capacity, &self.sp)?;
        if let Some(old) = self.tab.replace(tab) {
            // SAFETY: the new table is at least as large; chains are rebuilt
            // under the new salt before any lookup.
            unsafe {
                let len = old.as_ref().size;
                ptr::copy_nonoverlapping(pairs(old), pairs(tab), len);
                (*tab.as_ptr()).size = len;
                rebuild(tab);
                deallocate(old, &self.sp);
            }
        }
        Ok(())
    }

    /// Make room for at least `additional` more members.
    ///
    /// # Errors
    ///
    /// [`LengthError`] or `BadAlloc`; the object is unchanged on failure.
    pub fn reserve(&mut self, additional: usize) -> Result<()> {
        let max = max_size();
        let new_size = self
            .len()
            .checked_add(additional)
            .filter(|n| *n <= max)
            .ok_or(LengthError::new("object", self.len().saturating_add(additional), max))?;
        let capacity = self.capacity();
        if new_size <= capacity {
            return Ok(());
        }
        let wanted = if capacity > max - capacity {
            max
        } else {
            new_size.max(capacity * 2)
        };
        self.relocate(wanted)
    }

    /// Destroy every member, keeping the table.
    pub fn clear(&mut self) {
        let Some(tab) = self.tab else { return };
        // SAFETY: the size is zeroed before the cells are destroyed, and the
        // buckets are emptied to match.
        unsafe {
            let len = mem::replace(&mut (*tab.as_ptr()).size, 0);
            rebuild(tab);
            if self.sp.needs_drop() {
                let cells = pairs(tab);
                for i in 0..len {
                    cells.add(i).read().destroy(&self.sp);
                }
            }
        }
    }

    /// Deep-copy into `sp`.
    ///
    /// # Errors
    ///
    /// `BadAlloc` when `sp` is exhausted; nothing is leaked.
    pub fn try_clone_in(&self, sp: Storage) -> Result<Self> {
        let mut copy = Self::with_capacity_in(self.len(), sp)?;
        for pair in self {
            let value = pair.value.try_clone_in(copy.sp.clone())?;
            copy.insert(pair.key(), value)?;
        }
        Ok(copy)
    }
}

impl Drop for Object {
    fn drop(&mut self) {
        let Some(tab) = self.tab else { return };
        if !self.sp.needs_drop() {
            return;
        }
        self.clear();
        // SAFETY: every cell was destroyed by `clear`.
        unsafe { deallocate(tab, &self.sp) };
    }
}

impl<'a> IntoIterator for &'a Object {
    type Item = &'a KeyValuePair;
    type IntoIter = slice::Iter<'a, KeyValuePair>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl Clone for Object {
    fn clone(&self) -> Self {
        clone_or_abort(self.try_clone_in(self.sp.clone()))
    }
}

/// Objects are equal when they hold the same keys mapped to equal values,
/// in any order.
impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().all(|p| other.get(p.key()) == Some(p.value()))
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.iter().map(|p| (p.key_bstr(), p.value())))
            .finish()
    }
}
