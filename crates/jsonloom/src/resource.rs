//! Concrete memory resources.

use alloc::vec::Vec;
use core::{
    alloc::Layout,
    cell::{Cell, RefCell},
    fmt,
    marker::PhantomData,
    ptr::NonNull,
};

use crate::{error::BadAlloc, storage::MemoryResource};

/// The global allocator.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultResource;

impl MemoryResource for DefaultResource {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, BadAlloc> {
        debug_assert!(layout.size() != 0);
        // SAFETY: the layout has a non-zero size.
        let ptr = unsafe { alloc::alloc::alloc(layout) };
        NonNull::new(ptr).ok_or(BadAlloc { layout })
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: `ptr` came from `allocate` with this layout.
        unsafe { alloc::alloc::dealloc(ptr.as_ptr(), layout) };
    }
}

/// A resource whose every allocation fails.
///
/// Useful for documents that must be built without touching the heap and
/// for exercising failure paths.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullResource;

impl MemoryResource for NullResource {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, BadAlloc> {
        Err(BadAlloc { layout })
    }

    unsafe fn deallocate(&self, _ptr: NonNull<u8>, _layout: Layout) {}

    fn deallocate_is_null(&self) -> bool {
        true
    }
}

const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;
const BLOCK_ALIGN: usize = 16;

/// A bump allocator over a chain of growing blocks.
///
/// Deallocation is a no-op; everything is returned to the global allocator
/// at once when the resource drops. Containers backed by it (through a
/// borrowed [`Storage`](crate::Storage)) skip visiting their elements when
/// destroyed.
#[derive(Debug)]
pub struct MonotonicResource {
    next_block: Cell<usize>,
    head: Cell<usize>,
    end: Cell<usize>,
    blocks: RefCell<Vec<(NonNull<u8>, Layout)>>,
}

impl MonotonicResource {
    #[must_use]
    pub fn new() -> Self {
        Self::with_block_size(DEFAULT_BLOCK_SIZE)
    }

    /// Start with a first block of `block_size` bytes; each later block is
    /// twice the size of the previous one.
    #[must_use]
    pub fn with_block_size(block_size: usize) -> Self {
        Self {
            next_block: Cell::new(block_size.max(BLOCK_ALIGN)),
            head: Cell::new(0),
            end: Cell::new(0),
            blocks: RefCell::new(Vec::new()),
        }
    }

    /// Bytes obtained from the global allocator so far.
    #[must_use]
    pub fn reserved(&self) -> usize {
        self.blocks.borrow().iter().map(|(_, l)| l.size()).sum()
    }

    fn bump(&self, layout: Layout) -> Option<NonNull<u8>> {
        let start = self.head.get().checked_add(layout.align() - 1)? & !(layout.align() - 1);
        let stop = start.checked_add(layout.size())?;
        if self.head.get() == 0 || stop > self.end.get() {
            return None;
        }
        let blocks = self.blocks.borrow();
        let (base, _) = blocks.last()?;
        let offset = start - base.as_ptr() as usize;
        self.head.set(stop);
        // SAFETY: `start..stop` lies inside the current block; going through
        // the block pointer keeps its provenance.
        Some(unsafe { base.add(offset) })
    }

    fn grow(&self, layout: Layout) -> Result<(), BadAlloc> {
        let needed = layout.size().saturating_add(layout.align());
        let mut size = self.next_block.get();
        while size < needed {
            size = size.saturating_mul(2);
        }
        let block = Layout::from_size_align(size, BLOCK_ALIGN.max(layout.align()))
            .map_err(|_| BadAlloc { layout })?;
        // SAFETY: `block` has a non-zero size.
        let ptr = NonNull::new(unsafe { alloc::alloc::alloc(block) }).ok_or(BadAlloc { layout })?;
        log::trace!("monotonic resource: new block of {size} bytes");
        self.blocks.borrow_mut().push((ptr, block));
        self.head.set(ptr.as_ptr() as usize);
        self.end.set(ptr.as_ptr() as usize + size);
        self.next_block.set(size.saturating_mul(2));
        Ok(())
    }
}

impl Default for MonotonicResource {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryResource for MonotonicResource {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, BadAlloc> {
        if let Some(ptr) = self.bump(layout) {
            return Ok(ptr);
        }
        self.grow(layout)?;
        self.bump(layout).ok_or(BadAlloc { layout })
    }

    unsafe fn deallocate(&self, _ptr: NonNull<u8>, _layout: Layout) {}

    fn deallocate_is_null(&self) -> bool {
        true
    }
}

impl Drop for MonotonicResource {
    fn drop(&mut self) {
        for (ptr, layout) in self.blocks.get_mut().drain(..) {
            // SAFETY: every block was allocated with its recorded layout.
            unsafe { alloc::alloc::dealloc(ptr.as_ptr(), layout) };
        }
    }
}

/// A bump allocator over a caller-provided buffer.
///
/// Allocation never touches the global allocator: once the buffer is used
/// up, every further request fails with [`BadAlloc`]. Deallocation is a
/// no-op, so containers backed by it (through a borrowed
/// [`Storage`](crate::Storage)) skip visiting their elements when destroyed.
///
/// # Examples
///
/// ```
/// use jsonloom::{Event, StaticResource, Storage, build};
///
/// let mut buf = [0u8; 4096];
/// let mr = StaticResource::new(&mut buf);
/// // SAFETY: `mr` outlives the value.
/// let sp = unsafe { Storage::borrowed(&mr) };
/// let v = build(sp, [Event::BeginArray, Event::Int64(1), Event::EndArray(1)]).unwrap();
/// assert_eq!(v.as_array().map(|a| a.len()), Some(1));
/// assert!(mr.used() > 0);
/// ```
pub struct StaticResource<'a> {
    base: NonNull<u8>,
    size: usize,
    used: Cell<usize>,
    buffer: PhantomData<&'a mut [u8]>,
}

impl<'a> StaticResource<'a> {
    #[must_use]
    pub fn new(buffer: &'a mut [u8]) -> Self {
        Self {
            size: buffer.len(),
            base: NonNull::from(buffer).cast(),
            used: Cell::new(0),
            buffer: PhantomData,
        }
    }

    /// Bytes handed out so far, alignment padding included.
    #[must_use]
    pub fn used(&self) -> usize {
        self.used.get()
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.size - self.used.get()
    }

    /// Forget every allocation and start again from the beginning of the
    /// buffer.
    ///
    /// Taking `&mut self` guarantees no borrowed handle is still alive.
    pub fn release(&mut self) {
        self.used.set(0);
    }
}

impl MemoryResource for StaticResource<'_> {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, BadAlloc> {
        let addr = self.base.as_ptr() as usize;
        let start = addr
            .checked_add(self.used.get())
            .and_then(|head| head.checked_add(layout.align() - 1))
            .map(|head| (head & !(layout.align() - 1)) - addr)
            .ok_or(BadAlloc { layout })?;
        let stop = start.checked_add(layout.size()).ok_or(BadAlloc { layout })?;
        if stop > self.size {
            log::trace!(
                "static resource: {} bytes requested, {} left",
                layout.size(),
                self.remaining()
            );
            return Err(BadAlloc { layout });
        }
        self.used.set(stop);
        // SAFETY: `start..stop` lies inside the buffer; going through the
        // base pointer keeps its provenance.
        Ok(unsafe { self.base.add(start) })
    }

    unsafe fn deallocate(&self, _ptr: NonNull<u8>, _layout: Layout) {}

    fn deallocate_is_null(&self) -> bool {
        true
    }
}

impl fmt::Debug for StaticResource<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticResource")
            .field("size", &self.size)
            .field("used", &self.used.get())
            .finish()
    }
}
