mod property_builder;

use alloc::rc::Rc;
use core::{alloc::Layout, cell::Cell, ptr::NonNull};

use crate::{
    error::BadAlloc,
    resource::DefaultResource,
    storage::{MemoryResource, Storage},
};

#[derive(Debug, Default)]
struct Stats {
    allocations: Cell<usize>,
    live: Cell<usize>,
    bytes: Cell<usize>,
    budget: Cell<Option<usize>>,
}

/// Global-allocator resource that counts what it hands out and can be told
/// to fail after a number of successful allocations. Clones share counters.
#[derive(Debug, Default, Clone)]
pub(crate) struct CountingResource {
    stats: Rc<Stats>,
}

impl CountingResource {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Succeed `budget` times, then fail every allocation.
    pub(crate) fn failing_after(budget: usize) -> Self {
        let mr = Self::new();
        mr.stats.budget.set(Some(budget));
        mr
    }

    pub(crate) fn allocations(&self) -> usize {
        self.stats.allocations.get()
    }

    pub(crate) fn outstanding(&self) -> usize {
        self.stats.live.get()
    }

    pub(crate) fn bytes_outstanding(&self) -> usize {
        self.stats.bytes.get()
    }
}

impl MemoryResource for CountingResource {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, BadAlloc> {
        let s = &self.stats;
        match s.budget.get() {
            Some(0) => return Err(BadAlloc { layout }),
            Some(n) => s.budget.set(Some(n - 1)),
            None => {}
        }
        let ptr = DefaultResource.allocate(layout)?;
        s.allocations.set(s.allocations.get() + 1);
        s.live.set(s.live.get() + 1);
        s.bytes.set(s.bytes.get() + layout.size());
        Ok(ptr)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        let s = &self.stats;
        s.live.set(s.live.get() - 1);
        s.bytes.set(s.bytes.get() - layout.size());
        // SAFETY: forwarded from the caller.
        unsafe { DefaultResource.deallocate(ptr, layout) };
    }
}

/// A fresh counting resource and a storage handle to it.
pub(crate) fn counting_storage() -> (CountingResource, Storage) {
    let mr = CountingResource::new();
    let sp = Storage::new(mr.clone());
    (mr, sp)
}
