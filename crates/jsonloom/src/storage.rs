//! Memory resources and the [`Storage`] handle.
//!
//! Every owning structure in this crate (strings, arrays, objects, and the
//! builder's stacks) keeps a [`Storage`] and routes each allocation and
//! deallocation through it. Two handles are interchangeable when they refer
//! to the same resource or the resources report themselves equal; ownership
//! can only move between values whose handles compare equal, otherwise the
//! value is deep-copied.

use alloc::rc::Rc;
use core::{alloc::Layout, fmt, ptr::NonNull};

use crate::{error::BadAlloc, resource::DefaultResource};

/// An allocator capability.
///
/// Resources are used from a single thread and are not required to be
/// reentrant.
pub trait MemoryResource {
    /// Allocate a block fitting `layout`. `layout.size()` is never zero.
    ///
    /// # Errors
    ///
    /// Returns [`BadAlloc`] when the resource is exhausted.
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, BadAlloc>;

    /// Return a block to the resource.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by [`allocate`](Self::allocate) on this
    /// resource, or on one that [`is_equal`](Self::is_equal) to it, with the
    /// same `layout`, and must not be used afterwards.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);

    /// Whether memory allocated by `other` may be released through `self`.
    fn is_equal(&self, other: &dyn MemoryResource) -> bool {
        core::ptr::from_ref(self).cast::<()>() == core::ptr::from_ref(other).cast::<()>()
    }

    /// `true` when [`deallocate`](Self::deallocate) does nothing, so the
    /// elements of a container need not be visited when it is destroyed.
    fn deallocate_is_null(&self) -> bool {
        false
    }
}

static DEFAULT_RESOURCE: DefaultResource = DefaultResource;

#[derive(Clone)]
enum Handle {
    Static(&'static dyn MemoryResource),
    Shared(Rc<dyn MemoryResource>),
    Borrowed(NonNull<dyn MemoryResource>),
}

/// A handle to a [`MemoryResource`].
///
/// `Storage::default()` uses the global allocator.
#[derive(Clone)]
pub struct Storage {
    handle: Handle,
}

impl Storage {
    /// Take shared ownership of `resource`; it is dropped with the last
    /// handle (and therefore the last value) referring to it.
    #[must_use]
    pub fn new<R: MemoryResource + 'static>(resource: R) -> Self {
        Self {
            handle: Handle::Shared(Rc::new(resource)),
        }
    }

    /// Refer to a resource that lives for the rest of the program.
    #[must_use]
    pub fn from_static(resource: &'static dyn MemoryResource) -> Self {
        Self {
            handle: Handle::Static(resource),
        }
    }

    /// Refer to `resource` without owning it.
    ///
    /// Borrowed handles do not count references, which lets containers
    /// backed by a resource whose deallocation is a no-op skip visiting
    /// their elements entirely on destruction.
    ///
    /// # Safety
    ///
    /// `resource` must outlive every handle cloned from the returned one,
    /// including the handles held by values and builders built with it.
    #[must_use]
    pub unsafe fn borrowed(resource: &dyn MemoryResource) -> Self {
        let ptr = NonNull::from(resource);
        // SAFETY: only the trait-object lifetime is erased; the caller
        // guarantees the resource outlives the handle.
        let ptr = unsafe {
            core::mem::transmute::<NonNull<dyn MemoryResource + '_>, NonNull<dyn MemoryResource>>(
                ptr,
            )
        };
        Self {
            handle: Handle::Borrowed(ptr),
        }
    }

    #[must_use]
    pub fn resource(&self) -> &dyn MemoryResource {
        match &self.handle {
            Handle::Static(r) => *r,
            Handle::Shared(r) => r.as_ref(),
            // SAFETY: guaranteed live by the contract of `Storage::borrowed`.
            Handle::Borrowed(r) => unsafe { r.as_ref() },
        }
    }

    /// Whether this handle keeps its resource alive through a reference
    /// count.
    #[must_use]
    pub fn is_counted(&self) -> bool {
        matches!(self.handle, Handle::Shared(_))
    }

    /// Whether memory obtained from this storage must be handed back.
    #[must_use]
    pub fn need_free(&self) -> bool {
        !self.resource().deallocate_is_null()
    }

    /// Whether destroying a container must visit its elements.
    ///
    /// False only when deallocation is a no-op and the elements' own
    /// handles hold no reference counts.
    #[must_use]
    pub fn needs_drop(&self) -> bool {
        self.need_free() || self.is_counted()
    }

    /// Allocate through the resource.
    ///
    /// # Errors
    ///
    /// Returns [`BadAlloc`] when the resource is exhausted.
    pub fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, BadAlloc> {
        debug_assert!(layout.size() != 0, "zero-sized allocation");
        self.resource().allocate(layout)
    }

    /// Release memory obtained from [`allocate`](Self::allocate), unless the
    /// resource's deallocation is a no-op.
    ///
    /// # Safety
    ///
    /// Same contract as [`MemoryResource::deallocate`].
    pub unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        let resource = self.resource();
        if !resource.deallocate_is_null() {
            // SAFETY: forwarded from the caller.
            unsafe { resource.deallocate(ptr, layout) };
        }
    }

    fn address(&self) -> *const () {
        core::ptr::from_ref(self.resource()).cast::<()>()
    }
}

impl Default for Storage {
    fn default() -> Self {
        Self::from_static(&DEFAULT_RESOURCE)
    }
}

impl PartialEq for Storage {
    fn eq(&self, other: &Self) -> bool {
        self.address() == other.address() || self.resource().is_equal(other.resource())
    }
}

impl Eq for Storage {}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.handle {
            Handle::Static(_) => "static",
            Handle::Shared(_) => "shared",
            Handle::Borrowed(_) => "borrowed",
        };
        f.debug_struct("Storage")
            .field("kind", &kind)
            .field("resource", &self.address())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{MonotonicResource, NullResource};

    #[test]
    fn default_handles_are_equal() {
        assert_eq!(Storage::default(), Storage::default());
        assert!(!Storage::default().is_counted());
        assert!(Storage::default().need_free());
        assert!(Storage::default().needs_drop());
    }

    #[test]
    fn shared_handles_compare_by_resource() {
        let a = Storage::new(MonotonicResource::new());
        let b = a.clone();
        let c = Storage::new(MonotonicResource::new());
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, Storage::default());
    }

    #[test]
    fn monotonic_skips_drop_only_when_borrowed() {
        let shared = Storage::new(MonotonicResource::new());
        assert!(!shared.need_free());
        assert!(shared.needs_drop());

        let mr = MonotonicResource::new();
        // SAFETY: `mr` outlives `borrowed`.
        let borrowed = unsafe { Storage::borrowed(&mr) };
        assert!(!borrowed.need_free());
        assert!(!borrowed.needs_drop());
    }

    #[test]
    fn null_resource_fails_every_allocation() {
        let sp = Storage::new(NullResource);
        let layout = Layout::from_size_align(16, 8).unwrap();
        assert_eq!(sp.allocate(layout), Err(BadAlloc { layout }));
    }
}
