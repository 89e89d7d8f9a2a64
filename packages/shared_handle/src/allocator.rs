use std::alloc::{self, Layout};
use std::ptr::NonNull;

use crate::{Error, Result};

/// Supplies and reclaims the raw storage that control blocks live in.
///
/// An allocator is an ordinary value: it is moved into the control block it
/// allocated and is later used to free that same block, so the pair of calls
/// is always matched against the same allocator instance. Parameterizing the
/// calls by [`Layout`] is what lets one allocator value serve blocks of any
/// concrete type.
///
/// The default implementation is [`SystemAllocator`], which forwards to the
/// global allocator. Custom implementations are useful for arena placement
/// and for instrumentation (e.g. counting outstanding allocations in tests).
///
/// # Example
///
/// ```rust
/// use std::alloc::Layout;
/// use std::ptr::NonNull;
///
/// use shared_handle::{BlockAllocator, Shared, SystemAllocator};
///
/// let allocator = SystemAllocator;
/// let layout = Layout::new::<u64>();
///
/// let ptr = allocator.allocate(layout).unwrap();
/// // SAFETY: `ptr` was just allocated with `layout` by the same allocator.
/// unsafe { allocator.deallocate(ptr, layout) };
///
/// // Typically the allocator is handed to a factory instead of used directly.
/// let value = Shared::new_in(42_u64, SystemAllocator);
/// assert_eq!(*value, 42);
/// ```
pub trait BlockAllocator {
    /// Allocates a block of storage satisfying `layout`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailed`] if the storage cannot be provided.
    /// Implementations must not return a partially usable block.
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>>;

    /// Reclaims a block of storage previously returned by
    /// [`allocate`][Self::allocate] on the same allocator with the same
    /// `layout`.
    ///
    /// Deallocation is infallible by contract; an implementation that cannot
    /// reclaim the storage has a fatal bug and should panic rather than
    /// return.
    ///
    /// # Safety
    ///
    /// The caller must ensure that:
    ///
    /// 1. `ptr` came from a call to `allocate` on this same allocator.
    /// 2. `layout` equals the layout that allocation was made with.
    /// 3. The block is not used again after this call.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);
}

/// The default [`BlockAllocator`], backed by the global allocator.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemAllocator;

impl BlockAllocator for SystemAllocator {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>> {
        // Control blocks always carry at least their header, so a zero-sized
        // request indicates a bug in the caller, not a degenerate input.
        debug_assert!(layout.size() > 0, "control blocks are never zero-sized");

        // SAFETY: The layout is non-zero-sized per the assertion above.
        let ptr = unsafe { alloc::alloc(layout) };

        NonNull::new(ptr).ok_or(Error::AllocationFailed { layout })
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: Caller guarantees `ptr`/`layout` came from `allocate`,
        // which forwarded them to the global allocator.
        unsafe { alloc::dealloc(ptr.as_ptr(), layout) };
    }
}
