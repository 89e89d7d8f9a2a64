use std::alloc::Layout;
use std::mem::ManuallyDrop;
use std::ptr::NonNull;

use scopeguard::ScopeGuard;

use crate::block::{BlockHeader, BlockVtable};
use crate::{BlockAllocator, InitError};

/// Control block that stores the managed object inline, so a single
/// allocation serves both the block metadata and the object.
///
/// `destroy_object` runs the object's destructor in place without releasing
/// any memory; `free_storage` later releases the one allocation that held
/// both.
#[repr(C)]
pub(crate) struct InPlaceBlock<T, A>
where
    A: BlockAllocator,
{
    header: BlockHeader,

    /// Consumed exactly once by `free_storage`.
    allocator: ManuallyDrop<A>,

    /// The managed object. Dropped in place exactly once by
    /// `destroy_object`; the storage outlives it until `free_storage`.
    object: ManuallyDrop<T>,
}

impl<T, A> InPlaceBlock<T, A>
where
    A: BlockAllocator,
{
    const VTABLE: BlockVtable = BlockVtable {
        destroy_object: Self::destroy_object,
        free_storage: Self::free_storage,
    };

    /// Allocates an in-place block and initializes the managed object from
    /// `init`, returning the header address and the object address.
    ///
    /// The initializer runs after the allocation exists. If it returns an
    /// error or unwinds, the allocation is released first, so no control
    /// block and no storage outlive the failure.
    ///
    /// # Errors
    ///
    /// [`InitError::Allocation`] if the allocator declines (the initializer
    /// never ran); [`InitError::Init`] if the initializer failed.
    pub(crate) fn allocate<E>(
        allocator: A,
        init: impl FnOnce() -> Result<T, E>,
    ) -> Result<(NonNull<BlockHeader>, NonNull<T>), InitError<E>> {
        let layout = Layout::new::<Self>();

        let raw = allocator.allocate(layout).map_err(InitError::Allocation)?;

        // Give the storage back if the initializer fails or unwinds; the
        // guard is defused only once the block is fully constructed.
        let storage = scopeguard::guard(raw, |raw| {
            // SAFETY: `raw` came from this allocator with `layout` and no
            // block was constructed in it.
            unsafe { allocator.deallocate(raw, layout) };
        });

        let value = init().map_err(InitError::Init)?;

        let raw = ScopeGuard::into_inner(storage);
        let block = raw.cast::<Self>();

        // SAFETY: `raw` satisfies `Layout::new::<Self>()` per the allocator
        // contract, so it is valid and properly aligned for one `Self`.
        unsafe {
            block.write(Self {
                header: BlockHeader::new(&Self::VTABLE),
                allocator: ManuallyDrop::new(allocator),
                object: ManuallyDrop::new(value),
            });
        }

        // SAFETY: `block` is valid; the projection stays inside the
        // allocation.
        let object = unsafe { &raw mut (*block.as_ptr()).object };

        // SAFETY: Derived from a non-null allocation. `ManuallyDrop<T>` is
        // transparent over `T`.
        let object = unsafe { NonNull::new_unchecked(object) }.cast::<T>();

        Ok((block.cast::<BlockHeader>(), object))
    }

    unsafe fn destroy_object(block: NonNull<BlockHeader>) {
        let block = block.cast::<Self>();

        // SAFETY: The header state machine invokes this exactly once per
        // block, while the storage is still alive; no other reference to
        // the object field exists (the last strong handle is mid-release).
        unsafe { ManuallyDrop::drop(&mut (*block.as_ptr()).object) };
    }

    unsafe fn free_storage(block: NonNull<BlockHeader>) {
        let block = block.cast::<Self>();

        // SAFETY: The header state machine invokes this exactly once per
        // block, after `destroy_object`, so the allocator is still present
        // and nothing references the block anymore.
        let allocator = unsafe { ManuallyDrop::take(&mut (*block.as_ptr()).allocator) };

        // SAFETY: The storage came from this allocator with this layout in
        // `allocate` and is not touched again after this call.
        unsafe { allocator.deallocate(block.cast::<u8>(), Layout::new::<Self>()) };
    }
}
