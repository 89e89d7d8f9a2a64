use std::alloc::Layout;
use std::mem::ManuallyDrop;
use std::ptr::NonNull;

use crate::block::{BlockHeader, BlockVtable};
use crate::{BlockAllocator, Deleter, Result};

/// Control block for an object that was allocated independently of the block
/// (adopted from a raw pointer).
///
/// Two allocations are in play: the caller made one for the object, and this
/// block is the second. The deleter destroys the object (and typically frees
/// the caller's allocation); the allocator frees the block itself.
///
/// The header is the first field and the struct is `#[repr(C)]`, so the
/// block is addressable through `NonNull<BlockHeader>` and the vtable
/// functions recover the concrete type by casting back.
#[repr(C)]
pub(crate) struct RegularBlock<T, D, A>
where
    D: Deleter<T>,
    A: BlockAllocator,
{
    header: BlockHeader,

    /// The adopted object. Valid until `destroy_object` hands it to the
    /// deleter.
    object: NonNull<T>,

    /// Consumed exactly once by `destroy_object`.
    deleter: ManuallyDrop<D>,

    /// Consumed exactly once by `free_storage`.
    allocator: ManuallyDrop<A>,
}

impl<T, D, A> RegularBlock<T, D, A>
where
    D: Deleter<T>,
    A: BlockAllocator,
{
    const VTABLE: BlockVtable = BlockVtable {
        destroy_object: Self::destroy_object,
        free_storage: Self::free_storage,
    };

    /// Allocates a regular block adopting `object`, with one strong
    /// reference and no weak observers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailed`][crate::Error::AllocationFailed]
    /// if the allocator declines. The deleter is invoked on `object` before
    /// the error returns, so the adopted object does not leak.
    ///
    /// # Safety
    ///
    /// The caller must ensure `object` satisfies the deleter's contract
    /// (e.g. came from `Box::into_raw` for the box deleter) and is not
    /// adopted anywhere else.
    pub(crate) unsafe fn allocate(
        object: NonNull<T>,
        deleter: D,
        allocator: A,
    ) -> Result<NonNull<BlockHeader>> {
        let layout = Layout::new::<Self>();

        let raw = match allocator.allocate(layout) {
            Ok(raw) => raw,
            Err(error) => {
                // All-or-nothing: without a block there is no owner for the
                // adopted object, so it is destroyed here and now.
                // SAFETY: Caller guarantees the object/deleter pairing; the
                // deleter runs exactly once because we return right after.
                unsafe { deleter.delete(object) };
                return Err(error);
            }
        };

        let block = raw.cast::<Self>();

        // SAFETY: `raw` satisfies `Layout::new::<Self>()` per the allocator
        // contract, so it is valid and properly aligned for one `Self`.
        unsafe {
            block.write(Self {
                header: BlockHeader::new(&Self::VTABLE),
                object,
                deleter: ManuallyDrop::new(deleter),
                allocator: ManuallyDrop::new(allocator),
            });
        }

        Ok(block.cast::<BlockHeader>())
    }

    unsafe fn destroy_object(block: NonNull<BlockHeader>) {
        let block = block.cast::<Self>();

        // SAFETY: The header state machine invokes this exactly once per
        // block, so the deleter is still present; no reference to the
        // deleter field exists anywhere else.
        let deleter = unsafe { ManuallyDrop::take(&mut (*block.as_ptr()).deleter) };

        // SAFETY: The object field is immutable after construction and the
        // block storage is still alive.
        let object = unsafe { (*block.as_ptr()).object };

        // SAFETY: One registered object/deleter pairing, one invocation.
        unsafe { deleter.delete(object) };
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

        // The allocator value itself drops here, after the storage it
        // managed is already gone.
    }
}
