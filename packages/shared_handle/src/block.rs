use std::cell::Cell;
use std::ptr::NonNull;

/// Lifetime bookkeeping shared by every handle to one managed object.
///
/// A header is the first field of every concrete control block
/// (`#[repr(C)]`), so a `NonNull<BlockHeader>` addresses any block variant
/// and the vtable recovers the concrete type when destruction or
/// deallocation work is needed.
///
/// # Counter encoding
///
/// `strong` is the number of live strong handles. `weak` is the number of
/// live weak handles *plus one unit owned collectively by the strong
/// handles*, released right after the object is destroyed. The extra unit
/// guarantees the storage outlives `destroy_object` even when the object's
/// own destructor drops a weak handle to this very block (the
/// self-reference pattern), so the storage is freed exactly once, by
/// whichever release drives `weak` to zero.
///
/// Counters are plain `Cell`s: this crate is single-threaded by design and
/// every type embedding a header is `!Send + !Sync`.
pub(crate) struct BlockHeader {
    strong: Cell<usize>,
    weak: Cell<usize>,
    vtable: &'static BlockVtable,
}

/// The capability set of a control block, type-erased into plain function
/// pointers over the header address.
pub(crate) struct BlockVtable {
    /// Destroys the managed object. Runs exactly once per block, at the
    /// strong 1 -> 0 transition, before `free_storage`. Must not unwind.
    pub(crate) destroy_object: unsafe fn(NonNull<BlockHeader>),

    /// Releases the block's own storage. Runs exactly once per block, when
    /// the internal weak count reaches zero. Must not unwind.
    pub(crate) free_storage: unsafe fn(NonNull<BlockHeader>),
}

impl BlockHeader {
    /// A header for a freshly created block: one strong handle (the one the
    /// factory returns) and the strong family's weak unit.
    pub(crate) fn new(vtable: &'static BlockVtable) -> Self {
        Self {
            strong: Cell::new(1),
            weak: Cell::new(1),
            vtable,
        }
    }

    /// Number of live strong handles.
    pub(crate) fn strong_count(&self) -> usize {
        self.strong.get()
    }

    /// Number of live weak handles, excluding the strong family's unit.
    pub(crate) fn weak_count(&self) -> usize {
        let held_by_strong = usize::from(self.strong.get() > 0);

        // Cannot underflow: the unit is subtracted only while strong
        // handles are alive, and they hold it for exactly that long.
        self.weak.get().wrapping_sub(held_by_strong)
    }

    /// Registers one more strong handle.
    ///
    /// # Safety
    ///
    /// The object must still be alive (`strong_count() > 0`); reviving a
    /// destroyed object is not representable.
    pub(crate) unsafe fn acquire_strong(&self) {
        debug_assert!(self.strong.get() > 0, "cannot revive a destroyed object");

        self.strong.set(
            self.strong
                .get()
                .checked_add(1)
                .expect("strong count overflow implies more handles than addressable memory"),
        );
    }

    /// Registers one more weak handle.
    pub(crate) fn acquire_weak(&self) {
        self.weak.set(
            self.weak
                .get()
                .checked_add(1)
                .expect("weak count overflow implies more handles than addressable memory"),
        );
    }

    /// Releases one strong reference; destroys the object at the last one
    /// and frees the storage if no weak handles remain either.
    ///
    /// # Safety
    ///
    /// `block` must reference a live block with `strong_count() > 0`, and
    /// the calling handle must not use the block afterwards.
    pub(crate) unsafe fn release_strong(block: NonNull<Self>) {
        // The vtable reference is 'static, so it stays usable after the
        // header borrow ends and even after the storage is freed.
        // SAFETY: Caller guarantees the block is alive.
        let vtable = unsafe { block.as_ref() }.vtable;

        let remaining = {
            // SAFETY: Caller guarantees the block is alive.
            let header = unsafe { block.as_ref() };
            let remaining = header
                .strong
                .get()
                .checked_sub(1)
                .expect("strong count underflow indicates a double release");
            header.strong.set(remaining);
            remaining
        };

        if remaining > 0 {
            return;
        }

        // Last strong handle: destroy the object, then give up the strong
        // family's weak unit. The unit keeps the storage alive across
        // `destroy_object` even if the destructor drops weak handles.
        // SAFETY: strong just transitioned 1 -> 0, so this is the single
        // destruction point for this block.
        unsafe { (vtable.destroy_object)(block) };

        // SAFETY: The storage is still alive; the weak unit we are about to
        // release has kept it so.
        unsafe { Self::release_weak(block) };
    }

    /// Releases one weak reference (a handle's or the strong family's unit);
    /// frees the storage at the last one.
    ///
    /// # Safety
    ///
    /// `block` must reference a block whose storage is still allocated, and
    /// the calling handle must not use the block afterwards.
    pub(crate) unsafe fn release_weak(block: NonNull<Self>) {
        // SAFETY: Caller guarantees the storage is alive.
        let vtable = unsafe { block.as_ref() }.vtable;

        let remaining = {
            // SAFETY: Caller guarantees the storage is alive.
            let header = unsafe { block.as_ref() };
            let remaining = header
                .weak
                .get()
                .checked_sub(1)
                .expect("weak count underflow indicates a double release");
            header.weak.set(remaining);
            remaining
        };

        if remaining == 0 {
            // Nothing references the block anymore; this is the single
            // deallocation point for this block.
            // SAFETY: All counts are zero and no borrow of the header is
            // live across this call.
            unsafe { (vtable.free_storage)(block) };
        }
    }
}

/// The non-null core of a bound handle: the block plus the cached (possibly
/// wide) object pointer.
///
/// The object pointer is cached because a type-erased vtable slot cannot
/// return an unsized pointer; it is dereferenced only while the strong count
/// is positive.
pub(crate) struct RawHandle<T: ?Sized> {
    pub(crate) block: NonNull<BlockHeader>,
    pub(crate) object: NonNull<T>,
}

impl<T: ?Sized> Clone for RawHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: ?Sized> Copy for RawHandle<T> {}
