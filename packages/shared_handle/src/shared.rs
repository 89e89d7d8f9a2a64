use std::convert::Infallible;
use std::fmt;
use std::mem::ManuallyDrop;
use std::ops::Deref;
use std::ptr::NonNull;

use crate::block::{BlockHeader, RawHandle};
use crate::deleter::delete_boxed;
use crate::in_place_block::InPlaceBlock;
use crate::regular_block::RegularBlock;
use crate::{
    BlockAllocator, Deleter, InitError, Result, SelfReferential, SystemAllocator, Weak,
};

/// A strong, owning handle to a reference-counted object.
///
/// Every live `Shared<T>` keeps the managed object alive. Handles are cloned
/// freely; the object is destroyed exactly once, when the last strong handle
/// disappears, and the control block's storage is freed exactly once, when
/// the last handle of any kind (strong or [`Weak`]) disappears.
///
/// A handle can also be *null* — bound to no object at all. Null handles come
/// from [`Shared::null`] or [`reset()`][Shared::reset] and dereferencing one
/// is a caller error that panics; use [`get()`][Shared::get] when nullness is
/// part of normal control flow.
///
/// # Creating handles
///
/// - [`new`][Shared::new] family: the object is constructed into the same
///   allocation as its control block (one allocation total).
/// - [`adopt`][Shared::adopt] family: an already-allocated object is adopted
///   from a raw pointer; a separate control block is allocated, and a
///   [`Deleter`] destroys the object later (two allocations total).
/// - [`Weak::upgrade`]: promotes an observer handle while the object is
///   still alive.
/// - [`SelfRef::shared`][crate::SelfRef::shared]: lets a managed object hand
///   out handles to itself.
///
/// # Single-threaded design
///
/// Reference counts are plain (non-atomic) cells, so this type is neither
/// [`Send`] nor [`Sync`]. Use external synchronization or an atomic variant
/// if handles must cross threads.
///
/// # Example
///
/// ```rust
/// use shared_handle::Shared;
///
/// let first = Shared::new("payload".to_string());
/// let second = first.clone();
///
/// assert_eq!(first.strong_count(), 2);
/// assert_eq!(*second, "payload");
///
/// drop(first);
/// assert_eq!(second.strong_count(), 1);
/// assert_eq!(second.len(), 7); // Deref to the managed String.
/// ```
pub struct Shared<T: ?Sized> {
    /// `None` is the null handle.
    raw: Option<RawHandle<T>>,
}

impl<T: ?Sized> Shared<T> {
    /// Creates a handle referencing no object.
    ///
    /// # Example
    ///
    /// ```rust
    /// use shared_handle::Shared;
    ///
    /// let nothing = Shared::<String>::null();
    /// assert!(nothing.is_null());
    /// assert_eq!(nothing.strong_count(), 0);
    /// ```
    #[must_use]
    pub const fn null() -> Self {
        Self { raw: None }
    }

    pub(crate) fn from_raw(raw: RawHandle<T>) -> Self {
        Self { raw: Some(raw) }
    }

    /// Moves the bound state out without running the release logic.
    fn into_raw_parts(self) -> Option<RawHandle<T>> {
        let mut this = ManuallyDrop::new(self);
        this.raw.take()
    }

    fn header(&self) -> Option<&BlockHeader> {
        // SAFETY: A live strong handle keeps both the object and the block
        // storage alive.
        self.raw.as_ref().map(|raw| unsafe { raw.block.as_ref() })
    }

    /// `true` if this handle references no object.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.raw.is_none()
    }

    /// Number of strong handles currently referencing the object, or 0 for
    /// a null handle.
    #[must_use]
    pub fn strong_count(&self) -> usize {
        self.header().map_or(0, BlockHeader::strong_count)
    }

    /// Number of weak handles currently observing the object, or 0 for a
    /// null handle.
    #[must_use]
    pub fn weak_count(&self) -> usize {
        self.header().map_or(0, BlockHeader::weak_count)
    }

    /// `true` if both handles reference the same control block (or both are
    /// null).
    ///
    /// This is identity, not value equality: two handles to equal but
    /// separately created objects are not `ptr_eq`.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        let lhs = self.raw.as_ref().map(|raw| raw.block);
        let rhs = other.raw.as_ref().map(|raw| raw.block);
        lhs == rhs
    }

    /// A reference to the managed object, or `None` for a null handle.
    ///
    /// # Example
    ///
    /// ```rust
    /// use shared_handle::Shared;
    ///
    /// let handle = Shared::new(42_u32);
    /// assert_eq!(handle.get(), Some(&42));
    ///
    /// let nothing = Shared::<u32>::null();
    /// assert_eq!(nothing.get(), None);
    /// ```
    #[must_use]
    pub fn get(&self) -> Option<&T> {
        // SAFETY: A live strong handle guarantees the object is alive
        // (strong count > 0) for as long as the returned borrow of `self`.
        self.raw.as_ref().map(|raw| unsafe { raw.object.as_ref() })
    }

    /// The managed object's address, or `None` for a null handle.
    #[must_use]
    pub fn as_ptr(&self) -> Option<NonNull<T>> {
        self.raw.as_ref().map(|raw| raw.object)
    }

    /// The managed object's address, without the null check.
    ///
    /// # Safety
    ///
    /// The caller must ensure the handle is not null.
    #[must_use]
    pub unsafe fn as_ptr_unchecked(&self) -> NonNull<T> {
        debug_assert!(!self.is_null(), "as_ptr_unchecked on a null handle");

        // SAFETY: Caller guarantees the handle is bound.
        unsafe { self.raw.as_ref().unwrap_unchecked() }.object
    }

    /// Creates a weak handle observing the same object.
    ///
    /// A null handle downgrades to an unbound weak handle.
    ///
    /// # Example
    ///
    /// ```rust
    /// use shared_handle::Shared;
    ///
    /// let strong = Shared::new(1_u8);
    /// let weak = strong.downgrade();
    ///
    /// assert_eq!(strong.weak_count(), 1);
    /// assert!(!weak.expired());
    /// ```
    #[must_use]
    pub fn downgrade(&self) -> Weak<T> {
        match self.raw {
            None => Weak::new(),
            Some(raw) => {
                // SAFETY: A live strong handle keeps the block storage alive.
                unsafe { raw.block.as_ref() }.acquire_weak();
                Weak::from_raw(raw)
            }
        }
    }

    /// Releases this handle's reference and leaves the handle null.
    ///
    /// If this was the last strong handle, the managed object is destroyed;
    /// if no weak handles remain either, the control block's storage is
    /// freed. Resetting an already-null handle does nothing.
    ///
    /// # Example
    ///
    /// ```rust
    /// use shared_handle::Shared;
    ///
    /// let mut first = Shared::new(5_i32);
    /// let second = first.clone();
    ///
    /// first.reset();
    /// assert!(first.is_null());
    /// assert_eq!(second.strong_count(), 1); // Object still alive.
    /// ```
    pub fn reset(&mut self) {
        if let Some(raw) = self.raw.take() {
            // SAFETY: This handle held one strong reference, released here
            // exactly once because `take()` left the handle null.
            unsafe { BlockHeader::release_strong(raw.block) };
        }
    }

    /// Converts this handle into one referencing a subobject or trait-object
    /// view of the same managed object.
    ///
    /// The conversion shares the original control block: counts are
    /// unchanged, and the full original object is destroyed when the last
    /// handle disappears, regardless of which view it held. A null handle
    /// converts to a null handle.
    ///
    /// # Example
    ///
    /// ```rust
    /// use std::fmt::Display;
    ///
    /// use shared_handle::Shared;
    ///
    /// let number = Shared::new(42_u32);
    /// let display: Shared<dyn Display> = number.cast_with(|value| value as &dyn Display);
    ///
    /// assert_eq!(display.to_string(), "42");
    /// assert_eq!(display.strong_count(), 1);
    /// ```
    #[must_use]
    pub fn cast_with<U: ?Sized, F>(self, cast_fn: F) -> Shared<U>
    where
        F: for<'a> FnOnce(&'a T) -> &'a U,
    {
        match self.into_raw_parts() {
            None => Shared::null(),
            Some(raw) => {
                // SAFETY: The handle was bound, so the object is alive; the
                // borrow ends before the new handle is assembled.
                let object = NonNull::from(cast_fn(unsafe { raw.object.as_ref() }));

                Shared::from_raw(RawHandle {
                    block: raw.block,
                    object,
                })
            }
        }
    }
}

impl<T> Shared<T> {
    /// Creates a handle to `value`, constructing the object into the same
    /// allocation as its control block.
    ///
    /// # Panics
    ///
    /// Panics if the allocation fails.
    ///
    /// # Example
    ///
    /// ```rust
    /// use shared_handle::Shared;
    ///
    /// let handle = Shared::new(vec![1, 2, 3]);
    /// assert_eq!(handle.strong_count(), 1);
    /// assert_eq!(handle.weak_count(), 0);
    /// ```
    #[must_use]
    pub fn new(value: T) -> Self {
        Self::new_in(value, SystemAllocator)
    }

    /// Like [`new`][Self::new], with an explicit block allocator.
    ///
    /// # Panics
    ///
    /// Panics if the allocator declines the allocation.
    #[must_use]
    pub fn new_in<A: BlockAllocator>(value: T, allocator: A) -> Self {
        Self::try_new_in(value, allocator).expect("control block allocation failed")
    }

    /// Like [`new_in`][Self::new_in], reporting allocation failure instead
    /// of panicking.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailed`][crate::Error::AllocationFailed]
    /// if the allocator declines; `value` is dropped and no control block
    /// exists afterwards.
    pub fn try_new_in<A: BlockAllocator>(value: T, allocator: A) -> Result<Self> {
        match Self::try_new_with_in(|| Ok::<_, Infallible>(value), allocator) {
            Ok(handle) => Ok(handle),
            Err(InitError::Allocation(error)) => Err(error),
            Err(InitError::Init(never)) => match never {},
        }
    }

    /// Creates a handle whose object is produced by `init` after the
    /// allocation already exists.
    ///
    /// If `init` unwinds, the allocation is released before the panic
    /// propagates; nothing leaks.
    ///
    /// # Panics
    ///
    /// Panics if the allocation fails.
    #[must_use]
    pub fn new_with(init: impl FnOnce() -> T) -> Self {
        match Self::try_new_with_in(|| Ok::<_, Infallible>(init()), SystemAllocator) {
            Ok(handle) => handle,
            Err(InitError::Allocation(error)) => {
                panic!("control block allocation failed: {error}")
            }
            Err(InitError::Init(never)) => match never {},
        }
    }

    /// Creates a handle whose object is produced by a fallible initializer,
    /// with an explicit block allocator.
    ///
    /// The initializer runs once the single allocation exists. Both an `Err`
    /// return and a panic from the initializer release the allocation before
    /// propagating, so a failed construction leaves no control block and no
    /// storage behind.
    ///
    /// # Errors
    ///
    /// [`InitError::Allocation`] if the allocator declines (the initializer
    /// never ran); [`InitError::Init`] with the initializer's error
    /// otherwise.
    ///
    /// # Example
    ///
    /// ```rust
    /// use shared_handle::{InitError, Shared, SystemAllocator};
    ///
    /// let parsed = Shared::try_new_with_in(|| "17".parse::<u32>(), SystemAllocator).unwrap();
    /// assert_eq!(*parsed, 17);
    ///
    /// let failed = Shared::try_new_with_in(|| "not a number".parse::<u32>(), SystemAllocator);
    /// assert!(matches!(failed, Err(InitError::Init(_))));
    /// ```
    pub fn try_new_with_in<E, A: BlockAllocator>(
        init: impl FnOnce() -> std::result::Result<T, E>,
        allocator: A,
    ) -> std::result::Result<Self, InitError<E>> {
        let (block, object) = InPlaceBlock::allocate(allocator, init)?;
        Ok(Self::from_raw(RawHandle { block, object }))
    }

    /// Creates a handle to a [`SelfReferential`] object and binds the
    /// object's [`SelfRef`][crate::SelfRef] to it, so the object can hand
    /// out handles to itself.
    ///
    /// The binding happens strictly after the control block exists — an
    /// object's own constructor can never observe it.
    ///
    /// # Panics
    ///
    /// Panics if the allocation fails.
    ///
    /// # Example
    ///
    /// ```rust
    /// use shared_handle::{SelfRef, SelfReferential, Shared};
    ///
    /// struct Service {
    ///     self_ref: SelfRef<Service>,
    /// }
    ///
    /// impl SelfReferential for Service {
    ///     fn self_ref(&self) -> &SelfRef<Self> {
    ///         &self.self_ref
    ///     }
    /// }
    ///
    /// let service = Shared::new_self_referential(Service {
    ///     self_ref: SelfRef::new(),
    /// });
    ///
    /// let another = service.self_ref().shared().unwrap();
    /// assert!(service.ptr_eq(&another));
    /// assert_eq!(service.strong_count(), 2);
    /// ```
    #[must_use]
    pub fn new_self_referential(value: T) -> Self
    where
        T: SelfReferential,
    {
        Self::new_self_referential_in(value, SystemAllocator)
    }

    /// Like [`new_self_referential`][Self::new_self_referential], with an
    /// explicit block allocator.
    ///
    /// # Panics
    ///
    /// Panics if the allocator declines the allocation.
    #[must_use]
    pub fn new_self_referential_in<A: BlockAllocator>(value: T, allocator: A) -> Self
    where
        T: SelfReferential,
    {
        let handle = Self::new_in(value, allocator);

        let weak = handle.downgrade();
        let object = handle
            .get()
            .expect("freshly constructed handle is never null");
        object.self_ref().bind(weak);

        handle
    }

    /// Adopts an already-allocated object from a raw pointer, destroying it
    /// with the default box-reconstructing deleter when the last strong
    /// handle disappears.
    ///
    /// A separate control block is allocated; the object's own allocation is
    /// untouched until the deleter runs.
    ///
    /// # Panics
    ///
    /// Panics if the control block allocation fails (the object is still
    /// destroyed via the deleter first).
    ///
    /// # Safety
    ///
    /// The caller must ensure that:
    ///
    /// 1. `object` came from [`Box::into_raw`] (the default deleter
    ///    reconstructs the box).
    /// 2. The same pointer is adopted at most once, ever. Two independent
    ///    adoptions create two unrelated control blocks over the same
    ///    memory and are undefined behavior, not a detected error.
    /// 3. Nothing else destroys or frees the object.
    ///
    /// # Example
    ///
    /// ```rust
    /// use std::ptr::NonNull;
    ///
    /// use shared_handle::Shared;
    ///
    /// let object = NonNull::from(Box::leak(Box::new("adopted".to_string())));
    ///
    /// // SAFETY: The pointer came from a leaked Box and is adopted once.
    /// let handle = unsafe { Shared::adopt(object) };
    ///
    /// assert_eq!(*handle, "adopted");
    /// assert_eq!(handle.strong_count(), 1);
    /// ```
    #[must_use]
    pub unsafe fn adopt(object: NonNull<T>) -> Self {
        // SAFETY: Forwarded caller contract.
        unsafe { Self::adopt_with(object, delete_boxed) }
    }

    /// Adopts an already-allocated object with a custom [`Deleter`].
    ///
    /// # Panics
    ///
    /// Panics if the control block allocation fails (the deleter still runs
    /// first).
    ///
    /// # Safety
    ///
    /// As for [`adopt`][Self::adopt], except the pointer must satisfy the
    /// given deleter's contract rather than the boxed default's.
    #[must_use]
    pub unsafe fn adopt_with<D: Deleter<T>>(object: NonNull<T>, deleter: D) -> Self {
        // SAFETY: Forwarded caller contract.
        unsafe { Self::adopt_with_in(object, deleter, SystemAllocator) }
    }

    /// Adopts an already-allocated object with a custom [`Deleter`] and an
    /// explicit allocator for the control block.
    ///
    /// # Panics
    ///
    /// Panics if the control block allocation fails (the deleter still runs
    /// first).
    ///
    /// # Safety
    ///
    /// As for [`adopt_with`][Self::adopt_with].
    #[must_use]
    pub unsafe fn adopt_with_in<D: Deleter<T>, A: BlockAllocator>(
        object: NonNull<T>,
        deleter: D,
        allocator: A,
    ) -> Self {
        // SAFETY: Forwarded caller contract.
        unsafe { Self::try_adopt_with_in(object, deleter, allocator) }
            .expect("control block allocation failed")
    }

    /// Like [`adopt_with_in`][Self::adopt_with_in], reporting allocation
    /// failure instead of panicking.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailed`][crate::Error::AllocationFailed]
    /// if the allocator declines. The deleter has already been invoked on
    /// `object` when the error returns, so the adopted object does not
    /// leak and must not be used again.
    ///
    /// # Safety
    ///
    /// As for [`adopt_with`][Self::adopt_with].
    pub unsafe fn try_adopt_with_in<D: Deleter<T>, A: BlockAllocator>(
        object: NonNull<T>,
        deleter: D,
        allocator: A,
    ) -> Result<Self> {
        // SAFETY: Forwarded caller contract.
        let block = unsafe { RegularBlock::allocate(object, deleter, allocator) }?;
        Ok(Self::from_raw(RawHandle { block, object }))
    }
}

impl<T: ?Sized> Clone for Shared<T> {
    /// Creates another strong handle to the same object, incrementing the
    /// strong count.
    fn clone(&self) -> Self {
        match self.raw {
            None => Self::null(),
            Some(raw) => {
                // SAFETY: A live strong handle keeps the block storage alive.
                let header = unsafe { raw.block.as_ref() };

                // SAFETY: `self` is a live strong handle, so the object is
                // alive and the count can grow.
                unsafe { header.acquire_strong() };

                Self::from_raw(raw)
            }
        }
    }
}

impl<T: ?Sized> Drop for Shared<T> {
    fn drop(&mut self) {
        self.reset();
    }
}

impl<T: ?Sized> Default for Shared<T> {
    /// The null handle.
    fn default() -> Self {
        Self::null()
    }
}

impl<T: ?Sized> Deref for Shared<T> {
    type Target = T;

    /// Dereferences to the managed object.
    ///
    /// # Panics
    ///
    /// Panics if the handle is null. Dereferencing a null handle is a caller
    /// error; use [`get()`][Shared::get] when nullness is expected.
    fn deref(&self) -> &T {
        self.get().expect("dereferenced a null Shared handle")
    }
}

impl<T: ?Sized> fmt::Debug for Shared<T> {
    #[cfg_attr(test, mutants::skip)] // Display-only code, no API contract.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            f.write_str("Shared::null()")
        } else {
            f.debug_struct("Shared")
                .field("strong_count", &self.strong_count())
                .field("weak_count", &self.weak_count())
                .finish_non_exhaustive()
        }
    }
}
