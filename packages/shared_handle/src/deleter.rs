use std::ptr::NonNull;

/// Knows how to destroy an adopted object.
///
/// A deleter is an ordinary value that is moved into the control block when a
/// raw pointer is adopted and consumed exactly once, at the moment the last
/// strong handle disappears. Any closure or function invocable with the
/// object pointer is a deleter — there is nothing to implement — so
/// instrumented deleters for tests are one `move` closure away.
///
/// The plain [`Shared::adopt`][crate::Shared::adopt] entry point supplies a
/// default deleter that reconstructs the [`Box`] the pointer came from and
/// drops it, pairing with [`Box::into_raw`].
///
/// # Example
///
/// ```rust
/// use std::cell::Cell;
/// use std::ptr::NonNull;
/// use std::rc::Rc;
///
/// use shared_handle::Shared;
///
/// let deletions = Rc::new(Cell::new(0));
/// let counter = Rc::clone(&deletions);
///
/// let ptr = NonNull::from(Box::leak(Box::new("adopted".to_string())));
/// // SAFETY: `ptr` came from a leaked Box and is adopted exactly once; the
/// // deleter reconstructs the box to destroy and free it.
/// let handle = unsafe {
///     Shared::adopt_with(ptr, move |object: NonNull<String>| {
///         counter.set(counter.get() + 1);
///         // SAFETY: `object` is the leaked Box pointer registered above.
///         drop(unsafe { Box::from_raw(object.as_ptr()) });
///     })
/// };
///
/// drop(handle);
/// assert_eq!(deletions.get(), 1);
/// ```
pub trait Deleter<T: ?Sized> {
    /// Destroys the object behind `object`, consuming the deleter.
    ///
    /// # Safety
    ///
    /// The caller must ensure that:
    ///
    /// 1. `object` is the exact pointer this deleter was registered for.
    /// 2. The deleter is invoked at most once.
    /// 3. The object is not used again after this call.
    unsafe fn delete(self, object: NonNull<T>);
}

impl<T: ?Sized, F> Deleter<T> for F
where
    F: FnOnce(NonNull<T>),
{
    unsafe fn delete(self, object: NonNull<T>) {
        self(object);
    }
}

/// The default deleter for adopted pointers: reconstructs the [`Box`] the
/// pointer came from and drops it, destroying the object and freeing its
/// allocation.
pub(crate) fn delete_boxed<T>(object: NonNull<T>) {
    // SAFETY: Every caller routes through an adoption entry point whose
    // contract requires `object` to come from `Box::into_raw` and to be
    // adopted exactly once, so the box can be reconstructed here.
    drop(unsafe { Box::from_raw(object.as_ptr()) });
}
