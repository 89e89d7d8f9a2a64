use std::fmt;
use std::mem::ManuallyDrop;
use std::ptr::NonNull;

use crate::Shared;
use crate::block::{BlockHeader, RawHandle};

/// A weak, non-owning handle observing a reference-counted object.
///
/// A `Weak<T>` never keeps the managed object alive — only the control
/// block's storage, so that [`expired()`][Weak::expired] and
/// [`upgrade()`][Weak::upgrade] stay answerable after the object is gone.
/// The object is destroyed as soon as the last [`Shared`] handle disappears,
/// regardless of how many weak handles remain; the storage is freed once the
/// last handle of either kind disappears.
///
/// Weak handles are how the crate expresses relations without ownership:
/// caches that must not pin their entries, back-references in object graphs
/// that would otherwise form leaking strong cycles, and the
/// [`SelfRef`][crate::SelfRef] capability.
///
/// # Unbound handles
///
/// [`Weak::new`] creates a handle bound to nothing. An unbound handle
/// reports **not expired** — expiry describes an object that existed and is
/// gone, which never happened here — while [`upgrade()`][Weak::upgrade]
/// still returns `None`.
///
/// # Single-threaded design
///
/// Like [`Shared`], this type uses plain (non-atomic) counters and is
/// neither [`Send`] nor [`Sync`].
///
/// # Example
///
/// ```rust
/// use shared_handle::Shared;
///
/// let strong = Shared::new("observed".to_string());
/// let weak = strong.downgrade();
///
/// // Upgrading succeeds while the object is alive.
/// assert_eq!(*weak.upgrade().unwrap(), "observed");
///
/// drop(strong);
///
/// // The object is gone; only the observer remains.
/// assert!(weak.expired());
/// assert!(weak.upgrade().is_none());
/// ```
pub struct Weak<T: ?Sized> {
    /// `None` is the unbound handle.
    raw: Option<RawHandle<T>>,
}

impl<T: ?Sized> Weak<T> {
    /// Creates a handle bound to nothing.
    ///
    /// # Example
    ///
    /// ```rust
    /// use shared_handle::Weak;
    ///
    /// let unbound = Weak::<u32>::new();
    /// assert!(!unbound.expired());
    /// assert!(unbound.upgrade().is_none());
    /// ```
    #[must_use]
    pub const fn new() -> Self {
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
        // SAFETY: A live weak handle keeps the block storage alive (though
        // not the object).
        self.raw.as_ref().map(|raw| unsafe { raw.block.as_ref() })
    }

    /// `true` if this handle is bound to nothing.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.raw.is_none()
    }

    /// `true` if the observed object existed and is now gone.
    ///
    /// An unbound handle reports `false`: no object ever existed behind it,
    /// so none has expired. [`upgrade()`][Weak::upgrade] returns `None` in
    /// both cases, so callers that only care about obtaining a strong handle
    /// need not distinguish them.
    #[must_use]
    pub fn expired(&self) -> bool {
        self.header()
            .is_some_and(|header| header.strong_count() == 0)
    }

    /// Promotes this handle to a strong one, if the object is still alive.
    ///
    /// Returns `None` if the handle is unbound or the object is gone;
    /// otherwise a new [`Shared`] with the strong count incremented.
    ///
    /// # Example
    ///
    /// ```rust
    /// use shared_handle::Shared;
    ///
    /// let strong = Shared::new(3_u16);
    /// let weak = strong.downgrade();
    ///
    /// let promoted = weak.upgrade().unwrap();
    /// assert_eq!(promoted.strong_count(), 2);
    ///
    /// drop(strong);
    /// drop(promoted);
    /// assert!(weak.upgrade().is_none());
    /// ```
    #[must_use]
    pub fn upgrade(&self) -> Option<Shared<T>> {
        let raw = self.raw?;

        // SAFETY: A live weak handle keeps the block storage alive.
        let header = unsafe { raw.block.as_ref() };

        if header.strong_count() == 0 {
            return None;
        }

        // SAFETY: Checked above that the object is alive.
        unsafe { header.acquire_strong() };

        Some(Shared::from_raw(raw))
    }

    /// Number of strong handles currently referencing the observed object,
    /// or 0 for an unbound handle.
    #[must_use]
    pub fn strong_count(&self) -> usize {
        self.header().map_or(0, BlockHeader::strong_count)
    }

    /// Number of weak handles currently observing the object (including this
    /// one), or 0 for an unbound handle.
    #[must_use]
    pub fn weak_count(&self) -> usize {
        self.header().map_or(0, BlockHeader::weak_count)
    }

    /// `true` if both handles observe the same control block (or both are
    /// unbound).
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        let lhs = self.raw.as_ref().map(|raw| raw.block);
        let rhs = other.raw.as_ref().map(|raw| raw.block);
        lhs == rhs
    }

    /// Releases this handle's reference and leaves the handle unbound.
    ///
    /// If this was the last handle of any kind, the control block's storage
    /// is freed. The observed object is never affected. Resetting an
    /// already-unbound handle does nothing.
    pub fn reset(&mut self) {
        if let Some(raw) = self.raw.take() {
            // SAFETY: This handle held one weak reference, released here
            // exactly once because `take()` left the handle unbound.
            unsafe { BlockHeader::release_weak(raw.block) };
        }
    }

    /// Converts this handle into one observing a subobject or trait-object
    /// view of the same managed object, sharing the control block.
    ///
    /// Counts are unchanged; an unbound handle converts to an unbound
    /// handle.
    ///
    /// # Safety
    ///
    /// The observed object may already be destroyed, so `cast_fn` receives a
    /// raw pointer and must derive the new pointer *without dereferencing* —
    /// field projection via [`&raw`][std::ptr] or pointer casts only. The
    /// result must address a subobject (or view) of the same managed object.
    ///
    /// # Example
    ///
    /// ```rust
    /// use std::ptr::NonNull;
    ///
    /// use shared_handle::Shared;
    ///
    /// struct Pair {
    ///     first: u32,
    ///     second: u32,
    /// }
    ///
    /// let strong = Shared::new(Pair {
    ///     first: 1,
    ///     second: 2,
    /// });
    ///
    /// // SAFETY: Field projection only; no dereference of the pointee.
    /// let second: shared_handle::Weak<u32> = unsafe {
    ///     strong.downgrade().cast_with(|pair: NonNull<Pair>| {
    ///         // SAFETY: Stays within the same allocation; no dereference.
    ///         let field = unsafe { &raw mut (*pair.as_ptr()).second };
    ///         NonNull::new(field).unwrap()
    ///     })
    /// };
    ///
    /// assert_eq!(*second.upgrade().unwrap(), 2);
    /// ```
    #[must_use]
    pub unsafe fn cast_with<U: ?Sized, F>(self, cast_fn: F) -> Weak<U>
    where
        F: FnOnce(NonNull<T>) -> NonNull<U>,
    {
        match self.into_raw_parts() {
            None => Weak::new(),
            Some(raw) => Weak::from_raw(RawHandle {
                block: raw.block,
                object: cast_fn(raw.object),
            }),
        }
    }
}

impl<T: ?Sized> Clone for Weak<T> {
    /// Creates another weak handle observing the same object, incrementing
    /// the weak count.
    fn clone(&self) -> Self {
        match self.raw {
            None => Self::new(),
            Some(raw) => {
                // SAFETY: A live weak handle keeps the block storage alive.
                unsafe { raw.block.as_ref() }.acquire_weak();
                Self::from_raw(raw)
            }
        }
    }
}

impl<T: ?Sized> Drop for Weak<T> {
    fn drop(&mut self) {
        self.reset();
    }
}

impl<T: ?Sized> Default for Weak<T> {
    /// The unbound handle.
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> From<&Shared<T>> for Weak<T> {
    /// Equivalent to [`Shared::downgrade`].
    fn from(shared: &Shared<T>) -> Self {
        shared.downgrade()
    }
}

impl<T: ?Sized> fmt::Debug for Weak<T> {
    #[cfg_attr(test, mutants::skip)] // Display-only code, no API contract.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            f.write_str("Weak::new()")
        } else {
            f.debug_struct("Weak")
                .field("strong_count", &self.strong_count())
                .field("weak_count", &self.weak_count())
                .field("expired", &self.expired())
                .finish_non_exhaustive()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use static_assertions::assert_not_impl_any;

    use super::*;

    assert_not_impl_any!(Weak<u32>: Send, Sync);

    /// Test helper that counts drops of the managed object.
    struct DropTracker {
        drops: Rc<Cell<usize>>,
    }

    impl DropTracker {
        fn new() -> (Self, Rc<Cell<usize>>) {
            let drops = Rc::new(Cell::new(0));
            (
                Self {
                    drops: Rc::clone(&drops),
                },
                drops,
            )
        }
    }

    impl Drop for DropTracker {
        fn drop(&mut self) {
            self.drops.set(self.drops.get() + 1);
        }
    }

    #[test]
    fn downgrade_and_clone_track_weak_count() {
        let strong = Shared::new(9_u32);

        let first = strong.downgrade();
        assert_eq!(strong.weak_count(), 1);

        let second = first.clone();
        assert_eq!(strong.weak_count(), 2);
        assert!(first.ptr_eq(&second));

        drop(first);
        drop(second);
        assert_eq!(strong.weak_count(), 0);
    }

    #[test]
    fn weak_handle_never_delays_object_destruction() {
        let (tracker, drops) = DropTracker::new();

        let strong = Shared::new(tracker);
        let weak = strong.downgrade();

        drop(strong);

        // The object died with the last strong handle, observer or not.
        assert_eq!(drops.get(), 1);
        assert!(weak.expired());
        assert_eq!(weak.strong_count(), 0);
        assert_eq!(weak.weak_count(), 1);
    }

    #[test]
    fn upgrade_fails_once_object_is_gone() {
        let strong = Shared::new("going".to_string());
        let weak = strong.downgrade();

        assert!(weak.upgrade().is_some());

        drop(strong);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn upgrade_increments_strong_count() {
        let strong = Shared::new(1_i32);
        let weak = strong.downgrade();

        let promoted = weak.upgrade().unwrap();
        assert_eq!(strong.strong_count(), 2);
        assert!(strong.ptr_eq(&promoted));
    }

    #[test]
    fn unbound_handle_is_not_expired_and_never_upgrades() {
        let unbound = Weak::<String>::new();

        assert!(unbound.is_null());
        assert!(!unbound.expired());
        assert!(unbound.upgrade().is_none());
        assert_eq!(unbound.strong_count(), 0);
        assert_eq!(unbound.weak_count(), 0);
    }

    #[test]
    fn reset_releases_the_observation() {
        let strong = Shared::new(5_u8);
        let mut weak = strong.downgrade();

        weak.reset();
        weak.reset();

        assert!(weak.is_null());
        assert_eq!(strong.weak_count(), 0);
    }

    #[test]
    fn clone_of_unbound_handle_is_unbound() {
        let unbound = Weak::<u8>::new();
        let cloned = unbound.clone();

        assert!(cloned.is_null());
        assert!(unbound.ptr_eq(&cloned));
    }
}
