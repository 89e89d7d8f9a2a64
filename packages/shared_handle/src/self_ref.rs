use std::cell::OnceCell;
use std::fmt;

use crate::{Error, Result, Shared, Weak};

/// Lets a managed object hand out strong handles to itself.
///
/// Embed a `SelfRef<T>` in the managed type, expose it through
/// [`SelfReferential`], and construct the object with
/// [`Shared::new_self_referential`]. The factory binds the cell to a weak
/// handle of the freshly created control block — strictly *after* the block
/// exists, which is why the object's own constructor can never do this
/// itself — and from then on the object can call
/// [`shared()`][SelfRef::shared] from any of its methods.
///
/// The internal handle is weak on purpose: a strong one would form a cycle
/// with the object's own control block and the object would never be
/// destroyed.
///
/// Objects that were constructed by hand or adopted from a raw pointer have
/// an unbound cell, and `shared()` reports
/// [`Error::SelfReferenceUnavailable`] — a recoverable condition, not a
/// panic.
///
/// # Example
///
/// ```rust
/// use shared_handle::{SelfRef, SelfReferential, Shared};
///
/// struct Session {
///     self_ref: SelfRef<Session>,
///     name: String,
/// }
///
/// impl SelfReferential for Session {
///     fn self_ref(&self) -> &SelfRef<Self> {
///         &self.self_ref
///     }
/// }
///
/// impl Session {
///     /// Hands the session to a consumer that needs its own handle.
///     fn register(&self) -> Shared<Session> {
///         self.self_ref.shared().expect("session is owned by a factory handle")
///     }
/// }
///
/// let session = Shared::new_self_referential(Session {
///     self_ref: SelfRef::new(),
///     name: "alpha".to_string(),
/// });
///
/// let registered = session.register();
/// assert!(session.ptr_eq(&registered));
/// assert_eq!(registered.name, "alpha");
/// ```
pub struct SelfRef<T: ?Sized> {
    cell: OnceCell<Weak<T>>,
}

impl<T: ?Sized> SelfRef<T> {
    /// Creates an unbound cell, ready to be embedded in a managed type.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            cell: OnceCell::new(),
        }
    }

    /// Binds the cell to its enclosing control block. Factory use only;
    /// runs exactly once per object.
    pub(crate) fn bind(&self, weak: Weak<T>) {
        self.cell
            .set(weak)
            .expect("self reference is bound exactly once, by the factory");
    }

    /// A new strong handle to the enclosing object.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SelfReferenceUnavailable`] if the object was never
    /// bound by [`Shared::new_self_referential`] (constructed by hand, or
    /// adopted from a raw pointer) or if the owning strong handles are
    /// already gone.
    pub fn shared(&self) -> Result<Shared<T>> {
        self.cell
            .get()
            .and_then(Weak::upgrade)
            .ok_or(Error::SelfReferenceUnavailable)
    }

    /// `true` if the factory has bound this cell to a control block.
    ///
    /// A bound cell can still fail [`shared()`][SelfRef::shared] once the
    /// owning strong handles are gone.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.cell.get().is_some()
    }
}

impl<T: ?Sized> Default for SelfRef<T> {
    /// The unbound cell.
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> fmt::Debug for SelfRef<T> {
    #[cfg_attr(test, mutants::skip)] // Display-only code, no API contract.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelfRef")
            .field("is_bound", &self.is_bound())
            .finish_non_exhaustive()
    }
}

/// Managed types that carry a [`SelfRef`] and want the factory to bind it.
///
/// Implementations just return the embedded cell; see [`SelfRef`] for the
/// full pattern.
pub trait SelfReferential {
    /// The object's embedded self-reference cell.
    fn self_ref(&self) -> &SelfRef<Self>;
}
