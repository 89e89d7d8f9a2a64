use std::alloc::Layout;

use thiserror::Error;

/// Errors that can occur when creating or resolving ownership handles.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The allocator declined a control block allocation request.
    ///
    /// No control block exists after this error; nothing is leaked.
    #[error("allocator declined a control block allocation of {} bytes (align {})", .layout.size(), .layout.align())]
    AllocationFailed {
        /// The layout that was requested from the allocator.
        layout: Layout,
    },

    /// A self-reference was requested from an object that has no live binding
    /// to a control block.
    ///
    /// This happens when the object was constructed by hand or adopted from a
    /// raw pointer instead of going through
    /// [`Shared::new_self_referential`][crate::Shared::new_self_referential],
    /// or when the owning strong handles are already gone.
    #[error("object is not managed by a live strong handle")]
    SelfReferenceUnavailable,
}

/// A specialized `Result` type for handle operations, returning the crate's
/// [`Error`] type as the error value.
pub(crate) type Result<T> = std::result::Result<T, Error>;

/// Outcome of a fallible in-place construction via
/// [`Shared::try_new_with_in`][crate::Shared::try_new_with_in].
///
/// Either the control block could not be allocated or the caller's
/// initializer failed. In both cases the single allocation (if it was made)
/// has already been released when this value is returned.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum InitError<E> {
    /// The allocator declined the control block allocation; the initializer
    /// never ran.
    #[error("control block allocation failed")]
    Allocation(#[source] Error),

    /// The initializer returned an error; the allocation was released before
    /// propagating it.
    #[error("value initializer failed")]
    Init(E),
}

#[cfg(test)]
mod tests {
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Error: Send, Sync, Debug);

    #[test]
    fn allocation_failed_mentions_size() {
        let error = Error::AllocationFailed {
            layout: Layout::new::<u64>(),
        };

        assert!(error.to_string().contains('8'));
    }

    #[test]
    fn init_error_wraps_caller_error() {
        let error: InitError<&str> = InitError::Init("widget id out of range");

        match error {
            InitError::Init(inner) => assert_eq!(inner, "widget id out of range"),
            InitError::Allocation(_) => panic!("expected the initializer variant"),
        }
    }
}
