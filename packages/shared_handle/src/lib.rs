//! Reference-counted strong and weak ownership handles with pluggable
//! deleters and allocators.
//!
//! This crate provides [`Shared<T>`], an owning handle that keeps a managed
//! object alive, and [`Weak<T>`], a non-owning observer over the same
//! object. Both share a control block that tracks the two reference counts
//! and knows how to destroy the object and free its own storage. A
//! [`SelfRef<T>`] capability lets a managed object hand out strong handles
//! to itself from inside its own methods.
//!
//! # Key Features
//!
//! - **Exact-once teardown**: the managed object is destroyed exactly once
//!   (when the last strong handle disappears) and the block storage is freed
//!   exactly once (when the last handle of any kind disappears), under
//!   arbitrary clone/move/reset sequences.
//! - **Two allocation strategies**: [`Shared::new`] constructs the object
//!   into the same allocation as its control block (one allocation);
//!   [`Shared::adopt`] wraps an independently allocated object with a
//!   separate block (two allocations).
//! - **Pluggable deleters**: any `FnOnce(NonNull<T>)` destroys an adopted
//!   object; the default reconstructs the `Box` behind a `Box::into_raw`
//!   pointer.
//! - **Pluggable allocators**: control blocks are placed through the
//!   [`BlockAllocator`] capability; [`SystemAllocator`] is the default.
//! - **All-or-nothing construction**: if an in-place initializer fails or
//!   unwinds, the single allocation is released before the failure
//!   propagates — no partial control block, no leak.
//! - **Self-referencing objects**: [`SelfReferential`] types get their
//!   [`SelfRef`] bound by the factory, strictly after the block exists.
//!
//! # Handle Types
//!
//! ## [`Shared<T>`] — owning
//!
//! Cloning increments the strong count; dropping or
//! [`reset()`][Shared::reset] decrements it. The handle can be null;
//! dereferencing a null handle panics, and [`get()`][Shared::get] is the
//! `Option`-returning accessor.
//!
//! ## [`Weak<T>`] — observing
//!
//! Never keeps the object alive, only the control block's storage, so
//! [`expired()`][Weak::expired] and [`upgrade()`][Weak::upgrade] stay
//! answerable after the object is gone.
//!
//! # Single-threaded design
//!
//! Reference counts are plain (non-atomic) cells. All handle types are
//! `!Send + !Sync`; concurrent use requires external synchronization or an
//! atomic variant, which this crate deliberately does not provide.
//!
//! Strong-handle cycles leak, as in any ownership-counting scheme; break
//! cycles with [`Weak`] back-references.
//!
//! # Examples
//!
//! ## Shared ownership with observers
//!
//! ```rust
//! use shared_handle::Shared;
//!
//! let document = Shared::new("contents".to_string());
//! let editor_view = document.clone();
//! let index_entry = document.downgrade();
//!
//! assert_eq!(document.strong_count(), 2);
//! assert_eq!(document.weak_count(), 1);
//!
//! drop(document);
//! drop(editor_view);
//!
//! // The observer outlives the object but cannot revive it.
//! assert!(index_entry.expired());
//! assert!(index_entry.upgrade().is_none());
//! ```
//!
//! ## Adopting an existing allocation
//!
//! ```rust
//! use std::ptr::NonNull;
//!
//! use shared_handle::Shared;
//!
//! let raw = NonNull::from(Box::leak(Box::new(vec![1_u8, 2, 3])));
//!
//! // SAFETY: The pointer came from a leaked Box and is adopted once.
//! let handle = unsafe { Shared::adopt(raw) };
//! assert_eq!(handle.len(), 3);
//! ```

mod allocator;
mod block;
mod deleter;
mod error;
mod in_place_block;
mod regular_block;
mod self_ref;
mod shared;
mod weak;

pub use allocator::{BlockAllocator, SystemAllocator};
pub use deleter::Deleter;
pub use error::{Error, InitError};
pub(crate) use error::Result;
pub use self_ref::{SelfRef, SelfReferential};
pub use shared::Shared;
pub use weak::Weak;
