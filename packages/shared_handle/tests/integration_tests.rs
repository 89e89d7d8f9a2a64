//! End-to-end lifecycle tests for the handle types.
//!
//! These tests verify the observable contract across whole object lifetimes:
//! counter accounting under arbitrary clone/reset sequences, exact-once
//! destruction and deallocation, weak-handle semantics, and the
//! all-or-nothing construction guarantee.

use std::alloc::Layout;
use std::cell::Cell;
use std::convert::Infallible;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::ptr::NonNull;
use std::rc::Rc;

use shared_handle::{
    BlockAllocator, Error, SelfRef, SelfReferential, Shared, SystemAllocator, Weak,
};

/// Allocator that tallies allocations and deallocations, for verifying that
/// every control block allocation is matched by exactly one deallocation.
#[derive(Clone, Debug)]
struct TallyAllocator {
    allocations: Rc<Cell<usize>>,
    deallocations: Rc<Cell<usize>>,
}

impl TallyAllocator {
    fn new() -> Self {
        Self {
            allocations: Rc::new(Cell::new(0)),
            deallocations: Rc::new(Cell::new(0)),
        }
    }

    fn allocations(&self) -> usize {
        self.allocations.get()
    }

    fn deallocations(&self) -> usize {
        self.deallocations.get()
    }

    fn is_balanced(&self) -> bool {
        self.allocations.get() == self.deallocations.get()
    }
}

impl BlockAllocator for TallyAllocator {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, Error> {
        self.allocations.set(self.allocations.get() + 1);
        SystemAllocator.allocate(layout)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        self.deallocations.set(self.deallocations.get() + 1);
        // SAFETY: Forwarded pairing; `allocate` delegated to the system
        // allocator with the same layout.
        unsafe { SystemAllocator.deallocate(ptr, layout) };
    }
}

/// Test payload that counts drops.
struct Widget {
    id: u32,
    drops: Rc<Cell<usize>>,
}

impl Widget {
    fn new(id: u32) -> (Self, Rc<Cell<usize>>) {
        let drops = Rc::new(Cell::new(0));
        (
            Self {
                id,
                drops: Rc::clone(&drops),
            },
            drops,
        )
    }
}

impl Drop for Widget {
    fn drop(&mut self) {
        self.drops.set(self.drops.get() + 1);
    }
}

#[test]
fn full_lifecycle_scenario() {
    let allocator = TallyAllocator::new();
    let (widget, drops) = Widget::new(42);

    // Construct in place: one allocation, strong = 1, weak = 0.
    let mut a = Shared::try_new_in(widget, allocator.clone()).unwrap();
    assert_eq!(allocator.allocations(), 1);
    assert_eq!(a.strong_count(), 1);
    assert_eq!(a.weak_count(), 0);
    assert_eq!(a.id, 42);

    // Copy: strong = 2.
    let mut b = a.clone();
    assert_eq!(b.strong_count(), 2);

    // Release one owner: strong = 1, object still alive.
    a.reset();
    assert_eq!(b.strong_count(), 1);
    assert_eq!(drops.get(), 0);

    // Observe: weak = 1.
    let w = b.downgrade();
    assert_eq!(b.weak_count(), 1);

    // Release the last owner: object destroyed, storage still held by `w`.
    b.reset();
    assert_eq!(drops.get(), 1);
    assert_eq!(allocator.deallocations(), 0);
    assert!(w.expired());

    // Promotion after death fails.
    assert!(w.upgrade().is_none());

    // Last observer gone: storage freed.
    drop(w);
    assert_eq!(allocator.deallocations(), 1);
    assert!(allocator.is_balanced());
}

#[test]
fn strong_count_tracks_live_handles_through_arbitrary_sequences() {
    let (widget, drops) = Widget::new(1);
    let first = Shared::new(widget);

    let mut handles = vec![first.clone(), first.clone(), first.clone()];
    assert_eq!(first.strong_count(), 4);

    handles.pop();
    assert_eq!(first.strong_count(), 3);

    // A move transfers the reference without touching the counter.
    let moved = handles.pop().unwrap();
    assert_eq!(first.strong_count(), 3);

    handles.push(moved.clone());
    drop(moved);
    assert_eq!(first.strong_count(), 3);

    handles.clear();
    assert_eq!(first.strong_count(), 1);
    assert_eq!(drops.get(), 0);

    drop(first);
    assert_eq!(drops.get(), 1);
}

#[test]
fn weak_handles_only_delay_deallocation() {
    let allocator = TallyAllocator::new();
    let (widget, drops) = Widget::new(2);

    let strong = Shared::try_new_in(widget, allocator.clone()).unwrap();
    let observers: Vec<Weak<Widget>> = (0..5).map(|_| strong.downgrade()).collect();
    assert_eq!(strong.weak_count(), 5);

    drop(strong);

    // Destruction happened despite five observers; deallocation did not.
    assert_eq!(drops.get(), 1);
    assert_eq!(allocator.deallocations(), 0);

    drop(observers);
    assert_eq!(allocator.deallocations(), 1);
}

#[test]
fn failed_initializer_leaves_zero_outstanding_allocations() {
    let allocator = TallyAllocator::new();

    let result = Shared::<String>::try_new_with_in(|| Err("rejected"), allocator.clone());

    assert!(result.is_err());
    assert_eq!(allocator.allocations(), 1);
    assert!(allocator.is_balanced());
}

#[test]
fn panicking_initializer_leaves_zero_outstanding_allocations() {
    let allocator = TallyAllocator::new();
    let observed = allocator.clone();

    let attempt = catch_unwind(AssertUnwindSafe(move || {
        Shared::<String>::try_new_with_in(
            || -> Result<String, Infallible> { panic!("constructor exploded") },
            allocator,
        )
    }));

    assert!(attempt.is_err());
    assert_eq!(observed.allocations(), 1);
    assert!(observed.is_balanced());
}

#[test]
fn adopted_object_uses_deleter_exactly_once_and_never_again() {
    let deletions = Rc::new(Cell::new(0_usize));
    let counter = Rc::clone(&deletions);

    let object = NonNull::from(Box::leak(Box::new("payload".to_string())));

    // SAFETY: The pointer came from `Box::leak` and is adopted once; the
    // deleter reconstructs the box.
    let handle = unsafe {
        Shared::adopt_with(object, move |ptr: NonNull<String>| {
            counter.set(counter.get() + 1);
            // SAFETY: `ptr` came from `Box::leak` above.
            drop(unsafe { Box::from_raw(ptr.as_ptr()) });
        })
    };

    let observer = handle.downgrade();

    drop(handle);
    assert_eq!(deletions.get(), 1);

    // Nothing later in the block's life re-triggers the deleter.
    assert!(observer.upgrade().is_none());
    drop(observer);
    assert_eq!(deletions.get(), 1);
}

#[test]
fn adoption_failure_destroys_object_without_leaking() {
    #[derive(Debug)]
    struct RefusingAllocator;

    impl BlockAllocator for RefusingAllocator {
        fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, Error> {
            Err(Error::AllocationFailed { layout })
        }

        unsafe fn deallocate(&self, _ptr: NonNull<u8>, _layout: Layout) {
            unreachable!("nothing was ever allocated");
        }
    }

    let deletions = Rc::new(Cell::new(0_usize));
    let counter = Rc::clone(&deletions);

    let object = NonNull::from(Box::leak(Box::new(7_u64)));

    // SAFETY: The pointer came from `Box::leak` and is adopted once; on
    // failure the deleter must run before the error returns.
    let result = unsafe {
        Shared::try_adopt_with_in(
            object,
            move |ptr: NonNull<u64>| {
                counter.set(counter.get() + 1);
                // SAFETY: `ptr` came from `Box::leak` above.
                drop(unsafe { Box::from_raw(ptr.as_ptr()) });
            },
            RefusingAllocator,
        )
    };

    assert!(matches!(result, Err(Error::AllocationFailed { .. })));
    assert_eq!(deletions.get(), 1);
}

struct Graph {
    self_ref: SelfRef<Graph>,
    edges: Vec<Weak<Graph>>,
}

impl SelfReferential for Graph {
    fn self_ref(&self) -> &SelfRef<Self> {
        &self.self_ref
    }
}

#[test]
fn self_referential_object_survives_its_own_teardown() {
    let allocator = TallyAllocator::new();

    let graph = Shared::new_self_referential_in(
        Graph {
            self_ref: SelfRef::new(),
            edges: Vec::new(),
        },
        allocator.clone(),
    );

    let through_self = graph.self_ref().shared().unwrap();
    assert_eq!(graph.strong_count(), 2);
    assert_eq!(graph.weak_count(), 1);

    drop(through_self);
    drop(graph);

    // The embedded weak handle was released during the object's own drop;
    // the storage must still be freed exactly once.
    assert_eq!(allocator.deallocations(), 1);
    assert!(allocator.is_balanced());
}

#[test]
fn weak_back_edges_do_not_keep_objects_alive() {
    let allocator = TallyAllocator::new();

    let first = Shared::new_self_referential_in(
        Graph {
            self_ref: SelfRef::new(),
            edges: Vec::new(),
        },
        allocator.clone(),
    );
    let second = Shared::new_self_referential_in(
        Graph {
            self_ref: SelfRef::new(),
            edges: vec![first.downgrade()],
        },
        allocator.clone(),
    );

    // Edges are weak on purpose; strong edges would form a leaking cycle.
    drop(first);
    let back_edge = second.edges.first().unwrap();
    assert!(back_edge.expired());
    assert!(back_edge.upgrade().is_none());

    drop(second);
    assert!(allocator.is_balanced());
}

#[test]
fn counts_seen_from_both_handle_types_agree() {
    let strong = Shared::new(0_i64);
    let weak = strong.downgrade();
    let another = strong.clone();

    assert_eq!(strong.strong_count(), 2);
    assert_eq!(weak.strong_count(), 2);
    assert_eq!(strong.weak_count(), 1);
    assert_eq!(weak.weak_count(), 1);

    drop(another);
    assert_eq!(weak.strong_count(), 1);
}

#[test]
fn upgrade_chain_keeps_object_alive_past_original_owner() {
    let (widget, drops) = Widget::new(9);

    let original = Shared::new(widget);
    let observer = original.downgrade();

    let revived = observer.upgrade().unwrap();
    drop(original);

    // The upgraded handle is a full owner.
    assert_eq!(drops.get(), 0);
    assert_eq!(revived.id, 9);

    drop(revived);
    assert_eq!(drops.get(), 1);
}

#[test]
fn zero_sized_payloads_round_trip() {
    let allocator = TallyAllocator::new();

    let unit = Shared::try_new_in((), allocator.clone()).unwrap();
    let observer = unit.downgrade();

    assert_eq!(unit.strong_count(), 1);
    drop(unit);
    assert!(observer.expired());

    drop(observer);
    assert!(allocator.is_balanced());
}
