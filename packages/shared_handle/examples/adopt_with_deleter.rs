//! Example demonstrating adoption of an existing allocation with a custom
//! deleter.
//!
//! Adoption wraps an independently allocated object in a control block; the
//! deleter decides how the object dies when the last strong handle drops.

use std::ptr::NonNull;

use shared_handle::Shared;

fn main() {
    println!("=== Shared: adopting a raw pointer ===");

    // An allocation made elsewhere, e.g. handed over by another subsystem.
    let raw = NonNull::from(Box::leak(Box::new(vec![10_u32, 20, 30])));

    // SAFETY: The pointer came from a leaked Box and is adopted exactly
    // once; the deleter reconstructs the Box to destroy and free it.
    let numbers = unsafe {
        Shared::adopt_with(raw, |ptr: NonNull<Vec<u32>>| {
            println!("Deleter running for the adopted vector.");
            // SAFETY: `ptr` is the leaked Box pointer registered above.
            drop(unsafe { Box::from_raw(ptr.as_ptr()) });
        })
    };

    println!("Adopted {} numbers.", numbers.len());

    let another_owner = numbers.clone();
    println!("Strong count: {}", numbers.strong_count());

    drop(numbers);
    println!("First owner gone; deleter has not run yet.");

    // The deleter prints as the last handle drops.
    drop(another_owner);
    println!("Done.");
}
