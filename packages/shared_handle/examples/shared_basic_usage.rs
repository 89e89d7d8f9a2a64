//! Example demonstrating basic usage of [`Shared`] and [`Weak`] handles.
//!
//! This shows in-place construction, shared ownership through cloning, and
//! observation through weak handles.

use shared_handle::Shared;

fn main() {
    println!("=== Shared: strong and weak handles ===");

    // One allocation holds the control block and the string together.
    let document = Shared::new("important contents".to_string());
    println!("Document: {}", *document);
    println!("Strong count: {}", document.strong_count());

    // Clone handles freely; all of them own the same object.
    let editor_copy = document.clone();
    println!("After clone, strong count: {}", document.strong_count());

    // Observers do not keep the object alive.
    let index_entry = document.downgrade();
    println!("Weak count: {}", document.weak_count());

    // While any strong handle lives, observers can promote themselves.
    if let Some(promoted) = index_entry.upgrade() {
        println!("Upgraded observer sees: {}", *promoted);
    }

    drop(document);
    drop(editor_copy);

    // The object is gone; the observer knows.
    println!("Observer expired: {}", index_entry.expired());
    println!("Upgrade possible: {}", index_entry.upgrade().is_some());

    // Storage is freed automatically once the last handle drops.
}
