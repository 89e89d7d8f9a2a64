//! Example demonstrating a managed object that hands out handles to itself.
//!
//! The factory binds the object's [`SelfRef`] after the control block
//! exists; the object's own methods can then mint strong handles without
//! knowing anything about its owners.

use shared_handle::{SelfRef, SelfReferential, Shared};

struct Publisher {
    self_ref: SelfRef<Publisher>,
    topic: String,
}

impl SelfReferential for Publisher {
    fn self_ref(&self) -> &SelfRef<Self> {
        &self.self_ref
    }
}

impl Publisher {
    fn new(topic: impl Into<String>) -> Self {
        Self {
            self_ref: SelfRef::new(),
            topic: topic.into(),
        }
    }

    /// Returns a handle a subscriber can hold on to.
    fn subscribe(&self) -> Shared<Publisher> {
        self.self_ref
            .shared()
            .expect("publisher is created through the self-referential factory")
    }
}

fn main() {
    println!("=== SelfRef: handles from inside the object ===");

    let publisher = Shared::new_self_referential(Publisher::new("updates"));
    println!("Topic: {}", publisher.topic);

    // The object mints its own handles.
    let subscription = publisher.subscribe();
    println!("Strong count after subscribe: {}", publisher.strong_count());

    drop(publisher);

    // The subscription alone keeps the publisher alive.
    println!("Still alive via subscription: {}", subscription.topic);

    drop(subscription);
    println!("Publisher destroyed; storage freed.");
}
