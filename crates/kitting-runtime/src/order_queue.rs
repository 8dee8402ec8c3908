//! Incoming orders, newest first.

use std::sync::{Mutex, MutexGuard, PoisonError};

use kitting_types::Order;

/// LIFO queue of received orders.
///
/// Appends and pops each take the lock once, so a concurrent reader sees an
/// order either entirely or not at all.
#[derive(Debug, Default)]
pub struct OrderQueue {
    orders: Mutex<Vec<Order>>,
}

impl OrderQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, order: Order) {
        self.lock().push(order);
    }

    pub fn peek_latest(&self) -> Option<Order> {
        self.lock().last().cloned()
    }

    pub fn pop_latest(&self) -> Option<Order> {
        self.lock().pop()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Ids of the queued orders, oldest first.
    pub fn order_ids(&self) -> Vec<String> {
        self.lock().iter().map(|o| o.order_id.clone()).collect()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Order>> {
        self.orders.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
