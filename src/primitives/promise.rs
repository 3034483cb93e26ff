//! One-shot deliverable cell with any number of waiters.

use std::sync::Arc;

use tokio::sync::watch;

/// A promise cell: delivered exactly once, awaited by any number of
/// clones. Repeated deliveries are no-ops, so racing producers are safe.
#[derive(Debug, Clone)]
pub struct Promise<T: Clone> {
    tx: Arc<watch::Sender<Option<T>>>,
    rx: watch::Receiver<Option<T>>,
}

impl<T: Clone> Default for Promise<T> {
    fn default() -> Self {
        Promise::new()
    }
}

impl<T: Clone> Promise<T> {
    /// Creates an undelivered promise.
    pub fn new() -> Promise<T> {
        let (tx, rx) = watch::channel(None);
        Promise {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// A promise already holding `value`.
    pub fn delivered(value: T) -> Promise<T> {
        let promise = Promise::new();
        promise.deliver(value);
        promise
    }

    /// Delivers `value`. Returns `false` when the promise was already
    /// delivered, in which case the cell is unchanged.
    pub fn deliver(&self, value: T) -> bool {
        let mut delivered = false;
        self.tx.send_if_modified(|slot| {
            if slot.is_none() {
                *slot = Some(value.clone());
                delivered = true;
                true
            } else {
                false
            }
        });
        delivered
    }

    /// The delivered value, if any, without waiting.
    pub fn peek(&self) -> Option<T> {
        self.rx.borrow().clone()
    }

    /// True once a value has been delivered.
    pub fn is_delivered(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// Waits for delivery.
    ///
    /// Returns `None` only when every producer handle is gone and nothing
    /// was ever delivered (a closed promise).
    pub async fn get(&self) -> Option<T> {
        let mut rx = self.rx.clone();
        // Waiters hold a tx clone through self, so wait_for only fails when
        // the promise was explicitly closed.
        let result = match rx.wait_for(|slot| slot.is_some()).await {
            Ok(value) => value.clone(),
            Err(_) => None,
        };
        result
    }
}
