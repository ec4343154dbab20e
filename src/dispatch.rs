use std::sync::{Arc, Mutex, MutexGuard};

/// Multi-producer, single-consumer FIFO that carries worker results back to the script thread.
///
/// Producers call [`ResultQueue::push`] from any thread. The script thread calls
/// [`ResultQueue::drain_all`] once per frame, which swaps the backing vector out under the lock
/// and hands back everything queued so far in insertion order.
pub struct ResultQueue<T> {
    inner: Arc<Mutex<Vec<T>>>,
}

impl<T> Clone for ResultQueue<T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<T> Default for ResultQueue<T> {
    fn default() -> Self {
        Self { inner: Arc::new(Mutex::new(Vec::new())) }
    }
}

impl<T> ResultQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, item: T) {
        self.lock().push(item);
    }

    pub fn drain_all(&self) -> Vec<T> {
        std::mem::take(&mut *self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Queued items are plain values; a producer that panicked mid-push cannot leave them torn.
    fn lock(&self) -> MutexGuard<'_, Vec<T>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
