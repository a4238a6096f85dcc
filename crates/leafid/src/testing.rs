//! Store double used by the buffer and dispenser tests.

use crate::{AllocationStore, Error, IdRange, MemoryStore, Result};
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use core::time::Duration;
use parking_lot::Mutex;

/// Wraps a [`MemoryStore`] and records every grant. Failures, panics and
/// latency can be injected per test.
#[derive(Default)]
pub(crate) struct TestStore {
    inner: MemoryStore,
    calls: AtomicUsize,
    fail: AtomicBool,
    panic_next: AtomicBool,
    delay: Mutex<Option<Duration>>,
    granted: Mutex<Vec<(String, IdRange)>>,
}

impl TestStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn panic_on_next_call(&self) {
        self.panic_next.store(true, Ordering::SeqCst);
    }

    pub(crate) fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    pub(crate) fn granted(&self, key: &str) -> Vec<IdRange> {
        self.granted
            .lock()
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, r)| *r)
            .collect()
    }
}

impl AllocationStore for TestStore {
    async fn take_range(&self, key: &str, step: u32) -> Result<IdRange> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.panic_next.swap(false, Ordering::SeqCst) {
            panic!("injected store panic");
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::store("injected failure"));
        }
        let range = self.inner.take_range_blocking(key, step)?;
        self.granted.lock().push((key.to_owned(), range));
        Ok(range)
    }
}
