use crate::{AllocationStore, Buffer, BufferSnapshot, DispenserConfig, Error, Result};
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;
#[cfg(feature = "tracing")]
use tracing::instrument;

type Slot<S> = Arc<OnceCell<Buffer<S>>>;

/// Routes id requests to one [`Buffer`] per business key.
///
/// Buffers are created lazily on the first request for a key. Concurrent
/// first requests for the same key share a single initialization; exactly
/// one buffer and one initial lease result. If that lease fails the caller
/// sees the error and a later request tries again.
///
/// ```no_run
/// use leafid::{Dispenser, DispenserConfig, MemoryStore};
/// use std::sync::Arc;
///
/// # async fn run() -> leafid::Result<()> {
/// let dispenser = Dispenser::new(Arc::new(MemoryStore::new()), DispenserConfig::default())?;
/// let id = dispenser.next("orders", 0).await?;
/// assert_eq!(id, 1);
/// dispenser.close().await;
/// # Ok(())
/// # }
/// ```
pub struct Dispenser<S: AllocationStore> {
    store: Arc<S>,
    config: DispenserConfig,
    buffers: DashMap<String, Slot<S>>,
    loaded: AtomicUsize,
    closed: AtomicBool,
}

impl<S: AllocationStore> Dispenser<S> {
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `config` is invalid.
    pub fn new(store: Arc<S>, config: DispenserConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            config,
            buffers: DashMap::new(),
            loaded: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        })
    }

    /// Returns the next id for `key`.
    ///
    /// A nonzero `step` sets the width of subsequent leases for the key; zero
    /// keeps the current one (the stored step for a new key).
    ///
    /// # Errors
    ///
    /// - [`Error::ServiceClosed`] after [`Dispenser::close`].
    /// - [`Error::InvalidArgument`] if `key` is empty or `step` exceeds the
    ///   configured maximum.
    /// - [`Error::StoreUnavailable`] if a required lease failed. Retryable.
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    pub async fn next(&self, key: &str, step: u32) -> Result<u64> {
        if self.is_closed() {
            return Err(Error::ServiceClosed);
        }
        if key.is_empty() {
            return Err(Error::invalid("key must not be empty"));
        }
        if step > self.config.max_step {
            return Err(Error::invalid(format!(
                "step {step} exceeds maximum {}",
                self.config.max_step
            )));
        }

        let slot = self.slot(key);
        let init = slot
            .get_or_try_init(|| async move {
                let buffer = Buffer::load(
                    key,
                    Arc::clone(&self.store),
                    step,
                    self.config.buffer.clone(),
                )
                .await?;
                self.loaded.fetch_add(1, Ordering::Relaxed);
                Ok::<_, Error>(buffer)
            })
            .await;
        let buffer = match init {
            Ok(buffer) => buffer,
            Err(e) => {
                // Drop the empty slot unless another caller is still using it.
                self.buffers.remove_if(key, |_, v| {
                    Arc::ptr_eq(v, &slot) && Arc::strong_count(v) == 2 && !v.initialized()
                });
                return Err(e);
            }
        };

        // `close` may have swept the map before this buffer was installed.
        if self.is_closed() {
            buffer.close().await;
            if self
                .buffers
                .remove_if(key, |_, v| Arc::ptr_eq(v, &slot))
                .is_some()
            {
                self.loaded.fetch_sub(1, Ordering::Relaxed);
            }
            return Err(Error::ServiceClosed);
        }

        if step != 0 && step != buffer.step() {
            buffer.set_step(step);
        }
        buffer.next_id().await
    }

    fn slot(&self, key: &str) -> Slot<S> {
        if let Some(slot) = self.buffers.get(key) {
            return Arc::clone(slot.value());
        }
        Arc::clone(self.buffers.entry(key.to_owned()).or_default().value())
    }

    /// Rejects further calls and stops every buffer's refill task. Buffers
    /// created by requests racing with this call are closed by those
    /// requests. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let slots: Vec<_> = self
            .buffers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for slot in &slots {
            if let Some(buffer) = slot.get() {
                buffer.close().await;
            }
        }

        #[cfg(feature = "tracing")]
        tracing::info!(buffers = slots.len(), "dispenser closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Keys that currently have a loaded buffer, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self
            .buffers
            .iter()
            .filter(|entry| entry.value().initialized())
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort_unstable();
        keys
    }

    /// Number of loaded buffers.
    pub fn len(&self) -> usize {
        self.loaded.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Segment state of the buffer for `key`, if one is loaded.
    pub async fn snapshot(&self, key: &str) -> Option<BufferSnapshot> {
        let slot = self.buffers.get(key).map(|entry| Arc::clone(entry.value()))?;
        match slot.get() {
            Some(buffer) => Some(buffer.snapshot().await),
            None => None,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub const fn config(&self) -> &DispenserConfig {
        &self.config
    }
}

impl<S: AllocationStore> core::fmt::Debug for Dispenser<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Dispenser")
            .field("config", &self.config)
            .field("buffers", &self.len())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestStore;
    use crate::{BufferConfig, MemoryStore};
    use core::time::Duration;
    use rand::Rng;
    use std::collections::HashSet;

    fn dispenser(store: Arc<TestStore>) -> Dispenser<TestStore> {
        Dispenser::new(store, DispenserConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn first_call_starts_at_one() {
        let dispenser = dispenser(Arc::new(TestStore::new()));
        assert!(dispenser.is_empty());
        assert_eq!(dispenser.next("test-biz", 0).await.unwrap(), 1);
        assert_eq!(dispenser.next("test-biz", 0).await.unwrap(), 2);
        assert_eq!(dispenser.keys(), vec!["test-biz"]);
        assert_eq!(dispenser.len(), 1);
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let dispenser = dispenser(Arc::new(TestStore::new()));
        assert_eq!(dispenser.next("a", 0).await.unwrap(), 1);
        assert_eq!(dispenser.next("b", 0).await.unwrap(), 1);
        assert_eq!(dispenser.next("a", 0).await.unwrap(), 2);
        assert_eq!(dispenser.keys(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn rejects_invalid_arguments() {
        let store = Arc::new(TestStore::new());
        let config = DispenserConfig {
            max_step: 100,
            ..DispenserConfig::default()
        };
        let dispenser = Dispenser::new(Arc::clone(&store), config).unwrap();

        let err = dispenser.next("", 0).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
        let err = dispenser.next("big", 101).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
        assert!(!err.is_retryable());

        assert_eq!(store.calls(), 0);
        assert!(dispenser.is_empty());
        assert_eq!(dispenser.next("big", 100).await.unwrap(), 1);
    }

    #[test]
    fn rejects_invalid_config() {
        let config = DispenserConfig {
            max_step: 0,
            ..DispenserConfig::default()
        };
        assert!(Dispenser::new(Arc::new(MemoryStore::new()), config).is_err());
    }

    #[tokio::test]
    async fn requested_step_sizes_following_leases() {
        let store = Arc::new(TestStore::new());
        let dispenser = dispenser(Arc::clone(&store));

        assert_eq!(dispenser.next("biz2", 50).await.unwrap(), 1);
        let snap = dispenser.snapshot("biz2").await.unwrap();
        assert_eq!(snap.active_segment().max(), 51);

        for expected in 2..=51 {
            assert_eq!(dispenser.next("biz2", 0).await.unwrap(), expected);
        }
        assert_eq!(store.granted("biz2")[1].step, 50);

        dispenser.next("biz2", 5).await.unwrap();
        let granted = store.granted("biz2");
        let before = granted.len();
        for _ in 0..60 {
            dispenser.next("biz2", 0).await.unwrap();
        }
        assert!(store.granted("biz2")[before..].iter().all(|r| r.step == 5));
    }

    #[tokio::test]
    async fn failed_creation_is_retried() {
        let store = Arc::new(TestStore::new());
        let dispenser = dispenser(Arc::clone(&store));

        store.set_failing(true);
        let err = dispenser.next("retry", 0).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(dispenser.is_empty());
        assert!(dispenser.snapshot("retry").await.is_none());

        store.set_failing(false);
        assert_eq!(dispenser.next("retry", 0).await.unwrap(), 1);
        assert_eq!(store.calls(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_calls_create_one_buffer() {
        const CALLERS: usize = 32;

        let store = Arc::new(TestStore::new());
        store.set_delay(Some(Duration::from_millis(20)));
        let dispenser = Arc::new(dispenser(Arc::clone(&store)));

        let mut handles = Vec::with_capacity(CALLERS);
        for _ in 0..CALLERS {
            let dispenser = Arc::clone(&dispenser);
            handles.push(tokio::spawn(
                async move { dispenser.next("hot", 0).await },
            ));
        }

        let mut ids = HashSet::new();
        for handle in handles {
            assert!(ids.insert(handle.await.unwrap().unwrap()));
        }
        assert_eq!(ids, (1..=CALLERS as u64).collect());
        assert_eq!(store.calls(), 1);
        assert_eq!(dispenser.len(), 1);
        dispenser.close().await;
    }

    #[tokio::test]
    async fn close_rejects_further_calls() {
        let dispenser = dispenser(Arc::new(TestStore::new()));
        dispenser.next("a", 0).await.unwrap();

        dispenser.close().await;
        dispenser.close().await;

        assert!(dispenser.is_closed());
        assert_eq!(dispenser.next("a", 0).await.unwrap_err(), Error::ServiceClosed);
        assert_eq!(dispenser.next("new", 0).await.unwrap_err(), Error::ServiceClosed);
    }

    #[tokio::test(start_paused = true)]
    async fn buffer_created_during_close_is_rejected() {
        let store = Arc::new(TestStore::new());
        store.set_delay(Some(Duration::from_millis(50)));
        let dispenser = Arc::new(dispenser(Arc::clone(&store)));

        let pending = tokio::spawn({
            let dispenser = Arc::clone(&dispenser);
            async move { dispenser.next("k", 0).await }
        });
        // Let the initial lease start before closing.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(store.calls(), 1);
        dispenser.close().await;

        assert_eq!(pending.await.unwrap().unwrap_err(), Error::ServiceClosed);
        assert!(dispenser.is_empty());
        assert!(dispenser.keys().is_empty());
        assert!(dispenser.snapshot("k").await.is_none());
    }

    #[tokio::test]
    async fn failed_creation_leaves_no_slot() {
        let store = Arc::new(TestStore::new());
        let dispenser = dispenser(Arc::clone(&store));

        store.set_failing(true);
        for key in ["x", "y", "z"] {
            dispenser.next(key, 0).await.unwrap_err();
        }
        assert!(dispenser.buffers.is_empty());
        assert_eq!(dispenser.len(), 0);

        store.set_failing(false);
        dispenser.next("x", 0).await.unwrap();
        assert_eq!(dispenser.len(), 1);
        assert_eq!(dispenser.buffers.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn biz3_hundred_thousand_concurrent_ids_are_unique() {
        const TASKS: usize = 100;
        const PER_TASK: usize = 1_000;

        let store = Arc::new(TestStore::new());
        let config = DispenserConfig {
            buffer: BufferConfig {
                refill_interval: Duration::from_millis(5),
                ..BufferConfig::default()
            },
            ..DispenserConfig::default()
        };
        let dispenser = Arc::new(Dispenser::new(Arc::clone(&store), config).unwrap());

        let mut handles = Vec::with_capacity(TASKS);
        for _ in 0..TASKS {
            let dispenser = Arc::clone(&dispenser);
            handles.push(tokio::spawn(async move {
                let mut ids = Vec::with_capacity(PER_TASK);
                for i in 0..PER_TASK {
                    if i % 100 == 0 {
                        let pause = rand::rng().random_range(0..500);
                        tokio::time::sleep(Duration::from_micros(pause)).await;
                    }
                    ids.push(dispenser.next("biz3", 0).await.unwrap());
                }
                ids
            }));
        }

        let mut seen = HashSet::with_capacity(TASKS * PER_TASK);
        for handle in handles {
            for id in handle.await.unwrap() {
                assert!(seen.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(seen.len(), TASKS * PER_TASK);

        let granted = store.granted("biz3");
        assert!(seen.iter().all(|id| granted.iter().any(|r| r.contains(*id))));
        dispenser.close().await;
    }
}
