//! Double-buffered id dispensing for a single business key.
//!
//! A [`Buffer`] owns two [`Segment`]s. One is *active* and hands out ids from
//! memory; the other is the *standby*. Once the active segment has consumed
//! [`BufferConfig::watermark`] of its range, a background task leases the
//! next range into the standby, so that exhausting the active segment
//! usually costs a slot flip instead of a store round trip.
//!
//! ## Locking
//!
//! All segment state sits behind one async mutex. [`Buffer::next_id`] holds
//! it for the whole check, fetch and swap sequence; two callers can never
//! both observe an exhausted segment and both swap. A store error or a
//! dropped future leaves the state exactly as it was.
//!
//! The background refill only holds the lock to inspect and to install. It
//! leases with the lock released and installs the range only if the standby
//! still needs one and the range lies entirely above the active segment;
//! otherwise the range is dropped. A dropped range is a gap in the id space,
//! never a duplicate.

use crate::{AllocationStore, BufferConfig, Error, IdRange, Result, Segment, SegmentState};
use core::panic::AssertUnwindSafe;
use core::sync::atomic::{AtomicU32, Ordering};
use futures::FutureExt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Which of the two segments is dispensing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Slot {
    Primary,
    Secondary,
}

impl Slot {
    const fn other(self) -> Self {
        match self {
            Self::Primary => Self::Secondary,
            Self::Secondary => Self::Primary,
        }
    }
}

/// Point-in-time copy of a buffer's segments.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferSnapshot {
    pub active: Slot,
    pub primary: Segment,
    pub secondary: Segment,
}

impl BufferSnapshot {
    pub const fn active_segment(&self) -> &Segment {
        match self.active {
            Slot::Primary => &self.primary,
            Slot::Secondary => &self.secondary,
        }
    }

    pub const fn standby_segment(&self) -> &Segment {
        match self.active {
            Slot::Primary => &self.secondary,
            Slot::Secondary => &self.primary,
        }
    }
}

/// Outcome of one refill attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Prefetch {
    /// The watermark was not reached or the standby was already filled.
    Idle,
    /// The leased range was installed into the standby.
    Installed(IdRange),
    /// The range arrived after the standby had been filled, or lies below the
    /// active segment, and was dropped.
    Discarded(IdRange),
}

#[derive(Debug)]
struct State {
    primary: Segment,
    secondary: Segment,
    active: Slot,
}

impl State {
    const fn segment(&self, slot: Slot) -> &Segment {
        match slot {
            Slot::Primary => &self.primary,
            Slot::Secondary => &self.secondary,
        }
    }

    const fn segment_mut(&mut self, slot: Slot) -> &mut Segment {
        match slot {
            Slot::Primary => &mut self.primary,
            Slot::Secondary => &mut self.secondary,
        }
    }

    const fn active(&self) -> &Segment {
        self.segment(self.active)
    }

    const fn active_mut(&mut self) -> &mut Segment {
        self.segment_mut(self.active)
    }

    const fn standby(&self) -> &Segment {
        self.segment(self.active.other())
    }

    const fn standby_mut(&mut self) -> &mut Segment {
        self.segment_mut(self.active.other())
    }

    /// The standby holds unused ids strictly above the active range.
    fn standby_ready(&self) -> bool {
        let standby = self.standby();
        standby.state() == SegmentState::Filled && standby.begin() >= self.active().max()
    }

    fn needs_prefetch(&self, watermark: f64) -> bool {
        self.active().hit_watermark(watermark) && !self.standby_ready()
    }

    fn swap(&mut self) {
        self.active = self.active.other();
    }

    const fn snapshot(&self) -> BufferSnapshot {
        BufferSnapshot {
            active: self.active,
            primary: self.primary,
            secondary: self.secondary,
        }
    }
}

struct Inner<S> {
    key: String,
    store: Arc<S>,
    step: AtomicU32,
    config: BufferConfig,
    state: Mutex<State>,
}

impl<S: AllocationStore> Inner<S> {
    /// Leases a range for this key, bounded by the configured timeout.
    async fn fetch(&self) -> Result<IdRange> {
        let step = self.step.load(Ordering::Relaxed);
        let lease = self.store.take_range(&self.key, step);
        let range = match self.config.fetch_timeout {
            Some(limit) => tokio::time::timeout(limit, lease).await.map_err(|_| {
                Error::store(format!(
                    "lease for key {:?} timed out after {limit:?}",
                    self.key
                ))
            })??,
            None => lease.await?,
        };
        if range.is_empty() {
            return Err(Error::internal(format!(
                "store returned empty range {}..{} for key {:?}",
                range.begin, range.end, self.key
            )));
        }
        Ok(range)
    }

    async fn prefetch(&self) -> Result<Prefetch> {
        if !self
            .state
            .lock()
            .await
            .needs_prefetch(self.config.watermark)
        {
            return Ok(Prefetch::Idle);
        }

        let range = self.fetch().await?;

        let mut state = self.state.lock().await;
        if state.standby_ready() || range.begin < state.active().max() {
            #[cfg(feature = "tracing")]
            tracing::debug!(key = %self.key, ?range, "discarding late prefetch");
            return Ok(Prefetch::Discarded(range));
        }
        state.standby_mut().reset(range);

        #[cfg(feature = "tracing")]
        tracing::debug!(key = %self.key, ?range, "standby segment prefetched");
        Ok(Prefetch::Installed(range))
    }
}

/// Serves ids for one business key from two alternating segments.
///
/// Created by [`Buffer::load`], which leases the first range synchronously
/// and starts the refill task. The task runs until [`Buffer::close`] is
/// called or the buffer is dropped.
pub struct Buffer<S: AllocationStore> {
    inner: Arc<Inner<S>>,
    shutdown: CancellationToken,
    task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl<S: AllocationStore> Buffer<S> {
    /// Leases the primary segment for `key` and starts the background refill
    /// task. `step` of zero uses the step stored for the key.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if `config` is invalid.
    /// - Any error from the initial lease.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip(store, config)))]
    pub async fn load(key: &str, store: Arc<S>, step: u32, config: BufferConfig) -> Result<Self> {
        config.validate()?;

        let inner = Arc::new(Inner {
            key: key.to_owned(),
            store,
            step: AtomicU32::new(step),
            config,
            state: Mutex::new(State {
                primary: Segment::empty(),
                secondary: Segment::empty(),
                active: Slot::Primary,
            }),
        });

        let range = inner.fetch().await?;
        inner.state.lock().await.primary.reset(range);

        #[cfg(feature = "tracing")]
        tracing::info!(key, ?range, "buffer loaded");

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(refill_loop(Arc::clone(&inner), shutdown.clone()));

        Ok(Self {
            inner,
            shutdown,
            task: parking_lot::Mutex::new(Some(task)),
        })
    }

    /// Returns the next id for this key.
    ///
    /// Blocks on the store only when the active segment is exhausted and the
    /// standby has not been prefetched.
    ///
    /// # Errors
    ///
    /// - [`Error::ServiceClosed`] once the buffer is closed.
    /// - Any error from the synchronous lease. The buffer is left unchanged
    ///   and the call may be retried.
    pub async fn next_id(&self) -> Result<u64> {
        if self.is_closed() {
            return Err(Error::ServiceClosed);
        }

        let mut state = self.inner.state.lock().await;
        if let Some(id) = state.active_mut().try_next() {
            return Ok(id);
        }

        if !state.standby_ready() {
            let range = self.inner.fetch().await?;
            state.standby_mut().reset(range);

            #[cfg(feature = "tracing")]
            tracing::debug!(key = %self.inner.key, ?range, "standby leased on demand");
        }
        state.swap();

        #[cfg(feature = "tracing")]
        tracing::debug!(key = %self.inner.key, active = ?state.active, "swapped segments");

        state.active_mut().try_next().ok_or_else(|| {
            Error::internal(format!(
                "segment for key {:?} exhausted right after swap",
                self.inner.key
            ))
        })
    }

    /// Runs one refill check immediately, as the background task does on
    /// each tick.
    ///
    /// # Errors
    ///
    /// Any error from the lease. The buffer is left unchanged.
    pub async fn prefetch(&self) -> Result<Prefetch> {
        self.inner.prefetch().await
    }

    pub fn key(&self) -> &str {
        &self.inner.key
    }

    /// Step used for the next lease. Zero means the step stored for the key.
    pub fn step(&self) -> u32 {
        self.inner.step.load(Ordering::Relaxed)
    }

    /// Changes the step used by subsequent leases. Ids already leased are
    /// unaffected.
    pub fn set_step(&self, step: u32) {
        let previous = self.inner.step.swap(step, Ordering::Relaxed);
        if previous != step {
            #[cfg(feature = "tracing")]
            tracing::info!(key = %self.inner.key, previous, step, "buffer step changed");
        }
    }

    pub async fn snapshot(&self) -> BufferSnapshot {
        self.inner.state.lock().await.snapshot()
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stops the refill task and waits for it to exit. An in-flight lease is
    /// abandoned. Idempotent.
    pub async fn close(&self) {
        self.shutdown.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(_e) = task.await {
                #[cfg(feature = "tracing")]
                tracing::warn!(key = %self.inner.key, "refill task ended abnormally: {_e}");
            }
        }
    }
}

impl<S: AllocationStore> Drop for Buffer<S> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl<S: AllocationStore> core::fmt::Debug for Buffer<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Buffer")
            .field("key", &self.inner.key)
            .field("step", &self.step())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Periodic refill task. Each tick runs inside a panic boundary so one bad
/// tick never ends the task.
async fn refill_loop<S: AllocationStore>(inner: Arc<Inner<S>>, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(inner.config.refill_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; the primary was just leased.
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let tick = AssertUnwindSafe(inner.prefetch()).catch_unwind();
        let outcome = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            outcome = tick => outcome,
        };

        match outcome {
            Ok(Ok(_)) => {}
            Ok(Err(_e)) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(key = %inner.key, "prefetch failed, retrying next tick: {_e}");
            }
            Err(_panic) => {
                #[cfg(feature = "tracing")]
                tracing::error!(key = %inner.key, "prefetch panicked, retrying next tick");
            }
        }
    }

    #[cfg(feature = "tracing")]
    tracing::debug!(key = %inner.key, "refill task stopped");
}
