//! Range allocation over a durable store.
//!
//! The buffer layer never talks to a database directly. It consumes a single
//! operation, [`AllocationStore::take_range`], which leases the next
//! contiguous `[begin, end)` interval for a business key. Implementations
//! must make that operation atomic per key: two concurrent callers for the
//! same key always receive disjoint ranges, one entirely before the other,
//! and a range once returned is never granted again, even after a restart.

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::*;
#[cfg(feature = "sqlite")]
pub use sqlite::*;

use crate::Result;
use core::future::Future;

/// Step applied to a key when neither the caller nor the stored record
/// specifies one.
pub const DEFAULT_STEP: u32 = 1000;

/// First value handed out for a key that has never been allocated.
pub const INITIAL_CURRENT_VALUE: u64 = 1;

/// A half-open range of ids `[begin, end)` leased from a store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct IdRange {
    pub begin: u64,
    pub end: u64,
    /// Step that produced this range; also the step now stored for the key.
    pub step: u32,
}

impl IdRange {
    pub const fn new(begin: u64, end: u64, step: u32) -> Self {
        Self { begin, end, step }
    }

    /// Number of ids in the range.
    pub const fn len(&self) -> u64 {
        self.end.saturating_sub(self.begin)
    }

    pub const fn is_empty(&self) -> bool {
        self.begin >= self.end
    }

    pub const fn contains(&self, id: u64) -> bool {
        self.begin <= id && id < self.end
    }
}

/// Persisted allocation state for one business key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AllocationRecord {
    pub key: String,
    /// Next value that will be handed out as the `begin` of a range.
    pub current_value: u64,
    /// Width of the next range when the caller does not request one.
    pub step: u32,
    /// Creation time in Unix epoch milliseconds.
    pub created_at: i64,
    /// Last modification time in Unix epoch milliseconds.
    pub updated_at: i64,
}

/// Durable source of id ranges.
///
/// # Contract
///
/// `take_range(key, step)`:
///
/// - creates the record for an unseen key with
///   [`INITIAL_CURRENT_VALUE`] and `step` (or the store's default when `step`
///   is zero), returning `[1, 1 + step)`;
/// - otherwise returns `[current, current + effective)` where `effective` is
///   `step` if nonzero, else the stored step, and persists
///   `current += effective` together with the effective step before
///   returning;
/// - is all-or-nothing: on failure no range is observable and the error is
///   [`Error::StoreUnavailable`](crate::Error::StoreUnavailable).
pub trait AllocationStore: Send + Sync + 'static {
    fn take_range(&self, key: &str, step: u32) -> impl Future<Output = Result<IdRange>> + Send;
}

impl<S: AllocationStore> AllocationStore for std::sync::Arc<S> {
    fn take_range(&self, key: &str, step: u32) -> impl Future<Output = Result<IdRange>> + Send {
        (**self).take_range(key, step)
    }
}

/// Computes the range granted to `key` given its current record (if any),
/// the requested step and the store default. Shared by every store so the
/// arithmetic is identical regardless of backend.
pub(crate) fn next_range(
    current: Option<(u64, u32)>,
    requested: u32,
    default_step: u32,
) -> Result<IdRange> {
    let (begin, stored_step) = current.unwrap_or((INITIAL_CURRENT_VALUE, default_step));
    let step = match (requested, stored_step) {
        (0, 0) => default_step,
        (0, stored) => stored,
        (requested, _) => requested,
    };
    let end = begin.checked_add(u64::from(step)).ok_or_else(|| {
        crate::Error::internal(format!("id space exhausted: {begin} + {step} overflows"))
    })?;
    Ok(IdRange::new(begin, end, step))
}

pub(crate) fn validate_default_step(step: u32) -> Result<u32> {
    if step == 0 {
        return Err(crate::Error::invalid("default step must be greater than 0"));
    }
    Ok(step)
}

pub(crate) fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}
