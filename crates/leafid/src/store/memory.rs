use super::{
    AllocationRecord, AllocationStore, DEFAULT_STEP, IdRange, next_range, now_millis,
    validate_default_step,
};
use crate::Result;
use parking_lot::Mutex;
use std::collections::HashMap;

/// A process-local [`AllocationStore`] backed by a mutex-guarded map.
///
/// Every `take_range` runs under one lock, so ranges are disjoint for any
/// number of concurrent callers. Nothing is persisted: a restarted process
/// starts every key again from [`INITIAL_CURRENT_VALUE`]. Use it for tests,
/// benchmarks and single-process deployments that do not need durability.
///
/// [`INITIAL_CURRENT_VALUE`]: super::INITIAL_CURRENT_VALUE
#[derive(Debug)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, AllocationRecord>>,
    default_step: u32,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            default_step: DEFAULT_STEP,
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that applies `default_step` to keys without a stored
    /// or requested step.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`](crate::Error::InvalidArgument) if
    /// `default_step` is zero.
    pub fn with_default_step(default_step: u32) -> Result<Self> {
        Ok(Self {
            records: Mutex::new(HashMap::new()),
            default_step: validate_default_step(default_step)?,
        })
    }

    pub const fn default_step(&self) -> u32 {
        self.default_step
    }

    /// Synchronous form of [`AllocationStore::take_range`].
    pub fn take_range_blocking(&self, key: &str, step: u32) -> Result<IdRange> {
        let mut records = self.records.lock();
        let current = records.get(key).map(|r| (r.current_value, r.step));
        let range = next_range(current, step, self.default_step)?;
        let now = now_millis();
        records
            .entry(key.to_owned())
            .and_modify(|r| {
                r.current_value = range.end;
                r.step = range.step;
                r.updated_at = now;
            })
            .or_insert_with(|| AllocationRecord {
                key: key.to_owned(),
                current_value: range.end,
                step: range.step,
                created_at: now,
                updated_at: now,
            });
        Ok(range)
    }

    pub fn record(&self, key: &str) -> Option<AllocationRecord> {
        self.records.lock().get(key).cloned()
    }

    /// All records, ordered by key.
    pub fn records(&self) -> Vec<AllocationRecord> {
        let mut all: Vec<_> = self.records.lock().values().cloned().collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        all
    }

    /// All known keys, ordered.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.records.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Inserts `record`, or advances an existing key by `record.step` and
    /// stores that step.
    pub fn upsert(&self, record: &AllocationRecord) -> Result<()> {
        let step = if record.step == 0 {
            self.default_step
        } else {
            record.step
        };
        let now = now_millis();
        let mut records = self.records.lock();
        match records.get_mut(&record.key) {
            Some(existing) => {
                existing.current_value = existing
                    .current_value
                    .checked_add(u64::from(step))
                    .ok_or_else(|| crate::Error::internal("id space exhausted"))?;
                existing.step = step;
                existing.updated_at = now;
            }
            None => {
                records.insert(
                    record.key.clone(),
                    AllocationRecord {
                        key: record.key.clone(),
                        current_value: record.current_value,
                        step,
                        created_at: now,
                        updated_at: now,
                    },
                );
            }
        }
        Ok(())
    }
}

impl AllocationStore for MemoryStore {
    async fn take_range(&self, key: &str, step: u32) -> Result<IdRange> {
        self.take_range_blocking(key, step)
    }
}
