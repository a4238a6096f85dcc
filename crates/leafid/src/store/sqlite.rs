use super::{
    AllocationRecord, AllocationStore, DEFAULT_STEP, IdRange, next_range, now_millis,
    validate_default_step,
};
use crate::{Error, Result};
use core::time::Duration;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use std::path::{Path, PathBuf};
use std::sync::Arc;
#[cfg(feature = "tracing")]
use tracing::instrument;

/// Name of the allocation table.
pub const TABLE_NAME: &str = "alloc_table";

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS alloc_table (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    biz_key TEXT NOT NULL UNIQUE,
    cur_id INTEGER NOT NULL,
    step INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
)";

const COLUMNS: &str = "biz_key, cur_id, step, created_at, updated_at";

// New rows start at `?2`; existing rows advance by the effective step.
const UPSERT: &str = "INSERT INTO alloc_table (biz_key, cur_id, step, created_at, updated_at)
    VALUES (?1, ?2, ?3, ?4, ?4)
    ON CONFLICT(biz_key) DO UPDATE SET
        cur_id = alloc_table.cur_id + excluded.step,
        step = excluded.step,
        updated_at = excluded.updated_at";

/// A durable [`AllocationStore`] backed by SQLite.
///
/// Each `take_range` runs in a `BEGIN IMMEDIATE` transaction: the write lock
/// is taken before the current value is read, so processes sharing the same
/// database file serialize on it and can never observe the same
/// `cur_id`. The new value is committed before the range is returned.
///
/// The connection runs in WAL mode with `synchronous = FULL`. Calls are
/// executed on tokio's blocking pool.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
    default_step: u32,
}

impl SqliteStore {
    /// Opens (or creates) the database at `path` and ensures the schema.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreUnavailable`] if the file cannot be opened or the
    /// schema cannot be created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path)?;
        Self::init(conn, Some(path), DEFAULT_STEP)
    }

    /// Opens a private in-memory database. Useful for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn, None, DEFAULT_STEP)
    }

    /// Replaces the step applied to keys without a stored or requested step.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `default_step` is zero.
    pub fn with_default_step(mut self, default_step: u32) -> Result<Self> {
        self.default_step = validate_default_step(default_step)?;
        Ok(self)
    }

    fn init(conn: Connection, path: Option<PathBuf>, default_step: u32) -> Result<Self> {
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
        conn.pragma_update(None, "synchronous", "FULL")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute(SCHEMA, [])?;

        #[cfg(feature = "tracing")]
        tracing::info!(path = ?path, "allocation store ready");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
            default_step,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub const fn default_step(&self) -> u32 {
        self.default_step
    }

    /// Synchronous form of [`AllocationStore::take_range`].
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self)))]
    pub fn take_range_blocking(&self, key: &str, step: u32) -> Result<IdRange> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current = tx
            .query_row(
                "SELECT cur_id, step FROM alloc_table WHERE biz_key = ?1 LIMIT 1",
                params![key],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?
            .map(|(cur_id, step)| Ok::<_, Error>((to_u64(cur_id)?, to_u32(step)?)))
            .transpose()?;

        let range = next_range(current, step, self.default_step)?;
        tx.execute(
            UPSERT,
            params![key, to_i64(range.end)?, range.step, now_millis()],
        )?;
        tx.commit()?;

        Ok(range)
    }

    /// Returns the record for `key`, if any.
    pub fn record(&self, key: &str) -> Result<Option<AllocationRecord>> {
        let conn = self.conn.lock();
        let record = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM {TABLE_NAME} WHERE biz_key = ?1"),
                params![key],
                read_record,
            )
            .optional()?;
        Ok(record)
    }

    /// All records, ordered by key.
    pub fn records(&self) -> Result<Vec<AllocationRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM {TABLE_NAME} ORDER BY biz_key"
        ))?;
        let rows = stmt.query_map([], read_record)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// All known keys, ordered.
    pub fn keys(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!("SELECT biz_key FROM {TABLE_NAME} ORDER BY biz_key"))?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Inserts `record`, or advances an existing key by `record.step` and
    /// stores that step.
    pub fn upsert(&self, record: &AllocationRecord) -> Result<()> {
        let step = if record.step == 0 {
            self.default_step
        } else {
            record.step
        };
        let conn = self.conn.lock();
        conn.execute(
            UPSERT,
            params![
                record.key,
                to_i64(record.current_value)?,
                step,
                now_millis()
            ],
        )?;
        Ok(())
    }
}

impl AllocationStore for SqliteStore {
    async fn take_range(&self, key: &str, step: u32) -> Result<IdRange> {
        let store = self.clone();
        let key = key.to_owned();
        tokio::task::spawn_blocking(move || store.take_range_blocking(&key, step))
            .await
            .map_err(|e| Error::internal(format!("allocation task failed: {e}")))?
    }
}

fn read_record(row: &Row<'_>) -> rusqlite::Result<AllocationRecord> {
    let cur_id: i64 = row.get(1)?;
    let step: i64 = row.get(2)?;
    Ok(AllocationRecord {
        key: row.get(0)?,
        current_value: u64::try_from(cur_id)
            .map_err(|_| rusqlite::Error::IntegralValueOutOfRange(1, cur_id))?,
        step: u32::try_from(step).map_err(|_| rusqlite::Error::IntegralValueOutOfRange(2, step))?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value)
        .map_err(|_| Error::internal(format!("value {value} does not fit the cur_id column")))
}

fn to_u64(value: i64) -> Result<u64> {
    u64::try_from(value).map_err(|_| Error::internal(format!("negative cur_id {value} in store")))
}

fn to_u32(value: i64) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::internal(format!("step {value} out of range in store")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread::scope;

    #[test]
    fn scenario_biz2() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(
            store.take_range_blocking("biz2", 50).unwrap(),
            IdRange::new(1, 51, 50)
        );
        assert_eq!(
            store.take_range_blocking("biz2", 0).unwrap(),
            IdRange::new(51, 101, 50)
        );
        let record = store.record("biz2").unwrap().unwrap();
        assert_eq!(record.current_value, 101);
        assert_eq!(record.step, 50);
    }

    #[test]
    fn default_step_for_unseen_key() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(
            store.take_range_blocking("test-biz", 0).unwrap(),
            IdRange::new(1, 1001, 1000)
        );
        let store = SqliteStore::open_in_memory()
            .unwrap()
            .with_default_step(25)
            .unwrap();
        assert_eq!(
            store.take_range_blocking("test-biz", 0).unwrap(),
            IdRange::new(1, 26, 25)
        );
    }

    #[test]
    fn missing_record_is_none() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.record("not-found").unwrap().is_none());
    }

    #[test]
    fn corrupt_row_is_reported() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.take_range_blocking("neg", 10).unwrap();
        store
            .conn
            .lock()
            .execute("UPDATE alloc_table SET cur_id = -5 WHERE biz_key = 'neg'", [])
            .unwrap();

        let err = store.record("neg").unwrap_err();
        assert!(matches!(err, Error::StoreUnavailable { .. }));
        assert!(store.records().is_err());
        assert!(matches!(
            store.take_range_blocking("neg", 0).unwrap_err(),
            Error::Internal { .. }
        ));
    }

    #[test]
    fn upsert_and_query_all() {
        let store = SqliteStore::open_in_memory().unwrap();
        let records = [("test_biz", 1000, 1), ("wint", 100, 12), ("rqe", 1_232_121, 4)];
        for (key, cur, step) in records {
            store
                .upsert(&AllocationRecord {
                    key: key.into(),
                    current_value: cur,
                    step,
                    created_at: 0,
                    updated_at: 0,
                })
                .unwrap();
        }

        let all = store.records().unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(store.keys().unwrap(), vec!["rqe", "test_biz", "wint"]);

        let wint = store.record("wint").unwrap().unwrap();
        assert_eq!(wint.current_value, 100);
        assert_eq!(wint.step, 12);

        // Existing key advances by its new step.
        store
            .upsert(&AllocationRecord {
                key: "wint".into(),
                current_value: 0,
                step: 8,
                created_at: 0,
                updated_at: 0,
            })
            .unwrap();
        let wint = store.record("wint").unwrap().unwrap();
        assert_eq!(wint.current_value, 108);
        assert_eq!(wint.step, 8);
    }

    #[test]
    fn ranges_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alloc.db");

        let first = {
            let store = SqliteStore::open(&path).unwrap();
            store.take_range_blocking("durable", 10).unwrap()
        };
        let store = SqliteStore::open(&path).unwrap();
        let second = store.take_range_blocking("durable", 0).unwrap();

        assert_eq!(first, IdRange::new(1, 11, 10));
        assert_eq!(second, IdRange::new(11, 21, 10));
    }

    #[test]
    fn separate_connections_never_overlap() {
        const THREADS: usize = 4;
        const PER_THREAD: usize = 25;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.db");
        // Create the schema before the writers race on it.
        SqliteStore::open(&path).unwrap();

        let begins = Mutex::new(Vec::new());
        scope(|s| {
            for _ in 0..THREADS {
                s.spawn(|| {
                    // One connection per thread, like separate processes.
                    let store = SqliteStore::open(&path).unwrap();
                    for _ in 0..PER_THREAD {
                        let range = store.take_range_blocking("k", 5).unwrap();
                        begins.lock().push(range.begin);
                    }
                });
            }
        });

        let begins = begins.into_inner();
        let unique: HashSet<_> = begins.iter().copied().collect();
        assert_eq!(unique.len(), THREADS * PER_THREAD);
        assert!(begins.iter().all(|b| (b - 1) % 5 == 0));
    }

    #[tokio::test]
    async fn async_take_range() {
        let store = SqliteStore::open_in_memory().unwrap();
        let a = store.take_range("async", 3).await.unwrap();
        let b = store.take_range("async", 0).await.unwrap();
        assert_eq!(a.end, b.begin);
        assert_eq!(b.len(), 3);
    }
}
