//! Transactional, hierarchical key-value store with bbolt semantics.
//!
//! # Model
//!
//! - Keys live in **buckets**; a bucket can hold values and nested buckets.
//! - A [`Tx`] sees the tree as of its `begin`. Read transactions share the
//!   committed snapshot; the single writable transaction works on a
//!   copy-on-write version of it.
//! - Committing persists the new tree (see `file`) and publishes it as the
//!   snapshot for transactions that begin afterwards.
//!
//! Transactions and everything derived from them are bound to the thread
//! that created them. [`Db`] itself is `Send + Sync`.

mod bucket;
mod cursor;
mod file;
mod layout;
mod node;
pub mod stats;
mod tx;

pub use bucket::Bucket;
pub use cursor::{Cursor, Item};
pub use stats::{BucketStats, Info, PageInfo, Stats, TxStats};
pub use tx::{HookResult, Tx};

use crate::config::{Options, Settings};
use crate::{Error, Result};
use file::DataFile;
use layout::{FillPercents, Layout, PlanSummary};
use node::BucketNode;
use parking_lot::{Condvar, Mutex, RwLock};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

/// A committed state of the tree.
pub(crate) struct Snapshot {
    pub(crate) txid: u64,
    pub(crate) root: Arc<BucketNode>,
    pub(crate) layout: Arc<Layout>,
    pub(crate) data: u64,
}

/// What a commit did, for transaction statistics.
pub(crate) struct CommitReport {
    pub(crate) summary: PlanSummary,
    pub(crate) spill_time: Duration,
    pub(crate) write_time: Duration,
    pub(crate) inconsistency: Option<String>,
}

/// Admits one writable transaction at a time.
struct WriterLock {
    owner: Mutex<Option<ThreadId>>,
    released: Condvar,
}

impl WriterLock {
    fn new() -> Self {
        Self { owner: Mutex::new(None), released: Condvar::new() }
    }

    /// Blocks while another thread writes; fails if this thread already does.
    fn acquire(&self) -> Result<()> {
        let me = thread::current().id();
        let mut owner = self.owner.lock();
        loop {
            match *owner {
                None => {
                    *owner = Some(me);
                    return Ok(());
                }
                Some(id) if id == me => return Err(Error::WriterBusy),
                Some(_) => self.released.wait(&mut owner),
            }
        }
    }

    fn release(&self) {
        *self.owner.lock() = None;
        self.released.notify_one();
    }
}

struct DbInner {
    path: PathBuf,
    read_only: bool,
    page_size: usize,
    file: Mutex<Option<DataFile>>,
    settings: Mutex<Settings>,
    snapshot: RwLock<Arc<Snapshot>>,
    writer: WriterLock,
    stats: Mutex<Stats>,
}

/// Handle to an open database. Cheap to clone.
///
/// # Example
///
/// ```rust,no_run
/// use luabolt::Db;
///
/// # fn main() -> Result<(), luabolt::Error> {
/// let db = Db::open("./my.db", 0o600, None)?;
///
/// db.update(|tx| {
///     let bucket = tx.create_bucket_if_not_exists(b"widgets")?;
///     bucket.put(b"foo", b"bar")
/// })?;
///
/// db.view(|tx| {
///     let bucket = tx.bucket(b"widgets")?.expect("bucket exists");
///     assert_eq!(bucket.get(b"foo")?.as_deref(), Some(&b"bar"[..]));
///     Ok::<(), luabolt::Error>(())
/// })?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Db {
    inner: Arc<DbInner>,
}

impl Db {
    /// Opens the database file at `path`, creating it with permission bits
    /// `mode` if it does not exist.
    ///
    /// # Arguments
    ///
    /// * `path` - Location of the data file
    /// * `mode` - Unix permission bits for a newly created file
    /// * `options` - Open options; `None` uses the defaults
    ///
    /// # Errors
    ///
    /// Returns `Error::Timeout` when the file lock is not obtained within
    /// `options.timeout`, and `Error::Invalid`, `Error::VersionMismatch` or
    /// `Error::Checksum` when the file is not a usable database.
    pub fn open(path: impl AsRef<Path>, mode: u32, options: Option<Options>) -> Result<Db> {
        let path = path.as_ref().to_path_buf();
        let options = options.unwrap_or_default();
        options.validate()?;

        let (file, root) = DataFile::open(&path, mode, &options)?;
        let meta = file.meta();
        let page_size = file.page_size();
        let root = Arc::new(root);
        let layout = Layout::plan(&root, page_size, 0, &FillPercents::new());

        log::info!(
            "opened database {} (txid {}, read_only {})",
            path.display(),
            meta.txid,
            options.read_only
        );

        let snapshot = Snapshot { txid: meta.txid, root, layout: Arc::new(layout), data: meta.offset };
        Ok(Db {
            inner: Arc::new(DbInner {
                path,
                read_only: options.read_only,
                page_size,
                file: Mutex::new(Some(file)),
                settings: Mutex::new(Settings::from_options(&options)),
                snapshot: RwLock::new(Arc::new(snapshot)),
                writer: WriterLock::new(),
                stats: Mutex::new(Stats::default()),
            }),
        })
    }

    /// Path of the data file.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Whether the database was opened read-only.
    pub fn is_read_only(&self) -> bool {
        self.inner.read_only
    }

    /// Whether `close` has not been called yet.
    pub fn is_open(&self) -> bool {
        self.inner.file.lock().is_some()
    }

    /// Releases the file and its lock.
    ///
    /// Waits for a writable transaction running on another thread. Open
    /// read transactions keep their snapshot; new transactions fail with
    /// `database not open`. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        self.inner.writer.acquire()?;
        let file = self.inner.file.lock().take();
        self.inner.writer.release();

        if file.is_some() {
            log::info!("closed database {}", self.inner.path.display());
        }
        Ok(())
    }

    /// Starts a transaction.
    ///
    /// Only one writable transaction may be open at a time: a second
    /// `begin(true)` from another thread blocks until the first one closes,
    /// while one from the same thread fails with `Error::WriterBusy`.
    /// Read transactions never block.
    ///
    /// The caller must `commit` or `rollback`; dropping the last handle to an
    /// open transaction rolls it back.
    pub fn begin(&self, writable: bool) -> Result<Tx> {
        if !self.is_open() {
            return Err(Error::DatabaseNotOpen);
        }
        if writable {
            if self.inner.read_only {
                return Err(Error::DatabaseReadOnly);
            }
            self.inner.writer.acquire()?;
            // close() may have won the race for the writer lock.
            if !self.is_open() {
                self.inner.writer.release();
                return Err(Error::DatabaseNotOpen);
            }
        } else {
            let mut stats = self.inner.stats.lock();
            stats.tx_n += 1;
            stats.open_tx_n += 1;
        }

        let snapshot = Arc::clone(&self.inner.snapshot.read());
        let tx = Tx::begin(self.clone(), snapshot, writable);
        log::debug!("began tx {} (writable {})", tx.id(), writable);
        Ok(tx)
    }

    /// Runs `f` in a writable transaction, committing if it returns `Ok` and
    /// rolling back otherwise.
    ///
    /// `f` must not call `commit` or `rollback` itself.
    pub fn update<F, E>(&self, f: F) -> std::result::Result<(), E>
    where
        F: FnOnce(&Tx) -> std::result::Result<(), E>,
        E: From<Error>,
    {
        let tx = self.begin(true)?;
        Self::run_managed(&tx, f, true)
    }

    /// Runs `f` in a read transaction, which is always rolled back.
    pub fn view<F, E>(&self, f: F) -> std::result::Result<(), E>
    where
        F: FnOnce(&Tx) -> std::result::Result<(), E>,
        E: From<Error>,
    {
        let tx = self.begin(false)?;
        Self::run_managed(&tx, f, false)
    }

    /// Runs `f` as part of a batch.
    ///
    /// Transactions are bound to the calling thread, so each call forms its
    /// own batch: `f` runs exactly once in a writable transaction, exactly as
    /// with [`Db::update`]. `max_batch_size` and `max_batch_delay` are kept as
    /// settings for callers that tune them.
    pub fn batch<F, E>(&self, f: F) -> std::result::Result<(), E>
    where
        F: FnOnce(&Tx) -> std::result::Result<(), E>,
        E: From<Error>,
    {
        log::debug!("batch of 1 call on {}", self.inner.path.display());
        self.update(f)
    }

    fn run_managed<F, E>(tx: &Tx, f: F, commit: bool) -> std::result::Result<(), E>
    where
        F: FnOnce(&Tx) -> std::result::Result<(), E>,
        E: From<Error>,
    {
        tx.set_managed(true);
        let outcome = f(tx);
        tx.set_managed(false);

        match outcome {
            Ok(()) if commit => Ok(tx.commit()?),
            Ok(()) => Ok(tx.rollback()?),
            Err(e) => {
                if let Err(rollback_err) = tx.rollback() {
                    log::debug!("rollback after failed tx {}: {}", tx.id(), rollback_err);
                }
                Err(e)
            }
        }
    }

    /// Flushes the data file to disk. Useful with `no_sync`.
    pub fn sync(&self) -> Result<()> {
        match self.inner.file.lock().as_ref() {
            Some(file) => file.sync(),
            None => Err(Error::DatabaseNotOpen),
        }
    }

    /// Where the committed data lives.
    pub fn info(&self) -> Info {
        Info {
            data: self.inner.snapshot.read().data,
            page_size: self.inner.page_size as i64,
        }
    }

    /// Current database statistics.
    pub fn stats(&self) -> Stats {
        let layout = Arc::clone(&self.inner.snapshot.read().layout);
        let mut stats = *self.inner.stats.lock();
        stats.free_page_n = layout.free_pages().len() as i64;
        stats.pending_page_n = 0;
        stats.free_alloc = (layout.free_pages().len() * layout.page_size()) as i64;
        stats.freelist_inuse = layout.freelist_inuse() as i64;
        stats
    }

    /// A copy of the runtime settings.
    pub fn settings(&self) -> Settings {
        self.inner.settings.lock().clone()
    }

    /// Changes runtime settings in place.
    pub fn update_settings<R>(&self, f: impl FnOnce(&mut Settings) -> R) -> R {
        f(&mut self.inner.settings.lock())
    }

    pub(crate) fn page_size(&self) -> usize {
        self.inner.page_size
    }

    /// Persists `root` as transaction `txid` and publishes it.
    pub(crate) fn persist(
        &self,
        root: Arc<BucketNode>,
        txid: u64,
        fill: &FillPercents,
    ) -> Result<CommitReport> {
        let settings = self.settings();
        let previous_high = self.inner.snapshot.read().layout.high_water();

        let spill_started = Instant::now();
        let layout = Layout::plan(&root, self.inner.page_size, previous_high, fill);
        let spill_time = spill_started.elapsed();

        let write_started = Instant::now();
        let data = {
            let mut guard = self.inner.file.lock();
            let file = guard.as_mut().ok_or(Error::DatabaseNotOpen)?;
            let bytes = file.commit(&root, txid, &settings)?;
            log::debug!("tx {} wrote {} byte image", txid, bytes);
            file.meta().offset
        };
        let write_time = write_started.elapsed();

        let inconsistency = if settings.strict_mode {
            layout::verify_tree(&root, &mut Vec::new())
                .and_then(|()| layout.verify())
                .err()
        } else {
            None
        };

        let summary = layout.summary();
        *self.inner.snapshot.write() = Arc::new(Snapshot { txid, root, layout: Arc::new(layout), data });

        Ok(CommitReport { summary, spill_time, write_time, inconsistency })
    }

    /// Bookkeeping for a transaction that just closed.
    pub(crate) fn finish_tx(&self, writable: bool, tx_stats: &TxStats) {
        {
            let mut stats = self.inner.stats.lock();
            if !writable {
                stats.open_tx_n -= 1;
            }
            stats.tx_stats.add(tx_stats);
        }
        if writable {
            self.inner.writer.release();
        }
    }
}

impl fmt::Display for Db {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DB<{:?}>", self.inner.path.display().to_string())
    }
}

impl fmt::Debug for Db {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Db")
            .field("path", &self.inner.path)
            .field("read_only", &self.inner.read_only)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_temp() -> (TempDir, Db) {
        let dir = TempDir::new().unwrap();
        let db = Db::open(dir.path().join("test.db"), 0o600, None).unwrap();
        (dir, db)
    }

    #[test]
    fn test_update_then_view() {
        let (_dir, db) = open_temp();
        db.update(|tx| {
            let b = tx.create_bucket(b"meow")?;
            b.put(b"key", b"value")
        })
        .unwrap();

        db.view(|tx| {
            let b = tx.bucket(b"meow")?.unwrap();
            assert_eq!(b.get(b"key")?.unwrap().as_ref(), b"value");
            Ok::<(), Error>(())
        })
        .unwrap();
    }

    #[test]
    fn test_failed_update_rolls_back() {
        let (_dir, db) = open_temp();
        let result: Result<()> = db.update(|tx| {
            tx.create_bucket(b"gone")?;
            Err(Error::KeyRequired)
        });
        assert!(matches!(result, Err(Error::KeyRequired)));

        db.view(|tx| {
            assert!(tx.bucket(b"gone")?.is_none());
            Ok::<(), Error>(())
        })
        .unwrap();
    }

    #[test]
    fn test_managed_tx_cannot_commit() {
        let (_dir, db) = open_temp();
        let result: Result<()> = db.update(|tx| tx.commit());
        assert!(matches!(result, Err(Error::ManagedCommit)));
        let result: Result<()> = db.view(|tx| tx.rollback());
        assert!(matches!(result, Err(Error::ManagedRollback)));
    }

    #[test]
    fn test_same_thread_second_writer_fails() {
        let (_dir, db) = open_temp();
        let tx = db.begin(true).unwrap();
        assert!(matches!(db.begin(true), Err(Error::WriterBusy)));
        // Readers are unaffected.
        db.begin(false).unwrap().rollback().unwrap();
        tx.rollback().unwrap();
        db.begin(true).unwrap().rollback().unwrap();
    }

    #[test]
    fn test_dropped_writer_releases_lock() {
        let (_dir, db) = open_temp();
        {
            let _tx = db.begin(true).unwrap();
        }
        db.begin(true).unwrap().rollback().unwrap();
    }

    #[test]
    fn test_read_stats_count_transactions() {
        let (_dir, db) = open_temp();
        let tx = db.begin(false).unwrap();
        assert_eq!(db.stats().open_tx_n, 1);
        tx.rollback().unwrap();
        let stats = db.stats();
        assert_eq!(stats.tx_n, 1);
        assert_eq!(stats.open_tx_n, 0);
    }

    #[test]
    fn test_close_rejects_new_transactions() {
        let (_dir, db) = open_temp();
        db.close().unwrap();
        assert!(!db.is_open());
        assert!(matches!(db.begin(false), Err(Error::DatabaseNotOpen)));
        assert!(matches!(db.sync(), Err(Error::DatabaseNotOpen)));
        db.close().unwrap();
    }

    #[test]
    fn test_display() {
        let (dir, db) = open_temp();
        let expected = format!("DB<{:?}>", dir.path().join("test.db").display().to_string());
        assert_eq!(db.to_string(), expected);
    }
}
