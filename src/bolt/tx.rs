use super::bucket::Bucket;
use super::cursor::Cursor;
use super::layout::{self, FillPercents};
use super::node::{resolve, resolve_mut, BucketNode};
use super::stats::{BucketStats, PageInfo, TxStats};
use super::{file, Db, Snapshot};
use crate::config::DEFAULT_FILL_PERCENT;
use crate::{Error, Result};
use bytes::Bytes;
use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

/// Outcome of an `on_commit` hook.
pub type HookResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

type CommitHook = Box<dyn FnOnce() -> HookResult>;

enum TxState {
    Open(Arc<BucketNode>),
    Committed,
    RolledBack,
}

struct TxInner {
    db: Db,
    id: u64,
    writable: bool,
    snapshot: Arc<Snapshot>,
    state: RefCell<TxState>,
    managed: Cell<bool>,
    write_flag: Cell<i64>,
    stats: RefCell<TxStats>,
    dirty: RefCell<HashSet<Vec<Bytes>>>,
    rebalance: RefCell<HashSet<Vec<Bytes>>>,
    fill: RefCell<FillPercents>,
    hooks: RefCell<Vec<CommitHook>>,
}

impl TxInner {
    /// Moves an open transaction to its terminal state. Returns false if it
    /// was already closed.
    fn close(&self, terminal: TxState) -> bool {
        let previous = std::mem::replace(&mut *self.state.borrow_mut(), terminal);
        if !matches!(previous, TxState::Open(_)) {
            return false;
        }
        drop(previous);

        let hooks = std::mem::take(&mut *self.hooks.borrow_mut());
        drop(hooks);
        self.db.finish_tx(self.writable, &self.stats.borrow());
        true
    }
}

impl Drop for TxInner {
    fn drop(&mut self) {
        if self.close(TxState::RolledBack) {
            log::debug!("tx {} rolled back on drop", self.id);
        }
    }
}

/// A read-only or read-write transaction.
///
/// Cloning yields another handle to the same transaction. Once committed or
/// rolled back, every operation on it (and on buckets and cursors obtained
/// from it) fails with `tx closed`.
#[derive(Clone)]
pub struct Tx {
    inner: Rc<TxInner>,
}

impl Tx {
    pub(crate) fn begin(db: Db, snapshot: Arc<Snapshot>, writable: bool) -> Tx {
        let id = if writable { snapshot.txid + 1 } else { snapshot.txid };
        let root = Arc::clone(&snapshot.root);
        Tx {
            inner: Rc::new(TxInner {
                db,
                id,
                writable,
                snapshot,
                state: RefCell::new(TxState::Open(root)),
                managed: Cell::new(false),
                write_flag: Cell::new(0),
                stats: RefCell::new(TxStats::default()),
                dirty: RefCell::new(HashSet::new()),
                rebalance: RefCell::new(HashSet::new()),
                fill: RefCell::new(FillPercents::new()),
                hooks: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Transaction id: the txid of the snapshot for readers, the txid the
    /// commit will carry for the writer.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// The database this transaction belongs to.
    pub fn db(&self) -> Db {
        self.inner.db.clone()
    }

    /// Whether this is the writable transaction.
    pub fn writable(&self) -> bool {
        self.inner.writable
    }

    /// Whether the transaction is still open.
    pub fn is_open(&self) -> bool {
        matches!(*self.inner.state.borrow(), TxState::Open(_))
    }

    /// Size in bytes of the database as seen by this transaction.
    pub fn size(&self) -> i64 {
        (self.inner.snapshot.layout.high_water() as usize * self.inner.db.page_size()) as i64
    }

    /// Flags applied when the database file is written. Stored, not interpreted.
    pub fn write_flag(&self) -> i64 {
        self.inner.write_flag.get()
    }

    /// Sets the write flags.
    pub fn set_write_flag(&self, flag: i64) {
        self.inner.write_flag.set(flag);
    }

    /// The root bucket, whose entries are the top-level buckets.
    pub fn root(&self) -> Bucket {
        Bucket::new(self.clone(), Vec::new())
    }

    /// Looks up a top-level bucket.
    pub fn bucket(&self, name: &[u8]) -> Result<Option<Bucket>> {
        self.root().bucket(name)
    }

    /// Creates a top-level bucket.
    pub fn create_bucket(&self, name: &[u8]) -> Result<Bucket> {
        self.root().create_bucket(name)
    }

    /// Creates a top-level bucket unless it already exists.
    pub fn create_bucket_if_not_exists(&self, name: &[u8]) -> Result<Bucket> {
        self.root().create_bucket_if_not_exists(name)
    }

    /// Deletes a top-level bucket and everything in it.
    pub fn delete_bucket(&self, name: &[u8]) -> Result<()> {
        self.root().delete_bucket(name)
    }

    /// A cursor over the top-level bucket names.
    pub fn cursor(&self) -> Result<Cursor> {
        self.root().cursor()
    }

    /// Calls `f` with each top-level bucket in name order.
    pub fn for_each<F, E>(&self, mut f: F) -> std::result::Result<(), E>
    where
        F: FnMut(&[u8], Bucket) -> std::result::Result<(), E>,
        E: From<Error>,
    {
        let root = self.root();
        root.for_each(|name, _| f(name, root.child(name)))
    }

    /// Registers `hook` to run after a successful commit.
    ///
    /// Hooks run in registration order on the committing thread. A rolled
    /// back transaction drops its hooks without running them.
    pub fn on_commit<F>(&self, hook: F)
    where
        F: FnOnce() -> HookResult + 'static,
    {
        self.inner.hooks.borrow_mut().push(Box::new(hook));
    }

    /// Describes page `id`, or `None` past the end of the file.
    pub fn page(&self, id: u64) -> Result<Option<PageInfo>> {
        self.ensure_open()?;
        Ok(self.inner.snapshot.layout.page(id))
    }

    /// Statistics gathered by this transaction so far.
    pub fn stats(&self) -> TxStats {
        *self.inner.stats.borrow()
    }

    /// Verifies key limits in the tree and page accounting of the snapshot.
    pub fn check(&self) -> Result<()> {
        let root = self.current_root()?;
        layout::verify_tree(&root, &mut Vec::new()).map_err(Error::inconsistent)?;
        self.inner.snapshot.layout.verify().map_err(Error::inconsistent)
    }

    /// Writes the database as seen by this transaction to a new file.
    pub fn copy_file(&self, path: impl AsRef<Path>, mode: u32) -> Result<()> {
        let root = self.current_root()?;
        file::write_copy(path.as_ref(), mode, &root, self.inner.snapshot.txid, self.inner.db.page_size())?;
        log::info!("copied tx {} to {}", self.inner.id, path.as_ref().display());
        Ok(())
    }

    /// Persists the changes, then runs the commit hooks.
    ///
    /// A failing hook cannot undo the commit: every hook still runs and the
    /// first failure is returned as `Error::CommitHook`.
    pub fn commit(&self) -> Result<()> {
        if self.inner.managed.get() {
            return Err(Error::ManagedCommit);
        }
        let root = self.current_root()?;
        if !self.inner.writable {
            return Err(Error::TxNotWritable);
        }

        let rebalance_started = Instant::now();
        let rebalanced = self.inner.rebalance.borrow_mut().drain().count() as i64;
        let rebalance_time = rebalance_started.elapsed();

        let fill = self.inner.fill.borrow().clone();
        let report = match self.inner.db.persist(root, self.inner.id, &fill) {
            Ok(report) => report,
            Err(e) => {
                log::warn!("commit of tx {} failed: {}", self.inner.id, e);
                self.inner.close(TxState::RolledBack);
                return Err(e);
            }
        };

        {
            let page_size = self.inner.db.page_size() as i64;
            let allocated = report.summary.allocated as i64;
            let mut stats = self.inner.stats.borrow_mut();
            stats.rebalance += rebalanced;
            stats.rebalance_time += rebalance_time;
            stats.page_count += allocated;
            stats.page_alloc += allocated * page_size;
            stats.spill += report.summary.spilled;
            stats.spill_time += report.spill_time;
            stats.split += report.summary.splits;
            stats.write += allocated + 1;
            stats.write_time += report.write_time;
        }

        let hooks = std::mem::take(&mut *self.inner.hooks.borrow_mut());
        self.inner.close(TxState::Committed);
        log::debug!("committed tx {} ({} hooks)", self.inner.id, hooks.len());

        if let Some(problem) = report.inconsistency {
            return Err(Error::inconsistent(problem));
        }

        let mut failure = None;
        for hook in hooks {
            if let Err(e) = hook() {
                log::warn!("on_commit hook of tx {} failed: {}", self.inner.id, e);
                failure.get_or_insert(e.to_string());
            }
        }
        match failure {
            Some(msg) => Err(Error::CommitHook(msg)),
            None => Ok(()),
        }
    }

    /// Discards the changes. Commit hooks are dropped without running.
    pub fn rollback(&self) -> Result<()> {
        if self.inner.managed.get() {
            return Err(Error::ManagedRollback);
        }
        if !self.inner.close(TxState::RolledBack) {
            return Err(Error::TxClosed);
        }
        log::debug!("rolled back tx {}", self.inner.id);
        Ok(())
    }

    pub(crate) fn set_managed(&self, managed: bool) {
        self.inner.managed.set(managed);
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(Error::TxClosed)
        }
    }

    pub(crate) fn ensure_writable(&self) -> Result<()> {
        self.ensure_open()?;
        if self.inner.writable {
            Ok(())
        } else {
            Err(Error::TxNotWritable)
        }
    }

    fn current_root(&self) -> Result<Arc<BucketNode>> {
        match &*self.inner.state.borrow() {
            TxState::Open(root) => Ok(Arc::clone(root)),
            _ => Err(Error::TxClosed),
        }
    }

    /// Runs `f` on the bucket at `path`.
    pub(crate) fn read<R>(&self, path: &[Bytes], f: impl FnOnce(&BucketNode) -> R) -> Result<R> {
        let state = self.inner.state.borrow();
        let TxState::Open(root) = &*state else {
            return Err(Error::TxClosed);
        };
        let node = resolve(root, path).ok_or(Error::BucketNotFound)?;
        self.inner.stats.borrow_mut().node_deref += path.len() as i64;
        Ok(f(node))
    }

    /// Runs `f` on a private copy of the bucket at `path`.
    pub(crate) fn write<R>(
        &self,
        path: &[Bytes],
        f: impl FnOnce(&mut BucketNode) -> Result<R>,
    ) -> Result<R> {
        let mut state = self.inner.state.borrow_mut();
        let TxState::Open(root) = &mut *state else {
            return Err(Error::TxClosed);
        };
        if !self.inner.writable {
            return Err(Error::TxNotWritable);
        }
        let node = resolve_mut(root, path).ok_or(Error::BucketNotFound)?;
        let result = f(node)?;

        if self.inner.dirty.borrow_mut().insert(path.to_vec()) {
            self.inner.stats.borrow_mut().node_count += 1;
        }
        Ok(result)
    }

    /// Records that the bucket at `path` lost entries.
    pub(crate) fn mark_rebalance(&self, path: &[Bytes]) {
        self.inner.rebalance.borrow_mut().insert(path.to_vec());
    }

    pub(crate) fn count_cursor(&self) {
        self.inner.stats.borrow_mut().cursor_count += 1;
    }

    pub(crate) fn fill_percent(&self, path: &[Bytes]) -> f64 {
        self.inner
            .fill
            .borrow()
            .get(path)
            .copied()
            .unwrap_or(DEFAULT_FILL_PERCENT)
    }

    pub(crate) fn set_fill_percent(&self, path: &[Bytes], fill_percent: f64) {
        self.inner.fill.borrow_mut().insert(path.to_vec(), fill_percent);
    }

    /// Root page of the bucket at `path` when this transaction began.
    pub(crate) fn root_page(&self, path: &[Bytes]) -> u64 {
        self.inner.snapshot.layout.root_of(path)
    }

    pub(crate) fn bucket_stats(&self, path: &[Bytes]) -> Result<BucketStats> {
        let page_size = self.inner.db.page_size();
        let fill = self.inner.fill.borrow().clone();
        self.read(path, |node| layout::bucket_stats(node, &mut path.to_vec(), page_size, &fill))
    }
}

impl fmt::Debug for Tx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tx")
            .field("id", &self.inner.id)
            .field("writable", &self.inner.writable)
            .field("open", &self.is_open())
            .finish()
    }
}
