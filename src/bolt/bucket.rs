use super::cursor::Cursor;
use super::node::{BucketNode, Entry};
use super::stats::BucketStats;
use super::tx::Tx;
use crate::config::{MAX_KEY_SIZE, MAX_VALUE_SIZE};
use crate::{Error, Result};
use bytes::Bytes;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

/// A collection of key/value pairs and nested buckets inside a transaction.
///
/// A bucket handle names its bucket by path from the root, so it stays
/// valid across writes within the transaction and reports
/// `bucket not found` once the bucket has been deleted.
#[derive(Clone)]
pub struct Bucket {
    tx: Tx,
    path: Rc<[Bytes]>,
}

impl Bucket {
    pub(crate) fn new(tx: Tx, path: Vec<Bytes>) -> Bucket {
        Bucket { tx, path: Rc::from(path) }
    }

    pub(crate) fn path(&self) -> &[Bytes] {
        &self.path
    }

    pub(crate) fn tx_ref(&self) -> &Tx {
        &self.tx
    }

    /// Handle to the nested bucket `name`, without checking that it exists.
    pub(crate) fn child(&self, name: &[u8]) -> Bucket {
        let mut path = self.path.to_vec();
        path.push(Bytes::copy_from_slice(name));
        Bucket::new(self.tx.clone(), path)
    }

    /// The transaction this bucket was obtained from.
    pub fn tx(&self) -> Tx {
        self.tx.clone()
    }

    /// Whether the bucket can be written.
    pub fn writable(&self) -> bool {
        self.tx.writable()
    }

    /// Root page id when the transaction began; 0 for inline or new buckets.
    pub fn root(&self) -> u64 {
        self.tx.root_page(&self.path)
    }

    /// Threshold for filling leaf pages when they split.
    pub fn fill_percent(&self) -> f64 {
        self.tx.fill_percent(&self.path)
    }

    /// Sets the split threshold for the rest of the transaction.
    /// Values are clamped to `[0.1, 1.0]` when pages are laid out.
    pub fn set_fill_percent(&self, fill_percent: f64) {
        self.tx.set_fill_percent(&self.path, fill_percent);
    }

    /// Looks up a nested bucket.
    pub fn bucket(&self, name: &[u8]) -> Result<Option<Bucket>> {
        let exists = self.tx.read(&self.path, |node| node.child(name).is_some())?;
        Ok(exists.then(|| self.child(name)))
    }

    /// Creates a nested bucket.
    pub fn create_bucket(&self, name: &[u8]) -> Result<Bucket> {
        self.insert_bucket(name, false)
    }

    /// Creates a nested bucket unless one with that name already exists.
    pub fn create_bucket_if_not_exists(&self, name: &[u8]) -> Result<Bucket> {
        self.insert_bucket(name, true)
    }

    fn insert_bucket(&self, name: &[u8], reuse: bool) -> Result<Bucket> {
        self.tx.ensure_writable()?;
        if name.is_empty() {
            return Err(Error::BucketNameRequired);
        }
        if name.len() > MAX_KEY_SIZE {
            return Err(Error::KeyTooLarge);
        }

        self.tx.write(&self.path, |node| match node.get(name) {
            Some(Entry::Bucket(_)) if reuse => Ok(()),
            Some(Entry::Bucket(_)) => Err(Error::BucketExists),
            Some(Entry::Value(_)) => Err(Error::IncompatibleValue),
            None => {
                node.entries.insert(
                    Bytes::copy_from_slice(name),
                    Entry::Bucket(Arc::new(BucketNode::default())),
                );
                Ok(())
            }
        })?;
        Ok(self.child(name))
    }

    /// Deletes a nested bucket and everything below it.
    pub fn delete_bucket(&self, name: &[u8]) -> Result<()> {
        self.tx.ensure_writable()?;
        self.tx.write(&self.path, |node| match node.get(name) {
            Some(Entry::Bucket(_)) => {
                node.entries.remove(name);
                Ok(())
            }
            Some(Entry::Value(_)) => Err(Error::IncompatibleValue),
            None => Err(Error::BucketNotFound),
        })?;
        self.tx.mark_rebalance(&self.path);
        Ok(())
    }

    /// Returns the value for `key`, or `None` if the key is absent or names
    /// a nested bucket.
    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        self.tx.read(&self.path, |node| node.get(key).and_then(Entry::value).cloned())
    }

    /// Sets `key` to `value`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// `key required` for an empty key, `key too large` / `value too large`
    /// past the size limits, and `incompatible value` when `key` names a
    /// nested bucket.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.tx.ensure_writable()?;
        if key.is_empty() {
            return Err(Error::KeyRequired);
        }
        if key.len() > MAX_KEY_SIZE {
            return Err(Error::KeyTooLarge);
        }
        if value.len() > MAX_VALUE_SIZE {
            return Err(Error::ValueTooLarge);
        }
        // The root bucket only holds buckets.
        if self.path.is_empty() {
            return Err(Error::IncompatibleValue);
        }

        self.tx.write(&self.path, |node| {
            if node.get(key).is_some_and(Entry::is_bucket) {
                return Err(Error::IncompatibleValue);
            }
            node.entries.insert(
                Bytes::copy_from_slice(key),
                Entry::Value(Bytes::copy_from_slice(value)),
            );
            Ok(())
        })
    }

    /// Removes `key`. Removing an absent key is not an error.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.tx.ensure_writable()?;
        let removed = self.tx.write(&self.path, |node| match node.get(key) {
            Some(Entry::Bucket(_)) => Err(Error::IncompatibleValue),
            Some(Entry::Value(_)) => Ok(node.entries.remove(key).is_some()),
            None => Ok(false),
        })?;
        if removed {
            self.tx.mark_rebalance(&self.path);
        }
        Ok(())
    }

    /// Current sequence number.
    pub fn sequence(&self) -> Result<u64> {
        self.tx.read(&self.path, |node| node.sequence)
    }

    /// Overwrites the sequence number.
    pub fn set_sequence(&self, sequence: u64) -> Result<()> {
        self.tx.ensure_writable()?;
        self.tx.write(&self.path, |node| {
            node.sequence = sequence;
            Ok(())
        })
    }

    /// Increments and returns the sequence number.
    pub fn next_sequence(&self) -> Result<u64> {
        self.tx.ensure_writable()?;
        self.tx.write(&self.path, |node| {
            node.sequence = node
                .sequence
                .checked_add(1)
                .ok_or_else(|| Error::invalid_argument("sequence overflow"))?;
            Ok(node.sequence)
        })
    }

    /// A cursor over this bucket's keys.
    pub fn cursor(&self) -> Result<Cursor> {
        self.tx.read(&self.path, |_| ())?;
        self.tx.count_cursor();
        Ok(Cursor::new(self.clone()))
    }

    /// Calls `f` with every key in order, passing `None` as the value of
    /// nested buckets.
    ///
    /// `f` may modify the bucket; iteration continues after the last key it
    /// returned. An error from `f` stops the walk and is returned as is.
    pub fn for_each<F, E>(&self, mut f: F) -> std::result::Result<(), E>
    where
        F: FnMut(&[u8], Option<&[u8]>) -> std::result::Result<(), E>,
        E: From<Error>,
    {
        let cursor = self.cursor()?;
        let mut item = cursor.first()?;
        while let Some((key, value)) = item {
            f(&key, value.as_deref())?;
            item = cursor.next()?;
        }
        Ok(())
    }

    /// Page usage of this bucket and its nested buckets.
    pub fn stats(&self) -> Result<BucketStats> {
        self.tx.bucket_stats(&self.path)
    }
}

impl fmt::Debug for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bucket")
            .field("tx", &self.tx.id())
            .field("path", &self.path)
            .finish()
    }
}
