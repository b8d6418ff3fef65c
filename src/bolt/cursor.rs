use super::bucket::Bucket;
use super::node::{BucketNode, Entry};
use crate::{Error, Result};
use bytes::Bytes;
use std::cell::RefCell;
use std::rc::Rc;

/// A key and its value; the value is `None` for a nested bucket.
pub type Item = (Bytes, Option<Bytes>);

#[derive(Debug, Clone, PartialEq, Eq)]
enum Position {
    Unset,
    At(Bytes),
    BeforeFirst,
    AfterLast,
}

/// Ordered traversal of a bucket's keys.
///
/// The cursor remembers the key it is on rather than an index, so it keeps
/// working while the bucket is modified: after [`Cursor::delete`], `next`
/// returns the key that followed the deleted one.
#[derive(Clone)]
pub struct Cursor {
    bucket: Bucket,
    position: Rc<RefCell<Position>>,
}

impl Cursor {
    pub(crate) fn new(bucket: Bucket) -> Cursor {
        Cursor { bucket, position: Rc::new(RefCell::new(Position::Unset)) }
    }

    /// The bucket this cursor walks.
    pub fn bucket(&self) -> Bucket {
        self.bucket.clone()
    }

    /// Moves to the first key.
    pub fn first(&self) -> Result<Option<Item>> {
        self.locate(|node, _| node.first(), Position::AfterLast)
    }

    /// Moves to the last key.
    pub fn last(&self) -> Result<Option<Item>> {
        self.locate(|node, _| node.last(), Position::BeforeFirst)
    }

    /// Moves to the next key.
    pub fn next(&self) -> Result<Option<Item>> {
        self.locate(
            |node, position| match position {
                Position::At(key) => node.after(key),
                Position::Unset | Position::BeforeFirst => node.first(),
                Position::AfterLast => None,
            },
            Position::AfterLast,
        )
    }

    /// Moves to the previous key.
    pub fn prev(&self) -> Result<Option<Item>> {
        self.locate(
            |node, position| match position {
                Position::At(key) => node.before(key),
                Position::Unset | Position::AfterLast => node.last(),
                Position::BeforeFirst => None,
            },
            Position::BeforeFirst,
        )
    }

    /// Moves to `key`, or to the next key after it if absent.
    pub fn seek(&self, key: &[u8]) -> Result<Option<Item>> {
        self.locate(|node, _| node.seek(key), Position::AfterLast)
    }

    /// Removes the key under the cursor.
    pub fn delete(&self) -> Result<()> {
        let key = match &*self.position.borrow() {
            Position::At(key) => key.clone(),
            _ => return Err(Error::CursorNotPositioned),
        };
        self.bucket.delete(&key)
    }

    fn locate<F>(&self, find: F, miss: Position) -> Result<Option<Item>>
    where
        F: for<'a> FnOnce(&'a BucketNode, &Position) -> Option<(&'a Bytes, &'a Entry)>,
    {
        let position = self.position.borrow().clone();
        let found = self.bucket.tx_ref().read(self.bucket.path(), |node| {
            find(node, &position).map(|(key, entry)| (key.clone(), entry.value().cloned()))
        })?;

        *self.position.borrow_mut() = match &found {
            Some((key, _)) => Position::At(key.clone()),
            None => miss,
        };
        Ok(found)
    }
}
