//! The bucket tree.
//!
//! Every committed transaction publishes one immutable root. Child buckets
//! are shared through `Arc`, so a writable transaction copies only the
//! nodes along the paths it modifies (`Arc::make_mut`).

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

/// A key's payload: a plain value or a nested bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) enum Entry {
    Value(Bytes),
    Bucket(Arc<BucketNode>),
}

impl Entry {
    pub(crate) fn is_bucket(&self) -> bool {
        matches!(self, Entry::Bucket(_))
    }

    /// The value bytes, or `None` for a nested bucket.
    pub(crate) fn value(&self) -> Option<&Bytes> {
        match self {
            Entry::Value(v) => Some(v),
            Entry::Bucket(_) => None,
        }
    }
}

/// Contents of one bucket, ordered by raw key bytes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct BucketNode {
    pub(crate) sequence: u64,
    pub(crate) entries: BTreeMap<Bytes, Entry>,
}

impl BucketNode {
    pub(crate) fn get(&self, key: &[u8]) -> Option<&Entry> {
        self.entries.get(key)
    }

    pub(crate) fn child(&self, name: &[u8]) -> Option<&Arc<BucketNode>> {
        match self.entries.get(name) {
            Some(Entry::Bucket(child)) => Some(child),
            _ => None,
        }
    }

    pub(crate) fn children(&self) -> impl Iterator<Item = (&Bytes, &Arc<BucketNode>)> {
        self.entries.iter().filter_map(|(k, e)| match e {
            Entry::Bucket(child) => Some((k, child)),
            Entry::Value(_) => None,
        })
    }

    pub(crate) fn has_children(&self) -> bool {
        self.entries.values().any(Entry::is_bucket)
    }

    pub(crate) fn first(&self) -> Option<(&Bytes, &Entry)> {
        self.entries.iter().next()
    }

    pub(crate) fn last(&self) -> Option<(&Bytes, &Entry)> {
        self.entries.iter().next_back()
    }

    /// Smallest key strictly greater than `key`.
    pub(crate) fn after(&self, key: &[u8]) -> Option<(&Bytes, &Entry)> {
        self.entries
            .range::<[u8], _>((Bound::Excluded(key), Bound::Unbounded))
            .next()
    }

    /// Largest key strictly smaller than `key`.
    pub(crate) fn before(&self, key: &[u8]) -> Option<(&Bytes, &Entry)> {
        self.entries
            .range::<[u8], _>((Bound::Unbounded, Bound::Excluded(key)))
            .next_back()
    }

    /// Smallest key greater than or equal to `key`.
    pub(crate) fn seek(&self, key: &[u8]) -> Option<(&Bytes, &Entry)> {
        self.entries
            .range::<[u8], _>((Bound::Included(key), Bound::Unbounded))
            .next()
    }
}

/// Walks `path` from `root`, returning the addressed bucket.
pub(crate) fn resolve<'a>(root: &'a BucketNode, path: &[Bytes]) -> Option<&'a BucketNode> {
    let mut node = root;
    for name in path {
        node = node.child(name)?;
    }
    Some(node)
}

/// Walks `path` from `root`, unsharing every node on the way.
pub(crate) fn resolve_mut<'a>(
    root: &'a mut Arc<BucketNode>,
    path: &[Bytes],
) -> Option<&'a mut BucketNode> {
    let mut node = root;
    for name in path {
        node = match Arc::make_mut(node).entries.get_mut(name.as_ref()) {
            Some(Entry::Bucket(child)) => child,
            _ => return None,
        };
    }
    Some(Arc::make_mut(node))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(pairs: &[(&str, &str)]) -> BucketNode {
        let mut node = BucketNode::default();
        for (k, v) in pairs {
            node.entries.insert(
                Bytes::copy_from_slice(k.as_bytes()),
                Entry::Value(Bytes::copy_from_slice(v.as_bytes())),
            );
        }
        node
    }

    #[test]
    fn test_navigation() {
        let node = leaf(&[("a", "1"), ("c", "3"), ("e", "5")]);
        assert_eq!(node.first().unwrap().0.as_ref(), b"a");
        assert_eq!(node.last().unwrap().0.as_ref(), b"e");
        assert_eq!(node.after(b"a").unwrap().0.as_ref(), b"c");
        assert_eq!(node.after(b"b").unwrap().0.as_ref(), b"c");
        assert!(node.after(b"e").is_none());
        assert_eq!(node.before(b"c").unwrap().0.as_ref(), b"a");
        assert!(node.before(b"a").is_none());
        assert_eq!(node.seek(b"c").unwrap().0.as_ref(), b"c");
        assert_eq!(node.seek(b"d").unwrap().0.as_ref(), b"e");
        assert!(node.seek(b"f").is_none());
    }

    #[test]
    fn test_resolve_mut_copies_only_the_path() {
        let mut inner = BucketNode::default();
        inner
            .entries
            .insert(Bytes::from_static(b"x"), Entry::Bucket(Arc::new(leaf(&[("k", "v")]))));
        let mut root = BucketNode::default();
        root.entries.insert(Bytes::from_static(b"a"), Entry::Bucket(Arc::new(inner)));
        root.entries
            .insert(Bytes::from_static(b"b"), Entry::Bucket(Arc::new(leaf(&[("k", "v")]))));
        let committed = Arc::new(root);

        let mut working = Arc::clone(&committed);
        let path = [Bytes::from_static(b"a"), Bytes::from_static(b"x")];
        let node = resolve_mut(&mut working, &path).unwrap();
        node.entries
            .insert(Bytes::from_static(b"k"), Entry::Value(Bytes::from_static(b"changed")));

        // The committed tree is untouched and the sibling is still shared.
        let old = resolve(&committed, &path).unwrap();
        assert_eq!(old.get(b"k").unwrap().value().unwrap().as_ref(), b"v");
        assert!(Arc::ptr_eq(
            committed.child(b"b").unwrap(),
            working.child(b"b").unwrap()
        ));
        let new = resolve(&working, &path).unwrap();
        assert_eq!(new.get(b"k").unwrap().value().unwrap().as_ref(), b"changed");
    }

    #[test]
    fn test_resolve_rejects_value_in_path() {
        let mut root = Arc::new(leaf(&[("a", "1")]));
        assert!(resolve(&root, &[Bytes::from_static(b"a")]).is_none());
        assert!(resolve_mut(&mut root, &[Bytes::from_static(b"a")]).is_none());
    }
}
