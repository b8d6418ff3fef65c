//! Page accounting for a committed tree.
//!
//! The tree is persisted as one image, but page ids, bucket roots, inline
//! buckets, splits and free pages are still reported as if every bucket were
//! a B+tree of fixed-size pages:
//!
//! - pages 0 and 1 hold the two meta slots;
//! - buckets follow in depth-first order, leaves before branches, each
//!   non-inline bucket's root being its topmost page;
//! - the freelist page comes last, and any ids up to the previous high-water
//!   mark are free.

use super::node::{BucketNode, Entry};
use super::stats::{BucketStats, PageInfo};
use crate::config::{
    DEFAULT_FILL_PERCENT, MAX_FILL_PERCENT, MAX_KEY_SIZE, MAX_VALUE_SIZE, MIN_FILL_PERCENT,
};
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};

/// Size of a page header.
pub(crate) const PAGE_HEADER_SIZE: usize = 16;
/// Size of a leaf element header.
pub(crate) const LEAF_ELEMENT_SIZE: usize = 16;
/// Size of a branch element header.
pub(crate) const BRANCH_ELEMENT_SIZE: usize = 16;
/// Size of the bucket header stored as a nested bucket's value.
pub(crate) const BUCKET_HEADER_SIZE: usize = 16;

const FREELIST_ID_SIZE: usize = 8;
const MIN_KEYS_PER_PAGE: usize = 2;

/// Fill percent overrides keyed by bucket path.
pub(crate) type FillPercents = HashMap<Vec<Bytes>, f64>;

/// Kind of an allocated page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PageKind {
    Meta,
    Freelist,
    Leaf,
    Branch,
}

impl PageKind {
    fn as_str(self) -> &'static str {
        match self {
            PageKind::Meta => "meta",
            PageKind::Freelist => "freelist",
            PageKind::Leaf => "leaf",
            PageKind::Branch => "branch",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PageRecord {
    kind: PageKind,
    count: usize,
    overflow: u64,
}

/// One logical page: element count, bytes used and the length of its first key.
#[derive(Debug, Clone, Copy)]
struct NodeShape {
    count: usize,
    size: usize,
    first_key: usize,
}

impl NodeShape {
    fn pages(&self, page_size: usize) -> u64 {
        pages_for(self.size, page_size)
    }
}

/// Counters gathered while planning a commit.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct PlanSummary {
    /// Pages assigned, excluding the meta slots.
    pub(crate) allocated: u64,
    /// Buckets given their own pages.
    pub(crate) spilled: i64,
    /// Leaves beyond the first, summed over spilled buckets.
    pub(crate) splits: i64,
}

/// Page map of one committed tree.
#[derive(Debug, Clone, Default)]
pub(crate) struct Layout {
    page_size: usize,
    high_water: u64,
    free: Vec<u64>,
    pages: BTreeMap<u64, PageRecord>,
    roots: HashMap<Vec<Bytes>, u64>,
    summary: PlanSummary,
}

impl Layout {
    /// Assigns pages to every bucket of `root`.
    ///
    /// `previous_high` is the high-water mark of the layout being replaced;
    /// the file never shrinks, so ids below it that are no longer used become
    /// free pages.
    pub(crate) fn plan(
        root: &BucketNode,
        page_size: usize,
        previous_high: u64,
        fill: &FillPercents,
    ) -> Layout {
        let mut layout = Layout { page_size, ..Layout::default() };
        let meta = PageRecord { kind: PageKind::Meta, count: 0, overflow: 0 };
        layout.pages.insert(0, meta);
        layout.pages.insert(1, meta);

        let mut next = 2;
        let mut path = Vec::new();
        layout.assign(root, &mut path, fill, &mut next);

        // The freelist's own size depends on how many ids it has to hold.
        let freelist_id = next;
        let mut freelist_pages = 1;
        let (end, high) = loop {
            let end = freelist_id + freelist_pages;
            let high = previous_high.max(end);
            let bytes = PAGE_HEADER_SIZE + FREELIST_ID_SIZE * (high - end) as usize;
            let needed = pages_for(bytes, page_size);
            if needed <= freelist_pages {
                break (end, high);
            }
            freelist_pages = needed;
        };
        layout.free = (end..high).collect();
        layout.pages.insert(
            freelist_id,
            PageRecord {
                kind: PageKind::Freelist,
                count: layout.free.len(),
                overflow: freelist_pages - 1,
            },
        );
        layout.high_water = high;
        layout.summary.allocated = end - 2;
        layout
    }

    fn assign(
        &mut self,
        node: &BucketNode,
        path: &mut Vec<Bytes>,
        fill: &FillPercents,
        next: &mut u64,
    ) {
        if !path.is_empty() && inline_size(node, self.page_size).is_some() {
            self.roots.insert(path.clone(), 0);
            return;
        }

        let levels = shape(node, self.page_size, fill_percent(fill, path));
        self.summary.spilled += 1;
        self.summary.splits += levels[0].len() as i64 - 1;

        let mut root_id = *next;
        for (depth, level) in levels.iter().enumerate() {
            let kind = if depth == 0 { PageKind::Leaf } else { PageKind::Branch };
            for page in level {
                let pages = page.pages(self.page_size);
                root_id = *next;
                self.pages.insert(
                    root_id,
                    PageRecord { kind, count: page.count, overflow: pages - 1 },
                );
                *next += pages;
            }
        }
        self.roots.insert(path.clone(), root_id);

        for (name, child) in node.children() {
            path.push(name.clone());
            self.assign(child, path, fill, next);
            path.pop();
        }
    }

    /// Page size the layout was planned with.
    pub(crate) fn page_size(&self) -> usize {
        self.page_size
    }

    /// One past the highest page id in use or free.
    pub(crate) fn high_water(&self) -> u64 {
        self.high_water
    }

    /// Free page ids, ascending.
    pub(crate) fn free_pages(&self) -> &[u64] {
        &self.free
    }

    /// Bytes the freelist occupies.
    pub(crate) fn freelist_inuse(&self) -> usize {
        PAGE_HEADER_SIZE + FREELIST_ID_SIZE * self.free.len()
    }

    pub(crate) fn summary(&self) -> PlanSummary {
        self.summary
    }

    /// Root page of the bucket at `path`; 0 for inline or unknown buckets.
    pub(crate) fn root_of(&self, path: &[Bytes]) -> u64 {
        self.roots.get(path).copied().unwrap_or(0)
    }

    /// Describes page `id`, or `None` past the high-water mark and for
    /// continuation pages of an overflow run.
    pub(crate) fn page(&self, id: u64) -> Option<PageInfo> {
        if id >= self.high_water {
            return None;
        }
        if let Some(record) = self.pages.get(&id) {
            return Some(PageInfo {
                id: id as i64,
                page_type: record.kind.as_str().to_string(),
                count: record.count as i64,
                overflow_count: record.overflow as i64,
            });
        }
        self.free.binary_search(&id).ok().map(|_| PageInfo {
            id: id as i64,
            page_type: "free".to_string(),
            count: 0,
            overflow_count: 0,
        })
    }

    /// Every id below the high-water mark must be used exactly once or free.
    pub(crate) fn verify(&self) -> std::result::Result<(), String> {
        let high = self.high_water;
        let mut seen = vec![false; high as usize];
        let mut claim = |id: u64| -> std::result::Result<(), String> {
            if id >= high {
                return Err(format!("page {}: out of bounds: {}", id, high));
            }
            if std::mem::replace(&mut seen[id as usize], true) {
                return Err(format!("page {}: multiple references", id));
            }
            Ok(())
        };

        for (&id, record) in &self.pages {
            for page in id..=id + record.overflow {
                claim(page)?;
            }
        }
        for &id in &self.free {
            claim(id)?;
        }
        match seen.iter().position(|used| !used) {
            Some(id) => Err(format!("page {}: unreachable unfreed", id)),
            None => Ok(()),
        }
    }
}

/// Checks key and value limits throughout the tree.
pub(crate) fn verify_tree(node: &BucketNode, path: &mut Vec<Bytes>) -> std::result::Result<(), String> {
    for (key, entry) in &node.entries {
        if key.is_empty() {
            return Err(format!("bucket {:?}: empty key", path));
        }
        if key.len() > MAX_KEY_SIZE {
            return Err(format!("bucket {:?}: key of {} bytes too large", path, key.len()));
        }
        match entry {
            Entry::Value(value) if value.len() > MAX_VALUE_SIZE => {
                return Err(format!("bucket {:?}: value of {} bytes too large", path, value.len()));
            }
            Entry::Value(_) => {}
            Entry::Bucket(child) => {
                path.push(key.clone());
                verify_tree(child, path)?;
                path.pop();
            }
        }
    }
    Ok(())
}

/// Page statistics of the bucket at `path` and everything nested below it.
pub(crate) fn bucket_stats(
    node: &BucketNode,
    path: &mut Vec<Bytes>,
    page_size: usize,
    fill: &FillPercents,
) -> BucketStats {
    let mut stats = BucketStats {
        bucket_n: 1,
        key_n: node.entries.len() as i64,
        ..BucketStats::default()
    };

    match inline_size(node, page_size).filter(|_| !path.is_empty()) {
        Some(size) => {
            stats.inline_bucket_n = 1;
            stats.inline_bucket_inuse = size as i64;
            stats.depth = 1;
        }
        None => {
            let levels = shape(node, page_size, fill_percent(fill, path));
            for (depth, level) in levels.iter().enumerate() {
                for page in level {
                    let overflow = page.pages(page_size) as i64 - 1;
                    if depth == 0 {
                        stats.leaf_page_n += 1;
                        stats.leaf_overflow_n += overflow;
                        stats.leaf_inuse += page.size as i64;
                    } else {
                        stats.branch_page_n += 1;
                        stats.branch_overflow_n += overflow;
                        stats.branch_inuse += page.size as i64;
                    }
                }
            }
            stats.depth = levels.len() as i64;
            stats.leaf_alloc = (stats.leaf_page_n + stats.leaf_overflow_n) * page_size as i64;
            stats.branch_alloc =
                (stats.branch_page_n + stats.branch_overflow_n) * page_size as i64;
        }
    }

    let mut nested = BucketStats::default();
    for (name, child) in node.children() {
        path.push(name.clone());
        nested.add(&bucket_stats(child, path, page_size, fill));
        path.pop();
    }
    stats.depth += nested.depth;
    stats.add(&nested);
    stats
}

/// Fill percent in effect for the bucket at `path`.
pub(crate) fn fill_percent(fill: &FillPercents, path: &[Bytes]) -> f64 {
    fill.get(path).copied().unwrap_or(DEFAULT_FILL_PERCENT)
}

/// Bytes the bucket takes when stored inside its parent's leaf, or `None`
/// when it needs pages of its own.
fn inline_size(node: &BucketNode, page_size: usize) -> Option<usize> {
    if node.has_children() {
        return None;
    }
    let size = PAGE_HEADER_SIZE
        + node
            .entries
            .iter()
            .map(|(k, e)| LEAF_ELEMENT_SIZE + k.len() + e.value().map_or(0, |v| v.len()))
            .sum::<usize>();
    (size <= page_size / 4).then_some(size)
}

fn element_size(key: &Bytes, entry: &Entry, page_size: usize) -> usize {
    LEAF_ELEMENT_SIZE
        + key.len()
        + match entry {
            Entry::Value(v) => v.len(),
            Entry::Bucket(child) => BUCKET_HEADER_SIZE + inline_size(child, page_size).unwrap_or(0),
        }
}

/// Leaf level first, then branch levels up to a single root page.
fn shape(node: &BucketNode, page_size: usize, fill_percent: f64) -> Vec<Vec<NodeShape>> {
    let threshold = (page_size as f64 * fill_percent.clamp(MIN_FILL_PERCENT, MAX_FILL_PERCENT))
        as usize;

    let leaf_elements: Vec<(usize, usize)> = node
        .entries
        .iter()
        .map(|(k, e)| (element_size(k, e, page_size), k.len()))
        .collect();
    let mut levels = vec![split(&leaf_elements, page_size, threshold)];

    while let Some(level) = levels.last().filter(|l| l.len() > 1) {
        let branch_elements: Vec<(usize, usize)> = level
            .iter()
            .map(|n| (BRANCH_ELEMENT_SIZE + n.first_key, n.first_key))
            .collect();
        levels.push(split(&branch_elements, page_size, threshold));
    }
    levels
}

/// Splits a node's elements into pages.
///
/// A node is left whole while it fits a page; otherwise pieces are cut at
/// the fill threshold, keeping at least two elements on each side.
fn split(elements: &[(usize, usize)], page_size: usize, threshold: usize) -> Vec<NodeShape> {
    let mut pages = Vec::new();
    let mut rest = elements;
    loop {
        let total = PAGE_HEADER_SIZE + rest.iter().map(|(size, _)| size).sum::<usize>();
        if rest.len() <= MIN_KEYS_PER_PAGE * 2 || total < page_size {
            pages.push(node_shape(rest));
            return pages;
        }

        let mut used = PAGE_HEADER_SIZE;
        let mut index = 0;
        for (i, (size, _)) in rest[..rest.len() - MIN_KEYS_PER_PAGE].iter().enumerate() {
            index = i;
            if i >= MIN_KEYS_PER_PAGE && used + size > threshold {
                break;
            }
            used += size;
        }
        let (head, tail) = rest.split_at(index);
        pages.push(node_shape(head));
        rest = tail;
    }
}

fn node_shape(elements: &[(usize, usize)]) -> NodeShape {
    NodeShape {
        count: elements.len(),
        size: PAGE_HEADER_SIZE + elements.iter().map(|(size, _)| size).sum::<usize>(),
        first_key: elements.first().map_or(0, |(_, key)| *key),
    }
}

fn pages_for(bytes: usize, page_size: usize) -> u64 {
    (bytes.div_ceil(page_size)).max(1) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const PS: usize = 4096;

    fn bucket_with(n: usize, value_len: usize) -> BucketNode {
        let mut node = BucketNode::default();
        for i in 0..n {
            node.entries.insert(
                Bytes::from(format!("key{:05}", i)),
                Entry::Value(Bytes::from(vec![b'v'; value_len])),
            );
        }
        node
    }

    fn root_with(children: Vec<(&str, BucketNode)>) -> BucketNode {
        let mut root = BucketNode::default();
        for (name, child) in children {
            root.entries
                .insert(Bytes::copy_from_slice(name.as_bytes()), Entry::Bucket(Arc::new(child)));
        }
        root
    }

    #[test]
    fn test_empty_tree() {
        let layout = Layout::plan(&BucketNode::default(), PS, 0, &FillPercents::new());
        assert_eq!(layout.high_water(), 4);
        assert_eq!(layout.page(0).unwrap().page_type, "meta");
        assert_eq!(layout.page(1).unwrap().page_type, "meta");
        assert_eq!(layout.page(2).unwrap().page_type, "leaf");
        assert_eq!(layout.page(3).unwrap().page_type, "freelist");
        assert!(layout.page(4).is_none());
        assert_eq!(layout.root_of(&[]), 2);
        layout.verify().unwrap();
    }

    #[test]
    fn test_small_bucket_is_inline() {
        let root = root_with(vec![("small", bucket_with(3, 8))]);
        let layout = Layout::plan(&root, PS, 0, &FillPercents::new());
        assert_eq!(layout.root_of(&[Bytes::from_static(b"small")]), 0);

        let stats = bucket_stats(
            root.child(b"small").unwrap(),
            &mut vec![Bytes::from_static(b"small")],
            PS,
            &FillPercents::new(),
        );
        assert_eq!(stats.inline_bucket_n, 1);
        assert_eq!(stats.leaf_page_n, 0);
        assert_eq!(stats.key_n, 3);
        assert_eq!(stats.depth, 1);
    }

    #[test]
    fn test_large_bucket_splits_and_gets_branch() {
        let root = root_with(vec![("big", bucket_with(500, 100))]);
        let layout = Layout::plan(&root, PS, 0, &FillPercents::new());
        let big = layout.root_of(&[Bytes::from_static(b"big")]);
        assert_ne!(big, 0);
        assert_eq!(layout.page(big).unwrap().page_type, "branch");
        assert!(layout.summary().splits > 0);
        layout.verify().unwrap();

        let stats = bucket_stats(
            root.child(b"big").unwrap(),
            &mut vec![Bytes::from_static(b"big")],
            PS,
            &FillPercents::new(),
        );
        assert!(stats.leaf_page_n > 1);
        assert_eq!(stats.branch_page_n, 1);
        assert_eq!(stats.depth, 2);
        assert_eq!(stats.key_n, 500);
        assert_eq!(stats.leaf_alloc, (stats.leaf_page_n + stats.leaf_overflow_n) * PS as i64);
    }

    #[test]
    fn test_fill_percent_changes_leaf_count() {
        let path = vec![Bytes::from_static(b"big")];
        let root = root_with(vec![("big", bucket_with(400, 100))]);
        let node = root.child(b"big").unwrap();

        let loose = bucket_stats(node, &mut path.clone(), PS, &FillPercents::new());
        let mut fill = FillPercents::new();
        fill.insert(path.clone(), 1.0);
        let dense = bucket_stats(node, &mut path.clone(), PS, &fill);
        assert!(dense.leaf_page_n < loose.leaf_page_n);
    }

    #[test]
    fn test_large_value_overflows() {
        let root = root_with(vec![("blob", bucket_with(1, 3 * PS))]);
        let layout = Layout::plan(&root, PS, 0, &FillPercents::new());
        let id = layout.root_of(&[Bytes::from_static(b"blob")]);
        let info = layout.page(id).unwrap();
        assert_eq!(info.page_type, "leaf");
        assert_eq!(info.overflow_count, 3);
        // Continuation pages are not described on their own.
        assert!(layout.page(id + 1).is_none());
        layout.verify().unwrap();
    }

    #[test]
    fn test_shrinking_tree_frees_pages() {
        let big = root_with(vec![("big", bucket_with(500, 100))]);
        let first = Layout::plan(&big, PS, 0, &FillPercents::new());
        let second =
            Layout::plan(&BucketNode::default(), PS, first.high_water(), &FillPercents::new());
        assert_eq!(second.high_water(), first.high_water());
        assert!(!second.free_pages().is_empty());
        let free = second.free_pages()[0];
        assert_eq!(second.page(free).unwrap().page_type, "free");
        second.verify().unwrap();
    }

    #[test]
    fn test_verify_tree_rejects_empty_key() {
        let mut node = BucketNode::default();
        node.entries.insert(Bytes::new(), Entry::Value(Bytes::from_static(b"v")));
        assert!(verify_tree(&node, &mut Vec::new()).is_err());
        assert!(verify_tree(&bucket_with(3, 3), &mut Vec::new()).is_ok());
    }
}
