//! Statistics and descriptive value types returned by the store.

use std::time::Duration;

/// Database-wide statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Free pages in the freelist.
    pub free_page_n: i64,
    /// Pages freed by a transaction but not yet reusable.
    pub pending_page_n: i64,
    /// Bytes allocated in free pages.
    pub free_alloc: i64,
    /// Bytes used by the freelist itself.
    pub freelist_inuse: i64,
    /// Read transactions started.
    pub tx_n: i64,
    /// Read transactions currently open.
    pub open_tx_n: i64,
    /// Accumulated transaction statistics.
    pub tx_stats: TxStats,
}

impl Stats {
    /// Difference between two snapshots, useful to measure an interval.
    ///
    /// Freelist figures are gauges and are taken from `self` unchanged.
    pub fn sub(&self, other: &Stats) -> Stats {
        Stats {
            free_page_n: self.free_page_n,
            pending_page_n: self.pending_page_n,
            free_alloc: self.free_alloc,
            freelist_inuse: self.freelist_inuse,
            tx_n: self.tx_n - other.tx_n,
            open_tx_n: self.open_tx_n,
            tx_stats: self.tx_stats.sub(&other.tx_stats),
        }
    }
}

/// Work performed by transactions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxStats {
    /// Pages allocated.
    pub page_count: i64,
    /// Bytes allocated for pages.
    pub page_alloc: i64,
    /// Cursors created.
    pub cursor_count: i64,
    /// Buckets copied for modification.
    pub node_count: i64,
    /// Bucket dereferences while resolving handles.
    pub node_deref: i64,
    /// Buckets rebalanced after deletes.
    pub rebalance: i64,
    /// Time spent rebalancing.
    pub rebalance_time: Duration,
    /// Extra leaf pages created by splits.
    pub split: i64,
    /// Buckets spilled to pages.
    pub spill: i64,
    /// Time spent spilling.
    pub spill_time: Duration,
    /// Pages written.
    pub write: i64,
    /// Time spent writing.
    pub write_time: Duration,
}

impl TxStats {
    /// Accumulates `other` into `self`.
    pub fn add(&mut self, other: &TxStats) {
        self.page_count += other.page_count;
        self.page_alloc += other.page_alloc;
        self.cursor_count += other.cursor_count;
        self.node_count += other.node_count;
        self.node_deref += other.node_deref;
        self.rebalance += other.rebalance;
        self.rebalance_time += other.rebalance_time;
        self.split += other.split;
        self.spill += other.spill;
        self.spill_time += other.spill_time;
        self.write += other.write;
        self.write_time += other.write_time;
    }

    /// Difference between two snapshots. Durations saturate at zero.
    pub fn sub(&self, other: &TxStats) -> TxStats {
        TxStats {
            page_count: self.page_count - other.page_count,
            page_alloc: self.page_alloc - other.page_alloc,
            cursor_count: self.cursor_count - other.cursor_count,
            node_count: self.node_count - other.node_count,
            node_deref: self.node_deref - other.node_deref,
            rebalance: self.rebalance - other.rebalance,
            rebalance_time: self.rebalance_time.saturating_sub(other.rebalance_time),
            split: self.split - other.split,
            spill: self.spill - other.spill,
            spill_time: self.spill_time.saturating_sub(other.spill_time),
            write: self.write - other.write,
            write_time: self.write_time.saturating_sub(other.write_time),
        }
    }
}

/// Page usage of a bucket and everything nested below it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BucketStats {
    /// Logical branch pages.
    pub branch_page_n: i64,
    /// Physical branch overflow pages.
    pub branch_overflow_n: i64,
    /// Logical leaf pages.
    pub leaf_page_n: i64,
    /// Physical leaf overflow pages.
    pub leaf_overflow_n: i64,
    /// Keys, including nested bucket names.
    pub key_n: i64,
    /// Levels in the deepest B+tree path.
    pub depth: i64,
    /// Bytes allocated for branch pages.
    pub branch_alloc: i64,
    /// Bytes used in branch pages.
    pub branch_inuse: i64,
    /// Bytes allocated for leaf pages.
    pub leaf_alloc: i64,
    /// Bytes used in leaf pages.
    pub leaf_inuse: i64,
    /// Buckets, including this one.
    pub bucket_n: i64,
    /// Buckets stored inline in their parent's leaf.
    pub inline_bucket_n: i64,
    /// Bytes used by inline buckets.
    pub inline_bucket_inuse: i64,
}

impl BucketStats {
    /// Accumulates `other` into `self`. Depth takes the maximum.
    pub fn add(&mut self, other: &BucketStats) {
        self.branch_page_n += other.branch_page_n;
        self.branch_overflow_n += other.branch_overflow_n;
        self.leaf_page_n += other.leaf_page_n;
        self.leaf_overflow_n += other.leaf_overflow_n;
        self.key_n += other.key_n;
        self.depth = self.depth.max(other.depth);
        self.branch_alloc += other.branch_alloc;
        self.branch_inuse += other.branch_inuse;
        self.leaf_alloc += other.leaf_alloc;
        self.leaf_inuse += other.leaf_inuse;
        self.bucket_n += other.bucket_n;
        self.inline_bucket_n += other.inline_bucket_n;
        self.inline_bucket_inuse += other.inline_bucket_inuse;
    }
}

/// Location of the committed data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Info {
    /// File offset of the committed data image.
    pub data: u64,
    /// Page size of the database file.
    pub page_size: i64,
}

/// Description of a single page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageInfo {
    /// Page id.
    pub id: i64,
    /// One of `meta`, `freelist`, `leaf`, `branch`, `free`.
    pub page_type: String,
    /// Elements stored on the page.
    pub count: i64,
    /// Overflow pages following this one.
    pub overflow_count: i64,
}
