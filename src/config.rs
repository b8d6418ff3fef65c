//! Configuration options and library constants.

use crate::{Error, Result};
use std::time::Duration;

/// Largest key accepted by `Bucket::put`.
pub const MAX_KEY_SIZE: usize = 32768;

/// Largest value accepted by `Bucket::put`.
pub const MAX_VALUE_SIZE: usize = (1 << 31) - 2;

/// Default upper bound on calls coalesced into one batch.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 1000;

/// Default wait before a partial batch is started.
pub const DEFAULT_MAX_BATCH_DELAY: Duration = Duration::from_millis(10);

/// Default growth step of the data file.
pub const DEFAULT_ALLOC_SIZE: usize = 16 * 1024 * 1024;

/// Default leaf fill ratio used when splitting pages.
pub const DEFAULT_FILL_PERCENT: f64 = 0.5;

/// Lower clamp applied to a bucket's fill percent.
pub const MIN_FILL_PERCENT: f64 = 0.1;

/// Upper clamp applied to a bucket's fill percent.
pub const MAX_FILL_PERCENT: f64 = 1.0;

/// Page size used for new database files.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Whether `no_sync` is ignored on this platform.
///
/// OpenBSD has no unified buffer cache, so skipping fsync there is unsafe.
pub const IGNORE_NO_SYNC: bool = cfg!(target_os = "openbsd");

/// Options for opening a database.
#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    /// How long to wait for the file lock.
    /// Zero waits indefinitely.
    /// Default: 0
    pub timeout: Duration,

    /// Skip fsync after the data file grows.
    /// Default: false
    pub no_grow_sync: bool,

    /// Open the file with a shared lock and refuse writable transactions.
    /// Default: false
    pub read_only: bool,

    /// Flags passed through to the memory map. Stored, not interpreted.
    /// Default: 0
    pub mmap_flags: i64,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            timeout: Duration::ZERO,
            no_grow_sync: false,
            read_only: false,
            mmap_flags: 0,
        }
    }
}

impl Options {
    /// Creates a new Options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the file lock timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets whether growth of the data file is followed by fsync.
    pub fn no_grow_sync(mut self, value: bool) -> Self {
        self.no_grow_sync = value;
        self
    }

    /// Opens the database read-only.
    pub fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    /// Sets the mmap flags.
    pub fn mmap_flags(mut self, flags: i64) -> Self {
        self.mmap_flags = flags;
        self
    }

    /// Validates the options and returns an error if any are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.mmap_flags < 0 {
            return Err(Error::invalid_argument("mmap_flags must be >= 0"));
        }
        Ok(())
    }
}

/// Runtime knobs of an open database, adjustable through the DB handle.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Run a consistency check after every commit.
    pub strict_mode: bool,
    /// Skip fsync after commits.
    pub no_sync: bool,
    /// Skip fsync after the file grows.
    pub no_grow_sync: bool,
    /// Flags passed through to the memory map.
    pub mmap_flags: i64,
    /// Upper bound on calls coalesced into one batch.
    pub max_batch_size: usize,
    /// Wait before a partial batch is started.
    pub max_batch_delay: Duration,
    /// Growth step of the data file in bytes.
    pub alloc_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            strict_mode: false,
            no_sync: false,
            no_grow_sync: false,
            mmap_flags: 0,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            max_batch_delay: DEFAULT_MAX_BATCH_DELAY,
            alloc_size: DEFAULT_ALLOC_SIZE,
        }
    }
}

impl Settings {
    /// Derives the initial settings from the options a database was opened with.
    pub fn from_options(options: &Options) -> Self {
        Self {
            no_grow_sync: options.no_grow_sync,
            mmap_flags: options.mmap_flags,
            ..Self::default()
        }
    }

    /// Whether commits should skip fsync on this platform.
    pub fn skip_sync(&self) -> bool {
        self.no_sync && !IGNORE_NO_SYNC
    }
}
