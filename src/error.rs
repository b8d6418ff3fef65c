//! Error types for the luabolt storage layer.
//!
//! Messages mirror bbolt's wording so that scripts see the same text a Go
//! program would.

use std::fmt;
use std::io;

/// The result type used throughout luabolt.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A named bucket does not exist.
    NotFound,
    /// A caller supplied an argument the operation cannot accept.
    InvalidArgument,
    /// The transaction or database has already been closed.
    TransactionClosed,
    /// I/O, corruption or consistency failure inside the store.
    Internal,
    /// A Lua script run by [`crate::script::LuaExecutor`] failed.
    Script,
}

/// The error type for luabolt operations.
#[derive(Debug)]
pub enum Error {
    /// An I/O error occurred.
    Io(io::Error),

    /// The database handle has been closed.
    DatabaseNotOpen,

    /// A write was attempted on a database opened read-only.
    DatabaseReadOnly,

    /// The file is not a luabolt database.
    Invalid,

    /// The file was written by an incompatible format version.
    VersionMismatch,

    /// A meta page or data image failed its checksum.
    Checksum,

    /// The file lock could not be obtained before `Options::timeout` elapsed.
    Timeout,

    /// The transaction has been committed or rolled back.
    TxClosed,

    /// A write was attempted through a read-only transaction.
    TxNotWritable,

    /// The calling thread already owns the writable transaction.
    WriterBusy,

    /// `commit` was called on a transaction owned by `update`/`batch`.
    ManagedCommit,

    /// `rollback` was called on a transaction owned by `update`/`view`/`batch`.
    ManagedRollback,

    /// The requested bucket does not exist.
    BucketNotFound,

    /// A bucket with that name already exists.
    BucketExists,

    /// A bucket name was empty.
    BucketNameRequired,

    /// A key was empty.
    KeyRequired,

    /// A key exceeded [`crate::config::MAX_KEY_SIZE`].
    KeyTooLarge,

    /// A value exceeded [`crate::config::MAX_VALUE_SIZE`].
    ValueTooLarge,

    /// A value operation hit a bucket, or a bucket operation hit a value.
    IncompatibleValue,

    /// A cursor operation needs a current position.
    CursorNotPositioned,

    /// A duration string could not be parsed.
    InvalidDuration(String),

    /// An invalid argument was provided.
    InvalidArgument(String),

    /// The store failed its consistency check.
    Inconsistent(String),

    /// The commit succeeded but an `on_commit` hook failed.
    CommitHook(String),

    /// A serialization or deserialization error occurred.
    Serialization(String),

    /// A Lua script failed to run to completion.
    Script(String),
}

impl Error {
    /// Creates a new consistency error.
    pub fn inconsistent(msg: impl Into<String>) -> Self {
        Error::Inconsistent(msg.into())
    }

    /// Creates a new invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Creates a new duration parse error.
    pub fn invalid_duration(text: impl Into<String>) -> Self {
        Error::InvalidDuration(text.into())
    }

    /// Creates a new script error.
    pub fn script(msg: impl Into<String>) -> Self {
        Error::Script(msg.into())
    }

    /// Classifies the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::BucketNotFound => ErrorKind::NotFound,
            Error::DatabaseReadOnly
            | Error::TxNotWritable
            | Error::WriterBusy
            | Error::ManagedCommit
            | Error::ManagedRollback
            | Error::BucketExists
            | Error::BucketNameRequired
            | Error::KeyRequired
            | Error::KeyTooLarge
            | Error::ValueTooLarge
            | Error::IncompatibleValue
            | Error::CursorNotPositioned
            | Error::InvalidDuration(_)
            | Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::TxClosed | Error::DatabaseNotOpen => ErrorKind::TransactionClosed,
            Error::Script(_) => ErrorKind::Script,
            Error::Io(_)
            | Error::Invalid
            | Error::VersionMismatch
            | Error::Checksum
            | Error::Timeout
            | Error::Inconsistent(_)
            | Error::CommitHook(_)
            | Error::Serialization(_) => ErrorKind::Internal,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::DatabaseNotOpen => f.write_str("database not open"),
            Error::DatabaseReadOnly => f.write_str("database is in read-only mode"),
            Error::Invalid => f.write_str("invalid database"),
            Error::VersionMismatch => f.write_str("version mismatch"),
            Error::Checksum => f.write_str("checksum error"),
            Error::Timeout => f.write_str("timeout"),
            Error::TxClosed => f.write_str("tx closed"),
            Error::TxNotWritable => f.write_str("tx not writable"),
            Error::WriterBusy => f.write_str("writable tx already open on this thread"),
            Error::ManagedCommit => f.write_str("managed tx commit not allowed"),
            Error::ManagedRollback => f.write_str("managed tx rollback not allowed"),
            Error::BucketNotFound => f.write_str("bucket not found"),
            Error::BucketExists => f.write_str("bucket already exists"),
            Error::BucketNameRequired => f.write_str("bucket name required"),
            Error::KeyRequired => f.write_str("key required"),
            Error::KeyTooLarge => f.write_str("key too large"),
            Error::ValueTooLarge => f.write_str("value too large"),
            Error::IncompatibleValue => f.write_str("incompatible value"),
            Error::CursorNotPositioned => f.write_str("cursor not positioned"),
            Error::InvalidDuration(text) => write!(f, "invalid duration {:?}", text),
            Error::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            Error::Inconsistent(msg) => write!(f, "consistency check failed: {}", msg),
            Error::CommitHook(msg) => write!(f, "on_commit hook failed after commit: {}", msg),
            Error::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            Error::Script(msg) => write!(f, "Script error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
