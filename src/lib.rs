//! # luabolt - Lua bindings for a bucketed key-value store
//!
//! luabolt exposes a transactional, hierarchical key-value store with
//! bbolt semantics to embedded Lua 5.4 scripts. Scripts open databases, run
//! read and read-write transactions, navigate nested buckets and walk keys
//! with cursors; the store's rules (one writer at a time, snapshot
//! isolation for readers, absent values distinct from empty ones) hold on
//! both sides of the boundary.
//!
//! ## Architecture
//!
//! - **bolt**: the native store: databases, transactions, buckets, cursors
//!   and the statistics describing them
//! - **script**: the `bolt` Lua module that wraps native handles as Lua
//!   objects and calls back into Lua from iteration and commit hooks
//! - **config**: open options, runtime settings and library constants
//! - **duration**: duration text such as `"10ms"` used by both layers
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use luabolt::{script, Db};
//! use mlua::Lua;
//!
//! # fn main() -> mlua::Result<()> {
//! let db = Db::open("./my.db", 0o600, None)?;
//!
//! let lua = Lua::new();
//! script::open(&lua)?;
//! script::push_db(&lua, db.clone(), "db")?;
//!
//! lua.load(r#"
//!     db.update(function(tx)
//!         local b = tx.create_bucket_if_not_exists("widgets")
//!         b.put("foo", "bar")
//!     end)
//! "#).exec()?;
//!
//! db.view(|tx| {
//!     let widgets = tx.bucket(b"widgets")?.expect("created by the script");
//!     assert_eq!(widgets.get(b"foo")?.as_deref(), Some(&b"bar"[..]));
//!     Ok::<(), luabolt::Error>(())
//! })?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// Module declarations
pub mod bolt;
pub mod config;
pub mod duration;
pub mod error;
pub mod script;

// Re-exports
pub use bolt::{Bucket, BucketStats, Cursor, Db, HookResult, Info, Item, PageInfo, Stats, Tx, TxStats};
pub use config::{Options, Settings};
pub use error::{Error, ErrorKind, Result};
