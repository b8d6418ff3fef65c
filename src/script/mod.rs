//! The `bolt` Lua module.
//!
//! Native handles (databases, transactions, buckets, cursors and the value
//! types describing them) are exposed to Lua as tagged objects. Attribute
//! access on an object is resolved through the dispatch table of its type;
//! methods are called with dot syntax and return new objects, plain values
//! or `nil`.
//!
//! # Architecture
//!
//! - **marshal**: bytes ↔ Lua strings, absence ↔ `nil`
//! - **translate**: native and bridge failures → Lua errors
//! - **dispatch**: per-type attribute tables and the object wrapper
//! - **callback**: re-entry into Lua from iteration and commit hooks
//! - **facade**: the attribute tables of each handle type
//! - **LuaExecutor**: runs whole scripts against a database
//!
//! # Example
//!
//! ```rust,no_run
//! use luabolt::{script, Db};
//! use mlua::Lua;
//!
//! # fn main() -> mlua::Result<()> {
//! let lua = Lua::new();
//! script::open(&lua)?;
//! script::push_db(&lua, Db::open("./my.db", 0o600, None)?, "db")?;
//!
//! lua.load(r#"
//!     db.update(function(tx)
//!         local b = tx.create_bucket_if_not_exists("widgets")
//!         b.put("foo", "bar")
//!     end)
//! "#).exec()?;
//! # Ok(())
//! # }
//! ```

pub(crate) mod callback;
pub(crate) mod dispatch;
pub(crate) mod facade;
pub mod lua_executor;
pub(crate) mod marshal;
pub(crate) mod translate;

pub use lua_executor::LuaExecutor;

use crate::bolt::{Db, Tx};
use crate::config::{
    Options, DEFAULT_ALLOC_SIZE, DEFAULT_FILL_PERCENT, DEFAULT_MAX_BATCH_DELAY,
    DEFAULT_MAX_BATCH_SIZE, IGNORE_NO_SYNC, MAX_KEY_SIZE, MAX_VALUE_SIZE,
};
use crate::duration;
use dispatch::{wrap, Args};
use mlua::{Lua, MultiValue, Table, Value};
use translate::Condition;

/// Registers the `bolt` module so scripts can `require("bolt")`.
///
/// Returns the module table.
pub fn open(lua: &Lua) -> mlua::Result<Table> {
    callback::install(lua);

    let lib = lua.create_table()?;
    lib.set(
        "open",
        lua.create_function(|lua, args: MultiValue| bolt_open(lua, Args::new("open", args)))?,
    )?;
    lib.set(
        "const",
        lua.create_function(|lua, args: MultiValue| bolt_const(lua, Args::new("const", args)))?,
    )?;
    lib.set(
        "options",
        lua.create_function(|lua, args: MultiValue| {
            Args::new("options", args).at_most(0)?;
            wrap(lua, Options::default())
        })?,
    )?;

    let loaded: Table = lua.globals().get::<Table>("package")?.get("loaded")?;
    loaded.set("bolt", lib.clone())?;
    log::debug!("registered the bolt Lua module");
    Ok(lib)
}

/// Exposes a database opened by the host as the global `name`.
pub fn push_db(lua: &Lua, db: Db, name: &str) -> mlua::Result<()> {
    callback::install(lua);
    lua.globals().set(name, wrap(lua, db)?)
}

/// Exposes a transaction begun by the host as the global `name`.
pub fn push_tx(lua: &Lua, tx: Tx, name: &str) -> mlua::Result<()> {
    callback::install(lua);
    lua.globals().set(name, wrap(lua, tx)?)
}

fn bolt_open(lua: &Lua, args: Args) -> mlua::Result<Value> {
    let path = args.string(1)?;
    let mode = args.file_mode(2)?;
    let options = args.optional_object::<Options>(3)?;
    args.at_most(3)?;
    wrap(lua, Db::open(path, mode, options)?)
}

fn bolt_const(lua: &Lua, args: Args) -> mlua::Result<Value> {
    let name = args.string(1)?;
    args.at_most(1)?;
    Ok(match name.as_str() {
        "max_key_size" => Value::Integer(MAX_KEY_SIZE as i64),
        "max_value_size" => Value::Integer(MAX_VALUE_SIZE as i64),
        "default_max_batch_size" => Value::Integer(DEFAULT_MAX_BATCH_SIZE as i64),
        "default_max_batch_delay" => marshal::text(lua, &duration::format(DEFAULT_MAX_BATCH_DELAY))?,
        "default_alloc_size" => Value::Integer(DEFAULT_ALLOC_SIZE as i64),
        "default_fill_percent" => Value::Number(DEFAULT_FILL_PERCENT),
        "ignore_no_sync" => Value::Boolean(IGNORE_NO_SYNC),
        _ => return Err(Condition::UnknownConstant(name).into()),
    })
}
