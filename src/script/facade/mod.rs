//! Per-type attribute tables.

pub(crate) mod bucket;
pub(crate) mod cursor;
pub(crate) mod db;
pub(crate) mod tx;
pub(crate) mod values;

use mlua::{IntoLuaMulti, Lua, MultiValue};

/// No return values.
fn nothing() -> mlua::Result<MultiValue> {
    Ok(MultiValue::new())
}

/// Return values from anything Lua can take.
fn returns(lua: &Lua, values: impl IntoLuaMulti) -> mlua::Result<MultiValue> {
    values.into_lua_multi(lua)
}
