//! Conversions between native bytes and Lua values.
//!
//! Bytes cross the boundary unchanged in both directions. An absent value
//! becomes `nil`; an empty value becomes the empty string. Only Lua strings
//! convert to bytes: numbers are not coerced.

use mlua::{Lua, Value};

/// Pushes optional bytes into Lua: `None` → `nil`, `Some(b)` → a string
/// holding exactly `b`.
pub(crate) fn to_script(lua: &Lua, bytes: Option<&[u8]>) -> mlua::Result<Value> {
    match bytes {
        Some(b) => Ok(Value::String(lua.create_string(b)?)),
        None => Ok(Value::Nil),
    }
}

/// Takes bytes out of a Lua value. Anything but a string is rejected with
/// the Lua type name of what was found.
pub(crate) fn to_native(value: &Value) -> Result<Vec<u8>, &'static str> {
    match value {
        Value::String(s) => Ok(s.as_bytes().to_vec()),
        other => Err(type_name(other)),
    }
}

/// The name Lua's `type()` reports for `value`.
pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Nil => "nil",
        Value::Boolean(_) => "boolean",
        Value::LightUserData(_) => "userdata",
        Value::Integer(_) | Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Table(_) => "table",
        Value::Function(_) => "function",
        Value::Thread(_) => "thread",
        _ => "userdata",
    }
}

/// A Lua string for text produced natively.
pub(crate) fn text(lua: &Lua, s: &str) -> mlua::Result<Value> {
    Ok(Value::String(lua.create_string(s)?))
}
