//! Turning failures into Lua errors.
//!
//! Native operations return [`crate::Error`]; the bridge keeps them as
//! `Result` values until the outermost Lua-facing function returns, where
//! they become `mlua::Error` carrying the native message text.

use super::dispatch::Tag;
use thiserror::Error;

/// Failures detected by the bridge itself, before any native call.
#[derive(Debug, Error)]
pub(crate) enum Condition {
    /// Read of an undefined attribute, or assignment to a method.
    #[error("bolt: unknown {tag}.{name}")]
    NoSuchAttribute { tag: Tag, name: String },

    #[error("bad argument #{position} to '{method}' ({expected} expected, got {got})")]
    BadArgument {
        position: usize,
        method: &'static str,
        expected: String,
        got: &'static str,
    },

    #[error("wrong number of arguments to '{method}' (expected at most {max}, got {got})")]
    TooManyArguments {
        method: &'static str,
        max: usize,
        got: usize,
    },

    #[error("bolt: bad value for {tag}.{name} ({expected} expected, got {got})")]
    BadFieldValue {
        tag: Tag,
        name: &'static str,
        expected: String,
        got: &'static str,
    },

    #[error("bolt: unknown constant {0}")]
    UnknownConstant(String),
}

impl From<Condition> for mlua::Error {
    fn from(condition: Condition) -> Self {
        mlua::Error::external(condition)
    }
}

impl From<crate::Error> for mlua::Error {
    fn from(err: crate::Error) -> Self {
        log::debug!("raising native error in Lua: {}", err);
        mlua::Error::external(err)
    }
}
