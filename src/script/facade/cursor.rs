use super::{nothing, returns};
use crate::bolt::{Cursor, Item};
use crate::script::dispatch::{wrap, DispatchTable, Native, Registry, Tag};
use crate::script::marshal::to_script;
use mlua::{Lua, MultiValue};

impl Native for Cursor {
    const TAG: Tag = Tag::Cursor;

    fn table(registry: &Registry) -> &DispatchTable<Self> {
        &registry.cursor
    }
}

/// `(key, value)`, `(name, nil)` for a nested bucket, `(nil, nil)` past
/// either end.
fn pair(lua: &Lua, item: Option<Item>) -> mlua::Result<MultiValue> {
    match item {
        Some((key, value)) => returns(
            lua,
            (to_script(lua, Some(key.as_ref()))?, to_script(lua, value.as_deref())?),
        ),
        None => returns(lua, (mlua::Value::Nil, mlua::Value::Nil)),
    }
}

pub(crate) fn table() -> DispatchTable<Cursor> {
    DispatchTable::<Cursor>::new()
        .method("bucket", |lua, c, args| {
            args.at_most(0)?;
            returns(lua, wrap(lua, c.handle()?.bucket())?)
        })
        .method("delete", |_, c, args| {
            args.at_most(0)?;
            c.handle()?.delete()?;
            nothing()
        })
        .method("first", |lua, c, args| {
            args.at_most(0)?;
            pair(lua, c.handle()?.first()?)
        })
        .method("last", |lua, c, args| {
            args.at_most(0)?;
            pair(lua, c.handle()?.last()?)
        })
        .method("next", |lua, c, args| {
            args.at_most(0)?;
            pair(lua, c.handle()?.next()?)
        })
        .method("prev", |lua, c, args| {
            args.at_most(0)?;
            pair(lua, c.handle()?.prev()?)
        })
        .method("seek", |lua, c, args| {
            let key = args.bytes(1)?;
            args.at_most(1)?;
            pair(lua, c.handle()?.seek(&key)?)
        })
}
