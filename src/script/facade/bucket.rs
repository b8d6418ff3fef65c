use super::{nothing, returns};
use crate::bolt::Bucket;
use crate::script::callback;
use crate::script::dispatch::{wrap, wrap_optional, DispatchTable, Native, Registry, Tag};
use crate::script::marshal;
use mlua::Value;

impl Native for Bucket {
    const TAG: Tag = Tag::Bucket;

    fn table(registry: &Registry) -> &DispatchTable<Self> {
        &registry.bucket
    }
}

pub(crate) fn table() -> DispatchTable<Bucket> {
    DispatchTable::<Bucket>::new()
        .field(
            "fill_percent",
            |_, b| Ok(Value::Number(b.fill_percent())),
            |b, v| {
                b.set_fill_percent(v.number()?);
                Ok(())
            },
        )
        .method("bucket", |lua, b, args| {
            let name = args.bytes(1)?;
            args.at_most(1)?;
            returns(lua, wrap_optional(lua, b.handle()?.bucket(&name)?)?)
        })
        .method("create_bucket", |lua, b, args| {
            let name = args.bytes(1)?;
            args.at_most(1)?;
            returns(lua, wrap(lua, b.handle()?.create_bucket(&name)?)?)
        })
        .method("create_bucket_if_not_exists", |lua, b, args| {
            let name = args.bytes(1)?;
            args.at_most(1)?;
            returns(lua, wrap(lua, b.handle()?.create_bucket_if_not_exists(&name)?)?)
        })
        .method("cursor", |lua, b, args| {
            args.at_most(0)?;
            returns(lua, wrap(lua, b.handle()?.cursor()?)?)
        })
        .method("delete", |_, b, args| {
            let key = args.bytes(1)?;
            args.at_most(1)?;
            b.handle()?.delete(&key)?;
            nothing()
        })
        .method("delete_bucket", |_, b, args| {
            let name = args.bytes(1)?;
            args.at_most(1)?;
            b.handle()?.delete_bucket(&name)?;
            nothing()
        })
        .method("for_each", |lua, b, args| {
            let func = args.function(1)?;
            args.at_most(1)?;
            let gate = callback::gate(lua);
            b.handle()?.for_each(|key, value| -> mlua::Result<()> {
                let key = marshal::to_script(lua, Some(key))?;
                let value = marshal::to_script(lua, value)?;
                gate.call::<()>(&func, (key, value))
            })?;
            nothing()
        })
        .method("get", |lua, b, args| {
            let key = args.bytes(1)?;
            args.at_most(1)?;
            let value = b.handle()?.get(&key)?;
            returns(lua, marshal::to_script(lua, value.as_deref())?)
        })
        .method("next_sequence", |lua, b, args| {
            args.at_most(0)?;
            returns(lua, b.handle()?.next_sequence()? as i64)
        })
        .method("put", |_, b, args| {
            let key = args.bytes(1)?;
            let value = args.bytes(2)?;
            args.at_most(2)?;
            b.handle()?.put(&key, &value)?;
            nothing()
        })
        .method("root", |lua, b, args| {
            args.at_most(0)?;
            returns(lua, b.handle()?.root() as i64)
        })
        .method("sequence", |lua, b, args| {
            args.at_most(0)?;
            returns(lua, b.handle()?.sequence()? as i64)
        })
        .method("set_sequence", |_, b, args| {
            let sequence = args.unsigned(1)?;
            args.at_most(1)?;
            b.handle()?.set_sequence(sequence)?;
            nothing()
        })
        .method("stats", |lua, b, args| {
            args.at_most(0)?;
            returns(lua, wrap(lua, b.handle()?.stats()?)?)
        })
        .method("tx", |lua, b, args| {
            args.at_most(0)?;
            returns(lua, wrap(lua, b.handle()?.tx())?)
        })
        .method("writable", |lua, b, args| {
            args.at_most(0)?;
            returns(lua, b.handle()?.writable())
        })
}
