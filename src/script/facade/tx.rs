use super::{nothing, returns};
use crate::bolt::{Bucket, Tx};
use crate::script::callback;
use crate::script::dispatch::{wrap, wrap_optional, DispatchTable, Native, Registry, Tag};
use crate::script::marshal;
use mlua::Value;

impl Native for Tx {
    const TAG: Tag = Tag::Tx;

    fn table(registry: &Registry) -> &DispatchTable<Self> {
        &registry.tx
    }
}

pub(crate) fn table() -> DispatchTable<Tx> {
    DispatchTable::<Tx>::new()
        .field(
            "write_flag",
            |_, tx| Ok(Value::Integer(tx.write_flag())),
            |tx, v| {
                tx.set_write_flag(v.integer()?);
                Ok(())
            },
        )
        .method("bucket", |lua, tx, args| {
            let name = args.bytes(1)?;
            args.at_most(1)?;
            returns(lua, wrap_optional(lua, tx.handle()?.bucket(&name)?)?)
        })
        .method("create_bucket", |lua, tx, args| {
            let name = args.bytes(1)?;
            args.at_most(1)?;
            returns(lua, wrap(lua, tx.handle()?.create_bucket(&name)?)?)
        })
        .method("create_bucket_if_not_exists", |lua, tx, args| {
            let name = args.bytes(1)?;
            args.at_most(1)?;
            returns(lua, wrap(lua, tx.handle()?.create_bucket_if_not_exists(&name)?)?)
        })
        .method("cursor", |lua, tx, args| {
            args.at_most(0)?;
            returns(lua, wrap(lua, tx.handle()?.cursor()?)?)
        })
        .method("db", |lua, tx, args| {
            args.at_most(0)?;
            returns(lua, wrap(lua, tx.handle()?.db())?)
        })
        .method("delete_bucket", |_, tx, args| {
            let name = args.bytes(1)?;
            args.at_most(1)?;
            tx.handle()?.delete_bucket(&name)?;
            nothing()
        })
        .method("for_each", |lua, tx, args| {
            let func = args.function(1)?;
            args.at_most(1)?;
            let gate = callback::gate(lua);
            tx.handle()?.for_each(|name, bucket: Bucket| -> mlua::Result<()> {
                let name = marshal::to_script(lua, Some(name))?;
                gate.call::<()>(&func, (name, wrap(lua, bucket)?))
            })?;
            nothing()
        })
        .method("id", |lua, tx, args| {
            args.at_most(0)?;
            returns(lua, tx.handle()?.id() as i64)
        })
        .method("on_commit", |lua, tx, args| {
            let func = args.function(1)?;
            args.at_most(1)?;
            let tx = tx.handle()?;
            tx.ensure_open()?;
            let gate = callback::gate(lua);
            tx.on_commit(move || {
                gate.call::<()>(&func, ()).map_err(|e| e.to_string().into())
            });
            nothing()
        })
        .method("page_info", |lua, tx, args| {
            let id = args.unsigned(1)?;
            args.at_most(1)?;
            returns(lua, wrap_optional(lua, tx.handle()?.page(id)?)?)
        })
        .method("rollback", |_, tx, args| {
            args.at_most(0)?;
            tx.handle()?.rollback()?;
            nothing()
        })
        .method("commit", |_, tx, args| {
            args.at_most(0)?;
            tx.handle()?.commit()?;
            nothing()
        })
        .method("size", |lua, tx, args| {
            args.at_most(0)?;
            returns(lua, tx.handle()?.size())
        })
        .method("stats", |lua, tx, args| {
            args.at_most(0)?;
            returns(lua, wrap(lua, tx.handle()?.stats())?)
        })
        .method("writable", |lua, tx, args| {
            args.at_most(0)?;
            returns(lua, tx.handle()?.writable())
        })
        .method("check", |_, tx, args| {
            args.at_most(0)?;
            tx.handle()?.check()?;
            nothing()
        })
        .method("copy_file", |_, tx, args| {
            let path = args.string(1)?;
            let mode = args.file_mode(2)?;
            args.at_most(2)?;
            tx.handle()?.copy_file(path, mode)?;
            nothing()
        })
}
