use super::{nothing, returns};
use crate::bolt::{Db, Tx};
use crate::duration;
use crate::script::callback;
use crate::script::dispatch::{wrap, Args, DispatchTable, Native, Receiver, Registry, Tag};
use crate::script::marshal::text;
use mlua::{Lua, MultiValue, Value};

impl Native for Db {
    const TAG: Tag = Tag::Db;

    fn table(registry: &Registry) -> &DispatchTable<Self> {
        &registry.db
    }
}

pub(crate) fn table() -> DispatchTable<Db> {
    DispatchTable::<Db>::new()
        .field(
            "strict_mode",
            |_, db| Ok(Value::Boolean(db.settings().strict_mode)),
            |db, v| {
                let on = v.boolean()?;
                db.update_settings(|s| s.strict_mode = on);
                Ok(())
            },
        )
        .field(
            "no_sync",
            |_, db| Ok(Value::Boolean(db.settings().no_sync)),
            |db, v| {
                let on = v.boolean()?;
                db.update_settings(|s| s.no_sync = on);
                Ok(())
            },
        )
        .field(
            "no_grow_sync",
            |_, db| Ok(Value::Boolean(db.settings().no_grow_sync)),
            |db, v| {
                let on = v.boolean()?;
                db.update_settings(|s| s.no_grow_sync = on);
                Ok(())
            },
        )
        .field(
            "mmap_flags",
            |_, db| Ok(Value::Integer(db.settings().mmap_flags)),
            |db, v| {
                let flags = v.integer()?;
                db.update_settings(|s| s.mmap_flags = flags);
                Ok(())
            },
        )
        .field(
            "max_batch_size",
            |_, db| Ok(Value::Integer(db.settings().max_batch_size as i64)),
            |db, v| {
                let size = v.size()?;
                db.update_settings(|s| s.max_batch_size = size);
                Ok(())
            },
        )
        .field(
            "max_batch_delay",
            |lua, db| text(lua, &duration::format(db.settings().max_batch_delay)),
            |db, v| {
                let delay = v.duration()?;
                db.update_settings(|s| s.max_batch_delay = delay);
                Ok(())
            },
        )
        .field(
            "alloc_size",
            |_, db| Ok(Value::Integer(db.settings().alloc_size as i64)),
            |db, v| {
                let size = v.size()?;
                db.update_settings(|s| s.alloc_size = size);
                Ok(())
            },
        )
        .method("batch", |lua, db, args| managed(lua, db, args, Managed::Batch))
        .method("begin", |lua, db, args| {
            let writable = args.boolean(1)?;
            args.at_most(1)?;
            let tx = db.handle()?.begin(writable)?;
            returns(lua, wrap(lua, tx)?)
        })
        .method("close", |_, db, args| {
            args.at_most(0)?;
            db.handle()?.close()?;
            nothing()
        })
        .method("info", |lua, db, args| {
            args.at_most(0)?;
            returns(lua, wrap(lua, db.handle()?.info())?)
        })
        .method("is_read_only", |lua, db, args| {
            args.at_most(0)?;
            returns(lua, db.handle()?.is_read_only())
        })
        .method("path", |lua, db, args| {
            args.at_most(0)?;
            returns(lua, db.handle()?.path().display().to_string())
        })
        .method("stats", |lua, db, args| {
            args.at_most(0)?;
            returns(lua, wrap(lua, db.handle()?.stats())?)
        })
        .method("sync", |_, db, args| {
            args.at_most(0)?;
            db.handle()?.sync()?;
            nothing()
        })
        .method("update", |lua, db, args| managed(lua, db, args, Managed::Update))
        .method("view", |lua, db, args| managed(lua, db, args, Managed::View))
        .method("string", |lua, db, args| {
            args.at_most(0)?;
            returns(lua, db.handle()?.to_string())
        })
        .method("go_string", |lua, db, args| {
            args.at_most(0)?;
            let db = db.handle()?;
            returns(lua, format!("bolt.DB{{path:{:?}}}", db.path().display().to_string()))
        })
}

#[derive(Clone, Copy)]
enum Managed {
    Update,
    View,
    Batch,
}

/// Shared body of `update`, `view` and `batch`: runs the Lua function with
/// the managed transaction as its only argument.
fn managed(lua: &Lua, db: &Receiver<Db>, args: Args, kind: Managed) -> mlua::Result<MultiValue> {
    let func = args.function(1)?;
    args.at_most(1)?;
    let db = db.handle()?;
    let gate = callback::gate(lua);

    let body = |tx: &Tx| -> mlua::Result<()> {
        let tx = wrap(lua, tx.clone())?;
        gate.call::<()>(&func, tx)
    };
    match kind {
        Managed::Update => db.update(body)?,
        Managed::View => db.view(body)?,
        Managed::Batch => db.batch(body)?,
    }
    nothing()
}
