//! Attribute dispatch for native objects exposed to Lua.
//!
//! Every native handle type has one immutable [`DispatchTable`] mapping
//! attribute names to fields and methods. The tables are assembled once by
//! [`Registry::build`] and shared by all Lua states in the process.
//!
//! An object is a [`ForeignObject`] userdata whose `__index` looks the name
//! up in its type's table: fields are read directly, methods come back as a
//! function bound to the object, called with dot syntax
//! (`tx.bucket("name")`).

use super::facade;
use super::marshal::{self, type_name};
use super::translate::Condition;
use crate::bolt::{Bucket, BucketStats, Cursor, Db, Info, PageInfo, Stats, Tx, TxStats};
use crate::config::Options;
use crate::duration;
use mlua::{AnyUserData, Function, Lua, MultiValue, UserData, UserDataMethods, Value};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::OnceLock;
use std::time::Duration;

/// Kind of native handle behind an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Tag {
    Db,
    Tx,
    Bucket,
    Cursor,
    Stats,
    TxStats,
    Info,
    Options,
    PageInfo,
    BucketStats,
}

impl Tag {
    pub(crate) const ALL: [Tag; 10] = [
        Tag::Db,
        Tag::Tx,
        Tag::Bucket,
        Tag::Cursor,
        Tag::Stats,
        Tag::TxStats,
        Tag::Info,
        Tag::Options,
        Tag::PageInfo,
        Tag::BucketStats,
    ];

    /// Name used in error messages and `tostring`.
    pub(crate) fn type_name(self) -> &'static str {
        match self {
            Tag::Db => "DB",
            Tag::Tx => "Tx",
            Tag::Bucket => "Bucket",
            Tag::Cursor => "Cursor",
            Tag::Stats => "Stats",
            Tag::TxStats => "TxStats",
            Tag::Info => "Info",
            Tag::Options => "Options",
            Tag::PageInfo => "PageInfo",
            Tag::BucketStats => "BucketStats",
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// A native handle type that can live inside a Lua object.
pub(crate) trait Native: Clone + 'static {
    const TAG: Tag;

    fn table(registry: &Registry) -> &DispatchTable<Self>;
}

pub(crate) type Getter<T> = fn(&Lua, &T) -> mlua::Result<Value>;
pub(crate) type Setter<T> = fn(&mut T, FieldValue) -> mlua::Result<()>;
pub(crate) type Method<T> = fn(&Lua, &Receiver<T>, Args) -> mlua::Result<MultiValue>;

/// What an attribute name resolves to.
pub(crate) enum Operation<T> {
    Field { get: Getter<T>, set: Setter<T> },
    Method(Method<T>),
}

impl<T> Clone for Operation<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Operation<T> {}

/// Attribute name → operation, for one handle type.
pub(crate) struct DispatchTable<T> {
    operations: HashMap<&'static str, Operation<T>>,
}

impl<T: Native> DispatchTable<T> {
    pub(crate) fn new() -> Self {
        Self { operations: HashMap::new() }
    }

    pub(crate) fn field(mut self, name: &'static str, get: Getter<T>, set: Setter<T>) -> Self {
        self.insert(name, Operation::Field { get, set });
        self
    }

    pub(crate) fn method(mut self, name: &'static str, invoke: Method<T>) -> Self {
        self.insert(name, Operation::Method(invoke));
        self
    }

    fn insert(&mut self, name: &'static str, operation: Operation<T>) {
        let previous = self.operations.insert(name, operation);
        debug_assert!(previous.is_none(), "{}.{} registered twice", T::TAG, name);
    }

    pub(crate) fn resolve(&self, name: &str) -> Option<(&'static str, Operation<T>)> {
        self.operations.get_key_value(name).map(|(name, op)| (*name, *op))
    }

    /// Attribute names in sorted order.
    pub(crate) fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.operations.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

/// The dispatch tables of every handle type.
pub(crate) struct Registry {
    pub(crate) db: DispatchTable<Db>,
    pub(crate) tx: DispatchTable<Tx>,
    pub(crate) bucket: DispatchTable<Bucket>,
    pub(crate) cursor: DispatchTable<Cursor>,
    pub(crate) stats: DispatchTable<Stats>,
    pub(crate) tx_stats: DispatchTable<TxStats>,
    pub(crate) info: DispatchTable<Info>,
    pub(crate) options: DispatchTable<Options>,
    pub(crate) page_info: DispatchTable<PageInfo>,
    pub(crate) bucket_stats: DispatchTable<BucketStats>,
}

impl Registry {
    pub(crate) fn build() -> Registry {
        Registry {
            db: facade::db::table(),
            tx: facade::tx::table(),
            bucket: facade::bucket::table(),
            cursor: facade::cursor::table(),
            stats: facade::values::stats_table(),
            tx_stats: facade::values::tx_stats_table(),
            info: facade::values::info_table(),
            options: facade::values::options_table(),
            page_info: facade::values::page_info_table(),
            bucket_stats: facade::values::bucket_stats_table(),
        }
    }

    /// The process-wide registry, built on first use.
    pub(crate) fn global() -> &'static Registry {
        static REGISTRY: OnceLock<Registry> = OnceLock::new();
        REGISTRY.get_or_init(Registry::build)
    }

    /// Attribute names registered for `tag`.
    pub(crate) fn names(&self, tag: Tag) -> Vec<&'static str> {
        match tag {
            Tag::Db => self.db.names(),
            Tag::Tx => self.tx.names(),
            Tag::Bucket => self.bucket.names(),
            Tag::Cursor => self.cursor.names(),
            Tag::Stats => self.stats.names(),
            Tag::TxStats => self.tx_stats.names(),
            Tag::Info => self.info.names(),
            Tag::Options => self.options.names(),
            Tag::PageInfo => self.page_info.names(),
            Tag::BucketStats => self.bucket_stats.names(),
        }
    }
}

/// A native handle wrapped for Lua.
pub(crate) struct ForeignObject<T> {
    handle: T,
}

impl<T: Native> UserData for ForeignObject<T> {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_meta_function("__index", |lua, (ud, key): (AnyUserData, Value)| {
            index::<T>(lua, ud, key)
        });
        methods.add_meta_function(
            "__newindex",
            |_, (ud, key, value): (AnyUserData, Value, Value)| new_index::<T>(ud, key, value),
        );
        methods.add_meta_method("__tostring", |_, _, ()| Ok(format!("bolt.{}", T::TAG)));
    }
}

/// Wraps `handle` as a new Lua object.
pub(crate) fn wrap<T: Native>(lua: &Lua, handle: T) -> mlua::Result<Value> {
    Ok(Value::UserData(lua.create_userdata(ForeignObject { handle })?))
}

/// Wraps `handle`, or returns `nil` for `None`.
pub(crate) fn wrap_optional<T: Native>(lua: &Lua, handle: Option<T>) -> mlua::Result<Value> {
    match handle {
        Some(handle) => wrap(lua, handle),
        None => Ok(Value::Nil),
    }
}

fn attribute_name<T: Native>(key: &Value) -> mlua::Result<String> {
    match key {
        Value::String(s) => Ok(s.to_string_lossy()),
        other => Err(Condition::NoSuchAttribute {
            tag: T::TAG,
            name: format!("<{}>", type_name(other)),
        }
        .into()),
    }
}

fn index<T: Native>(lua: &Lua, ud: AnyUserData, key: Value) -> mlua::Result<Value> {
    let name = attribute_name::<T>(&key)?;
    match T::table(Registry::global()).resolve(&name) {
        Some((_, Operation::Field { get, .. })) => {
            let object = ud.borrow::<ForeignObject<T>>()?;
            get(lua, &object.handle)
        }
        Some((name, Operation::Method(invoke))) => {
            let receiver = Receiver::<T>::new(ud);
            let bound = lua.create_function(move |lua, args: MultiValue| {
                invoke(lua, &receiver, Args::new(name, args))
            })?;
            Ok(Value::Function(bound))
        }
        None => Err(Condition::NoSuchAttribute { tag: T::TAG, name }.into()),
    }
}

fn new_index<T: Native>(ud: AnyUserData, key: Value, value: Value) -> mlua::Result<()> {
    let name = attribute_name::<T>(&key)?;
    match T::table(Registry::global()).resolve(&name) {
        Some((name, Operation::Field { set, .. })) => {
            let value = FieldValue { tag: T::TAG, name, value };
            let mut object = ud.borrow_mut::<ForeignObject<T>>()?;
            set(&mut object.handle, value)
        }
        _ => Err(Condition::NoSuchAttribute { tag: T::TAG, name }.into()),
    }
}

/// The object a method was called on.
pub(crate) struct Receiver<T> {
    ud: AnyUserData,
    marker: PhantomData<fn() -> T>,
}

impl<T: Native> Receiver<T> {
    fn new(ud: AnyUserData) -> Self {
        Self { ud, marker: PhantomData }
    }

    /// A clone of the native handle. The userdata borrow ends before the
    /// native call starts, so callbacks may use the object again.
    pub(crate) fn handle(&self) -> mlua::Result<T> {
        Ok(self.ud.borrow::<ForeignObject<T>>()?.handle.clone())
    }

    /// Mutates the wrapped value in place.
    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> mlua::Result<R> {
        let mut object = self.ud.borrow_mut::<ForeignObject<T>>()?;
        Ok(f(&mut object.handle))
    }
}

/// Arguments of a method call, numbered from 1.
pub(crate) struct Args {
    method: &'static str,
    values: Vec<Value>,
}

impl Args {
    pub(crate) fn new(method: &'static str, values: MultiValue) -> Self {
        Self { method, values: values.into_iter().collect() }
    }

    /// Fails if more than `max` arguments were passed.
    pub(crate) fn at_most(&self, max: usize) -> mlua::Result<()> {
        if self.values.len() > max {
            return Err(Condition::TooManyArguments {
                method: self.method,
                max,
                got: self.values.len(),
            }
            .into());
        }
        Ok(())
    }

    fn get(&self, position: usize) -> Option<&Value> {
        self.values.get(position - 1)
    }

    fn bad(&self, position: usize, expected: &str) -> mlua::Error {
        let got = self.get(position).map_or("no value", type_name);
        Condition::BadArgument {
            position,
            method: self.method,
            expected: expected.to_string(),
            got,
        }
        .into()
    }

    pub(crate) fn bytes(&self, position: usize) -> mlua::Result<Vec<u8>> {
        match self.get(position) {
            Some(value) => marshal::to_native(value).map_err(|_| self.bad(position, "string")),
            None => Err(self.bad(position, "string")),
        }
    }

    pub(crate) fn string(&self, position: usize) -> mlua::Result<String> {
        match self.get(position) {
            Some(Value::String(s)) => Ok(s.to_str()?.to_string()),
            _ => Err(self.bad(position, "string")),
        }
    }

    pub(crate) fn integer(&self, position: usize) -> mlua::Result<i64> {
        match self.get(position) {
            Some(Value::Integer(n)) => Ok(*n),
            Some(Value::Number(n)) if n.fract() == 0.0 && n.abs() < 9.2e18 => Ok(*n as i64),
            _ => Err(self.bad(position, "number")),
        }
    }

    pub(crate) fn unsigned(&self, position: usize) -> mlua::Result<u64> {
        let n = self.integer(position)?;
        u64::try_from(n).map_err(|_| self.bad(position, "non-negative integer"))
    }

    pub(crate) fn file_mode(&self, position: usize) -> mlua::Result<u32> {
        let n = self.unsigned(position)?;
        u32::try_from(n).map_err(|_| self.bad(position, "file mode"))
    }

    pub(crate) fn boolean(&self, position: usize) -> mlua::Result<bool> {
        match self.get(position) {
            Some(Value::Boolean(b)) => Ok(*b),
            _ => Err(self.bad(position, "boolean")),
        }
    }

    pub(crate) fn function(&self, position: usize) -> mlua::Result<Function> {
        match self.get(position) {
            Some(Value::Function(f)) => Ok(f.clone()),
            _ => Err(self.bad(position, "function")),
        }
    }

    pub(crate) fn object<T: Native>(&self, position: usize) -> mlua::Result<T> {
        match self.get(position) {
            Some(Value::UserData(ud)) if ud.is::<ForeignObject<T>>() => {
                Ok(ud.borrow::<ForeignObject<T>>()?.handle.clone())
            }
            _ => Err(self.bad(position, &format!("bolt.{}", T::TAG))),
        }
    }

    /// Like [`Args::object`], with `nil` or a missing argument read as `None`.
    pub(crate) fn optional_object<T: Native>(&self, position: usize) -> mlua::Result<Option<T>> {
        match self.get(position) {
            None | Some(Value::Nil) => Ok(None),
            Some(_) => self.object(position).map(Some),
        }
    }
}

/// A value assigned to a field.
pub(crate) struct FieldValue {
    tag: Tag,
    name: &'static str,
    value: Value,
}

impl FieldValue {
    fn bad(&self, expected: &str) -> mlua::Error {
        Condition::BadFieldValue {
            tag: self.tag,
            name: self.name,
            expected: expected.to_string(),
            got: type_name(&self.value),
        }
        .into()
    }

    pub(crate) fn boolean(&self) -> mlua::Result<bool> {
        match self.value {
            Value::Boolean(b) => Ok(b),
            _ => Err(self.bad("boolean")),
        }
    }

    pub(crate) fn integer(&self) -> mlua::Result<i64> {
        match self.value {
            Value::Integer(n) => Ok(n),
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 9.2e18 => Ok(n as i64),
            _ => Err(self.bad("number")),
        }
    }

    pub(crate) fn unsigned(&self) -> mlua::Result<u64> {
        u64::try_from(self.integer()?).map_err(|_| self.bad("non-negative integer"))
    }

    pub(crate) fn size(&self) -> mlua::Result<usize> {
        usize::try_from(self.integer()?).map_err(|_| self.bad("non-negative integer"))
    }

    pub(crate) fn number(&self) -> mlua::Result<f64> {
        match self.value {
            Value::Integer(n) => Ok(n as f64),
            Value::Number(n) => Ok(n),
            _ => Err(self.bad("number")),
        }
    }

    pub(crate) fn string(&self) -> mlua::Result<String> {
        match &self.value {
            Value::String(s) => Ok(s.to_str()?.to_string()),
            _ => Err(self.bad("string")),
        }
    }

    /// Duration text such as `"10ms"`.
    pub(crate) fn duration(&self) -> mlua::Result<Duration> {
        Ok(duration::parse(&self.string()?)?)
    }

    pub(crate) fn object<T: Native>(&self) -> mlua::Result<T> {
        match &self.value {
            Value::UserData(ud) if ud.is::<ForeignObject<T>>() => {
                Ok(ud.borrow::<ForeignObject<T>>()?.handle.clone())
            }
            _ => Err(self.bad(&format!("bolt.{}", T::TAG))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(tag: Tag) -> Vec<&'static str> {
        Registry::global().names(tag)
    }

    #[test]
    fn test_every_tag_has_its_operations() {
        assert_eq!(
            names(Tag::Db),
            vec![
                "alloc_size",
                "batch",
                "begin",
                "close",
                "go_string",
                "info",
                "is_read_only",
                "max_batch_delay",
                "max_batch_size",
                "mmap_flags",
                "no_grow_sync",
                "no_sync",
                "path",
                "stats",
                "strict_mode",
                "string",
                "sync",
                "update",
                "view",
            ]
        );
        assert_eq!(
            names(Tag::Tx),
            vec![
                "bucket",
                "check",
                "commit",
                "copy_file",
                "create_bucket",
                "create_bucket_if_not_exists",
                "cursor",
                "db",
                "delete_bucket",
                "for_each",
                "id",
                "on_commit",
                "page_info",
                "rollback",
                "size",
                "stats",
                "writable",
                "write_flag",
            ]
        );
        assert_eq!(
            names(Tag::Bucket),
            vec![
                "bucket",
                "create_bucket",
                "create_bucket_if_not_exists",
                "cursor",
                "delete",
                "delete_bucket",
                "fill_percent",
                "for_each",
                "get",
                "next_sequence",
                "put",
                "root",
                "sequence",
                "set_sequence",
                "stats",
                "tx",
                "writable",
            ]
        );
        assert_eq!(
            names(Tag::Cursor),
            vec!["bucket", "delete", "first", "last", "next", "prev", "seek"]
        );
        assert_eq!(names(Tag::Options), vec!["mmap_flags", "no_grow_sync", "read_only", "timeout"]);
        assert_eq!(names(Tag::Info), vec!["data", "page_size"]);
        assert_eq!(names(Tag::PageInfo), vec!["count", "id", "overflow_count", "type"]);
        assert_eq!(
            names(Tag::Stats),
            vec![
                "free_alloc",
                "free_page_n",
                "freelist_inuse",
                "open_tx_n",
                "pending_page_n",
                "sub",
                "tx_n",
                "tx_stats",
            ]
        );
        assert_eq!(
            names(Tag::TxStats),
            vec![
                "cursor_count",
                "node_count",
                "node_deref",
                "page_alloc",
                "page_count",
                "rebalance",
                "rebalance_time",
                "spill",
                "spill_time",
                "split",
                "sub",
                "write",
                "write_time",
            ]
        );
        assert_eq!(
            names(Tag::BucketStats),
            vec![
                "add",
                "branch_alloc",
                "branch_inuse",
                "branch_overflow_n",
                "branch_page_n",
                "bucket_n",
                "depth",
                "inline_bucket_inuse",
                "inline_bucket_n",
                "key_n",
                "leaf_alloc",
                "leaf_inuse",
                "leaf_overflow_n",
                "leaf_page_n",
            ]
        );
    }

    #[test]
    fn test_all_tags_have_distinct_names() {
        let mut seen: Vec<_> = Tag::ALL.iter().map(|t| t.type_name()).collect();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), Tag::ALL.len());
        for tag in Tag::ALL {
            assert!(!Registry::global().names(tag).is_empty(), "{} has no operations", tag);
        }
    }

    #[test]
    fn test_resolve_is_exact() {
        let registry = Registry::global();
        assert!(registry.cursor.resolve("first").is_some());
        assert!(registry.cursor.resolve("First").is_none());
        assert!(registry.cursor.resolve("").is_none());
    }
}
