//! Plain value objects: statistics, info, options and page descriptions.
//!
//! Every field is readable and writable; writes change only the Lua-side
//! copy.

use super::{nothing, returns};
use crate::bolt::{BucketStats, Info, PageInfo, Stats, TxStats};
use crate::config::Options;
use crate::duration;
use crate::script::dispatch::{wrap, DispatchTable, Native, Registry, Tag};
use crate::script::marshal::text;
use mlua::Value;

impl Native for Stats {
    const TAG: Tag = Tag::Stats;

    fn table(registry: &Registry) -> &DispatchTable<Self> {
        &registry.stats
    }
}

impl Native for TxStats {
    const TAG: Tag = Tag::TxStats;

    fn table(registry: &Registry) -> &DispatchTable<Self> {
        &registry.tx_stats
    }
}

impl Native for BucketStats {
    const TAG: Tag = Tag::BucketStats;

    fn table(registry: &Registry) -> &DispatchTable<Self> {
        &registry.bucket_stats
    }
}

impl Native for Info {
    const TAG: Tag = Tag::Info;

    fn table(registry: &Registry) -> &DispatchTable<Self> {
        &registry.info
    }
}

impl Native for PageInfo {
    const TAG: Tag = Tag::PageInfo;

    fn table(registry: &Registry) -> &DispatchTable<Self> {
        &registry.page_info
    }
}

impl Native for Options {
    const TAG: Tag = Tag::Options;

    fn table(registry: &Registry) -> &DispatchTable<Self> {
        &registry.options
    }
}

/// Registers read/write integer fields named after struct fields.
macro_rules! integer_fields {
    ($table:expr, [$($field:ident),* $(,)?]) => {
        $table$(.field(
            stringify!($field),
            |_, s| Ok(Value::Integer(s.$field)),
            |s, v| {
                s.$field = v.integer()?;
                Ok(())
            },
        ))*
    };
}

/// Registers read/write duration-text fields named after struct fields.
macro_rules! duration_fields {
    ($table:expr, [$($field:ident),* $(,)?]) => {
        $table$(.field(
            stringify!($field),
            |lua, s| text(lua, &duration::format(s.$field)),
            |s, v| {
                s.$field = v.duration()?;
                Ok(())
            },
        ))*
    };
}

pub(crate) fn stats_table() -> DispatchTable<Stats> {
    let table = integer_fields!(
        DispatchTable::<Stats>::new(),
        [free_page_n, pending_page_n, free_alloc, freelist_inuse, tx_n, open_tx_n]
    );
    table
        .field(
            "tx_stats",
            |lua, s| wrap(lua, s.tx_stats),
            |s, v| {
                s.tx_stats = v.object::<TxStats>()?;
                Ok(())
            },
        )
        .method("sub", |lua, s, args| {
            let other = args.object::<Stats>(1)?;
            args.at_most(1)?;
            returns(lua, wrap(lua, s.handle()?.sub(&other))?)
        })
}

pub(crate) fn tx_stats_table() -> DispatchTable<TxStats> {
    let table = integer_fields!(
        DispatchTable::<TxStats>::new(),
        [page_count, page_alloc, cursor_count, node_count, node_deref, rebalance, split, spill, write]
    );
    duration_fields!(table, [rebalance_time, spill_time, write_time]).method("sub", |lua, s, args| {
        let other = args.object::<TxStats>(1)?;
        args.at_most(1)?;
        returns(lua, wrap(lua, s.handle()?.sub(&other))?)
    })
}

pub(crate) fn bucket_stats_table() -> DispatchTable<BucketStats> {
    let table = integer_fields!(
        DispatchTable::<BucketStats>::new(),
        [
            branch_page_n,
            branch_overflow_n,
            leaf_page_n,
            leaf_overflow_n,
            key_n,
            depth,
            branch_alloc,
            branch_inuse,
            leaf_alloc,
            leaf_inuse,
            bucket_n,
            inline_bucket_n,
            inline_bucket_inuse,
        ]
    );
    table.method("add", |_, s, args| {
        // Read the argument first: `s.add(s)` borrows the same object twice.
        let other = args.object::<BucketStats>(1)?;
        args.at_most(1)?;
        s.update(|stats| stats.add(&other))?;
        nothing()
    })
}

pub(crate) fn info_table() -> DispatchTable<Info> {
    DispatchTable::<Info>::new()
        .field(
            "data",
            |_, info| Ok(Value::Integer(info.data as i64)),
            |info, v| {
                info.data = v.unsigned()?;
                Ok(())
            },
        )
        .field(
            "page_size",
            |_, info| Ok(Value::Integer(info.page_size)),
            |info, v| {
                info.page_size = v.integer()?;
                Ok(())
            },
        )
}

pub(crate) fn page_info_table() -> DispatchTable<PageInfo> {
    let table = integer_fields!(DispatchTable::<PageInfo>::new(), [id, count, overflow_count]);
    table.field(
        "type",
        |lua, p| text(lua, &p.page_type),
        |p, v| {
            p.page_type = v.string()?;
            Ok(())
        },
    )
}

pub(crate) fn options_table() -> DispatchTable<Options> {
    DispatchTable::<Options>::new()
        .field(
            "timeout",
            |lua, o| text(lua, &duration::format(o.timeout)),
            |o, v| {
                o.timeout = v.duration()?;
                Ok(())
            },
        )
        .field(
            "no_grow_sync",
            |_, o| Ok(Value::Boolean(o.no_grow_sync)),
            |o, v| {
                o.no_grow_sync = v.boolean()?;
                Ok(())
            },
        )
        .field(
            "read_only",
            |_, o| Ok(Value::Boolean(o.read_only)),
            |o, v| {
                o.read_only = v.boolean()?;
                Ok(())
            },
        )
        .field(
            "mmap_flags",
            |_, o| Ok(Value::Integer(o.mmap_flags)),
            |o, v| {
                o.mmap_flags = v.integer()?;
                Ok(())
            },
        )
}
