// Cursor and bridge benchmarks for luabolt

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use luabolt::{script, Db, Error};
use mlua::{Function, Lua};
use std::hint::black_box;
use tempfile::TempDir;

fn populate(size: usize) -> (TempDir, Db) {
    let temp_dir = TempDir::new().unwrap();
    let db = Db::open(temp_dir.path().join("bench.db"), 0o600, None).unwrap();
    db.update(|tx| {
        let b = tx.create_bucket(b"bench")?;
        for i in 0..size {
            let key = format!("key{:08}", i);
            let value = format!("value{:08}", i);
            b.put(key.as_bytes(), value.as_bytes())?;
        }
        Ok::<(), Error>(())
    })
    .unwrap();
    (temp_dir, db)
}

fn benchmark_native_cursor_walk(c: &mut Criterion) {
    let mut group = c.benchmark_group("native_cursor_walk");

    for size in [100, 1000, 10000].iter() {
        let (_temp_dir, db) = populate(*size);

        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let tx = db.begin(false).unwrap();
                let cursor = tx.bucket(b"bench").unwrap().unwrap().cursor().unwrap();
                let mut item = cursor.first().unwrap();
                while let Some(entry) = item {
                    black_box(entry);
                    item = cursor.next().unwrap();
                }
            });
        });
    }

    group.finish();
}

fn benchmark_lua_for_each(c: &mut Criterion) {
    let mut group = c.benchmark_group("lua_for_each");

    for size in [100, 1000, 10000].iter() {
        let (_temp_dir, db) = populate(*size);
        let lua = Lua::new();
        script::open(&lua).unwrap();
        script::push_db(&lua, db.clone(), "db").unwrap();
        let walk: Function = lua
            .load(
                r#"
                return function()
                  local n = 0
                  db.view(function(tx)
                    tx.bucket("bench").for_each(function(k, v) n = n + #v end)
                  end)
                  return n
                end
                "#,
            )
            .eval()
            .unwrap();

        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let total: i64 = walk.call(()).unwrap();
                black_box(total);
            });
        });
    }

    group.finish();
}

fn benchmark_lua_cursor_seek(c: &mut Criterion) {
    let mut group = c.benchmark_group("lua_cursor_seek");

    for size in [1000, 10000].iter() {
        let (_temp_dir, db) = populate(*size);
        let lua = Lua::new();
        script::open(&lua).unwrap();
        script::push_db(&lua, db.clone(), "db").unwrap();
        let seek: Function = lua
            .load(
                r#"
                return function(count)
                  db.view(function(tx)
                    local c = tx.bucket("bench").cursor()
                    for i = 0, 99 do
                      c.seek(string.format("key%08d", (i * 7919) % count))
                    end
                  end)
                end
                "#,
            )
            .eval()
            .unwrap();

        group.throughput(Throughput::Elements(100));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                seek.call::<()>(size as i64).unwrap();
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_native_cursor_walk,
    benchmark_lua_for_each,
    benchmark_lua_cursor_seek
);
criterion_main!(benches);
