// End-to-End Integration Tests for luabolt
// These tests verify the native store: persistence, bucket trees, cursors and file handling

use luabolt::{Db, Error, Options};
use std::time::Duration;
use tempfile::TempDir;

fn open(dir: &TempDir) -> Db {
    Db::open(dir.path().join("data.db"), 0o600, None).unwrap()
}

/// Test complete CRUD flow inside one bucket
#[test]
fn test_e2e_complete_crud() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir);

    // Create
    db.update(|tx| {
        let users = tx.create_bucket(b"users")?;
        users.put(b"user:1", b"Alice")?;
        users.put(b"user:2", b"Bob")?;
        users.put(b"user:3", b"Charlie")
    })
    .unwrap();

    // Update and delete
    db.update(|tx| {
        let users = tx.bucket(b"users")?.ok_or(Error::BucketNotFound)?;
        users.put(b"user:2", b"Bob_Updated")?;
        users.delete(b"user:1")
    })
    .unwrap();

    // Read
    db.view(|tx| {
        let users = tx.bucket(b"users")?.ok_or(Error::BucketNotFound)?;
        assert!(users.get(b"user:1")?.is_none());
        assert_eq!(users.get(b"user:2")?.as_deref(), Some(&b"Bob_Updated"[..]));
        assert_eq!(users.get(b"user:3")?.as_deref(), Some(&b"Charlie"[..]));
        Ok::<(), Error>(())
    })
    .unwrap();
}

/// Test that committed data survives close and reopen
#[test]
fn test_e2e_persistence_across_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let db = open(&dir);
        db.update(|tx| {
            let b = tx.create_bucket(b"persist")?;
            for i in 0..500 {
                b.put(format!("key{:04}", i).as_bytes(), format!("value{}", i).as_bytes())?;
            }
            b.create_bucket(b"child")?.put(b"deep", b"yes")?;
            b.set_sequence(41)?;
            Ok::<(), Error>(())
        })
        .unwrap();

        // Rolled back work must not reach the file
        let tx = db.begin(true).unwrap();
        tx.create_bucket(b"discarded").unwrap();
        tx.rollback().unwrap();
        db.close().unwrap();
    }

    let db = open(&dir);
    db.update(|tx| {
        assert!(tx.bucket(b"discarded")?.is_none());
        let b = tx.bucket(b"persist")?.ok_or(Error::BucketNotFound)?;
        assert_eq!(b.get(b"key0250")?.as_deref(), Some(&b"value250"[..]));
        assert_eq!(b.next_sequence()?, 42);
        let child = b.bucket(b"child")?.ok_or(Error::BucketNotFound)?;
        assert_eq!(child.get(b"deep")?.as_deref(), Some(&b"yes"[..]));
        Ok::<(), Error>(())
    })
    .unwrap();
}

/// Test transaction ids across commits
#[test]
fn test_tx_ids_advance_on_commit() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir);

    let before = db.begin(false).unwrap();
    let base = before.id();
    before.rollback().unwrap();

    let tx = db.begin(true).unwrap();
    assert_eq!(tx.id(), base + 1);
    tx.create_bucket(b"a").unwrap();
    tx.commit().unwrap();

    let reader = db.begin(false).unwrap();
    assert_eq!(reader.id(), base + 1);
}

/// Test nested bucket trees with cursors at every level
#[test]
fn test_nested_bucket_tree() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir);

    db.update(|tx| {
        let root = tx.create_bucket(b"root")?;
        for name in [&b"x"[..], b"y", b"z"] {
            let child = root.create_bucket(name)?;
            for i in 0..3u8 {
                child.put(&[b'k', b'0' + i], name)?;
            }
        }
        root.put(b"plain", b"value")?;
        Ok::<(), Error>(())
    })
    .unwrap();

    let tx = db.begin(false).unwrap();
    let root = tx.bucket(b"root").unwrap().unwrap();

    let mut entries = Vec::new();
    root.for_each(|k, v| {
        entries.push((k.to_vec(), v.map(|v| v.to_vec())));
        Ok::<(), Error>(())
    })
    .unwrap();
    assert_eq!(
        entries,
        vec![
            (b"plain".to_vec(), Some(b"value".to_vec())),
            (b"x".to_vec(), None),
            (b"y".to_vec(), None),
            (b"z".to_vec(), None),
        ]
    );

    let y = root.bucket(b"y").unwrap().unwrap();
    let cursor = y.cursor().unwrap();
    let (k, v) = cursor.last().unwrap().unwrap();
    assert_eq!(k.as_ref(), b"k2");
    assert_eq!(v.unwrap().as_ref(), b"y");

    let stats = root.stats().unwrap();
    assert_eq!(stats.bucket_n, 4);
    assert_eq!(stats.key_n, 4 + 9);
}

/// Test deleting a bucket with children
#[test]
fn test_delete_bucket_recursive() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir);

    db.update(|tx| {
        let a = tx.create_bucket(b"a")?;
        a.create_bucket(b"b")?.create_bucket(b"c")?.put(b"k", b"v")?;
        Ok::<(), Error>(())
    })
    .unwrap();

    db.update(|tx| tx.delete_bucket(b"a")).unwrap();

    db.view(|tx| {
        assert!(tx.bucket(b"a")?.is_none());
        assert!(matches!(tx.delete_bucket(b"a"), Err(Error::TxNotWritable)));
        Ok::<(), Error>(())
    })
    .unwrap();

    let err = db.update(|tx| tx.delete_bucket(b"a")).unwrap_err();
    assert!(matches!(err, Error::BucketNotFound));
}

/// Test that a read-only open refuses writes but reads committed data
#[test]
fn test_read_only_database() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("data.db");
    {
        let db = Db::open(&path, 0o600, None).unwrap();
        db.update(|tx| tx.create_bucket(b"ro").and_then(|b| b.put(b"k", b"v")))
            .unwrap();
        db.close().unwrap();
    }

    let db = Db::open(&path, 0o600, Some(Options::new().read_only(true))).unwrap();
    assert!(db.is_read_only());
    assert!(matches!(db.begin(true), Err(Error::DatabaseReadOnly)));

    // Two read-only handles share the lock
    let second = Db::open(&path, 0o600, Some(Options::new().read_only(true))).unwrap();
    second
        .view(|tx| {
            let b = tx.bucket(b"ro")?.ok_or(Error::BucketNotFound)?;
            assert_eq!(b.get(b"k")?.as_deref(), Some(&b"v"[..]));
            Ok::<(), Error>(())
        })
        .unwrap();
}

/// Test that a second writer process times out on the file lock
#[test]
fn test_open_lock_timeout() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("data.db");
    let first = Db::open(&path, 0o600, None).unwrap();

    let options = Options::new().timeout(Duration::from_millis(100));
    assert!(matches!(Db::open(&path, 0o600, Some(options.clone())), Err(Error::Timeout)));

    first.close().unwrap();
    Db::open(&path, 0o600, Some(options)).unwrap();
}

/// Test that a closed database refuses new transactions
#[test]
fn test_closed_database() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir);
    let reader = db.begin(false).unwrap();

    db.close().unwrap();
    assert!(!db.is_open());
    assert!(matches!(db.begin(false), Err(Error::DatabaseNotOpen)));
    assert!(matches!(db.sync(), Err(Error::DatabaseNotOpen)));

    // A transaction begun before close keeps its snapshot
    assert!(reader.bucket(b"anything").unwrap().is_none());
    reader.rollback().unwrap();
    db.close().unwrap();
}

/// Test copying a consistent snapshot to a new file
#[test]
fn test_copy_file_snapshot() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir);
    db.update(|tx| tx.create_bucket(b"copy").and_then(|b| b.put(b"before", b"1")))
        .unwrap();

    let reader = db.begin(false).unwrap();
    db.update(|tx| tx.bucket(b"copy")?.ok_or(Error::BucketNotFound)?.put(b"after", b"2"))
        .unwrap();

    let copy_path = dir.path().join("copy.db");
    reader.copy_file(&copy_path, 0o600).unwrap();
    reader.rollback().unwrap();

    let copy = Db::open(&copy_path, 0o600, None).unwrap();
    copy.view(|tx| {
        let b = tx.bucket(b"copy")?.ok_or(Error::BucketNotFound)?;
        assert!(b.get(b"before")?.is_some());
        assert!(b.get(b"after")?.is_none());
        Ok::<(), Error>(())
    })
    .unwrap();
}

/// Test page descriptions and database info
#[test]
fn test_page_info_and_info() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir);
    db.update(|tx| {
        let b = tx.create_bucket(b"pages")?;
        for i in 0..300 {
            b.put(format!("{:08}", i).as_bytes(), &[7u8; 64])?;
        }
        Ok::<(), Error>(())
    })
    .unwrap();

    let info = db.info();
    assert_eq!(info.page_size, 4096);
    assert!(info.data > 0);

    let tx = db.begin(false).unwrap();
    let meta0 = tx.page(0).unwrap().unwrap();
    assert_eq!(meta0.page_type, "meta");
    assert_eq!(meta0.id, 0);
    assert_eq!(tx.page(1).unwrap().unwrap().page_type, "meta");

    let root = tx.bucket(b"pages").unwrap().unwrap().root();
    let page = tx.page(root).unwrap().unwrap();
    assert!(page.page_type == "leaf" || page.page_type == "branch");
    assert!(tx.page(u64::MAX).unwrap().is_none());
    assert!(tx.size() > 0);
    tx.check().unwrap();
}

/// Test strict mode commits with the consistency check enabled
#[test]
fn test_strict_mode_commit() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir);
    db.update_settings(|s| s.strict_mode = true);

    for round in 0..5 {
        db.update(|tx| {
            let b = tx.create_bucket_if_not_exists(b"strict")?;
            for i in 0..100 {
                b.put(format!("r{}k{}", round, i).as_bytes(), b"v")?;
            }
            if round > 0 {
                for i in 0..50 {
                    b.delete(format!("r{}k{}", round - 1, i).as_bytes())?;
                }
            }
            Ok::<(), Error>(())
        })
        .unwrap();
    }

    let tx = db.begin(false).unwrap();
    assert_eq!(tx.bucket(b"strict").unwrap().unwrap().stats().unwrap().key_n, 4 * 50 + 100);
}

/// Test commit hooks from native code
#[test]
fn test_on_commit_native_hooks() {
    use std::cell::Cell;
    use std::rc::Rc;

    let dir = TempDir::new().unwrap();
    let db = open(&dir);
    let calls = Rc::new(Cell::new(0));

    let tx = db.begin(true).unwrap();
    let counter = Rc::clone(&calls);
    tx.on_commit(move || {
        counter.set(counter.get() + 1);
        Ok(())
    });
    tx.rollback().unwrap();
    assert_eq!(calls.get(), 0);

    let tx = db.begin(true).unwrap();
    let counter = Rc::clone(&calls);
    tx.on_commit(move || {
        counter.set(counter.get() + 1);
        Err("first hook failed".into())
    });
    let counter = Rc::clone(&calls);
    tx.on_commit(move || {
        counter.set(counter.get() + 1);
        Ok(())
    });
    tx.create_bucket(b"hooked").unwrap();

    let err = tx.commit().unwrap_err();
    assert!(matches!(err, Error::CommitHook(ref msg) if msg == "first hook failed"));
    assert_eq!(calls.get(), 2);
    assert!(db.begin(false).unwrap().bucket(b"hooked").unwrap().is_some());
}

/// Test statistics accumulate across transactions
#[test]
fn test_stats_accumulate() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir);
    let before = db.stats();

    db.update(|tx| tx.create_bucket(b"s").map(|_| ())).unwrap();
    db.view(|tx| tx.bucket(b"s").map(|_| ())).unwrap();
    db.view(|_| Ok::<(), Error>(())).unwrap();

    let diff = db.stats().sub(&before);
    assert_eq!(diff.tx_n, 2);
    assert_eq!(diff.open_tx_n, 0);
    assert!(diff.tx_stats.write > 0);
}
