use lumodb::{Database, EnvFlags, Environment, Error, WriteFlags};
use tempfile::TempDir;

// Common test setup
fn setup_test_env() -> (TempDir, Environment) {
    let temp_dir = TempDir::new().unwrap();
    let env = Environment::builder()
        .set_max_dbs(4)
        .unwrap()
        .set_map_size(16 << 20)
        .unwrap()
        .open(temp_dir.path(), EnvFlags::empty(), 0o644)
        .unwrap();
    (temp_dir, env)
}

#[test]
fn test_database_open() {
    let (_dir, env) = setup_test_env();
    let mut txn = env.begin_txn(None).unwrap();

    // Test opening default database
    let main = Database::open(&mut txn, None).unwrap();

    // Test opening named database
    let db = Database::open(&mut txn, Some("testdb")).unwrap();
    assert_ne!(db, main);
    assert_eq!(Database::open(&mut txn, Some("testdb")).unwrap(), db);
    txn.commit().unwrap();

    // The handle resolves the same way in later transactions
    let txn = env.begin_ro_txn(None).unwrap();
    assert_eq!(Database::open_readonly(&txn, Some("testdb")).unwrap(), db);
    assert_eq!(Database::open_readonly(&txn, Some("missing")), Err(Error::NotFound));
}

#[test]
fn test_basic_put_get() {
    let (_dir, env) = setup_test_env();
    let mut txn = env.begin_txn(None).unwrap();
    let db = Database::open(&mut txn, None).unwrap();

    // Test putting and getting data
    let key = b"test_key";
    let value = b"test_value";

    db.put(&mut txn, key, value, WriteFlags::empty()).unwrap();
    let result = db.get(&txn, key).unwrap();

    assert_eq!(result, value);
}

#[test]
fn test_delete_operations() {
    let (_dir, env) = setup_test_env();
    let mut txn = env.begin_txn(None).unwrap();
    let db = Database::open(&mut txn, None).unwrap();

    // Insert and then delete data
    let key = b"delete_key";
    let value = b"delete_value";

    db.put(&mut txn, key, value, WriteFlags::empty()).unwrap();
    assert!(db.get(&txn, key).is_ok());

    db.del(&mut txn, key).unwrap();
    assert_eq!(db.get(&txn, key), Err(Error::NotFound));
    assert_eq!(db.del(&mut txn, key), Err(Error::NotFound));
    txn.commit().unwrap();

    let txn = env.begin_ro_txn(None).unwrap();
    assert_eq!(db.get(&txn, key), Err(Error::NotFound));
}

#[test]
fn test_database_stats() {
    let (_dir, env) = setup_test_env();
    let mut txn = env.begin_txn(None).unwrap();
    let db = Database::open(&mut txn, None).unwrap();

    // Get initial stats
    let stats = db.stat(&txn).unwrap();
    assert_eq!(stats.entries, 0);
    assert_eq!(stats.depth, 0);

    // Add some entries and check stats
    for i in 0..5 {
        let key = format!("key_{}", i);
        let value = format!("value_{}", i);
        db.put(&mut txn, key.as_bytes(), value.as_bytes(), WriteFlags::empty())
            .unwrap();
    }

    let stats = db.stat(&txn).unwrap();
    assert_eq!(stats.entries, 5);
    assert_eq!(stats.depth, 1);
    assert_eq!(stats.leaf_pages, 1);
    txn.commit().unwrap();
    assert_eq!(env.stat().entries, 5);
}

#[test]
fn test_error_handling() {
    let (_dir, env) = setup_test_env();
    let mut txn = env.begin_txn(None).unwrap();
    let db = Database::open(&mut txn, None).unwrap();

    // Test key not found
    let result = db.get(&txn, b"nonexistent_key");
    assert_eq!(result, Err(Error::NotFound));

    // Test duplicate key with NOOVERWRITE flag
    let key = b"unique_key";
    let value1 = b"value1";
    let value2 = b"value2";

    db.put(&mut txn, key, value1, WriteFlags::empty()).unwrap();
    let result = db.put(&mut txn, key, value2, WriteFlags::NOOVERWRITE);
    assert!(matches!(result, Err(Error::KeyExist)));
    assert_eq!(db.get(&txn, key).unwrap(), value1);

    // Key size limits
    assert_eq!(db.put(&mut txn, b"", b"v", WriteFlags::empty()), Err(Error::BadValSize));
    let long_key = vec![b'k'; lumodb::MAX_KEY_SIZE + 1];
    assert_eq!(db.put(&mut txn, &long_key, b"v", WriteFlags::empty()), Err(Error::BadValSize));
    assert_eq!(db.get(&txn, &long_key), Err(Error::BadValSize));
}

#[test]
fn test_append_requires_increasing_keys() {
    let (_dir, env) = setup_test_env();
    let mut txn = env.begin_txn(None).unwrap();
    let db = Database::open(&mut txn, None).unwrap();

    for i in 0..1000u32 {
        db.put(&mut txn, &i.to_be_bytes(), b"row", WriteFlags::APPEND).unwrap();
    }
    let result = db.put(&mut txn, &500u32.to_be_bytes(), b"row", WriteFlags::APPEND);
    assert_eq!(result, Err(Error::KeyExist));
    let result = db.put(&mut txn, &999u32.to_be_bytes(), b"row", WriteFlags::APPEND);
    assert_eq!(result, Err(Error::KeyExist));
    assert_eq!(db.stat(&txn).unwrap().entries, 1000);
}

#[test]
fn test_named_database_record_is_protected() {
    let (_dir, env) = setup_test_env();
    let mut txn = env.begin_txn(None).unwrap();
    let main = Database::open(&mut txn, None).unwrap();
    let users = Database::open(&mut txn, Some("users")).unwrap();
    users.put(&mut txn, b"u1", b"alice", WriteFlags::empty()).unwrap();
    txn.commit().unwrap();

    let mut txn = env.begin_txn(None).unwrap();
    // The name is a record in the main database that plain writes may not touch
    assert_eq!(main.put(&mut txn, b"users", b"x", WriteFlags::empty()), Err(Error::Incompatible));
    assert_eq!(main.del(&mut txn, b"users"), Err(Error::Incompatible));

    // A plain key cannot be opened as a database
    main.put(&mut txn, b"plain", b"x", WriteFlags::empty()).unwrap();
    assert_eq!(Database::open(&mut txn, Some("plain")), Err(Error::Incompatible));
}

#[test]
fn test_new_database_name_is_protected_before_commit() {
    let (_dir, env) = setup_test_env();
    let mut txn = env.begin_txn(None).unwrap();
    let main = Database::open(&mut txn, None).unwrap();
    let users = Database::open(&mut txn, Some("users")).unwrap();
    assert_eq!(main.put(&mut txn, b"users", b"plain", WriteFlags::empty()), Err(Error::Incompatible));
    assert_eq!(main.del(&mut txn, b"users"), Err(Error::Incompatible));
    users.put(&mut txn, b"u1", b"alice", WriteFlags::empty()).unwrap();
    txn.commit().unwrap();

    let txn = env.begin_ro_txn(None).unwrap();
    let users = Database::open_readonly(&txn, Some("users")).unwrap();
    assert_eq!(users.get(&txn, b"u1").unwrap(), b"alice");
    assert_eq!(users.stat(&txn).unwrap().entries, 1);
    assert_eq!(env.stat().entries, 1);
}

#[test]
fn test_large_values_use_overflow_pages() {
    let (_dir, env) = setup_test_env();
    let big: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();

    let mut txn = env.begin_txn(None).unwrap();
    let db = Database::open(&mut txn, None).unwrap();
    db.put(&mut txn, b"big", &big, WriteFlags::empty()).unwrap();
    db.put(&mut txn, b"small", b"s", WriteFlags::empty()).unwrap();
    assert_eq!(db.stat(&txn).unwrap().overflow_pages, 5);
    txn.commit().unwrap();

    let txn = env.begin_ro_txn(None).unwrap();
    assert_eq!(db.get(&txn, b"big").unwrap(), &big[..]);
    assert_eq!(db.get(&txn, b"small").unwrap(), b"s");
    drop(txn);

    let mut txn = env.begin_txn(None).unwrap();
    db.del(&mut txn, b"big").unwrap();
    assert_eq!(db.stat(&txn).unwrap().overflow_pages, 0);
    txn.commit().unwrap();
}

#[test]
fn test_transaction_isolation() {
    let (_dir, env) = setup_test_env();

    // Write transaction
    let mut write_txn = env.begin_txn(None).unwrap();
    let db = Database::open(&mut write_txn, None).unwrap();
    db.put(&mut write_txn, b"key", b"value", WriteFlags::empty()).unwrap();

    // Read transaction shouldn't see uncommitted changes
    let read_txn = env.begin_ro_txn(None).unwrap();
    assert_eq!(db.get(&read_txn, b"key"), Err(Error::NotFound));
    drop(read_txn);

    // After commit, changes should be visible
    write_txn.commit().unwrap();
    let read_txn = env.begin_ro_txn(None).unwrap();
    assert_eq!(db.get(&read_txn, b"key").unwrap(), b"value");
}
