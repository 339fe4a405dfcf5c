use std::fs;
use std::path::Path;

use rusqlite::Connection;

use driftwallet_rust::db;
use driftwallet_rust::db::schema::LATEST_VERSION;
use driftwallet_rust::db::FallbackPolicy;
use driftwallet_rust::preferences::MemoryPreferences;

/// Version-15 store with the BlockchainSetting table missing: step 15 -> 16
/// succeeds (index creation) and step 16 -> 17 hits a hard statement error on
/// the missing table.
fn seed_broken_version_15(app_dir: &Path) {
    fs::create_dir_all(app_dir).expect("create app dir");
    let conn = Connection::open(app_dir.join("wallet.sqlite3")).expect("open seed db");
    conn.execute_batch(
        r#"
CREATE TABLE AccountRecord (
  deleted INTEGER NOT NULL,
  id TEXT NOT NULL,
  name TEXT NOT NULL,
  type TEXT NOT NULL,
  origin TEXT NOT NULL DEFAULT '',
  isBackedUp INTEGER NOT NULL,
  words TEXT,
  salt TEXT,
  key TEXT,
  eosAccount TEXT,
  PRIMARY KEY(id)
);

CREATE TABLE EnabledWallet (
  coinId TEXT NOT NULL,
  accountId TEXT NOT NULL,
  walletOrder INTEGER,
  syncMode TEXT,
  derivation TEXT,
  PRIMARY KEY(coinId, accountId),
  FOREIGN KEY(accountId) REFERENCES AccountRecord(id)
    ON UPDATE CASCADE ON DELETE CASCADE DEFERRABLE INITIALLY DEFERRED
);

INSERT INTO AccountRecord (deleted, id, name, type, origin, isBackedUp)
  VALUES (0, 'a1', 'Main', 'mnemonic', 'Restored', 1);

PRAGMA user_version = 15;
"#,
    )
    .expect("seed broken v15 schema");
}

fn user_version(app_dir: &Path) -> i64 {
    let conn = Connection::open(app_dir.join("wallet.sqlite3")).expect("reopen raw");
    conn.query_row("PRAGMA user_version", [], |row| row.get(0))
        .expect("user_version")
}

#[test]
fn statement_failure_rolls_back_to_pre_upgrade_version() {
    let temp_dir = tempfile::tempdir().expect("tempdir");
    let app_dir = temp_dir.path().join("wallet");
    seed_broken_version_15(&app_dir);

    let prefs = MemoryPreferences::new();
    let result = db::open_with(&app_dir, &prefs, FallbackPolicy::Fail);
    assert!(result.is_err(), "step 16 -> 17 must fail");

    // No partial advance: the whole chain rolled back, including the index
    // that step 15 -> 16 had already created.
    assert_eq!(user_version(&app_dir), 15);

    let conn = Connection::open(app_dir.join("wallet.sqlite3")).expect("reopen raw");
    let indices: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master
             WHERE type = 'index' AND name = 'index_EnabledWallet_accountId'",
            [],
            |row| row.get(0),
        )
        .expect("count indices");
    assert_eq!(indices, 0);

    let accounts: i64 = conn
        .query_row("SELECT COUNT(*) FROM AccountRecord", [], |row| row.get(0))
        .expect("count accounts");
    assert_eq!(accounts, 1);
}

#[test]
fn destructive_fallback_recreates_store_at_latest() {
    let temp_dir = tempfile::tempdir().expect("tempdir");
    let app_dir = temp_dir.path().join("wallet");
    seed_broken_version_15(&app_dir);

    let prefs = MemoryPreferences::new();
    let conn = db::open_with(&app_dir, &prefs, FallbackPolicy::DestructiveRecreate)
        .expect("destructive fallback must produce a usable store");

    let version: i64 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .expect("user_version");
    assert_eq!(version, LATEST_VERSION);

    // The old data is gone; this policy is only for regenerable stores.
    let accounts = db::list_accounts(&conn).expect("list accounts");
    assert!(accounts.is_empty());
}

#[test]
fn version_from_the_future_fails_or_recreates_per_policy() {
    let temp_dir = tempfile::tempdir().expect("tempdir");
    let app_dir = temp_dir.path().join("wallet");
    fs::create_dir_all(&app_dir).expect("create app dir");
    {
        let conn = Connection::open(app_dir.join("wallet.sqlite3")).expect("open seed db");
        conn.execute_batch(
            r#"
CREATE TABLE SomethingNewer (id TEXT PRIMARY KEY);
PRAGMA user_version = 99;
"#,
        )
        .expect("seed future store");
    }

    let prefs = MemoryPreferences::new();
    let result = db::open_with(&app_dir, &prefs, FallbackPolicy::Fail);
    assert!(result.is_err(), "downgrades are unsupported");
    assert_eq!(user_version(&app_dir), 99);

    let conn = db::open_with(&app_dir, &prefs, FallbackPolicy::DestructiveRecreate)
        .expect("recreate from registry");
    let version: i64 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .expect("user_version");
    assert_eq!(version, LATEST_VERSION);

    let leftovers: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'SomethingNewer'",
            [],
            |row| row.get(0),
        )
        .expect("count leftovers");
    assert_eq!(leftovers, 0);
}
