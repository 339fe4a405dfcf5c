use std::collections::BTreeMap;
use std::fs;

use rusqlite::Connection;

use driftwallet_rust::db;
use driftwallet_rust::db::schema::LATEST_VERSION;

/// Tables (with ordered column shapes) and index names, as one comparable map.
fn schema_shape(conn: &Connection) -> BTreeMap<String, Vec<String>> {
    let mut shape = BTreeMap::new();

    let mut stmt = conn
        .prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .expect("list tables");
    let tables: Vec<String> = stmt
        .query_map([], |row| row.get(0))
        .expect("query tables")
        .map(|r| r.expect("table name"))
        .collect();

    for table in tables {
        let mut stmt = conn
            .prepare(&format!("PRAGMA table_info({table})"))
            .expect("table_info");
        let columns: Vec<String> = stmt
            .query_map([], |row| {
                let name: String = row.get(1)?;
                let col_type: String = row.get(2)?;
                let not_null: i64 = row.get(3)?;
                let pk: i64 = row.get(5)?;
                Ok(format!("{name}:{col_type}:notnull={not_null}:pk={pk}"))
            })
            .expect("query columns")
            .map(|r| r.expect("column"))
            .collect();
        shape.insert(format!("table:{table}"), columns);
    }

    let mut stmt = conn
        .prepare(
            "SELECT name, tbl_name FROM sqlite_master
             WHERE type = 'index' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .expect("list indices");
    let indices: Vec<String> = stmt
        .query_map([], |row| {
            let name: String = row.get(0)?;
            let table: String = row.get(1)?;
            Ok(format!("{name} ON {table}"))
        })
        .expect("query indices")
        .map(|r| r.expect("index"))
        .collect();
    shape.insert("indices".to_string(), indices);

    shape
}

fn seed_version_8(app_dir: &std::path::Path) {
    fs::create_dir_all(app_dir).expect("create app dir");
    let conn = Connection::open(app_dir.join("wallet.sqlite3")).expect("open seed db");
    conn.execute_batch(
        r#"
CREATE TABLE AccountRecord (
  id TEXT NOT NULL,
  name TEXT NOT NULL,
  type TEXT NOT NULL,
  isBackedUp INTEGER NOT NULL,
  words TEXT,
  salt TEXT,
  key TEXT,
  eosAccount TEXT,
  syncMode TEXT,
  derivation TEXT,
  PRIMARY KEY(id)
);

CREATE TABLE EnabledWallet (
  coinCode TEXT NOT NULL,
  accountId TEXT NOT NULL,
  walletOrder INTEGER,
  syncMode TEXT,
  PRIMARY KEY(coinCode, accountId)
);

CREATE TABLE Rate (
  coinCode TEXT NOT NULL,
  currencyCode TEXT NOT NULL,
  value TEXT NOT NULL,
  timestamp INTEGER NOT NULL,
  PRIMARY KEY(coinCode, currencyCode, timestamp)
);

PRAGMA user_version = 8;
"#,
    )
    .expect("seed v8 schema");
}

#[test]
fn chain_from_version_8_matches_schema_registry() {
    let temp_dir = tempfile::tempdir().expect("tempdir");

    // One store created fresh from the registry.
    let fresh_dir = temp_dir.path().join("fresh");
    let fresh = db::open(&fresh_dir).expect("open fresh store");

    // One store seeded at version 8 and migrated through the whole chain.
    let migrated_dir = temp_dir.path().join("migrated");
    seed_version_8(&migrated_dir);
    let migrated = db::open(&migrated_dir).expect("open and migrate v8 store");

    let migrated_version: i64 = migrated
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .expect("user_version");
    assert_eq!(migrated_version, LATEST_VERSION);

    assert_eq!(schema_shape(&fresh), schema_shape(&migrated));
}

#[test]
fn chain_from_version_8_with_rows_reaches_latest() {
    let temp_dir = tempfile::tempdir().expect("tempdir");
    let app_dir = temp_dir.path().join("wallet");
    seed_version_8(&app_dir);

    {
        let conn = Connection::open(app_dir.join("wallet.sqlite3")).expect("open seed db");
        conn.execute_batch(
            r#"
INSERT INTO AccountRecord (id, name, type, isBackedUp, syncMode, derivation)
  VALUES ('a1', 'Wallet 1', 'mnemonic', 1, 'New', 'bip84');
INSERT INTO EnabledWallet (coinCode, accountId, walletOrder, syncMode)
  VALUES ('BTC', 'a1', 0, 'fast');
INSERT INTO EnabledWallet (coinCode, accountId, walletOrder, syncMode)
  VALUES ('DAI', 'a1', 1, NULL);
INSERT INTO Rate (coinCode, currencyCode, value, timestamp)
  VALUES ('BTC', 'USD', '10000', 0);
"#,
        )
        .expect("seed v8 rows");
    }

    let conn = db::open(&app_dir).expect("open and migrate");

    // coinCode became coinId, DAI was renamed to SAI, Rate is gone.
    let wallets = db::list_enabled_wallets(&conn, "a1").expect("list wallets");
    let coin_ids: Vec<&str> = wallets.iter().map(|w| w.coin_id.as_str()).collect();
    assert_eq!(coin_ids, vec!["BTC", "SAI"]);

    let rate_tables: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'Rate'",
            [],
            |row| row.get(0),
        )
        .expect("count Rate");
    assert_eq!(rate_tables, 0);

    let account = db::get_account(&conn, "a1")
        .expect("get account")
        .expect("account survives the chain");
    assert_eq!(account.origin, "Created");
    assert_eq!(account.birthday_height, None);
}
