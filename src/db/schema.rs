//! Target schema for a fresh store.
//!
//! This is the shape the migration chain converges to; the parity between
//! `create_latest` and the chain output is asserted by tests, not enforced at
//! runtime. Table and column names are preserved from the historical store so
//! legacy databases migrate in place.

use rusqlite::Connection;

pub const MIN_VERSION: i64 = 8;
pub const LATEST_VERSION: i64 = 31;

/// Creates the full store shape at `LATEST_VERSION` and stamps the version.
/// Used for brand-new stores and for the destructive recreate fallback.
pub fn create_latest(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS AccountRecord (
  deleted INTEGER NOT NULL,
  id TEXT NOT NULL,
  name TEXT NOT NULL,
  type TEXT NOT NULL,
  origin TEXT NOT NULL DEFAULT '',
  isBackedUp INTEGER NOT NULL,
  words TEXT,
  salt TEXT,
  key TEXT,
  birthdayHeight INTEGER,
  PRIMARY KEY(id)
);

CREATE TABLE IF NOT EXISTS EnabledWallet (
  coinId TEXT NOT NULL,
  accountId TEXT NOT NULL,
  walletOrder INTEGER,
  syncMode TEXT,
  derivation TEXT,
  PRIMARY KEY(coinId, accountId),
  FOREIGN KEY(accountId) REFERENCES AccountRecord(id)
    ON UPDATE CASCADE ON DELETE CASCADE DEFERRABLE INITIALLY DEFERRED
);

CREATE INDEX IF NOT EXISTS index_EnabledWallet_accountId ON EnabledWallet (accountId);

CREATE TABLE IF NOT EXISTS BlockchainSetting (
  coinType TEXT NOT NULL,
  `key` TEXT NOT NULL,
  value TEXT NOT NULL,
  PRIMARY KEY(coinType, `key`)
);

CREATE TABLE IF NOT EXISTS WalletConnectSession (
  chainId INTEGER NOT NULL,
  accountId TEXT NOT NULL,
  session TEXT NOT NULL,
  peerId TEXT NOT NULL,
  remotePeerId TEXT NOT NULL,
  remotePeerMeta TEXT NOT NULL,
  isAutoSign INTEGER NOT NULL,
  date INTEGER NOT NULL,
  PRIMARY KEY(remotePeerId)
);

CREATE TABLE IF NOT EXISTS LogEntry (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  date INTEGER NOT NULL,
  level INTEGER NOT NULL,
  actionId TEXT NOT NULL,
  message TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS FavoriteCoin (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  coinType TEXT NOT NULL
);
"#,
    )?;
    conn.pragma_update(None, "user_version", LATEST_VERSION)?;
    Ok(())
}
