//! Versioned schema migrations.
//!
//! The registry is a linear chain of `(from, to = from + 1)` steps covering
//! every version from `MIN_VERSION` to `LATEST_VERSION` with no gaps. The
//! runner applies the contiguous tail of that chain inside one immediate
//! transaction, bumping `PRAGMA user_version` after each step, so a failure
//! anywhere rolls the store back to its pre-upgrade version.
//!
//! Steps never look at each other: each one is a transform of "store at
//! version V" into "store at version V + 1". Structural statement errors are
//! fatal and abort the whole chain; only legacy-value decode misses are
//! absorbed, resolving to the documented defaults in `legacy`.

use rusqlite::{params, Connection};
use tracing::{info, warn};

use super::legacy::{AccountOrigin, CommunicationMode, Derivation, SyncMode};
use super::schema::{self, LATEST_VERSION, MIN_VERSION};
use crate::preferences::PreferenceStore;

/// Preference key receiving the derivation extracted by step 13 -> 14.
pub const BITCOIN_DERIVATION_PREF_KEY: &str = "bitcoin_derivation";

#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("migration registry has no step upgrading from version {from}")]
    Gap { from: i64 },

    #[error(
        "unsupported schema version {version} (this build migrates versions {min} through {max})",
        min = MIN_VERSION,
        max = LATEST_VERSION
    )]
    UnsupportedVersion { version: i64 },

    #[error("foreign key check found {violations} violating rows after migration")]
    ForeignKeys { violations: i64 },

    #[error("migration statement failed: {0}")]
    Statement(#[from] rusqlite::Error),
}

/// What to do when the store cannot be migrated. `DestructiveRecreate` throws
/// the file away and rebuilds it from the schema registry; only ever
/// acceptable for data the user can regenerate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FallbackPolicy {
    Fail,
    DestructiveRecreate,
}

type ApplyFn = fn(&Connection, &dyn PreferenceStore) -> Result<(), MigrationError>;

pub struct MigrationStep {
    pub from: i64,
    pub to: i64,
    pub name: &'static str,
    apply: ApplyFn,
}

pub fn registry() -> &'static [MigrationStep] {
    &STEPS
}

#[cfg(test)]
impl MigrationStep {
    pub(crate) fn noop_for_test(from: i64, to: i64) -> MigrationStep {
        MigrationStep {
            from,
            to,
            name: "noop_for_test",
            apply: schema_noop,
        }
    }
}

macro_rules! step {
    ($from:literal, $name:ident) => {
        MigrationStep {
            from: $from,
            to: $from + 1,
            name: stringify!($name),
            apply: $name,
        }
    };
}

static STEPS: [MigrationStep; 23] = [
    step!(8, add_deleted_flag_to_account),
    step!(9, schema_noop),
    step!(10, rebuild_enabled_wallet_keyed_by_coin_id),
    step!(11, rename_coin_dai_to_sai),
    step!(12, move_coin_settings_from_account_to_wallet),
    step!(13, store_bitcoin_derivation_to_preferences),
    step!(14, add_blockchain_settings_table),
    step!(15, add_index_to_enabled_wallet),
    step!(16, update_bch_sync_mode),
    step!(17, add_coin_record_table),
    step!(18, remove_rate_table),
    step!(19, schema_noop),
    step!(20, add_logs_table),
    step!(21, update_ethereum_communication_mode),
    step!(22, add_birthday_height_to_account),
    step!(23, add_bep2_symbol_to_coin_record),
    step!(24, add_favorite_coins_table),
    step!(25, delete_eos_from_account_record),
    step!(26, add_wallet_connect_session_table),
    step!(27, remove_coin_record_table),
    step!(28, rebuild_favorite_coins_keyed_by_coin_type),
    step!(29, schema_noop),
    step!(30, schema_noop),
];

/// Checks that `steps` covers `[MIN_VERSION, LATEST_VERSION)` contiguously,
/// in order, one step per version. Run before the first write so a broken
/// registry never touches the store.
pub fn validate_registry(steps: &[MigrationStep]) -> Result<(), MigrationError> {
    let mut expected = MIN_VERSION;
    for step in steps {
        if step.from != expected || step.to != step.from + 1 {
            return Err(MigrationError::Gap { from: expected });
        }
        expected = step.to;
    }
    if expected != LATEST_VERSION {
        return Err(MigrationError::Gap { from: expected });
    }
    Ok(())
}

pub fn current_version(conn: &Connection) -> Result<i64, MigrationError> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    Ok(version)
}

/// Brings the store to `LATEST_VERSION`. A brand-new file (version 0) is
/// created directly from the schema registry; anything else goes through the
/// step chain in one `BEGIN IMMEDIATE` unit.
pub fn run(conn: &Connection, prefs: &dyn PreferenceStore) -> Result<(), MigrationError> {
    let version = current_version(conn)?;

    if version == 0 {
        info!(version = LATEST_VERSION, "creating fresh store from schema registry");
        schema::create_latest(conn)?;
        return Ok(());
    }
    if version == LATEST_VERSION {
        return Ok(());
    }
    if version < MIN_VERSION || version > LATEST_VERSION {
        return Err(MigrationError::UnsupportedVersion { version });
    }

    validate_registry(registry())?;

    // Rebuild steps drop a parent table while child tables still reference
    // it. With enforcement on, the implicit DELETE of a dropped parent fires
    // ON DELETE CASCADE into the freshly copied child rows, so enforcement
    // stays off for the chain and consistency is verified in bulk before
    // commit. The pragma is a no-op inside a transaction, hence it brackets
    // BEGIN/COMMIT.
    conn.pragma_update(None, "foreign_keys", false)?;
    let outcome = run_chain_transaction(conn, prefs, version);
    conn.pragma_update(None, "foreign_keys", true)?;
    outcome
}

fn run_chain_transaction(
    conn: &Connection,
    prefs: &dyn PreferenceStore,
    version: i64,
) -> Result<(), MigrationError> {
    conn.execute_batch("BEGIN IMMEDIATE;")?;
    let applied = apply_chain(conn, prefs, version).and_then(|()| {
        let violations = foreign_key_violations(conn)?;
        if violations > 0 {
            return Err(MigrationError::ForeignKeys { violations });
        }
        Ok(())
    });
    match applied {
        Ok(()) => {
            conn.execute_batch("COMMIT;")?;
            Ok(())
        }
        Err(err) => {
            let _ = conn.execute_batch("ROLLBACK;");
            Err(err)
        }
    }
}

fn foreign_key_violations(conn: &Connection) -> Result<i64, MigrationError> {
    let mut stmt = conn.prepare("PRAGMA foreign_key_check")?;
    let mut rows = stmt.query([])?;
    let mut violations = 0;
    while rows.next()?.is_some() {
        violations += 1;
    }
    Ok(violations)
}

fn apply_chain(
    conn: &Connection,
    prefs: &dyn PreferenceStore,
    from_version: i64,
) -> Result<(), MigrationError> {
    let mut expected = from_version;
    for step in registry().iter().filter(|s| s.from >= from_version) {
        // A step only ever runs against the exact version it declares.
        if step.from != expected {
            return Err(MigrationError::Gap { from: expected });
        }
        (step.apply)(conn, prefs)?;
        conn.pragma_update(None, "user_version", step.to)?;
        info!(from = step.from, to = step.to, step = step.name, "applied migration step");
        expected = step.to;
    }
    Ok(())
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool, MigrationError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

// --- steps, oldest first ---

fn schema_noop(_conn: &Connection, _prefs: &dyn PreferenceStore) -> Result<(), MigrationError> {
    // Historical versions whose changes lived outside this store. The step
    // exists so the chain stays gapless.
    Ok(())
}

fn add_deleted_flag_to_account(
    conn: &Connection,
    _prefs: &dyn PreferenceStore,
) -> Result<(), MigrationError> {
    if !column_exists(conn, "AccountRecord", "deleted")? {
        conn.execute_batch("ALTER TABLE AccountRecord ADD COLUMN deleted INTEGER NOT NULL DEFAULT 0")?;
    }
    Ok(())
}

fn rebuild_enabled_wallet_keyed_by_coin_id(
    conn: &Connection,
    _prefs: &dyn PreferenceStore,
) -> Result<(), MigrationError> {
    // coinCode becomes coinId and the wallet gains a composite key plus a
    // deferred cascading link to its account. Deferral keeps multi-statement
    // account/wallet writes legal at runtime; during the chain itself,
    // enforcement is off and `run` checks consistency in bulk.
    conn.execute_batch(
        r#"
CREATE TABLE new_EnabledWallet (
  coinId TEXT NOT NULL,
  accountId TEXT NOT NULL,
  walletOrder INTEGER,
  syncMode TEXT,
  PRIMARY KEY(coinId, accountId),
  FOREIGN KEY(accountId) REFERENCES AccountRecord(id)
    ON UPDATE CASCADE ON DELETE CASCADE DEFERRABLE INITIALLY DEFERRED
);
INSERT INTO new_EnabledWallet (coinId, accountId, walletOrder, syncMode)
  SELECT coinCode, accountId, walletOrder, syncMode FROM EnabledWallet;
DROP TABLE EnabledWallet;
ALTER TABLE new_EnabledWallet RENAME TO EnabledWallet;
"#,
    )?;
    Ok(())
}

fn rename_coin_dai_to_sai(
    conn: &Connection,
    _prefs: &dyn PreferenceStore,
) -> Result<(), MigrationError> {
    conn.execute_batch(
        r#"
INSERT INTO EnabledWallet (coinId, accountId, walletOrder, syncMode)
  SELECT 'SAI', accountId, walletOrder, syncMode FROM EnabledWallet WHERE coinId = 'DAI';
DELETE FROM EnabledWallet WHERE coinId = 'DAI';
"#,
    )?;
    Ok(())
}

struct AccountSettingsRow {
    id: String,
    sync_mode: Option<String>,
    derivation: Option<String>,
}

struct WalletCoinRow {
    coin_id: String,
    sync_mode: Option<String>,
}

fn move_coin_settings_from_account_to_wallet(
    conn: &Connection,
    _prefs: &dyn PreferenceStore,
) -> Result<(), MigrationError> {
    // Accounts used to carry syncMode and derivation for all their coins.
    // Those move to the wallet rows: the account keeps only its origin
    // (derived from the legacy sync mode), the BTC wallet inherits the
    // derivation, and BTC/BCH/DASH wallets get a renormalized sync mode.
    conn.execute_batch(
        r#"
CREATE TABLE new_AccountRecord (
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
INSERT INTO new_AccountRecord (deleted, id, name, type, isBackedUp, words, salt, key, eosAccount)
  SELECT deleted, id, name, type, isBackedUp, words, salt, key, eosAccount FROM AccountRecord;

CREATE TABLE new_EnabledWallet (
  coinId TEXT NOT NULL,
  accountId TEXT NOT NULL,
  walletOrder INTEGER,
  syncMode TEXT,
  derivation TEXT,
  PRIMARY KEY(coinId, accountId),
  FOREIGN KEY(accountId) REFERENCES AccountRecord(id)
    ON UPDATE CASCADE ON DELETE CASCADE DEFERRABLE INITIALLY DEFERRED
);
INSERT INTO new_EnabledWallet (coinId, accountId, walletOrder)
  SELECT coinId, accountId, walletOrder FROM EnabledWallet;
"#,
    )?;

    // Snapshot the old tables up front; the writes below target the new
    // tables, so the scan never races its own updates.
    let accounts: Vec<AccountSettingsRow> = {
        let mut stmt = conn.prepare("SELECT id, syncMode, derivation FROM AccountRecord")?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(AccountSettingsRow {
                id: row.get(0)?,
                sync_mode: row.get(1)?,
                derivation: row.get(2)?,
            });
        }
        out
    };

    let mut account_derivation: Option<String> = None;
    for account in &accounts {
        // NULL legacy sync mode: leave the DDL default origin untouched.
        if let Some(raw) = &account.sync_mode {
            let origin = AccountOrigin::from_legacy_sync_mode(raw);
            conn.execute(
                "UPDATE new_AccountRecord SET origin = ?1 WHERE id = ?2",
                params![origin.as_str(), account.id],
            )?;
        }
        account_derivation = account.derivation.clone();
    }

    let wallets: Vec<WalletCoinRow> = {
        let mut stmt = conn.prepare("SELECT coinId, syncMode FROM EnabledWallet")?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(WalletCoinRow {
                coin_id: row.get(0)?,
                sync_mode: row.get(1)?,
            });
        }
        out
    };

    for wallet in &wallets {
        if wallet.coin_id == "BTC" {
            if let Some(derivation) = &account_derivation {
                conn.execute(
                    "UPDATE new_EnabledWallet SET derivation = ?1 WHERE coinId = ?2",
                    params![derivation, wallet.coin_id],
                )?;
            }
        }

        if matches!(wallet.coin_id.as_str(), "BTC" | "BCH" | "DASH") {
            let sync_mode = match wallet.sync_mode.as_deref() {
                Some(raw) => SyncMode::try_from_legacy(raw).unwrap_or_else(|| {
                    warn!(coin = %wallet.coin_id, raw, "unknown legacy sync mode, using default");
                    SyncMode::DEFAULT
                }),
                None => SyncMode::DEFAULT,
            };
            conn.execute(
                "UPDATE new_EnabledWallet SET syncMode = ?1 WHERE coinId = ?2",
                params![sync_mode.as_str(), wallet.coin_id],
            )?;
        }
    }

    conn.execute_batch(
        r#"
DROP TABLE AccountRecord;
DROP TABLE EnabledWallet;
ALTER TABLE new_AccountRecord RENAME TO AccountRecord;
ALTER TABLE new_EnabledWallet RENAME TO EnabledWallet;
"#,
    )?;
    Ok(())
}

fn store_bitcoin_derivation_to_preferences(
    conn: &Connection,
    prefs: &dyn PreferenceStore,
) -> Result<(), MigrationError> {
    let raw_derivations: Vec<String> = {
        let mut stmt =
            conn.prepare("SELECT derivation FROM EnabledWallet WHERE coinId = 'BTC'")?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let derivation: Option<String> = row.get(0)?;
            if let Some(derivation) = derivation {
                out.push(derivation);
            }
        }
        out
    };

    for raw in raw_derivations {
        let derivation = Derivation::try_from_legacy(&raw).unwrap_or_else(|| {
            warn!(raw = %raw, "unknown legacy derivation, using default");
            Derivation::DEFAULT
        });
        // A preference write failure must not abort the upgrade.
        if let Err(err) = prefs.set(BITCOIN_DERIVATION_PREF_KEY, derivation.as_str()) {
            warn!(error = %err, "failed to store bitcoin derivation preference");
        }
    }
    Ok(())
}

fn add_blockchain_settings_table(
    conn: &Connection,
    _prefs: &dyn PreferenceStore,
) -> Result<(), MigrationError> {
    conn.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS BlockchainSetting (
  coinType TEXT NOT NULL,
  `key` TEXT NOT NULL,
  value TEXT NOT NULL,
  PRIMARY KEY(coinType, `key`)
);
"#,
    )?;
    Ok(())
}

fn add_index_to_enabled_wallet(
    conn: &Connection,
    _prefs: &dyn PreferenceStore,
) -> Result<(), MigrationError> {
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS index_EnabledWallet_accountId ON EnabledWallet (accountId)",
    )?;
    Ok(())
}

fn update_bch_sync_mode(
    conn: &Connection,
    _prefs: &dyn PreferenceStore,
) -> Result<(), MigrationError> {
    conn.execute(
        "UPDATE BlockchainSetting SET value = ?1
         WHERE coinType = 'bitcoincash' AND `key` = 'sync_mode' AND value = ?2",
        params![SyncMode::Slow.as_str(), SyncMode::Fast.as_str()],
    )?;
    Ok(())
}

fn add_coin_record_table(
    conn: &Connection,
    _prefs: &dyn PreferenceStore,
) -> Result<(), MigrationError> {
    conn.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS CoinRecord (
  coinId TEXT NOT NULL,
  title TEXT NOT NULL,
  code TEXT NOT NULL,
  decimal INTEGER NOT NULL,
  tokenType TEXT NOT NULL,
  erc20Address TEXT,
  PRIMARY KEY(coinId)
);
"#,
    )?;
    Ok(())
}

fn remove_rate_table(
    conn: &Connection,
    _prefs: &dyn PreferenceStore,
) -> Result<(), MigrationError> {
    conn.execute_batch("DROP TABLE IF EXISTS Rate")?;
    Ok(())
}

fn add_logs_table(conn: &Connection, _prefs: &dyn PreferenceStore) -> Result<(), MigrationError> {
    conn.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS LogEntry (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  date INTEGER NOT NULL,
  level INTEGER NOT NULL,
  actionId TEXT NOT NULL,
  message TEXT NOT NULL
);
"#,
    )?;
    Ok(())
}

fn update_ethereum_communication_mode(
    conn: &Connection,
    _prefs: &dyn PreferenceStore,
) -> Result<(), MigrationError> {
    conn.execute(
        "UPDATE BlockchainSetting SET value = ?1
         WHERE coinType = 'ethereum' AND `key` = 'communication' AND value = ?2",
        params![
            CommunicationMode::Infura.as_str(),
            CommunicationMode::Incubed.as_str()
        ],
    )?;
    Ok(())
}

fn add_birthday_height_to_account(
    conn: &Connection,
    _prefs: &dyn PreferenceStore,
) -> Result<(), MigrationError> {
    if !column_exists(conn, "AccountRecord", "birthdayHeight")? {
        conn.execute_batch("ALTER TABLE AccountRecord ADD COLUMN birthdayHeight INTEGER")?;
    }
    Ok(())
}

fn add_bep2_symbol_to_coin_record(
    conn: &Connection,
    _prefs: &dyn PreferenceStore,
) -> Result<(), MigrationError> {
    if !column_exists(conn, "CoinRecord", "bep2Symbol")? {
        conn.execute_batch("ALTER TABLE CoinRecord ADD COLUMN bep2Symbol TEXT")?;
    }
    Ok(())
}

fn add_favorite_coins_table(
    conn: &Connection,
    _prefs: &dyn PreferenceStore,
) -> Result<(), MigrationError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS FavoriteCoin (id INTEGER PRIMARY KEY AUTOINCREMENT, code TEXT NOT NULL)",
    )?;

    // Bitcoin Cash wallets that predate the network split keep the original
    // chain; record that once if any BCH wallet exists.
    let bch_wallets: i64 = conn.query_row(
        "SELECT COUNT(*) FROM EnabledWallet WHERE coinId = 'BCH'",
        [],
        |row| row.get(0),
    )?;
    if bch_wallets > 0 {
        conn.execute(
            "INSERT INTO BlockchainSetting (coinType, `key`, value)
             VALUES ('bitcoincash', 'network_coin_type', 'type0')",
            [],
        )?;
    }
    Ok(())
}

fn delete_eos_from_account_record(
    conn: &Connection,
    _prefs: &dyn PreferenceStore,
) -> Result<(), MigrationError> {
    // EOS support was removed: the eosAccount column goes away and eos-typed
    // accounts are not carried over, nor are their enabled wallets.
    // Create-copy-drop-rename, since the engine cannot drop a column directly.
    conn.execute_batch(
        r#"
CREATE TABLE new_AccountRecord (
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
INSERT INTO new_AccountRecord (deleted, id, name, type, origin, isBackedUp, words, salt, key, birthdayHeight)
  SELECT deleted, id, name, type, origin, isBackedUp, words, salt, key, birthdayHeight FROM AccountRecord
  WHERE type != 'eos';
DROP TABLE AccountRecord;
ALTER TABLE new_AccountRecord RENAME TO AccountRecord;
DELETE FROM EnabledWallet WHERE accountId NOT IN (SELECT id FROM AccountRecord);
"#,
    )?;
    Ok(())
}

fn add_wallet_connect_session_table(
    conn: &Connection,
    _prefs: &dyn PreferenceStore,
) -> Result<(), MigrationError> {
    conn.execute_batch(
        r#"
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
"#,
    )?;
    Ok(())
}

fn remove_coin_record_table(
    conn: &Connection,
    _prefs: &dyn PreferenceStore,
) -> Result<(), MigrationError> {
    conn.execute_batch("DROP TABLE IF EXISTS CoinRecord")?;
    Ok(())
}

fn rebuild_favorite_coins_keyed_by_coin_type(
    conn: &Connection,
    _prefs: &dyn PreferenceStore,
) -> Result<(), MigrationError> {
    // Favorites switch from ticker codes to coin types; the old markers are
    // not translatable, so the table starts over.
    conn.execute_batch(
        r#"
DROP TABLE IF EXISTS FavoriteCoin;
CREATE TABLE FavoriteCoin (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  coinType TEXT NOT NULL
);
"#,
    )?;
    Ok(())
}
