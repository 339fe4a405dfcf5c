use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::warn;

use crate::preferences::{FilePreferences, PreferenceStore};

pub mod legacy;
pub mod migrations;
pub mod schema;


pub use migrations::{FallbackPolicy, MigrationError, BITCOIN_DERIVATION_PREF_KEY};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountRecord {
    pub id: String,
    pub name: String,
    pub account_type: String,
    pub origin: String,
    pub is_backed_up: bool,
    pub words: Option<String>,
    pub salt: Option<String>,
    pub key: Option<String>,
    pub birthday_height: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnabledWalletRecord {
    pub coin_id: String,
    pub account_id: String,
    pub wallet_order: Option<i64>,
    pub sync_mode: Option<String>,
    pub derivation: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockchainSettingRecord {
    pub coin_type: String,
    pub key: String,
    pub value: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WalletConnectSessionRecord {
    pub chain_id: i64,
    pub account_id: String,
    pub session: String,
    pub peer_id: String,
    pub remote_peer_id: String,
    pub remote_peer_meta: String,
    pub is_auto_sign: bool,
    pub date: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEntryRecord {
    pub id: i64,
    pub date: i64,
    pub level: i64,
    pub action_id: String,
    pub message: String,
}

fn db_path(app_dir: &Path) -> PathBuf {
    app_dir.join("wallet.sqlite3")
}

fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(i64::MAX)
}

fn open_connection(app_dir: &Path) -> Result<Connection> {
    fs::create_dir_all(app_dir)?;
    let conn = Connection::open(db_path(app_dir))?;
    conn.busy_timeout(Duration::from_millis(5_000))?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    Ok(conn)
}

/// Opens (or creates) the store and brings it to the latest schema version.
/// Testing-grade open; production code goes through `shared`.
pub fn open(app_dir: &Path) -> Result<Connection> {
    let prefs = FilePreferences::new(app_dir);
    open_with(app_dir, &prefs, FallbackPolicy::Fail)
}

pub fn open_with(
    app_dir: &Path,
    prefs: &dyn PreferenceStore,
    policy: FallbackPolicy,
) -> Result<Connection> {
    let conn = open_connection(app_dir)?;
    match migrations::run(&conn, prefs) {
        Ok(()) => Ok(conn),
        Err(err) if policy == FallbackPolicy::DestructiveRecreate => {
            warn!(error = %err, "migration failed, discarding store and recreating");
            drop(conn);
            remove_store_files(app_dir)?;
            let conn = open_connection(app_dir)?;
            schema::create_latest(&conn).context("recreate store from schema registry")?;
            Ok(conn)
        }
        Err(err) => Err(err).context("database migration failed"),
    }
}

fn remove_store_files(app_dir: &Path) -> Result<()> {
    let path = db_path(app_dir);
    for suffix in ["", "-wal", "-shm"] {
        let mut file = path.clone().into_os_string();
        file.push(suffix);
        let file = PathBuf::from(file);
        if file.exists() {
            fs::remove_file(&file)
                .with_context(|| format!("remove store file {}", file.display()))?;
        }
    }
    Ok(())
}

/// Process-wide handle over the single store connection.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn lock(&self) -> MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

enum HandleState {
    NotOpened,
    Ready(Arc<Database>),
    Failed(String),
}

/// Acquires the shared database handle, constructing it (and running any
/// pending migrations) exactly once. Concurrent first callers block until the
/// store is ready or failed; a failed first open is terminal for the process.
pub fn shared(app_dir: &Path) -> Result<Arc<Database>> {
    static STATE: OnceLock<Mutex<HandleState>> = OnceLock::new();
    let state = STATE.get_or_init(|| Mutex::new(HandleState::NotOpened));

    let mut guard = match state.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    };
    match &*guard {
        HandleState::Ready(db) => return Ok(db.clone()),
        HandleState::Failed(message) => {
            return Err(anyhow!("wallet store unavailable: {message}"))
        }
        HandleState::NotOpened => {}
    }

    match open(app_dir) {
        Ok(conn) => {
            let db = Arc::new(Database {
                conn: Mutex::new(conn),
            });
            *guard = HandleState::Ready(db.clone());
            Ok(db)
        }
        Err(err) => {
            *guard = HandleState::Failed(format!("{err:#}"));
            Err(err)
        }
    }
}

// --- accounts ---

pub fn insert_account(conn: &Connection, account: &AccountRecord) -> Result<()> {
    conn.execute(
        r#"INSERT OR REPLACE INTO AccountRecord
           (deleted, id, name, type, origin, isBackedUp, words, salt, key, birthdayHeight)
           VALUES (0, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"#,
        params![
            account.id,
            account.name,
            account.account_type,
            account.origin,
            account.is_backed_up,
            account.words,
            account.salt,
            account.key,
            account.birthday_height,
        ],
    )?;
    Ok(())
}

fn account_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AccountRecord> {
    Ok(AccountRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        account_type: row.get(2)?,
        origin: row.get(3)?,
        is_backed_up: row.get(4)?,
        words: row.get(5)?,
        salt: row.get(6)?,
        key: row.get(7)?,
        birthday_height: row.get(8)?,
    })
}

pub fn get_account(conn: &Connection, id: &str) -> Result<Option<AccountRecord>> {
    let account = conn
        .query_row(
            r#"SELECT id, name, type, origin, isBackedUp, words, salt, key, birthdayHeight
               FROM AccountRecord WHERE id = ?1 AND deleted = 0"#,
            params![id],
            account_from_row,
        )
        .optional()?;
    Ok(account)
}

pub fn list_accounts(conn: &Connection) -> Result<Vec<AccountRecord>> {
    let mut stmt = conn.prepare(
        r#"SELECT id, name, type, origin, isBackedUp, words, salt, key, birthdayHeight
           FROM AccountRecord WHERE deleted = 0 ORDER BY id"#,
    )?;
    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(account_from_row(row)?);
    }
    Ok(out)
}

/// Removes the account row; enabled wallets cascade away with it.
pub fn delete_account(conn: &Connection, id: &str) -> Result<()> {
    conn.execute("DELETE FROM AccountRecord WHERE id = ?1", params![id])?;
    Ok(())
}

// --- enabled wallets ---

/// Replaces the full wallet set of one account in a single unit of work.
pub fn replace_enabled_wallets(
    conn: &Connection,
    account_id: &str,
    wallets: &[EnabledWalletRecord],
) -> Result<()> {
    conn.execute_batch("BEGIN IMMEDIATE;")?;

    let result: Result<()> = (|| {
        conn.execute(
            "DELETE FROM EnabledWallet WHERE accountId = ?1",
            params![account_id],
        )?;
        for wallet in wallets {
            conn.execute(
                r#"INSERT INTO EnabledWallet (coinId, accountId, walletOrder, syncMode, derivation)
                   VALUES (?1, ?2, ?3, ?4, ?5)"#,
                params![
                    wallet.coin_id,
                    account_id,
                    wallet.wallet_order,
                    wallet.sync_mode,
                    wallet.derivation,
                ],
            )?;
        }
        Ok(())
    })();

    match result {
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

pub fn list_enabled_wallets(conn: &Connection, account_id: &str) -> Result<Vec<EnabledWalletRecord>> {
    let mut stmt = conn.prepare(
        r#"SELECT coinId, accountId, walletOrder, syncMode, derivation
           FROM EnabledWallet WHERE accountId = ?1 ORDER BY walletOrder"#,
    )?;
    let mut rows = stmt.query(params![account_id])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(EnabledWalletRecord {
            coin_id: row.get(0)?,
            account_id: row.get(1)?,
            wallet_order: row.get(2)?,
            sync_mode: row.get(3)?,
            derivation: row.get(4)?,
        });
    }
    Ok(out)
}

// --- blockchain settings ---

pub fn save_blockchain_setting(conn: &Connection, setting: &BlockchainSettingRecord) -> Result<()> {
    conn.execute(
        r#"INSERT OR REPLACE INTO BlockchainSetting (coinType, `key`, value) VALUES (?1, ?2, ?3)"#,
        params![setting.coin_type, setting.key, setting.value],
    )?;
    Ok(())
}

pub fn get_blockchain_setting(
    conn: &Connection,
    coin_type: &str,
    key: &str,
) -> Result<Option<BlockchainSettingRecord>> {
    let setting = conn
        .query_row(
            r#"SELECT coinType, `key`, value FROM BlockchainSetting
               WHERE coinType = ?1 AND `key` = ?2"#,
            params![coin_type, key],
            |row| {
                Ok(BlockchainSettingRecord {
                    coin_type: row.get(0)?,
                    key: row.get(1)?,
                    value: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(setting)
}

// --- wallet connect sessions ---

pub fn save_wc_session(conn: &Connection, session: &WalletConnectSessionRecord) -> Result<()> {
    conn.execute(
        r#"INSERT OR REPLACE INTO WalletConnectSession
           (chainId, accountId, session, peerId, remotePeerId, remotePeerMeta, isAutoSign, date)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
        params![
            session.chain_id,
            session.account_id,
            session.session,
            session.peer_id,
            session.remote_peer_id,
            session.remote_peer_meta,
            session.is_auto_sign,
            session.date,
        ],
    )?;
    Ok(())
}

pub fn get_wc_session(
    conn: &Connection,
    remote_peer_id: &str,
) -> Result<Option<WalletConnectSessionRecord>> {
    let session = conn
        .query_row(
            r#"SELECT chainId, accountId, session, peerId, remotePeerId, remotePeerMeta, isAutoSign, date
               FROM WalletConnectSession WHERE remotePeerId = ?1"#,
            params![remote_peer_id],
            |row| {
                Ok(WalletConnectSessionRecord {
                    chain_id: row.get(0)?,
                    account_id: row.get(1)?,
                    session: row.get(2)?,
                    peer_id: row.get(3)?,
                    remote_peer_id: row.get(4)?,
                    remote_peer_meta: row.get(5)?,
                    is_auto_sign: row.get(6)?,
                    date: row.get(7)?,
                })
            },
        )
        .optional()?;
    Ok(session)
}

pub fn delete_wc_session(conn: &Connection, remote_peer_id: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM WalletConnectSession WHERE remotePeerId = ?1",
        params![remote_peer_id],
    )?;
    Ok(())
}

// --- logs ---

pub fn insert_log(conn: &Connection, level: i64, action_id: &str, message: &str) -> Result<()> {
    conn.execute(
        r#"INSERT INTO LogEntry (date, level, actionId, message) VALUES (?1, ?2, ?3, ?4)"#,
        params![now_ms(), level, action_id, message],
    )?;
    Ok(())
}

pub fn list_logs(conn: &Connection) -> Result<Vec<LogEntryRecord>> {
    let mut stmt =
        conn.prepare("SELECT id, date, level, actionId, message FROM LogEntry ORDER BY id")?;
    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(LogEntryRecord {
            id: row.get(0)?,
            date: row.get(1)?,
            level: row.get(2)?,
            action_id: row.get(3)?,
            message: row.get(4)?,
        });
    }
    Ok(out)
}

// --- favorite coins ---

pub fn add_favorite_coin(conn: &Connection, coin_type: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO FavoriteCoin (coinType) VALUES (?1)",
        params![coin_type],
    )?;
    Ok(())
}

pub fn list_favorite_coins(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT coinType FROM FavoriteCoin ORDER BY id")?;
    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(row.get(0)?);
    }
    Ok(out)
}

pub fn remove_favorite_coin(conn: &Connection, coin_type: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM FavoriteCoin WHERE coinType = ?1",
        params![coin_type],
    )?;
    Ok(())
}
