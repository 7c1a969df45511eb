/// Credential store: salted password records keyed by unique login.
///
/// Passwords are stored as PBKDF2-HMAC-SHA512 derived keys next to a random
/// per-user salt. The defaults (100000 rounds, 128-byte key, 32-byte salt)
/// and the `users` table layout are a compatibility contract with existing
/// databases; only tests should lower the round count.
///
/// All calls are synchronous. Dispatch runs them inline, so a hash
/// computation stalls the event loop for its duration. A deployment with
/// many concurrent logins would move hashing to a blocking worker pool.
use std::path::Path;

use chrono::Local;
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use rusqlite::{params, Connection, OptionalExtension};
use sha2::Sha512;

/// Timestamp layout of `last_joined` / `date_joined`.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS users (
        id integer PRIMARY KEY AUTOINCREMENT NOT NULL,
        login varchar(255) NOT NULL,
        password varchar(128) NOT NULL,
        salt varchar(32) NOT NULL,
        last_joined datetime NOT NULL,
        date_joined datetime NOT NULL
    );
    CREATE UNIQUE INDEX IF NOT EXISTS users_login ON users(login);
";

/// Errors from the persistent store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("login already exists: {0}")]
    Duplicate(String),
}

/// A persisted login identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    pub id: i64,
    pub login: String,
    pub password_hash: Vec<u8>,
    pub salt: Vec<u8>,
    pub last_joined: String,
    pub date_joined: String,
}

/// Key-derivation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashParams {
    pub iterations: u32,
    pub key_len: usize,
    pub salt_len: usize,
}

impl Default for HashParams {
    fn default() -> Self {
        Self {
            iterations: 100_000,
            key_len: 128,
            salt_len: 32,
        }
    }
}

impl HashParams {
    /// Derive the stored key for `password` under `salt`.
    pub fn derive(&self, password: &str, salt: &[u8]) -> Vec<u8> {
        let mut key = vec![0u8; self.key_len];
        pbkdf2_hmac::<Sha512>(password.as_bytes(), salt, self.iterations, &mut key);
        key
    }

    /// A fresh random salt of `salt_len` bytes.
    pub fn generate_salt(&self) -> Vec<u8> {
        let mut salt = vec![0u8; self.salt_len];
        rand::thread_rng().fill_bytes(&mut salt);
        salt
    }
}

/// Operations the event loop needs from credential persistence.
pub trait CredentialStore {
    /// Look up a record by login.
    fn find(&self, login: &str) -> Result<Option<CredentialRecord>, StoreError>;

    /// Does `password` hash to the stored key?
    fn verify(&self, record: &CredentialRecord, password: &str) -> bool;

    /// Create a record with a fresh salt. Fails if the login exists.
    fn create(&mut self, login: &str, password: &str) -> Result<CredentialRecord, StoreError>;

    /// Stamp the record's last-seen time with the current time.
    fn touch_last_seen(&mut self, id: i64) -> Result<(), StoreError>;
}

/// SQLite-backed credential store.
#[derive(Debug)]
pub struct SqliteCredentialStore {
    conn: Connection,
    params: HashParams,
}

impl SqliteCredentialStore {
    /// Open (or create) the database file and ensure the schema exists.
    pub fn open(path: impl AsRef<Path>, params: HashParams) -> Result<Self, StoreError> {
        Self::init(Connection::open(path)?, params)
    }

    /// A throwaway in-memory database.
    pub fn open_in_memory(params: HashParams) -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?, params)
    }

    fn init(conn: Connection, params: HashParams) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn, params })
    }

    /// Number of stored records.
    pub fn count(&self) -> Result<u64, StoreError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok(n as u64)
    }
}

fn now() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

impl CredentialStore for SqliteCredentialStore {
    fn find(&self, login: &str) -> Result<Option<CredentialRecord>, StoreError> {
        let record = self
            .conn
            .query_row(
                "SELECT id, login, password, salt, last_joined, date_joined
                 FROM users WHERE login = ?1",
                params![login],
                |row| {
                    Ok(CredentialRecord {
                        id: row.get(0)?,
                        login: row.get(1)?,
                        password_hash: row.get(2)?,
                        salt: row.get(3)?,
                        last_joined: row.get(4)?,
                        date_joined: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    fn verify(&self, record: &CredentialRecord, password: &str) -> bool {
        let params = HashParams {
            key_len: record.password_hash.len(),
            ..self.params
        };
        params.derive(password, &record.salt) == record.password_hash
    }

    fn create(&mut self, login: &str, password: &str) -> Result<CredentialRecord, StoreError> {
        if self.find(login)?.is_some() {
            return Err(StoreError::Duplicate(login.to_owned()));
        }

        let salt = self.params.generate_salt();
        let password_hash = self.params.derive(password, &salt);
        let stamp = now();

        self.conn.execute(
            "INSERT INTO users(login, password, salt, last_joined, date_joined)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![login, password_hash, salt, stamp, stamp],
        )?;

        Ok(CredentialRecord {
            id: self.conn.last_insert_rowid(),
            login: login.to_owned(),
            password_hash,
            salt,
            last_joined: stamp.clone(),
            date_joined: stamp,
        })
    }

    fn touch_last_seen(&mut self, id: i64) -> Result<(), StoreError> {
        self.conn.execute(
            "UPDATE users SET last_joined = ?1 WHERE id = ?2",
            params![now(), id],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> HashParams {
        HashParams {
            iterations: 2,
            ..HashParams::default()
        }
    }

    fn store() -> SqliteCredentialStore {
        SqliteCredentialStore::open_in_memory(fast()).unwrap()
    }

    #[test]
    fn default_params_match_stored_format() {
        let p = HashParams::default();
        assert_eq!(p.iterations, 100_000);
        assert_eq!(p.key_len, 128);
        assert_eq!(p.salt_len, 32);
    }

    #[test]
    fn derive_is_deterministic_per_salt() {
        let p = fast();
        let a = p.derive("pw1", b"salt-a");
        assert_eq!(a.len(), 128);
        assert_eq!(a, p.derive("pw1", b"salt-a"));
        assert_ne!(a, p.derive("pw1", b"salt-b"));
        assert_ne!(a, p.derive("pw2", b"salt-a"));
    }

    #[test]
    fn generated_salts_differ() {
        let p = fast();
        let a = p.generate_salt();
        assert_eq!(a.len(), 32);
        assert_ne!(a, p.generate_salt());
    }

    #[test]
    fn create_then_find() {
        let mut store = store();
        let created = store.create("alice", "pw1").unwrap();
        let found = store.find("alice").unwrap().unwrap();
        assert_eq!(created, found);
        assert_eq!(found.salt.len(), 32);
        assert_eq!(found.password_hash.len(), 128);
    }

    #[test]
    fn find_missing_login() {
        assert!(store().find("nobody").unwrap().is_none());
    }

    #[test]
    fn verify_checks_password() {
        let mut store = store();
        let record = store.create("alice", "pw1").unwrap();
        assert!(store.verify(&record, "pw1"));
        assert!(!store.verify(&record, "pw2"));
        assert!(!store.verify(&record, ""));
    }

    #[test]
    fn create_rejects_duplicate_login() {
        let mut store = store();
        store.create("alice", "pw1").unwrap();
        let err = store.create("alice", "other").unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(ref l) if l == "alice"));
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn touch_updates_last_joined_only() {
        let mut store = store();
        let record = store.create("alice", "pw1").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        store.touch_last_seen(record.id).unwrap();
        let after = store.find("alice").unwrap().unwrap();
        assert_eq!(after.date_joined, record.date_joined);
        assert_ne!(after.last_joined, record.last_joined);
    }

    #[test]
    fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.sqlite3");
        {
            let mut store = SqliteCredentialStore::open(&path, fast()).unwrap();
            store.create("alice", "pw1").unwrap();
        }
        let store = SqliteCredentialStore::open(&path, fast()).unwrap();
        let record = store.find("alice").unwrap().unwrap();
        assert!(store.verify(&record, "pw1"));
    }
}
