//! Key-value backends the schema layer is written against.
//!
//! The wasm component talks to the Spin key-value store, the native server
//! keeps a single SQLite table, and tests use [`MemoryStore`].

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Mutex;

/// Body of an atomic section. It receives a view of the store that must be
/// used for every read and write inside the section.
pub type AtomicBody<'f> = dyn FnMut(&dyn KvStore) -> anyhow::Result<()> + 'f;

pub trait KvStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;
    fn set(&self, key: &str, value: &[u8]) -> anyhow::Result<()>;
    fn delete(&self, key: &str) -> anyhow::Result<()>;

    /// Runs `body` with exclusive access. No other writer interleaves with
    /// it, and when it returns an error none of its writes are kept.
    /// Calling this on the view handed to `body` just runs the nested body.
    fn atomically(&self, body: &mut AtomicBody<'_>) -> anyhow::Result<()>;
}

#[cfg(target_arch = "wasm32")]
impl KvStore for spin_sdk::key_value::Store {
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(spin_sdk::key_value::Store::get(self, key)?)
    }

    fn set(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        Ok(spin_sdk::key_value::Store::set(self, key, value)?)
    }

    fn delete(&self, key: &str) -> anyhow::Result<()> {
        Ok(spin_sdk::key_value::Store::delete(self, key)?)
    }

    // The Spin key-value API has no transactions; writes land as they are made.
    fn atomically(&self, body: &mut AtomicBody<'_>) -> anyhow::Result<()> {
        body(self)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> anyhow::Result<std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>>> {
        self.entries
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.entries()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        self.entries()?.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.entries()?.remove(key);
        Ok(())
    }

    fn atomically(&self, body: &mut AtomicBody<'_>) -> anyhow::Result<()> {
        let mut entries = self.entries()?;
        let staged = Staged(RefCell::new(entries.clone()));
        body(&staged)?;
        *entries = staged.0.into_inner();
        Ok(())
    }
}

/// Copy of the memory map an atomic section works on while the lock is held.
struct Staged(RefCell<HashMap<String, Vec<u8>>>);

impl KvStore for Staged {
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.0.borrow().get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        self.0.borrow_mut().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.0.borrow_mut().remove(key);
        Ok(())
    }

    fn atomically(&self, body: &mut AtomicBody<'_>) -> anyhow::Result<()> {
        body(self)
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub use self::sqlite::SqliteStore;

#[cfg(not(target_arch = "wasm32"))]
mod sqlite {
    use std::sync::Mutex;
    use std::time::Duration;

    use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

    use super::{AtomicBody, KvStore};

    const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS kv (
        key   TEXT PRIMARY KEY,
        value BLOB NOT NULL
    )";

    fn get(conn: &Connection, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get::<_, Vec<u8>>(0)
            })
            .optional()?;
        Ok(value)
    }

    fn set(conn: &Connection, key: &str, value: &[u8]) -> anyhow::Result<()> {
        conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn delete(conn: &Connection, key: &str) -> anyhow::Result<()> {
        conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }

    /// Durable backend for the native server.
    pub struct SqliteStore {
        conn: Mutex<Connection>,
    }

    impl SqliteStore {
        pub fn open(path: &str) -> anyhow::Result<Self> {
            let conn = Connection::open(path)?;
            conn.busy_timeout(Duration::from_secs(5))?;
            conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))?;
            Self::init(conn)
        }

        pub fn open_in_memory() -> anyhow::Result<Self> {
            Self::init(Connection::open_in_memory()?)
        }

        fn init(conn: Connection) -> anyhow::Result<Self> {
            conn.execute(SCHEMA, [])?;
            Ok(Self { conn: Mutex::new(conn) })
        }

        fn conn(&self) -> anyhow::Result<std::sync::MutexGuard<'_, Connection>> {
            self.conn
                .lock()
                .map_err(|_| anyhow::anyhow!("sqlite connection lock poisoned"))
        }
    }

    impl KvStore for SqliteStore {
        fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
            get(&*self.conn()?, key)
        }

        fn set(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
            set(&*self.conn()?, key, value)
        }

        fn delete(&self, key: &str) -> anyhow::Result<()> {
            delete(&*self.conn()?, key)
        }

        /// Holds the connection for the whole body inside a `BEGIN IMMEDIATE`
        /// transaction. Dropping the transaction on error rolls it back.
        fn atomically(&self, body: &mut AtomicBody<'_>) -> anyhow::Result<()> {
            let mut conn = self.conn()?;
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            body(&InTransaction(&tx))?;
            tx.commit()?;
            Ok(())
        }
    }

    struct InTransaction<'c>(&'c Connection);

    impl KvStore for InTransaction<'_> {
        fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
            get(self.0, key)
        }

        fn set(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
            set(self.0, key, value)
        }

        fn delete(&self, key: &str) -> anyhow::Result<()> {
            delete(self.0, key)
        }

        fn atomically(&self, body: &mut AtomicBody<'_>) -> anyhow::Result<()> {
            body(self)
        }
    }
}
