//! Database connection management.

use std::{
    path::Path,
    sync::{Arc, Mutex, MutexGuard},
};

use diesel::{sql_query, Connection, ConnectionError, RunQueryDsl, SqliteConnection};

use crate::{
    error::{DbError, Result},
    migration::apply_migrations,
};

/// Database connection wrapper with migration support.
pub struct DbConnection {
    conn: SqliteConnection,
}

impl DbConnection {
    /// Opens a database connection and runs migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails or migrations fail.
    pub fn open<P: AsRef<Path>>(path: P) -> std::result::Result<Self, ConnectionError> {
        let path_str = path.as_ref().to_string_lossy();
        let conn = SqliteConnection::establish(&path_str)?;
        Self::init(conn, true)
    }

    /// Opens a private in-memory database, mostly useful for tests.
    pub fn open_in_memory() -> std::result::Result<Self, ConnectionError> {
        let conn = SqliteConnection::establish(":memory:")?;
        Self::init(conn, false)
    }

    fn init(mut conn: SqliteConnection, wal: bool) -> std::result::Result<Self, ConnectionError> {
        let bad = |e: diesel::result::Error| ConnectionError::BadConnection(e.to_string());

        if wal {
            // WAL mode for better concurrent access
            sql_query("PRAGMA journal_mode = WAL;")
                .execute(&mut conn)
                .map_err(bad)?;
        }
        sql_query("PRAGMA foreign_keys = ON;")
            .execute(&mut conn)
            .map_err(bad)?;
        sql_query("PRAGMA busy_timeout = 5000;")
            .execute(&mut conn)
            .map_err(bad)?;

        apply_migrations(&mut conn).map_err(|e| ConnectionError::BadConnection(e.to_string()))?;

        Ok(Self { conn })
    }

    /// Gets a mutable reference to the underlying connection.
    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut self.conn
    }
}

impl std::ops::Deref for DbConnection {
    type Target = SqliteConnection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl std::ops::DerefMut for DbConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}

/// Thread-safe handle to the droidrepo database.
///
/// Cloning is cheap; all clones share one connection. The lock is only held for the duration of
/// a single call, so long-running work such as downloads never blocks other users.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<DbConnection>>,
}

impl Database {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = DbConnection::open(path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = DbConnection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Locks the connection and returns the guard.
    pub fn conn(&self) -> Result<MutexGuard<'_, DbConnection>> {
        self.conn.lock().map_err(|_| DbError::PoisonError)
    }

    /// Executes a function with the connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T>,
    {
        let mut conn = self.conn()?;
        f(conn.conn())
    }

    /// Executes a function within a transaction.
    ///
    /// Any error rolls the transaction back. Calls nested inside `f` that open their own
    /// transaction run as savepoints of this one.
    pub fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T>,
    {
        let mut conn = self.conn()?;
        conn.conn().transaction(f)
    }
}
