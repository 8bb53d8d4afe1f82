//! SQLite persistence for user accounting records.
//!
//! One row per user. Compare-and-update is a single conditional `UPDATE`
//! on `(id, revision)`; SQLite serializes writers, so the affected-row count
//! tells us whether we won.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};

use amftpd_types::{User, UserId};

use super::{StoreError, StoreResult, UpdateOutcome, UserStore};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    credits_kb INTEGER NOT NULL DEFAULT 0,
    no_ratio INTEGER NOT NULL DEFAULT 0,
    group_name TEXT,
    revision INTEGER NOT NULL DEFAULT 0,
    updated_at INTEGER DEFAULT (unixepoch())
);
"#;

const SELECT_USER: &str =
    "SELECT id, name, credits_kb, no_ratio, group_name, revision FROM users";

/// SQLite-backed user store.
pub struct SqliteUserStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteUserStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteUserStore")
            .field("conn", &"<locked>")
            .finish()
    }
}

/// Raw column values before validation.
struct UserRow {
    id: String,
    name: String,
    credits_kb: i64,
    no_ratio: bool,
    group_name: Option<String>,
    revision: i64,
}

impl UserRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            credits_kb: row.get(2)?,
            no_ratio: row.get(3)?,
            group_name: row.get(4)?,
            revision: row.get(5)?,
        })
    }

    fn into_user(self) -> StoreResult<User> {
        let corrupt = |reason: &str| StoreError::Corrupt {
            id: self.id.clone(),
            reason: reason.to_string(),
        };
        let id = UserId::parse(&self.id).map_err(|_| corrupt("malformed id"))?;
        let credits_kb = u64::try_from(self.credits_kb).map_err(|_| corrupt("negative credits"))?;
        let revision = u64::try_from(self.revision).map_err(|_| corrupt("negative revision"))?;
        Ok(User::from_parts(
            id,
            self.name,
            credits_kb,
            self.no_ratio,
            self.group_name,
            revision,
        ))
    }
}

fn to_sql_int(value: u64, what: &str) -> StoreResult<i64> {
    i64::try_from(value).map_err(|_| StoreError::Other(format!("{what} out of range: {value}")))
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation
    )
}

impl SqliteUserStore {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn shared(self) -> Arc<dyn UserStore> {
        Arc::new(self)
    }

    fn select_one(conn: &Connection, clause: &str, key: &str) -> StoreResult<Option<User>> {
        let sql = format!("{SELECT_USER} WHERE {clause} = ?1");
        let row = conn
            .query_row(&sql, params![key], UserRow::from_row)
            .optional()?;
        row.map(UserRow::into_user).transpose()
    }
}

#[async_trait]
impl UserStore for SqliteUserStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn get_user(&self, id: UserId) -> StoreResult<Option<User>> {
        let conn = self.conn.lock();
        Self::select_one(&conn, "id", &id.to_string())
    }

    async fn find_user(&self, name: &str) -> StoreResult<Option<User>> {
        let conn = self.conn.lock();
        Self::select_one(&conn, "name", name)
    }

    async fn insert_user(&self, user: User) -> StoreResult<User> {
        let conn = self.conn.lock();
        let result = conn.execute(
            "INSERT INTO users (id, name, credits_kb, no_ratio, group_name, revision)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                user.id().to_string(),
                user.name(),
                to_sql_int(user.credits_kb(), "credits")?,
                user.is_no_ratio(),
                user.group(),
                to_sql_int(user.revision(), "revision")?,
            ],
        );
        match result {
            Ok(_) => Ok(user),
            Err(e) if is_constraint_violation(&e) => {
                Err(StoreError::AlreadyExists(user.name().to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_users(&self) -> StoreResult<Vec<User>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!("{SELECT_USER} ORDER BY name"))?;
        let rows = stmt.query_map([], UserRow::from_row)?;
        rows.map(|row| row.map_err(StoreError::from).and_then(UserRow::into_user))
            .collect()
    }

    async fn try_update_user(&self, user: User) -> StoreResult<UpdateOutcome> {
        let conn = self.conn.lock();
        let id = user.id().to_string();
        let changed = conn.execute(
            "UPDATE users
             SET credits_kb = ?1, no_ratio = ?2, group_name = ?3,
                 revision = revision + 1, updated_at = unixepoch()
             WHERE id = ?4 AND revision = ?5",
            params![
                to_sql_int(user.credits_kb(), "credits")?,
                user.is_no_ratio(),
                user.group(),
                id,
                to_sql_int(user.revision(), "revision")?,
            ],
        )?;

        if changed == 1 {
            Ok(UpdateOutcome::Committed(user.next_revision()))
        } else {
            let current = Self::select_one(&conn, "id", &id)?;
            Ok(UpdateOutcome::Conflict { current })
        }
    }
}
