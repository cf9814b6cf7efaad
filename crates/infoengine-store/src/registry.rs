//! Person registry backed by SQLite.

use crate::StoreError;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::path::Path;

// AUTOINCREMENT keeps ids monotonic: a deleted id is never handed out again.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS people (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT NOT NULL,
    info        TEXT NOT NULL,
    enrolled_at TEXT NOT NULL
);
"#;

/// An enrolled person.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Person {
    pub id: i64,
    pub name: String,
    pub info: String,
    pub enrolled_at: DateTime<Utc>,
}

impl Person {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let enrolled_at: String = row.get(3)?;
        let enrolled_at = DateTime::parse_from_rfc3339(&enrolled_at)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?
            .with_timezone(&Utc);

        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            info: row.get(2)?,
            enrolled_at,
        })
    }
}

pub struct PersonRegistry {
    conn: Connection,
}

impl PersonRegistry {
    /// Open (or create) the registry database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Insert a new person and return its id.
    pub fn create(&mut self, name: &str, info: &str) -> Result<i64, StoreError> {
        self.create_with(name, info, |_| Ok(())).map(|person| person.id)
    }

    /// Insert a new person, then run `attach` with the new id before committing.
    ///
    /// The row is only committed when `attach` succeeds. On error the insert
    /// is rolled back and the error from `attach` is returned.
    pub fn create_with<F, E>(&mut self, name: &str, info: &str, attach: F) -> Result<Person, E>
    where
        F: FnOnce(i64) -> Result<(), E>,
        E: From<StoreError>,
    {
        let name = name.trim();
        let info = info.trim();
        if name.is_empty() {
            return Err(StoreError::Validation("name").into());
        }
        if info.is_empty() {
            return Err(StoreError::Validation("info").into());
        }

        let tx = self.conn.transaction().map_err(StoreError::from)?;
        let enrolled_at = Utc::now().trunc_subsecs(3);
        tx.execute(
            "INSERT INTO people (name, info, enrolled_at) VALUES (?1, ?2, ?3)",
            params![name, info, enrolled_at.to_rfc3339_opts(SecondsFormat::Millis, true)],
        )
        .map_err(StoreError::from)?;
        let id = tx.last_insert_rowid();

        // Dropping `tx` on the error path rolls the insert back.
        attach(id)?;

        tx.commit().map_err(StoreError::from)?;
        tracing::debug!(id, name, "person registered");
        Ok(Person {
            id,
            name: name.to_string(),
            info: info.to_string(),
            enrolled_at,
        })
    }

    pub fn get(&self, id: i64) -> Result<Option<Person>, StoreError> {
        let person = self
            .conn
            .query_row(
                "SELECT id, name, info, enrolled_at FROM people WHERE id = ?1",
                [id],
                Person::from_row,
            )
            .optional()?;
        Ok(person)
    }

    /// Every person, ordered by id.
    pub fn get_all(&self) -> Result<Vec<Person>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, info, enrolled_at FROM people ORDER BY id")?;
        let people = stmt
            .query_map([], Person::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(people)
    }

    /// Delete a person. Returns whether a row existed.
    pub fn delete(&self, id: i64) -> Result<bool, StoreError> {
        let affected = self.conn.execute("DELETE FROM people WHERE id = ?1", [id])?;
        Ok(affected > 0)
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        let n: i64 = self.conn.query_row("SELECT COUNT(*) FROM people", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}
