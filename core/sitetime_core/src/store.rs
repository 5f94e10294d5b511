//! Key/value persistence for settings and ledgers.
//!
//! Values are JSON documents addressed by `(area, key)`. The `sync` area holds
//! user configuration; the `local` area holds per-device ledgers such as
//! `time_<date>` or `tabLimitAllowlist`.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::{collections::HashMap, path::Path};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Area {
    Sync,
    Local,
}

impl Area {
    fn as_str(self) -> &'static str {
        match self {
            Area::Sync => "sync",
            Area::Local => "local",
        }
    }
}

pub trait Store: Send {
    fn get_raw(&self, area: Area, key: &str) -> Result<Option<Value>, StoreError>;
    fn set_raw(&mut self, area: Area, key: &str, value: Value) -> Result<(), StoreError>;
    fn remove(&mut self, area: Area, key: &str) -> Result<(), StoreError>;
}

/// Typed accessors on top of any [`Store`].
pub trait StoreExt: Store {
    /// Reads `key`, falling back to `T::default()` when absent or unreadable.
    fn get_or_default<T: DeserializeOwned + Default>(
        &self,
        area: Area,
        key: &str,
    ) -> Result<T, StoreError> {
        match self.get_raw(area, key)? {
            Some(v) => Ok(serde_json::from_value(v).unwrap_or_default()),
            None => Ok(T::default()),
        }
    }

    fn put<T: Serialize>(&mut self, area: Area, key: &str, value: &T) -> Result<(), StoreError> {
        let v = serde_json::to_value(value)?;
        self.set_raw(area, key, v)
    }
}

impl<S: Store + ?Sized> StoreExt for S {}

#[derive(Default)]
pub struct MemoryStore {
    entries: HashMap<(Area, String), Value>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn get_raw(&self, area: Area, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.entries.get(&(area, key.to_string())).cloned())
    }

    fn set_raw(&mut self, area: Area, key: &str, value: Value) -> Result<(), StoreError> {
        self.entries.insert((area, key.to_string()), value);
        Ok(())
    }

    fn remove(&mut self, area: Area, key: &str) -> Result<(), StoreError> {
        self.entries.remove(&(area, key.to_string()));
        Ok(())
    }
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        init_db(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        init_db(&conn)?;
        Ok(Self { conn })
    }
}

fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS kv (
  area TEXT NOT NULL,
  key TEXT NOT NULL,
  value_json TEXT NOT NULL,
  updated_at TEXT NOT NULL,
  PRIMARY KEY (area, key)
);
"#,
    )
}

impl Store for SqliteStore {
    fn get_raw(&self, area: Area, key: &str) -> Result<Option<Value>, StoreError> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT value_json FROM kv WHERE area = ?1 AND key = ?2",
                (area.as_str(), key),
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(s) => Ok(Some(serde_json::from_str(&s)?)),
            None => Ok(None),
        }
    }

    fn set_raw(&mut self, area: Area, key: &str, value: Value) -> Result<(), StoreError> {
        let updated_at = Utc::now().to_rfc3339();
        let value_json = serde_json::to_string(&value)?;
        self.conn.execute(
            r#"
INSERT INTO kv (area, key, value_json, updated_at)
VALUES (?1, ?2, ?3, ?4)
ON CONFLICT(area, key) DO UPDATE SET
  value_json=excluded.value_json,
  updated_at=excluded.updated_at
            "#,
            (area.as_str(), key, value_json, updated_at),
        )?;
        Ok(())
    }

    fn remove(&mut self, area: Area, key: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "DELETE FROM kv WHERE area = ?1 AND key = ?2",
            (area.as_str(), key),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn sqlite_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sitetime.db");

        {
            let mut store = SqliteStore::open(&path).unwrap();
            let mut times = BTreeMap::new();
            times.insert("github.com".to_string(), 1500_i64);
            store.put(Area::Local, "time_2026-02-15", &times).unwrap();
            store.put(Area::Sync, "time_2026-02-15", &42_i64).unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let times: BTreeMap<String, i64> = store
            .get_or_default(Area::Local, "time_2026-02-15")
            .unwrap();
        assert_eq!(times.get("github.com"), Some(&1500));
        let other: i64 = store.get_or_default(Area::Sync, "time_2026-02-15").unwrap();
        assert_eq!(other, 42, "areas are separate namespaces");
    }

    #[test]
    fn missing_or_mistyped_values_fall_back_to_default() {
        let mut store = MemoryStore::new();
        let empty: BTreeMap<String, i64> = store.get_or_default(Area::Local, "nope").unwrap();
        assert!(empty.is_empty());

        store
            .set_raw(Area::Local, "editLocks", Value::String("garbage".into()))
            .unwrap();
        let locks: BTreeMap<String, i64> = store.get_or_default(Area::Local, "editLocks").unwrap();
        assert!(locks.is_empty());

        store.remove(Area::Local, "editLocks").unwrap();
        assert!(store.get_raw(Area::Local, "editLocks").unwrap().is_none());
    }
}
