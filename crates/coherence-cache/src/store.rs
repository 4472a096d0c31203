//! Durable published-content rows.

use std::sync::Arc;

use coherence_db::{params, Db, DbError};
use serde::{Deserialize, Serialize};

/// One immutable row of `published_content`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedRow {
    pub key_code: String,
    pub schema_version: u32,
    pub json_payload: String,
    /// RFC 3339, UTC.
    pub built_at: String,
    pub built_by: String,
}

impl PublishedRow {
    pub fn row_key(&self) -> String {
        format!("{}:v{}", self.key_code, self.schema_version)
    }
}

/// Statement set over `published_content`.
#[derive(Clone)]
pub struct PublishedStore {
    db: Arc<Db>,
}

const COLUMNS: &str = "key_code, schema_version, json_payload, built_at, built_by";

impl PublishedStore {
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }

    /// Row for an exact schema version.
    pub fn get(&self, key_code: &str, schema_version: u32) -> Result<Option<PublishedRow>, DbError> {
        self.db.query_optional(
            &format!(
                "SELECT {COLUMNS} FROM published_content WHERE key_code = ?1 AND schema_version = ?2"
            ),
            params![key_code, schema_version],
        )
    }

    /// Row with the highest schema version for a key code.
    pub fn latest(&self, key_code: &str) -> Result<Option<PublishedRow>, DbError> {
        self.db.query_optional(
            &format!(
                "SELECT {COLUMNS} FROM published_content WHERE key_code = ?1
                 ORDER BY schema_version DESC LIMIT 1"
            ),
            params![key_code],
        )
    }

    /// Every published version of a key code, newest first.
    pub fn versions(&self, key_code: &str) -> Result<Vec<PublishedRow>, DbError> {
        self.db.query_as(
            &format!(
                "SELECT {COLUMNS} FROM published_content WHERE key_code = ?1
                 ORDER BY schema_version DESC"
            ),
            params![key_code],
        )
    }

    /// Highest published schema version for a key code.
    pub fn highest_version(&self, key_code: &str) -> Result<Option<u32>, DbError> {
        let result = self.db.query(
            "SELECT MAX(schema_version) AS v FROM published_content WHERE key_code = ?1",
            params![key_code],
        )?;
        Ok(result
            .first()
            .and_then(|row| row.get("v"))
            .and_then(|v| v.as_integer())
            .and_then(|v| u32::try_from(v).ok()))
    }

    /// Insert a row unless one already exists for its (key code, schema
    /// version). Returns whether this call inserted it. An existing row is
    /// never rewritten.
    pub fn insert_if_absent(&self, row: &PublishedRow) -> Result<bool, DbError> {
        let inserted = self.db.query(
            "INSERT INTO published_content (key_code, schema_version, json_payload, built_at, built_by)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(key_code, schema_version) DO NOTHING
             RETURNING key_code",
            params![
                row.key_code.as_str(),
                row.schema_version,
                row.json_payload.as_str(),
                row.built_at.as_str(),
                row.built_by.as_str(),
            ],
        )?;
        Ok(!inserted.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> PublishedStore {
        let db = Db::open_default().unwrap();
        db.migrate().unwrap();
        PublishedStore::new(Arc::new(db))
    }

    fn row(version: u32, payload: &str) -> PublishedRow {
        PublishedRow {
            key_code: "outline:m1:-:-:-:-".into(),
            schema_version: version,
            json_payload: payload.into(),
            built_at: "2026-01-01T00:00:00Z".into(),
            built_by: "test".into(),
        }
    }

    #[test]
    fn test_insert_if_absent_never_rewrites() {
        let store = store();
        assert!(store.insert_if_absent(&row(1, r#"{"a":1}"#)).unwrap());
        assert!(!store.insert_if_absent(&row(1, r#"{"a":2}"#)).unwrap());

        let stored = store.get("outline:m1:-:-:-:-", 1).unwrap().unwrap();
        assert_eq!(stored.json_payload, r#"{"a":1}"#);
    }

    #[test]
    fn test_versions_are_independent_rows() {
        let store = store();
        store.insert_if_absent(&row(1, "[]")).unwrap();
        store.insert_if_absent(&row(3, "{}")).unwrap();

        assert_eq!(store.highest_version("outline:m1:-:-:-:-").unwrap(), Some(3));
        assert_eq!(store.latest("outline:m1:-:-:-:-").unwrap().unwrap().schema_version, 3);
        assert!(store.get("outline:m1:-:-:-:-", 2).unwrap().is_none());
        assert_eq!(store.versions("outline:m1:-:-:-:-").unwrap().len(), 2);
    }

    #[test]
    fn test_missing_key_code() {
        let store = store();
        assert_eq!(store.highest_version("nope").unwrap(), None);
        assert!(store.latest("nope").unwrap().is_none());
    }

    #[test]
    fn test_row_key() {
        assert_eq!(row(2, "{}").row_key(), "outline:m1:-:-:-:-:v2");
    }
}
