//! Optimistic-concurrency document store.
//!
//! Every write is one conditional statement. Creation is an insert that does
//! nothing when the row exists; an update only matches the row at the expected
//! version. When the statement returns no row the write lost, and the current
//! state is read back for the conflict report.

use std::marker::PhantomData;
use std::sync::Arc;

use coherence_db::{params, Db, Value};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::document::{AttachmentMeta, ConflictReport, FormData, FormDocument, WriteOutcome};
use crate::error::FormError;
use crate::identity::FormIdentity;

const FORM_TABLE: &str = "form_documents";
const ATTACHMENT_TABLE: &str = "form_attachments";

const IDENTITY_MATCH: &str =
    "access_id = ?1 AND team_no = ?2 AND outline_id = ?3 AND exercise_no = ?4 AND form_key = ?5";

/// Collaborative form bodies.
pub type FormStore = OccStore<FormData>;

/// Attachment metadata. An absent or cleared attachment is `None`.
pub type AttachmentStore = OccStore<Option<AttachmentMeta>>;

#[derive(Deserialize)]
struct StoredRow {
    version: i64,
    payload: String,
    updated_at: String,
}

/// Versioned documents of body type `T` in one table.
///
/// `T::default()` is the body of a document that has never been written.
pub struct OccStore<T> {
    db: Arc<Db>,
    table: &'static str,
    _body: PhantomData<fn() -> T>,
}

impl<T> Clone for OccStore<T> {
    fn clone(&self) -> Self {
        Self {
            db: Arc::clone(&self.db),
            table: self.table,
            _body: PhantomData,
        }
    }
}

impl OccStore<FormData> {
    pub fn forms(db: Arc<Db>) -> Self {
        Self::in_table(db, FORM_TABLE)
    }
}

impl OccStore<Option<AttachmentMeta>> {
    pub fn attachments(db: Arc<Db>) -> Self {
        Self::in_table(db, ATTACHMENT_TABLE)
    }
}

impl<T> OccStore<T>
where
    T: Serialize + DeserializeOwned + Clone + Default,
{
    fn in_table(db: Arc<Db>, table: &'static str) -> Self {
        Self {
            db,
            table,
            _body: PhantomData,
        }
    }

    /// Current document. A missing row reads as version 0 with an empty body.
    pub fn read(&self, id: &FormIdentity) -> Result<FormDocument<T>, FormError> {
        let row: Option<StoredRow> = self.db.query_optional(
            &format!(
                "SELECT version, payload, updated_at FROM {} WHERE {IDENTITY_MATCH}",
                self.table
            ),
            &identity_params(id),
        )?;

        match row {
            Some(row) => Ok(FormDocument {
                form_key: id.form_key().to_string(),
                version: row.version,
                data: decode_body(&row.payload)?,
                updated_at: Some(row.updated_at),
            }),
            None => Ok(FormDocument {
                form_key: id.form_key().to_string(),
                version: 0,
                data: T::default(),
                updated_at: None,
            }),
        }
    }

    /// Replace the body if the stored version equals `expected_version`.
    ///
    /// `expected_version == 0` creates the document at version 1 and conflicts
    /// if it already exists.
    pub fn write(
        &self,
        id: &FormIdentity,
        expected_version: i64,
        data: &T,
    ) -> Result<WriteOutcome<T>, FormError> {
        if expected_version < 0 {
            return Err(FormError::Validation(
                "expected_version must not be negative".into(),
            ));
        }
        let payload = serde_json::to_string(data)
            .map_err(|e| FormError::Validation(format!("payload does not serialize: {e}")))?;
        let now = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);

        let returned = if expected_version == 0 {
            let mut params = identity_params(id);
            params.push(Value::from(payload));
            params.push(Value::from(now.as_str()));
            self.db.query(
                &format!(
                    "INSERT INTO {} (access_id, team_no, outline_id, exercise_no, form_key, version, payload, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?7)
                     ON CONFLICT(access_id, team_no, outline_id, exercise_no, form_key) DO NOTHING
                     RETURNING version",
                    self.table
                ),
                &params,
            )?
        } else {
            let mut params = identity_params(id);
            params.push(Value::from(payload));
            params.push(Value::from(now.as_str()));
            params.push(Value::from(expected_version));
            self.db.query(
                &format!(
                    "UPDATE {} SET version = version + 1, payload = ?6, updated_at = ?7
                     WHERE {IDENTITY_MATCH} AND version = ?8
                     RETURNING version",
                    self.table
                ),
                &params,
            )?
        };

        if let Some(version) = returned
            .first()
            .and_then(|row| row.get("version"))
            .and_then(Value::as_integer)
        {
            debug!(table = self.table, identity = %id, version, "form committed");
            return Ok(WriteOutcome::Committed(FormDocument {
                form_key: id.form_key().to_string(),
                version,
                data: data.clone(),
                updated_at: Some(now),
            }));
        }

        let current = self.read(id)?;
        info!(
            table = self.table,
            identity = %id,
            expected_version,
            current_version = current.version,
            "form version conflict"
        );
        Ok(WriteOutcome::Conflict(ConflictReport {
            form_key: current.form_key,
            current_version: current.version,
            current_data: current.data,
        }))
    }

    /// Write the empty body through the same compare-and-set. The version still
    /// increments.
    pub fn clear(
        &self,
        id: &FormIdentity,
        expected_version: i64,
    ) -> Result<WriteOutcome<T>, FormError> {
        self.write(id, expected_version, &T::default())
    }
}

fn identity_params(id: &FormIdentity) -> Vec<Value> {
    params![
        id.access_id(),
        id.team_no(),
        id.outline_key(),
        id.exercise_no(),
        id.form_key(),
    ]
    .to_vec()
}

fn decode_body<T: DeserializeOwned>(payload: &str) -> Result<T, FormError> {
    serde_json::from_str(payload).map_err(|e| FormError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn db() -> Arc<Db> {
        let db = Db::open_default().unwrap();
        db.migrate().unwrap();
        Arc::new(db)
    }

    fn id(key: &str) -> FormIdentity {
        FormIdentity::new("acc", 1, 10, 2, key).unwrap()
    }

    fn data(value: serde_json::Value) -> FormData {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_read_missing_is_version_zero() {
        let store = FormStore::forms(db());
        let doc = store.read(&id("notes")).unwrap();
        assert_eq!(doc.version, 0);
        assert!(doc.data.is_empty());
        assert_eq!(doc.updated_at, None);
    }

    #[test]
    fn test_create_then_conflict_on_recreate() {
        let store = FormStore::forms(db());
        let p1 = data(json!({"answer": "a"}));
        let p2 = data(json!({"answer": "b"}));

        let doc = store.write(&id("notes"), 0, &p1).unwrap().committed().unwrap();
        assert_eq!(doc.version, 1);

        let report = store.write(&id("notes"), 0, &p2).unwrap().conflict().unwrap();
        assert_eq!(report.current_version, 1);
        assert_eq!(report.current_data, p1);
        assert_eq!(store.read(&id("notes")).unwrap().data, p1);
    }

    #[test]
    fn test_update_bumps_version() {
        let store = FormStore::forms(db());
        store.write(&id("notes"), 0, &data(json!({"n": 1}))).unwrap();
        let doc = store
            .write(&id("notes"), 1, &data(json!({"n": 2})))
            .unwrap()
            .committed()
            .unwrap();
        assert_eq!(doc.version, 2);

        let stale = store.write(&id("notes"), 1, &data(json!({"n": 3}))).unwrap();
        assert!(!stale.is_committed());
        assert_eq!(store.read(&id("notes")).unwrap().data, data(json!({"n": 2})));
    }

    #[test]
    fn test_update_of_missing_row_conflicts_at_zero() {
        let store = FormStore::forms(db());
        let report = store
            .write(&id("notes"), 4, &data(json!({"n": 1})))
            .unwrap()
            .conflict()
            .unwrap();
        assert_eq!(report.current_version, 0);
        assert!(report.current_data.is_empty());
    }

    #[test]
    fn test_negative_expected_version_rejected() {
        let store = FormStore::forms(db());
        assert!(matches!(
            store.write(&id("notes"), -1, &FormData::new()),
            Err(FormError::Validation(_))
        ));
    }

    #[test]
    fn test_clear_goes_through_occ() {
        let store = FormStore::forms(db());
        store.write(&id("notes"), 0, &data(json!({"n": 1}))).unwrap();

        assert!(!store.clear(&id("notes"), 0).unwrap().is_committed());
        let doc = store.clear(&id("notes"), 1).unwrap().committed().unwrap();
        assert_eq!(doc.version, 2);
        assert!(store.read(&id("notes")).unwrap().data.is_empty());
    }

    #[test]
    fn test_read_is_side_effect_free() {
        let store = FormStore::forms(db());
        store.write(&id("notes"), 0, &data(json!({"n": 1}))).unwrap();
        let first = store.read(&id("notes")).unwrap();
        let second = store.read(&id("notes")).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_identities_are_isolated() {
        let store = FormStore::forms(db());
        store.write(&id("a"), 0, &data(json!({"x": 1}))).unwrap();
        let other_team = FormIdentity::new("acc", 2, 10, 2, "a").unwrap();
        assert_eq!(store.read(&other_team).unwrap().version, 0);
    }

    #[test]
    fn test_forms_and_attachments_use_separate_tables() {
        let db = db();
        let forms = FormStore::forms(Arc::clone(&db));
        let attachments = AttachmentStore::attachments(db);

        forms.write(&id("upload"), 0, &data(json!({"x": 1}))).unwrap();
        let attachment = attachments.read(&id("upload")).unwrap();
        assert_eq!(attachment.version, 0);
        assert_eq!(attachment.data, None);
    }
}
