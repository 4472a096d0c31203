//! JSON envelope spoken by the form endpoints.
//!
//! Request: `{"crud": "read"|"upsert"|"delete", "expected_version": 3, "payload": {..}}`.
//! Success (200): `{"ok": true, "data": {"form_key", "version", "data"}}`.
//! Conflict (409): `{"ok": false, "data": {"form_key", "current_version", "data"},
//! "error": "version_conflict"}`.
//! Anything else carries only `ok: false` and an error code.

use http::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::document::{ConflictReport, FormDocument, WriteOutcome};
use crate::error::FormError;
use crate::identity::{FormIdentity, IdentityParams};
use crate::store::OccStore;

pub const VERSION_CONFLICT: &str = "version_conflict";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Crud {
    Read,
    Upsert,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormRequest {
    pub crud: Crud,
    #[serde(default)]
    pub expected_version: i64,
    #[serde(default = "empty_object")]
    pub payload: serde_json::Value,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// `data` member of an envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvelopeData<T> {
    Document {
        form_key: String,
        version: i64,
        data: T,
    },
    Conflict {
        form_key: String,
        current_version: i64,
        data: T,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormEnvelope<T> {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<EnvelopeData<T>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> FormEnvelope<T> {
    pub fn document(doc: FormDocument<T>) -> Self {
        Self {
            ok: true,
            data: Some(EnvelopeData::Document {
                form_key: doc.form_key,
                version: doc.version,
                data: doc.data,
            }),
            error: None,
        }
    }

    pub fn conflict(report: ConflictReport<T>) -> Self {
        Self {
            ok: false,
            data: Some(EnvelopeData::Conflict {
                form_key: report.form_key,
                current_version: report.current_version,
                data: report.current_data,
            }),
            error: Some(VERSION_CONFLICT.to_string()),
        }
    }

    pub fn error(code: &str) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(code.to_string()),
        }
    }
}

/// Answer one request against a validated identity.
pub fn respond<T>(
    store: &OccStore<T>,
    identity: &FormIdentity,
    request: FormRequest,
) -> (StatusCode, FormEnvelope<T>)
where
    T: Serialize + DeserializeOwned + Clone + Default,
{
    match dispatch(store, identity, request) {
        Ok(response) => response,
        Err(e) => failure(identity.to_string(), e),
    }
}

/// Answer one request straight from raw route parameters and body bytes,
/// validating both.
pub fn respond_raw<T>(
    store: &OccStore<T>,
    params: IdentityParams,
    body: &[u8],
) -> (StatusCode, FormEnvelope<T>)
where
    T: Serialize + DeserializeOwned + Clone + Default,
{
    let scope = format!("{}/{}", params.access_id, params.form_key);
    let identity = match FormIdentity::try_from(params) {
        Ok(identity) => identity,
        Err(e) => return failure(scope, e),
    };
    let request = match serde_json::from_slice::<FormRequest>(body) {
        Ok(request) => request,
        Err(e) => {
            return failure(
                identity.to_string(),
                FormError::Validation(format!("malformed request body: {e}")),
            )
        }
    };
    respond(store, &identity, request)
}

fn dispatch<T>(
    store: &OccStore<T>,
    identity: &FormIdentity,
    request: FormRequest,
) -> Result<(StatusCode, FormEnvelope<T>), FormError>
where
    T: Serialize + DeserializeOwned + Clone + Default,
{
    if request.expected_version < 0 {
        return Err(FormError::Validation(
            "expected_version must not be negative".into(),
        ));
    }

    match request.crud {
        Crud::Read => Ok((StatusCode::OK, FormEnvelope::document(store.read(identity)?))),
        Crud::Upsert => {
            let data: T = serde_json::from_value(request.payload)
                .map_err(|e| FormError::Validation(format!("payload has the wrong shape: {e}")))?;
            Ok(outcome(store.write(identity, request.expected_version, &data)?))
        }
        Crud::Delete => Ok(outcome(store.clear(identity, request.expected_version)?)),
    }
}

fn outcome<T>(result: WriteOutcome<T>) -> (StatusCode, FormEnvelope<T>) {
    match result {
        WriteOutcome::Committed(doc) => (StatusCode::OK, FormEnvelope::document(doc)),
        WriteOutcome::Conflict(report) => (StatusCode::CONFLICT, FormEnvelope::conflict(report)),
    }
}

fn failure<T>(scope: String, e: FormError) -> (StatusCode, FormEnvelope<T>) {
    match &e {
        FormError::Validation(detail) => debug!(scope = %scope, detail = %detail, "rejected form request"),
        FormError::Storage(detail) | FormError::Decode(detail) => {
            error!(scope = %scope, detail = %detail, "form request failed")
        }
    }
    (e.status(), FormEnvelope::error(e.code()))
}
