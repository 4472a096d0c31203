//! Form identity.

use serde::{Deserialize, Serialize};

use crate::error::FormError;

pub const MAX_ACCESS_ID_LEN: usize = 128;
pub const MAX_FORM_KEY_LEN: usize = 64;

/// Unvalidated identity fields as they arrive from a route or query string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityParams {
    pub access_id: String,
    pub team_no: u32,
    pub outline_id: u64,
    pub exercise_no: u32,
    pub form_key: String,
}

/// The scope tuple that addresses exactly one form document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "IdentityParams")]
pub struct FormIdentity {
    access_id: String,
    team_no: u32,
    outline_id: i64,
    exercise_no: u32,
    form_key: String,
}

impl FormIdentity {
    pub fn new(
        access_id: impl Into<String>,
        team_no: u32,
        outline_id: u64,
        exercise_no: u32,
        form_key: impl Into<String>,
    ) -> Result<Self, FormError> {
        let access_id = access_id.into();
        let form_key = form_key.into();

        if access_id.is_empty() {
            return Err(FormError::Validation("access_id must not be empty".into()));
        }
        if access_id.len() > MAX_ACCESS_ID_LEN {
            return Err(FormError::Validation(format!(
                "access_id exceeds {MAX_ACCESS_ID_LEN} bytes"
            )));
        }
        if access_id.chars().any(char::is_control) {
            return Err(FormError::Validation(
                "access_id contains control characters".into(),
            ));
        }
        // SQLite integers are signed.
        let outline_id = i64::try_from(outline_id)
            .map_err(|_| FormError::Validation("outline_id out of range".into()))?;
        validate_form_key(&form_key)?;

        Ok(Self {
            access_id,
            team_no,
            outline_id,
            exercise_no,
            form_key,
        })
    }

    pub fn access_id(&self) -> &str {
        &self.access_id
    }

    pub fn team_no(&self) -> u32 {
        self.team_no
    }

    pub fn outline_id(&self) -> u64 {
        self.outline_id.unsigned_abs()
    }

    /// Outline id as bound into SQL. Never negative.
    pub fn outline_key(&self) -> i64 {
        self.outline_id
    }

    pub fn exercise_no(&self) -> u32 {
        self.exercise_no
    }

    pub fn form_key(&self) -> &str {
        &self.form_key
    }
}

impl TryFrom<IdentityParams> for FormIdentity {
    type Error = FormError;

    fn try_from(p: IdentityParams) -> Result<Self, Self::Error> {
        Self::new(p.access_id, p.team_no, p.outline_id, p.exercise_no, p.form_key)
    }
}

impl std::fmt::Display for FormIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}/{}",
            self.access_id, self.team_no, self.outline_id, self.exercise_no, self.form_key
        )
    }
}

fn validate_form_key(form_key: &str) -> Result<(), FormError> {
    if form_key.is_empty() || form_key.len() > MAX_FORM_KEY_LEN {
        return Err(FormError::Validation(format!(
            "form_key must be 1 to {MAX_FORM_KEY_LEN} bytes"
        )));
    }
    if !form_key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    {
        return Err(FormError::Validation(
            "form_key may only contain [A-Za-z0-9_.-]".into(),
        ));
    }
    Ok(())
}
