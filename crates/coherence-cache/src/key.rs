//! Publish key composition.
//!
//! A key code is plain delimited text, never a hash, so it is stable across
//! process restarts and toolchain upgrades and can be read straight out of the
//! datastore. Components are restricted to `[A-Za-z0-9_.-]`, which keeps the
//! `:` delimiter out of every component and makes the encoding injective.

use serde::{Deserialize, Serialize};

use crate::builder::ContentBuilder;
use crate::error::KeyError;

/// Maximum length of a single key component.
pub const MAX_COMPONENT_LEN: usize = 64;

/// Marker rendered for an absent scoping dimension.
const ABSENT: &str = "-";

/// Scoping dimensions of a published artifact.
///
/// Every dimension is optional; a payload scoped only by module leaves the rest
/// unset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyDimensions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl KeyDimensions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    pub fn theme(mut self, theme: impl Into<String>) -> Self {
        self.theme = Some(theme.into());
        self
    }

    pub fn scenario(mut self, scenario: impl Into<String>) -> Self {
        self.scenario = Some(scenario.into());
        self
    }

    pub fn state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    fn ordered(&self) -> [(&'static str, Option<&str>); 5] {
        [
            ("module", self.module.as_deref()),
            ("theme", self.theme.as_deref()),
            ("scenario", self.scenario.as_deref()),
            ("state", self.state.as_deref()),
            ("language", self.language.as_deref()),
        ]
    }
}

/// Identity of one published artifact at one schema version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PublishKey {
    payload_type: String,
    schema_version: u32,
    key_code: String,
}

impl PublishKey {
    /// Validate the inputs and derive the key code.
    pub fn new(
        payload_type: &str,
        dims: &KeyDimensions,
        schema_version: u32,
    ) -> Result<Self, KeyError> {
        if schema_version == 0 {
            return Err(KeyError::ZeroSchemaVersion);
        }
        validate_component("payload_type", payload_type)?;

        let mut key_code = String::from(payload_type);
        for (field, value) in dims.ordered() {
            key_code.push(':');
            match value {
                Some(value) => {
                    validate_component(field, value)?;
                    key_code.push_str(value);
                }
                None => key_code.push_str(ABSENT),
            }
        }

        Ok(Self {
            payload_type: payload_type.to_string(),
            schema_version,
            key_code,
        })
    }

    /// Key for the payload type and schema version a builder declares.
    pub fn for_builder<B: ContentBuilder>(dims: &KeyDimensions) -> Result<Self, KeyError> {
        Self::new(B::PAYLOAD_TYPE, dims, B::SCHEMA_VERSION)
    }

    pub fn payload_type(&self) -> &str {
        &self.payload_type
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    /// `payload_type:module:theme:scenario:state:language`, shared by every
    /// schema version of the artifact.
    pub fn key_code(&self) -> &str {
        &self.key_code
    }

    /// Key of the row for this exact schema version.
    pub fn row_key(&self) -> String {
        format!("{}:v{}", self.key_code, self.schema_version)
    }

    /// Name of the build lock. Independent of the schema version, so builds of
    /// any version of one artifact are serialised.
    pub fn lock_name(&self) -> String {
        format!("publish:{}", self.key_code)
    }
}

impl std::fmt::Display for PublishKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:v{}", self.key_code, self.schema_version)
    }
}

fn validate_component(field: &'static str, value: &str) -> Result<(), KeyError> {
    if value.is_empty() {
        return Err(KeyError::Empty { field });
    }
    if value.len() > MAX_COMPONENT_LEN {
        return Err(KeyError::TooLong {
            field,
            max: MAX_COMPONENT_LEN,
        });
    }
    if value == ABSENT {
        return Err(KeyError::Reserved { field });
    }
    if let Some(ch) = value
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')))
    {
        return Err(KeyError::InvalidChar { field, ch });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_key_code_layout() {
        let dims = KeyDimensions::new()
            .module("m01")
            .theme("fire")
            .scenario("s3")
            .state("briefing")
            .language("en");
        let key = PublishKey::new("scenario_outline", &dims, 4).unwrap();

        assert_eq!(key.key_code(), "scenario_outline:m01:fire:s3:briefing:en");
        assert_eq!(key.row_key(), "scenario_outline:m01:fire:s3:briefing:en:v4");
        assert_eq!(key.lock_name(), "publish:scenario_outline:m01:fire:s3:briefing:en");
        assert_eq!(key.to_string(), key.row_key());
    }

    #[test]
    fn test_absent_dimensions() {
        let key = PublishKey::new("glossary", &KeyDimensions::new().language("ja"), 1).unwrap();
        assert_eq!(key.key_code(), "glossary:-:-:-:-:ja");
    }

    #[test]
    fn test_key_is_stable() {
        let dims = KeyDimensions::new().module("m1");
        let a = PublishKey::new("outline", &dims, 2).unwrap();
        let b = PublishKey::new("outline", &dims.clone(), 2).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.row_key(), b.row_key());
    }

    #[test]
    fn test_lock_name_ignores_schema_version() {
        let dims = KeyDimensions::new().module("m1");
        let v1 = PublishKey::new("outline", &dims, 1).unwrap();
        let v2 = PublishKey::new("outline", &dims, 2).unwrap();
        assert_eq!(v1.lock_name(), v2.lock_name());
        assert_ne!(v1.row_key(), v2.row_key());
    }

    #[test]
    fn test_distinct_tuples_never_collide() {
        // Shifting a value between dimensions, or between the payload type and
        // a dimension, must change the key.
        let cases = vec![
            ("outline", KeyDimensions::new().module("a")),
            ("outline", KeyDimensions::new().theme("a")),
            ("outline", KeyDimensions::new().module("a").theme("b")),
            ("outline", KeyDimensions::new().module("b").theme("a")),
            ("outline", KeyDimensions::new().module("a.b")),
            ("outline_a", KeyDimensions::new()),
            ("glossary", KeyDimensions::new().module("a")),
            ("outline", KeyDimensions::new()),
        ];

        let codes: HashSet<String> = cases
            .iter()
            .map(|(ty, dims)| PublishKey::new(ty, dims, 1).unwrap().key_code().to_string())
            .collect();
        assert_eq!(codes.len(), cases.len());
    }

    #[test]
    fn test_delimiter_rejected() {
        let err = PublishKey::new("outline", &KeyDimensions::new().module("a:b"), 1).unwrap_err();
        assert_eq!(
            err,
            KeyError::InvalidChar {
                field: "module",
                ch: ':'
            }
        );
    }

    #[test]
    fn test_validation_errors() {
        assert_eq!(
            PublishKey::new("", &KeyDimensions::new(), 1).unwrap_err(),
            KeyError::Empty { field: "payload_type" }
        );
        assert_eq!(
            PublishKey::new("outline", &KeyDimensions::new().theme("-"), 1).unwrap_err(),
            KeyError::Reserved { field: "theme" }
        );
        assert_eq!(
            PublishKey::new("outline", &KeyDimensions::new().state("x".repeat(65)), 1).unwrap_err(),
            KeyError::TooLong {
                field: "state",
                max: MAX_COMPONENT_LEN
            }
        );
        assert_eq!(
            PublishKey::new("outline", &KeyDimensions::new(), 0).unwrap_err(),
            KeyError::ZeroSchemaVersion
        );
        assert!(PublishKey::new("outline", &KeyDimensions::new().language("pt BR"), 1).is_err());
    }
}
