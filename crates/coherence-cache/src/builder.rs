//! Content builder contract.

use serde::{de::DeserializeOwned, Serialize};

/// Builds one payload type from the slow content stores.
///
/// Builders are pure: the same context must always produce the same payload,
/// because a row published under `SCHEMA_VERSION` is served forever. Changing
/// the payload's shape means bumping `SCHEMA_VERSION`; that is the only way a
/// published row is ever superseded.
///
/// Absent data is expressed as empty containers. A payload that serializes to
/// JSON containing `null` anywhere is rejected as a build failure.
///
/// # Example
///
/// ```rust,ignore
/// #[derive(Serialize, Deserialize)]
/// struct ScenarioOutline {
///     title: String,
///     steps: Vec<Step>,
/// }
///
/// struct ScenarioOutlineBuilder;
///
/// impl ContentBuilder for ScenarioOutlineBuilder {
///     const PAYLOAD_TYPE: &'static str = "scenario_outline";
///     const SCHEMA_VERSION: u32 = 3;
///     type Context = ContentDb;
///     type Payload = ScenarioOutline;
///
///     fn build(&self, db: &ContentDb) -> anyhow::Result<ScenarioOutline> {
///         db.load_outline()
///     }
/// }
/// ```
pub trait ContentBuilder: Send + Sync {
    /// Namespace of the payload in every key derived for it.
    const PAYLOAD_TYPE: &'static str;

    /// Version of the payload's structure. Starts at 1.
    const SCHEMA_VERSION: u32;

    /// Whatever the builder reads from.
    type Context: Send + Sync;

    /// The schema-versioned payload type.
    type Payload: Serialize + DeserializeOwned + Clone + Send;

    /// Build the payload. Runs while the build lock is held.
    fn build(&self, ctx: &Self::Context) -> anyhow::Result<Self::Payload>;
}

/// JSON path of the first `null` inside `value`, if any.
pub(crate) fn find_null(value: &serde_json::Value) -> Option<String> {
    fn walk(value: &serde_json::Value, path: &mut String) -> bool {
        match value {
            serde_json::Value::Null => true,
            serde_json::Value::Array(items) => items.iter().enumerate().any(|(i, item)| {
                let len = path.len();
                path.push_str(&format!("[{i}]"));
                if walk(item, path) {
                    return true;
                }
                path.truncate(len);
                false
            }),
            serde_json::Value::Object(fields) => fields.iter().any(|(name, item)| {
                let len = path.len();
                path.push('.');
                path.push_str(name);
                if walk(item, path) {
                    return true;
                }
                path.truncate(len);
                false
            }),
            _ => false,
        }
    }

    let mut path = String::from("$");
    walk(value, &mut path).then_some(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_find_null_none() {
        assert_eq!(find_null(&json!({"a": [], "b": {}, "c": ""})), None);
    }

    #[test]
    fn test_find_null_top_level() {
        assert_eq!(find_null(&serde_json::Value::Null).as_deref(), Some("$"));
    }

    #[test]
    fn test_find_null_nested_path() {
        let value = json!({"steps": [{"title": "a"}, {"title": null}]});
        assert_eq!(find_null(&value).as_deref(), Some("$.steps[1].title"));
    }
}
