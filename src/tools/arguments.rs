//! Typed access to action call arguments.

use crate::error::{ForemanError, Result};
use crate::util::canonical::decode_arguments;

/// Argument keys treated as filesystem paths when the schema does not say.
pub(crate) const PATH_LIKE_KEYS: [&str; 7] = [
    "path",
    "file",
    "file_path",
    "dir",
    "directory",
    "cwd",
    "target",
];

/// Wrapper around call arguments providing typed extraction.
#[derive(Debug, Clone)]
pub struct ActionArguments {
    value: serde_json::Value,
}

impl ActionArguments {
    pub fn new(value: serde_json::Value) -> Self {
        Self { value }
    }

    /// Get the raw JSON value.
    pub fn raw(&self) -> &serde_json::Value {
        &self.value
    }

    /// Get a string argument by key.
    pub fn get_str(&self, key: &str) -> Result<&str> {
        self.get_str_opt(key)
            .ok_or_else(|| ForemanError::InvalidArgument(format!("Missing string argument: {key}")))
    }

    pub fn get_str_opt(&self, key: &str) -> Option<&str> {
        self.value.get(key).and_then(|v| v.as_str())
    }

    pub fn get_i64(&self, key: &str) -> Result<i64> {
        self.value
            .get(key)
            .and_then(|v| v.as_i64())
            .ok_or_else(|| {
                ForemanError::InvalidArgument(format!("Missing integer argument: {key}"))
            })
    }

    pub fn get_bool(&self, key: &str) -> Result<bool> {
        self.value
            .get(key)
            .and_then(|v| v.as_bool())
            .ok_or_else(|| {
                ForemanError::InvalidArgument(format!("Missing boolean argument: {key}"))
            })
    }

    /// Every top-level string value, paired with its key.
    pub fn string_values(&self) -> impl Iterator<Item = (&str, &str)> {
        self.value
            .as_object()
            .into_iter()
            .flat_map(|map| map.iter())
            .filter_map(|(key, value)| value.as_str().map(|s| (key.as_str(), s)))
    }

    /// String values of the given keys, or of [`PATH_LIKE_KEYS`] when `keys`
    /// is empty.
    pub fn path_values<'a>(&'a self, keys: &'a [String]) -> Vec<&'a str> {
        self.string_values()
            .filter(|(key, _)| {
                if keys.is_empty() {
                    PATH_LIKE_KEYS.contains(key)
                } else {
                    keys.iter().any(|candidate| candidate == key)
                }
            })
            .map(|(_, value)| value)
            .collect()
    }

    /// Deserialize the entire arguments into an action's argument record.
    ///
    /// Planners sometimes send arguments as a JSON-encoded string; that form is
    /// decoded first. An empty string reads as `{}`.
    pub fn deserialize<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        let value = match decode_arguments(&self.value).into_owned() {
            serde_json::Value::Null => serde_json::json!({}),
            other => other,
        };
        serde_json::from_value(value).map_err(|e| {
            ForemanError::InvalidArgument(format!("Failed to deserialize arguments: {e}"))
        })
    }
}

impl From<serde_json::Value> for ActionArguments {
    fn from(value: serde_json::Value) -> Self {
        Self::new(value)
    }
}
