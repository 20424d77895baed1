use crate::error::ConfigError;
use serde_json::{Map, Value};

/// A mapping inside the raw configuration, together with its key path.
///
/// All accessors report failures against the full path of the key they were
/// asked for, so callers never have to assemble paths themselves.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Section<'a> {
    path: &'a str,
    map: &'a Map<String, Value>,
}

/// Owned variant of [`Section`] for entries whose path is built at runtime
/// (list elements, nested sections).
#[derive(Debug, Clone)]
pub(crate) struct OwnedSection<'a> {
    path: String,
    map: &'a Map<String, Value>,
}

impl<'a> OwnedSection<'a> {
    pub(crate) fn as_section(&self) -> Section<'_> {
        Section {
            path: &self.path,
            map: self.map,
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}

pub(crate) fn join(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{parent}.{key}")
    }
}

impl<'a> Section<'a> {
    /// Treats `value` as the document root.
    pub(crate) fn root(value: &'a Value) -> Result<OwnedSection<'a>, ConfigError> {
        match value {
            Value::Object(map) => Ok(OwnedSection {
                path: String::new(),
                map,
            }),
            other => Err(ConfigError::InvalidType {
                path: "<root>".to_string(),
                expected: "a mapping",
                found: type_name(other),
            }),
        }
    }

    pub(crate) fn path_of(&self, key: &str) -> String {
        join(self.path, key)
    }

    /// Looks up `key`, treating an explicit `null` as absent.
    fn get(&self, key: &str) -> Option<&'a Value> {
        self.map.get(key).filter(|v| !v.is_null())
    }

    fn required(&self, key: &str) -> Result<&'a Value, ConfigError> {
        self.get(key).ok_or_else(|| ConfigError::Missing {
            path: self.path_of(key),
        })
    }

    pub(crate) fn section(&self, key: &str) -> Result<OwnedSection<'a>, ConfigError> {
        match self.required(key)? {
            Value::Object(map) => Ok(OwnedSection {
                path: self.path_of(key),
                map,
            }),
            other => Err(ConfigError::InvalidType {
                path: self.path_of(key),
                expected: "a mapping",
                found: type_name(other),
            }),
        }
    }

    /// Returns every element of the list at `key` as a section.
    pub(crate) fn list(&self, key: &str) -> Result<Vec<OwnedSection<'a>>, ConfigError> {
        let items = match self.required(key)? {
            Value::Array(items) => items,
            other => {
                return Err(ConfigError::InvalidType {
                    path: self.path_of(key),
                    expected: "a list",
                    found: type_name(other),
                })
            }
        };

        items
            .iter()
            .enumerate()
            .map(|(index, item)| {
                let path = format!("{}[{index}]", self.path_of(key));
                match item {
                    Value::Object(map) => Ok(OwnedSection { path, map }),
                    other => Err(ConfigError::InvalidType {
                        path,
                        expected: "a mapping",
                        found: type_name(other),
                    }),
                }
            })
            .collect()
    }

    /// A mandatory, non-empty string.
    pub(crate) fn string(&self, key: &str) -> Result<String, ConfigError> {
        match self.optional_string(key)? {
            Some(value) if value.is_empty() => Err(ConfigError::InvalidValue {
                path: self.path_of(key),
                reason: "must not be empty".to_string(),
            }),
            Some(value) => Ok(value),
            None => Err(ConfigError::Missing {
                path: self.path_of(key),
            }),
        }
    }

    /// A mandatory string that may be empty (service passwords).
    pub(crate) fn string_allow_empty(&self, key: &str) -> Result<String, ConfigError> {
        self.optional_string(key)?.ok_or_else(|| ConfigError::Missing {
            path: self.path_of(key),
        })
    }

    /// An optional string; absent and present-but-empty are kept apart.
    pub(crate) fn optional_string(&self, key: &str) -> Result<Option<String>, ConfigError> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            // YAML happily reads `password: 1234` as a number
            Some(Value::Number(n)) => Ok(Some(n.to_string())),
            Some(other) => Err(ConfigError::InvalidType {
                path: self.path_of(key),
                expected: "a string",
                found: type_name(other),
            }),
        }
    }

    /// A mandatory integer; decimal strings are coerced, anything else fails.
    pub(crate) fn integer(&self, key: &str) -> Result<i64, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidValue {
            path: self.path_of(key),
            reason,
        };

        match self.required(key)? {
            Value::Number(n) => n
                .as_i64()
                .ok_or_else(|| invalid(format!("`{n}` is not an integer"))),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map_err(|_| invalid(format!("`{s}` is not an integer"))),
            other => Err(ConfigError::InvalidType {
                path: self.path_of(key),
                expected: "an integer",
                found: type_name(other),
            }),
        }
    }

    /// A mandatory integer that must fit into `T`, e.g. a port into `u16`.
    pub(crate) fn bounded<T>(&self, key: &str) -> Result<T, ConfigError>
    where
        T: TryFrom<i64>,
    {
        let value = self.integer(key)?;
        T::try_from(value).map_err(|_| ConfigError::InvalidValue {
            path: self.path_of(key),
            reason: format!(
                "`{value}` is out of range for {}",
                std::any::type_name::<T>()
            ),
        })
    }
}
