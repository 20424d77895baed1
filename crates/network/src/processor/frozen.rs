use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;

/// Processor parameters as they arrive from a job or the command line.
pub type ParameterMap = Map<String, Value>;

/// A parameter value that can be hashed and compared.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FrozenValue {
    Null,
    Bool(bool),
    Integer(i64),
    Unsigned(u64),
    /// Bit pattern of a non-integral float. `-0.0` is folded into `0`.
    Float(u64),
    String(String),
    Map(FrozenParameters),
}

/// Order-independent, hashable encoding of a (possibly nested) parameter map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrozenParameters(BTreeMap<String, FrozenValue>);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("parameter `{path}` is {kind}, which cannot be part of a cache key")]
pub struct UnhashableParameter {
    pub path: String,
    pub kind: &'static str,
}

impl FrozenParameters {
    pub fn freeze(parameters: &ParameterMap) -> Result<Self, UnhashableParameter> {
        Self::freeze_at(parameters, "")
    }

    fn freeze_at(parameters: &ParameterMap, prefix: &str) -> Result<Self, UnhashableParameter> {
        parameters
            .iter()
            .map(|(key, value)| {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                Ok((key.clone(), freeze_value(value, &path)?))
            })
            .collect::<Result<BTreeMap<_, _>, _>>()
            .map(Self)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn freeze_number(n: &Number) -> FrozenValue {
    if let Some(i) = n.as_i64() {
        return FrozenValue::Integer(i);
    }
    if let Some(u) = n.as_u64() {
        return FrozenValue::Unsigned(u);
    }

    let f = n.as_f64().unwrap_or(f64::NAN);
    // integral floats compare equal to the integer they spell
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        return FrozenValue::Integer(f as i64);
    }
    FrozenValue::Float(f.to_bits())
}

fn freeze_value(value: &Value, path: &str) -> Result<FrozenValue, UnhashableParameter> {
    Ok(match value {
        Value::Null => FrozenValue::Null,
        Value::Bool(b) => FrozenValue::Bool(*b),
        Value::Number(n) => freeze_number(n),
        Value::String(s) => FrozenValue::String(s.clone()),
        Value::Object(map) => FrozenValue::Map(FrozenParameters::freeze_at(map, path)?),
        Value::Array(_) => {
            return Err(UnhashableParameter {
                path: path.to_string(),
                kind: "a list",
            })
        }
    })
}
