//! Destination parameters
//!
//! Every backend declares a [`DestinationSchema`]: the tuning values it
//! understands (cpu, memory, queue, ...), how each raw string is coerced and
//! what the default is. Resolving a job's raw parameters against the schema
//! happens before any remote call is made.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors raised while resolving raw destination parameters
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("unknown destination parameter '{0}'")]
    UnknownParameter(String),

    #[error("missing required destination parameter '{0}'")]
    MissingParameter(String),

    #[error("destination parameter '{name}' expects {expected}, got '{value}'")]
    InvalidValue {
        name: String,
        expected: &'static str,
        value: String,
    },
}

/// Declared type coercion of one parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Int,
    Float,
    Bool,
    Text,
    /// Memory amount normalised to megabytes; accepts `2048`, `512M`, `4G`
    MemoryMb,
}

impl ParamKind {
    fn expected(self) -> &'static str {
        match self {
            ParamKind::Int => "an integer",
            ParamKind::Float => "a number",
            ParamKind::Bool => "a boolean",
            ParamKind::Text => "a string",
            ParamKind::MemoryMb => "a memory size such as 2048, 512M or 4G",
        }
    }

    fn coerce(self, raw: &str) -> Option<ParamValue> {
        let raw = raw.trim();
        match self {
            ParamKind::Int => raw.parse::<i64>().ok().map(ParamValue::Int),
            ParamKind::Float => raw
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(ParamValue::Float),
            ParamKind::Bool => match raw.to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" | "on" => Some(ParamValue::Bool(true)),
                "false" | "no" | "0" | "off" => Some(ParamValue::Bool(false)),
                _ => None,
            },
            ParamKind::Text => {
                if raw.is_empty() {
                    None
                } else {
                    Some(ParamValue::Text(raw.to_string()))
                }
            }
            ParamKind::MemoryMb => parse_memory_mb(raw).map(ParamValue::Int),
        }
    }
}

fn parse_memory_mb(raw: &str) -> Option<i64> {
    let upper = raw.to_ascii_uppercase();
    let (digits, factor) = if let Some(n) = upper.strip_suffix('G') {
        (n, 1024)
    } else if let Some(n) = upper.strip_suffix('M') {
        (n, 1)
    } else {
        (upper.as_str(), 1)
    };

    digits
        .trim()
        .parse::<i64>()
        .ok()
        .filter(|v| *v > 0)
        .and_then(|v| v.checked_mul(factor))
}

/// A coerced parameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::Bool(v) => write!(f, "{}", v),
            ParamValue::Text(v) => write!(f, "{}", v),
        }
    }
}

/// Declaration of a single destination parameter
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub default: Option<ParamValue>,
    pub required: bool,
}

impl ParamSpec {
    /// Optional parameter with a default value
    pub fn with_default(name: &'static str, kind: ParamKind, default: ParamValue) -> Self {
        Self {
            name,
            kind,
            default: Some(default),
            required: false,
        }
    }

    /// Optional parameter left unset when absent
    pub fn optional(name: &'static str, kind: ParamKind) -> Self {
        Self {
            name,
            kind,
            default: None,
            required: false,
        }
    }

    /// Parameter that must be supplied by the job
    pub fn required(name: &'static str, kind: ParamKind) -> Self {
        Self {
            name,
            kind,
            default: None,
            required: true,
        }
    }
}

/// The set of parameters a backend accepts
#[derive(Debug, Clone, Default)]
pub struct DestinationSchema {
    specs: Vec<ParamSpec>,
}

impl DestinationSchema {
    pub fn new(specs: Vec<ParamSpec>) -> Self {
        Self { specs }
    }

    pub fn specs(&self) -> &[ParamSpec] {
        &self.specs
    }

    /// Coerces the raw mapping, applying defaults and rejecting unknown keys
    pub fn resolve(
        &self,
        raw: &BTreeMap<String, String>,
    ) -> Result<DestinationParams, ValidationError> {
        if let Some(unknown) = raw
            .keys()
            .find(|key| !self.specs.iter().any(|spec| spec.name == key.as_str()))
        {
            return Err(ValidationError::UnknownParameter(unknown.clone()));
        }

        let mut values = BTreeMap::new();
        for spec in &self.specs {
            match raw.get(spec.name) {
                Some(value) => {
                    let coerced =
                        spec.kind
                            .coerce(value)
                            .ok_or_else(|| ValidationError::InvalidValue {
                                name: spec.name.to_string(),
                                expected: spec.kind.expected(),
                                value: value.clone(),
                            })?;
                    values.insert(spec.name.to_string(), coerced);
                }
                None if spec.required => {
                    return Err(ValidationError::MissingParameter(spec.name.to_string()));
                }
                None => {
                    if let Some(default) = &spec.default {
                        values.insert(spec.name.to_string(), default.clone());
                    }
                }
            }
        }

        Ok(DestinationParams { values })
    }
}

/// Immutable, resolved destination parameters
///
/// Backed by an ordered map so that iteration (and therefore hashing) does not
/// depend on the order in which the raw values were supplied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DestinationParams {
    values: BTreeMap<String, ParamValue>,
}

impl DestinationParams {
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        match self.values.get(name) {
            Some(ParamValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn float(&self, name: &str) -> Option<f64> {
        match self.values.get(name) {
            Some(ParamValue::Float(v)) => Some(*v),
            Some(ParamValue::Int(v)) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        match self.values.get(name) {
            Some(ParamValue::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        match self.values.get(name) {
            Some(ParamValue::Text(v)) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
