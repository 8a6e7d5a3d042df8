//! Schema types

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// A field as reported by the describe API
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Source column name
    pub name: String,

    /// Human-readable label
    #[serde(default)]
    pub label: String,

    /// Source type (e.g. `id`, `picklist`, `currency`)
    #[serde(rename = "type")]
    pub field_type: String,

    /// Maximum length for textual types
    #[serde(default)]
    pub length: u32,

    /// Total digits for numeric types
    #[serde(default)]
    pub precision: u32,

    /// Digits after the decimal point for numeric types
    #[serde(default)]
    pub scale: u32,
}

impl FieldDescriptor {
    /// Create a descriptor with the given name and source type
    pub fn new(name: impl Into<String>, field_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: field_type.into(),
            ..Self::default()
        }
    }

    /// Set the label
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Set the length
    #[must_use]
    pub fn with_length(mut self, length: u32) -> Self {
        self.length = length;
        self
    }

    /// Set precision and scale
    #[must_use]
    pub fn with_precision(mut self, precision: u32, scale: u32) -> Self {
        self.precision = precision;
        self.scale = scale;
        self
    }
}

/// Normalized column type stored in the catalog
///
/// Serialized as a compact token: `string-<length>`, `boolean`,
/// `decimal-<precision>-<scale>`, `date-<has time>`, `integer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum NormalizedType {
    /// Text with a maximum length
    String(u32),
    /// true/false
    Boolean,
    /// Fixed-point number
    Decimal {
        /// Total digits
        precision: u32,
        /// Digits after the decimal point
        scale: u32,
    },
    /// Calendar date, optionally with a time component
    Date {
        /// Whether a time component is present
        with_time: bool,
    },
    /// Whole number
    Integer,
}

impl std::fmt::Display for NormalizedType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NormalizedType::String(length) => write!(f, "string-{length}"),
            NormalizedType::Boolean => write!(f, "boolean"),
            NormalizedType::Decimal { precision, scale } => {
                write!(f, "decimal-{precision}-{scale}")
            }
            NormalizedType::Date { with_time } => write!(f, "date-{with_time}"),
            NormalizedType::Integer => write!(f, "integer"),
        }
    }
}

impl FromStr for NormalizedType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || format!("invalid normalized type token '{s}'");
        let number = |part: &str| part.parse::<u32>().map_err(|_| invalid());

        let parts: Vec<&str> = s.split('-').collect();
        match parts.as_slice() {
            ["boolean"] => Ok(NormalizedType::Boolean),
            ["integer"] => Ok(NormalizedType::Integer),
            ["string", length] => Ok(NormalizedType::String(number(length)?)),
            ["decimal", precision, scale] => Ok(NormalizedType::Decimal {
                precision: number(precision)?,
                scale: number(scale)?,
            }),
            ["date", "true"] => Ok(NormalizedType::Date { with_time: true }),
            ["date", "false"] => Ok(NormalizedType::Date { with_time: false }),
            _ => Err(invalid()),
        }
    }
}

impl TryFrom<String> for NormalizedType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NormalizedType> for String {
    fn from(value: NormalizedType) -> Self {
        value.to_string()
    }
}
