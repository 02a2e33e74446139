// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

//! Column descriptors and scalar values.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Surrogate key substituted for a dictionary-encoded value.
pub type SurrogateKey = u32;

/// Reserved key for null / default. Real keys start at [`FIRST_SURROGATE_KEY`].
pub const NULL_SURROGATE_KEY: SurrogateKey = 0;
pub const FIRST_SURROGATE_KEY: SurrogateKey = 1;

/// How a dimension column is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DimensionEncoding {
    /// Values are replaced by surrogate keys.
    Dictionary,
    /// Values are stored as raw UTF-8.
    Direct,
}

/// A categorical column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimension {
    /// Stable identifier, survives renames.
    pub column_id: String,
    pub name: String,
    /// Position of the column among the table's dimensions.
    pub ordinal: usize,
    pub encoding: DimensionEncoding,
    /// Value surfaced for blocks written before the column existed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
}

impl Dimension {
    pub fn new(
        column_id: impl Into<String>,
        name: impl Into<String>,
        ordinal: usize,
        encoding: DimensionEncoding,
    ) -> Self {
        Self {
            column_id: column_id.into(),
            name: name.into(),
            ordinal,
            encoding,
            default_value: None,
        }
    }

    pub fn dictionary(column_id: impl Into<String>, name: impl Into<String>, ordinal: usize) -> Self {
        Self::new(column_id, name, ordinal, DimensionEncoding::Dictionary)
    }

    pub fn direct(column_id: impl Into<String>, name: impl Into<String>, ordinal: usize) -> Self {
        Self::new(column_id, name, ordinal, DimensionEncoding::Direct)
    }

    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn has_dictionary(&self) -> bool {
        self.encoding == DimensionEncoding::Dictionary
    }
}

/// A numeric column used for aggregation. Never dictionary encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measure {
    pub column_id: String,
    pub name: String,
    pub ordinal: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<f64>,
}

impl Measure {
    pub fn new(column_id: impl Into<String>, name: impl Into<String>, ordinal: usize) -> Self {
        Self {
            column_id: column_id.into(),
            name: name.into(),
            ordinal,
            default_value: None,
        }
    }

    pub fn with_default(mut self, value: f64) -> Self {
        self.default_value = Some(value);
        self
    }
}

/// A single decoded cell.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    /// An uninterpreted surrogate key, as returned by raw detail queries.
    Key(SurrogateKey),
    Utf8(String),
    Float64(f64),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Utf8(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float64(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Utf8(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Utf8(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float64(value)
    }
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Self::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Key(key) => write!(f, "#{key}"),
            Self::Utf8(s) => write!(f, "{s}"),
            Self::Float64(v) => write!(f, "{v}"),
        }
    }
}
