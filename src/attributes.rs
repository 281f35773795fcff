//! Typed search-attribute updates.
//!
//! Tasks may declare `metadata.searchAttributes`, a map of attribute name
//! to `{ type, value }`. Values arrive loosely typed from YAML and are
//! coerced into the engine's typed update per the declared type. A `null`
//! value is an explicit unset. See the engine documentation for what the
//! types mean on the search side.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AttributeError {
    #[error("unknown search attribute type: {0}")]
    UnknownType(String),

    #[error("invalid value for search attribute type {kind}: {detail}")]
    InvalidType { kind: &'static str, detail: String },

    #[error("search attributes must be a map of name to {{type, value}}: {0}")]
    InvalidShape(String),
}

/// A declared search attribute, loosely typed as it appears in metadata.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchAttribute {
    #[serde(rename = "type")]
    pub kind: String,
    /// `null` (or omitted) means the typed key is explicitly unset.
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchAttributeKind {
    Bool,
    DateTime,
    Double,
    Int,
    Keyword,
    KeywordList,
    Text,
}

impl SearchAttributeKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "bool" => Some(Self::Bool),
            "datetime" => Some(Self::DateTime),
            "double" => Some(Self::Double),
            "int" => Some(Self::Int),
            "keyword" => Some(Self::Keyword),
            "keywordlist" => Some(Self::KeywordList),
            "text" => Some(Self::Text),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bool => "Bool",
            Self::DateTime => "DateTime",
            Self::Double => "Double",
            Self::Int => "Int",
            Self::Keyword => "Keyword",
            Self::KeywordList => "KeywordList",
            Self::Text => "Text",
        }
    }
}

/// A coerced, typed value ready for upsert.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Bool(bool),
    DateTime(DateTime<Utc>),
    Double(f64),
    Int(i64),
    Keyword(String),
    KeywordList(Vec<String>),
    Text(String),
}

/// One typed update against the current workflow execution. `value: None`
/// unsets the key.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchAttributeUpdate {
    pub key: String,
    pub kind: SearchAttributeKind,
    pub value: Option<AttributeValue>,
}

impl SearchAttribute {
    /// Coerce into a typed update for `key`, per the declared type.
    pub fn to_update(&self, key: &str) -> Result<SearchAttributeUpdate, AttributeError> {
        let kind = SearchAttributeKind::parse(&self.kind)
            .ok_or_else(|| AttributeError::UnknownType(self.kind.clone()))?;

        let value = if self.value.is_null() {
            None
        } else {
            Some(coerce(kind, &self.value)?)
        };

        Ok(SearchAttributeUpdate {
            key: key.to_string(),
            kind,
            value,
        })
    }
}

fn invalid(kind: SearchAttributeKind, value: &Value) -> AttributeError {
    AttributeError::InvalidType {
        kind: kind.as_str(),
        detail: value.to_string(),
    }
}

fn coerce(kind: SearchAttributeKind, value: &Value) -> Result<AttributeValue, AttributeError> {
    match kind {
        SearchAttributeKind::Bool => match value {
            Value::Bool(b) => Ok(AttributeValue::Bool(*b)),
            Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(AttributeValue::Bool(true)),
            Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(AttributeValue::Bool(false)),
            _ => Err(invalid(kind, value)),
        },
        SearchAttributeKind::DateTime => match value {
            // Integer values are treated as Unix epoch seconds
            Value::Number(n) => n
                .as_i64()
                .and_then(|secs| DateTime::from_timestamp(secs, 0))
                .map(AttributeValue::DateTime)
                .ok_or_else(|| invalid(kind, value)),
            Value::String(s) => DateTime::parse_from_rfc3339(s)
                .map(|t| AttributeValue::DateTime(t.with_timezone(&Utc)))
                .map_err(|e| AttributeError::InvalidType {
                    kind: kind.as_str(),
                    detail: format!("error parsing datetime string: {e}"),
                }),
            _ => Err(invalid(kind, value)),
        },
        SearchAttributeKind::Double => match value {
            Value::Number(n) => n
                .as_f64()
                .map(AttributeValue::Double)
                .ok_or_else(|| invalid(kind, value)),
            Value::String(s) => s
                .parse::<f64>()
                .map(AttributeValue::Double)
                .map_err(|_| invalid(kind, value)),
            _ => Err(invalid(kind, value)),
        },
        SearchAttributeKind::Int => match value {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(AttributeValue::Int(i))
                } else if let Some(f) = n.as_f64() {
                    // Truncate toward zero, as integer coercion does
                    Ok(AttributeValue::Int(f as i64))
                } else {
                    Err(invalid(kind, value))
                }
            }
            Value::String(s) => s
                .parse::<i64>()
                .map(AttributeValue::Int)
                .map_err(|_| invalid(kind, value)),
            _ => Err(invalid(kind, value)),
        },
        SearchAttributeKind::Keyword => match value {
            Value::String(s) => Ok(AttributeValue::Keyword(s.clone())),
            _ => Err(invalid(kind, value)),
        },
        SearchAttributeKind::Text => match value {
            Value::String(s) => Ok(AttributeValue::Text(s.clone())),
            _ => Err(invalid(kind, value)),
        },
        SearchAttributeKind::KeywordList => match value {
            Value::Array(items) => {
                let mut list = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::String(s) => list.push(s.clone()),
                        _ => return Err(invalid(kind, value)),
                    }
                }
                Ok(AttributeValue::KeywordList(list))
            }
            _ => Err(invalid(kind, value)),
        },
    }
}

/// Decode a `metadata.searchAttributes` subtree into named declarations,
/// in stable (sorted) order.
pub fn decode_search_attributes(
    value: &Value,
) -> Result<Vec<(String, SearchAttribute)>, AttributeError> {
    let decoded: BTreeMap<String, SearchAttribute> = serde_json::from_value(value.clone())
        .map_err(|e| AttributeError::InvalidShape(e.to_string()))?;
    Ok(decoded.into_iter().collect())
}
