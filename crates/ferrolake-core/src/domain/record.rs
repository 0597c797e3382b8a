use serde::Serialize;

use crate::{ProviderId, UtcDateTime};

/// A single normalized cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(value) => Some(*value as f64),
            Self::Float(value) => Some(*value),
            Self::Null | Self::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// One normalized observation: a market snapshot, a video, a repository.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    /// Provider-assigned identifier.
    pub record_id: String,
    /// Sub-scope the record came from (symbol, channel, language).
    pub source_scope: String,
    pub extracted_at: UtcDateTime,
    /// Provider attributes in insertion order.
    pub attributes: Vec<(String, Value)>,
}

impl Record {
    pub fn new(
        record_id: impl Into<String>,
        source_scope: impl Into<String>,
        extracted_at: UtcDateTime,
    ) -> Self {
        Self {
            record_id: record_id.into(),
            source_scope: source_scope.into(),
            extracted_at,
            attributes: Vec::new(),
        }
    }

    /// Sets an attribute, replacing an earlier value with the same name.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let name = name.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((name, value)),
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| value)
    }
}

/// Records from one provider sharing one extraction timestamp.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Batch {
    pub provider: ProviderId,
    pub extracted_at: UtcDateTime,
    pub records: Vec<Record>,
}

impl Batch {
    pub fn new(provider: ProviderId, extracted_at: UtcDateTime, records: Vec<Record>) -> Self {
        Self {
            provider,
            extracted_at,
            records,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Attribute names across all records, in first-seen order.
    pub fn attribute_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for record in &self.records {
            for (name, _) in &record.attributes {
                if !names.contains(&name.as_str()) {
                    names.push(name);
                }
            }
        }
        names
    }
}
