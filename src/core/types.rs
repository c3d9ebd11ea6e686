use serde::{Serialize, Deserialize};
use std::cmp::Ordering;
use chrono::{DateTime, SecondsFormat, Utc};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Date(DateTime<Utc>),
    Boolean(bool),
}

impl FieldValue {
    /// Canonical string used when a value is indexed as a single term.
    pub fn as_index_text(&self) -> String {
        match self {
            FieldValue::Text(text) => text.clone(),
            FieldValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", *n as i64),
            FieldValue::Number(n) => n.to_string(),
            FieldValue::Date(date) => date.to_rfc3339_opts(SecondsFormat::Millis, true),
            FieldValue::Boolean(b) => b.to_string(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(text) => Some(text),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            FieldValue::Boolean(_) => 0,
            FieldValue::Number(_) => 1,
            FieldValue::Date(_) => 2,
            FieldValue::Text(_) => 3,
        }
    }

    /// Total order used for sorting; values of different kinds order by kind.
    pub fn sort_cmp(&self, other: &FieldValue) -> Ordering {
        match (self, other) {
            (FieldValue::Text(a), FieldValue::Text(b)) => a.cmp(b),
            (FieldValue::Number(a), FieldValue::Number(b)) => a.total_cmp(b),
            (FieldValue::Date(a), FieldValue::Date(b)) => a.cmp(b),
            (FieldValue::Boolean(a), FieldValue::Boolean(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(text: &str) -> Self {
        FieldValue::Text(text.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(text: String) -> Self {
        FieldValue::Text(text)
    }
}

impl From<f64> for FieldValue {
    fn from(n: f64) -> Self {
        FieldValue::Number(n)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Boolean(b)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(date: DateTime<Utc>) -> Self {
        FieldValue::Date(date)
    }
}

/// One indexable field of an entity, with its indexing flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub value: FieldValue,
    pub indexed: bool,
    pub stored: bool,
    pub tokenized: bool,
}

impl FieldDescriptor {
    /// Analyzed full-text field, stored for retrieval and sorting.
    pub fn text(name: &str, value: impl Into<FieldValue>) -> Self {
        FieldDescriptor {
            name: name.to_string(),
            value: value.into(),
            indexed: true,
            stored: true,
            tokenized: true,
        }
    }

    /// Indexed as one exact term.
    pub fn keyword(name: &str, value: impl Into<FieldValue>) -> Self {
        FieldDescriptor {
            name: name.to_string(),
            value: value.into(),
            indexed: true,
            stored: true,
            tokenized: false,
        }
    }

    /// Stored only, not searchable.
    pub fn stored(name: &str, value: impl Into<FieldValue>) -> Self {
        FieldDescriptor {
            name: name.to_string(),
            value: value.into(),
            indexed: false,
            stored: true,
            tokenized: false,
        }
    }

    pub fn unstored(mut self) -> Self {
        self.stored = false;
        self
    }
}

/// Type-erased view of a domain entity as the index sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub entity_type: String,
    pub id: String,
    pub fields: Vec<FieldDescriptor>,
}

impl Entity {
    pub fn new(entity_type: &str, id: &str) -> Self {
        Entity {
            entity_type: entity_type.to_string(),
            id: id.to_string(),
            fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Statically-typed descriptor list for a domain type, built by the type
/// itself instead of discovered at runtime.
pub trait Indexable {
    const ENTITY_TYPE: &'static str;

    fn id(&self) -> String;

    fn descriptors(&self) -> Vec<FieldDescriptor>;

    fn to_entity(&self) -> Entity {
        Entity {
            entity_type: Self::ENTITY_TYPE.to_string(),
            id: self.id(),
            fields: self.descriptors(),
        }
    }
}
