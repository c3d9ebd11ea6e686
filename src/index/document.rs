use serde::{Serialize, Deserialize};
use crate::analysis::analyzer::{AnalyzerRegistry, KEYWORD, STANDARD};
use crate::core::error::Result;
use crate::core::types::{Entity, FieldValue};

/// Reserved field holding the entity id (keyword indexed).
pub const ID_FIELD: &str = "_id";
/// Reserved field holding the entity type (keyword indexed).
pub const TYPE_FIELD: &str = "_type";

/// What a segment keeps of a document for retrieval and sorting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub entity_type: String,
    pub id: String,
    pub fields: Vec<(String, FieldValue)>,
}

impl StoredDocument {
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    /// Value used when sorting by `name`; reserved fields resolve to the key.
    pub fn sort_value(&self, name: &str) -> Option<FieldValue> {
        match name {
            ID_FIELD => Some(FieldValue::Text(self.id.clone())),
            TYPE_FIELD => Some(FieldValue::Text(self.entity_type.clone())),
            _ => self.field(name).cloned(),
        }
    }

    pub fn matches_key(&self, entity_type: &str, id: &str) -> bool {
        self.entity_type == entity_type && self.id == id
    }
}

/// Terms produced for one field of a document.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzedField {
    pub name: String,
    pub terms: Vec<String>,
}

/// A document ready to be added to a segment.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzedDocument {
    pub stored: StoredDocument,
    pub fields: Vec<AnalyzedField>,
}

impl AnalyzedDocument {
    pub fn from_entity(entity: &Entity, analyzers: &AnalyzerRegistry) -> Result<Self> {
        let mut fields = vec![
            AnalyzedField { name: ID_FIELD.to_string(), terms: vec![entity.id.clone()] },
            AnalyzedField { name: TYPE_FIELD.to_string(), terms: vec![entity.entity_type.clone()] },
        ];
        let mut stored = Vec::new();

        for descriptor in &entity.fields {
            if descriptor.stored {
                stored.push((descriptor.name.clone(), descriptor.value.clone()));
            }
            if !descriptor.indexed {
                continue;
            }

            let terms: Vec<String> = match (&descriptor.value, descriptor.tokenized) {
                (FieldValue::Text(text), true) => analyzers.analyze(STANDARD, text)?,
                (value, _) => analyzers.analyze(KEYWORD, &value.as_index_text())?,
            }
            .into_iter()
            .map(|token| token.text)
            .collect();

            // Repeated descriptors for one name feed a single field
            match fields.iter_mut().find(|f| f.name == descriptor.name) {
                Some(field) => field.terms.extend(terms),
                None => fields.push(AnalyzedField { name: descriptor.name.clone(), terms }),
            }
        }

        Ok(AnalyzedDocument {
            stored: StoredDocument {
                entity_type: entity.entity_type.clone(),
                id: entity.id.clone(),
                fields: stored,
            },
            fields,
        })
    }
}
