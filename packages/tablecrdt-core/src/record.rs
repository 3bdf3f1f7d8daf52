use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{Error, Result};
use crate::fields::{FieldChange, FieldMetadata, FieldPatch, FieldUpdate, FieldValue};
use crate::ids::{RecordId, Stamp};
use crate::schema::Schema;

/// One row of a table: a value and private metadata per schema field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    id: RecordId,
    values: BTreeMap<String, FieldValue>,
    metadata: BTreeMap<String, FieldMetadata>,
}

impl Record {
    /// Seed every field with its descriptor's initial value.
    pub fn create(id: impl Into<RecordId>, schema: &Schema) -> Self {
        let mut values = BTreeMap::new();
        let mut metadata = BTreeMap::new();
        for (name, descriptor) in schema.fields() {
            values.insert(name.clone(), descriptor.create_value());
            metadata.insert(name.clone(), descriptor.create_metadata());
        }
        Self {
            id: id.into(),
            values,
            metadata,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.values.get(field)
    }

    pub fn values(&self) -> &BTreeMap<String, FieldValue> {
        &self.values
    }

    pub fn text(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(FieldValue::as_text)
    }

    pub fn list(&self, field: &str) -> Option<&[JsonValue]> {
        self.get(field).and_then(FieldValue::as_list)
    }

    pub fn register(&self, field: &str) -> Option<&JsonValue> {
        self.get(field).and_then(FieldValue::as_register)
    }

    pub fn map(&self, field: &str) -> Option<&BTreeMap<String, JsonValue>> {
        self.get(field).and_then(FieldValue::as_map)
    }

    pub fn metadata(&self, field: &str) -> Option<&FieldMetadata> {
        self.metadata.get(field)
    }

    /// `{"$id": id, field: value, ...}`
    pub fn to_json(&self) -> JsonValue {
        let mut object = serde_json::Map::new();
        object.insert("$id".to_owned(), JsonValue::String(self.id.clone()));
        for (name, value) in &self.values {
            object.insert(name.clone(), value.to_json());
        }
        JsonValue::Object(object)
    }

    /// Every schema field is present with the right kind, and nothing else is.
    pub fn conforms_to(&self, schema: &Schema) -> bool {
        self.values.len() == schema.fields().len()
            && self.metadata.len() == schema.fields().len()
            && schema.fields().iter().all(|(name, descriptor)| {
                match (self.values.get(name), self.metadata.get(name)) {
                    (Some(value), Some(metadata)) => descriptor.conforms(value, metadata),
                    _ => false,
                }
            })
    }

    fn slot(&mut self, field: &str) -> Result<(&mut FieldValue, &mut FieldMetadata)> {
        match (self.values.get_mut(field), self.metadata.get_mut(field)) {
            (Some(value), Some(metadata)) => Ok((value, metadata)),
            _ => Err(Error::InconsistentState(format!(
                "record `{}` has no state for field `{field}`",
                self.id
            ))),
        }
    }

    pub(crate) fn apply_update(
        &mut self,
        schema: &Schema,
        field: &str,
        update: FieldUpdate,
        stamp: Stamp,
    ) -> Result<(FieldChange, FieldPatch)> {
        let descriptor = schema.require_field(field)?;
        let (value, metadata) = self.slot(field)?;
        descriptor.apply_update(field, value, metadata, update, stamp)
    }

    pub(crate) fn apply_patch(
        &mut self,
        schema: &Schema,
        field: &str,
        patch: &FieldPatch,
        stamp: Stamp,
    ) -> Result<FieldChange> {
        let descriptor = schema.require_field(field)?;
        let (value, metadata) = self.slot(field)?;
        descriptor.apply_patch(field, value, metadata, patch, stamp)
    }
}
