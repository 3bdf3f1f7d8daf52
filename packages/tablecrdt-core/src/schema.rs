use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::fields::FieldDescriptor;
use crate::ids::SchemaId;

/// Shape of every record in one table: field name -> descriptor.
///
/// Schemas are immutable once a table has been created from them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub id: SchemaId,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldDescriptor>,
}

impl Schema {
    pub fn new(id: impl Into<SchemaId>) -> Self {
        Self {
            id: id.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, descriptor: FieldDescriptor) -> Self {
        self.fields.insert(name.into(), descriptor);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldDescriptor> {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.get(name)
    }

    /// Look up a field or fail with `UnknownField`.
    pub fn require_field(&self, name: &str) -> Result<&FieldDescriptor> {
        self.field(name).ok_or_else(|| Error::UnknownField {
            schema: self.id.clone(),
            field: name.to_owned(),
        })
    }

    /// `$` and `@` prefixes are reserved for record metadata such as `$id`.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(Error::InvalidSchema("schema id must not be empty".into()));
        }
        for name in self.fields.keys() {
            if name.is_empty() {
                return Err(Error::InvalidSchema(format!(
                    "schema `{}` has a field with an empty name",
                    self.id
                )));
            }
            if name.starts_with('$') || name.starts_with('@') {
                return Err(Error::InvalidSchema(format!(
                    "field `{name}` in schema `{}` uses a reserved prefix",
                    self.id
                )));
            }
        }
        Ok(())
    }
}
