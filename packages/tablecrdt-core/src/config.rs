use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ids::StoreId;
use crate::schema::Schema;

pub const DEFAULT_UNDO_LIMIT: usize = 100;

fn default_undo_limit() -> usize {
    DEFAULT_UNDO_LIMIT
}

/// Startup options for a `Datastore`.
///
/// ```json
/// {"storeId": 3, "undoLimit": 50, "schemas": [{"id": "todo", "fields": {"title": {"type": "text"}}}]}
/// ```
///
/// When `storeId` is missing the adapter allocates one.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatastoreConfig {
    #[serde(default)]
    pub store_id: Option<StoreId>,
    #[serde(default)]
    pub schemas: Vec<Schema>,
    #[serde(default = "default_undo_limit")]
    pub undo_limit: usize,
}

impl Default for DatastoreConfig {
    fn default() -> Self {
        Self {
            store_id: None,
            schemas: Vec::new(),
            undo_limit: DEFAULT_UNDO_LIMIT,
        }
    }
}

impl DatastoreConfig {
    pub fn new(schemas: Vec<Schema>) -> Self {
        Self {
            schemas,
            ..Self::default()
        }
    }

    pub fn with_store_id(mut self, store_id: StoreId) -> Self {
        self.store_id = Some(store_id);
        self
    }

    pub fn with_undo_limit(mut self, undo_limit: usize) -> Self {
        self.undo_limit = undo_limit;
        self
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.store_id == Some(0) {
            return Err(Error::InvalidStoreId(0));
        }
        let mut seen = HashSet::new();
        for schema in &self.schemas {
            schema.validate()?;
            if !seen.insert(schema.id.as_str()) {
                return Err(Error::InvalidSchema(format!(
                    "schema id `{}` is declared twice",
                    schema.id
                )));
            }
        }
        Ok(())
    }
}
