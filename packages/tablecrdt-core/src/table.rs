use std::collections::BTreeMap;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::fields::FieldUpdate;
use crate::ids::{RecordId, Stamp};
use crate::record::Record;
use crate::schema::Schema;
use crate::transaction::{TableChange, TablePatch};

/// Field name -> update for one record.
pub type RecordUpdate = BTreeMap<String, FieldUpdate>;
/// Record id -> updates; the argument of `Table::update`.
pub type TableUpdate = BTreeMap<RecordId, RecordUpdate>;

/// Schema-typed collection of records, owned by a datastore.
#[derive(Clone, Debug, PartialEq)]
pub struct Table {
    schema: Schema,
    records: BTreeMap<RecordId, Record>,
}

impl Table {
    pub fn create(schema: Schema) -> Self {
        Self {
            schema,
            records: BTreeMap::new(),
        }
    }

    /// Rebuild a table from stored records, rejecting any that do not fit the schema.
    pub(crate) fn from_records(schema: Schema, records: Vec<Record>) -> Result<Self> {
        let mut table = Self::create(schema);
        for record in records {
            if !record.conforms_to(&table.schema) {
                return Err(Error::InconsistentState(format!(
                    "record `{}` does not match schema `{}`",
                    record.id(),
                    table.schema.id
                )));
            }
            table.records.insert(record.id().to_owned(), record);
        }
        Ok(table)
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn get(&self, id: &str) -> Option<&Record> {
        self.records.get(id)
    }

    pub fn has(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    /// Records in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &Record> + '_ {
        self.records.values()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    fn validate(&self, updates: &TableUpdate) -> Result<()> {
        for fields in updates.values() {
            for (name, update) in fields {
                let descriptor = self.schema.require_field(name)?;
                if descriptor.kind() != update.kind() {
                    return Err(Error::FieldTypeMismatch {
                        field: name.clone(),
                        expected: descriptor.kind().as_str(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Apply local updates inside the open transaction of `ctx`.
    ///
    /// Unknown fields and mismatched update kinds are rejected before any record is touched.
    /// Records that do not exist yet are created with every field at its initial value.
    pub fn update(&mut self, ctx: &mut Context, updates: TableUpdate) -> Result<()> {
        if !ctx.in_transaction() {
            return Err(Error::OutsideTransaction);
        }
        self.validate(&updates)?;

        let stamp = ctx.stamp();
        for (record_id, fields) in updates {
            if !self.records.contains_key(&record_id) {
                self.records
                    .insert(record_id.clone(), Record::create(record_id.clone(), &self.schema));
                ctx.touch_record(&self.schema.id, &record_id);
            }
            let Some(record) = self.records.get_mut(&record_id) else {
                continue;
            };
            for (name, update) in fields {
                let (change, patch) = record.apply_update(&self.schema, &name, update, stamp)?;
                ctx.record(&self.schema, &record_id, &name, change, patch)?;
            }
        }
        Ok(())
    }

    /// Apply one transaction's patches for this table.
    ///
    /// A field that cannot be applied is logged and skipped; the rest still applies.
    pub(crate) fn apply_patch(&mut self, records: &TablePatch, stamp: Stamp) -> TableChange {
        let mut changes = TableChange::new();
        for (record_id, fields) in records {
            if !self.records.contains_key(record_id) {
                self.records
                    .insert(record_id.clone(), Record::create(record_id.clone(), &self.schema));
                changes.entry(record_id.clone()).or_default();
            }
            let Some(record) = self.records.get_mut(record_id) else {
                continue;
            };
            for (name, patch) in fields {
                match record.apply_patch(&self.schema, name, patch, stamp) {
                    Ok(change) if change.is_empty() => {}
                    Ok(change) => {
                        changes
                            .entry(record_id.clone())
                            .or_default()
                            .insert(name.clone(), change);
                    }
                    Err(e) => log::warn!(
                        "skipping {}.{record_id}.{name} from {}@{}: {e}",
                        self.schema.id,
                        stamp.store_id,
                        stamp.version
                    ),
                }
            }
        }
        changes
    }

    /// Local updates that revert a committed change of this table.
    ///
    /// Records created by the reverted transaction are kept, with their fields reverted.
    pub(crate) fn invert(&self, change: &TableChange, patch: &TablePatch) -> Result<TableUpdate> {
        let mut updates = TableUpdate::new();
        for (record_id, fields) in change {
            let Some(record) = self.records.get(record_id) else {
                continue;
            };
            let patches = patch.get(record_id);
            for (name, field_change) in fields {
                let (Some(descriptor), Some(metadata), Some(field_patch)) = (
                    self.schema.field(name),
                    record.metadata(name),
                    patches.and_then(|p| p.get(name)),
                ) else {
                    continue;
                };
                let update = descriptor.invert(name, metadata, field_change, field_patch)?;
                if !update.is_empty() {
                    updates
                        .entry(record_id.clone())
                        .or_default()
                        .insert(name.clone(), update);
                }
            }
        }
        Ok(updates)
    }
}
