use std::collections::btree_map::Entry;

use crate::error::{Error, Result};
use crate::fields::{FieldChange, FieldPatch};
use crate::ids::{PatchId, Stamp};
use crate::schema::Schema;
use crate::transaction::{ChangeContent, PatchContent};

/// What produced the transaction currently open on a datastore.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransactionKind {
    Edit,
    Undo,
    Redo,
}

/// Everything a closed transaction accumulated.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Closed {
    pub stamp: Stamp,
    pub patch_id: PatchId,
    pub kind: TransactionKind,
    pub message: String,
    pub change: ChangeContent,
    pub patch: PatchContent,
}

/// Transaction state shared by the datastore and its tables.
///
/// Tables never hold a reference back to their datastore; the datastore lends its context
/// to `Table::update` instead.
#[derive(Clone, Debug)]
pub struct Context {
    stamp: Stamp,
    open: Option<Open>,
}

#[derive(Clone, Debug)]
struct Open {
    patch_id: PatchId,
    kind: TransactionKind,
    message: String,
    change: ChangeContent,
    patch: PatchContent,
}

impl Context {
    pub(crate) fn new(stamp: Stamp) -> Self {
        Self { stamp, open: None }
    }

    pub fn in_transaction(&self) -> bool {
        self.open.is_some()
    }

    /// Stamp of the open transaction, or of the last one when idle.
    pub fn stamp(&self) -> Stamp {
        self.stamp
    }

    pub fn patch_id(&self) -> Option<&PatchId> {
        self.open.as_ref().map(|open| &open.patch_id)
    }

    pub fn kind(&self) -> Option<TransactionKind> {
        self.open.as_ref().map(|open| open.kind)
    }

    pub(crate) fn begin(&mut self, stamp: Stamp, kind: TransactionKind, message: &str) -> PatchId {
        let patch_id = PatchId::from_stamp(stamp);
        self.stamp = stamp;
        self.open = Some(Open {
            patch_id: patch_id.clone(),
            kind,
            message: message.to_owned(),
            change: ChangeContent::new(),
            patch: PatchContent::new(),
        });
        patch_id
    }

    pub(crate) fn finish(&mut self) -> Option<Closed> {
        self.open.take().map(|open| Closed {
            stamp: self.stamp,
            patch_id: open.patch_id,
            kind: open.kind,
            message: open.message,
            change: open.change,
            patch: open.patch,
        })
    }

    /// Make sure the record shows up in the transaction even if no field changes.
    pub(crate) fn touch_record(&mut self, schema_id: &str, record_id: &str) {
        if let Some(open) = self.open.as_mut() {
            open.change
                .entry(schema_id.to_owned())
                .or_default()
                .entry(record_id.to_owned())
                .or_default();
            open.patch
                .entry(schema_id.to_owned())
                .or_default()
                .entry(record_id.to_owned())
                .or_default();
        }
    }

    /// Fold one field edit into the open transaction.
    pub(crate) fn record(
        &mut self,
        schema: &Schema,
        record_id: &str,
        field: &str,
        change: FieldChange,
        patch: FieldPatch,
    ) -> Result<()> {
        let Some(open) = self.open.as_mut() else {
            return Err(Error::OutsideTransaction);
        };
        let descriptor = schema.require_field(field)?;

        let changes = open
            .change
            .entry(schema.id.clone())
            .or_default()
            .entry(record_id.to_owned())
            .or_default();
        match changes.entry(field.to_owned()) {
            Entry::Vacant(slot) => {
                slot.insert(change);
            }
            Entry::Occupied(mut slot) => {
                let first = slot.get().clone();
                *slot.get_mut() = descriptor.merge_change(field, first, change)?;
            }
        }

        let patches = open
            .patch
            .entry(schema.id.clone())
            .or_default()
            .entry(record_id.to_owned())
            .or_default();
        match patches.entry(field.to_owned()) {
            Entry::Vacant(slot) => {
                slot.insert(patch);
            }
            Entry::Occupied(mut slot) => {
                let first = slot.get().clone();
                *slot.get_mut() = descriptor.merge_patch(field, first, patch)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::{FieldDescriptor, RegisterChange};
    use serde_json::json;

    fn register_change(previous: i64, current: i64) -> RegisterChange<serde_json::Value> {
        RegisterChange {
            previous: json!(previous),
            current: json!(current),
        }
    }

    #[test]
    fn repeated_field_edits_merge() {
        let schema = Schema::new("t").with_field("n", FieldDescriptor::register(0));
        let mut ctx = Context::new(Stamp::default());
        ctx.begin(Stamp::new(1, 1), TransactionKind::Edit, "");
        for (a, b) in [(0, 1), (1, 2)] {
            ctx.record(
                &schema,
                "r",
                "n",
                FieldChange::Register(register_change(a, b)),
                FieldPatch::Register(register_change(a, b)),
            )
            .unwrap();
        }
        let closed = ctx.finish().unwrap();
        assert_eq!(
            closed.change["t"]["r"]["n"],
            FieldChange::Register(register_change(0, 2))
        );
        assert!(!ctx.in_transaction());
    }

    #[test]
    fn recording_while_idle_fails() {
        let schema = Schema::new("t").with_field("n", FieldDescriptor::register(0));
        let mut ctx = Context::new(Stamp::default());
        let change = FieldChange::Register(register_change(0, 1));
        let patch = FieldPatch::Register(register_change(0, 1));
        assert!(ctx.record(&schema, "r", "n", change, patch).is_err());
    }
}
