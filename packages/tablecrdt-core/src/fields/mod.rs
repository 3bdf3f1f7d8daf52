//! Conflict-resolving field types and the closed set of descriptors a schema can use.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{Error, Result};
use crate::ids::{ElementId, Stamp};

pub mod list;
pub mod map;
pub mod register;
pub mod sequence;
pub mod text;

pub use list::{ListChange, ListChangePart, ListField, ListPatch, ListPatchPart, ListSplice, ListUpdate};
pub use map::{clear_update, MapChange, MapChangeEntry, MapEntry, MapField, MapMetadata, MapPatch, MapUpdate};
pub use register::{RegisterChange, RegisterField, RegisterMetadata, RegisterPatch};
pub use sequence::SequenceMetadata;
pub use text::{TextChange, TextChangePart, TextField, TextPatch, TextPatchPart, TextSplice, TextUpdate};

/// Result of a local edit.
#[derive(Clone, Debug, PartialEq)]
pub struct Updated<V, C, P> {
    pub value: V,
    pub change: C,
    pub patch: P,
}

/// Result of applying a remote patch.
#[derive(Clone, Debug, PartialEq)]
pub struct Patched<V, C> {
    pub value: V,
    pub change: C,
}

/// Contract shared by every field type.
///
/// `apply_update` handles local edits and produces both the positional `Change` and the
/// replica-facing `Patch`. `apply_patch` must tolerate duplicate and out-of-order delivery.
/// Metadata is mutated in place and never leaves the replica.
pub trait Field {
    type Value;
    type Update;
    type Metadata;
    type Change;
    type Patch;

    fn create_value(&self) -> Self::Value;
    fn create_metadata(&self) -> Self::Metadata;

    fn apply_update(
        &self,
        previous: &Self::Value,
        update: Self::Update,
        metadata: &mut Self::Metadata,
        stamp: Stamp,
    ) -> Result<Updated<Self::Value, Self::Change, Self::Patch>>;

    fn apply_patch(
        &self,
        previous: &Self::Value,
        patch: &Self::Patch,
        metadata: &mut Self::Metadata,
        stamp: Stamp,
    ) -> Result<Patched<Self::Value, Self::Change>>;

    fn merge_change(&self, first: Self::Change, second: Self::Change) -> Self::Change;
    fn merge_patch(&self, first: Self::Patch, second: Self::Patch) -> Self::Patch;

    /// Local update that reverts a committed edit against the current metadata.
    fn invert(&self, metadata: &Self::Metadata, change: &Self::Change, patch: &Self::Patch) -> Self::Update;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Text,
    List,
    Register,
    Map,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Text => "text",
            FieldKind::List => "list",
            FieldKind::Register => "register",
            FieldKind::Map => "map",
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Field type as declared in a schema, e.g. `{"type": "register", "value": 0}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FieldDescriptor {
    Text(TextField),
    List(ListField<JsonValue>),
    Register(RegisterField<JsonValue>),
    Map(MapField<JsonValue>),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldValue {
    Text(String),
    List(Vec<JsonValue>),
    Register(JsonValue),
    Map(BTreeMap<String, JsonValue>),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldMetadata {
    Text(SequenceMetadata),
    List(SequenceMetadata),
    Register(RegisterMetadata),
    Map(MapMetadata<JsonValue>),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldUpdate {
    Text(TextUpdate),
    List(ListUpdate<JsonValue>),
    Register(JsonValue),
    Map(MapUpdate<JsonValue>),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldChange {
    Text(TextChange),
    List(ListChange<JsonValue>),
    Register(RegisterChange<JsonValue>),
    Map(MapChange<JsonValue>),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldPatch {
    Text(TextPatch),
    List(ListPatch<JsonValue>),
    Register(RegisterPatch<JsonValue>),
    Map(MapPatch<JsonValue>),
}

impl FieldValue {
    pub fn kind(&self) -> FieldKind {
        match self {
            FieldValue::Text(_) => FieldKind::Text,
            FieldValue::List(_) => FieldKind::List,
            FieldValue::Register(_) => FieldKind::Register,
            FieldValue::Map(_) => FieldKind::Map,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(text) => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[JsonValue]> {
        match self {
            FieldValue::List(values) => Some(values.as_slice()),
            _ => None,
        }
    }

    pub fn as_register(&self) -> Option<&JsonValue> {
        match self {
            FieldValue::Register(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, JsonValue>> {
        match self {
            FieldValue::Map(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            FieldValue::Text(text) => JsonValue::String(text.clone()),
            FieldValue::List(values) => JsonValue::Array(values.clone()),
            FieldValue::Register(value) => value.clone(),
            FieldValue::Map(entries) => JsonValue::Object(
                entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            ),
        }
    }
}

impl FieldMetadata {
    pub fn kind(&self) -> FieldKind {
        match self {
            FieldMetadata::Text(_) => FieldKind::Text,
            FieldMetadata::List(_) => FieldKind::List,
            FieldMetadata::Register(_) => FieldKind::Register,
            FieldMetadata::Map(_) => FieldKind::Map,
        }
    }
}

impl FieldUpdate {
    pub fn text(splices: Vec<TextSplice>) -> Self {
        FieldUpdate::Text(splices)
    }

    pub fn list(splices: Vec<ListSplice<JsonValue>>) -> Self {
        FieldUpdate::List(splices)
    }

    pub fn register(value: impl Into<JsonValue>) -> Self {
        FieldUpdate::Register(value.into())
    }

    pub fn map(entries: MapUpdate<JsonValue>) -> Self {
        FieldUpdate::Map(entries)
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            FieldUpdate::Text(_) => FieldKind::Text,
            FieldUpdate::List(_) => FieldKind::List,
            FieldUpdate::Register(_) => FieldKind::Register,
            FieldUpdate::Map(_) => FieldKind::Map,
        }
    }

    /// Whether applying the update would be a no-op.
    pub fn is_empty(&self) -> bool {
        match self {
            FieldUpdate::Text(splices) => splices.iter().all(|s| s.remove == 0 && s.text.is_empty()),
            FieldUpdate::List(splices) => splices.iter().all(|s| s.remove == 0 && s.values.is_empty()),
            FieldUpdate::Register(_) => false,
            FieldUpdate::Map(entries) => entries.is_empty(),
        }
    }
}

impl FieldChange {
    pub fn kind(&self) -> FieldKind {
        match self {
            FieldChange::Text(_) => FieldKind::Text,
            FieldChange::List(_) => FieldKind::List,
            FieldChange::Register(_) => FieldKind::Register,
            FieldChange::Map(_) => FieldKind::Map,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            FieldChange::Text(parts) => parts.is_empty(),
            FieldChange::List(parts) => parts.is_empty(),
            FieldChange::Register(change) => change.previous == change.current,
            FieldChange::Map(entries) => entries.is_empty(),
        }
    }
}

impl FieldPatch {
    pub fn kind(&self) -> FieldKind {
        match self {
            FieldPatch::Text(_) => FieldKind::Text,
            FieldPatch::List(_) => FieldKind::List,
            FieldPatch::Register(_) => FieldKind::Register,
            FieldPatch::Map(_) => FieldKind::Map,
        }
    }

    /// Ids that inverting this patch puts back.
    pub(crate) fn reinserted_ids(&self) -> Option<Vec<ElementId>> {
        match self {
            FieldPatch::Text(parts) => Some(
                parts
                    .iter()
                    .rev()
                    .flat_map(|p| p.removed_ids.iter().cloned())
                    .collect(),
            ),
            FieldPatch::List(parts) => Some(
                parts
                    .iter()
                    .rev()
                    .flat_map(|p| p.removed_ids.iter().cloned())
                    .collect(),
            ),
            _ => None,
        }
    }

    pub(crate) fn inserted_ids(&self) -> Option<Vec<ElementId>> {
        match self {
            FieldPatch::Text(parts) => Some(
                parts
                    .iter()
                    .flat_map(|p| p.inserted_ids.iter().cloned())
                    .collect(),
            ),
            FieldPatch::List(parts) => Some(
                parts
                    .iter()
                    .flat_map(|p| p.inserted_ids.iter().cloned())
                    .collect(),
            ),
            _ => None,
        }
    }

    /// Point element ids at the ids their elements were re-inserted under.
    pub(crate) fn rename_ids(&mut self, renames: &HashMap<ElementId, ElementId>) {
        let rename = |id: &mut ElementId| {
            if let Some(renamed) = renames.get(id) {
                *id = renamed.clone();
            }
        };
        match self {
            FieldPatch::Text(parts) => {
                for part in parts {
                    part.removed_ids.iter_mut().for_each(rename);
                    part.inserted_ids.iter_mut().for_each(rename);
                }
            }
            FieldPatch::List(parts) => {
                for part in parts {
                    part.removed_ids.iter_mut().for_each(rename);
                    part.inserted_ids.iter_mut().for_each(rename);
                }
            }
            FieldPatch::Register(_) | FieldPatch::Map(_) => {}
        }
    }
}

fn corrupt(name: &str, kind: FieldKind) -> Error {
    Error::InconsistentState(format!(
        "field `{name}` holds state that is not a {kind} value"
    ))
}

fn mismatch(name: &str, kind: FieldKind) -> Error {
    Error::FieldTypeMismatch {
        field: name.to_owned(),
        expected: kind.as_str(),
    }
}

impl FieldDescriptor {
    pub fn text() -> Self {
        FieldDescriptor::Text(TextField::new())
    }

    pub fn list() -> Self {
        FieldDescriptor::List(ListField::new())
    }

    pub fn register(initial: impl Into<JsonValue>) -> Self {
        FieldDescriptor::Register(RegisterField::new(initial.into()))
    }

    pub fn map() -> Self {
        FieldDescriptor::Map(MapField::new())
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            FieldDescriptor::Text(_) => FieldKind::Text,
            FieldDescriptor::List(_) => FieldKind::List,
            FieldDescriptor::Register(_) => FieldKind::Register,
            FieldDescriptor::Map(_) => FieldKind::Map,
        }
    }

    pub fn create_value(&self) -> FieldValue {
        match self {
            FieldDescriptor::Text(f) => FieldValue::Text(f.create_value()),
            FieldDescriptor::List(f) => FieldValue::List(f.create_value()),
            FieldDescriptor::Register(f) => FieldValue::Register(f.create_value()),
            FieldDescriptor::Map(f) => FieldValue::Map(f.create_value()),
        }
    }

    pub fn create_metadata(&self) -> FieldMetadata {
        match self {
            FieldDescriptor::Text(f) => FieldMetadata::Text(f.create_metadata()),
            FieldDescriptor::List(f) => FieldMetadata::List(f.create_metadata()),
            FieldDescriptor::Register(f) => FieldMetadata::Register(f.create_metadata()),
            FieldDescriptor::Map(f) => FieldMetadata::Map(f.create_metadata()),
        }
    }

    /// Whether a stored value/metadata pair has this descriptor's shape.
    pub fn conforms(&self, value: &FieldValue, metadata: &FieldMetadata) -> bool {
        value.kind() == self.kind() && metadata.kind() == self.kind()
    }

    /// Apply a local update in place, returning the field's change and patch.
    pub fn apply_update(
        &self,
        name: &str,
        value: &mut FieldValue,
        metadata: &mut FieldMetadata,
        update: FieldUpdate,
        stamp: Stamp,
    ) -> Result<(FieldChange, FieldPatch)> {
        if update.kind() != self.kind() {
            return Err(mismatch(name, self.kind()));
        }
        match (self, value, metadata, update) {
            (
                FieldDescriptor::Text(f),
                FieldValue::Text(v),
                FieldMetadata::Text(m),
                FieldUpdate::Text(u),
            ) => {
                let out = f.apply_update(v, u, m, stamp)?;
                *v = out.value;
                Ok((FieldChange::Text(out.change), FieldPatch::Text(out.patch)))
            }
            (
                FieldDescriptor::List(f),
                FieldValue::List(v),
                FieldMetadata::List(m),
                FieldUpdate::List(u),
            ) => {
                let out = f.apply_update(v, u, m, stamp)?;
                *v = out.value;
                Ok((FieldChange::List(out.change), FieldPatch::List(out.patch)))
            }
            (
                FieldDescriptor::Register(f),
                FieldValue::Register(v),
                FieldMetadata::Register(m),
                FieldUpdate::Register(u),
            ) => {
                let out = f.apply_update(v, u, m, stamp)?;
                *v = out.value;
                Ok((FieldChange::Register(out.change), FieldPatch::Register(out.patch)))
            }
            (
                FieldDescriptor::Map(f),
                FieldValue::Map(v),
                FieldMetadata::Map(m),
                FieldUpdate::Map(u),
            ) => {
                let out = f.apply_update(v, u, m, stamp)?;
                *v = out.value;
                Ok((FieldChange::Map(out.change), FieldPatch::Map(out.patch)))
            }
            (descriptor, ..) => Err(corrupt(name, descriptor.kind())),
        }
    }

    /// Apply a remote patch in place, returning the field's change.
    pub fn apply_patch(
        &self,
        name: &str,
        value: &mut FieldValue,
        metadata: &mut FieldMetadata,
        patch: &FieldPatch,
        stamp: Stamp,
    ) -> Result<FieldChange> {
        if patch.kind() != self.kind() {
            return Err(mismatch(name, self.kind()));
        }
        match (self, value, metadata, patch) {
            (
                FieldDescriptor::Text(f),
                FieldValue::Text(v),
                FieldMetadata::Text(m),
                FieldPatch::Text(p),
            ) => {
                let out = f.apply_patch(v, p, m, stamp)?;
                *v = out.value;
                Ok(FieldChange::Text(out.change))
            }
            (
                FieldDescriptor::List(f),
                FieldValue::List(v),
                FieldMetadata::List(m),
                FieldPatch::List(p),
            ) => {
                let out = f.apply_patch(v, p, m, stamp)?;
                *v = out.value;
                Ok(FieldChange::List(out.change))
            }
            (
                FieldDescriptor::Register(f),
                FieldValue::Register(v),
                FieldMetadata::Register(m),
                FieldPatch::Register(p),
            ) => {
                let out = f.apply_patch(v, p, m, stamp)?;
                *v = out.value;
                Ok(FieldChange::Register(out.change))
            }
            (
                FieldDescriptor::Map(f),
                FieldValue::Map(v),
                FieldMetadata::Map(m),
                FieldPatch::Map(p),
            ) => {
                let out = f.apply_patch(v, p, m, stamp)?;
                *v = out.value;
                Ok(FieldChange::Map(out.change))
            }
            (descriptor, ..) => Err(corrupt(name, descriptor.kind())),
        }
    }

    pub fn merge_change(&self, name: &str, first: FieldChange, second: FieldChange) -> Result<FieldChange> {
        match (self, first, second) {
            (FieldDescriptor::Text(f), FieldChange::Text(a), FieldChange::Text(b)) => {
                Ok(FieldChange::Text(f.merge_change(a, b)))
            }
            (FieldDescriptor::List(f), FieldChange::List(a), FieldChange::List(b)) => {
                Ok(FieldChange::List(f.merge_change(a, b)))
            }
            (FieldDescriptor::Register(f), FieldChange::Register(a), FieldChange::Register(b)) => {
                Ok(FieldChange::Register(f.merge_change(a, b)))
            }
            (FieldDescriptor::Map(f), FieldChange::Map(a), FieldChange::Map(b)) => {
                Ok(FieldChange::Map(f.merge_change(a, b)))
            }
            (descriptor, ..) => Err(mismatch(name, descriptor.kind())),
        }
    }

    pub fn merge_patch(&self, name: &str, first: FieldPatch, second: FieldPatch) -> Result<FieldPatch> {
        match (self, first, second) {
            (FieldDescriptor::Text(f), FieldPatch::Text(a), FieldPatch::Text(b)) => {
                Ok(FieldPatch::Text(f.merge_patch(a, b)))
            }
            (FieldDescriptor::List(f), FieldPatch::List(a), FieldPatch::List(b)) => {
                Ok(FieldPatch::List(f.merge_patch(a, b)))
            }
            (FieldDescriptor::Register(f), FieldPatch::Register(a), FieldPatch::Register(b)) => {
                Ok(FieldPatch::Register(f.merge_patch(a, b)))
            }
            (FieldDescriptor::Map(f), FieldPatch::Map(a), FieldPatch::Map(b)) => {
                Ok(FieldPatch::Map(f.merge_patch(a, b)))
            }
            (descriptor, ..) => Err(mismatch(name, descriptor.kind())),
        }
    }

    pub fn invert(
        &self,
        name: &str,
        metadata: &FieldMetadata,
        change: &FieldChange,
        patch: &FieldPatch,
    ) -> Result<FieldUpdate> {
        match (self, metadata, change, patch) {
            (
                FieldDescriptor::Text(f),
                FieldMetadata::Text(m),
                FieldChange::Text(c),
                FieldPatch::Text(p),
            ) => Ok(FieldUpdate::Text(f.invert(m, c, p))),
            (
                FieldDescriptor::List(f),
                FieldMetadata::List(m),
                FieldChange::List(c),
                FieldPatch::List(p),
            ) => Ok(FieldUpdate::List(f.invert(m, c, p))),
            (
                FieldDescriptor::Register(f),
                FieldMetadata::Register(m),
                FieldChange::Register(c),
                FieldPatch::Register(p),
            ) => Ok(FieldUpdate::Register(f.invert(m, c, p))),
            (
                FieldDescriptor::Map(f),
                FieldMetadata::Map(m),
                FieldChange::Map(c),
                FieldPatch::Map(p),
            ) => Ok(FieldUpdate::Map(f.invert(m, c, p))),
            (descriptor, ..) => Err(mismatch(name, descriptor.kind())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn descriptors_use_type_tags() {
        let descriptor: FieldDescriptor =
            serde_json::from_value(json!({"type": "register", "value": 0})).unwrap();
        assert_eq!(descriptor, FieldDescriptor::register(0));
        let descriptor: FieldDescriptor = serde_json::from_value(json!({"type": "text"})).unwrap();
        assert_eq!(descriptor.kind(), FieldKind::Text);
        assert_eq!(
            serde_json::to_value(FieldDescriptor::list()).unwrap(),
            json!({"type": "list"})
        );
    }

    #[test]
    fn dispatch_rejects_mismatched_updates() {
        let descriptor = FieldDescriptor::text();
        let mut value = descriptor.create_value();
        let mut meta = descriptor.create_metadata();
        let err = descriptor
            .apply_update("title", &mut value, &mut meta, FieldUpdate::register(1), Stamp::new(1, 1))
            .unwrap_err();
        assert_eq!(
            err,
            Error::FieldTypeMismatch {
                field: "title".into(),
                expected: "text"
            }
        );
    }

    #[test]
    fn dispatch_updates_value_in_place() {
        let descriptor = FieldDescriptor::register(json!(0));
        let mut value = descriptor.create_value();
        let mut meta = descriptor.create_metadata();
        let (change, patch) = descriptor
            .apply_update("count", &mut value, &mut meta, FieldUpdate::register(3), Stamp::new(1, 1))
            .unwrap();
        assert_eq!(value, FieldValue::Register(json!(3)));
        assert_eq!(
            change,
            FieldChange::Register(RegisterChange {
                previous: json!(0),
                current: json!(3)
            })
        );
        assert_eq!(
            serde_json::to_value(&patch).unwrap(),
            json!({"register": {"previous": 0, "current": 3}})
        );
    }

    #[test]
    fn empty_updates_are_detected() {
        assert!(FieldUpdate::text(vec![TextSplice::insert(3, "")]).is_empty());
        assert!(!FieldUpdate::list(vec![ListSplice::remove(0, 1)]).is_empty());
        assert!(!FieldUpdate::register(JsonValue::Null).is_empty());
    }

    #[test]
    fn register_change_without_a_new_value_is_empty() {
        let same = FieldChange::Register(RegisterChange {
            previous: json!(6),
            current: json!(6),
        });
        let moved = FieldChange::Register(RegisterChange {
            previous: json!(6),
            current: json!(1),
        });
        assert!(same.is_empty());
        assert!(!moved.is_empty());
    }
}
