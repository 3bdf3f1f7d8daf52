use serde::{Deserialize, Serialize};

use super::sequence::{self, PatchPart, SequenceMetadata};
use super::{Field, Patched, Updated};
use crate::error::Result;
use crate::ids::{ElementId, Stamp};

/// Replace `remove` characters starting at `index` with `text`.
///
/// Positions count Unicode scalar values. A negative `index` counts from the end.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSplice {
    pub index: i64,
    #[serde(default)]
    pub remove: usize,
    #[serde(default)]
    pub text: String,
    /// Buried ids the inserted characters are restored from; set by undo/redo.
    #[serde(skip)]
    pub(crate) anchors: Vec<ElementId>,
}

impl TextSplice {
    pub fn new(index: i64, remove: usize, text: impl Into<String>) -> Self {
        Self {
            index,
            remove,
            text: text.into(),
            anchors: Vec::new(),
        }
    }

    pub fn insert(index: i64, text: impl Into<String>) -> Self {
        Self::new(index, 0, text)
    }

    pub fn remove(index: i64, count: usize) -> Self {
        Self::new(index, count, String::new())
    }
}

pub type TextUpdate = Vec<TextSplice>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextChangePart {
    pub index: usize,
    pub removed: String,
    pub inserted: String,
}

pub type TextChange = Vec<TextChangePart>;

/// `removed_text`/`inserted_text` hold one character per id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextPatchPart {
    pub removed_ids: Vec<ElementId>,
    pub removed_text: String,
    pub inserted_ids: Vec<ElementId>,
    pub inserted_text: String,
}

pub type TextPatch = Vec<TextPatchPart>;

impl TextPatchPart {
    fn as_part(&self) -> PatchPart<'_, char> {
        PatchPart {
            removed_ids: &self.removed_ids,
            removed: self.removed_text.chars().collect(),
            inserted_ids: &self.inserted_ids,
            inserted: self.inserted_text.chars().collect(),
        }
    }
}

/// Collaborative plain text.
///
/// Braced so it serializes as an (empty) map inside a tagged `FieldDescriptor`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextField {}

impl TextField {
    pub fn new() -> Self {
        Self {}
    }
}

impl Field for TextField {
    type Value = String;
    type Update = TextUpdate;
    type Metadata = SequenceMetadata;
    type Change = TextChange;
    type Patch = TextPatch;

    fn create_value(&self) -> String {
        String::new()
    }

    fn create_metadata(&self) -> SequenceMetadata {
        SequenceMetadata::default()
    }

    fn apply_update(
        &self,
        previous: &String,
        update: TextUpdate,
        metadata: &mut SequenceMetadata,
        stamp: Stamp,
    ) -> Result<Updated<String, TextChange, TextPatch>> {
        let mut chars: Vec<char> = previous.chars().collect();
        let mut change = Vec::with_capacity(update.len());
        let mut patch = Vec::with_capacity(update.len());
        for splice in update {
            let spliced = sequence::splice_local(
                &mut chars,
                metadata,
                splice.index,
                splice.remove,
                splice.text.chars().collect(),
                &splice.anchors,
                stamp,
            )?;
            let removed: String = spliced.run.removed.into_iter().collect();
            patch.push(TextPatchPart {
                removed_ids: spliced.removed_ids,
                removed_text: removed.clone(),
                inserted_ids: spliced.inserted_ids,
                inserted_text: splice.text.clone(),
            });
            change.push(TextChangePart {
                index: spliced.run.index,
                removed,
                inserted: splice.text,
            });
        }
        Ok(Updated {
            value: chars.into_iter().collect(),
            change,
            patch,
        })
    }

    fn apply_patch(
        &self,
        previous: &String,
        patch: &TextPatch,
        metadata: &mut SequenceMetadata,
        stamp: Stamp,
    ) -> Result<Patched<String, TextChange>> {
        let parts: Vec<PatchPart<'_, char>> = patch.iter().map(TextPatchPart::as_part).collect();
        for part in &parts {
            sequence::validate_part(part)?;
        }
        let mut chars: Vec<char> = previous.chars().collect();
        let mut runs = Vec::new();
        for part in parts {
            sequence::splice_remote(&mut chars, metadata, part, stamp, &mut runs)?;
        }
        let change = runs
            .into_iter()
            .map(|run| TextChangePart {
                index: run.index,
                removed: run.removed.into_iter().collect(),
                inserted: run.inserted.into_iter().collect(),
            })
            .collect();
        Ok(Patched {
            value: chars.into_iter().collect(),
            change,
        })
    }

    fn merge_change(&self, mut first: TextChange, second: TextChange) -> TextChange {
        first.extend(second);
        first
    }

    fn merge_patch(&self, mut first: TextPatch, second: TextPatch) -> TextPatch {
        first.extend(second);
        first
    }

    fn invert(
        &self,
        metadata: &SequenceMetadata,
        _change: &TextChange,
        patch: &TextPatch,
    ) -> TextUpdate {
        let parts = patch.iter().map(TextPatchPart::as_part).collect();
        sequence::invert(metadata, parts)
            .into_iter()
            .map(|s| TextSplice {
                anchors: s.anchors,
                ..TextSplice::new(s.index as i64, s.remove, s.values.into_iter().collect::<String>())
            })
            .collect()
    }
}
