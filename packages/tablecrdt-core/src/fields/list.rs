use std::marker::PhantomData;

use serde::{Deserialize, Serialize};

use super::sequence::{self, PatchPart, SequenceMetadata};
use super::{Field, Patched, Updated};
use crate::error::Result;
use crate::ids::{ElementId, Stamp};

/// Replace `remove` elements starting at `index` with `values`.
///
/// A negative `index` counts from the end. Both bounds are clamped to the current length.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ListSplice<T> {
    pub index: i64,
    #[serde(default)]
    pub remove: usize,
    #[serde(default = "Vec::new")]
    pub values: Vec<T>,
    /// Buried ids the inserted values are restored from; set by undo/redo.
    #[serde(skip)]
    pub(crate) anchors: Vec<ElementId>,
}

impl<T> ListSplice<T> {
    pub fn new(index: i64, remove: usize, values: Vec<T>) -> Self {
        Self {
            index,
            remove,
            values,
            anchors: Vec::new(),
        }
    }

    pub fn insert(index: i64, values: Vec<T>) -> Self {
        Self::new(index, 0, values)
    }

    pub fn remove(index: i64, count: usize) -> Self {
        Self::new(index, count, Vec::new())
    }
}

pub type ListUpdate<T> = Vec<ListSplice<T>>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ListChangePart<T> {
    pub index: usize,
    pub removed: Vec<T>,
    pub inserted: Vec<T>,
}

pub type ListChange<T> = Vec<ListChangePart<T>>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPatchPart<T> {
    pub removed_ids: Vec<ElementId>,
    pub removed_values: Vec<T>,
    pub inserted_ids: Vec<ElementId>,
    pub inserted_values: Vec<T>,
}

pub type ListPatch<T> = Vec<ListPatchPart<T>>;

/// Ordered sequence of values with identifier-based merging.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct ListField<T> {
    #[serde(skip)]
    marker: PhantomData<fn() -> T>,
}

impl<T> ListField<T> {
    pub fn new() -> Self {
        Self {
            marker: PhantomData,
        }
    }
}

impl<T> ListPatchPart<T> {
    fn as_part(&self) -> PatchPart<'_, T>
    where
        T: Clone,
    {
        PatchPart {
            removed_ids: &self.removed_ids,
            removed: self.removed_values.clone(),
            inserted_ids: &self.inserted_ids,
            inserted: self.inserted_values.clone(),
        }
    }
}

impl<T: Clone> Field for ListField<T> {
    type Value = Vec<T>;
    type Update = ListUpdate<T>;
    type Metadata = SequenceMetadata;
    type Change = ListChange<T>;
    type Patch = ListPatch<T>;

    fn create_value(&self) -> Vec<T> {
        Vec::new()
    }

    fn create_metadata(&self) -> SequenceMetadata {
        SequenceMetadata::default()
    }

    fn apply_update(
        &self,
        previous: &Vec<T>,
        update: ListUpdate<T>,
        metadata: &mut SequenceMetadata,
        stamp: Stamp,
    ) -> Result<Updated<Vec<T>, ListChange<T>, ListPatch<T>>> {
        let mut value = previous.clone();
        let mut change = Vec::with_capacity(update.len());
        let mut patch = Vec::with_capacity(update.len());
        for splice in update {
            let spliced = sequence::splice_local(
                &mut value,
                metadata,
                splice.index,
                splice.remove,
                splice.values,
                &splice.anchors,
                stamp,
            )?;
            patch.push(ListPatchPart {
                removed_ids: spliced.removed_ids,
                removed_values: spliced.run.removed.clone(),
                inserted_ids: spliced.inserted_ids,
                inserted_values: spliced.run.inserted.clone(),
            });
            change.push(ListChangePart {
                index: spliced.run.index,
                removed: spliced.run.removed,
                inserted: spliced.run.inserted,
            });
        }
        Ok(Updated {
            value,
            change,
            patch,
        })
    }

    fn apply_patch(
        &self,
        previous: &Vec<T>,
        patch: &ListPatch<T>,
        metadata: &mut SequenceMetadata,
        stamp: Stamp,
    ) -> Result<Patched<Vec<T>, ListChange<T>>> {
        for part in patch {
            sequence::validate_part(&part.as_part())?;
        }
        let mut value = previous.clone();
        let mut runs = Vec::new();
        for part in patch {
            sequence::splice_remote(&mut value, metadata, part.as_part(), stamp, &mut runs)?;
        }
        let change = runs
            .into_iter()
            .map(|run| ListChangePart {
                index: run.index,
                removed: run.removed,
                inserted: run.inserted,
            })
            .collect();
        Ok(Patched { value, change })
    }

    fn merge_change(&self, mut first: ListChange<T>, second: ListChange<T>) -> ListChange<T> {
        first.extend(second);
        first
    }

    fn merge_patch(&self, mut first: ListPatch<T>, second: ListPatch<T>) -> ListPatch<T> {
        first.extend(second);
        first
    }

    fn invert(
        &self,
        metadata: &SequenceMetadata,
        _change: &ListChange<T>,
        patch: &ListPatch<T>,
    ) -> ListUpdate<T> {
        let parts = patch.iter().map(ListPatchPart::as_part).collect();
        sequence::invert(metadata, parts)
            .into_iter()
            .map(|s| ListSplice {
                anchors: s.anchors,
                ..ListSplice::new(s.index as i64, s.remove, s.values)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stamp(version: u64, store: u32) -> Stamp {
        Stamp::new(version, store)
    }

    #[test]
    fn splice_into_empty_list() {
        let field = ListField::<i32>::new();
        let mut meta = field.create_metadata();
        let out = field
            .apply_update(
                &field.create_value(),
                vec![ListSplice::insert(0, vec![1, 2, 3])],
                &mut meta,
                stamp(1, 1),
            )
            .unwrap();
        assert_eq!(out.value, vec![1, 2, 3]);
        assert_eq!(
            out.change,
            vec![ListChangePart {
                index: 0,
                removed: vec![],
                inserted: vec![1, 2, 3]
            }]
        );
        assert_eq!(out.patch[0].inserted_ids.len(), 3);
    }

    #[test]
    fn consecutive_splices_in_one_update() {
        let field = ListField::<i32>::new();
        let mut meta = field.create_metadata();
        let out = field
            .apply_update(
                &Vec::new(),
                vec![
                    ListSplice::insert(0, vec![1, 2, 3]),
                    ListSplice::new(1, 1, vec![4, 5]),
                ],
                &mut meta,
                stamp(1, 1),
            )
            .unwrap();
        assert_eq!(out.value, vec![1, 4, 5, 3]);
        assert_eq!(out.patch[1].removed_values, vec![2]);
        assert_eq!(out.patch[1].removed_ids, vec![out.patch[0].inserted_ids[1].clone()]);
    }

    #[test]
    fn negative_index_wraps_from_the_end() {
        let field = ListField::<char>::new();
        let mut meta = field.create_metadata();
        let first = field
            .apply_update(&vec![], vec![ListSplice::insert(0, vec!['a', 'b', 'c'])], &mut meta, stamp(1, 1))
            .unwrap();
        let out = field
            .apply_update(&first.value, vec![ListSplice::new(-1, 5, vec!['z'])], &mut meta, stamp(2, 1))
            .unwrap();
        assert_eq!(out.value, vec!['a', 'b', 'z']);
        assert_eq!(out.change[0].index, 2);
        assert_eq!(out.change[0].removed, vec!['c']);
    }

    #[test]
    fn removal_patch_is_idempotent() {
        let field = ListField::<i32>::new();
        let mut source_meta = field.create_metadata();
        let created = field
            .apply_update(&vec![], vec![ListSplice::insert(0, vec![1, 2, 3])], &mut source_meta, stamp(1, 1))
            .unwrap();
        let removed = field
            .apply_update(&created.value, vec![ListSplice::remove(1, 1)], &mut source_meta, stamp(2, 1))
            .unwrap();

        let mut meta = field.create_metadata();
        let replica = field
            .apply_patch(&vec![], &created.patch, &mut meta, stamp(1, 1))
            .unwrap();
        let once = field
            .apply_patch(&replica.value, &removed.patch, &mut meta, stamp(2, 1))
            .unwrap();
        let twice = field
            .apply_patch(&once.value, &removed.patch, &mut meta, stamp(2, 1))
            .unwrap();
        assert_eq!(once.value, vec![1, 3]);
        assert_eq!(twice.value, vec![1, 3]);
        assert!(twice.change.is_empty());
    }

    #[test]
    fn removal_before_insertion_keeps_element_dead() {
        let field = ListField::<i32>::new();
        let mut source_meta = field.create_metadata();
        let created = field
            .apply_update(&vec![], vec![ListSplice::insert(0, vec![7])], &mut source_meta, stamp(1, 1))
            .unwrap();
        let removed = field
            .apply_update(&created.value, vec![ListSplice::remove(0, 1)], &mut source_meta, stamp(2, 1))
            .unwrap();

        let mut meta = field.create_metadata();
        let out = field
            .apply_patch(&vec![], &removed.patch, &mut meta, stamp(2, 1))
            .unwrap();
        let out = field
            .apply_patch(&out.value, &created.patch, &mut meta, stamp(1, 1))
            .unwrap();
        assert!(out.value.is_empty());
    }

    #[test]
    fn mismatched_patch_lengths_are_malformed() {
        let field = ListField::<i32>::new();
        let mut meta = field.create_metadata();
        let patch = vec![ListPatchPart {
            removed_ids: vec![],
            removed_values: vec![],
            inserted_ids: vec![],
            inserted_values: vec![1],
        }];
        assert!(field.apply_patch(&vec![], &patch, &mut meta, stamp(1, 1)).is_err());
    }

    #[test]
    fn invert_restores_previous_value() {
        let field = ListField::<i32>::new();
        let mut meta = field.create_metadata();
        let base = field
            .apply_update(&vec![], vec![ListSplice::insert(0, vec![1, 2, 3, 4])], &mut meta, stamp(1, 1))
            .unwrap();
        let edit = field
            .apply_update(
                &base.value,
                vec![ListSplice::new(1, 2, vec![9]), ListSplice::insert(-1, vec![8])],
                &mut meta,
                stamp(2, 1),
            )
            .unwrap();
        assert_eq!(edit.value, vec![1, 9, 8, 4]);

        let undo = field.invert(&meta, &edit.change, &edit.patch);
        let reverted = field
            .apply_update(&edit.value, undo, &mut meta, stamp(3, 1))
            .unwrap();
        assert_eq!(reverted.value, vec![1, 2, 3, 4]);
    }
}
