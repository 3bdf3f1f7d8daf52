//! Identifier-ordered sequence shared by the List and Text fields.
//!
//! Every element carries an `ElementId`; `ids` is kept sorted and parallel to the value, so
//! the visible order is the id order and replicas converge no matter how patches arrive.
//! Removed ids are buried in the cemetery, which makes removals idempotent and keeps a late
//! or duplicated insertion from resurrecting an element.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ids::{ElementId, Stamp, Version};
use crate::order_key::{allocate_after, allocate_between};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceMetadata {
    ids: Vec<ElementId>,
    cemetery: BTreeMap<ElementId, Version>,
}

impl SequenceMetadata {
    /// Element ids, parallel to the field value.
    pub fn ids(&self) -> &[ElementId] {
        &self.ids
    }

    /// Removed ids and the highest version that removed them.
    pub fn cemetery(&self) -> &BTreeMap<ElementId, Version> {
        &self.cemetery
    }

    pub fn is_buried(&self, id: &ElementId) -> bool {
        self.cemetery.contains_key(id)
    }

    fn bury(&mut self, id: ElementId, version: Version) {
        self.cemetery
            .entry(id)
            .and_modify(|v| *v = (*v).max(version))
            .or_insert(version);
    }

    // Neighbours are adjacent live ids, so only the cemetery can hold a collision.
    fn allocate(
        &self,
        lower: Option<&ElementId>,
        upper: Option<&ElementId>,
        stamp: Stamp,
    ) -> Result<ElementId> {
        let mut lower = lower.cloned();
        loop {
            let id = allocate_between(lower.as_ref(), upper, stamp)?;
            if !self.is_buried(&id) {
                return Ok(id);
            }
            lower = Some(id);
        }
    }

    // Prefer an id extending the buried `anchor`, which keeps the anchor's order against
    // ids still referenced by history.
    fn allocate_anchored(
        &self,
        lower: Option<&ElementId>,
        upper: Option<&ElementId>,
        anchor: &ElementId,
        stamp: Stamp,
    ) -> Result<ElementId> {
        if let Ok(id) = allocate_after(anchor, stamp) {
            let fits = lower.map_or(true, |l| l < &id) && upper.map_or(true, |u| &id < u);
            if fits && !self.is_buried(&id) {
                return Ok(id);
            }
        }
        self.allocate(lower, upper, stamp)
    }

    fn check_parallel(&self, len: usize) -> Result<()> {
        if self.ids.len() != len {
            return Err(Error::InconsistentState(format!(
                "sequence holds {len} elements but {} ids",
                self.ids.len()
            )));
        }
        Ok(())
    }
}

/// One positional edit: at `index`, `removed` was taken out and `inserted` put in.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Run<E> {
    pub index: usize,
    pub removed: Vec<E>,
    pub inserted: Vec<E>,
}

pub(crate) struct LocalSplice<E> {
    pub run: Run<E>,
    pub removed_ids: Vec<ElementId>,
    pub inserted_ids: Vec<ElementId>,
}

/// A positional splice that reverts part of an earlier edit.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct InverseSplice<E> {
    pub index: usize,
    pub remove: usize,
    pub values: Vec<E>,
    /// Former ids of `values`.
    pub anchors: Vec<ElementId>,
}

/// One identifier-addressed part of a patch, borrowed from the List or Text representation.
pub(crate) struct PatchPart<'a, E> {
    pub removed_ids: &'a [ElementId],
    pub removed: Vec<E>,
    pub inserted_ids: &'a [ElementId],
    pub inserted: Vec<E>,
}

/// Resolve a possibly negative `index` and an oversized `remove` against `len`.
pub(crate) fn clamp_splice(len: usize, index: i64, remove: usize) -> (usize, usize) {
    let index = if index < 0 {
        index.saturating_add(len as i64).max(0) as usize
    } else {
        (index as u64).min(len as u64) as usize
    };
    (index, remove.min(len - index))
}

/// Apply a local splice. `anchors[k]`, when present, is a buried id the `k`th inserted value
/// used to carry; its replacement is allocated next to it.
pub(crate) fn splice_local<E: Clone>(
    values: &mut Vec<E>,
    metadata: &mut SequenceMetadata,
    index: i64,
    remove: usize,
    inserted: Vec<E>,
    anchors: &[ElementId],
    stamp: Stamp,
) -> Result<LocalSplice<E>> {
    metadata.check_parallel(values.len())?;
    let (index, remove) = clamp_splice(values.len(), index, remove);

    // Bury first: a replacement allocated between the same neighbours with the same stamp
    // would otherwise reproduce the id it replaces.
    let removed_ids: Vec<ElementId> = metadata.ids[index..index + remove].to_vec();
    for id in &removed_ids {
        metadata.bury(id.clone(), stamp.version);
    }

    let mut inserted_ids = Vec::with_capacity(inserted.len());
    let upper = metadata.ids.get(index + remove).cloned();
    let mut lower = index.checked_sub(1).map(|i| metadata.ids[i].clone());
    for k in 0..inserted.len() {
        let id = match anchors.get(k) {
            Some(anchor) => metadata.allocate_anchored(lower.as_ref(), upper.as_ref(), anchor, stamp)?,
            None => metadata.allocate(lower.as_ref(), upper.as_ref(), stamp)?,
        };
        lower = Some(id.clone());
        inserted_ids.push(id);
    }

    let removed: Vec<E> = values
        .splice(index..index + remove, inserted.iter().cloned())
        .collect();
    metadata
        .ids
        .splice(index..index + remove, inserted_ids.iter().cloned())
        .for_each(drop);

    Ok(LocalSplice {
        run: Run {
            index,
            removed,
            inserted,
        },
        removed_ids,
        inserted_ids,
    })
}

fn push_removal<E>(runs: &mut Vec<Run<E>>, index: usize, value: E) {
    if let Some(last) = runs.last_mut() {
        if last.index == index && last.inserted.is_empty() {
            last.removed.push(value);
            return;
        }
    }
    runs.push(Run {
        index,
        removed: vec![value],
        inserted: Vec::new(),
    });
}

fn push_insertion<E>(runs: &mut Vec<Run<E>>, index: usize, value: E) {
    if let Some(last) = runs.last_mut() {
        if last.index + last.inserted.len() == index {
            last.inserted.push(value);
            return;
        }
    }
    runs.push(Run {
        index,
        removed: Vec::new(),
        inserted: vec![value],
    });
}

/// Reject a patch part before anything is mutated.
pub(crate) fn validate_part<E>(part: &PatchPart<'_, E>) -> Result<()> {
    if part.removed_ids.len() != part.removed.len() {
        return Err(Error::MalformedPatch(format!(
            "{} removed ids but {} removed values",
            part.removed_ids.len(),
            part.removed.len()
        )));
    }
    if part.inserted_ids.len() != part.inserted.len() {
        return Err(Error::MalformedPatch(format!(
            "{} inserted ids but {} inserted values",
            part.inserted_ids.len(),
            part.inserted.len()
        )));
    }
    if let Some(bad) = part
        .removed_ids
        .iter()
        .chain(part.inserted_ids)
        .find(|id| !id.is_well_formed())
    {
        return Err(Error::MalformedPatch(format!("invalid element id `{bad}`")));
    }
    Ok(())
}

/// Apply a remote patch part by identifier, appending positional runs to `runs`.
pub(crate) fn splice_remote<E: Clone>(
    values: &mut Vec<E>,
    metadata: &mut SequenceMetadata,
    part: PatchPart<'_, E>,
    stamp: Stamp,
    runs: &mut Vec<Run<E>>,
) -> Result<()> {
    metadata.check_parallel(values.len())?;

    for id in part.removed_ids {
        if let Ok(i) = metadata.ids.binary_search(id) {
            metadata.ids.remove(i);
            push_removal(runs, i, values.remove(i));
        }
        metadata.bury(id.clone(), stamp.version);
    }

    for (id, value) in part.inserted_ids.iter().zip(part.inserted) {
        if metadata.is_buried(id) {
            continue;
        }
        match metadata.ids.binary_search(id) {
            Ok(_) => continue,
            Err(i) => {
                metadata.ids.insert(i, id.clone());
                values.insert(i, value.clone());
                push_insertion(runs, i, value);
            }
        }
    }
    Ok(())
}

fn push_inverse_removal<E>(splices: &mut Vec<InverseSplice<E>>, index: usize) {
    if let Some(last) = splices.last_mut() {
        if last.index == index && last.values.is_empty() {
            last.remove += 1;
            return;
        }
    }
    splices.push(InverseSplice {
        index,
        remove: 1,
        values: Vec::new(),
        anchors: Vec::new(),
    });
}

fn push_inverse_insertion<E>(
    splices: &mut Vec<InverseSplice<E>>,
    index: usize,
    value: E,
    anchor: ElementId,
) {
    if let Some(last) = splices.last_mut() {
        if last.remove == 0 && last.index + last.values.len() == index {
            last.values.push(value);
            last.anchors.push(anchor);
            return;
        }
    }
    splices.push(InverseSplice {
        index,
        remove: 0,
        values: vec![value],
        anchors: vec![anchor],
    });
}

/// Positional splices that revert `parts` (given in their original order) against the
/// current ids: still-present inserted ids are removed and removed values are put back at
/// the position their old ids sort to.
pub(crate) fn invert<E: Clone>(
    metadata: &SequenceMetadata,
    parts: Vec<PatchPart<'_, E>>,
) -> Vec<InverseSplice<E>> {
    let mut working: Vec<ElementId> = metadata.ids.clone();
    let mut splices: Vec<InverseSplice<E>> = Vec::new();

    for part in parts.into_iter().rev() {
        for id in part.inserted_ids {
            if let Ok(i) = working.binary_search(id) {
                working.remove(i);
                push_inverse_removal(&mut splices, i);
            }
        }
        for (id, value) in part.removed_ids.iter().zip(part.removed) {
            let i = working.partition_point(|existing| existing < id);
            working.insert(i, id.clone());
            push_inverse_insertion(&mut splices, i, value, id.clone());
        }
    }
    splices
}
