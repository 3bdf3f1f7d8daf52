use std::collections::BTreeMap;
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};

use super::{Field, Patched, Updated};
use crate::error::{Error, Result};
use crate::ids::Stamp;

/// Entries retained per key, newest first.
const HISTORY_LIMIT: usize = 16;

/// Key -> new value; `None` deletes the key. In JSON, `null` means delete.
pub type MapUpdate<T> = BTreeMap<String, Option<T>>;
pub type MapPatch<T> = BTreeMap<String, Option<T>>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MapChangeEntry<T> {
    pub previous: Option<T>,
    pub current: Option<T>,
}

pub type MapChange<T> = BTreeMap<String, MapChangeEntry<T>>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MapEntry<T> {
    pub stamp: Stamp,
    pub value: Option<T>,
}

/// Per-key write history, newest first.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MapMetadata<T> {
    entries: BTreeMap<String, Vec<MapEntry<T>>>,
}

impl<T> Default for MapMetadata<T> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<T> MapMetadata<T> {
    pub fn history(&self, key: &str) -> &[MapEntry<T>] {
        self.entries.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    /// Record a write and report whether it is now the newest for its key.
    fn record(&mut self, key: &str, stamp: Stamp, value: Option<T>) -> bool {
        let history = self.entries.entry(key.to_owned()).or_default();
        let position = history.partition_point(|e| e.stamp > stamp);
        if history.get(position).map_or(false, |e| e.stamp == stamp) {
            return false;
        }
        history.insert(position, MapEntry { stamp, value });
        history.truncate(HISTORY_LIMIT);
        position == 0
    }
}

/// String-keyed map with per-key last-writer-wins resolution.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct MapField<T> {
    #[serde(skip)]
    marker: PhantomData<fn() -> T>,
}

impl<T> MapField<T> {
    pub fn new() -> Self {
        Self {
            marker: PhantomData,
        }
    }
}

/// Update that deletes every key currently present in `value`.
pub fn clear_update<T>(value: &BTreeMap<String, T>) -> MapUpdate<T> {
    value.keys().map(|k| (k.clone(), None)).collect()
}

fn write<T>(value: &mut BTreeMap<String, T>, key: &str, entry: Option<T>) -> Option<T> {
    match entry {
        Some(v) => value.insert(key.to_owned(), v),
        None => value.remove(key),
    }
}

impl<T: Clone + PartialEq> Field for MapField<T> {
    type Value = BTreeMap<String, T>;
    type Update = MapUpdate<T>;
    type Metadata = MapMetadata<T>;
    type Change = MapChange<T>;
    type Patch = MapPatch<T>;

    fn create_value(&self) -> BTreeMap<String, T> {
        BTreeMap::new()
    }

    fn create_metadata(&self) -> MapMetadata<T> {
        MapMetadata::default()
    }

    fn apply_update(
        &self,
        previous: &BTreeMap<String, T>,
        update: MapUpdate<T>,
        metadata: &mut MapMetadata<T>,
        stamp: Stamp,
    ) -> Result<Updated<BTreeMap<String, T>, MapChange<T>, MapPatch<T>>> {
        let mut value = previous.clone();
        let mut change = MapChange::new();
        for (key, entry) in &update {
            let history = metadata.entries.entry(key.clone()).or_default();
            match history.first().map(|head| head.stamp) {
                Some(head) if head > stamp => {
                    return Err(Error::InconsistentState(format!(
                        "local write to key `{key}` is older than its latest entry"
                    )))
                }
                // Rewritten within the same transaction.
                Some(head) if head == stamp => history[0].value = entry.clone(),
                _ => {
                    history.insert(
                        0,
                        MapEntry {
                            stamp,
                            value: entry.clone(),
                        },
                    );
                    history.truncate(HISTORY_LIMIT);
                }
            }
            let old = write(&mut value, key, entry.clone());
            change.insert(
                key.clone(),
                MapChangeEntry {
                    previous: old,
                    current: entry.clone(),
                },
            );
        }
        Ok(Updated {
            value,
            change,
            patch: update,
        })
    }

    fn apply_patch(
        &self,
        previous: &BTreeMap<String, T>,
        patch: &MapPatch<T>,
        metadata: &mut MapMetadata<T>,
        stamp: Stamp,
    ) -> Result<Patched<BTreeMap<String, T>, MapChange<T>>> {
        let mut value = previous.clone();
        let mut change = MapChange::new();
        for (key, entry) in patch {
            if !metadata.record(key, stamp, entry.clone()) {
                continue;
            }
            let old = write(&mut value, key, entry.clone());
            if old.as_ref() != entry.as_ref() {
                change.insert(
                    key.clone(),
                    MapChangeEntry {
                        previous: old,
                        current: entry.clone(),
                    },
                );
            }
        }
        Ok(Patched { value, change })
    }

    fn merge_change(&self, mut first: MapChange<T>, second: MapChange<T>) -> MapChange<T> {
        for (key, entry) in second {
            match first.get_mut(&key) {
                Some(existing) => existing.current = entry.current,
                None => {
                    first.insert(key, entry);
                }
            }
        }
        first
    }

    fn merge_patch(&self, mut first: MapPatch<T>, second: MapPatch<T>) -> MapPatch<T> {
        first.extend(second);
        first
    }

    fn invert(&self, _metadata: &MapMetadata<T>, change: &MapChange<T>, _patch: &MapPatch<T>) -> MapUpdate<T> {
        change
            .iter()
            .map(|(key, entry)| (key.clone(), entry.previous.clone()))
            .collect()
    }
}
