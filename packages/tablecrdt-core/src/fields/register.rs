use serde::{Deserialize, Serialize};

use super::{Field, Patched, Updated};
use crate::error::{Error, Result};
use crate::ids::Stamp;

/// Single last-writer-wins value. `value` is the initial value of every new record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegisterField<T> {
    pub value: T,
}

impl<T> RegisterField<T> {
    pub fn new(value: T) -> Self {
        Self { value }
    }
}

/// Stamp of the write currently held by the register; `None` until the first write.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterMetadata {
    pub stamp: Option<Stamp>,
}

impl RegisterMetadata {
    fn wins(&self, stamp: Stamp) -> bool {
        self.stamp.map_or(true, |current| stamp > current)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegisterChange<T> {
    pub previous: T,
    pub current: T,
}

pub type RegisterPatch<T> = RegisterChange<T>;

impl<T: Clone> Field for RegisterField<T> {
    type Value = T;
    type Update = T;
    type Metadata = RegisterMetadata;
    type Change = RegisterChange<T>;
    type Patch = RegisterPatch<T>;

    fn create_value(&self) -> T {
        self.value.clone()
    }

    fn create_metadata(&self) -> RegisterMetadata {
        RegisterMetadata::default()
    }

    fn apply_update(
        &self,
        previous: &T,
        update: T,
        metadata: &mut RegisterMetadata,
        stamp: Stamp,
    ) -> Result<Updated<T, RegisterChange<T>, RegisterPatch<T>>> {
        // A second write in the same transaction reuses the stamp.
        if metadata.stamp.map_or(false, |current| stamp < current) {
            return Err(Error::InconsistentState(format!(
                "local write at version {} is older than the register's version",
                stamp.version
            )));
        }
        metadata.stamp = Some(stamp);
        let change = RegisterChange {
            previous: previous.clone(),
            current: update.clone(),
        };
        Ok(Updated {
            value: update,
            patch: change.clone(),
            change,
        })
    }

    fn apply_patch(
        &self,
        previous: &T,
        patch: &RegisterPatch<T>,
        metadata: &mut RegisterMetadata,
        stamp: Stamp,
    ) -> Result<Patched<T, RegisterChange<T>>> {
        let value = if metadata.wins(stamp) {
            metadata.stamp = Some(stamp);
            patch.current.clone()
        } else {
            previous.clone()
        };
        Ok(Patched {
            change: RegisterChange {
                previous: previous.clone(),
                current: value.clone(),
            },
            value,
        })
    }

    fn merge_change(&self, first: RegisterChange<T>, second: RegisterChange<T>) -> RegisterChange<T> {
        RegisterChange {
            previous: first.previous,
            current: second.current,
        }
    }

    fn merge_patch(&self, first: RegisterPatch<T>, second: RegisterPatch<T>) -> RegisterPatch<T> {
        self.merge_change(first, second)
    }

    fn invert(&self, _metadata: &RegisterMetadata, change: &RegisterChange<T>, _patch: &RegisterPatch<T>) -> T {
        change.previous.clone()
    }
}
