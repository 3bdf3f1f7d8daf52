use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier of a replica. Zero is reserved.
pub type StoreId = u32;

/// Logical clock value; one tick per committed transaction.
pub type Version = u64;

/// Largest version representable in an element id (48 bits).
pub const MAX_VERSION: Version = 0xFFFF_FFFF_FFFF;

pub type SchemaId = String;
pub type RecordId = String;

/// Lamport key stamped on every edit: compare `version` first, then `store_id`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stamp {
    pub version: Version,
    pub store_id: StoreId,
}

impl Stamp {
    pub fn new(version: Version, store_id: StoreId) -> Self {
        Self { version, store_id }
    }
}

/// Globally unique identifier for a transaction, derived from its stamp.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatchId(String);

impl PatchId {
    pub fn from_stamp(stamp: Stamp) -> Self {
        Self(format!("{:012x}{:08x}", stamp.version, stamp.store_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PatchId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Identifier of one element of a List or Text field.
///
/// The string is a sequence of fixed-width hex triplets `(path, version, store_id)`;
/// plain string ordering matches the triplet ordering (see `order_key`).
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementId(pub(crate) String);

impl ElementId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id has the triplet layout produced by `order_key::allocate_between`.
    ///
    /// The last triplet always carries a real stamp: non-zero version and store id.
    pub fn is_well_formed(&self) -> bool {
        let raw = self.0.as_str();
        if raw.is_empty()
            || raw.len() % crate::order_key::TRIPLET_WIDTH != 0
            || !raw
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return false;
        }
        let last = &raw[raw.len() - crate::order_key::TRIPLET_WIDTH..];
        let (version, store) = (&last[4..16], &last[16..]);
        version.bytes().any(|b| b != b'0') && store.bytes().any(|b| b != b'0')
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
