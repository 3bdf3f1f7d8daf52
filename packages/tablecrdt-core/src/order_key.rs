use crate::error::{Error, Result};
use crate::ids::{ElementId, Stamp, StoreId, Version, MAX_VERSION};

const ORDER_KEY_DOMAIN: &[u8] = b"tablecrdt/element_id/v0";
const DEFAULT_BOUNDARY: u32 = 10;
const PATH_LIMIT: u32 = 0x1_0000;
const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

/// Hex width of one `(path, version, store_id)` triplet: 4 + 12 + 8.
pub const TRIPLET_WIDTH: usize = 24;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
struct Triplet {
    path: u16,
    version: Version,
    store: StoreId,
}

// Sorts below every triplet carrying a real stamp (versions start at 1).
const FLOOR: Triplet = Triplet {
    path: 0,
    version: 0,
    store: 0,
};

fn parse_hex<T>(part: &str, parse: fn(&str, u32) -> std::result::Result<T, std::num::ParseIntError>) -> Result<T> {
    parse(part, 16).map_err(|e| Error::InvalidOperation(format!("element id is not hex: {e}")))
}

fn decode_triplets(id: &ElementId) -> Result<Vec<Triplet>> {
    let raw = id.as_str();
    if !id.is_well_formed() {
        return Err(Error::InvalidOperation(format!(
            "element id `{raw}` must be a non-empty sequence of {TRIPLET_WIDTH}-digit hex triplets"
        )));
    }
    let mut out = Vec::with_capacity(raw.len() / TRIPLET_WIDTH);
    for offset in (0..raw.len()).step_by(TRIPLET_WIDTH) {
        let chunk = &raw[offset..offset + TRIPLET_WIDTH];
        out.push(Triplet {
            path: parse_hex(&chunk[..4], u16::from_str_radix)?,
            version: parse_hex(&chunk[4..16], u64::from_str_radix)?,
            store: parse_hex(&chunk[16..], u32::from_str_radix)?,
        });
    }
    Ok(out)
}

fn encode_triplets(triplets: &[Triplet]) -> ElementId {
    let mut out = String::with_capacity(triplets.len() * TRIPLET_WIDTH);
    for t in triplets {
        out.push_str(&format!("{:04x}{:012x}{:08x}", t.path, t.version, t.store));
    }
    ElementId(out)
}

fn sample_u64(seed: &[u8], depth: usize) -> u64 {
    let mut h = FNV_OFFSET_BASIS;
    for b in ORDER_KEY_DOMAIN {
        h ^= *b as u64;
        h = h.wrapping_mul(FNV_PRIME);
    }
    for b in &(seed.len() as u32).to_be_bytes() {
        h ^= *b as u64;
        h = h.wrapping_mul(FNV_PRIME);
    }
    for b in seed {
        h ^= *b as u64;
        h = h.wrapping_mul(FNV_PRIME);
    }
    for b in &(depth as u32).to_be_bytes() {
        h ^= *b as u64;
        h = h.wrapping_mul(FNV_PRIME);
    }
    h
}

fn choose_side(seed: &[u8], depth: usize) -> bool {
    // true = choose near left, false = choose near right
    (sample_u64(seed, depth) & 1) == 0
}

fn choose_in_range(seed: &[u8], depth: usize, lo: u32, hi: u32) -> u32 {
    debug_assert!(lo <= hi);
    if lo == hi {
        return lo;
    }
    let span = (hi - lo) as u64 + 1;
    lo + (sample_u64(seed, depth).rotate_left(17) % span) as u32
}

fn choose_path(seed: &[u8], depth: usize, lo: u32, hi: u32) -> u16 {
    let gap = hi - lo + 1;
    let boundary = DEFAULT_BOUNDARY.min(gap);
    let (lo, hi) = if gap > boundary {
        if choose_side(seed, depth) {
            (lo, lo + boundary - 1)
        } else {
            (hi + 1 - boundary, hi)
        }
    } else {
        (lo, hi)
    };
    choose_in_range(seed, depth, lo, hi) as u16
}

/// Allocate an element id strictly between `lower` and `upper` (string order).
///
/// Ids are sequences of `(path, version, store_id)` triplets. The new id copies the common
/// prefix of its neighbours and ends with a triplet stamped by `stamp`, so ids allocated by
/// different stores or different transactions never coincide. Path selection is
/// LSEQ-inspired and seeded from the neighbours and the stamp, which keeps allocation
/// deterministic.
pub fn allocate_between(
    lower: Option<&ElementId>,
    upper: Option<&ElementId>,
    stamp: Stamp,
) -> Result<ElementId> {
    if stamp.version > MAX_VERSION {
        return Err(Error::VersionOverflow);
    }
    if let (Some(l), Some(u)) = (lower, upper) {
        if l >= u {
            return Err(Error::InvalidOperation(format!(
                "cannot allocate element id: `{u}` is not above `{l}`"
            )));
        }
    }
    let lower_triplets = lower.map(decode_triplets).transpose()?.unwrap_or_default();
    let upper_triplets = upper.map(decode_triplets).transpose()?.unwrap_or_default();

    let mut seed = Vec::new();
    seed.extend_from_slice(lower.map(ElementId::as_str).unwrap_or_default().as_bytes());
    seed.push(0);
    seed.extend_from_slice(upper.map(ElementId::as_str).unwrap_or_default().as_bytes());
    seed.extend_from_slice(&stamp.version.to_be_bytes());
    seed.extend_from_slice(&stamp.store_id.to_be_bytes());

    let mut out: Vec<Triplet> = Vec::new();
    // Whether `out` still equals the corresponding bound's prefix.
    let mut lower_bound = lower.is_some();
    let mut upper_bound = upper.is_some();
    let mut depth: usize = 0;

    loop {
        let lo = if lower_bound {
            lower_triplets.get(depth).copied()
        } else {
            None
        };
        let hi = if upper_bound {
            match upper_triplets.get(depth) {
                Some(t) => Some(*t),
                None => {
                    return Err(Error::InvalidOperation(
                        "cannot allocate element id: upper bound is a prefix of the result".into(),
                    ))
                }
            }
        } else {
            None
        };

        let floor = lo.map(|t| t.path as u32 + 1).unwrap_or(0);
        let ceil = hi.map(|t| t.path as u32).unwrap_or(PATH_LIMIT);
        if ceil > floor {
            out.push(Triplet {
                path: choose_path(&seed, depth, floor, ceil - 1),
                version: stamp.version,
                store: stamp.store_id,
            });
            return Ok(encode_triplets(&out));
        }

        // No room at this level; extend the prefix and continue deeper.
        match lo {
            Some(t) => {
                upper_bound = upper_bound && hi == Some(t);
                out.push(t);
            }
            None => {
                lower_bound = false;
                upper_bound = upper_bound && hi == Some(FLOOR);
                out.push(FLOOR);
            }
        }
        depth += 1;
    }
}

/// Allocate an id that sorts directly after `anchor`.
///
/// The result is `anchor`, a floor triplet, then a stamped triplet. It compares with every
/// other id exactly as `anchor` does, except that it stays below ids that extend `anchor`
/// with stamped triplets. Callers check the result against their actual neighbours.
pub fn allocate_after(anchor: &ElementId, stamp: Stamp) -> Result<ElementId> {
    if stamp.version > MAX_VERSION {
        return Err(Error::VersionOverflow);
    }
    let mut triplets = decode_triplets(anchor)?;
    let mut seed = anchor.as_str().as_bytes().to_vec();
    seed.extend_from_slice(&stamp.version.to_be_bytes());
    seed.extend_from_slice(&stamp.store_id.to_be_bytes());
    let path = choose_path(&seed, triplets.len(), 0, PATH_LIMIT - 1);
    triplets.push(FLOOR);
    triplets.push(Triplet {
        path,
        version: stamp.version,
        store: stamp.store_id,
    });
    Ok(encode_triplets(&triplets))
}
