//! The flake data model.
//!
//! A flake is the atomic unit of assertion in the ledger: an immutable
//! 6-tuple `(s, p, o, t, op, m)` recording that subject `s` was asserted
//! (or retracted) to have value `o` for predicate `p` at transaction `t`.
//! Five total orderings over flakes drive the index engine; they live in
//! [`ord`], and the sorted collections built on them in [`set`].

pub mod ord;
pub mod set;

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh64::xxh64;

/// The transaction counter. Monotonically *decreasing*: the successor of
/// `t` is `t - 1`, and "newer" means strictly smaller.
pub type T = i64;

/// Helpers that encode the decreasing-`t` convention so call sites cannot
/// mistake direction.
pub mod t {
    use super::T;

    /// The transaction counter of an empty, freshly created ledger.
    pub const GENESIS: T = 0;

    /// The transaction following `t`.
    pub fn next(t: T) -> T {
        t - 1
    }

    /// True when `a` is strictly newer than `b`.
    pub fn newer(a: T, b: T) -> bool {
        a < b
    }

    /// True when `a` is strictly older than `b`.
    pub fn older(a: T, b: T) -> bool {
        a > b
    }
}

const SUBJECT_BITS: u32 = 44;
/// Largest collection id that fits the SID packing.
pub const MAX_COLLECTION_ID: i64 = (1 << 19) - 1;
/// Largest subject index that fits the SID packing.
pub const MAX_SUBJECT_N: i64 = (1 << SUBJECT_BITS) - 1;

/// Collection holding predicate subjects.
pub const PREDICATE_COLLECTION: i64 = 0;
/// Reserved collection for transaction subjects; its SIDs span the full
/// negative range, so a transaction's SID is its `t` value directly.
pub const TX_COLLECTION: i64 = -1;

/// A packed 63-bit subject identifier: `(collection_id << 44) | n`.
///
/// Negative values belong to the reserved transaction collection.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Sid(pub i64);

impl Sid {
    /// Packs a collection id and subject index into a SID.
    pub fn new(collection: i64, n: i64) -> Sid {
        debug_assert!((0..=MAX_COLLECTION_ID).contains(&collection));
        debug_assert!((0..=MAX_SUBJECT_N).contains(&n));
        Sid((collection << SUBJECT_BITS) | n)
    }

    /// The SID of the subject representing transaction `t`.
    pub fn for_transaction(t: T) -> Sid {
        Sid(t)
    }

    /// The collection id this SID belongs to. Negative SIDs report the
    /// transaction collection.
    pub fn collection(&self) -> i64 {
        if self.0 < 0 {
            TX_COLLECTION
        } else {
            self.0 >> SUBJECT_BITS
        }
    }

    /// The subject index within its collection.
    pub fn n(&self) -> i64 {
        if self.0 < 0 {
            self.0
        } else {
            self.0 & MAX_SUBJECT_N
        }
    }

    /// Smallest possible SID.
    pub const MIN: Sid = Sid(i64::MIN);
    /// Largest possible SID.
    pub const MAX: Sid = Sid(i64::MAX);
}

impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.collection(), self.n())
    }
}

/// The object slot of a flake.
///
/// Ordering across types compares a type rank first (so e.g. any string
/// sorts after any number), then natural order within the type. `Int` and
/// `Float` share the number rank and compare numerically against each other.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlakeValue {
    /// Reference to another subject.
    Ref(Sid),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// UTF-8 string.
    Str(String),
    /// Boolean.
    Bool(bool),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// A datatype-tagged lexical form for anything else.
    Tagged {
        /// Datatype IRI.
        datatype: String,
        /// Lexical representation.
        lexical: String,
    },
}

impl FlakeValue {
    fn type_rank(&self) -> u8 {
        match self {
            FlakeValue::Ref(_) => 0,
            FlakeValue::Int(_) | FlakeValue::Float(_) => 1,
            FlakeValue::Str(_) => 2,
            FlakeValue::Bool(_) => 3,
            FlakeValue::Bytes(_) => 4,
            FlakeValue::Tagged { .. } => 5,
        }
    }

    /// Contribution of this value to the flake size estimate.
    pub fn size_bytes(&self) -> usize {
        match self {
            FlakeValue::Str(s) => 38 + 2 * s.len(),
            FlakeValue::Ref(_) | FlakeValue::Int(_) | FlakeValue::Float(_) => 8,
            FlakeValue::Bool(_) => 1,
            FlakeValue::Bytes(b) => b.len(),
            FlakeValue::Tagged { datatype, lexical } => datatype.len() + lexical.len(),
        }
    }
}

impl PartialEq for FlakeValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FlakeValue {}

impl PartialOrd for FlakeValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FlakeValue {
    fn cmp(&self, other: &Self) -> Ordering {
        use FlakeValue::*;
        match self.type_rank().cmp(&other.type_rank()) {
            Ordering::Equal => {}
            ord => return ord,
        }
        match (self, other) {
            (Ref(a), Ref(b)) => a.cmp(b),
            (Int(a), Int(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.total_cmp(b),
            (Int(a), Float(b)) => (*a as f64).total_cmp(b),
            (Float(a), Int(b)) => a.total_cmp(&(*b as f64)),
            (Str(a), Str(b)) => a.cmp(b),
            (Bool(a), Bool(b)) => a.cmp(b),
            (Bytes(a), Bytes(b)) => a.cmp(b),
            (
                Tagged {
                    datatype: da,
                    lexical: la,
                },
                Tagged {
                    datatype: db,
                    lexical: lb,
                },
            ) => da.cmp(db).then_with(|| la.cmp(lb)),
            _ => unreachable!("distinct types already ordered by rank"),
        }
    }
}

impl Hash for FlakeValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_rank().hash(state);
        match self {
            FlakeValue::Ref(s) => s.hash(state),
            FlakeValue::Int(i) => (*i as f64).to_bits().hash(state),
            FlakeValue::Float(f) => f.to_bits().hash(state),
            FlakeValue::Str(s) => s.hash(state),
            FlakeValue::Bool(b) => b.hash(state),
            FlakeValue::Bytes(b) => b.hash(state),
            FlakeValue::Tagged { datatype, lexical } => {
                datatype.hash(state);
                lexical.hash(state);
            }
        }
    }
}

impl From<&str> for FlakeValue {
    fn from(s: &str) -> Self {
        FlakeValue::Str(s.to_string())
    }
}

impl From<i64> for FlakeValue {
    fn from(i: i64) -> Self {
        FlakeValue::Int(i)
    }
}

impl From<bool> for FlakeValue {
    fn from(b: bool) -> Self {
        FlakeValue::Bool(b)
    }
}

/// The immutable assertion tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Flake {
    /// Subject SID.
    pub s: Sid,
    /// Predicate SID.
    pub p: Sid,
    /// Object value.
    pub o: FlakeValue,
    /// Transaction that introduced this flake.
    pub t: T,
    /// `true` = assert, `false` = retract.
    pub op: bool,
    /// Optional metadata sort key.
    pub m: Option<i64>,
}

impl Flake {
    /// Builds an assertion or retraction flake.
    pub fn new(s: Sid, p: Sid, o: FlakeValue, t: T, op: bool, m: Option<i64>) -> Flake {
        Flake { s, p, o, t, op, m }
    }

    /// True when `other` speaks about the same `(s, p, o)` triple,
    /// regardless of `t`, `op`, and `m`. Retraction matching uses this.
    pub fn same_spo(&self, other: &Flake) -> bool {
        self.s == other.s && self.p == other.p && self.o == other.o
    }

    /// Returns the retraction flake cancelling this assertion at `t`.
    pub fn retract_at(&self, t: T) -> Flake {
        Flake {
            t,
            op: false,
            ..self.clone()
        }
    }

    /// Estimated serialized size. Used for reindex thresholds only, so the
    /// formula favors stability over accuracy.
    pub fn size_bytes(&self) -> usize {
        let m_size = match self.m {
            None => 1,
            Some(m) => {
                let mut digits = 0usize;
                let mut v = m.unsigned_abs();
                loop {
                    digits += 1;
                    v /= 10;
                    if v == 0 {
                        break;
                    }
                }
                2 * (digits + usize::from(m < 0))
            }
        };
        37 + self.o.size_bytes() + m_size
    }
}

impl fmt::Display for Flake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{} {} {:?} {} {}]",
            self.s, self.p, self.o, self.t, self.op
        )
    }
}

/// Hashes a metadata document into the integer sort key carried in `m`.
pub fn meta_hash(meta: &serde_json::Value) -> i64 {
    xxh64(meta.to_string().as_bytes(), 0) as i64
}
