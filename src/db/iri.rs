//! Per-ledger IRI to SID mapping.
//!
//! Subjects are packed into collections keyed by IRI namespace; predicates
//! all live in the reserved collection 0. The mapping is part of the DB
//! snapshot: staging allocates into a copied map, and the full map rides
//! along in each commit's data document so a loader can rebuild it from the
//! head commit alone.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::flake::{Sid, MAX_SUBJECT_N, PREDICATE_COLLECTION};

/// First collection id handed to subject namespaces.
const FIRST_SUBJECT_COLLECTION: i64 = 1;

/// Bidirectional IRI↔SID mapping with per-collection allocation counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "IriMapFlat", into = "IriMapFlat")]
pub struct IriMap {
    subjects: FxHashMap<String, Sid>,
    predicates: FxHashMap<String, Sid>,
    by_sid: FxHashMap<Sid, String>,
    collections: FxHashMap<String, i64>,
    next_n: FxHashMap<i64, i64>,
    next_collection: i64,
}

/// Serialized shape: flat entry lists, counters rebuilt on load.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct IriMapFlat {
    subjects: Vec<(String, Sid)>,
    predicates: Vec<(String, Sid)>,
    collections: Vec<(String, i64)>,
}

impl IriMap {
    /// Empty mapping.
    pub fn new() -> IriMap {
        IriMap {
            next_collection: FIRST_SUBJECT_COLLECTION,
            ..Default::default()
        }
    }

    /// Splits an IRI at its namespace boundary: after the last `#` or `/`.
    fn namespace(iri: &str) -> &str {
        match iri.rfind(['#', '/']) {
            Some(idx) => &iri[..=idx],
            None => "",
        }
    }

    /// The SID already mapped for a subject IRI.
    pub fn subject_sid(&self, iri: &str) -> Option<Sid> {
        self.subjects.get(iri).copied()
    }

    /// The SID already mapped for a predicate IRI.
    pub fn predicate_sid(&self, iri: &str) -> Option<Sid> {
        self.predicates.get(iri).copied()
    }

    /// The IRI behind a SID, subject or predicate.
    pub fn iri_of(&self, sid: Sid) -> Option<&str> {
        self.by_sid.get(&sid).map(String::as_str)
    }

    /// Maps a subject IRI, allocating the next SID in its namespace's
    /// collection when new.
    pub fn ensure_subject(&mut self, iri: &str) -> Sid {
        if let Some(sid) = self.subjects.get(iri) {
            return *sid;
        }
        let ns = Self::namespace(iri).to_string();
        let collection = match self.collections.get(&ns) {
            Some(c) => *c,
            None => {
                let c = self.next_collection;
                self.next_collection += 1;
                self.collections.insert(ns, c);
                c
            }
        };
        let sid = self.allocate(collection);
        self.subjects.insert(iri.to_string(), sid);
        self.by_sid.insert(sid, iri.to_string());
        sid
    }

    /// Maps a predicate IRI, allocating in the reserved predicate
    /// collection when new.
    pub fn ensure_predicate(&mut self, iri: &str) -> Sid {
        if let Some(sid) = self.predicates.get(iri) {
            return *sid;
        }
        let sid = self.allocate(PREDICATE_COLLECTION);
        self.predicates.insert(iri.to_string(), sid);
        self.by_sid.insert(sid, iri.to_string());
        sid
    }

    fn allocate(&mut self, collection: i64) -> Sid {
        let n = self.next_n.entry(collection).or_insert(0);
        debug_assert!(*n <= MAX_SUBJECT_N);
        let sid = Sid::new(collection, *n);
        *n += 1;
        sid
    }

    /// All predicate entries, for schema rebuilds.
    pub fn predicates(&self) -> impl Iterator<Item = (&str, Sid)> {
        self.predicates.iter().map(|(iri, sid)| (iri.as_str(), *sid))
    }

    /// Number of mapped IRIs.
    pub fn len(&self) -> usize {
        self.by_sid.len()
    }

    /// True when nothing is mapped.
    pub fn is_empty(&self) -> bool {
        self.by_sid.is_empty()
    }
}

impl From<IriMapFlat> for IriMap {
    fn from(flat: IriMapFlat) -> IriMap {
        let mut map = IriMap::new();
        for (ns, collection) in flat.collections {
            map.next_collection = map.next_collection.max(collection + 1);
            map.collections.insert(ns, collection);
        }
        for (iri, sid) in flat.subjects {
            let next = map.next_n.entry(sid.collection()).or_insert(0);
            *next = (*next).max(sid.n() + 1);
            map.by_sid.insert(sid, iri.clone());
            map.subjects.insert(iri, sid);
        }
        for (iri, sid) in flat.predicates {
            let next = map.next_n.entry(sid.collection()).or_insert(0);
            *next = (*next).max(sid.n() + 1);
            map.by_sid.insert(sid, iri.clone());
            map.predicates.insert(iri, sid);
        }
        map
    }
}

impl From<IriMap> for IriMapFlat {
    fn from(map: IriMap) -> IriMapFlat {
        let mut subjects: Vec<(String, Sid)> = map.subjects.into_iter().collect();
        let mut predicates: Vec<(String, Sid)> = map.predicates.into_iter().collect();
        let mut collections: Vec<(String, i64)> = map.collections.into_iter().collect();
        subjects.sort();
        predicates.sort();
        collections.sort();
        IriMapFlat {
            subjects,
            predicates,
            collections,
        }
    }
}
