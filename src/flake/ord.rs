//! The five total orderings over flakes.
//!
//! Each ordering is a cascade: the first non-equal component decides.
//! Subjects sort descending (bigger SID first) and transactions newest
//! first; predicates and objects sort ascending, except `opst` where the
//! object leads descending. `op` and `m` break remaining ties.

use std::cmp::Ordering;

use super::{Flake, FlakeValue, Sid, T};

/// One slot of a comparator cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    /// Subject, bigger SID first.
    SubjectDesc,
    /// Predicate, ascending.
    PredicateAsc,
    /// Object, ascending.
    ObjectAsc,
    /// Object, descending.
    ObjectDesc,
    /// Transaction, newest first.
    TNewest,
    /// Retract before assert.
    OpAsc,
    /// Metadata key, absent first.
    MetaAsc,
}

use Component::*;

impl Component {
    fn cmp_flakes(self, a: &Flake, b: &Flake) -> Ordering {
        match self {
            SubjectDesc => b.s.cmp(&a.s),
            PredicateAsc => a.p.cmp(&b.p),
            ObjectAsc => a.o.cmp(&b.o),
            ObjectDesc => b.o.cmp(&a.o),
            // Newer transactions have smaller t, so ascending numeric order
            // puts the newest first.
            TNewest => a.t.cmp(&b.t),
            OpAsc => a.op.cmp(&b.op),
            MetaAsc => a.m.cmp(&b.m),
        }
    }

    fn cmp_bound(self, bound: &FlakeBound, f: &Flake) -> Option<Ordering> {
        match self {
            SubjectDesc => bound.s.map(|s| f.s.cmp(&s)),
            PredicateAsc => bound.p.map(|p| p.cmp(&f.p)),
            ObjectAsc => bound.o.as_ref().map(|o| o.cmp(&f.o)),
            ObjectDesc => bound.o.as_ref().map(|o| f.o.cmp(o)),
            TNewest => bound.t.map(|t| t.cmp(&f.t)),
            OpAsc => bound.op.map(|op| op.cmp(&f.op)),
            MetaAsc => bound.m.map(|m| Some(m).cmp(&f.m)),
        }
    }
}

/// Which end of a range a bound sits on. Unspecified components extend a
/// `Lower` bound to -inf and an `Upper` bound to +inf under the ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundSide {
    /// Inclusive lower end.
    Lower,
    /// Inclusive upper end.
    Upper,
}

/// A partially specified flake used as a range endpoint.
///
/// `None` components are unconstrained; under a given ordering the bound
/// then sits before (lower) or after (upper) every flake sharing the
/// specified prefix.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlakeBound {
    /// Subject constraint.
    pub s: Option<Sid>,
    /// Predicate constraint.
    pub p: Option<Sid>,
    /// Object constraint.
    pub o: Option<FlakeValue>,
    /// Transaction constraint.
    pub t: Option<T>,
    /// Op constraint.
    pub op: Option<bool>,
    /// Metadata constraint.
    pub m: Option<i64>,
}

impl FlakeBound {
    /// Unconstrained bound.
    pub fn any() -> FlakeBound {
        FlakeBound::default()
    }

    /// Bound constrained to a subject.
    pub fn subject(s: Sid) -> FlakeBound {
        FlakeBound {
            s: Some(s),
            ..Default::default()
        }
    }

    /// Bound constrained to a predicate.
    pub fn predicate(p: Sid) -> FlakeBound {
        FlakeBound {
            p: Some(p),
            ..Default::default()
        }
    }

    /// Adds a subject constraint.
    pub fn with_s(mut self, s: Sid) -> FlakeBound {
        self.s = Some(s);
        self
    }

    /// Adds a predicate constraint.
    pub fn with_p(mut self, p: Sid) -> FlakeBound {
        self.p = Some(p);
        self
    }

    /// Adds an object constraint.
    pub fn with_o(mut self, o: FlakeValue) -> FlakeBound {
        self.o = Some(o);
        self
    }

    /// Adds a transaction constraint.
    pub fn with_t(mut self, t: T) -> FlakeBound {
        self.t = Some(t);
        self
    }

    /// The fully specified bound equal to `f` under every ordering.
    pub fn exact(f: &Flake) -> FlakeBound {
        FlakeBound {
            s: Some(f.s),
            p: Some(f.p),
            o: Some(f.o.clone()),
            t: Some(f.t),
            op: Some(f.op),
            m: f.m,
        }
    }
}

/// A total order over flakes. Implementations are zero-sized tags, so
/// collections and trees can be generic over the ordering with no
/// per-element cost.
pub trait FlakeOrder: Clone + Copy + Default + Send + Sync + 'static {
    /// Index name as it appears in commits and novelty maps.
    const NAME: &'static str;
    /// The comparator cascade, first component decides.
    const COMPONENTS: &'static [Component];

    /// Compares two flakes under this ordering.
    fn cmp(a: &Flake, b: &Flake) -> Ordering {
        for c in Self::COMPONENTS {
            match c.cmp_flakes(a, b) {
                Ordering::Equal => continue,
                other => return other,
            }
        }
        Ordering::Equal
    }

    /// Compares a range bound against a flake under this ordering.
    fn cmp_bound(bound: &FlakeBound, f: &Flake, side: BoundSide) -> Ordering {
        for c in Self::COMPONENTS {
            match c.cmp_bound(bound, f) {
                Some(Ordering::Equal) => continue,
                Some(other) => return other,
                None => {
                    return match side {
                        BoundSide::Lower => Ordering::Less,
                        BoundSide::Upper => Ordering::Greater,
                    }
                }
            }
        }
        Ordering::Equal
    }
}

macro_rules! flake_order {
    ($(#[$doc:meta])* $name:ident, $label:literal, [$($comp:expr),+]) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
        pub struct $name;

        impl FlakeOrder for $name {
            const NAME: &'static str = $label;
            const COMPONENTS: &'static [Component] = &[$($comp),+];
        }
    };
}

flake_order!(
    /// Subject-first order: s desc, p, o, t, op, m.
    Spot, "spot", [SubjectDesc, PredicateAsc, ObjectAsc, TNewest, OpAsc, MetaAsc]
);
flake_order!(
    /// Predicate-subject order: p, s desc, o, t, op, m.
    Psot, "psot", [PredicateAsc, SubjectDesc, ObjectAsc, TNewest, OpAsc, MetaAsc]
);
flake_order!(
    /// Predicate-object order: p, o, s desc, t, op, m.
    Post, "post", [PredicateAsc, ObjectAsc, SubjectDesc, TNewest, OpAsc, MetaAsc]
);
flake_order!(
    /// Object-first order: o desc, p, s desc, t, op, m.
    Opst, "opst", [ObjectDesc, PredicateAsc, SubjectDesc, TNewest, OpAsc, MetaAsc]
);
flake_order!(
    /// Transaction-first order: t, s desc, p, o, op, m.
    Tspo, "tspo", [TNewest, SubjectDesc, PredicateAsc, ObjectAsc, OpAsc, MetaAsc]
);

/// The five index names in canonical listing order.
pub const INDEX_NAMES: [&str; 5] = [
    Spot::NAME,
    Psot::NAME,
    Post::NAME,
    Opst::NAME,
    Tspo::NAME,
];
