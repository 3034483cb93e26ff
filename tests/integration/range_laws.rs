#![allow(missing_docs)]

use std::cmp::Ordering;
use std::sync::Arc;

use proptest::prelude::*;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use tessera::connection::{Connection, ConnectionConfig, ConnectionOptions};
use tessera::db::IndexingOptions;
use tessera::flake::ord::{FlakeBound, FlakeOrder, Post, Spot};
use tessera::flake::set::FlakeSet;
use tessera::flake::{Flake, FlakeValue, Sid};
use tessera::ledger::indexer::Indexer;
use tessera::ledger::CommitOpts;
use tessera::nameservice::memory::MemoryNameService;
use tessera::storage::{memory::MemoryStore, Catalog};
use tessera::transact::{ObjectSpec, TxOp};

fn connection() -> Connection {
    let ns = Arc::new(MemoryNameService::new());
    Connection::connect(ConnectionConfig {
        catalog: Arc::new(Catalog::new(Arc::new(MemoryStore::new()))),
        primary_publisher: ns.clone(),
        secondary_publishers: vec![],
        publications: vec![ns],
        options: ConnectionOptions::default(),
        indexing: IndexingOptions {
            reindex_min_bytes: 64,
            reindex_max_bytes: 1024,
            indexing_disabled: true,
            ..Default::default()
        },
    })
}

fn flake(s: i64, p: i64, o: i64, t: i64, op: bool) -> Flake {
    Flake::new(Sid(s), Sid(p), FlakeValue::Int(o), t, op, None)
}

fn arb_flake() -> impl Strategy<Value = Flake> {
    (0..6i64, 0..3i64, 0..4i64, -5..0i64, any::<bool>())
        .prop_map(|(s, p, o, t, op)| flake(s, p, o, t, op))
}

proptest! {
    #[test]
    fn spot_comparator_is_a_total_order(
        a in arb_flake(),
        b in arb_flake(),
        c in arb_flake(),
    ) {
        // antisymmetry
        prop_assert_eq!(Spot::cmp(&a, &b), Spot::cmp(&b, &a).reverse());
        // transitivity over the sampled triple
        if Spot::cmp(&a, &b) != Ordering::Greater && Spot::cmp(&b, &c) != Ordering::Greater {
            prop_assert_ne!(Spot::cmp(&a, &c), Ordering::Greater);
        }
    }

    #[test]
    fn subject_range_equals_subject_filter(flakes in prop::collection::vec(arb_flake(), 0..60)) {
        let set = FlakeSet::<Spot>::from_unsorted(flakes);
        for s in 0..6i64 {
            let bound = FlakeBound::subject(Sid(s));
            let ranged: Vec<&Flake> = set.range(&bound, &bound).iter().collect();
            let filtered: Vec<&Flake> = set.iter().filter(|f| f.s == Sid(s)).collect();
            prop_assert_eq!(ranged, filtered);
        }
    }

    #[test]
    fn batch_merge_matches_single_inserts(
        base in prop::collection::vec(arb_flake(), 0..30),
        additions in prop::collection::vec(arb_flake(), 0..30),
    ) {
        let set = FlakeSet::<Spot>::from_unsorted(base);
        let merged = set.conj_all(additions.clone());
        let mut one_by_one = set;
        for f in additions {
            one_by_one = one_by_one.insert(f);
        }
        let a: Vec<&Flake> = merged.iter().collect();
        let b: Vec<&Flake> = one_by_one.iter().collect();
        prop_assert_eq!(a, b);
    }
}

#[test]
fn ordering_is_insertion_order_independent() {
    let flakes: Vec<Flake> = (0..200)
        .map(|i: i64| flake(i % 20, i % 3, i % 7, -(i % 5) - 1, true))
        .collect();
    let reference = FlakeSet::<Spot>::from_unsorted(flakes.clone());
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    for _ in 0..5 {
        let mut shuffled = flakes.clone();
        shuffled.shuffle(&mut rng);
        let set = FlakeSet::<Spot>::from_unsorted(shuffled);
        assert_eq!(set.as_slice(), reference.as_slice());
    }
}

#[tokio::test]
async fn spot_range_returns_all_subject_flakes() {
    let conn = connection();
    let ledger = conn.create_ledger("law9/main").await.unwrap();
    let db = ledger.current_db().unwrap().db().await.unwrap();

    let staged = db
        .stage(&[
            TxOp::Assert {
                s: "ex:a".to_string(),
                p: "ex:p".to_string(),
                o: ObjectSpec::Value(FlakeValue::Int(1)),
            },
            TxOp::Assert {
                s: "ex:a".to_string(),
                p: "ex:q".to_string(),
                o: ObjectSpec::Value(FlakeValue::Int(2)),
            },
            TxOp::Assert {
                s: "ex:b".to_string(),
                p: "ex:p".to_string(),
                o: ObjectSpec::Value(FlakeValue::Int(3)),
            },
        ])
        .unwrap();
    let db = ledger.commit(staged, CommitOpts::default()).await.unwrap();

    let s = db.subject_sid("ex:a").unwrap();
    let bound = FlakeBound::subject(s);
    let run = db.range::<Spot>(&bound, &bound).await.unwrap();
    assert_eq!(run.len(), 2);
    assert!(run.iter().all(|f| f.s == s));
}

#[tokio::test]
async fn post_range_spans_index_and_novelty_for_all_t() {
    let conn = connection();
    let ledger = conn.create_ledger("law10/main").await.unwrap();
    let db0 = ledger.current_db().unwrap().db().await.unwrap();

    // t = -1: two subjects assert the same (p, o).
    let staged = db0
        .stage(&[
            TxOp::Assert {
                s: "ex:a".to_string(),
                p: "ex:p".to_string(),
                o: ObjectSpec::Value(FlakeValue::Int(7)),
            },
            TxOp::Assert {
                s: "ex:b".to_string(),
                p: "ex:p".to_string(),
                o: ObjectSpec::Value(FlakeValue::Int(7)),
            },
        ])
        .unwrap();
    let db1 = ledger.commit(staged, CommitOpts::default()).await.unwrap();

    // Push t = -1 into the persistent tree.
    let indexer = Indexer::new(Arc::clone(&db1.catalog), Arc::clone(&db1.cache));
    let indexed = indexer.index(&db1, true, None).await.unwrap();
    let branch = ledger.branch(None).unwrap();
    branch.update_index(indexed).await.unwrap();

    // t = -2 in novelty: one retraction, one new subject.
    let head = ledger.current_db().unwrap().db().await.unwrap();
    let staged = head
        .stage(&[
            TxOp::Retract {
                s: "ex:a".to_string(),
                p: "ex:p".to_string(),
                o: ObjectSpec::Value(FlakeValue::Int(7)),
            },
            TxOp::Assert {
                s: "ex:c".to_string(),
                p: "ex:p".to_string(),
                o: ObjectSpec::Value(FlakeValue::Int(7)),
            },
        ])
        .unwrap();
    let db2 = ledger.commit(staged, CommitOpts::default()).await.unwrap();

    let p = db2.predicate_sid("ex:p").unwrap();
    let bound = FlakeBound::predicate(p).with_o(FlakeValue::Int(7));
    let run = db2.range::<Post>(&bound, &bound).await.unwrap();

    // All assertions and retractions with (p, o), across every t: the two
    // indexed assertions, the novelty assertion, and the retraction.
    assert_eq!(run.len(), 4);
    assert_eq!(run.iter().filter(|f| !f.op).count(), 1);
    assert!(run.iter().all(|f| f.p == p && f.o == FlakeValue::Int(7)));
    // The scan comes back in post order.
    assert!(run
        .windows(2)
        .all(|w| Post::cmp(&w[0], &w[1]) == Ordering::Less));
}

#[tokio::test]
async fn novelty_keeps_five_consistent_orderings() {
    let conn = connection();
    let ledger = conn.create_ledger("prop2/main").await.unwrap();
    let db = ledger.current_db().unwrap().db().await.unwrap();
    let staged = db
        .stage(
            &(0..12)
                .map(|i| TxOp::Assert {
                    s: format!("ex:s{}", i % 4),
                    p: format!("ex:p{}", i % 3),
                    o: ObjectSpec::Value(FlakeValue::Int(i)),
                })
                .collect::<Vec<_>>(),
        )
        .unwrap();
    let db = ledger.commit(staged, CommitOpts::default()).await.unwrap();

    assert!(db.novelty.check_consistent());
    // Every spot flake appears in each other ordering with identical
    // content.
    for f in db.novelty.spot.iter() {
        assert!(db.novelty.psot.contains(f));
        assert!(db.novelty.post.contains(f));
        assert!(db.novelty.opst.contains(f));
        assert!(db.novelty.tspo.contains(f));
    }
}

#[tokio::test]
async fn persistent_nodes_respect_first_rhs_invariant() {
    let conn = connection();
    let ledger = conn.create_ledger("prop3/main").await.unwrap();
    let db = ledger.current_db().unwrap().db().await.unwrap();
    let staged = db
        .stage(
            &(0..120)
                .map(|i| TxOp::Assert {
                    s: format!("ex:s{i}"),
                    p: "ex:p".to_string(),
                    o: ObjectSpec::Value(FlakeValue::Int(i)),
                })
                .collect::<Vec<_>>(),
        )
        .unwrap();
    let db = ledger.commit(staged, CommitOpts::default()).await.unwrap();

    let indexer = Indexer::new(Arc::clone(&db.catalog), Arc::clone(&db.cache));
    let indexed = indexer.index(&db, true, None).await.unwrap();

    let root = indexed.indexes.spot.as_ref().unwrap();
    root.check_invariant::<Spot>().unwrap();
    let node = indexed.cache.resolve(&indexed.catalog, root).await.unwrap();
    if let tessera::index::node::IndexNode::Branch(branch) = node.as_ref() {
        for child in &branch.children {
            child.check_invariant::<Spot>().unwrap();
        }
        for pair in branch.children.windows(2) {
            assert_eq!(
                Spot::cmp(&pair[0].first, &pair[1].first),
                Ordering::Less,
                "children are ordered and disjoint"
            );
        }
    }
}

#[tokio::test]
async fn reindex_twice_is_byte_identical() {
    let conn = connection();
    let ledger = conn.create_ledger("prop4/main").await.unwrap();
    let db = ledger.current_db().unwrap().db().await.unwrap();
    let staged = db
        .stage(
            &(0..40)
                .map(|i| TxOp::Assert {
                    s: format!("ex:s{i}"),
                    p: "ex:p".to_string(),
                    o: ObjectSpec::Value(FlakeValue::Int(i)),
                })
                .collect::<Vec<_>>(),
        )
        .unwrap();
    let db = ledger.commit(staged, CommitOpts::default()).await.unwrap();

    let indexer = Indexer::new(Arc::clone(&db.catalog), Arc::clone(&db.cache));
    let once = indexer.index(&db, true, None).await.unwrap();
    let twice = indexer.index(&db, true, None).await.unwrap();
    assert_eq!(
        once.commit.index.as_ref().unwrap().address,
        twice.commit.index.as_ref().unwrap().address
    );
    // Indexing the already-indexed DB changes nothing either.
    let again = indexer.index(&once, true, None).await.unwrap();
    assert_eq!(
        again.commit.index.as_ref().unwrap().address,
        once.commit.index.as_ref().unwrap().address
    );
}
