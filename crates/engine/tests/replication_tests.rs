//! Replication log round trips
//!
//! Whatever an update does on the primary, replaying its log entries on a
//! copy that started from the same state must produce the same documents.

use std::collections::BTreeMap;
use std::sync::Arc;

use pagoda_core::{Document, FieldPath, Namespace, OpKind, RecordStorage, ReplicationLog};
use pagoda_durability::{read_entries, MemoryOplog, OplogEntry};
use pagoda_engine::replay::{apply_all, apply_entry};
use pagoda_engine::{Database, EngineConfig, ModSet, UpdateRequest, OPLOG_FILE_NAME};
use pagoda_storage::Collection;
use proptest::prelude::*;
use serde_json::{json, Value};
use tempfile::TempDir;

const NS: &str = "rs.items";

// ============================================================================
// Test Helpers
// ============================================================================

fn primary(config: EngineConfig) -> (Database, Arc<MemoryOplog>) {
    let oplog = Arc::new(MemoryOplog::new());
    let db = Database::with_oplog(config, oplog.clone()).unwrap();
    (db, oplog)
}

fn snapshot(db: &Database) -> BTreeMap<String, Document> {
    db.find(NS, json!({}))
        .unwrap()
        .into_iter()
        .map(|d| (d.id().map(Value::to_string).unwrap_or_default(), d))
        .collect()
}

fn replay_into_fresh(entries: &[OplogEntry]) -> Database {
    let replica = Database::open(EngineConfig::default()).unwrap();
    assert_eq!(apply_all(&replica, entries).unwrap(), entries.len());
    replica
}

fn run(db: &Database, filter: Value, update: Value) {
    db.update(&UpdateRequest::parse(NS, filter, update).unwrap())
        .unwrap();
}

fn run_multi(db: &Database, filter: Value, update: Value) {
    db.update(&UpdateRequest::parse(NS, filter, update).unwrap().multi(true))
        .unwrap();
}

// ============================================================================
// Round Trips
// ============================================================================

#[test]
fn test_mixed_workload_replays_to_same_state() {
    let config = EngineConfig {
        padding_factor: 1.0,
        ..EngineConfig::default()
    };
    let (db, oplog) = primary(config);
    db.insert(NS, json!({"_id": 1, "n": 1, "tags": ["a", "b"], "old": true}))
        .unwrap();
    db.insert(
        NS,
        json!({"_id": 2, "lines": [{"sku": "x", "qty": 1}, {"sku": "y", "qty": 1}]}),
    )
    .unwrap();
    db.insert(NS, json!({"_id": 3, "stack": [1, 2, 3]})).unwrap();

    run(&db, json!({"_id": 1}), json!({"$inc": {"n": 41}}));
    run(&db, json!({"_id": 1}), json!({"$push": {"tags": {"$each": ["c", "d"]}}}));
    run(&db, json!({"_id": 1}), json!({"$pull": {"tags": "a"}}));
    run(&db, json!({"_id": 1}), json!({"$addToSet": {"tags": "b"}}));
    run(&db, json!({"_id": 1}), json!({"$rename": {"old": "legacy"}}));
    run(&db, json!({"lines.sku": "y"}), json!({"$inc": {"lines.$.qty": 2}}));
    run(&db, json!({"_id": 3}), json!({"$pop": {"stack": 1}}));
    run(&db, json!({"_id": 3}), json!({"$pop": {"stack": -1}}));
    run(&db, json!({"_id": 3}), json!({"$unset": {"stack": 1}, "$set": {"done": true}}));
    run(&db, json!({"_id": 2}), json!({"lines": [], "note": "reset"}));
    run_multi(&db, json!({}), json!({"$set": {"seen": 1}}));
    db.update(
        &UpdateRequest::parse(NS, json!({"_id": 4}), json!({"$set": {"fresh": true}}))
            .unwrap()
            .upsert(true),
    )
    .unwrap();
    db.update(
        &UpdateRequest::parse(NS, json!({"_id": 5}), json!({"literal": 1}))
            .unwrap()
            .upsert(true),
    )
    .unwrap();

    let replica = replay_into_fresh(&oplog.entries());
    assert_eq!(snapshot(&replica), snapshot(&db));

    let one = db.find_one(NS, json!({"_id": 1})).unwrap().unwrap();
    assert_eq!(one.get("n"), Some(&json!(42)));
    assert_eq!(one.get("tags"), Some(&json!(["b", "c", "d"])));
    assert_eq!(one.get("legacy"), Some(&json!(true)));
}

#[test]
fn test_non_idempotent_entries_are_rewritten() {
    let (db, oplog) = primary(EngineConfig::default());
    db.insert(NS, json!({"_id": 1, "n": 1, "tags": ["a"]})).unwrap();

    run(&db, json!({"_id": 1}), json!({"$set": {"m": 1}}));
    run(&db, json!({"_id": 1}), json!({"$addToSet": {"tags": "z"}}));

    let entries = oplog.entries();
    assert_eq!(
        entries[1].object,
        Document::try_from(json!({"$set": {"m": 1}})).unwrap()
    );
    assert_eq!(
        entries[2].object,
        Document::try_from(json!({"$set": {"tags": ["a", "z"]}})).unwrap()
    );
}

#[test]
fn test_array_dependent_entries_carry_size_guard() {
    let (db, oplog) = primary(EngineConfig::default());
    db.insert(NS, json!({"_id": 1, "a": [1, 2]})).unwrap();

    run(&db, json!({"_id": 1}), json!({"$push": {"a": 3}}));

    let entry = oplog.last().unwrap();
    assert_eq!(entry.object, Document::try_from(json!({"$push": {"a": 3}})).unwrap());
    assert_eq!(
        entry.query,
        Some(Document::try_from(json!({"_id": 1, "a": {"$size": 2}})).unwrap())
    );

    // Replaying twice does not push twice
    let replica = replay_into_fresh(&oplog.entries());
    assert!(apply_entry(&replica, &entry).is_err());
    assert_eq!(
        replica.find_one(NS, json!({"_id": 1})).unwrap().unwrap().get("a"),
        Some(&json!([1, 2, 3]))
    );
}

#[test]
fn test_from_migrate_is_recorded() {
    let (db, oplog) = primary(EngineConfig::default());
    db.insert(NS, json!({"_id": 1})).unwrap();

    db.update(
        &UpdateRequest::parse(NS, json!({"_id": 1}), json!({"$set": {"a": 1}}))
            .unwrap()
            .from_migrate(true),
    )
    .unwrap();

    assert!(oplog.last().unwrap().from_migrate);
}

#[test]
fn test_unlogged_update_writes_no_entry() {
    let (db, oplog) = primary(EngineConfig::default());
    db.insert(NS, json!({"_id": 1})).unwrap();
    let before = oplog.len();

    db.update(
        &UpdateRequest::parse(NS, json!({"_id": 1}), json!({"$set": {"a": 1}}))
            .unwrap()
            .log(false),
    )
    .unwrap();

    assert_eq!(oplog.len(), before);
}

// ============================================================================
// File-Backed Log
// ============================================================================

#[test]
fn test_file_oplog_replays_after_reopen() {
    let dir = TempDir::new().unwrap();
    let expected = {
        let db = Database::open_dir(dir.path()).unwrap();
        db.insert(NS, json!({"_id": 1, "n": 0, "a": []})).unwrap();
        db.insert(NS, json!({"_id": 2, "n": 0, "a": []})).unwrap();
        run_multi(&db, json!({}), json!({"$inc": {"n": 2}}));
        run(&db, json!({"_id": 2}), json!({"$push": {"a": "x"}}));
        db.oplog().commit_if_needed().unwrap();
        snapshot(&db)
    };

    let entries = read_entries(dir.path().join(OPLOG_FILE_NAME)).unwrap();
    assert_eq!(entries.len(), 5);
    assert_eq!(entries[0].op, OpKind::Insert);
    assert!(entries.windows(2).all(|w| w[1].seq == w[0].seq + 1));

    let replica = replay_into_fresh(&entries);
    assert_eq!(snapshot(&replica), expected);

    // Appends continue the sequence
    let db = Database::open_dir(dir.path()).unwrap();
    db.insert(NS, json!({"_id": 3})).unwrap();
    drop(db);
    let entries = read_entries(dir.path().join(OPLOG_FILE_NAME)).unwrap();
    assert_eq!(entries.len(), 6);
    assert_eq!(entries[5].seq, entries[4].seq + 1);
}

// ============================================================================
// Properties
// ============================================================================

#[derive(Debug, Clone)]
enum Op {
    Inc { id: i64, by: i64 },
    Push { id: i64, v: i64 },
    Pop { id: i64, first: bool },
    AddToSet { id: i64, v: i64 },
    PullAll { v: i64 },
    SetName { id: i64, name: String },
    IncAll { by: i64 },
    IncMatched { id: i64, v: i64, by: i64 },
    SetMatchedAll { v: i64, to: i64 },
}

fn arb_op() -> impl Strategy<Value = Op> {
    let id = 0i64..3;
    prop_oneof![
        (id.clone(), -300i64..300).prop_map(|(id, by)| Op::Inc { id, by }),
        (id.clone(), 0i64..4).prop_map(|(id, v)| Op::Push { id, v }),
        (id.clone(), any::<bool>()).prop_map(|(id, first)| Op::Pop { id, first }),
        (id.clone(), 0i64..4).prop_map(|(id, v)| Op::AddToSet { id, v }),
        (0i64..4).prop_map(|v| Op::PullAll { v }),
        (id, "[a-z]{0,12}").prop_map(|(id, name)| Op::SetName { id, name }),
        (-2i64..3).prop_map(|by| Op::IncAll { by }),
        (0i64..3, 0i64..4, -300i64..300).prop_map(|(id, v, by)| Op::IncMatched { id, v, by }),
        (0i64..4, 0i64..4).prop_map(|(v, to)| Op::SetMatchedAll { v, to }),
    ]
}

fn apply_op(db: &Database, op: &Op) {
    match op {
        Op::Inc { id, by } => run(db, json!({"_id": id}), json!({"$inc": {"n": by}})),
        Op::Push { id, v } => run(db, json!({"_id": id}), json!({"$push": {"a": v}})),
        Op::Pop { id, first } => run(
            db,
            json!({"_id": id}),
            json!({"$pop": {"a": if *first { -1 } else { 1 }}}),
        ),
        Op::AddToSet { id, v } => run(db, json!({"_id": id}), json!({"$addToSet": {"a": v}})),
        Op::PullAll { v } => run_multi(db, json!({}), json!({"$pull": {"a": v}})),
        Op::SetName { id, name } => run(db, json!({"_id": id}), json!({"$set": {"name": name}})),
        Op::IncAll { by } => run_multi(db, json!({}), json!({"$inc": {"n": by}})),
        Op::IncMatched { id, v, by } => {
            run(db, json!({"_id": id, "a": v}), json!({"$inc": {"a.$": by}}))
        }
        Op::SetMatchedAll { v, to } => run_multi(db, json!({"a": v}), json!({"$set": {"a.$": to}})),
    }
}

proptest! {
    #[test]
    fn replay_reproduces_primary(ops in prop::collection::vec(arb_op(), 1..24), padding in 1.0f64..2.0) {
        let config = EngineConfig { padding_factor: padding, ..EngineConfig::default() };
        let (db, oplog) = primary(config);
        for id in 0..3 {
            db.insert(NS, json!({"_id": id, "n": 0, "a": []})).unwrap();
        }
        for op in &ops {
            apply_op(&db, op);
        }
        let replica = replay_into_fresh(&oplog.entries());
        prop_assert_eq!(snapshot(&replica), snapshot(&db));
    }

    #[test]
    fn in_place_matches_rebuild(start in -2000i64..2000, by in -2000i64..2000) {
        let ns: Namespace = NS.parse().unwrap();
        let doc = Document::try_from(json!({"_id": 1, "n": start, "tail": "t"})).unwrap();
        let program = ModSet::parse(
            &Document::try_from(json!({"$inc": {"n": by}})).unwrap(),
            &[FieldPath::parse("_id").unwrap()],
        )
        .unwrap();
        let state = program.prepare(&doc).unwrap();

        let fast = Collection::new(ns.clone(), 1, 1.0);
        let loc = fast.insert(&doc).unwrap();
        let fast_loc = if state.can_apply_in_place() {
            state.apply_in_place(&fast, loc).unwrap();
            loc
        } else {
            fast.overwrite(loc, &state.rebuild()).unwrap()
        };

        let slow = Collection::new(ns, 2, 1.0);
        let loc = slow.insert(&doc).unwrap();
        let slow_loc = slow.overwrite(loc, &state.rebuild()).unwrap();

        prop_assert_eq!(
            fast.read(fast_loc).unwrap().encode().unwrap(),
            slow.read(slow_loc).unwrap().encode().unwrap()
        );
        let fast_doc = fast.read(fast_loc).unwrap();
        prop_assert_eq!(fast_doc.get("n"), Some(&json!(start + by)));
    }
}
