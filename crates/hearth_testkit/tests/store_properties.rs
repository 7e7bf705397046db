//! Store-level properties, checked against the fixture household.

use hearth_core::{CoreError, Document, ErrorKind, ImportMode, SequenceNumber};
use hearth_testkit::prelude::*;
use parking_lot::Mutex;
use proptest::prelude::*;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

fn ids<T: hearth_core::Entity>(items: &[T]) -> Vec<String> {
    items.iter().map(|i| i.id().to_string()).collect()
}

// ============================================================================
// Bounded log
// ============================================================================

#[test]
fn bounded_log_keeps_newest_three() {
    let db = TestDatabase::memory();
    let log = db.log::<String>("events", 3).unwrap();
    for e in ["e1", "e2", "e3", "e4", "e5"] {
        log.push(&e.to_string()).unwrap();
    }
    assert_eq!(log.to_vec().unwrap(), vec!["e3", "e4", "e5"]);
}

proptest! {
    #![proptest_config(PropTestConfig::quick().to_proptest_config())]

    #[test]
    fn bounded_log_never_exceeds_bound(
        max in 1usize..8,
        events in prop::collection::vec(ledger_event_strategy(), 0..30),
        per_txn in 1usize..5,
    ) {
        let db = TestDatabase::memory();
        let log = db.log::<LedgerEvent>("ledger", max).unwrap();
        let largest = Arc::new(Mutex::new(0usize));
        let l = Arc::clone(&largest);
        let _sub = log.observe(move |all| {
            let mut largest = l.lock();
            *largest = (*largest).max(all.len());
        });

        for chunk in events.chunks(per_txn) {
            db.transaction(|txn| {
                for event in chunk {
                    log.push_in_txn(txn, event)?;
                    assert!(log.to_vec_in_txn(txn)?.len() <= max);
                }
                Ok(())
            }).unwrap();
        }

        let expected: Vec<LedgerEvent> =
            events.iter().skip(events.len().saturating_sub(max)).cloned().collect();
        prop_assert_eq!(log.to_vec().unwrap(), expected);
        prop_assert!(*largest.lock() <= max);
    }
}

// ============================================================================
// Cascades
// ============================================================================

#[test]
fn cascade_delete_leaves_no_dangling_references() {
    let (_db, home) = scenarios::seeded_household();

    // Observers run after the commit; every dependent must already be clean.
    let dangling = Arc::new(Mutex::new(Vec::new()));
    let d = Arc::clone(&dangling);
    let commitments = home.commitments.clone();
    let journal = home.journal.clone();
    let _sub = home.circles.observe(move |circles| {
        let mut d = d.lock();
        if circles.iter().any(|c| c.member_ids.contains(&"p1".to_string())) {
            d.push("circle");
        }
        if commitments.get_all().unwrap().iter().any(|c| c.part_id == "p1") {
            d.push("commitment");
        }
        if journal.get_all().unwrap().iter().any(|j| j.part_id.as_deref() == Some("p1")) {
            d.push("journal");
        }
    });

    assert!(home.parts.delete("p1").unwrap());

    assert!(dangling.lock().is_empty(), "dangling: {:?}", dangling.lock());
    assert_eq!(ids(&home.parts.get_all().unwrap()), vec!["p2"]);
    assert_eq!(ids(&home.commitments.get_all().unwrap()), vec!["c2"]);
    assert!(home.battles.get_all().unwrap().is_empty());
    assert_eq!(home.journal.require("j1").unwrap().part_id, None);
    assert_eq!(home.circles.require("circle1").unwrap().member_ids, vec!["p2"]);

    let conversations = home.conversations.get_all().unwrap();
    assert_eq!(ids(&conversations), vec!["conv2"]);
    assert_eq!(conversations[0].lines.len(), 1);
    assert_eq!(conversations[0].lines[0].author_id, "p2");
}

#[test]
fn rejected_deletion_is_an_atomic_no_op() {
    let (db, home) = scenarios::seeded_household();
    home.battles.upsert(&Battle::new("b2", "p1")).unwrap();

    let before = db.export().unwrap();
    let seq = db.committed_seq();
    let notified = Arc::new(Mutex::new(0));
    let n = Arc::clone(&notified);
    let _sub = home.commitments.observe(move |_| *n.lock() += 1);

    let err = home.parts.delete("p1").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IntegrityViolation);
    match err {
        CoreError::IntegrityViolation { collection, id, .. } => {
            assert_eq!(collection, PARTS);
            assert_eq!(id.as_str(), "p1");
        }
        other => panic!("unexpected error {other:?}"),
    }

    let after = db.export().unwrap();
    assert_eq!(before.collections, after.collections);
    assert_eq!(before.logs, after.logs);
    assert_eq!(db.committed_seq(), seq);
    assert_eq!(*notified.lock(), 0);
}

#[test]
fn guard_on_in_progress_commitment() {
    let (_db, home) = scenarios::seeded_household();
    home.commitments
        .modify("c2", |c| c.status = CommitmentStatus::InProgress)
        .unwrap();

    assert_eq!(
        home.parts.delete("p2").unwrap_err().kind(),
        ErrorKind::IntegrityViolation
    );
    assert!(home.parts.contains("p2").unwrap());
}

#[test]
fn delete_is_idempotent() {
    let (db, home) = scenarios::seeded_household();

    assert!(home.parts.delete("p2").unwrap());
    let once = db.export().unwrap();
    let seq = db.committed_seq();

    assert!(!home.parts.delete("p2").unwrap());
    let twice = db.export().unwrap();

    assert_eq!(once.collections, twice.collections);
    assert_eq!(db.committed_seq(), seq);
}

proptest! {
    #![proptest_config(PropTestConfig::quick().to_proptest_config())]

    #[test]
    fn cascade_leaves_graph_clean(graph in household_graph_strategy(), pick in any::<prop::sample::Index>()) {
        let db = TestDatabase::household();
        let home = Household::attach(&db).unwrap();
        db.transaction(|txn| {
            for id in &graph.parts {
                home.parts.upsert_in_txn(txn, &Part::new(id, "generated"))?;
            }
            for c in &graph.commitments {
                home.commitments.upsert_in_txn(txn, c)?;
            }
            for j in &graph.journal {
                home.journal.upsert_in_txn(txn, j)?;
            }
            for c in &graph.circles {
                home.circles.upsert_in_txn(txn, c)?;
            }
            for c in &graph.conversations {
                home.conversations.upsert_in_txn(txn, c)?;
            }
            Ok(())
        }).unwrap();

        let victim = pick.get(&graph.parts).clone();
        prop_assert!(home.parts.delete(&victim).unwrap());

        prop_assert!(!home.parts.contains(&victim).unwrap());
        prop_assert!(home.commitments.get_all().unwrap().iter().all(|c| c.part_id != victim));
        prop_assert!(home.journal.get_all().unwrap().iter().all(|j| j.part_id.as_ref() != Some(&victim)));
        prop_assert!(home.circles.get_all().unwrap().iter().all(|c| !c.member_ids.contains(&victim)));
        for conv in home.conversations.get_all().unwrap() {
            prop_assert!(!conv.lines.is_empty());
            prop_assert!(conv.lines.iter().all(|l| l.author_id != victim));
        }

        // Unrelated records survive.
        let kept = graph.commitments.iter().filter(|c| c.part_id != victim).count();
        prop_assert_eq!(home.commitments.count().unwrap(), kept);
        prop_assert_eq!(home.journal.count().unwrap(), graph.journal.len());
        prop_assert_eq!(home.circles.count().unwrap(), graph.circles.len());
    }
}

// ============================================================================
// Transactions
// ============================================================================

#[test]
fn reads_inside_a_transaction_see_its_writes() {
    let db = TestDatabase::memory();
    let items = db.documents("items");
    items
        .upsert(&Document::from_value(json!({"id": "x", "v": 0})).unwrap())
        .unwrap();

    db.transaction(|txn| {
        items.upsert_in_txn(txn, &Document::from_value(json!({"id": "x", "v": 1}))?)?;
        let seen = items.require_in_txn(txn, "x")?;
        assert_eq!(seen.get("v"), Some(&json!(1)));
        assert_eq!(items.require("x")?.get("v"), Some(&json!(0)));
        Ok(())
    })
    .unwrap();

    assert_eq!(items.require("x").unwrap().get("v"), Some(&json!(1)));
}

#[test]
fn failed_body_rolls_back_everything() {
    let (db, home) = scenarios::seeded_household();
    let before = db.export().unwrap();
    let calls = Arc::new(Mutex::new(0));
    let c = Arc::clone(&calls);
    let _sub = home.parts.observe(move |_| *c.lock() += 1);

    let result: Result<(), CoreError> = db.transaction(|txn| {
        home.parts.upsert_in_txn(txn, &Part::new("p9", "Ghost"))?;
        home.ledger.push_in_txn(txn, &LedgerEvent::new("a1", 5, "gift"))?;
        home.parts.require_in_txn(txn, "missing").map(|_| ())
    });

    assert_eq!(result.unwrap_err().kind(), ErrorKind::NotFound);
    let after = db.export().unwrap();
    assert_eq!(before.collections, after.collections);
    assert_eq!(before.logs, after.logs);
    assert_eq!(*calls.lock(), 0);
}

#[test]
fn nested_transact_joins_the_outer_commit() {
    let (db, home) = scenarios::seeded_household();
    let seq = db.committed_seq();

    db.transaction(|txn| {
        home.parts.modify_in_txn(txn, "p1", |p| p.energy -= 10)?;
        txn.transact(|inner| {
            let part = home.parts.require_in_txn(inner, "p1")?;
            assert_eq!(part.energy, 90);
            home.ledger
                .push_in_txn(inner, &LedgerEvent::new("a1", -10, "energy"))
        })
    })
    .unwrap();

    assert_eq!(db.committed_seq(), SequenceNumber::new(seq.as_u64() + 1));
    assert_eq!(home.ledger.len().unwrap(), 1);
}

#[test]
fn nested_database_transaction_is_rejected() {
    let db = TestDatabase::memory();
    let err = db
        .transaction(|_| db.transaction(|_| Ok(())))
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidOperation { .. }));
}

#[test]
fn update_of_missing_entity_is_a_no_op() {
    let (db, home) = scenarios::seeded_household();
    let seq = db.committed_seq();

    assert!(!home.parts.update("nobody", &json!({"energy": 1})).unwrap());
    assert!(home.parts.update("p1", &json!({"energy": 400})).unwrap());

    assert_eq!(home.parts.require("p1").unwrap().energy, 100);
    assert_eq!(db.committed_seq(), SequenceNumber::new(seq.as_u64() + 1));
}

// ============================================================================
// Notification
// ============================================================================

#[test]
fn observer_fires_once_per_commit() {
    let db = TestDatabase::memory();
    let home = Household::attach(&db).unwrap();
    let first = Arc::new(Mutex::new(Vec::new()));
    let second = Arc::new(Mutex::new(Vec::new()));
    let f = Arc::clone(&first);
    let s = Arc::clone(&second);
    let _a = home.parts.observe(move |all| f.lock().push(ids(&all)));
    let _b = home.parts.observe(move |all| s.lock().push(ids(&all)));

    db.transaction(|txn| {
        for id in ["p1", "p2", "p3"] {
            home.parts.upsert_in_txn(txn, &Part::new(id, "x"))?;
        }
        Ok(())
    })
    .unwrap();

    assert_eq!(*first.lock(), vec![vec!["p1", "p2", "p3"]]);
    assert_eq!(*second.lock(), vec![vec!["p1", "p2", "p3"]]);
}

#[test]
fn observers_fire_in_registration_order() {
    let db = TestDatabase::memory();
    let home = Household::attach(&db).unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));
    for n in 0..3 {
        let o = Arc::clone(&order);
        let _ = home.parts.observe(move |_| o.lock().push(n));
    }

    home.parts.upsert(&Part::new("p1", "x")).unwrap();
    assert_eq!(*order.lock(), vec![0, 1, 2]);
}

#[test]
fn unsubscribe_stops_delivery() {
    let db = TestDatabase::memory();
    let home = Household::attach(&db).unwrap();
    let calls = Arc::new(Mutex::new(0));
    let c = Arc::clone(&calls);
    let sub = home.parts.observe(move |_| *c.lock() += 1);

    home.parts.upsert(&Part::new("p1", "x")).unwrap();
    assert!(sub.unsubscribe());
    home.parts.upsert(&Part::new("p2", "x")).unwrap();

    assert_eq!(*calls.lock(), 1);
}

// ============================================================================
// Export / import
// ============================================================================

#[test]
fn export_clear_import_round_trip() {
    let (db, home) = scenarios::seeded_household();
    home.deposit(&db, "a1", 25, "allowance").unwrap();

    let before = db.export().unwrap();
    let json = before.to_json().unwrap();

    db.reset().unwrap();
    assert_eq!(home.parts.count().unwrap(), 0);

    let report = db.import_json(&json, ImportMode::Replace).unwrap();
    assert!(report.is_clean());

    let after = db.export().unwrap();
    assert_eq!(before.collections, after.collections);
    assert_eq!(before.logs, after.logs);
    assert_eq!(home.accounts.require("a1").unwrap().balance, 125);
}

#[test]
fn merge_import_reports_per_item() {
    let (db, home) = scenarios::seeded_household();
    let json = json!({
        "version": 1,
        "exportedAt": 0,
        "collections": {
            "parts": [
                {"id": "p3", "name": "Dreamer", "energy": 20, "trust": 20},
                {"id": "p4", "name": "No energy field"}
            ]
        },
        "logs": {
            "ledger": [ {"accountId": "a1", "amount": 3, "reason": "found"} ]
        }
    })
    .to_string();

    let report = db.import_json(&json, ImportMode::Merge).unwrap();
    assert_eq!(report.collections["parts"].imported, 1);
    assert_eq!(report.collections["parts"].failed, 1);
    assert_eq!(report.logs["ledger"].appended, 1);
    assert_eq!(home.parts.count().unwrap(), 3);

    // Importing the same log again skips the event already present.
    let again = db.import_json(&json, ImportMode::Merge).unwrap();
    assert_eq!(again.logs["ledger"].skipped, 1);
    assert_eq!(home.ledger.len().unwrap(), 1);
}

#[test]
fn replace_import_rejects_bad_shape_before_writing() {
    let (db, home) = scenarios::seeded_household();
    let before = db.export().unwrap();
    let bad: Value = json!({
        "version": 1,
        "exportedAt": 0,
        "collections": { "parts": [ {"id": "p1", "name": "a", "energy": 1, "trust": 1},
                                    {"id": "p1", "name": "dup", "energy": 1, "trust": 1} ] }
    });

    let err = db.import_json(&bad.to_string(), ImportMode::Replace).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(before.collections, db.export().unwrap().collections);
    assert_eq!(home.parts.count().unwrap(), 2);

    let future = json!({"version": 99, "exportedAt": 0, "collections": {}});
    assert_eq!(
        db.import_json(&future.to_string(), ImportMode::Merge).unwrap_err().kind(),
        ErrorKind::Validation
    );
}

// ============================================================================
// Model check
// ============================================================================

proptest! {
    #![proptest_config(PropTestConfig::quick().to_proptest_config())]

    #[test]
    fn store_matches_model(ops in prop::collection::vec(store_op_strategy(), 0..60)) {
        const MAX: usize = 4;
        let db = TestDatabase::memory();
        let items = db.documents("items");
        let log = db.log::<i64>("numbers", MAX).unwrap();

        let mut model: BTreeMap<String, i64> = BTreeMap::new();
        let mut events: Vec<i64> = Vec::new();

        for op in ops {
            match op {
                StoreOp::Upsert(id, n) => {
                    items.upsert(&Document::from_value(json!({"id": id, "n": n})).unwrap()).unwrap();
                    model.insert(id, n);
                }
                StoreOp::Update(id, n) => {
                    let changed = items.update(&id, &json!({"n": n})).unwrap();
                    prop_assert_eq!(changed, model.contains_key(&id));
                    if let Some(v) = model.get_mut(&id) {
                        *v = n;
                    }
                }
                StoreOp::Delete(id) => {
                    let existed = items.delete(&id).unwrap();
                    prop_assert_eq!(existed, model.remove(&id).is_some());
                }
                StoreOp::Push(n) => {
                    log.push(&n).unwrap();
                    events.push(n);
                    if events.len() > MAX {
                        events.remove(0);
                    }
                }
            }
        }

        let stored: BTreeMap<String, i64> = items
            .get_all()
            .unwrap()
            .into_iter()
            .map(|d| (d.id().to_string(), d.get("n").and_then(Value::as_i64).unwrap()))
            .collect();
        prop_assert_eq!(stored, model);
        prop_assert_eq!(log.to_vec().unwrap(), events);
    }
}
