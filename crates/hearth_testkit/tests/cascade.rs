//! Cascade scenarios over the seeded household.

use hearth_core::{CascadeAction, CascadeRule, CoreError, Document, ErrorKind, Topic};
use hearth_testkit::prelude::*;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;

#[test]
fn deleting_a_part_without_dependents_touches_nothing_else() {
    let (db, home) = scenarios::seeded_household();
    home.parts.upsert(&Part::new("p3", "Loner")).unwrap();
    let before = db.export().unwrap();

    assert!(home.parts.delete("p3").unwrap());

    let after = db.export().unwrap();
    assert_eq!(before.collections[COMMITMENTS], after.collections[COMMITMENTS]);
    assert_eq!(before.collections[CIRCLES], after.collections[CIRCLES]);
    assert_eq!(before.collections[CONVERSATIONS], after.collections[CONVERSATIONS]);
    assert_eq!(home.parts.count().unwrap(), 2);
}

#[test]
fn one_notification_round_covers_every_touched_collection() {
    let (db, home) = scenarios::seeded_household();
    let seen = Arc::new(Mutex::new(Vec::new()));
    for topic in [PARTS, COMMITMENTS, BATTLES, JOURNAL, CIRCLES, CONVERSATIONS, ACCOUNTS] {
        let s = Arc::clone(&seen);
        let _ = db.observe(Topic::Collection(topic.to_string()), move |n| {
            s.lock().push((topic, n.sequence));
        });
    }

    assert!(home.parts.delete("p1").unwrap());

    let seen = seen.lock();
    let topics: Vec<&str> = seen.iter().map(|(t, _)| *t).collect();
    assert_eq!(
        topics,
        vec![BATTLES, CIRCLES, COMMITMENTS, CONVERSATIONS, JOURNAL, PARTS]
    );
    assert!(seen.iter().all(|(_, seq)| *seq == db.committed_seq()));
}

#[test]
fn cascade_joins_the_callers_transaction() {
    let (db, home) = scenarios::seeded_household();

    let result: Result<(), CoreError> = db.transaction(|txn| {
        assert!(home.parts.delete_in_txn(txn, "p1")?);
        assert!(home.commitments.get_in_txn(txn, "c1")?.is_none());
        assert_eq!(home.parts.get_all_in_txn(txn)?.len(), 1);
        assert_eq!(
            home.circles.require_in_txn(txn, "circle1")?.member_ids,
            vec!["p2"]
        );
        Err(CoreError::validation("changed my mind"))
    });

    assert_eq!(result.unwrap_err().kind(), ErrorKind::Validation);
    assert!(home.parts.contains("p1").unwrap());
    assert!(home.commitments.contains("c1").unwrap());
    assert_eq!(
        home.circles.require("circle1").unwrap().member_ids,
        vec!["p1", "p2"]
    );
}

#[test]
fn guard_sees_writes_made_earlier_in_the_transaction() {
    let (db, home) = scenarios::seeded_household();

    let err = db
        .transaction(|txn| {
            home.battles.upsert_in_txn(txn, &Battle::new("b2", "p2"))?;
            home.parts.delete_in_txn(txn, "p2")
        })
        .unwrap_err();
    assert!(matches!(err, CoreError::IntegrityViolation { .. }));
    assert!(!home.battles.contains("b2").unwrap());

    // Finishing the battle first lifts the guard.
    db.transaction(|txn| {
        home.battles
            .upsert_in_txn(txn, &Battle::new("b2", "p2").finished())?;
        home.parts.delete_in_txn(txn, "p2")
    })
    .unwrap();
    assert!(!home.parts.contains("p2").unwrap());
    assert!(!home.battles.contains("b2").unwrap());
}

#[test]
fn emptied_conversation_is_dropped_and_shared_one_is_rewritten() {
    let (_db, home) = scenarios::seeded_household();

    home.parts.delete("p2").unwrap();

    let conv1 = home.conversations.require("conv1").unwrap();
    let conv2 = home.conversations.require("conv2").unwrap();
    assert_eq!(conv1.lines.len(), 1);
    let expected = DialogueLine {
        author_id: "p1".to_string(),
        text: "Try harder.".to_string(),
    };
    assert_eq!(conv2.lines, vec![expected]);

    home.parts.delete("p1").unwrap();
    assert_eq!(home.conversations.count().unwrap(), 0);
}

#[test]
fn untyped_handle_runs_the_same_rules() {
    let (db, home) = scenarios::seeded_household();
    let parts = db.documents(PARTS);

    assert!(parts.delete("p1").unwrap());

    assert!(!home.commitments.contains("c1").unwrap());
    assert_eq!(home.journal.require("j1").unwrap().part_id, None);
}

#[test]
fn clear_skips_cascades() {
    let (_db, home) = scenarios::seeded_household();

    home.parts.clear().unwrap();

    assert_eq!(home.parts.count().unwrap(), 0);
    assert_eq!(home.commitments.count().unwrap(), 2);
}

#[test]
fn dependents_of_dependents_are_deleted() {
    let db = TestDatabase::memory();
    db.add_cascade_rule(CascadeRule::delete_dependent("households", PARTS, "householdId"));
    db.add_cascade_rules(standard_rules());
    let home = Household::attach(&db).unwrap();
    let households = db.documents("households");

    households
        .upsert(&Document::from_value(json!({"id": "h1"})).unwrap())
        .unwrap();
    db.documents(PARTS)
        .upsert(
            &Document::from_value(json!({
                "id": "p1", "name": "Critic", "energy": 10, "trust": 10, "householdId": "h1"
            }))
            .unwrap(),
        )
        .unwrap();
    home.commitments
        .upsert(&Commitment::new("c1", "p1", "Walk"))
        .unwrap();

    assert!(households.delete("h1").unwrap());

    assert_eq!(home.parts.count().unwrap(), 0);
    assert_eq!(home.commitments.count().unwrap(), 0);
}

#[test]
fn guard_on_a_transitive_dependent_blocks_the_root() {
    let db = TestDatabase::memory();
    db.add_cascade_rule(CascadeRule::delete_dependent("households", PARTS, "householdId"));
    db.add_cascade_rules(standard_rules());
    let home = Household::attach(&db).unwrap();
    let households = db.documents("households");

    households
        .upsert(&Document::from_value(json!({"id": "h1"})).unwrap())
        .unwrap();
    db.documents(PARTS)
        .upsert(
            &Document::from_value(json!({
                "id": "p1", "name": "Critic", "energy": 10, "trust": 10, "householdId": "h1"
            }))
            .unwrap(),
        )
        .unwrap();
    home.battles.upsert(&Battle::new("b1", "p1")).unwrap();

    let err = households.delete("h1").unwrap_err();
    match err {
        CoreError::IntegrityViolation { collection, id, .. } => {
            assert_eq!(collection, PARTS);
            assert_eq!(id.as_str(), "p1");
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(households.contains("h1").unwrap());
}

#[test]
fn rule_table_is_enumerable_from_the_database() {
    let db = TestDatabase::household();
    let rules = db.cascade_rules();

    assert_eq!(rules.len(), 7);
    let guards = rules
        .iter()
        .filter(|r| matches!(r.action, CascadeAction::RejectDeletion { .. }))
        .count();
    assert_eq!(guards, 2);
}
