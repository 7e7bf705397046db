//! Domain fixtures and database helpers.
//!
//! The fixture types model the records an application keeps in a
//! HearthDB store (parts, commitments, battles, conversations, an
//! economy ledger). They exist to exercise the store's contracts:
//! clamping in [`Entity::normalize`], cascade tables and typed logs.

use crate::rules::standard_rules;
use hearth_core::validate::clamp;
use hearth_core::{Collection, CoreResult, Database, Entity, EntityId, Log};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Collection of parts.
pub const PARTS: &str = "parts";
/// Collection of accounts.
pub const ACCOUNTS: &str = "accounts";
/// Collection of commitments.
pub const COMMITMENTS: &str = "commitments";
/// Collection of battles.
pub const BATTLES: &str = "battles";
/// Collection of conversations.
pub const CONVERSATIONS: &str = "conversations";
/// Collection of journal entries.
pub const JOURNAL: &str = "journal";
/// Collection of circles.
pub const CIRCLES: &str = "circles";
/// Money-movement log.
pub const LEDGER: &str = "ledger";
/// Retention bound of the ledger.
pub const LEDGER_MAX: usize = 50;

// ============================================================================
// Domain types
// ============================================================================

/// A part: the owner most other records point at.
///
/// `energy` and `trust` are clamped to `0..=100`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    /// Stable id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Energy, `0..=100`.
    pub energy: i64,
    /// Trust, `0..=100`.
    pub trust: i64,
}

impl Part {
    /// Creates a part with full energy and neutral trust.
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            energy: 100,
            trust: 50,
        }
    }
}

impl Entity for Part {
    fn id(&self) -> EntityId {
        EntityId::from(self.id.as_str())
    }

    fn normalize(&mut self) {
        self.energy = clamp("energy", self.energy, 0, 100);
        self.trust = clamp("trust", self.trust, 0, 100);
    }
}

/// An economy account.
///
/// `balance` never goes below zero; `credit_score` stays in `300..=850`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    /// Stable id.
    pub id: String,
    /// Balance, `>= 0`.
    pub balance: i64,
    /// Credit score, `300..=850`.
    pub credit_score: i64,
}

impl Account {
    /// Creates an account with a starting balance.
    pub fn new(id: &str, balance: i64) -> Self {
        Self {
            id: id.to_string(),
            balance,
            credit_score: 600,
        }
    }
}

impl Entity for Account {
    fn id(&self) -> EntityId {
        EntityId::from(self.id.as_str())
    }

    fn normalize(&mut self) {
        self.balance = clamp("balance", self.balance, 0, i64::MAX);
        self.credit_score = clamp("creditScore", self.credit_score, 300, 850);
    }
}

/// Progress of a commitment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CommitmentStatus {
    /// Not started.
    Pending,
    /// Started and not yet resolved.
    InProgress,
    /// Kept.
    Done,
    /// Broken.
    Failed,
}

/// A commitment a part made. Owned by the part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Commitment {
    /// Stable id.
    pub id: String,
    /// Owning part.
    pub part_id: String,
    /// What was promised.
    pub title: String,
    /// Progress.
    pub status: CommitmentStatus,
    /// Amount at stake, `>= 0`.
    pub stake: i64,
}

impl Commitment {
    /// Creates a pending commitment.
    pub fn new(id: &str, part_id: &str, title: &str) -> Self {
        Self {
            id: id.to_string(),
            part_id: part_id.to_string(),
            title: title.to_string(),
            status: CommitmentStatus::Pending,
            stake: 0,
        }
    }

    /// Sets the status.
    #[must_use]
    pub fn with_status(mut self, status: CommitmentStatus) -> Self {
        self.status = status;
        self
    }
}

impl Entity for Commitment {
    fn id(&self) -> EntityId {
        EntityId::from(self.id.as_str())
    }

    fn normalize(&mut self) {
        self.stake = clamp("stake", self.stake, 0, i64::MAX);
    }
}

/// State of a battle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BattleState {
    /// Turns are still being played.
    Active,
    /// Over.
    Finished,
}

/// A battle a part fights. Owned by the part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Battle {
    /// Stable id.
    pub id: String,
    /// Fighting part.
    pub part_id: String,
    /// State.
    pub state: BattleState,
    /// Current round.
    pub round: u32,
    /// Hit points, `0..=100`.
    pub hp: i64,
}

impl Battle {
    /// Creates an active battle at round one.
    pub fn new(id: &str, part_id: &str) -> Self {
        Self {
            id: id.to_string(),
            part_id: part_id.to_string(),
            state: BattleState::Active,
            round: 1,
            hp: 100,
        }
    }

    /// Marks the battle finished.
    #[must_use]
    pub fn finished(mut self) -> Self {
        self.state = BattleState::Finished;
        self
    }
}

impl Entity for Battle {
    fn id(&self) -> EntityId {
        EntityId::from(self.id.as_str())
    }

    fn normalize(&mut self) {
        self.hp = clamp("hp", self.hp, 0, 100);
    }
}

/// One line of dialogue, embedded in a [`Conversation`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DialogueLine {
    /// Speaking part.
    pub author_id: String,
    /// Line text.
    pub text: String,
}

/// A conversation between parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// Stable id.
    pub id: String,
    /// Title.
    pub title: String,
    /// Lines, oldest first.
    pub lines: Vec<DialogueLine>,
}

impl Conversation {
    /// Creates a conversation from `(author, text)` pairs.
    pub fn new(id: &str, title: &str, lines: &[(&str, &str)]) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            lines: lines
                .iter()
                .map(|(author, text)| DialogueLine {
                    author_id: (*author).to_string(),
                    text: (*text).to_string(),
                })
                .collect(),
        }
    }
}

impl Entity for Conversation {
    fn id(&self) -> EntityId {
        EntityId::from(self.id.as_str())
    }
}

/// A journal entry that may mention a part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    /// Stable id.
    pub id: String,
    /// Entry text.
    pub text: String,
    /// Mentioned part, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part_id: Option<String>,
}

impl JournalEntry {
    /// Creates an entry.
    pub fn new(id: &str, text: &str, part_id: Option<&str>) -> Self {
        Self {
            id: id.to_string(),
            text: text.to_string(),
            part_id: part_id.map(str::to_string),
        }
    }
}

impl Entity for JournalEntry {
    fn id(&self) -> EntityId {
        EntityId::from(self.id.as_str())
    }
}

/// A named group of parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Circle {
    /// Stable id.
    pub id: String,
    /// Name.
    pub name: String,
    /// Member parts.
    pub member_ids: Vec<String>,
}

impl Circle {
    /// Creates a circle.
    pub fn new(id: &str, name: &str, members: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            member_ids: members.iter().map(|m| (*m).to_string()).collect(),
        }
    }
}

impl Entity for Circle {
    fn id(&self) -> EntityId {
        EntityId::from(self.id.as_str())
    }
}

/// One money movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEvent {
    /// Account moved.
    pub account_id: String,
    /// Signed amount.
    pub amount: i64,
    /// Why.
    pub reason: String,
}

impl LedgerEvent {
    /// Creates an event.
    pub fn new(account_id: &str, amount: i64, reason: &str) -> Self {
        Self {
            account_id: account_id.to_string(),
            amount,
            reason: reason.to_string(),
        }
    }
}

// ============================================================================
// Handles
// ============================================================================

/// Typed handles to every fixture collection and log.
#[derive(Debug, Clone)]
pub struct Household {
    /// Parts.
    pub parts: Collection<Part>,
    /// Accounts.
    pub accounts: Collection<Account>,
    /// Commitments.
    pub commitments: Collection<Commitment>,
    /// Battles.
    pub battles: Collection<Battle>,
    /// Conversations.
    pub conversations: Collection<Conversation>,
    /// Journal entries.
    pub journal: Collection<JournalEntry>,
    /// Circles.
    pub circles: Collection<Circle>,
    /// Ledger.
    pub ledger: Log<LedgerEvent>,
}

impl Household {
    /// Opens every handle on `db`.
    pub fn attach(db: &Database) -> CoreResult<Self> {
        Ok(Self {
            parts: db.collection(PARTS),
            accounts: db.collection(ACCOUNTS),
            commitments: db.collection(COMMITMENTS),
            battles: db.collection(BATTLES),
            conversations: db.collection(CONVERSATIONS),
            journal: db.collection(JOURNAL),
            circles: db.collection(CIRCLES),
            ledger: db.log(LEDGER, LEDGER_MAX)?,
        })
    }

    /// Moves `amount` into an account and records it, in one transaction.
    ///
    /// The balance is read inside the transaction.
    pub fn deposit(&self, db: &Database, account: &str, amount: i64, reason: &str) -> CoreResult<()> {
        db.transaction(|txn| {
            let mut acct = self.accounts.require_in_txn(txn, account)?;
            acct.balance += amount;
            self.accounts.upsert_in_txn(txn, &acct)?;
            self.ledger
                .push_in_txn(txn, &LedgerEvent::new(account, amount, reason))
        })
    }
}

// ============================================================================
// Test databases
// ============================================================================

/// A test database with automatic cleanup.
pub struct TestDatabase {
    /// The database instance. `None` only while reopening.
    db: Option<Database>,
    /// The temporary directory (kept alive to prevent cleanup).
    temp_dir: Option<TempDir>,
}

impl TestDatabase {
    /// Creates a new in-memory test database.
    pub fn memory() -> Self {
        Self {
            db: Some(Database::open_in_memory().expect("Failed to open in-memory database")),
            temp_dir: None,
        }
    }

    /// Creates a new file-based test database.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db = Database::open(temp_dir.path().join("hearth")).expect("Failed to open file database");
        Self {
            db: Some(db),
            temp_dir: Some(temp_dir),
        }
    }

    /// Creates an in-memory database with the standard cascade rules.
    pub fn household() -> Self {
        let test_db = Self::memory();
        test_db.add_cascade_rules(standard_rules());
        test_db
    }

    /// Returns the store directory if file-based, None if in-memory.
    pub fn path(&self) -> Option<PathBuf> {
        self.temp_dir.as_ref().map(|d| d.path().join("hearth"))
    }

    /// Closes and reopens a file-based database, keeping its rules.
    ///
    /// # Panics
    ///
    /// Panics on an in-memory database.
    pub fn reopen(&mut self) {
        let path = self.path().expect("Only file databases can be reopened");
        let rules = self.cascade_rules();
        if let Some(db) = self.db.take() {
            db.close().expect("Failed to close database");
        }
        let db = Database::open(&path).expect("Failed to reopen database");
        for rule in rules {
            db.add_cascade_rule(rule);
        }
        self.db = Some(db);
    }

    /// Returns the database.
    pub fn db(&self) -> &Database {
        self.db.as_ref().expect("Database is being reopened")
    }
}

impl std::ops::Deref for TestDatabase {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        self.db()
    }
}

/// Runs a test with a temporary in-memory database.
///
/// # Example
///
/// ```rust,ignore
/// use hearth_testkit::with_temp_db;
///
/// #[test]
/// fn my_test() {
///     with_temp_db(|db| {
///         let parts = db.collection::<Part>("parts");
///         // ... test operations
///     });
/// }
/// ```
pub fn with_temp_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database) -> R,
{
    let test_db = TestDatabase::memory();
    f(test_db.db())
}

/// Runs a test with a temporary file-based database.
pub fn with_file_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database, &Path) -> R,
{
    let test_db = TestDatabase::file();
    let path = test_db.path().expect("File database should have a path");
    f(test_db.db(), &path)
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// Creates a household database with two parts and records pointing at
    /// them from every dependent collection.
    ///
    /// `p1` ("Critic") owns `c1` (pending), `b1` (finished), is mentioned by
    /// `j1`, is a member of `circle1` and speaks in `conv1` and `conv2`.
    /// `p2` ("Child") owns `c2` (done) and speaks in `conv2`.
    pub fn seeded_household() -> (TestDatabase, Household) {
        let test_db = TestDatabase::household();
        let home = Household::attach(&test_db).expect("Failed to attach handles");

        test_db
            .transaction(|txn| {
                home.parts.upsert_in_txn(txn, &Part::new("p1", "Critic"))?;
                home.parts.upsert_in_txn(txn, &Part::new("p2", "Child"))?;
                home.accounts.upsert_in_txn(txn, &Account::new("a1", 100))?;
                home.commitments
                    .upsert_in_txn(txn, &Commitment::new("c1", "p1", "Walk daily"))?;
                home.commitments.upsert_in_txn(
                    txn,
                    &Commitment::new("c2", "p2", "Draw").with_status(CommitmentStatus::Done),
                )?;
                home.battles
                    .upsert_in_txn(txn, &Battle::new("b1", "p1").finished())?;
                home.journal
                    .upsert_in_txn(txn, &JournalEntry::new("j1", "Talked to the critic", Some("p1")))?;
                home.journal
                    .upsert_in_txn(txn, &JournalEntry::new("j2", "Quiet day", None))?;
                home.circles
                    .upsert_in_txn(txn, &Circle::new("circle1", "Protectors", &["p1", "p2"]))?;
                home.conversations.upsert_in_txn(
                    txn,
                    &Conversation::new("conv1", "Monologue", &[("p1", "Not good enough.")]),
                )?;
                home.conversations.upsert_in_txn(
                    txn,
                    &Conversation::new(
                        "conv2",
                        "Dialogue",
                        &[("p1", "Try harder."), ("p2", "I am trying.")],
                    ),
                )
            })
            .expect("Failed to seed household");

        (test_db, home)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_clamps_ranges() {
        let db = TestDatabase::memory();
        let home = Household::attach(&db).unwrap();

        let mut part = Part::new("p1", "Critic");
        part.energy = 140;
        part.trust = -3;
        home.parts.upsert(&part).unwrap();

        let stored = home.parts.require("p1").unwrap();
        assert_eq!(stored.energy, 100);
        assert_eq!(stored.trust, 0);
    }

    #[test]
    fn deposit_cannot_overdraw() {
        let db = TestDatabase::memory();
        let home = Household::attach(&db).unwrap();
        home.accounts.upsert(&Account::new("a1", 30)).unwrap();

        home.deposit(&db, "a1", -50, "rent").unwrap();

        assert_eq!(home.accounts.require("a1").unwrap().balance, 0);
        assert_eq!(home.ledger.to_vec().unwrap(), vec![LedgerEvent::new("a1", -50, "rent")]);
    }

    #[test]
    fn with_temp_db_runs() {
        let count = with_temp_db(|db| db.collection::<Part>(PARTS).count().unwrap());
        assert_eq!(count, 0);
    }

    #[test]
    fn file_database_reopens() {
        let mut db = TestDatabase::file();
        db.collection::<Part>(PARTS)
            .upsert(&Part::new("p1", "Critic"))
            .unwrap();

        db.reopen();
        assert!(db.collection::<Part>(PARTS).contains("p1").unwrap());
    }

    #[test]
    fn seeded_scenario() {
        let (db, home) = scenarios::seeded_household();
        assert_eq!(home.parts.count().unwrap(), 2);
        assert_eq!(home.conversations.count().unwrap(), 2);
        assert_eq!(db.cascade_rules().len(), standard_rules().len());
    }
}
