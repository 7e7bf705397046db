//! Change notification for committed transactions.
//!
//! Observers subscribe to a [`Topic`] (a collection or a log) and receive
//! one [`Notification`] per commit that touched it, carrying the full
//! post-commit snapshot of that topic. Rounds are delivered after the
//! commit has been applied and with no store lock held, so an observer
//! may read the store or start its own transaction.
//!
//! Commits queue their rounds in sequence order and a single caller at a
//! time drains the queue. A commit made from inside an observer (or on
//! another thread while a drain is running) is delivered after the round
//! being delivered, so the last snapshot every observer sees is the
//! latest committed one.
//!
//! # Usage
//!
//! ```rust,ignore
//! let parts = db.collection::<Part>("parts");
//!
//! let sub = parts.observe(|all: Vec<Part>| {
//!     println!("{} parts", all.len());
//! });
//!
//! // Three upserts, one notification.
//! db.transaction(|txn| {
//!     parts.upsert_in_txn(txn, &a)?;
//!     parts.upsert_in_txn(txn, &b)?;
//!     parts.upsert_in_txn(txn, &c)
//! })?;
//!
//! sub.unsubscribe();
//! ```

use crate::entity::Document;
use crate::types::SequenceNumber;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Something that can be observed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Topic {
    /// A named collection.
    Collection(String),
    /// A named log.
    Log(String),
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Collection(name) => write!(f, "collection:{name}"),
            Self::Log(name) => write!(f, "log:{name}"),
        }
    }
}

/// Full contents of a topic after a commit.
#[derive(Debug, Clone, PartialEq)]
pub enum TopicSnapshot {
    /// Every document in the collection, in id order.
    Collection(Vec<Document>),
    /// Every event in the log, oldest first.
    Log(Vec<Value>),
}

/// One delivery to the observers of a topic.
#[derive(Debug, Clone)]
pub struct Notification {
    /// The topic that changed.
    pub topic: Topic,
    /// Sequence number of the commit that changed it.
    pub sequence: SequenceNumber,
    /// Post-commit contents of the topic.
    pub snapshot: TopicSnapshot,
}

type Callback = Arc<dyn Fn(&Notification) + Send + Sync>;

struct Subscriber {
    id: u64,
    topic: Topic,
    callback: Callback,
}

#[derive(Default)]
struct DeliveryQueue {
    rounds: VecDeque<Vec<Notification>>,
    draining: bool,
}

/// Registry of observers.
pub struct ChangeNotifier {
    /// Subscribers in registration order.
    subscribers: RwLock<Vec<Subscriber>>,
    /// Rounds waiting for delivery, oldest commit first.
    queue: Mutex<DeliveryQueue>,
    next_id: AtomicU64,
}

impl ChangeNotifier {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            queue: Mutex::new(DeliveryQueue::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers `callback` for `topic`.
    ///
    /// The subscription stays registered until
    /// [`Subscription::unsubscribe`] is called or the notifier is cleared;
    /// dropping the handle does not unsubscribe.
    pub fn subscribe<F>(self: &Arc<Self>, topic: Topic, callback: F) -> Subscription
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(subscription = id, %topic, "observer registered");
        self.subscribers.write().push(Subscriber {
            id,
            topic: topic.clone(),
            callback: Arc::new(callback),
        });
        Subscription {
            id,
            topic,
            notifier: Arc::downgrade(self),
        }
    }

    /// Returns true if anyone observes `topic`.
    #[must_use]
    pub fn has_subscribers(&self, topic: &Topic) -> bool {
        self.subscribers.read().iter().any(|s| &s.topic == topic)
    }

    /// Queues `round` and delivers everything pending.
    ///
    /// Each notification goes to the observers of its topic in
    /// registration order. A panicking observer is logged and skipped.
    pub fn deliver(&self, round: &[Notification]) {
        self.enqueue(round.to_vec());
        self.drain();
    }

    /// Queues a round without delivering it.
    ///
    /// The store calls this under its write lock so rounds queue in
    /// commit order.
    pub(crate) fn enqueue(&self, round: Vec<Notification>) {
        if !round.is_empty() {
            self.queue.lock().rounds.push_back(round);
        }
    }

    /// Delivers queued rounds until the queue is empty.
    ///
    /// Returns at once if another call is already draining; that call
    /// picks up whatever was queued here.
    pub(crate) fn drain(&self) {
        {
            let mut queue = self.queue.lock();
            if queue.draining {
                return;
            }
            queue.draining = true;
        }

        loop {
            let round = {
                let mut queue = self.queue.lock();
                match queue.rounds.pop_front() {
                    Some(round) => round,
                    None => {
                        queue.draining = false;
                        return;
                    }
                }
            };
            self.deliver_round(&round);
        }
    }

    fn deliver_round(&self, round: &[Notification]) {
        for notification in round {
            let callbacks: Vec<(u64, Callback)> = self
                .subscribers
                .read()
                .iter()
                .filter(|s| s.topic == notification.topic)
                .map(|s| (s.id, Arc::clone(&s.callback)))
                .collect();

            for (id, callback) in callbacks {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback(notification)));
                if outcome.is_err() {
                    tracing::error!(
                        subscription = id,
                        topic = %notification.topic,
                        sequence = %notification.sequence,
                        "observer panicked"
                    );
                }
            }
        }
    }

    /// Removes a subscription. Returns true if it was registered.
    pub fn unsubscribe(&self, id: u64) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        subscribers.len() != before
    }

    /// Returns the number of registered subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Removes every subscription and drops undelivered rounds.
    pub fn clear(&self) {
        self.subscribers.write().clear();
        self.queue.lock().rounds.clear();
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ChangeNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Handle to a registered observer.
#[must_use = "an unused Subscription can never be unsubscribed"]
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    topic: Topic,
    notifier: Weak<ChangeNotifier>,
}

impl Subscription {
    /// Returns the subscription id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns the observed topic.
    #[must_use]
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Stops delivery to this observer.
    ///
    /// Returns false if it was already gone (store closed or reset of the
    /// registry).
    pub fn unsubscribe(self) -> bool {
        match self.notifier.upgrade() {
            Some(notifier) => notifier.unsubscribe(self.id),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn round(topic: Topic, seq: u64) -> Vec<Notification> {
        vec![Notification {
            topic,
            sequence: SequenceNumber::new(seq),
            snapshot: TopicSnapshot::Log(Vec::new()),
        }]
    }

    #[test]
    fn delivers_in_registration_order() {
        let notifier = Arc::new(ChangeNotifier::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let mut subs = Vec::new();
        for tag in ["first", "second", "third"] {
            let seen = Arc::clone(&seen);
            subs.push(
                notifier.subscribe(Topic::Collection("parts".into()), move |_| {
                    seen.lock().push(tag);
                }),
            );
        }

        notifier.deliver(&round(Topic::Collection("parts".into()), 1));
        assert_eq!(*seen.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn only_matching_topic_fires() {
        let notifier = Arc::new(ChangeNotifier::new());
        let hits = Arc::new(AtomicU64::new(0));

        let h = Arc::clone(&hits);
        let _sub = notifier.subscribe(Topic::Log("ledger".into()), move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        notifier.deliver(&round(Topic::Collection("ledger".into()), 1));
        notifier.deliver(&round(Topic::Log("ledger".into()), 2));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let notifier = Arc::new(ChangeNotifier::new());
        let hits = Arc::new(AtomicU64::new(0));

        let h = Arc::clone(&hits);
        let sub = notifier.subscribe(Topic::Log("l".into()), move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        assert!(notifier.has_subscribers(&Topic::Log("l".into())));
        assert!(sub.unsubscribe());
        notifier.deliver(&round(Topic::Log("l".into()), 1));

        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(notifier.subscriber_count(), 0);
    }

    #[test]
    fn dropping_handle_keeps_subscription() {
        let notifier = Arc::new(ChangeNotifier::new());
        drop(notifier.subscribe(Topic::Log("l".into()), |_| {}));
        assert_eq!(notifier.subscriber_count(), 1);
    }

    #[test]
    fn round_queued_by_an_observer_waits_for_the_current_one() {
        let notifier = Arc::new(ChangeNotifier::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let inner = Arc::downgrade(&notifier);
        let _writer = notifier.subscribe(Topic::Log("l".into()), move |n| {
            if n.sequence == SequenceNumber::new(1) {
                if let Some(notifier) = inner.upgrade() {
                    notifier.deliver(&round(Topic::Log("l".into()), 2));
                }
            }
        });
        let s = Arc::clone(&seen);
        let _recorder = notifier.subscribe(Topic::Log("l".into()), move |n| {
            s.lock().push(n.sequence.as_u64());
        });

        notifier.deliver(&round(Topic::Log("l".into()), 1));
        assert_eq!(*seen.lock(), vec![1, 2]);
    }

    #[test]
    fn clear_drops_undelivered_rounds() {
        let notifier = Arc::new(ChangeNotifier::new());
        notifier.enqueue(round(Topic::Log("l".into()), 1));
        notifier.clear();

        let hits = Arc::new(AtomicU64::new(0));
        let h = Arc::clone(&hits);
        let _sub = notifier.subscribe(Topic::Log("l".into()), move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        notifier.drain();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn panicking_observer_does_not_starve_others() {
        let notifier = Arc::new(ChangeNotifier::new());
        let hits = Arc::new(AtomicU64::new(0));

        let _bad = notifier.subscribe(Topic::Log("l".into()), |_| panic!("observer bug"));
        let h = Arc::clone(&hits);
        let _good = notifier.subscribe(Topic::Log("l".into()), move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        notifier.deliver(&round(Topic::Log("l".into()), 1));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
