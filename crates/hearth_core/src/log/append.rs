//! Committed contents of one bounded log.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;

/// An ordered, bounded sequence of immutable events.
///
/// Insertion order is preserved. Once the log holds more than `max_size`
/// events the oldest are evicted by the same call that overflowed it, so
/// the bound is never observably exceeded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppendLog {
    max_size: usize,
    events: VecDeque<Value>,
}

impl AppendLog {
    /// Creates an empty log holding at most `max_size` events.
    ///
    /// A bound of zero is treated as one.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size: max_size.max(1),
            events: VecDeque::new(),
        }
    }

    /// Returns the retention bound.
    #[must_use]
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Appends an event, evicting from the front if over the bound.
    ///
    /// Returns the number of evicted events.
    pub fn push(&mut self, event: Value) -> usize {
        self.events.push_back(event);
        self.trim()
    }

    /// Changes the retention bound, trimming if the log is now too long.
    ///
    /// Returns the number of evicted events.
    pub fn set_max_size(&mut self, max_size: usize) -> usize {
        self.max_size = max_size.max(1);
        self.trim()
    }

    /// Removes every event. The bound is kept.
    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Returns true if an equal event is present.
    #[must_use]
    pub fn contains(&self, event: &Value) -> bool {
        self.events.contains(event)
    }

    /// Iterates over events oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.events.iter()
    }

    /// Returns a copy of the events oldest first.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Value> {
        self.events.iter().cloned().collect()
    }

    /// Returns the number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns true if the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    fn trim(&mut self) -> usize {
        let excess = self.events.len().saturating_sub(self.max_size);
        self.events.drain(..excess);
        excess
    }
}

/// Returns the newest `max_size` events of `base` followed by `appended`.
///
/// This is what a log with bound `max_size` holds after pushing each of
/// `appended` in order.
pub(crate) fn bounded_view<'a>(
    base: impl Iterator<Item = &'a Value>,
    appended: &'a [Value],
    max_size: usize,
) -> Vec<Value> {
    let mut view: VecDeque<Value> = base.chain(appended.iter()).cloned().collect();
    let excess = view.len().saturating_sub(max_size.max(1));
    view.drain(..excess);
    view.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keeps_newest_events() {
        let mut log = AppendLog::new(3);
        let mut evicted = 0;
        for i in 1..=5 {
            evicted += log.push(json!(format!("e{i}")));
        }

        assert_eq!(log.to_vec(), vec![json!("e3"), json!("e4"), json!("e5")]);
        assert_eq!(evicted, 2);
    }

    #[test]
    fn shrinking_bound_trims_front() {
        let mut log = AppendLog::new(10);
        for i in 0..6 {
            log.push(json!(i));
        }
        assert_eq!(log.set_max_size(2), 4);
        assert_eq!(log.to_vec(), vec![json!(4), json!(5)]);
    }

    #[test]
    fn zero_bound_is_one() {
        let mut log = AppendLog::new(0);
        log.push(json!(1));
        log.push(json!(2));
        assert_eq!(log.to_vec(), vec![json!(2)]);
    }

    #[test]
    fn view_matches_sequential_pushes() {
        let mut log = AppendLog::new(4);
        log.push(json!("a"));
        log.push(json!("b"));

        let appended = vec![json!("c"), json!("d"), json!("e")];
        let view = bounded_view(log.iter(), &appended, 4);

        for event in appended {
            log.push(event);
        }
        assert_eq!(view, log.to_vec());
    }
}
