//! # Debounce Queue
//!
//! Keyed delay queue backing debounced delivery.
//!
//! A payload enqueued for a key is held for one quiet window. Another
//! payload for the same key before the window closes replaces it and
//! restarts the window, so a burst collapses into a single delivery of
//! its last payload. Nothing here owns a timer: callers pass `now` in and
//! sleep until [`DebounceQueue::next_deadline`] themselves.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use super::subscription::SubscriptionKey;

#[derive(Debug)]
struct Pending<P> {
    payload: P,
    deadline: Instant,
}

/// Per-key debounce queue
#[derive(Debug)]
pub struct DebounceQueue<P> {
    window: Duration,
    pending: HashMap<SubscriptionKey, Pending<P>>,
}

impl<P> DebounceQueue<P> {
    /// Create a queue with the given quiet window
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
        }
    }

    /// Quiet window length
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Schedule `payload` for `key`
    ///
    /// Returns `true` when a pending payload for the same key was
    /// superseded.
    pub fn enqueue(&mut self, key: SubscriptionKey, payload: P, now: Instant) -> bool {
        let deadline = now + self.window;
        self.pending
            .insert(key, Pending { payload, deadline })
            .is_some()
    }

    /// Earliest pending deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.deadline).min()
    }

    /// Remove and return every entry due at `now`, earliest first
    pub fn drain_due(&mut self, now: Instant) -> Vec<(SubscriptionKey, P)> {
        let due: Vec<SubscriptionKey> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(k, _)| k.clone())
            .collect();

        let mut drained: Vec<(Instant, SubscriptionKey, P)> = due
            .into_iter()
            .filter_map(|key| {
                self.pending
                    .remove(&key)
                    .map(|p| (p.deadline, key, p.payload))
            })
            .collect();

        drained.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        drained.into_iter().map(|(_, k, p)| (k, p)).collect()
    }

    /// Drop all pending entries without delivering them
    pub fn clear(&mut self) -> usize {
        let cancelled = self.pending.len();
        self.pending.clear();
        cancelled
    }

    /// Whether a delivery is pending for `key`
    pub fn is_pending(&self, key: &SubscriptionKey) -> bool {
        self.pending.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn key(s: &str) -> SubscriptionKey {
        SubscriptionKey::new(s)
    }

    #[test]
    fn test_burst_collapses_to_last_payload() {
        let t0 = Instant::now();
        let mut queue = DebounceQueue::new(ms(500));

        assert!(!queue.enqueue(key("k"), 1, t0));
        assert!(queue.enqueue(key("k"), 2, t0 + ms(100)));
        assert!(queue.enqueue(key("k"), 3, t0 + ms(450)));
        assert_eq!(queue.len(), 1);

        // Window restarts on each event
        assert!(queue.drain_due(t0 + ms(900)).is_empty());

        let delivered = queue.drain_due(t0 + ms(950));
        assert_eq!(delivered, vec![(key("k"), 3)]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_events_further_apart_than_window_deliver_separately() {
        let t0 = Instant::now();
        let mut queue = DebounceQueue::new(ms(500));

        queue.enqueue(key("k"), "first", t0);
        assert_eq!(queue.drain_due(t0 + ms(500)), vec![(key("k"), "first")]);

        queue.enqueue(key("k"), "second", t0 + ms(600));
        assert_eq!(queue.drain_due(t0 + ms(1100)), vec![(key("k"), "second")]);
    }

    #[test]
    fn test_two_events_within_window_deliver_once_at_extended_deadline() {
        let t0 = Instant::now();
        let mut queue = DebounceQueue::new(ms(500));

        queue.enqueue(key("workouts-INSERT-all-0"), "t0", t0);
        queue.enqueue(key("workouts-INSERT-all-0"), "t300", t0 + ms(300));

        assert_eq!(queue.next_deadline(), Some(t0 + ms(800)));
        assert!(queue.drain_due(t0 + ms(799)).is_empty());
        assert_eq!(
            queue.drain_due(t0 + ms(800)),
            vec![(key("workouts-INSERT-all-0"), "t300")]
        );
        assert!(queue.drain_due(t0 + ms(2000)).is_empty());
    }

    #[test]
    fn test_keys_are_independent_and_drained_in_deadline_order() {
        let t0 = Instant::now();
        let mut queue = DebounceQueue::new(ms(100));

        queue.enqueue(key("b"), 2, t0 + ms(10));
        queue.enqueue(key("a"), 1, t0 + ms(20));
        queue.enqueue(key("c"), 3, t0 + ms(500));

        let delivered = queue.drain_due(t0 + ms(200));
        assert_eq!(delivered, vec![(key("b"), 2), (key("a"), 1)]);
        assert!(queue.is_pending(&key("c")));
    }

    #[test]
    fn test_clear_cancels_everything() {
        let t0 = Instant::now();
        let mut queue = DebounceQueue::new(ms(100));

        queue.enqueue(key("a"), 1, t0);
        queue.enqueue(key("b"), 2, t0);

        assert_eq!(queue.clear(), 2);
        assert_eq!(queue.next_deadline(), None);
        assert!(queue.drain_due(t0 + ms(1000)).is_empty());
    }
}
