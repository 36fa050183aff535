//! Rolling window of live attack events
//!
//! The live set is an immutable `Vec` behind an [`ArcSwap`]. Appends build a
//! new vector (fresh events kept, expired ones dropped, new batch added) and
//! swap it in whole, so readers see either the old set or the new one.

use arc_swap::ArcSwap;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::debug;

use crate::events::AttackEvent;

pub type LiveEvents = Arc<Vec<AttackEvent>>;

pub struct RetentionStore {
    horizon: Duration,
    live: ArcSwap<Vec<AttackEvent>>,
}

impl RetentionStore {
    pub fn new(horizon: Duration) -> Self {
        Self {
            horizon,
            live: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Add `events` and evict everything older than the horizon
    pub fn append(&self, events: &[AttackEvent]) -> usize {
        self.append_at(events, Utc::now())
    }

    /// [`RetentionStore::append`] against an explicit clock reading.
    /// Returns the number of events evicted.
    pub fn append_at(&self, events: &[AttackEvent], now: DateTime<Utc>) -> usize {
        let horizon = self.horizon;
        let mut evicted = 0;

        self.live.rcu(|current| {
            let mut next: Vec<AttackEvent> = current
                .iter()
                .chain(events.iter())
                .filter(|e| e.age(now) <= horizon)
                .cloned()
                .collect();
            next.shrink_to_fit();
            evicted = current.len() + events.len() - next.len();
            next
        });

        if evicted > 0 {
            debug!("Evicted {} expired events", evicted);
        }
        evicted
    }

    /// Current live set. Cheap: shares the published vector.
    pub fn snapshot(&self) -> LiveEvents {
        self.live.load_full()
    }

    pub fn len(&self) -> usize {
        self.live.load().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::fixtures::event;

    fn store() -> RetentionStore {
        RetentionStore::new(Duration::minutes(5))
    }

    #[test]
    fn appended_events_are_visible() {
        let store = store();
        let now = Utc::now();
        let batch: Vec<_> = (0..5).map(|i| event(&format!("e{}", i), "US", now)).collect();

        store.append_at(&batch, now);

        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 5);
        assert_eq!(snapshot.as_slice(), batch.as_slice());
    }

    #[test]
    fn expired_event_evicted_by_empty_append() {
        let store = store();
        let now = Utc::now();
        let old = event("old", "US", now - Duration::minutes(6));

        // still inside the horizon at the time it was appended
        store.append_at(std::slice::from_ref(&old), now - Duration::minutes(2));
        assert_eq!(store.len(), 1);

        let evicted = store.append_at(&[], now);
        assert_eq!(evicted, 1);
        assert!(store.snapshot().iter().all(|e| e.id != "old"));
    }

    #[test]
    fn event_exactly_at_horizon_is_kept() {
        let store = store();
        let now = Utc::now();
        store.append_at(&[event("edge", "US", now - Duration::minutes(5))], now);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn snapshot_is_unaffected_by_later_appends() {
        let store = store();
        let now = Utc::now();
        store.append_at(&[event("a", "US", now)], now);
        let before = store.snapshot();

        store.append_at(&[event("b", "DE", now)], now);

        assert_eq!(before.len(), 1);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn continuous_ticking_stays_bounded() {
        let store = store();
        let start = Utc::now();
        let per_tick = 10;
        let tick = Duration::seconds(10);

        for n in 0..200 {
            let now = start + tick * n;
            let batch: Vec<_> = (0..per_tick)
                .map(|i| event(&format!("{}_{}", n, i), "US", now))
                .collect();
            store.append_at(&batch, now);

            let snapshot = store.snapshot();
            // horizon / tick + the tick that lands exactly on the edge
            assert!(snapshot.len() <= per_tick * (300 / 10 + 1));
            assert!(snapshot.iter().all(|e| now - e.created_at <= Duration::minutes(5)));
        }
    }

    #[test]
    fn concurrent_readers_never_see_torn_batches() {
        let store = Arc::new(store());
        let now = Utc::now();

        let writer = {
            let store = store.clone();
            std::thread::spawn(move || {
                for n in 0..200 {
                    let batch: Vec<_> = (0..4).map(|i| event(&format!("{}_{}", n, i), "US", now)).collect();
                    store.append_at(&batch, now);
                }
            })
        };

        for _ in 0..1000 {
            // batches are appended four at a time and nothing expires
            assert_eq!(store.snapshot().len() % 4, 0);
        }
        writer.join().unwrap();
        assert_eq!(store.len(), 800);
    }
}
