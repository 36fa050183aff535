//! Cumulative attack statistics
//!
//! Counters cover every event ever generated and never go down. Unlike the
//! live store nothing is evicted, so the per-country and per-type maps grow
//! with the number of distinct keys seen.

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::events::AttackEvent;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateStats {
    #[serde(rename = "totalAttacks")]
    pub total_events: u64,
    #[serde(rename = "attacksToday", alias = "numberOfAttacksToday")]
    pub events_in_current_period: u64,
    #[serde(rename = "mostTargetedCountries")]
    pub count_by_country: BTreeMap<String, u64>,
    #[serde(rename = "attackTypes")]
    pub count_by_type: BTreeMap<String, u64>,
}

impl AggregateStats {
    fn add(&mut self, event: &AttackEvent) {
        self.total_events += 1;
        self.events_in_current_period += 1;
        *self
            .count_by_country
            .entry(event.target_location.country.clone())
            .or_default() += 1;
        *self
            .count_by_type
            .entry(event.attack_type.to_string())
            .or_default() += 1;
    }
}

pub struct StatsAggregator {
    current: ArcSwap<AggregateStats>,
}

impl Default for StatsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(AggregateStats::default()),
        }
    }

    #[cfg(test)]
    pub fn record(&self, event: &AttackEvent) {
        self.record_all(std::slice::from_ref(event));
    }

    /// Record a whole batch and publish the result as one update
    pub fn record_all(&self, events: &[AttackEvent]) {
        if events.is_empty() {
            return;
        }
        self.current.rcu(|current| {
            let mut next = AggregateStats::clone(current);
            for event in events {
                next.add(event);
            }
            next
        });
    }

    pub fn snapshot(&self) -> Arc<AggregateStats> {
        self.current.load_full()
    }
}
