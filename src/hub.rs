//! Broadcast hub: drives generation and fans updates out to subscribers
//!
//! One timer-driven writer path (synthesize, append, record, push) and any
//! number of readers. Synthesis happens without holding any lock. The commit
//! and push phase runs under `publish_guard`, which is also taken by joins
//! and refreshes so a subscriber never sees a snapshot that skips or repeats
//! a delta. Plain reads of the live set or stats never lock.

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::Stream;
use serde::Serialize;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::events::AttackEvent;
use crate::stats::{AggregateStats, StatsAggregator};
use crate::store::{LiveEvents, RetentionStore};
use crate::synthesizer::{SynthesisError, Synthesizer};

pub type SubscriberId = u64;

type Outbox = mpsc::Sender<Arc<HubMessage>>;

/// Anything that can produce a batch of events for a tick
#[async_trait]
pub trait BatchSource: Send + Sync {
    async fn next_batch(&self) -> Result<Vec<AttackEvent>, SynthesisError>;
}

#[async_trait]
impl BatchSource for Synthesizer {
    async fn next_batch(&self) -> Result<Vec<AttackEvent>, SynthesisError> {
        self.synthesize_batch().await
    }
}

#[derive(Debug, Error)]
pub enum HubError {
    #[error("unknown subscriber {0}")]
    UnknownSubscriber(SubscriberId),
    #[error("subscriber {0} could not take the message and was dropped")]
    Delivery(SubscriberId),
}

/// Live events and cumulative stats read at the same instant
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveState {
    #[serde(rename = "attacks")]
    pub live_events: LiveEvents,
    pub stats: Arc<AggregateStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum HubMessage {
    /// Sent once when a subscriber joins
    #[serde(rename = "initial_attacks")]
    Joined(LiveState),
    #[serde(rename = "new_attacks")]
    NewEvents(LiveEvents),
    #[serde(rename = "attack_stats")]
    Stats(Arc<AggregateStats>),
    /// Reply to an explicit refresh request
    #[serde(rename = "snapshot")]
    Refresh(LiveState),
}

impl HubMessage {
    pub fn event_name(&self) -> &'static str {
        match self {
            HubMessage::Joined(_) => "initial_attacks",
            HubMessage::NewEvents(_) => "new_attacks",
            HubMessage::Stats(_) => "attack_stats",
            HubMessage::Refresh(_) => "snapshot",
        }
    }

    /// Payload without the event envelope
    pub fn data_json(&self) -> serde_json::Result<String> {
        match self {
            HubMessage::Joined(state) | HubMessage::Refresh(state) => serde_json::to_string(state),
            HubMessage::NewEvents(events) => serde_json::to_string(events),
            HubMessage::Stats(stats) => serde_json::to_string(stats),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubState {
    /// Nobody listening; generation still runs
    Idle,
    Active,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub generated: usize,
    pub evicted: usize,
    pub live: usize,
    pub delivered: usize,
}

pub struct BroadcastHub {
    source: Arc<dyn BatchSource>,
    store: RetentionStore,
    stats: StatsAggregator,
    subscribers: DashMap<SubscriberId, Outbox>,
    next_id: AtomicU64,
    buffer: usize,
    tick_guard: Mutex<()>,
    publish_guard: Mutex<()>,
}

impl BroadcastHub {
    pub fn new(source: Arc<dyn BatchSource>, horizon: chrono::Duration, buffer: usize) -> Self {
        Self {
            source,
            store: RetentionStore::new(horizon),
            stats: StatsAggregator::new(),
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(0),
            buffer: buffer.max(1),
            tick_guard: Mutex::new(()),
            publish_guard: Mutex::new(()),
        }
    }

    /// Spawn the generation loop. The first tick fires immediately.
    pub fn start(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let hub = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!("Generating attacks every {:?}", period);

            loop {
                interval.tick().await;
                hub.on_tick().await;
            }
        })
    }

    /// Run one generation cycle. Returns `None` when the cycle was skipped
    /// (another tick in flight) or abandoned (synthesis failed).
    pub async fn on_tick(&self) -> Option<TickReport> {
        let Ok(_tick) = self.tick_guard.try_lock() else {
            warn!("Previous tick still running, skipping this one");
            return None;
        };

        let batch = match self.source.next_batch().await {
            Ok(batch) => Arc::new(batch),
            Err(e) => {
                error!("Failed to generate attacks: {}", e);
                return None;
            }
        };

        let _publish = self.publish_guard.lock().await;
        let evicted = self.store.append(&batch);
        self.stats.record_all(&batch);

        let generated = batch.len();
        let delivered = self.broadcast(HubMessage::NewEvents(batch));
        self.broadcast(HubMessage::Stats(self.stats.snapshot()));

        let live = self.store.len();
        info!("Generated {} new attacks. Total active: {}", generated, live);

        Some(TickReport {
            generated,
            evicted,
            live,
            delivered,
        })
    }

    /// Register a subscriber. Its first message is the join snapshot.
    pub async fn subscribe(self: &Arc<Self>) -> Subscription {
        let _publish = self.publish_guard.lock().await;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::channel(self.buffer);
        let joined = HubMessage::Joined(self.read_state());
        // fresh channel with capacity >= 1, the snapshot always fits
        let _ = tx.try_send(Arc::new(joined));

        self.subscribers.insert(id, tx);
        info!("Subscriber {} connected ({} total)", id, self.subscribers.len());
        if self.subscribers.len() == 1 {
            info!("Hub active");
        }

        Subscription {
            id,
            rx,
            hub: self.clone(),
        }
    }

    /// Stop pushing to `id`. Returns whether it was registered.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        if self.subscribers.remove(&id).is_none() {
            return false;
        }
        info!("Subscriber {} disconnected", id);
        if self.subscribers.is_empty() {
            info!("Hub idle");
        }
        true
    }

    /// Push the current live set and stats to one subscriber, outside the tick cadence
    pub async fn refresh(&self, id: SubscriberId) -> Result<(), HubError> {
        let _publish = self.publish_guard.lock().await;

        let outbox = self
            .subscribers
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(HubError::UnknownSubscriber(id))?;

        let message = Arc::new(HubMessage::Refresh(self.read_state()));
        if outbox.try_send(message).is_err() {
            self.unsubscribe(id);
            return Err(HubError::Delivery(id));
        }
        debug!("Refreshed subscriber {}", id);
        Ok(())
    }

    /// Live events and stats from the same instant
    pub async fn current_state(&self) -> LiveState {
        let _publish = self.publish_guard.lock().await;
        self.read_state()
    }

    pub fn live_events(&self) -> LiveEvents {
        self.store.snapshot()
    }

    pub fn stats(&self) -> Arc<AggregateStats> {
        self.stats.snapshot()
    }

    pub fn state(&self) -> HubState {
        if self.subscribers.is_empty() {
            HubState::Idle
        } else {
            HubState::Active
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Caller must hold `publish_guard`
    fn read_state(&self) -> LiveState {
        LiveState {
            live_events: self.store.snapshot(),
            stats: self.stats.snapshot(),
        }
    }

    /// Queue `message` for every subscriber without waiting on any of them.
    /// Subscribers that are gone or too far behind are dropped.
    fn broadcast(&self, message: HubMessage) -> usize {
        let message = Arc::new(message);
        let mut delivered = 0;
        let mut failed = Vec::new();

        for entry in self.subscribers.iter() {
            match entry.value().try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!("Subscriber {} is not keeping up, dropping it", entry.key());
                    failed.push(*entry.key());
                }
                Err(TrySendError::Closed(_)) => failed.push(*entry.key()),
            }
        }

        for id in failed {
            self.unsubscribe(id);
        }
        delivered
    }
}

/// A registered subscriber's inbox. Dropping it unsubscribes.
pub struct Subscription {
    id: SubscriberId,
    rx: mpsc::Receiver<Arc<HubMessage>>,
    hub: Arc<BroadcastHub>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next message, or `None` once the hub has dropped this subscriber
    pub async fn recv(&mut self) -> Option<Arc<HubMessage>> {
        self.rx.recv().await
    }
}

impl Stream for Subscription {
    type Item = Arc<HubMessage>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.unsubscribe(self.id);
    }
}
