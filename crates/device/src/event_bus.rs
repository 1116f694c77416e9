//! Event bus for device notifications
//!
//! Observers (the simulator shell, loggers, tests) subscribe with a set of filters and
//! receive [`DeviceEvent`]s on their own bounded channel. Broadcasting never blocks the
//! device context: a full subscriber buffer drops the event and a closed one is removed.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use flume::TrySendError;
use tracing::{debug, warn};

use neuro_types::{event_matches_filter, DeviceEvent, EventFilter};

/// Subscriber information for the event bus
#[derive(Debug)]
struct Subscriber {
    sender: flume::Sender<DeviceEvent>,
    filters: Vec<EventFilter>,
    /// Subscriber name for logging
    name: String,
}

/// Fan-out of device notifications to registered observers.
///
/// - Uses RwLock so broadcasts only take a read lock
/// - Uses try_send so a slow observer never stalls the device
/// - Automatically removes subscribers whose receiver was dropped
pub struct EventBus {
    subscribers: RwLock<Vec<Subscriber>>,
    metrics: RwLock<EventBusMetrics>,
}

/// Event bus delivery metrics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventBusMetrics {
    /// Total events broadcast
    pub events_broadcast: u64,
    /// Total events delivered successfully
    pub events_delivered: u64,
    /// Total events dropped due to full buffers
    pub events_dropped: u64,
    /// Number of dead subscribers removed
    pub dead_subscribers_removed: u64,
    /// Current number of active subscribers
    pub active_subscribers: usize,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            metrics: RwLock::new(EventBusMetrics::default()),
        }
    }

    /// Subscribe to events matching any of `filters`.
    ///
    /// An empty filter list receives every event.
    pub fn subscribe(
        &self,
        name: impl Into<String>,
        buffer_size: usize,
        filters: Vec<EventFilter>,
    ) -> flume::Receiver<DeviceEvent> {
        let name = name.into();
        let (sender, receiver) = flume::bounded(buffer_size);

        let active = {
            let mut subscribers = self.write_subscribers();
            subscribers.push(Subscriber {
                sender,
                filters,
                name: name.clone(),
            });
            subscribers.len()
        };
        self.write_metrics().active_subscribers = active;

        debug!(subscriber = %name, buffer_size, "New subscriber registered");
        receiver
    }

    /// Subscribe to all events
    pub fn subscribe_all(
        &self,
        name: impl Into<String>,
        buffer_size: usize,
    ) -> flume::Receiver<DeviceEvent> {
        self.subscribe(name, buffer_size, vec![EventFilter::All])
    }

    /// Deliver an event to every matching subscriber without blocking.
    pub fn broadcast(&self, event: DeviceEvent) {
        let subscribers = self.read_subscribers();
        let mut dead_indices = Vec::new();
        let mut delivered_count = 0;
        let mut dropped_count = 0;

        debug!(
            event_type = event.event_type_name(),
            subscriber_count = subscribers.len(),
            "Broadcasting event"
        );

        for (i, subscriber) in subscribers.iter().enumerate() {
            let wants_event = subscriber.filters.is_empty()
                || subscriber
                    .filters
                    .iter()
                    .any(|filter| event_matches_filter(&event, filter));
            if !wants_event {
                continue;
            }

            // Skip the clone when the buffer is already full
            if subscriber.sender.is_full() {
                warn!(
                    subscriber = %subscriber.name,
                    event_type = event.event_type_name(),
                    "Subscriber buffer full, dropping event"
                );
                dropped_count += 1;
                continue;
            }

            match subscriber.sender.try_send(event.clone()) {
                Ok(()) => delivered_count += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(
                        subscriber = %subscriber.name,
                        event_type = event.event_type_name(),
                        "Subscriber buffer became full during send"
                    );
                    dropped_count += 1;
                }
                Err(TrySendError::Disconnected(_)) => {
                    debug!(subscriber = %subscriber.name, "Subscriber channel closed, marking for removal");
                    dead_indices.push(i);
                }
            }
        }
        drop(subscribers);

        let mut metrics = self.write_metrics();
        if !dead_indices.is_empty() {
            let mut subscribers = self.write_subscribers();
            // Reverse order keeps the remaining indices valid
            for &i in dead_indices.iter().rev() {
                let removed = subscribers.remove(i);
                debug!(subscriber = %removed.name, "Removed dead subscriber");
            }
            metrics.dead_subscribers_removed += dead_indices.len() as u64;
            metrics.active_subscribers = subscribers.len();
        }
        metrics.events_broadcast += 1;
        metrics.events_delivered += delivered_count;
        metrics.events_dropped += dropped_count;
    }

    pub fn metrics(&self) -> EventBusMetrics {
        self.metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn reset_metrics(&self) {
        let active = self.subscriber_count();
        let mut metrics = self.write_metrics();
        *metrics = EventBusMetrics::default();
        metrics.active_subscribers = active;
    }

    pub fn subscriber_count(&self) -> usize {
        self.read_subscribers().len()
    }

    /// Get subscriber names (for debugging)
    pub fn subscriber_names(&self) -> Vec<String> {
        self.read_subscribers()
            .iter()
            .map(|s| s.name.clone())
            .collect()
    }

    fn read_subscribers(&self) -> RwLockReadGuard<'_, Vec<Subscriber>> {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write_subscribers(&self) -> RwLockWriteGuard<'_, Vec<Subscriber>> {
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write_metrics(&self) -> RwLockWriteGuard<'_, EventBusMetrics> {
        self.metrics.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
