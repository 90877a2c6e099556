//! EventBus for phase transition events.
//!
//! Broadcast-based fan-out with sequence numbering. Publishing never blocks
//! and never fails: lagging or absent subscribers only lose events.

use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

use crate::domain::models::{SequenceNumber, TransitionEvent};
use crate::domain::ports::Broadcaster;

/// Configuration for the EventBus.
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Channel capacity for the broadcast channel.
    pub channel_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self { channel_capacity: 1024 }
    }
}

/// Central event bus for broadcasting transitions to multiple consumers.
pub struct EventBus {
    sender: broadcast::Sender<TransitionEvent>,
    sequence: AtomicU64,
}

impl EventBus {
    pub fn new(config: EventBusConfig) -> Self {
        let (sender, _) = broadcast::channel(config.channel_capacity.max(1));
        Self { sender, sequence: AtomicU64::new(0) }
    }

    /// Subscribe to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<TransitionEvent> {
        self.sender.subscribe()
    }

    /// Get the current sequence number.
    pub fn current_sequence(&self) -> SequenceNumber {
        SequenceNumber(self.sequence.load(Ordering::SeqCst))
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EventBusConfig::default())
    }
}

impl Broadcaster for EventBus {
    fn publish(&self, mut event: TransitionEvent) {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        event.sequence = SequenceNumber(seq);

        tracing::debug!(
            sequence = seq,
            parent_target = %event.parent_target,
            phase = %event.phase,
            from = %event.from,
            to = %event.to,
            "Publishing transition"
        );

        // No subscribers is not an error.
        let _ = self.sender.send(event);
    }
}
