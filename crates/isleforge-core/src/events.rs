//! Progression events and the broadcast bus that carries them.
//!
//! Every successful transition publishes one [`ProgressionEvent`]. Delivery
//! is best effort: with no subscriber the event is dropped, and a
//! subscriber that falls more than [`EVENT_BUS_CAPACITY`] events behind
//! receives `Lagged` and skips ahead.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::broadcast;

use isleforge_types::{ParcelId, PlayerId, TierId};

/// Capacity of the progression event channel.
pub const EVENT_BUS_CAPACITY: usize = 256;

/// How a tier became unlocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockSource {
    /// The parcel level crossed the tier's minimum.
    Automatic,
    /// A player unlocked a free tier.
    Explicit,
    /// An administrator granted it.
    Granted,
}

/// Why a tier stopped being active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeactivationReason {
    /// A player or administrator asked for it.
    Requested,
    /// The parcel's slot limit dropped below its active count.
    SlotLimitShrunk,
}

/// What happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressionEventKind {
    /// The tier was unlocked without payment.
    Unlocked {
        /// How.
        source: UnlockSource,
    },
    /// The tier was bought.
    Purchased {
        /// Amount charged.
        cost: Decimal,
    },
    /// The tier was activated.
    Activated {
        /// Amount charged (zero when bypassed or free).
        cost: Decimal,
        /// Whether the guards were bypassed.
        bypassed: bool,
    },
    /// The tier was deactivated.
    Deactivated {
        /// Why.
        reason: DeactivationReason,
    },
}

/// A progression transition that took effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressionEvent {
    /// The parcel whose record changed.
    pub parcel: ParcelId,
    /// The player who acted, if any.
    pub player: Option<PlayerId>,
    /// The tier concerned.
    pub tier: TierId,
    /// What happened.
    pub kind: ProgressionEventKind,
    /// When.
    pub at: DateTime<Utc>,
}

impl ProgressionEvent {
    /// An event stamped now.
    pub fn new(
        parcel: ParcelId,
        player: Option<PlayerId>,
        tier: TierId,
        kind: ProgressionEventKind,
    ) -> Self {
        Self {
            parcel,
            player,
            tier,
            kind,
            at: Utc::now(),
        }
    }
}

/// Broadcast channel for [`ProgressionEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ProgressionEvent>,
}

impl EventBus {
    /// A bus with [`EVENT_BUS_CAPACITY`] slots.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self { tx }
    }

    /// Subscribe to every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressionEvent> {
        self.tx.subscribe()
    }

    /// Publish `event`. Returns the number of subscribers that received it;
    /// zero subscribers is not an error.
    pub fn publish(&self, event: ProgressionEvent) -> usize {
        tracing::debug!(
            parcel = %event.parcel,
            tier = %event.tier,
            kind = ?event.kind,
            "Progression event"
        );
        self.tx.send(event).unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_without_subscribers_is_fine() {
        let bus = EventBus::new();
        let event = ProgressionEvent::new(
            ParcelId::new(),
            None,
            TierId::new("basic"),
            ProgressionEventKind::Unlocked {
                source: UnlockSource::Granted,
            },
        );
        assert_eq!(bus.publish(event), 0);
    }

    #[test]
    fn subscriber_receives_events_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let parcel = ParcelId::new();
        for id in ["a", "b"] {
            bus.publish(ProgressionEvent::new(
                parcel,
                None,
                TierId::new(id),
                ProgressionEventKind::Deactivated {
                    reason: DeactivationReason::Requested,
                },
            ));
        }
        assert_eq!(rx.try_recv().ok().map(|e| e.tier), Some(TierId::new("a")));
        assert_eq!(rx.try_recv().ok().map(|e| e.tier), Some(TierId::new("b")));
        assert!(rx.try_recv().is_err());
    }
}
