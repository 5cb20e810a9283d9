// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Event bus carrying entity state flushes to the host platform.
//!
//! Entities republish their state through this bus whenever a parsed
//! payload changes it; the host subscribes and mirrors the snapshots into
//! its own entity model.

use serde_json::Value;
use tokio::sync::broadcast;

use crate::types::OnOff;

/// Default channel capacity for the event bus.
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Snapshot of one entity's state at flush time.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityState {
    /// A relay/toggle channel.
    Toggle {
        /// Current switch position.
        onoff: OnOff,
    },

    /// A fan channel.
    Fan {
        /// Current discrete speed step.
        speed: u32,
        /// Number of speed steps the device reports.
        speed_count: u32,
        /// Speed as a percentage of `speed_count`.
        percentage: u8,
    },

    /// A scalar measurement (sensors, diagnostic values).
    Measurement {
        /// The raw reported value.
        value: Value,
    },

    /// The entity's source went offline.
    Unavailable,
}

/// One entity state flush.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityEvent {
    /// Registry key of the flushing entity.
    pub entity_key: String,
    /// The flushed state snapshot.
    pub state: EntityState,
}

/// Broadcast bus for entity state flushes.
///
/// Uses tokio's broadcast channel so multiple subscribers each receive
/// every event. Slow subscribers may lose events once the channel fills
/// (they observe `RecvError::Lagged`).
///
/// # Examples
///
/// ```
/// use meross_lib::event::{EntityEvent, EntityState, EventBus};
/// use meross_lib::types::OnOff;
///
/// let bus = EventBus::new();
/// let mut rx = bus.subscribe();
///
/// bus.publish(EntityEvent {
///     entity_key: "0".to_string(),
///     state: EntityState::Toggle { onoff: OnOff::On },
/// });
/// ```
#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<EntityEvent>,
}

impl EventBus {
    /// Creates a new event bus with default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Creates a new event bus with the specified capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribes to entity state flushes.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EntityEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Publishes a state flush to all subscribers.
    ///
    /// If there are no subscribers, the event is silently discarded.
    pub fn publish(&self, event: EntityEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(EntityEvent {
            entity_key: "2_speed".to_string(),
            state: EntityState::Fan {
                speed: 2,
                speed_count: 4,
                percentage: 50,
            },
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.entity_key, "2_speed");
        assert_eq!(
            event.state,
            EntityState::Fan {
                speed: 2,
                speed_count: 4,
                percentage: 50
            }
        );
    }

    #[test]
    fn publish_without_subscribers_is_noop() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);
        bus.publish(EntityEvent {
            entity_key: "0".to_string(),
            state: EntityState::Unavailable,
        });
    }
}
