// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fan entity for `Appliance.Control.Fan` channels (air purifiers, fans).

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::entity::{Entity, HandlerBindings};
use crate::event::{EntityEvent, EntityState, EventBus};
use crate::types::Channel;

#[derive(Debug)]
struct FanInner {
    speed: Option<u32>,
    /// Reported speed steps; auto-raises when a payload reports a higher
    /// `speed` or `maxSpeed` than currently known.
    speed_count: u32,
    /// Last non-zero speed, restored by hosts turning the fan back on.
    saved_speed: u32,
}

/// One fan channel.
///
/// Payloads look like `{"channel": 0, "speed": 3, "maxSpeed": 4}`; the
/// entity exposes speed as a percentage of the device step count.
#[derive(Debug)]
pub struct FanEntity {
    channel: Channel,
    bus: EventBus,
    inner: Mutex<FanInner>,
    enabled: AtomicBool,
    bindings: HandlerBindings,
}

impl FanEntity {
    /// Creates a fan entity for the given channel.
    #[must_use]
    pub fn new(bus: EventBus, channel: Channel) -> Arc<Self> {
        Self::with_enabled(bus, channel, true)
    }

    /// Creates a fan entity with an explicit enabled-by-default flag.
    #[must_use]
    pub fn with_enabled(bus: EventBus, channel: Channel, enabled_by_default: bool) -> Arc<Self> {
        Arc::new(Self {
            channel,
            bus,
            inner: Mutex::new(FanInner {
                speed: None,
                speed_count: 1,
                saved_speed: 1,
            }),
            enabled: AtomicBool::new(enabled_by_default),
            bindings: HandlerBindings::new(),
        })
    }

    /// Last parsed speed step, if any.
    #[must_use]
    pub fn speed(&self) -> Option<u32> {
        self.inner.lock().speed
    }

    /// Number of speed steps the device reports.
    #[must_use]
    pub fn speed_count(&self) -> u32 {
        self.inner.lock().speed_count
    }

    /// Speed as a percentage of the step count.
    #[must_use]
    pub fn percentage(&self) -> Option<u8> {
        let inner = self.inner.lock();
        inner.speed.map(|speed| percentage(speed, inner.speed_count))
    }

    /// Parses a `fan` channel payload: `{"channel":0,"speed":2,"maxSpeed":4}`.
    pub fn parse_fan(&self, payload: &Map<String, Value>) {
        let Some(speed) = payload
            .get("speed")
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
        else {
            return;
        };
        let max_speed = payload
            .get("maxSpeed")
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok());

        let state = {
            let mut inner = self.inner.lock();
            let speed_count = max_speed.unwrap_or(inner.speed_count).max(speed).max(1);
            if inner.speed == Some(speed) && inner.speed_count == speed_count {
                None
            } else {
                inner.speed = Some(speed);
                inner.speed_count = speed_count;
                if speed > 0 {
                    inner.saved_speed = speed;
                }
                Some(EntityState::Fan {
                    speed,
                    speed_count,
                    percentage: percentage(speed, speed_count),
                })
            }
        };
        if let Some(state) = state {
            self.bus.publish(EntityEvent {
                entity_key: self.entity_key(),
                state,
            });
        }
    }
}

/// Rounds `speed / speed_count` to a whole percentage.
fn percentage(speed: u32, speed_count: u32) -> u8 {
    let count = speed_count.max(1);
    let pct = (speed * 100 + count / 2) / count;
    u8::try_from(pct.min(100)).unwrap_or(100)
}

impl Entity for FanEntity {
    fn channel(&self) -> Channel {
        self.channel
    }

    fn entity_key(&self) -> String {
        format!("{}_fan", self.channel)
    }

    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    fn bindings(&self) -> &HandlerBindings {
        &self.bindings
    }

    fn set_unavailable(&self) {
        self.inner.lock().speed = None;
        self.bus.publish(EntityEvent {
            entity_key: self.entity_key(),
            state: EntityState::Unavailable,
        });
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn channel_payload(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn parse_fan_computes_percentage() {
        let bus = EventBus::new();
        let entity = FanEntity::new(bus, Channel::ZERO);

        entity.parse_fan(&channel_payload(
            json!({"channel": 0, "speed": 2, "maxSpeed": 4}),
        ));

        assert_eq!(entity.speed(), Some(2));
        assert_eq!(entity.speed_count(), 4);
        assert_eq!(entity.percentage(), Some(50));
    }

    #[test]
    fn parse_fan_flushes_on_change_only() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let entity = FanEntity::new(bus, Channel::ZERO);

        entity.parse_fan(&channel_payload(
            json!({"channel": 0, "speed": 3, "maxSpeed": 4}),
        ));
        entity.parse_fan(&channel_payload(
            json!({"channel": 0, "speed": 3, "maxSpeed": 4}),
        ));

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn speed_count_never_below_reported_speed() {
        let bus = EventBus::new();
        let entity = FanEntity::new(bus, Channel::ZERO);

        // No maxSpeed in the payload: the step count grows to fit.
        entity.parse_fan(&channel_payload(json!({"channel": 0, "speed": 3})));
        assert_eq!(entity.speed_count(), 3);
        assert_eq!(entity.percentage(), Some(100));
    }

    #[test]
    fn zero_speed_is_off() {
        let bus = EventBus::new();
        let entity = FanEntity::new(bus, Channel::ZERO);

        entity.parse_fan(&channel_payload(
            json!({"channel": 0, "speed": 0, "maxSpeed": 4}),
        ));
        assert_eq!(entity.percentage(), Some(0));
    }
}
