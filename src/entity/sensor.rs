// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Diagnostic read-only sensors.
//!
//! These entities are created by the unknown-namespace expansion path: each
//! leaf scalar of an unrecognized payload becomes one sensor, updated in
//! place on every subsequent message.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde_json::Value;

use crate::entity::{Entity, HandlerBindings};
use crate::event::{EntityEvent, EntityState, EventBus};
use crate::types::Channel;

/// Read-only sensor mirroring one flattened scalar of an unmanaged
/// namespace payload.
///
/// Keyed `{channel}_{flattenedKey}`, or just `{flattenedKey}` for payloads
/// without a channel. Created disabled on the host side: diagnostic values
/// are opt-in.
#[derive(Debug)]
pub struct DiagnosticSensor {
    channel: Option<Channel>,
    entitykey: String,
    bus: EventBus,
    value: Mutex<Value>,
    enabled: AtomicBool,
    bindings: HandlerBindings,
}

impl DiagnosticSensor {
    /// Creates a diagnostic sensor seeded with its first observed value.
    #[must_use]
    pub fn new(
        bus: EventBus,
        channel: Option<Channel>,
        entitykey: impl Into<String>,
        value: Value,
    ) -> Arc<Self> {
        Arc::new(Self {
            channel,
            entitykey: entitykey.into(),
            bus,
            value: Mutex::new(value),
            enabled: AtomicBool::new(false),
            bindings: HandlerBindings::new(),
        })
    }

    /// The current sensor value.
    #[must_use]
    pub fn native_value(&self) -> Value {
        self.value.lock().clone()
    }

    /// Marks this entity as diagnostic-born.
    #[must_use]
    pub fn is_diagnostic(&self) -> bool {
        true
    }

    /// Updates the sensor value, flushing when it changed.
    pub fn update_native_value(&self, value: &Value) {
        let changed = {
            let mut current = self.value.lock();
            if *current == *value {
                false
            } else {
                *current = value.clone();
                true
            }
        };
        if changed {
            self.bus.publish(EntityEvent {
                entity_key: self.entity_key(),
                state: EntityState::Measurement {
                    value: value.clone(),
                },
            });
        }
    }
}

impl Entity for DiagnosticSensor {
    fn channel(&self) -> Channel {
        self.channel.unwrap_or(Channel::ZERO)
    }

    fn entity_key(&self) -> String {
        match self.channel {
            Some(channel) => format!("{channel}_{}", self.entitykey),
            None => self.entitykey.clone(),
        }
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

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keyed_with_channel() {
        let bus = EventBus::new();
        let sensor = DiagnosticSensor::new(bus, Some(Channel::new(2)), "config_mode", json!(1));
        assert_eq!(sensor.entity_key(), "2_config_mode");
    }

    #[test]
    fn keyed_without_channel() {
        let bus = EventBus::new();
        let sensor = DiagnosticSensor::new(bus, None, "config_mode", json!(1));
        assert_eq!(sensor.entity_key(), "config_mode");
    }

    #[test]
    fn update_flushes_on_change() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let sensor = DiagnosticSensor::new(bus, None, "signal", json!(70));

        sensor.update_native_value(&json!(70));
        assert!(rx.try_recv().is_err(), "no flush for unchanged value");

        sensor.update_native_value(&json!(80));
        let event = rx.try_recv().unwrap();
        assert_eq!(event.entity_key, "signal");
        assert_eq!(
            event.state,
            EntityState::Measurement { value: json!(80) }
        );
        assert_eq!(sensor.native_value(), json!(80));
    }

    #[test]
    fn diagnostic_sensors_start_disabled() {
        let bus = EventBus::new();
        let sensor = DiagnosticSensor::new(bus, None, "signal", json!(0));
        assert!(!sensor.enabled());
        assert!(sensor.is_diagnostic());
    }
}
