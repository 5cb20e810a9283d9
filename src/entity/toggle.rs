// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Relay/toggle entity for `Appliance.Control.ToggleX` channels.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::entity::{Entity, HandlerBindings};
use crate::event::{EntityEvent, EntityState, EventBus};
use crate::namespace;
use crate::types::{Channel, OnOff};

/// One relay channel of a plug or power strip.
///
/// Parses both the channel-scoped `togglex` payloads and the legacy
/// channel-less `toggle` shape (routed here with the implicit channel 0).
#[derive(Debug)]
pub struct ToggleEntity {
    channel: Channel,
    bus: EventBus,
    onoff: Mutex<Option<OnOff>>,
    enabled: AtomicBool,
    bindings: HandlerBindings,
}

impl ToggleEntity {
    /// Creates a toggle entity for the given channel.
    #[must_use]
    pub fn new(bus: EventBus, channel: Channel) -> Arc<Self> {
        Self::with_enabled(bus, channel, true)
    }

    /// Creates a toggle entity with an explicit enabled-by-default flag.
    #[must_use]
    pub fn with_enabled(bus: EventBus, channel: Channel, enabled_by_default: bool) -> Arc<Self> {
        Arc::new(Self {
            channel,
            bus,
            onoff: Mutex::new(None),
            enabled: AtomicBool::new(enabled_by_default),
            bindings: HandlerBindings::new(),
        })
    }

    /// Last parsed switch position, if any.
    #[must_use]
    pub fn onoff(&self) -> Option<OnOff> {
        *self.onoff.lock()
    }

    /// Parses a `togglex`/`toggle` channel payload: `{"channel":0,"onoff":1}`.
    pub fn parse_togglex(&self, payload: &Map<String, Value>) {
        let Some(raw) = payload.get(namespace::KEY_ONOFF).and_then(Value::as_i64) else {
            return;
        };
        let onoff = match OnOff::try_from(raw) {
            Ok(onoff) => onoff,
            Err(e) => {
                tracing::warn!(channel = %self.channel, error = %e, "bad toggle payload");
                return;
            }
        };
        let changed = {
            let mut current = self.onoff.lock();
            if *current == Some(onoff) {
                false
            } else {
                *current = Some(onoff);
                true
            }
        };
        if changed {
            self.flush_state(onoff);
        }
    }

    fn flush_state(&self, onoff: OnOff) {
        self.bus.publish(EntityEvent {
            entity_key: self.entity_key(),
            state: EntityState::Toggle { onoff },
        });
    }
}

impl Entity for ToggleEntity {
    fn channel(&self) -> Channel {
        self.channel
    }

    fn entity_key(&self) -> String {
        format!("{}_switch", self.channel)
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
        *self.onoff.lock() = None;
        self.bus.publish(EntityEvent {
            entity_key: self.entity_key(),
            state: EntityState::Unavailable,
        });
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
