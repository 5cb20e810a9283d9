// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Entity contract consumed by the namespace dispatch engine.
//!
//! An entity mirrors one channel of one device capability (a relay, a fan,
//! a sensor reading). Entities register a parse callback with every
//! namespace handler relevant to their channel; the handler routes each
//! per-channel sub-payload to that callback. Parse callbacks are bound
//! explicitly at registration time, so routing never probes for method
//! names at dispatch time.
//!
//! Registration is symmetric: each entity tracks the namespaces it is
//! registered under, and unregistering tears it out of every handler.

mod fan;
mod sensor;
mod toggle;

pub use fan::FanEntity;
pub use sensor::DiagnosticSensor;
pub use toggle::ToggleEntity;

use std::any::Any;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::types::Channel;

/// Parse callback bound to one (entity, namespace) pair at registration.
pub type ParseFn = Arc<dyn Fn(&Map<String, Value>) + Send + Sync>;

/// One channel-scoped unit of device state.
///
/// Implementations carry their own interior-mutable state and flush
/// snapshots through the device event bus when a parsed payload changes it.
pub trait Entity: Send + Sync {
    /// The channel this entity mirrors.
    fn channel(&self) -> Channel;

    /// Key under which the entity lives in the device registry.
    fn entity_key(&self) -> String;

    /// Whether the entity is enabled on the host side. Disabled entities
    /// still parse pushes but are skipped by entity-bound polling.
    fn enabled(&self) -> bool;

    /// Enables or disables the entity.
    fn set_enabled(&self, enabled: bool);

    /// The namespaces this entity registered parsers with.
    fn bindings(&self) -> &HandlerBindings;

    /// Marks the entity's source offline; state resets on next parse.
    fn set_unavailable(&self) {}

    /// Escape hatch for callers needing the concrete type.
    fn as_any(&self) -> &dyn Any;
}

/// Back-reference set tracking which handlers an entity registered with.
///
/// Stored by namespace name: handlers outlive entities within a device, so
/// a name is enough to find the handler again at teardown.
#[derive(Debug, Default)]
pub struct HandlerBindings {
    namespaces: Mutex<Vec<String>>,
}

impl HandlerBindings {
    /// Creates an empty binding set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a registration under `namespace`.
    pub fn add(&self, namespace: &str) {
        let mut namespaces = self.namespaces.lock();
        if !namespaces.iter().any(|n| n == namespace) {
            namespaces.push(namespace.to_string());
        }
    }

    /// Drops the record for `namespace`.
    pub fn remove(&self, namespace: &str) {
        self.namespaces.lock().retain(|n| n != namespace);
    }

    /// Snapshot of the registered namespaces.
    #[must_use]
    pub fn namespaces(&self) -> Vec<String> {
        self.namespaces.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace;

    #[test]
    fn bindings_deduplicate() {
        let bindings = HandlerBindings::new();
        bindings.add(namespace::CONTROL_TOGGLEX);
        bindings.add(namespace::CONTROL_TOGGLEX);
        bindings.add(namespace::CONTROL_FAN);
        assert_eq!(
            bindings.namespaces(),
            vec![
                namespace::CONTROL_TOGGLEX.to_string(),
                namespace::CONTROL_FAN.to_string()
            ]
        );
    }

    #[test]
    fn bindings_remove() {
        let bindings = HandlerBindings::new();
        bindings.add(namespace::CONTROL_FAN);
        bindings.remove(namespace::CONTROL_FAN);
        assert!(bindings.namespaces().is_empty());
    }
}
