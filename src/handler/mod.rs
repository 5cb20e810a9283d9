// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Namespace dispatch and polling engine.
//!
//! Every device keeps one [`NamespaceHandler`] per ability namespace it has
//! seen. The handler routes inbound payloads to the entity parsers
//! registered for each channel, lazily creating entities through a bound
//! factory when the device reports a channel not yet known locally, and
//! decides on every scheduler tick whether its namespace should be polled.
//!
//! # Payload shapes
//!
//! The handler does not know up front whether a namespace payload is a
//! list of channel objects, a single channel object, or a bare object with
//! no channel key at all (legacy toggle-only namespaces). It starts
//! optimized for lists and downgrades itself on a classified shape
//! mismatch: `ByList` -> `ByDict` -> `Generic`. The downgrade is sticky:
//! payload shape is firmware-stable for a given namespace, so the handler
//! never pays for re-probing a cheaper mode.

pub mod polling;
mod special;

pub use polling::{PollDecision, PollingConfig, PollingStrategy};
pub use special::{entity_bound, void};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value, json};

use crate::device::EntityManager;
use crate::entity::{DiagnosticSensor, Entity, ParseFn};
use crate::error::DispatchError;
use crate::namespace::{self as ns, NamespaceDef};
use crate::protocol::{Header, Request};
use crate::types::Channel;

/// Raw message handler bound to a namespace instead of per-channel parsers.
pub type RawHandler = Arc<dyn Fn(&EntityManager, &Header, &Value) + Send + Sync>;

/// Factory constructing (and registering) an entity for a newly seen
/// channel. The factory must register a parser for the channel with this
/// handler before returning; dispatch retries the lookup exactly once.
pub type EntityFactory = Arc<dyn Fn(&EntityManager, Channel) -> Arc<dyn Entity> + Send + Sync>;

/// Payload keys that never become diagnostic sensors: identifiers and
/// timestamps carried by almost every payload.
const NOISE_KEYS: &[&str] = &[
    "id",
    ns::KEY_CHANNEL,
    "lmTime",
    "lmtime",
    "syncedTime",
    "latestSampleTime",
];

/// How the handler currently routes per-channel payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Optimized for `{key: [{"channel": ..}, ..]}`.
    ByList,
    /// Optimized for `{key: {"channel": ..}}`.
    ByDict,
    /// Inspects the payload type on every call; tolerates missing channel
    /// keys by routing to channel 0.
    Generic,
    /// Per-channel dispatch is not in play; routing is decided by the
    /// handler's custom binding (explicit handler, void, or undefined).
    Custom,
}

/// What `DispatchMode::Custom` routes to.
enum CustomRouting {
    /// Explicit raw handler.
    Handler(RawHandler),
    /// Nothing known about this namespace: log, and expand diagnostics
    /// when enabled.
    Undefined,
    /// Known but intentionally ignored; suppresses the undefined path.
    Void,
}

/// Whether a channel key is mandatory for a payload object.
#[derive(Clone, Copy, PartialEq, Eq)]
enum ChannelPolicy {
    Required,
    DefaultZero,
}

struct EntityRecord {
    entity: Arc<dyn Entity>,
    parse: ParseFn,
}

/// Dispatch and polling state for one (device, namespace) pair.
///
/// Created once when the device first needs the namespace, registered into
/// the device's handler table, and alive for the device lifetime. Entities
/// come and go; the handler stays.
pub struct NamespaceHandler {
    def: NamespaceDef,
    custom: CustomRouting,
    mode: Mutex<DispatchMode>,
    entities: RwLock<HashMap<Channel, EntityRecord>>,
    factory: Option<EntityFactory>,
    bound_entity: Option<Arc<dyn Entity>>,
    last_request: Mutex<Option<u64>>,
    last_response: Mutex<Option<u64>>,
    strategy: Mutex<Option<PollingStrategy>>,
    period: Duration,
    cloud_period: Duration,
    response_base_size: usize,
    response_item_size: usize,
    response_size: Mutex<usize>,
    request_channels: Mutex<Vec<Channel>>,
}

impl NamespaceHandler {
    /// Creates a handler with no customization.
    ///
    /// Routing falls back to the device-level handler registered for this
    /// namespace, or to the undefined-namespace path. Registering an
    /// entity later switches the handler over to per-channel dispatch.
    ///
    /// # Panics
    ///
    /// Panics if the device already has a handler for this namespace; one
    /// handler per (device, namespace) pair is a setup-time invariant.
    pub fn new(manager: &EntityManager, namespace: &str) -> Arc<Self> {
        let custom = match manager.fallback_handler(namespace) {
            Some(handler) => CustomRouting::Handler(handler),
            None => CustomRouting::Undefined,
        };
        Self::build(manager, namespace, custom, DispatchMode::Custom, None, None)
    }

    /// Creates a handler that lazily constructs entities through `factory`
    /// whenever a message addresses an unknown channel.
    ///
    /// # Panics
    ///
    /// Panics if the device already has a handler for this namespace.
    pub fn with_factory(
        manager: &EntityManager,
        namespace: &str,
        factory: EntityFactory,
    ) -> Arc<Self> {
        Self::build(
            manager,
            namespace,
            CustomRouting::Undefined,
            DispatchMode::ByList,
            Some(factory),
            None,
        )
    }

    /// Creates a handler with an explicit raw message handler.
    ///
    /// # Panics
    ///
    /// Panics if the device already has a handler for this namespace.
    pub fn with_handler(
        manager: &EntityManager,
        namespace: &str,
        handler: RawHandler,
    ) -> Arc<Self> {
        Self::build(
            manager,
            namespace,
            CustomRouting::Handler(handler),
            DispatchMode::Custom,
            None,
            None,
        )
    }

    fn build(
        manager: &EntityManager,
        namespace: &str,
        custom: CustomRouting,
        mode: DispatchMode,
        factory: Option<EntityFactory>,
        bound_entity: Option<Arc<dyn Entity>>,
    ) -> Arc<Self> {
        let def = NamespaceDef::resolve(namespace);
        let conf = polling::config_for(namespace)
            .copied()
            .unwrap_or_else(PollingConfig::generic);
        let handler = Arc::new(Self {
            custom,
            mode: Mutex::new(mode),
            entities: RwLock::new(HashMap::new()),
            factory,
            bound_entity,
            last_request: Mutex::new(None),
            last_response: Mutex::new(None),
            strategy: Mutex::new(conf.strategy),
            period: conf.period,
            cloud_period: conf.cloud_period,
            response_base_size: conf.response_base_size,
            // one item per payload until channels teach us better
            response_size: Mutex::new(conf.response_base_size + conf.response_item_size),
            response_item_size: conf.response_item_size,
            request_channels: Mutex::new(Vec::new()),
            def,
        });
        manager.insert_handler(Arc::clone(&handler));
        handler
    }

    /// The namespace this handler routes.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.def.name
    }

    /// The key carrying this namespace's payload body.
    #[must_use]
    pub fn payload_key(&self) -> &str {
        &self.def.key
    }

    /// Whether payloads are scoped per channel.
    #[must_use]
    pub fn need_channel(&self) -> bool {
        self.def.need_channel
    }

    /// The current dispatch mode.
    #[must_use]
    pub fn dispatch_mode(&self) -> DispatchMode {
        *self.mode.lock()
    }

    // ========== Entity registration ==========

    /// Registers an entity's parse callback for its channel.
    ///
    /// For channel-scoped namespaces the channel is also appended to the
    /// accumulated poll request payload, growing the response estimate.
    /// A handler still on custom/undefined routing switches over to
    /// per-channel dispatch; an already downgraded mode is left alone.
    ///
    /// # Panics
    ///
    /// Panics if the channel is already registered; double registration is
    /// a setup-time bug, not a device condition.
    pub fn register_entity(&self, entity: &Arc<dyn Entity>, parse: ParseFn) {
        let channel = entity.channel();
        {
            let mut entities = self.entities.write();
            assert!(
                !entities.contains_key(&channel),
                "channel {channel} already registered for {}",
                self.def.name
            );
            entities.insert(
                channel,
                EntityRecord {
                    entity: Arc::clone(entity),
                    parse,
                },
            );
        }
        entity.bindings().add(&self.def.name);

        {
            let mut mode = self.mode.lock();
            if *mode == DispatchMode::Custom {
                *mode = DispatchMode::ByList;
            }
        }

        if self.def.need_channel {
            let mut channels = self.request_channels.lock();
            if !channels.contains(&channel) {
                channels.push(channel);
                *self.response_size.lock() =
                    self.response_base_size + channels.len() * self.response_item_size;
            }
        }
    }

    /// Removes an entity's channel from the dispatch table.
    ///
    /// The handler itself stays alive: a later message for the channel
    /// re-triggers auto-creation if a factory is still bound. The channel
    /// also stays in the poll request payload, since the device keeps
    /// reporting it.
    pub fn unregister(&self, entity: &Arc<dyn Entity>) {
        let channel = entity.channel();
        let removed = {
            let mut entities = self.entities.write();
            match entities.get(&channel) {
                Some(record) if Arc::ptr_eq(&record.entity, entity) => {
                    entities.remove(&channel);
                    true
                }
                _ => false,
            }
        };
        if removed {
            entity.bindings().remove(&self.def.name);
        }
    }

    fn parser_for(&self, channel: Channel) -> Option<ParseFn> {
        self.entities
            .read()
            .get(&channel)
            .map(|record| Arc::clone(&record.parse))
    }

    /// Number of channels currently in the dispatch table.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.entities.read().len()
    }

    // ========== Inbound dispatch ==========

    /// Routes a namespace payload to the registered entity parsers.
    ///
    /// This is the containment boundary: every dispatch failure is logged
    /// with device, namespace, function and payload context and swallowed,
    /// so one malformed payload cannot tear down message processing.
    pub fn handle(&self, manager: &EntityManager, header: &Header, payload: &Value) {
        let result = if self.dispatch_mode() == DispatchMode::Custom {
            match &self.custom {
                CustomRouting::Void => Ok(()),
                CustomRouting::Handler(custom) => {
                    custom(manager, header, payload);
                    Ok(())
                }
                CustomRouting::Undefined => self.handle_undefined(manager, header, payload),
            }
        } else {
            self.handle_modes(manager, payload)
        };
        if let Err(error) = result {
            tracing::warn!(
                device = %manager.name(),
                namespace = %self.def.name,
                function = self.dispatch_function(),
                %error,
                payload = %payload,
                "dispatch error"
            );
        }
    }

    fn dispatch_function(&self) -> &'static str {
        match *self.mode.lock() {
            DispatchMode::ByList => "handle_list",
            DispatchMode::ByDict => "handle_dict",
            DispatchMode::Generic => "handle_generic",
            DispatchMode::Custom => match &self.custom {
                CustomRouting::Handler(_) => "handle_custom",
                CustomRouting::Undefined => "handle_undefined",
                CustomRouting::Void => "handle_void",
            },
        }
    }

    /// Runs the mode machine, downgrading on classified shape mismatches.
    fn handle_modes(&self, manager: &EntityManager, payload: &Value) -> Result<(), DispatchError> {
        loop {
            let mode = *self.mode.lock();
            let result = match mode {
                DispatchMode::ByList | DispatchMode::Custom => self.handle_list(manager, payload),
                DispatchMode::ByDict => self.handle_dict(manager, payload),
                DispatchMode::Generic => self.handle_generic(manager, payload),
            };
            match result {
                Err(DispatchError::ShapeMismatch { .. }) => {
                    let downgraded = match mode {
                        DispatchMode::ByList | DispatchMode::Custom => DispatchMode::ByDict,
                        DispatchMode::ByDict => DispatchMode::Generic,
                        DispatchMode::Generic => return result,
                    };
                    tracing::debug!(
                        namespace = %self.def.name,
                        from = ?mode,
                        to = ?downgraded,
                        "dispatch mode downgrade"
                    );
                    *self.mode.lock() = downgraded;
                }
                other => return other,
            }
        }
    }

    /// Optimized for `{key: [{"channel": ..}, ..]}` payloads.
    fn handle_list(&self, manager: &EntityManager, payload: &Value) -> Result<(), DispatchError> {
        let body = self.payload_body(payload)?;
        let items = body.as_array().ok_or(DispatchError::ShapeMismatch {
            expected: "list",
            got: json_type(body),
        })?;
        self.dispatch_array(manager, items)
    }

    /// Optimized for `{key: {"channel": ..}}` payloads.
    fn handle_dict(&self, manager: &EntityManager, payload: &Value) -> Result<(), DispatchError> {
        let body = self.payload_body(payload)?;
        let map = body.as_object().ok_or(DispatchError::ShapeMismatch {
            expected: "dict",
            got: json_type(body),
        })?;
        match self.dispatch_object(manager, map, ChannelPolicy::Required) {
            // a channel-less object is a shape this mode does not expect
            // (legacy Toggle); Generic owns the channel-0 fallback
            Err(DispatchError::MissingChannel) => Err(DispatchError::ShapeMismatch {
                expected: "channel object",
                got: "channel-less dict",
            }),
            other => other,
        }
    }

    /// Safe fallback: inspects the payload type on every call and tolerates
    /// channel-less objects (legacy Toggle) by routing to channel 0.
    fn handle_generic(
        &self,
        manager: &EntityManager,
        payload: &Value,
    ) -> Result<(), DispatchError> {
        let body = self.payload_body(payload)?;
        match body {
            Value::Object(map) => self.dispatch_object(manager, map, ChannelPolicy::DefaultZero),
            Value::Array(items) => self.dispatch_array(manager, items),
            other => Err(DispatchError::ShapeMismatch {
                expected: "list or dict",
                got: json_type(other),
            }),
        }
    }

    fn payload_body<'p>(&self, payload: &'p Value) -> Result<&'p Value, DispatchError> {
        payload
            .get(&self.def.key)
            .ok_or_else(|| DispatchError::MissingKey(self.def.key.clone()))
    }

    fn dispatch_array(
        &self,
        manager: &EntityManager,
        items: &[Value],
    ) -> Result<(), DispatchError> {
        for item in items {
            let map = item.as_object().ok_or(DispatchError::ShapeMismatch {
                expected: "channel object",
                got: json_type(item),
            })?;
            self.dispatch_object(manager, map, ChannelPolicy::Required)?;
        }
        Ok(())
    }

    fn dispatch_object(
        &self,
        manager: &EntityManager,
        map: &Map<String, Value>,
        policy: ChannelPolicy,
    ) -> Result<(), DispatchError> {
        let channel = match map.get(ns::KEY_CHANNEL) {
            Some(value) => Channel::from_json(value).map_err(|_| DispatchError::MissingChannel)?,
            None => match policy {
                ChannelPolicy::Required => return Err(DispatchError::MissingChannel),
                ChannelPolicy::DefaultZero => Channel::ZERO,
            },
        };
        let parse = match self.parser_for(channel) {
            Some(parse) => parse,
            None => {
                self.try_create_entity(manager, channel)?;
                self.parser_for(channel)
                    .ok_or(DispatchError::FactoryMiss(channel.value()))?
            }
        };
        parse(map);
        Ok(())
    }

    fn try_create_entity(
        &self,
        manager: &EntityManager,
        channel: Channel,
    ) -> Result<(), DispatchError> {
        let factory = self
            .factory
            .as_ref()
            .ok_or(DispatchError::UnknownChannel(channel.value()))?;
        tracing::debug!(
            device = %manager.name(),
            namespace = %self.def.name,
            %channel,
            "auto-creating entity"
        );
        let entity = factory(manager, channel);
        manager.insert_entity(entity);
        Ok(())
    }

    // ========== Digest twins ==========

    /// Twin of [`handle`](Self::handle) for digest fragments: same routing,
    /// but the fragment arrives bare (no namespace key wrapper) and is
    /// always list-shaped.
    pub fn parse_list(&self, manager: &EntityManager, digest: &Value) {
        let result = match digest.as_array() {
            Some(items) => self.dispatch_array(manager, items),
            None => Err(DispatchError::ShapeMismatch {
                expected: "list",
                got: json_type(digest),
            }),
        };
        if let Err(error) = result {
            tracing::warn!(
                device = %manager.name(),
                namespace = %self.def.name,
                function = "parse_list",
                %error,
                payload = %digest,
                "digest error"
            );
        }
    }

    /// Twin of [`handle`](Self::handle) for digest fragments of either
    /// shape.
    pub fn parse_generic(&self, manager: &EntityManager, digest: &Value) {
        let result = match digest {
            Value::Object(map) => self.dispatch_object(manager, map, ChannelPolicy::DefaultZero),
            Value::Array(items) => self.dispatch_array(manager, items),
            other => Err(DispatchError::ShapeMismatch {
                expected: "list or dict",
                got: json_type(other),
            }),
        };
        if let Err(error) = result {
            tracing::warn!(
                device = %manager.name(),
                namespace = %self.def.name,
                function = "parse_generic",
                %error,
                payload = %digest,
                "digest error"
            );
        }
    }

    // ========== Undefined namespace expansion ==========

    fn handle_undefined(
        &self,
        manager: &EntityManager,
        header: &Header,
        payload: &Value,
    ) -> Result<(), DispatchError> {
        tracing::debug!(
            device = %manager.name(),
            method = %header.method,
            namespace = %self.def.name,
            payload = %payload,
            "handler undefined for namespace"
        );
        if !manager.create_diagnostic_entities() {
            return Ok(());
        }
        // The payload key heuristic may be wrong for an unknown namespace,
        // so walk every top-level key instead of trusting it.
        let Some(object) = payload.as_object() else {
            return Ok(());
        };
        for (key, value) in object {
            match value {
                Value::Object(map) => {
                    self.parse_undefined_dict(manager, key, map, channel_of(map));
                }
                Value::Array(items) => {
                    for item in items {
                        let map = item.as_object().ok_or(DispatchError::ShapeMismatch {
                            expected: "channel object",
                            got: json_type(item),
                        })?;
                        // a missing channel in a list payload is unexpected so far
                        let channel = channel_of(map).ok_or(DispatchError::MissingChannel)?;
                        self.parse_undefined_dict(manager, key, map, Some(channel));
                    }
                }
                scalar => self.update_diagnostic(manager, None, key, scalar),
            }
        }
        Ok(())
    }

    fn parse_undefined_dict(
        &self,
        manager: &EntityManager,
        key: &str,
        map: &Map<String, Value>,
        channel: Option<Channel>,
    ) {
        for (subkey, subvalue) in map {
            match subvalue {
                Value::Object(inner) => {
                    self.parse_undefined_dict(manager, &format!("{key}_{subkey}"), inner, channel);
                }
                Value::Array(_) => {
                    // nested lists carry no scalar worth a sensor
                }
                scalar => {
                    if NOISE_KEYS.contains(&subkey.as_str()) {
                        continue;
                    }
                    self.update_diagnostic(manager, channel, &format!("{key}_{subkey}"), scalar);
                }
            }
        }
    }

    /// Creates or updates the diagnostic sensor for one flattened scalar.
    ///
    /// Creating the first sensor for an otherwise unpolled namespace also
    /// attaches the diagnostic polling strategy so the value refreshes.
    fn update_diagnostic(
        &self,
        manager: &EntityManager,
        channel: Option<Channel>,
        entitykey: &str,
        value: &Value,
    ) {
        let full_key = match channel {
            Some(channel) => format!("{channel}_{entitykey}"),
            None => entitykey.to_string(),
        };
        if let Some(entity) = manager.entity(&full_key) {
            if let Some(sensor) = entity.as_any().downcast_ref::<DiagnosticSensor>() {
                sensor.update_native_value(value);
            }
            return;
        }
        let sensor =
            DiagnosticSensor::new(manager.event_bus().clone(), channel, entitykey, value.clone());
        manager.insert_entity(sensor);
        let mut strategy = self.strategy.lock();
        if strategy.is_none() {
            *strategy = Some(PollingStrategy::Diagnostic);
        }
    }

    // ========== Polling ==========

    /// Decides whether this namespace should be requested at `epoch`.
    ///
    /// Pure over `(last_request, epoch, transport traits)`; the caller must
    /// invoke [`mark_request`](Self::mark_request) before actually issuing
    /// a decided request so immediately following ticks stay debounced.
    #[must_use]
    pub fn poll_decision(&self, epoch: u64, push_active: bool, cloud: bool) -> PollDecision {
        match *self.strategy.lock() {
            None => PollDecision::Skip,
            Some(PollingStrategy::Default) => {
                if push_active && self.last_request().is_some() {
                    PollDecision::Skip
                } else {
                    PollDecision::Request
                }
            }
            Some(PollingStrategy::Smart | PollingStrategy::Diagnostic) => {
                if self.cadence_elapsed(epoch, cloud) {
                    PollDecision::BatchRequest
                } else {
                    PollDecision::Skip
                }
            }
            Some(PollingStrategy::Once) => {
                if self.last_request().is_none() {
                    PollDecision::BatchRequest
                } else {
                    PollDecision::Skip
                }
            }
            Some(PollingStrategy::EntityBound) => {
                let enabled = self.bound_entity.as_ref().is_some_and(|e| e.enabled());
                if enabled && self.cadence_elapsed(epoch, cloud) {
                    PollDecision::BatchRequest
                } else {
                    PollDecision::Skip
                }
            }
        }
    }

    fn cadence_elapsed(&self, epoch: u64, cloud: bool) -> bool {
        let period = if cloud { self.cloud_period } else { self.period };
        match *self.last_request.lock() {
            None => true,
            Some(last) => epoch.saturating_sub(last) >= period.as_secs(),
        }
    }

    /// Records a request about to be issued at `epoch`. Never rolled back:
    /// a failed request waits out a full cadence period rather than
    /// retrying immediately.
    pub fn mark_request(&self, epoch: u64) {
        *self.last_request.lock() = Some(epoch);
    }

    /// Records an inbound message for this namespace at `epoch`.
    pub fn mark_response(&self, epoch: u64) {
        *self.last_response.lock() = Some(epoch);
    }

    /// Epoch of the last issued request, if any.
    #[must_use]
    pub fn last_request(&self) -> Option<u64> {
        *self.last_request.lock()
    }

    /// Epoch of the last inbound message, if any.
    #[must_use]
    pub fn last_response(&self) -> Option<u64> {
        *self.last_response.lock()
    }

    /// Forgets the request history, re-arming Default/Once strategies.
    /// Called when the device reconnects to force a full resync.
    pub fn reset_polling(&self) {
        *self.last_request.lock() = None;
    }

    /// Current estimate of the poll response size.
    #[must_use]
    pub fn response_size(&self) -> usize {
        *self.response_size.lock()
    }

    /// Overrides the tracked item count (e.g. a hub reporting N
    /// sub-devices), re-deriving the response estimate.
    pub fn set_item_count(&self, item_count: usize) {
        *self.response_size.lock() =
            self.response_base_size + item_count * self.response_item_size;
    }

    /// The bound polling strategy, if any.
    #[must_use]
    pub fn polling_strategy(&self) -> Option<PollingStrategy> {
        *self.strategy.lock()
    }

    /// Re-binds the polling strategy; `None` stops active polling.
    pub fn set_polling_strategy(&self, strategy: Option<PollingStrategy>) {
        *self.strategy.lock() = strategy;
    }

    /// Builds the outgoing poll request: the accumulated channel list for
    /// channel-scoped namespaces, the descriptor default otherwise.
    #[must_use]
    pub fn polling_request(&self) -> Request {
        if self.def.need_channel {
            let channels = self.request_channels.lock();
            let items: Vec<Value> = channels
                .iter()
                .map(|channel| json!({ ns::KEY_CHANNEL: channel.value() }))
                .collect();
            Request::get(&self.def.name, json!({ self.def.key.as_str(): items }))
        } else {
            Request::get(&self.def.name, self.def.default_get_payload())
        }
    }
}

impl fmt::Debug for NamespaceHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamespaceHandler")
            .field("namespace", &self.def.name)
            .field("mode", &self.dispatch_mode())
            .field("strategy", &self.polling_strategy())
            .finish_non_exhaustive()
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

fn channel_of(map: &Map<String, Value>) -> Option<Channel> {
    map.get(ns::KEY_CHANNEL)
        .and_then(|value| Channel::from_json(value).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{FanEntity, ToggleEntity};
    use crate::namespace;
    use crate::protocol::Method;
    use crate::types::OnOff;
    use serde_json::json;

    fn manager() -> EntityManager {
        EntityManager::new("msl120-test")
    }

    fn push_header(namespace: &str) -> Header {
        Header {
            message_id: "0123".to_string(),
            method: Method::Push,
            from: "/appliance/test/publish".to_string(),
            namespace: namespace.to_string(),
            timestamp: 0,
            timestamp_ms: 0,
            sign: String::new(),
            payload_version: 1,
        }
    }

    fn fan_factory() -> EntityFactory {
        Arc::new(|manager: &EntityManager, channel| {
            let fan = FanEntity::with_enabled(manager.event_bus().clone(), channel, false);
            let parse: ParseFn = {
                let fan = Arc::clone(&fan);
                Arc::new(move |payload| fan.parse_fan(payload))
            };
            let entity: Arc<dyn Entity> = fan;
            manager.register_parser(namespace::CONTROL_FAN, &entity, parse);
            entity
        })
    }

    fn toggle_factory(ns_name: &'static str) -> EntityFactory {
        Arc::new(move |manager: &EntityManager, channel| {
            let toggle = ToggleEntity::new(manager.event_bus().clone(), channel);
            let parse: ParseFn = {
                let toggle = Arc::clone(&toggle);
                Arc::new(move |payload| toggle.parse_togglex(payload))
            };
            let entity: Arc<dyn Entity> = toggle;
            manager.register_parser(ns_name, &entity, parse);
            entity
        })
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn duplicate_handler_panics() {
        let manager = manager();
        let _first = NamespaceHandler::new(&manager, namespace::CONTROL_FAN);
        let _second = NamespaceHandler::new(&manager, namespace::CONTROL_FAN);
    }

    #[test]
    fn auto_creates_entity_for_unknown_channel() {
        let manager = manager();
        let handler =
            NamespaceHandler::with_factory(&manager, namespace::CONTROL_FAN, fan_factory());

        handler.handle(
            &manager,
            &push_header(namespace::CONTROL_FAN),
            &json!({"fan": [{"channel": 0, "speed": 2, "maxSpeed": 4}]}),
        );

        assert_eq!(handler.entity_count(), 1);
        let entity = manager.entity("0_fan").unwrap();
        let fan = entity.as_any().downcast_ref::<FanEntity>().unwrap();
        assert_eq!(fan.percentage(), Some(50));
    }

    #[test]
    fn downgrade_is_sticky() {
        let manager = manager();
        let handler = NamespaceHandler::with_factory(
            &manager,
            namespace::CONTROL_TOGGLEX,
            toggle_factory(namespace::CONTROL_TOGGLEX),
        );
        assert_eq!(handler.dispatch_mode(), DispatchMode::ByList);

        // dict-shaped payload downgrades ByList -> ByDict and still parses
        handler.handle(
            &manager,
            &push_header(namespace::CONTROL_TOGGLEX),
            &json!({"togglex": {"channel": 1, "onoff": 1}}),
        );
        assert_eq!(handler.dispatch_mode(), DispatchMode::ByDict);
        assert_eq!(handler.entity_count(), 1);

        // a later list-shaped payload cannot promote the mode back up; it
        // falls through to Generic, which handles both shapes forever after
        handler.handle(
            &manager,
            &push_header(namespace::CONTROL_TOGGLEX),
            &json!({"togglex": [{"channel": 2, "onoff": 0}]}),
        );
        assert_eq!(handler.dispatch_mode(), DispatchMode::Generic);
        assert_eq!(handler.entity_count(), 2);
    }

    #[test]
    fn generic_mode_defaults_missing_channel_to_zero() {
        let manager = manager();
        let handler = NamespaceHandler::with_factory(
            &manager,
            namespace::CONTROL_TOGGLE,
            toggle_factory(namespace::CONTROL_TOGGLE),
        );

        // legacy Toggle payloads never carry a channel key; the handler
        // walks ByList -> ByDict -> Generic and routes to channel 0
        handler.handle(
            &manager,
            &push_header(namespace::CONTROL_TOGGLE),
            &json!({"toggle": {"onoff": 1}}),
        );
        assert_eq!(handler.dispatch_mode(), DispatchMode::Generic);

        let entity = manager.entity("0_switch").unwrap();
        let toggle = entity.as_any().downcast_ref::<ToggleEntity>().unwrap();
        assert_eq!(toggle.onoff(), Some(OnOff::On));
    }

    #[test]
    fn missing_channel_never_creates_phantom_entity() {
        let manager = manager();
        let handler =
            NamespaceHandler::with_factory(&manager, namespace::CONTROL_FAN, fan_factory());

        // list item without channel key: dispatch must error out, not
        // fabricate an entity for a made-up channel
        handler.handle(
            &manager,
            &push_header(namespace::CONTROL_FAN),
            &json!({"fan": [{"speed": 2}]}),
        );
        assert_eq!(handler.entity_count(), 0);
        assert!(manager.entity("0_fan").is_none());
    }

    #[test]
    fn unknown_channel_without_factory_is_contained() {
        let manager = manager();
        let handler = NamespaceHandler::new(&manager, namespace::CONTROL_TOGGLEX);
        // an entity registration switched the handler to dispatch routing
        let toggle = ToggleEntity::new(manager.event_bus().clone(), Channel::ZERO);
        let entity: Arc<dyn Entity> = toggle;
        handler.register_entity(&entity, Arc::new(|_| {}));
        assert_eq!(handler.dispatch_mode(), DispatchMode::ByList);

        // unknown channel, no factory: contained, nothing created
        handler.handle(
            &manager,
            &push_header(namespace::CONTROL_TOGGLEX),
            &json!({"togglex": [{"channel": 5, "onoff": 1}]}),
        );
        assert_eq!(handler.entity_count(), 1);
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn duplicate_channel_registration_panics() {
        let manager = manager();
        let handler =
            NamespaceHandler::with_factory(&manager, namespace::CONTROL_FAN, fan_factory());
        let fan = FanEntity::new(manager.event_bus().clone(), Channel::ZERO);
        let entity: Arc<dyn Entity> = fan;
        let parse: ParseFn = Arc::new(|_| {});
        handler.register_entity(&entity, Arc::clone(&parse));
        handler.register_entity(&entity, parse);
    }

    #[test]
    fn unregister_leaves_handler_reusable() {
        let manager = manager();
        let handler =
            NamespaceHandler::with_factory(&manager, namespace::CONTROL_FAN, fan_factory());

        handler.handle(
            &manager,
            &push_header(namespace::CONTROL_FAN),
            &json!({"fan": [{"channel": 0, "speed": 1, "maxSpeed": 4}]}),
        );
        assert_eq!(handler.entity_count(), 1);

        let entity = manager.entity("0_fan").unwrap();
        manager.unregister(&entity);
        assert_eq!(handler.entity_count(), 0);
        assert!(entity.bindings().namespaces().is_empty());

        // factory still bound: the next message re-creates the entity
        handler.handle(
            &manager,
            &push_header(namespace::CONTROL_FAN),
            &json!({"fan": [{"channel": 0, "speed": 4, "maxSpeed": 4}]}),
        );
        assert_eq!(handler.entity_count(), 1);
    }

    #[test]
    fn response_size_tracks_channel_count() {
        let manager = manager();
        let handler = NamespaceHandler::with_factory(
            &manager,
            namespace::HUB_BATTERY,
            toggle_factory(namespace::HUB_BATTERY),
        );
        // base 300, 40 per item, one item assumed up front
        assert_eq!(handler.response_size(), 300 + 40);

        for channel in 0..3 {
            let toggle = ToggleEntity::new(manager.event_bus().clone(), Channel::new(channel));
            let entity: Arc<dyn Entity> = toggle;
            handler.register_entity(&entity, Arc::new(|_| {}));
        }
        assert_eq!(handler.response_size(), 300 + 3 * 40);

        let toggle = ToggleEntity::new(manager.event_bus().clone(), Channel::new(3));
        let entity: Arc<dyn Entity> = toggle;
        handler.register_entity(&entity, Arc::new(|_| {}));
        assert_eq!(handler.response_size(), 300 + 4 * 40);
    }

    #[test]
    fn item_count_override() {
        let manager = manager();
        let handler = NamespaceHandler::new(&manager, namespace::HUB_SENSOR_ALL);
        handler.set_item_count(8);
        assert_eq!(handler.response_size(), 300 + 8 * 250);
    }

    #[test]
    fn polling_request_accumulates_channels() {
        let manager = manager();
        let handler =
            NamespaceHandler::with_factory(&manager, namespace::CONTROL_FAN, fan_factory());
        assert_eq!(
            handler.polling_request().payload,
            json!({"fan": []}),
            "starts with an empty channel list"
        );

        handler.handle(
            &manager,
            &push_header(namespace::CONTROL_FAN),
            &json!({"fan": [{"channel": 2, "speed": 1, "maxSpeed": 4}]}),
        );
        assert_eq!(
            handler.polling_request().payload,
            json!({"fan": [{"channel": 2}]})
        );
    }

    #[test]
    fn smart_strategy_cadence() {
        let manager = manager();
        let handler = NamespaceHandler::new(&manager, namespace::SYSTEM_RUNTIME);
        assert_eq!(handler.polling_strategy(), Some(PollingStrategy::Smart));
        let period = polling::UPDATE_PERIOD.as_secs();

        // never requested: fires at epoch 0
        assert_eq!(
            handler.poll_decision(0, false, false),
            PollDecision::BatchRequest
        );
        handler.mark_request(0);
        assert_eq!(handler.last_request(), Some(0));

        assert_eq!(
            handler.poll_decision(period - 1, false, false),
            PollDecision::Skip
        );
        assert_eq!(
            handler.poll_decision(period, false, false),
            PollDecision::BatchRequest
        );
        handler.mark_request(period);
        assert_eq!(handler.last_request(), Some(period));
    }

    #[test]
    fn smart_strategy_uses_cloud_period_when_cloud_routed() {
        let manager = manager();
        let handler = NamespaceHandler::new(&manager, namespace::SYSTEM_DNDMODE);
        handler.mark_request(0);

        // local period is zero: always due on a local transport
        assert_eq!(
            handler.poll_decision(1, false, false),
            PollDecision::BatchRequest
        );
        // cloud routing applies the courtesy period
        assert_eq!(handler.poll_decision(1, true, true), PollDecision::Skip);
        let cloud = polling::CLOUD_UPDATE_PERIOD.as_secs();
        assert_eq!(
            handler.poll_decision(cloud, true, true),
            PollDecision::BatchRequest
        );
    }

    #[test]
    fn default_strategy_skips_when_push_active() {
        let manager = manager();
        let handler = NamespaceHandler::new(&manager, namespace::SYSTEM_ALL);
        assert_eq!(handler.polling_strategy(), Some(PollingStrategy::Default));

        // fresh or reconnected: request regardless of transport
        assert_eq!(
            handler.poll_decision(100, true, false),
            PollDecision::Request
        );
        handler.mark_request(100);

        // push transport keeps the namespace fresh: no more polls
        assert_eq!(handler.poll_decision(500, true, false), PollDecision::Skip);
        // without push the namespace polls every tick
        assert_eq!(
            handler.poll_decision(500, false, false),
            PollDecision::Request
        );

        // reconnect re-arms
        handler.reset_polling();
        assert_eq!(
            handler.poll_decision(900, true, false),
            PollDecision::Request
        );
    }

    #[test]
    fn once_strategy_fires_once_until_reset() {
        let manager = manager();
        let handler = NamespaceHandler::new(&manager, namespace::HUB_SUBDEVICE_VERSION);
        assert_eq!(handler.polling_strategy(), Some(PollingStrategy::Once));

        assert_eq!(
            handler.poll_decision(10, false, false),
            PollDecision::BatchRequest
        );
        handler.mark_request(10);
        assert_eq!(
            handler.poll_decision(100_000, false, false),
            PollDecision::Skip
        );

        handler.reset_polling();
        assert_eq!(
            handler.poll_decision(100_001, false, false),
            PollDecision::BatchRequest
        );
    }

    #[test]
    fn diagnostic_expansion_creates_sensors_and_attaches_polling() {
        let manager = manager();
        manager.set_create_diagnostic_entities(true);
        let handler = NamespaceHandler::new(&manager, "Appliance.Vendor.NewThing");
        assert_eq!(handler.polling_strategy(), None);

        handler.handle(
            &manager,
            &push_header("Appliance.Vendor.NewThing"),
            &json!({"newThing": {"channel": 1, "mode": 2, "lmTime": 12345, "config": {"warmup": 30}}}),
        );

        let mode = manager.entity("1_newThing_mode").unwrap();
        let sensor = mode.as_any().downcast_ref::<DiagnosticSensor>().unwrap();
        assert_eq!(sensor.native_value(), json!(2));

        // nested objects flatten into compound keys; noise keys are skipped
        assert!(manager.entity("1_newThing_config_warmup").is_some());
        assert!(manager.entity("1_newThing_lmTime").is_none());

        // the namespace now refreshes its sensors
        assert_eq!(
            handler.polling_strategy(),
            Some(PollingStrategy::Diagnostic)
        );
    }

    #[test]
    fn undefined_without_diagnostics_is_silent() {
        let manager = manager();
        let handler = NamespaceHandler::new(&manager, "Appliance.Vendor.NewThing");
        handler.handle(
            &manager,
            &push_header("Appliance.Vendor.NewThing"),
            &json!({"newThing": {"mode": 2}}),
        );
        assert_eq!(manager.entities_len(), 0);
        assert_eq!(handler.polling_strategy(), None);
    }
}
