// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device façade: handler table, entity registry and poll orchestration.
//!
//! [`EntityManager`] owns everything the dispatch engine touches without a
//! transport: the namespace handler table (with registration order), the
//! entity registry, the state-flush event bus and the diagnostics flag.
//!
//! [`Device`] wraps a manager with a [`Transport`] and a [`Signer`]: it
//! routes inbound messages to handlers, bootstraps entities from the
//! `Appliance.System.All` digest, and runs the sequential poll tick,
//! batching smart-poll requests into `Appliance.Control.Multiple`
//! envelopes bounded by the transport's response size ceiling.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use serde_json::Value;

use crate::entity::{DiagnosticSensor, Entity, ParseFn, ToggleEntity};
use crate::error::Error;
use crate::event::EventBus;
use crate::handler::{self, EntityFactory, NamespaceHandler, PollDecision, PollingStrategy, RawHandler};
use crate::namespace as ns;
use crate::protocol::{Message, Method, MultipleRequest, Request, Route, Signer, Transport};

/// Handler table preserving registration order for the poll tick.
#[derive(Default)]
struct HandlerTable {
    by_namespace: HashMap<String, Arc<NamespaceHandler>>,
    order: Vec<Arc<NamespaceHandler>>,
}

/// Transport-free core of a device: entity registry, handler table and
/// event bus.
///
/// One instance per device; handlers and entities reference it for
/// registration and routing. All collections use interior mutability so
/// dispatch can lazily create handlers and entities mid-message.
pub struct EntityManager {
    name: String,
    handlers: RwLock<HandlerTable>,
    entities: RwLock<HashMap<String, Arc<dyn Entity>>>,
    fallback_handlers: RwLock<HashMap<String, RawHandler>>,
    bus: EventBus,
    create_diagnostic_entities: AtomicBool,
}

impl EntityManager {
    /// Creates an empty manager for the named device.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            handlers: RwLock::new(HandlerTable::default()),
            entities: RwLock::new(HashMap::new()),
            fallback_handlers: RwLock::new(HashMap::new()),
            bus: EventBus::new(),
            create_diagnostic_entities: AtomicBool::new(false),
        }
    }

    /// The device name, used for log context.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The state-flush event bus.
    #[must_use]
    pub fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    // ========== Handler table ==========

    /// Registers a freshly built handler.
    ///
    /// # Panics
    ///
    /// Panics if a handler for the namespace already exists; one handler
    /// per (device, namespace) pair is a setup-time invariant.
    pub fn insert_handler(&self, handler: Arc<NamespaceHandler>) {
        let mut table = self.handlers.write();
        assert!(
            !table.by_namespace.contains_key(handler.namespace()),
            "namespace {} already registered",
            handler.namespace()
        );
        table
            .by_namespace
            .insert(handler.namespace().to_string(), Arc::clone(&handler));
        table.order.push(handler);
    }

    /// Looks up the handler for a namespace.
    #[must_use]
    pub fn handler(&self, namespace: &str) -> Option<Arc<NamespaceHandler>> {
        self.handlers.read().by_namespace.get(namespace).cloned()
    }

    /// Snapshot of all handlers in registration order.
    #[must_use]
    pub fn handlers(&self) -> Vec<Arc<NamespaceHandler>> {
        self.handlers.read().order.clone()
    }

    /// Registers a device-level fallback message handler for a namespace,
    /// consulted when a handler is created with no other customization.
    pub fn set_fallback_handler(&self, namespace: &str, handler: RawHandler) {
        self.fallback_handlers
            .write()
            .insert(namespace.to_string(), handler);
    }

    /// The device-level fallback handler for a namespace, if any.
    #[must_use]
    pub fn fallback_handler(&self, namespace: &str) -> Option<RawHandler> {
        self.fallback_handlers.read().get(namespace).cloned()
    }

    // ========== Entity registry ==========

    /// Adds an entity to the registry.
    ///
    /// # Panics
    ///
    /// Panics if the entity key is already taken.
    pub fn insert_entity(&self, entity: Arc<dyn Entity>) {
        let key = entity.entity_key();
        let mut entities = self.entities.write();
        assert!(
            !entities.contains_key(&key),
            "entity {key} already registered"
        );
        entities.insert(key, entity);
    }

    /// Looks up an entity by registry key.
    #[must_use]
    pub fn entity(&self, key: &str) -> Option<Arc<dyn Entity>> {
        self.entities.read().get(key).cloned()
    }

    /// Number of registered entities.
    #[must_use]
    pub fn entities_len(&self) -> usize {
        self.entities.read().len()
    }

    /// Snapshot of all registered entities.
    #[must_use]
    pub fn entities(&self) -> Vec<Arc<dyn Entity>> {
        self.entities.read().values().cloned().collect()
    }

    /// Registers an entity's parse callback with the handler for
    /// `namespace`, creating the handler if the namespace is new.
    pub fn register_parser(&self, namespace: &str, entity: &Arc<dyn Entity>, parse: ParseFn) {
        let handler = self
            .handler(namespace)
            .unwrap_or_else(|| NamespaceHandler::new(self, namespace));
        handler.register_entity(entity, parse);
    }

    /// Tears an entity out of every handler it registered with and drops
    /// it from the registry. Handlers stay alive.
    pub fn unregister(&self, entity: &Arc<dyn Entity>) {
        for namespace in entity.bindings().namespaces() {
            if let Some(handler) = self.handler(&namespace) {
                handler.unregister(entity);
            }
        }
        self.entities.write().remove(&entity.entity_key());
    }

    // ========== Diagnostics ==========

    /// Whether unknown-namespace payloads expand into diagnostic sensors.
    #[must_use]
    pub fn create_diagnostic_entities(&self) -> bool {
        self.create_diagnostic_entities.load(Ordering::Relaxed)
    }

    /// Toggles diagnostic expansion. Disabling removes every diagnostic
    /// sensor and detaches the diagnostic polling strategies they brought
    /// with them.
    pub fn set_create_diagnostic_entities(&self, enable: bool) {
        self.create_diagnostic_entities
            .store(enable, Ordering::Relaxed);
        if enable {
            return;
        }
        let sensors: Vec<Arc<dyn Entity>> = self
            .entities
            .read()
            .values()
            .filter(|entity| entity.as_any().downcast_ref::<DiagnosticSensor>().is_some())
            .cloned()
            .collect();
        for sensor in sensors {
            self.unregister(&sensor);
        }
        for handler in self.handlers() {
            if handler.polling_strategy() == Some(PollingStrategy::Diagnostic) {
                handler.set_polling_strategy(None);
            }
        }
    }
}

impl std::fmt::Debug for EntityManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityManager")
            .field("name", &self.name)
            .field("handlers", &self.handlers.read().order.len())
            .field("entities", &self.entities_len())
            .finish_non_exhaustive()
    }
}

/// A Meross device bridged through one transport.
///
/// # Examples
///
/// ```no_run
/// use meross_lib::device::Device;
/// use meross_lib::protocol::HttpTransport;
///
/// # async fn example() -> meross_lib::Result<()> {
/// let transport = HttpTransport::new("192.168.1.100")?;
/// let device = Device::new("msl120", "device-key", transport);
///
/// // one poll tick; the host drives the cadence
/// device.poll(device.epoch()).await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Device<T: Transport> {
    manager: EntityManager,
    transport: T,
    signer: Signer,
}

impl<T: Transport> Device<T> {
    /// Creates a device with its transport and shared secret key.
    #[must_use]
    pub fn new(name: impl Into<String>, key: &str, transport: T) -> Self {
        let name = name.into();
        let signer = Signer::new(key, format!("app:{name}"));
        let device = Self {
            manager: EntityManager::new(name),
            transport,
            signer,
        };
        device.install_base_handlers();
        device
    }

    fn install_base_handlers(&self) {
        self.manager
            .set_fallback_handler(ns::SYSTEM_ALL, Arc::new(handle_system_all));
        NamespaceHandler::new(&self.manager, ns::SYSTEM_ALL);
        // known namespaces with nothing to process at the device level
        handler::void(&self.manager, ns::CONTROL_BIND);
        handler::void(&self.manager, ns::SYSTEM_CLOCK);
        handler::void(&self.manager, ns::SYSTEM_REPORT);
    }

    /// The transport-free core.
    #[must_use]
    pub fn manager(&self) -> &EntityManager {
        &self.manager
    }

    /// The underlying transport.
    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Current epoch seconds.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        epoch_now()
    }

    /// Creates a handler for an ability the device advertises, binding the
    /// built-in entity factory when one exists for the namespace.
    ///
    /// Namespaces already handled are left untouched.
    pub fn register_ability(&self, namespace: &str) {
        if self.manager.handler(namespace).is_some() {
            return;
        }
        match builtin_factory(namespace) {
            Some(factory) => {
                NamespaceHandler::with_factory(&self.manager, namespace, factory);
            }
            None => {
                NamespaceHandler::new(&self.manager, namespace);
            }
        }
    }

    // ========== Inbound ==========

    /// Routes an inbound message to its namespace handler, creating a
    /// default handler on first sight of an unknown namespace.
    pub fn handle_message(&self, message: &Message) {
        let header = &message.header;

        // aggregated acks carry full inner messages; unpack and recurse
        if header.namespace == ns::CONTROL_MULTIPLE && header.method.is_ack() {
            if let Some(items) = message.payload.get("multiple").and_then(Value::as_array) {
                for item in items {
                    match serde_json::from_value::<Message>(item.clone()) {
                        Ok(inner) => self.handle_message(&inner),
                        Err(error) => tracing::warn!(
                            device = %self.manager.name(),
                            %error,
                            "bad inner message in Multiple ack"
                        ),
                    }
                }
            }
            return;
        }

        let handler = self
            .manager
            .handler(&header.namespace)
            .unwrap_or_else(|| NamespaceHandler::new(&self.manager, &header.namespace));
        handler.mark_response(epoch_now());
        handler.handle(&self.manager, header, &message.payload);
    }

    // ========== Outbound ==========

    /// Signs and sends a request, routing any acknowledgement back through
    /// [`handle_message`](Self::handle_message).
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails to deliver the request.
    pub async fn async_request(
        &self,
        namespace: &str,
        method: Method,
        payload: Value,
    ) -> Result<Option<Message>, Error> {
        self.send_request(
            Route::Auto,
            Request {
                namespace: namespace.to_string(),
                method,
                payload,
            },
        )
        .await
    }

    /// Like [`async_request`](Self::async_request), forcing the local HTTP
    /// route.
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails to deliver the request.
    pub async fn async_http_request(
        &self,
        namespace: &str,
        method: Method,
        payload: Value,
    ) -> Result<Option<Message>, Error> {
        self.send_request(
            Route::Http,
            Request {
                namespace: namespace.to_string(),
                method,
                payload,
            },
        )
        .await
    }

    /// Like [`async_request`](Self::async_request), forcing the broker
    /// MQTT route.
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails to deliver the request.
    pub async fn async_mqtt_request(
        &self,
        namespace: &str,
        method: Method,
        payload: Value,
    ) -> Result<Option<Message>, Error> {
        self.send_request(
            Route::Mqtt,
            Request {
                namespace: namespace.to_string(),
                method,
                payload,
            },
        )
        .await
    }

    async fn send_request(
        &self,
        route: Route,
        request: Request,
    ) -> Result<Option<Message>, Error> {
        let message = self.signer.wrap(&request);
        let ack = self
            .transport
            .send_via(route, message)
            .await
            .map_err(Error::Protocol)?;
        if let Some(ack) = &ack {
            self.handle_message(ack);
        }
        Ok(ack)
    }

    /// Issues a handler's poll request immediately, stamping its request
    /// time first.
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails to deliver the request.
    pub async fn async_request_poll(
        &self,
        handler: &Arc<NamespaceHandler>,
    ) -> Result<Option<Message>, Error> {
        handler.mark_request(epoch_now());
        self.send_request(Route::Auto, handler.polling_request()).await
    }

    /// Issues a handler's poll request at `epoch` through the smart-poll
    /// path (stamped, then sent individually).
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails to deliver the request.
    pub async fn async_request_smartpoll(
        &self,
        handler: &Arc<NamespaceHandler>,
        epoch: u64,
    ) -> Result<Option<Message>, Error> {
        handler.mark_request(epoch);
        self.send_request(Route::Auto, handler.polling_request()).await
    }

    /// Queries a handler's namespace over an explicitly chosen route,
    /// without touching its polling state. Used while tracing abilities.
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails to deliver the request.
    pub async fn async_trace(
        &self,
        handler: &Arc<NamespaceHandler>,
        route: Route,
    ) -> Result<Option<Message>, Error> {
        self.send_request(route, handler.polling_request()).await
    }

    // ========== Poll tick ==========

    /// Runs one poll tick at `epoch`.
    ///
    /// Handlers are visited sequentially in registration order. Default
    /// strategy requests go out individually; smart-poll requests
    /// accumulate into `Appliance.Control.Multiple` batches that split
    /// whenever the summed response estimates would cross the transport's
    /// size ceiling. Request failures are logged, never retried within the
    /// tick: the stamped request time holds until the next cadence window.
    pub async fn poll(&self, epoch: u64) {
        let push_active = self.transport.is_push_capable();
        let cloud = self.transport.is_cloud();
        let ceiling = self.transport.response_size_limit();

        let mut batch = MultipleRequest::new(ceiling);
        for handler in self.manager.handlers() {
            match handler.poll_decision(epoch, push_active, cloud) {
                PollDecision::Skip => {}
                PollDecision::Request => {
                    handler.mark_request(epoch);
                    if let Err(error) =
                        self.send_request(Route::Auto, handler.polling_request()).await
                    {
                        tracing::warn!(
                            device = %self.manager.name(),
                            namespace = %handler.namespace(),
                            %error,
                            "poll request failed"
                        );
                    }
                }
                PollDecision::BatchRequest => {
                    let estimate = handler.response_size();
                    if !batch.fits(estimate) {
                        let full = std::mem::replace(&mut batch, MultipleRequest::new(ceiling));
                        self.flush_batch(full).await;
                    }
                    handler.mark_request(epoch);
                    batch.push(handler.polling_request(), estimate);
                }
            }
        }
        self.flush_batch(batch).await;
    }

    async fn flush_batch(&self, batch: MultipleRequest) {
        if let Some(request) = batch.into_request(&self.signer) {
            if let Err(error) = self.send_request(Route::Auto, request).await {
                tracing::warn!(
                    device = %self.manager.name(),
                    %error,
                    "smartpoll batch failed"
                );
            }
        }
    }

    /// Re-arms every handler after a reconnect so Default/Once strategies
    /// resynchronize full state on the next tick.
    pub fn mark_reconnected(&self) {
        for handler in self.manager.handlers() {
            handler.reset_polling();
        }
    }

    /// Marks the device offline: entities flush unavailable and polling
    /// history resets.
    pub fn mark_offline(&self) {
        for entity in self.manager.entities() {
            entity.set_unavailable();
        }
        self.mark_reconnected();
    }
}

/// Digest bootstrap for `Appliance.System.All` responses.
///
/// The digest maps capability keys to their current state fragments;
/// routing each fragment through the matching handler creates the
/// entities for every reported channel before any per-namespace poll.
fn handle_system_all(manager: &EntityManager, _header: &crate::protocol::Header, payload: &Value) {
    let Some(digest) = payload
        .get("all")
        .and_then(|all| all.get("digest"))
        .and_then(Value::as_object)
    else {
        return;
    };
    for (digest_key, fragment) in digest {
        let Some(namespace) = digest_namespace(digest_key) else {
            tracing::debug!(
                device = %manager.name(),
                digest_key,
                "no digest parser for key"
            );
            continue;
        };
        let handler = match manager.handler(namespace) {
            Some(handler) => handler,
            None => match builtin_factory(namespace) {
                Some(factory) => NamespaceHandler::with_factory(manager, namespace, factory),
                None => NamespaceHandler::new(manager, namespace),
            },
        };
        handler.parse_generic(manager, fragment);
    }
}

/// Maps a digest key to the namespace whose handler parses its fragments.
fn digest_namespace(digest_key: &str) -> Option<&'static str> {
    match digest_key {
        "togglex" => Some(ns::CONTROL_TOGGLEX),
        "toggle" => Some(ns::CONTROL_TOGGLE),
        "fan" => Some(ns::CONTROL_FAN),
        _ => None,
    }
}

/// Built-in entity factories for namespaces with library-provided
/// entities.
fn builtin_factory(namespace: &str) -> Option<EntityFactory> {
    match namespace {
        ns::CONTROL_TOGGLEX | ns::CONTROL_TOGGLE | ns::HUB_TOGGLEX => {
            let bound: &'static str = ns::lookup(namespace)?.name;
            Some(Arc::new(move |manager: &EntityManager, channel| {
                let toggle = ToggleEntity::new(manager.event_bus().clone(), channel);
                let parse: ParseFn = {
                    let toggle = Arc::clone(&toggle);
                    Arc::new(move |payload| toggle.parse_togglex(payload))
                };
                let entity: Arc<dyn Entity> = toggle;
                manager.register_parser(bound, &entity, parse);
                entity
            }))
        }
        ns::CONTROL_FAN => Some(Arc::new(|manager: &EntityManager, channel| {
            let fan = crate::entity::FanEntity::new(manager.event_bus().clone(), channel);
            let parse: ParseFn = {
                let fan = Arc::clone(&fan);
                Arc::new(move |payload| fan.parse_fan(payload))
            };
            let entity: Arc<dyn Entity> = fan;
            manager.register_parser(ns::CONTROL_FAN, &entity, parse);
            entity
        })),
        _ => None,
    }
}

fn epoch_now() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::FanEntity;
    use parking_lot::Mutex;
    use serde_json::json;

    /// Records outgoing messages; answers with a canned ack when provided.
    struct MockTransport {
        sent: Mutex<Vec<Message>>,
        push_capable: bool,
        cloud: bool,
        size_limit: usize,
    }

    impl MockTransport {
        fn new() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                push_capable: false,
                cloud: false,
                size_limit: 3000,
            }
        }

        fn sent(&self) -> Vec<Message> {
            self.sent.lock().clone()
        }
    }

    impl Transport for MockTransport {
        async fn send(&self, message: Message) -> Result<Option<Message>, crate::error::ProtocolError> {
            self.sent.lock().push(message);
            Ok(None)
        }

        fn is_push_capable(&self) -> bool {
            self.push_capable
        }

        fn is_cloud(&self) -> bool {
            self.cloud
        }

        fn response_size_limit(&self) -> usize {
            self.size_limit
        }
    }

    fn push_message(namespace: &str, payload: Value) -> Message {
        Message {
            header: crate::protocol::Header {
                message_id: "abc".to_string(),
                method: Method::Push,
                from: "/appliance/test/publish".to_string(),
                namespace: namespace.to_string(),
                timestamp: 0,
                timestamp_ms: 0,
                sign: String::new(),
                payload_version: 1,
            },
            payload,
        }
    }

    #[test]
    fn digest_bootstraps_entities() {
        let device = Device::new("mss310", "key", MockTransport::new());

        device.handle_message(&push_message(
            ns::SYSTEM_ALL,
            json!({
                "all": {
                    "system": {"hardware": {"type": "mss310"}},
                    "digest": {
                        "togglex": [
                            {"channel": 0, "onoff": 1},
                            {"channel": 1, "onoff": 0}
                        ],
                        "fan": [{"channel": 0, "speed": 2, "maxSpeed": 4}]
                    }
                }
            }),
        ));

        let manager = device.manager();
        assert!(manager.entity("0_switch").is_some());
        assert!(manager.entity("1_switch").is_some());
        let fan = manager.entity("0_fan").unwrap();
        let fan = fan.as_any().downcast_ref::<FanEntity>().unwrap();
        assert_eq!(fan.percentage(), Some(50));
    }

    #[test]
    fn unknown_namespace_spawns_handler_lazily() {
        let device = Device::new("mss310", "key", MockTransport::new());
        assert!(device.manager().handler("Appliance.Vendor.NewThing").is_none());

        device.handle_message(&push_message(
            "Appliance.Vendor.NewThing",
            json!({"newThing": {"mode": 1}}),
        ));

        let handler = device.manager().handler("Appliance.Vendor.NewThing").unwrap();
        assert!(handler.last_response().is_some());
    }

    #[tokio::test]
    async fn poll_sends_default_and_batches_smart() {
        let device = Device::new("mss310", "key", MockTransport::new());
        // two smart-polled namespaces alongside the Default System.All
        NamespaceHandler::new(device.manager(), ns::SYSTEM_RUNTIME);
        NamespaceHandler::new(device.manager(), ns::SYSTEM_DNDMODE);

        device.poll(1000).await;

        let sent = device.transport().sent();
        // System.All directly, runtime+dndmode batched into one Multiple
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].header.namespace, ns::SYSTEM_ALL);
        assert_eq!(sent[1].header.namespace, ns::CONTROL_MULTIPLE);
        let inner = sent[1].payload["multiple"].as_array().unwrap();
        assert_eq!(inner.len(), 2);

        // the tick stamped every handler: an immediate second tick on a
        // pushless transport re-requests only zero-period namespaces
        let runtime = device.manager().handler(ns::SYSTEM_RUNTIME).unwrap();
        assert_eq!(runtime.last_request(), Some(1000));
    }

    #[tokio::test]
    async fn poll_splits_batches_over_size_ceiling() {
        let mut transport = MockTransport::new();
        transport.size_limit = 1000;
        let device = Device::new("hub", "key", transport);
        // three smart namespaces, each estimated well above half the limit
        for namespace in [ns::SYSTEM_RUNTIME, ns::SYSTEM_DNDMODE, ns::CONFIG_OVERTEMP] {
            let handler = NamespaceHandler::new(device.manager(), namespace);
            handler.set_item_count(0);
        }

        device.poll(5).await;

        let sent = device.transport().sent();
        // System.All individually, then 330+320 fits one batch (envelope
        // 300 + 650 <= 1000 fails -> splits): expect every request present
        let namespaces: Vec<_> = sent.iter().map(|m| m.header.namespace.clone()).collect();
        assert!(namespaces.contains(&ns::SYSTEM_ALL.to_string()));
        let total_polled: usize = sent
            .iter()
            .map(|m| match m.payload.get("multiple") {
                Some(inner) => inner.as_array().map_or(0, Vec::len),
                None => usize::from(m.header.namespace != ns::SYSTEM_ALL),
            })
            .sum();
        assert_eq!(total_polled, 3, "every smart namespace polled exactly once");
        assert!(sent.len() >= 3, "batch split under the ceiling");
    }

    #[tokio::test]
    async fn push_active_transport_suppresses_default_repoll() {
        let mut transport = MockTransport::new();
        transport.push_capable = true;
        let device = Device::new("mss310", "key", transport);

        device.poll(100).await;
        let first = device.transport().sent().len();
        assert!(first >= 1, "first tick resyncs System.All");

        device.poll(101).await;
        assert_eq!(
            device.transport().sent().len(),
            first,
            "push keeps System.All fresh; no re-poll"
        );

        device.mark_reconnected();
        device.poll(102).await;
        assert!(device.transport().sent().len() > first, "reconnect re-arms");
    }

    #[test]
    fn multiple_ack_unpacks_inner_messages() {
        let device = Device::new("mss310", "key", MockTransport::new());
        let signer = Signer::new("key", "app:test");
        let inner = signer.wrap(&Request {
            namespace: ns::CONTROL_TOGGLEX.to_string(),
            method: Method::GetAck,
            payload: json!({"togglex": [{"channel": 0, "onoff": 1}]}),
        });
        // togglex handler with factory so the inner ack creates the entity
        device.register_ability(ns::CONTROL_TOGGLEX);

        let mut ack = signer.wrap(&Request {
            namespace: ns::CONTROL_MULTIPLE.to_string(),
            method: Method::SetAck,
            payload: json!({ "multiple": [serde_json::to_value(&inner).unwrap()] }),
        });
        ack.header.method = Method::SetAck;
        device.handle_message(&ack);

        assert!(device.manager().entity("0_switch").is_some());
    }

    #[test]
    fn disabling_diagnostics_purges_sensors_and_strategies() {
        let device = Device::new("mss310", "key", MockTransport::new());
        let manager = device.manager();
        manager.set_create_diagnostic_entities(true);

        device.handle_message(&push_message(
            "Appliance.Vendor.NewThing",
            json!({"newThing": {"channel": 0, "mode": 3}}),
        ));
        assert!(manager.entity("0_newThing_mode").is_some());
        let handler = manager.handler("Appliance.Vendor.NewThing").unwrap();
        assert_eq!(
            handler.polling_strategy(),
            Some(PollingStrategy::Diagnostic)
        );

        manager.set_create_diagnostic_entities(false);
        assert!(manager.entity("0_newThing_mode").is_none());
        assert_eq!(handler.polling_strategy(), None);
    }
}
