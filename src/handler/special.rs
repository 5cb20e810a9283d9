// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Handler specializations for single-entity and ignored namespaces.

use std::sync::Arc;

use serde_json::Value;

use crate::device::EntityManager;
use crate::entity::{Entity, ParseFn};
use crate::handler::{CustomRouting, DispatchMode, NamespaceHandler, PollingStrategy, RawHandler};
use crate::namespace::NamespaceDef;

/// Creates a handler for a namespace that maps to exactly one entity.
///
/// Routing skips the per-channel machinery: the payload body is delivered
/// straight to the entity's parse callback. Polling is entity-bound, so
/// the namespace stops being queried while the entity is disabled.
///
/// # Panics
///
/// Panics if the device already has a handler for this namespace.
pub fn entity_bound(
    manager: &EntityManager,
    namespace: &str,
    entity: &Arc<dyn Entity>,
    parse: ParseFn,
) -> Arc<NamespaceHandler> {
    let def = NamespaceDef::resolve(namespace);
    let raw: RawHandler = {
        let key = def.key;
        Arc::new(move |_manager: &EntityManager, _header, payload: &Value| {
            if let Some(body) = payload.get(&key).and_then(Value::as_object) {
                parse(body);
            }
        })
    };
    let handler = NamespaceHandler::build(
        manager,
        namespace,
        CustomRouting::Handler(raw),
        DispatchMode::Custom,
        None,
        Some(Arc::clone(entity)),
    );
    entity.bindings().add(namespace);
    handler.set_polling_strategy(Some(PollingStrategy::EntityBound));
    handler
}

/// Creates a handler for a namespace the device intentionally ignores.
///
/// Distinguishes "known but unprocessed" from "truly unknown": the void
/// handler swallows messages without the undefined-namespace logging or
/// diagnostic expansion.
///
/// # Panics
///
/// Panics if the device already has a handler for this namespace.
pub fn void(manager: &EntityManager, namespace: &str) -> Arc<NamespaceHandler> {
    NamespaceHandler::build(
        manager,
        namespace,
        CustomRouting::Void,
        DispatchMode::Custom,
        None,
        None,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::DiagnosticSensor;
    use crate::handler::{PollDecision, polling};
    use crate::namespace;
    use crate::protocol::{Header, Method};
    use serde_json::json;

    fn push_header(ns_name: &str) -> Header {
        Header {
            message_id: "0123".to_string(),
            method: Method::Push,
            from: "/appliance/test/publish".to_string(),
            namespace: ns_name.to_string(),
            timestamp: 0,
            timestamp_ms: 0,
            sign: String::new(),
            payload_version: 1,
        }
    }

    #[test]
    fn entity_bound_routes_payload_to_entity() {
        let manager = EntityManager::new("msl120-test");
        let sensor = DiagnosticSensor::new(
            manager.event_bus().clone(),
            None,
            "DNDMode_mode",
            json!(null),
        );
        let entity: Arc<dyn Entity> = Arc::clone(&sensor) as Arc<dyn Entity>;
        let parse: ParseFn = {
            let sensor = Arc::clone(&sensor);
            Arc::new(move |payload| {
                if let Some(mode) = payload.get("mode") {
                    sensor.update_native_value(mode);
                }
            })
        };
        let handler = entity_bound(&manager, namespace::SYSTEM_DNDMODE, &entity, parse);

        handler.handle(
            &manager,
            &push_header(namespace::SYSTEM_DNDMODE),
            &json!({"DNDMode": {"mode": 1}}),
        );
        assert_eq!(sensor.native_value(), json!(1));
        assert_eq!(
            entity.bindings().namespaces(),
            vec![namespace::SYSTEM_DNDMODE.to_string()]
        );
    }

    #[test]
    fn entity_bound_polling_skips_disabled_entity() {
        let manager = EntityManager::new("msl120-test");
        let sensor =
            DiagnosticSensor::new(manager.event_bus().clone(), None, "overTemp_enable", json!(0));
        let entity: Arc<dyn Entity> = sensor;
        let handler = entity_bound(&manager, namespace::CONFIG_OVERTEMP, &entity, Arc::new(|_| {}));
        assert_eq!(
            handler.polling_strategy(),
            Some(PollingStrategy::EntityBound)
        );

        // diagnostic sensors start disabled: no poll
        assert_eq!(handler.poll_decision(0, false, false), PollDecision::Skip);

        entity.set_enabled(true);
        assert_eq!(
            handler.poll_decision(0, false, false),
            PollDecision::BatchRequest
        );
        handler.mark_request(0);

        // smart cadence applies once requested
        let cloud = polling::CLOUD_UPDATE_PERIOD.as_secs();
        assert_eq!(handler.poll_decision(1, false, true), PollDecision::Skip);
        assert_eq!(
            handler.poll_decision(cloud, false, true),
            PollDecision::BatchRequest
        );
    }

    #[test]
    fn void_suppresses_diagnostic_expansion() {
        let manager = EntityManager::new("msl120-test");
        manager.set_create_diagnostic_entities(true);
        let handler = void(&manager, namespace::CONTROL_BIND);

        handler.handle(
            &manager,
            &push_header(namespace::CONTROL_BIND),
            &json!({"bind": {"bindTime": 1234567}}),
        );

        assert_eq!(manager.entities_len(), 0, "void namespaces expand nothing");
        assert_eq!(handler.polling_strategy(), None);
    }
}
