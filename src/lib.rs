// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `Meross` Lib - A Rust library to bridge Meross smart appliances.
//!
//! This library translates the Meross device-control protocol (JSON
//! envelopes keyed by ability namespace, carried over local HTTP or broker
//! MQTT) into a channel/entity state model a home-automation host can
//! mirror.
//!
//! # Architecture
//!
//! - **Namespace registry**: every message belongs to an ability namespace
//!   (`Appliance.Control.ToggleX`, `Appliance.Control.Fan`, ...) with a
//!   well-known payload key and channel scoping.
//! - **Namespace handlers**: one per (device, namespace); route inbound
//!   payloads to per-channel entity parsers, auto-create entities for
//!   channels the device reports out of the blue, and decide per tick
//!   whether to poll.
//! - **Polling strategies**: push-driven namespaces poll only on
//!   reconnect; drifting state polls on a cadence (stricter through the
//!   vendor cloud); immutable data polls once. Smart polls batch into
//!   `Appliance.Control.Multiple` envelopes sized against the transport's
//!   response ceiling.
//! - **Entities** flush state snapshots through a broadcast
//!   [`EventBus`](event::EventBus) the host subscribes to.
//!
//! # Quick Start
//!
//! ```no_run
//! use meross_lib::device::Device;
//! use meross_lib::protocol::HttpTransport;
//!
//! #[tokio::main]
//! async fn main() -> meross_lib::Result<()> {
//!     let transport = HttpTransport::new("192.168.1.100")?;
//!     let device = Device::new("mss310-kitchen", "device-key", transport);
//!
//!     // watch entity state flushes
//!     let mut events = device.manager().event_bus().subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("{}: {:?}", event.entity_key, event.state);
//!         }
//!     });
//!
//!     // drive the poll loop; the first tick resynchronizes full state
//!     loop {
//!         device.poll(device.epoch()).await;
//!         tokio::time::sleep(std::time::Duration::from_secs(30)).await;
//!     }
//! }
//! ```
//!
//! ## MQTT devices
//!
//! ```no_run
//! use meross_lib::device::Device;
//! use meross_lib::protocol::{MqttConfig, MqttTransport};
//!
//! # async fn example() -> meross_lib::Result<()> {
//! let transport = MqttConfig::new("mqtt://192.168.1.50:1883", "2301061234", "app:bridge")
//!     .with_cloud(false)
//!     .into_transport()
//!     .await?;
//! let device = Device::new("msh300-hub", "device-key", transport);
//!
//! // unsolicited pushes flow back into the dispatch engine
//! let mut pushes = device.transport().take_push_receiver().unwrap();
//! while let Some(message) = pushes.recv().await {
//!     device.handle_message(&message);
//! }
//! # Ok(())
//! # }
//! ```

pub mod device;
pub mod entity;
pub mod error;
pub mod event;
pub mod handler;
pub mod namespace;
pub mod protocol;
pub mod types;

pub use device::{Device, EntityManager};
pub use entity::{DiagnosticSensor, Entity, FanEntity, HandlerBindings, ParseFn, ToggleEntity};
pub use error::{DeviceError, DispatchError, Error, ParseError, ProtocolError, Result, ValueError};
pub use event::{EntityEvent, EntityState, EventBus};
pub use handler::{
    DispatchMode, EntityFactory, NamespaceHandler, PollDecision, PollingConfig, PollingStrategy,
    RawHandler,
};
pub use namespace::{Namespace, NamespaceDef};
pub use protocol::{Header, Message, Method, MultipleRequest, Request, Route, Signer, Transport};
pub use types::{Channel, OnOff};
