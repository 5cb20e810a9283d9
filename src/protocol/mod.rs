// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Message framing and transports for the Meross protocol.
//!
//! Every exchange is a JSON envelope of `header` + `payload`. The header
//! carries the ability namespace, the method verb and an md5 signature over
//! `messageId + key + timestamp`, where `key` is the device's shared secret.
//!
//! Two transports carry these envelopes:
//!
//! - [`HttpTransport`]: signed POST to `http://<host>/config` on the LAN
//! - [`MqttTransport`]: publish/subscribe through the cloud broker
//!
//! Transports implement the [`Transport`] trait, the seam the device façade
//! polls and requests through.

#[cfg(feature = "http")]
mod http;
#[cfg(feature = "mqtt")]
mod mqtt;

#[cfg(feature = "http")]
pub use http::{HttpConfig, HttpTransport};
#[cfg(feature = "mqtt")]
pub use mqtt::{MqttConfig, MqttTransport};

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{ParseError, ProtocolError};
use crate::namespace;

/// Method verb of a Meross message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Method {
    /// Query state.
    #[serde(rename = "GET")]
    Get,
    /// Response to a GET.
    #[serde(rename = "GETACK")]
    GetAck,
    /// Change state.
    #[serde(rename = "SET")]
    Set,
    /// Response to a SET.
    #[serde(rename = "SETACK")]
    SetAck,
    /// Unsolicited device-originated update.
    #[serde(rename = "PUSH")]
    Push,
    /// Device-reported failure.
    #[serde(rename = "ERROR")]
    Error,
}

impl Method {
    /// Returns true for the acknowledgement verbs.
    #[must_use]
    pub const fn is_ack(self) -> bool {
        matches!(self, Self::GetAck | Self::SetAck)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Get => "GET",
            Self::GetAck => "GETACK",
            Self::Set => "SET",
            Self::SetAck => "SETACK",
            Self::Push => "PUSH",
            Self::Error => "ERROR",
        };
        write!(f, "{s}")
    }
}

/// Header of a Meross message envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Header {
    /// Correlation id, echoed back in acknowledgements.
    pub message_id: String,
    /// Method verb.
    pub method: Method,
    /// Originator identifier (app id or reply topic).
    #[serde(default)]
    pub from: String,
    /// Ability namespace this message belongs to.
    pub namespace: String,
    /// Unix epoch seconds at signing time.
    pub timestamp: i64,
    /// Millisecond remainder of the signing time.
    #[serde(default)]
    pub timestamp_ms: i64,
    /// md5 over `message_id + key + timestamp`, lowercase hex.
    pub sign: String,
    /// Protocol payload version, always 1 on current firmware.
    pub payload_version: i32,
}

impl Header {
    /// Verifies the signature against the given device key.
    #[must_use]
    pub fn verify(&self, key: &str) -> bool {
        self.sign == compute_sign(&self.message_id, key, self.timestamp)
    }
}

/// A full message envelope: header plus namespace payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// The message header.
    pub header: Header,
    /// The namespace payload.
    pub payload: Value,
}

impl Message {
    /// Parses a message from raw JSON text.
    ///
    /// # Errors
    ///
    /// Returns error if the text is not a valid message envelope.
    pub fn from_json(text: &str) -> Result<Self, ParseError> {
        serde_json::from_str(text).map_err(ParseError::Json)
    }

    /// Serializes the message to JSON text.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// An unsigned request template: namespace, method and payload.
///
/// This is what polling strategies and entities produce; a [`Signer`] turns
/// it into a wire [`Message`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Ability namespace addressed by the request.
    pub namespace: String,
    /// Method verb (GET or SET for outgoing requests).
    pub method: Method,
    /// Namespace payload.
    pub payload: Value,
}

impl Request {
    /// Creates a GET request.
    #[must_use]
    pub fn get(namespace: impl Into<String>, payload: Value) -> Self {
        Self {
            namespace: namespace.into(),
            method: Method::Get,
            payload,
        }
    }

    /// Creates a SET request.
    #[must_use]
    pub fn set(namespace: impl Into<String>, payload: Value) -> Self {
        Self {
            namespace: namespace.into(),
            method: Method::Set,
            payload,
        }
    }
}

fn compute_sign(message_id: &str, key: &str, timestamp: i64) -> String {
    let digest = md5::compute(format!("{message_id}{key}{timestamp}").as_bytes());
    format!("{digest:x}")
}

/// Signs request templates into wire messages with the device key.
#[derive(Debug, Clone)]
pub struct Signer {
    key: String,
    origin: String,
}

impl Signer {
    /// Creates a signer for the given device key and originator id.
    #[must_use]
    pub fn new(key: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            origin: origin.into(),
        }
    }

    /// Returns the device key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Wraps a request template into a signed message envelope.
    #[must_use]
    pub fn wrap(&self, request: &Request) -> Message {
        let message_id = uuid::Uuid::new_v4().simple().to_string();
        let now = chrono::Utc::now();
        let timestamp = now.timestamp();
        let sign = compute_sign(&message_id, &self.key, timestamp);
        Message {
            header: Header {
                message_id,
                method: request.method,
                from: self.origin.clone(),
                namespace: request.namespace.clone(),
                timestamp,
                timestamp_ms: i64::from(now.timestamp_subsec_millis()),
                sign,
                payload_version: 1,
            },
            payload: request.payload.clone(),
        }
    }
}

/// Which transport route to use for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Route {
    /// Let the transport pick its active route.
    #[default]
    Auto,
    /// Force the local HTTP route.
    Http,
    /// Force the broker MQTT route.
    Mqtt,
}

/// Seam between the dispatch/polling engine and the wire.
///
/// Implementations carry signed message envelopes to the device and hand
/// back the acknowledgement, or `None` when the transport cannot correlate
/// one (fire-and-forget publish).
#[allow(async_fn_in_trait)]
pub trait Transport: Send + Sync {
    /// Sends a message and returns the device acknowledgement when available.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError` if the message cannot be delivered.
    async fn send(&self, message: Message) -> Result<Option<Message>, ProtocolError>;

    /// Sends forcing a specific route; single-route transports ignore the
    /// hint.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError` if the message cannot be delivered.
    async fn send_via(
        &self,
        _route: Route,
        message: Message,
    ) -> Result<Option<Message>, ProtocolError> {
        self.send(message).await
    }

    /// Whether the transport delivers unsolicited device pushes.
    fn is_push_capable(&self) -> bool {
        false
    }

    /// Whether requests are relayed through the vendor cloud.
    fn is_cloud(&self) -> bool {
        false
    }

    /// Largest response payload the transport reliably carries.
    ///
    /// Local HTTP truncates around 3000 bytes; hubs with many sub-devices
    /// have been seen to truncate around 4000. Broker MQTT is effectively
    /// unbounded for our payloads.
    fn response_size_limit(&self) -> usize {
        65536
    }
}

/// Accumulates namespace GETs into `Appliance.Control.Multiple` batches,
/// bounded by the estimated aggregate response size.
///
/// Pushing a request whose estimate would exceed the ceiling is the
/// caller's signal to flush first; a batch of one collapses back into the
/// plain request.
#[derive(Debug)]
pub struct MultipleRequest {
    requests: Vec<Request>,
    estimated_size: usize,
    ceiling: usize,
}

impl MultipleRequest {
    /// Envelope overhead of the Multiple wrapper itself.
    const ENVELOPE_SIZE: usize = 300;

    /// Creates an empty batch bounded by `ceiling` bytes.
    #[must_use]
    pub fn new(ceiling: usize) -> Self {
        Self {
            requests: Vec::new(),
            estimated_size: Self::ENVELOPE_SIZE,
            ceiling,
        }
    }

    /// Whether a response of `estimate` bytes still fits this batch.
    #[must_use]
    pub fn fits(&self, estimate: usize) -> bool {
        self.requests.is_empty() || self.estimated_size + estimate <= self.ceiling
    }

    /// Adds a request with its estimated response size.
    pub fn push(&mut self, request: Request, estimate: usize) {
        self.estimated_size += estimate;
        self.requests.push(request);
    }

    /// Number of batched requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Whether the batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Drains the batch into a single wire request.
    ///
    /// Returns `None` when empty; the plain request when only one was
    /// batched; otherwise a `Appliance.Control.Multiple` SET whose payload
    /// carries the signed inner messages.
    #[must_use]
    pub fn into_request(self, signer: &Signer) -> Option<Request> {
        match self.requests.len() {
            0 => None,
            1 => self.requests.into_iter().next(),
            _ => {
                let inner: Vec<Value> = self
                    .requests
                    .iter()
                    .map(|r| {
                        serde_json::to_value(signer.wrap(r)).unwrap_or_else(|_| json!(null))
                    })
                    .collect();
                Some(Request::set(
                    namespace::CONTROL_MULTIPLE,
                    json!({ "multiple": inner }),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn method_wire_spelling() {
        assert_eq!(serde_json::to_value(Method::GetAck).unwrap(), json!("GETACK"));
        assert_eq!(
            serde_json::from_value::<Method>(json!("PUSH")).unwrap(),
            Method::Push
        );
    }

    #[test]
    fn signer_produces_verifiable_header() {
        let signer = Signer::new("secret", "app:test");
        let msg = signer.wrap(&Request::get(namespace::SYSTEM_ALL, json!({"all": {}})));

        assert_eq!(msg.header.namespace, namespace::SYSTEM_ALL);
        assert_eq!(msg.header.method, Method::Get);
        assert_eq!(msg.header.sign.len(), 32);
        assert!(msg.header.sign.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(msg.header.verify("secret"));
        assert!(!msg.header.verify("wrong"));
    }

    #[test]
    fn message_round_trip() {
        let signer = Signer::new("k", "app:test");
        let msg = signer.wrap(&Request::get(
            namespace::CONTROL_TOGGLEX,
            json!({"togglex": [{"channel": 0}]}),
        ));
        let parsed = Message::from_json(&msg.to_json()).unwrap();
        assert_eq!(parsed.header.message_id, msg.header.message_id);
        assert_eq!(parsed.payload, msg.payload);
    }

    #[test]
    fn multiple_collapses_single_request() {
        let signer = Signer::new("k", "app:test");
        let mut batch = MultipleRequest::new(3000);
        let req = Request::get(namespace::SYSTEM_RUNTIME, json!({"runtime": {}}));
        batch.push(req.clone(), 330);

        assert_eq!(batch.into_request(&signer), Some(req));
    }

    #[test]
    fn multiple_wraps_batch() {
        let signer = Signer::new("k", "app:test");
        let mut batch = MultipleRequest::new(3000);
        batch.push(Request::get(namespace::SYSTEM_RUNTIME, json!({"runtime": {}})), 330);
        batch.push(
            Request::get(namespace::SYSTEM_DNDMODE, json!({"DNDMode": {}})),
            320,
        );

        let wrapped = batch.into_request(&signer).unwrap();
        assert_eq!(wrapped.namespace, namespace::CONTROL_MULTIPLE);
        assert_eq!(wrapped.method, Method::Set);
        let inner = wrapped.payload["multiple"].as_array().unwrap();
        assert_eq!(inner.len(), 2);
        assert_eq!(inner[0]["header"]["namespace"], namespace::SYSTEM_RUNTIME);
    }

    #[test]
    fn multiple_tracks_capacity() {
        let mut batch = MultipleRequest::new(1000);
        assert!(batch.fits(5000), "first request always fits");
        batch.push(Request::get(namespace::SYSTEM_RUNTIME, json!({})), 400);
        assert!(batch.fits(300));
        assert!(!batch.fits(301));
    }
}
