// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MQTT transport for Meross devices.
//!
//! Requests are published to `/appliance/<uuid>/subscribe`; the device
//! answers on the app topic `/app/<app id>/subscribe` and emits unsolicited
//! PUSH updates on `/appliance/<uuid>/publish`. Acknowledgements are
//! correlated back to their request by the `messageId` header field.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rumqttc::{AsyncClient, EventLoop, MqttOptions, QoS};
use tokio::sync::{mpsc, oneshot};

use crate::error::ProtocolError;
use crate::protocol::{Message, Transport};

/// Counter for generating unique client IDs.
static CLIENT_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Configuration for the MQTT transport.
///
/// # Examples
///
/// ```
/// use meross_lib::protocol::MqttConfig;
///
/// let config = MqttConfig::new("mqtt://192.168.1.50:1883", "2301061234567890", "app:meross_lib")
///     .with_cloud(false);
/// ```
#[derive(Debug, Clone)]
pub struct MqttConfig {
    broker_url: String,
    device_uuid: String,
    app_id: String,
    credentials: Option<(String, String)>,
    keep_alive: Duration,
    request_timeout: Duration,
    cloud: bool,
}

impl MqttConfig {
    /// Default request timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Creates a configuration for the given broker, device uuid and app id.
    #[must_use]
    pub fn new(
        broker_url: impl Into<String>,
        device_uuid: impl Into<String>,
        app_id: impl Into<String>,
    ) -> Self {
        Self {
            broker_url: broker_url.into(),
            device_uuid: device_uuid.into(),
            app_id: app_id.into(),
            credentials: None,
            keep_alive: Duration::from_secs(30),
            request_timeout: Self::DEFAULT_TIMEOUT,
            cloud: true,
        }
    }

    /// Sets broker credentials.
    #[must_use]
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    /// Marks the broker as the vendor cloud relay (default) or a local one.
    #[must_use]
    pub fn with_cloud(mut self, cloud: bool) -> Self {
        self.cloud = cloud;
        self
    }

    /// Sets the per-request acknowledgement timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Connects and builds an `MqttTransport` from this configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the broker connection or subscriptions fail.
    pub async fn into_transport(self) -> Result<MqttTransport, ProtocolError> {
        MqttTransport::connect(self).await
    }
}

/// MQTT transport carrying signed envelopes through a broker.
///
/// Push-capable: besides request acknowledgements, the device publishes
/// unsolicited state updates which are delivered through
/// [`MqttTransport::take_push_receiver`].
#[derive(Debug)]
pub struct MqttTransport {
    client: AsyncClient,
    device_topic: String,
    pending: Arc<Mutex<HashMap<String, oneshot::Sender<Message>>>>,
    push_rx: Mutex<Option<mpsc::Receiver<Message>>>,
    request_timeout: Duration,
    cloud: bool,
}

impl MqttTransport {
    /// Connects to the broker and subscribes to the device topics.
    ///
    /// # Errors
    ///
    /// Returns error if the broker address is invalid or subscribing fails.
    pub async fn connect(config: MqttConfig) -> Result<Self, ProtocolError> {
        let (host, port) = parse_mqtt_url(&config.broker_url)?;

        let counter = CLIENT_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        let client_id = format!("meross_{}_{}", std::process::id(), counter);

        let mut mqtt_options = MqttOptions::new(&client_id, host, port);
        mqtt_options.set_keep_alive(config.keep_alive);
        mqtt_options.set_clean_session(true);
        if let Some((username, password)) = &config.credentials {
            mqtt_options.set_credentials(username, password);
        }

        let (client, event_loop) = AsyncClient::new(mqtt_options, 10);

        let pending: Arc<Mutex<HashMap<String, oneshot::Sender<Message>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let (push_tx, push_rx) = mpsc::channel::<Message>(64);

        // The device acks to the app topic and pushes to its own publish topic.
        let ack_topic = format!("/app/{}/subscribe", config.app_id);
        let push_topic = format!("/appliance/{}/publish", config.device_uuid);
        client
            .subscribe(&ack_topic, QoS::AtLeastOnce)
            .await
            .map_err(ProtocolError::Mqtt)?;
        client
            .subscribe(&push_topic, QoS::AtLeastOnce)
            .await
            .map_err(ProtocolError::Mqtt)?;

        let pending_clone = Arc::clone(&pending);
        tokio::spawn(async move {
            handle_mqtt_events(event_loop, pending_clone, push_tx).await;
        });

        Ok(Self {
            client,
            device_topic: format!("/appliance/{}/subscribe", config.device_uuid),
            pending,
            push_rx: Mutex::new(Some(push_rx)),
            request_timeout: config.request_timeout,
            cloud: config.cloud,
        })
    }

    /// Takes the receiver for unsolicited PUSH messages.
    ///
    /// Returns `None` if it has already been taken.
    #[must_use]
    pub fn take_push_receiver(&self) -> Option<mpsc::Receiver<Message>> {
        self.push_rx.lock().take()
    }
}

impl Transport for MqttTransport {
    async fn send(&self, message: Message) -> Result<Option<Message>, ProtocolError> {
        let message_id = message.header.message_id.clone();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(message_id.clone(), tx);

        tracing::debug!(
            topic = %self.device_topic,
            namespace = %message.header.namespace,
            method = %message.header.method,
            "publishing MQTT request"
        );
        if let Err(e) = self
            .client
            .publish(
                &self.device_topic,
                QoS::AtLeastOnce,
                false,
                message.to_json(),
            )
            .await
        {
            self.pending.lock().remove(&message_id);
            return Err(ProtocolError::Mqtt(e));
        }

        // Safe: timeout in practical use will never exceed u64::MAX milliseconds
        #[allow(clippy::cast_possible_truncation)]
        let timeout_ms = self.request_timeout.as_millis() as u64;
        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(ack)) => Ok(Some(ack)),
            Ok(Err(_)) => {
                self.pending.lock().remove(&message_id);
                Err(ProtocolError::ChannelClosed(
                    "acknowledgement channel closed".to_string(),
                ))
            }
            Err(_) => {
                self.pending.lock().remove(&message_id);
                Err(ProtocolError::Timeout(timeout_ms))
            }
        }
    }

    fn is_push_capable(&self) -> bool {
        true
    }

    fn is_cloud(&self) -> bool {
        self.cloud
    }
}

/// Parses an MQTT URL into host and port.
fn parse_mqtt_url(url: &str) -> Result<(String, u16), ProtocolError> {
    let url = url
        .strip_prefix("mqtt://")
        .or_else(|| url.strip_prefix("tcp://"))
        .unwrap_or(url);

    let (host, port) = if let Some((h, p)) = url.rsplit_once(':') {
        let port = p
            .parse()
            .map_err(|_| ProtocolError::InvalidAddress(format!("Invalid port: {p}")))?;
        (h.to_string(), port)
    } else {
        (url.to_string(), 1883)
    };

    Ok((host, port))
}

/// Handles MQTT events in the background, correlating acknowledgements by
/// messageId and forwarding everything else as push traffic.
async fn handle_mqtt_events(
    mut event_loop: EventLoop,
    pending: Arc<Mutex<HashMap<String, oneshot::Sender<Message>>>>,
    push_tx: mpsc::Sender<Message>,
) {
    use rumqttc::{Event, Packet};

    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                tracing::debug!(?connack, "MQTT connected");
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let Ok(text) = String::from_utf8(publish.payload.to_vec()) else {
                    continue;
                };
                match Message::from_json(&text) {
                    Ok(message) => {
                        let waiter = pending.lock().remove(&message.header.message_id);
                        if let Some(tx) = waiter {
                            let _ = tx.send(message);
                        } else {
                            let _ = push_tx.send(message).await;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(topic = %publish.topic, error = %e, "unparseable MQTT payload");
                    }
                }
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(error = %e, "MQTT event loop error");
                break;
            }
        }
    }
}
