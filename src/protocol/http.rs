// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Local HTTP transport for Meross devices.
//!
//! Meross appliances expose a single LAN endpoint, `POST /config`, accepting
//! the same signed JSON envelopes as the MQTT path. HTTP is request/response
//! only: no unsolicited pushes, and responses truncate on some firmwares
//! once they grow past roughly 3000 bytes.

use std::time::Duration;

use reqwest::Client;

use crate::error::ProtocolError;
use crate::protocol::{Message, Method, Transport};

/// Configuration for the local HTTP transport.
///
/// # Examples
///
/// ```
/// use meross_lib::protocol::HttpConfig;
/// use std::time::Duration;
///
/// let config = HttpConfig::new("192.168.1.100")
///     .with_port(8080)
///     .with_timeout(Duration::from_secs(5));
/// assert_eq!(config.endpoint(), "http://192.168.1.100:8080/config");
/// ```
#[derive(Debug, Clone)]
pub struct HttpConfig {
    host: String,
    port: u16,
    timeout: Duration,
}

impl HttpConfig {
    /// Default HTTP port.
    pub const DEFAULT_PORT: u16 = 80;
    /// Default request timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Creates a configuration for the given host.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: Self::DEFAULT_PORT,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// Sets a custom port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the host.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Builds the device endpoint URL.
    #[must_use]
    pub fn endpoint(&self) -> String {
        if self.port == Self::DEFAULT_PORT {
            format!("http://{}/config", self.host)
        } else {
            format!("http://{}:{}/config", self.host, self.port)
        }
    }

    /// Creates an `HttpTransport` from this configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be created.
    pub fn into_transport(self) -> Result<HttpTransport, ProtocolError> {
        let client = Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(ProtocolError::Http)?;
        Ok(HttpTransport {
            endpoint: self.endpoint(),
            client,
        })
    }
}

/// HTTP transport speaking the LAN `/config` endpoint.
///
/// # Examples
///
/// ```no_run
/// use meross_lib::protocol::{HttpTransport, Signer, Request, Transport};
/// use serde_json::json;
///
/// # async fn example() -> Result<(), meross_lib::error::ProtocolError> {
/// let transport = HttpTransport::new("192.168.1.100")?;
/// let signer = Signer::new("device-key", "app:meross_lib");
/// let message = signer.wrap(&Request::get("Appliance.System.All", json!({"all": {}})));
/// let ack = transport.send(message).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct HttpTransport {
    endpoint: String,
    client: Client,
}

impl HttpTransport {
    /// Observed truncation point for LAN responses on legacy firmware.
    pub const RESPONSE_SIZE_LIMIT: usize = 3000;

    /// Creates a transport with default configuration for the given host.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be created.
    pub fn new(host: impl Into<String>) -> Result<Self, ProtocolError> {
        HttpConfig::new(host).into_transport()
    }

    /// Returns the device endpoint URL.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Transport for HttpTransport {
    async fn send(&self, message: Message) -> Result<Option<Message>, ProtocolError> {
        tracing::debug!(
            namespace = %message.header.namespace,
            method = %message.header.method,
            "HTTP request"
        );
        let response = self
            .client
            .post(&self.endpoint)
            .json(&message)
            .send()
            .await
            .map_err(ProtocolError::Http)?
            .error_for_status()
            .map_err(ProtocolError::Http)?;

        let ack: Message = response.json().await.map_err(ProtocolError::Http)?;
        if ack.header.method == Method::Error {
            return Err(ProtocolError::DeviceError(ack.payload.to_string()));
        }
        Ok(Some(ack))
    }

    fn response_size_limit(&self) -> usize {
        Self::RESPONSE_SIZE_LIMIT
    }
}
