// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the `meross_lib` library.
//!
//! This module provides the error hierarchy for failures across the library:
//! wire-value validation, protocol communication, JSON parsing, device
//! operations and payload dispatch.

use thiserror::Error;

/// The main error type for this library.
///
/// This enum encompasses all possible errors that can occur when interacting
/// with Meross devices.
#[derive(Debug, Error)]
pub enum Error {
    /// Error occurred during value validation.
    #[error("value error: {0}")]
    Value(#[from] ValueError),

    /// Error occurred during protocol communication.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Error occurred while parsing a message.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// Error occurred during device operations.
    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    /// Device is not connected.
    #[error("device is not connected")]
    NotConnected,
}

/// Errors related to wire-value validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValueError {
    /// A channel identifier is not a valid unsigned integer.
    #[error("invalid channel identifier: {0}")]
    InvalidChannel(String),

    /// An onoff flag is neither 0 nor 1.
    #[error("invalid onoff value: {0}")]
    InvalidOnOff(i64),
}

/// Errors related to protocol communication (HTTP/MQTT).
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// HTTP request failed.
    #[cfg(feature = "http")]
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// MQTT connection or communication failed.
    #[cfg(feature = "mqtt")]
    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    /// Connection to the device failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Request timed out.
    #[error("request timed out after {0} ms")]
    Timeout(u64),

    /// Invalid URL or address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// The device answered with an ERROR method.
    #[error("device reported error: {0}")]
    DeviceError(String),

    /// Internal channel was closed.
    #[error("channel closed: {0}")]
    ChannelClosed(String),
}

/// Errors related to parsing Meross messages.
#[derive(Debug, Error)]
pub enum ParseError {
    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// Expected field is missing from the message.
    #[error("missing field in message: {0}")]
    MissingField(String),

    /// Unexpected message format.
    #[error("unexpected message format: {0}")]
    UnexpectedFormat(String),
}

/// Errors related to device operations.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Device does not support the requested ability namespace.
    #[error("device does not support {namespace}")]
    UnsupportedNamespace {
        /// The namespace that is not supported.
        namespace: String,
    },

    /// Device is not connected.
    #[error("device is not connected")]
    NotConnected,

    /// Device configuration is invalid.
    #[error("invalid device configuration: {0}")]
    InvalidConfiguration(String),
}

/// Classified outcome of routing a namespace payload to entity parsers.
///
/// `ShapeMismatch` is data rather than failure: it drives the sticky
/// dispatch-mode downgrade. The remaining variants are contained at the
/// dispatch boundary, logged, and never escape into message processing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The payload under the namespace key is not the shape the current
    /// dispatch mode expects (e.g. a dict where a list was assumed).
    #[error("payload shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch {
        /// The shape the dispatch mode was optimized for.
        expected: &'static str,
        /// The shape actually found.
        got: &'static str,
    },

    /// The payload does not carry the namespace key at all.
    #[error("missing namespace key: {0}")]
    MissingKey(String),

    /// A per-channel payload carries no channel identifier where one is
    /// required. Must never silently create a phantom entity.
    #[error("payload carries no channel identifier")]
    MissingChannel,

    /// A channel was addressed for which no entity is registered and no
    /// entity factory is bound.
    #[error("no entity registered for channel {0} and no factory bound")]
    UnknownChannel(u32),

    /// The bound entity factory produced an entity that did not register
    /// the addressed channel.
    #[error("entity factory did not register channel {0}")]
    FactoryMiss(u32),
}

/// A specialized Result type for this library.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_error_display() {
        let err = ValueError::InvalidOnOff(3);
        assert_eq!(err.to_string(), "invalid onoff value: 3");
    }

    #[test]
    fn error_from_value_error() {
        let value_err = ValueError::InvalidOnOff(2);
        let err: Error = value_err.into();
        assert!(matches!(err, Error::Value(ValueError::InvalidOnOff(2))));
    }

    #[test]
    fn parse_error_display() {
        let err = ParseError::MissingField("togglex".to_string());
        assert_eq!(err.to_string(), "missing field in message: togglex");
    }

    #[test]
    fn dispatch_error_display() {
        let err = DispatchError::ShapeMismatch {
            expected: "list",
            got: "dict",
        };
        assert_eq!(
            err.to_string(),
            "payload shape mismatch: expected list, got dict"
        );
    }

    #[test]
    fn device_error_display() {
        let err = DeviceError::UnsupportedNamespace {
            namespace: "Appliance.Control.Fan".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "device does not support Appliance.Control.Fan"
        );
    }
}
