// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Wire-level value types shared across the library.

use std::fmt;

use serde_json::Value;

use crate::error::ValueError;

/// An addressable sub-unit of a device namespace.
///
/// Multi-gang plugs expose one channel per relay, hubs one per sub-device.
/// Channel 0 addresses either the whole device or the single implicit
/// channel of legacy single-relay appliances.
///
/// # Examples
///
/// ```
/// use meross_lib::types::Channel;
///
/// let ch = Channel::new(2);
/// assert_eq!(ch.value(), 2);
/// assert_eq!(ch.to_string(), "2");
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct Channel(u32);

impl Channel {
    /// The implicit channel of single-relay appliances.
    pub const ZERO: Self = Self(0);

    /// Creates a channel from its wire index.
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Returns the wire index.
    #[must_use]
    pub const fn value(&self) -> u32 {
        self.0
    }

    /// Extracts a channel from a JSON payload value.
    ///
    /// # Errors
    ///
    /// Returns `ValueError::InvalidChannel` if the value is not an unsigned
    /// integer fitting `u32`.
    pub fn from_json(value: &Value) -> Result<Self, ValueError> {
        value
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .map(Self)
            .ok_or_else(|| ValueError::InvalidChannel(value.to_string()))
    }
}

impl From<u32> for Channel {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Binary on/off flag as Meross devices encode it (`"onoff": 0|1`).
///
/// # Examples
///
/// ```
/// use meross_lib::types::OnOff;
///
/// assert_eq!(OnOff::On.as_wire(), 1);
/// assert_eq!(OnOff::try_from(0).unwrap(), OnOff::Off);
/// assert!(OnOff::try_from(5).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum OnOff {
    /// The channel is off.
    Off,
    /// The channel is on.
    On,
}

impl OnOff {
    /// Returns the wire encoding (0 or 1).
    #[must_use]
    pub const fn as_wire(self) -> u8 {
        match self {
            Self::Off => 0,
            Self::On => 1,
        }
    }

    /// Returns true when on.
    #[must_use]
    pub const fn is_on(self) -> bool {
        matches!(self, Self::On)
    }
}

impl TryFrom<i64> for OnOff {
    type Error = ValueError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Off),
            1 => Ok(Self::On),
            other => Err(ValueError::InvalidOnOff(other)),
        }
    }
}

impl From<bool> for OnOff {
    fn from(value: bool) -> Self {
        if value { Self::On } else { Self::Off }
    }
}

impl fmt::Display for OnOff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Off => write!(f, "off"),
            Self::On => write!(f, "on"),
        }
    }
}
