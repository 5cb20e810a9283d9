// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Static registry of Meross ability namespaces.
//!
//! Every message a device sends or accepts is keyed by a namespace string
//! identifying one functional capability (`Appliance.Control.ToggleX`,
//! `Appliance.Control.Fan`, ...). Each namespace carries its payload under a
//! well-known key and is either channel-scoped (payload is a list of
//! per-channel objects) or device-scoped.
//!
//! The registry is a read-only table built once at first use. Lookups for a
//! recognized namespace never fail; unrecognized namespaces resolve to a
//! synthesized descriptor whose payload key is derived from the last
//! dot-segment of the name.

use std::collections::HashMap;
use std::sync::OnceLock;

use serde_json::{Value, json};

/// JSON key carrying the channel identifier in per-channel payloads.
pub const KEY_CHANNEL: &str = "channel";
/// JSON key carrying the onoff flag in toggle payloads.
pub const KEY_ONOFF: &str = "onoff";

pub const SYSTEM_ALL: &str = "Appliance.System.All";
pub const SYSTEM_ABILITY: &str = "Appliance.System.Ability";
pub const SYSTEM_CLOCK: &str = "Appliance.System.Clock";
pub const SYSTEM_DEBUG: &str = "Appliance.System.Debug";
pub const SYSTEM_DNDMODE: &str = "Appliance.System.DNDMode";
pub const SYSTEM_ONLINE: &str = "Appliance.System.Online";
pub const SYSTEM_REPORT: &str = "Appliance.System.Report";
pub const SYSTEM_RUNTIME: &str = "Appliance.System.Runtime";
pub const CONFIG_OVERTEMP: &str = "Appliance.Config.OverTemp";
pub const CONTROL_BIND: &str = "Appliance.Control.Bind";
pub const CONTROL_CONSUMPTIONX: &str = "Appliance.Control.ConsumptionX";
pub const CONTROL_ELECTRICITY: &str = "Appliance.Control.Electricity";
pub const CONTROL_FAN: &str = "Appliance.Control.Fan";
pub const CONTROL_FILTERMAINTENANCE: &str = "Appliance.Control.FilterMaintenance";
pub const CONTROL_LIGHT: &str = "Appliance.Control.Light";
pub const CONTROL_LIGHT_EFFECT: &str = "Appliance.Control.Light.Effect";
pub const CONTROL_MP3: &str = "Appliance.Control.Mp3";
pub const CONTROL_MULTIPLE: &str = "Appliance.Control.Multiple";
pub const CONTROL_PHYSICALLOCK: &str = "Appliance.Control.PhysicalLock";
pub const CONTROL_SCREEN_BRIGHTNESS: &str = "Appliance.Control.Screen.Brightness";
pub const CONTROL_SPRAY: &str = "Appliance.Control.Spray";
pub const CONTROL_TOGGLE: &str = "Appliance.Control.Toggle";
pub const CONTROL_TOGGLEX: &str = "Appliance.Control.ToggleX";
pub const THERMOSTAT_CALIBRATION: &str = "Appliance.Control.Thermostat.Calibration";
pub const THERMOSTAT_DEADZONE: &str = "Appliance.Control.Thermostat.DeadZone";
pub const THERMOSTAT_FROST: &str = "Appliance.Control.Thermostat.Frost";
pub const THERMOSTAT_MODE: &str = "Appliance.Control.Thermostat.Mode";
pub const THERMOSTAT_OVERHEAT: &str = "Appliance.Control.Thermostat.Overheat";
pub const THERMOSTAT_SCHEDULE: &str = "Appliance.Control.Thermostat.Schedule";
pub const THERMOSTAT_SCHEDULEB: &str = "Appliance.Control.Thermostat.ScheduleB";
pub const THERMOSTAT_SENSOR: &str = "Appliance.Control.Thermostat.Sensor";
pub const GARAGEDOOR_CONFIG: &str = "Appliance.GarageDoor.Config";
pub const GARAGEDOOR_MULTIPLECONFIG: &str = "Appliance.GarageDoor.MultipleConfig";
pub const GARAGEDOOR_STATE: &str = "Appliance.GarageDoor.State";
pub const HUB_BATTERY: &str = "Appliance.Hub.Battery";
pub const HUB_MTS100_ADJUST: &str = "Appliance.Hub.Mts100.Adjust";
pub const HUB_MTS100_ALL: &str = "Appliance.Hub.Mts100.All";
pub const HUB_MTS100_SCHEDULEB: &str = "Appliance.Hub.Mts100.ScheduleB";
pub const HUB_ONLINE: &str = "Appliance.Hub.Online";
pub const HUB_SENSOR_ADJUST: &str = "Appliance.Hub.Sensor.Adjust";
pub const HUB_SENSOR_ALL: &str = "Appliance.Hub.Sensor.All";
pub const HUB_SUBDEVICE_VERSION: &str = "Appliance.Hub.SubDevice.Version";
pub const HUB_TOGGLEX: &str = "Appliance.Hub.ToggleX";
pub const ROLLERSHUTTER_ADJUST: &str = "Appliance.RollerShutter.Adjust";
pub const ROLLERSHUTTER_CONFIG: &str = "Appliance.RollerShutter.Config";
pub const ROLLERSHUTTER_POSITION: &str = "Appliance.RollerShutter.Position";
pub const ROLLERSHUTTER_STATE: &str = "Appliance.RollerShutter.State";

/// Descriptor for one ability namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Namespace {
    /// Fully qualified namespace name.
    pub name: &'static str,
    /// Key carrying the payload body in requests and responses.
    pub key: &'static str,
    /// Whether payloads are scoped per channel (list of channel objects).
    pub need_channel: bool,
}

macro_rules! ns {
    ($name:expr, $key:expr) => {
        Namespace {
            name: $name,
            key: $key,
            need_channel: false,
        }
    };
    ($name:expr, $key:expr, channel) => {
        Namespace {
            name: $name,
            key: $key,
            need_channel: true,
        }
    };
}

/// The static namespace catalog.
static NAMESPACES: &[Namespace] = &[
    ns!(SYSTEM_ALL, "all"),
    ns!(SYSTEM_ABILITY, "ability"),
    ns!(SYSTEM_CLOCK, "clock"),
    ns!(SYSTEM_DEBUG, "debug"),
    ns!(SYSTEM_DNDMODE, "DNDMode"),
    ns!(SYSTEM_ONLINE, "online"),
    ns!(SYSTEM_REPORT, "report"),
    ns!(SYSTEM_RUNTIME, "runtime"),
    ns!(CONFIG_OVERTEMP, "overTemp"),
    ns!(CONTROL_BIND, "bind"),
    ns!(CONTROL_CONSUMPTIONX, "consumptionx"),
    ns!(CONTROL_ELECTRICITY, "electricity"),
    ns!(CONTROL_FAN, "fan", channel),
    ns!(CONTROL_FILTERMAINTENANCE, "filter", channel),
    ns!(CONTROL_LIGHT, "light"),
    ns!(CONTROL_LIGHT_EFFECT, "effect"),
    ns!(CONTROL_MP3, "mp3"),
    ns!(CONTROL_MULTIPLE, "multiple"),
    ns!(CONTROL_PHYSICALLOCK, "lock", channel),
    ns!(CONTROL_SCREEN_BRIGHTNESS, "brightness", channel),
    ns!(CONTROL_SPRAY, "spray", channel),
    ns!(CONTROL_TOGGLE, "toggle"),
    ns!(CONTROL_TOGGLEX, "togglex", channel),
    ns!(THERMOSTAT_CALIBRATION, "calibration", channel),
    ns!(THERMOSTAT_DEADZONE, "deadZone", channel),
    ns!(THERMOSTAT_FROST, "frost", channel),
    ns!(THERMOSTAT_MODE, "mode", channel),
    ns!(THERMOSTAT_OVERHEAT, "overheat", channel),
    ns!(THERMOSTAT_SCHEDULE, "schedule", channel),
    ns!(THERMOSTAT_SCHEDULEB, "scheduleB", channel),
    ns!(THERMOSTAT_SENSOR, "sensor", channel),
    ns!(GARAGEDOOR_CONFIG, "config"),
    ns!(GARAGEDOOR_MULTIPLECONFIG, "config", channel),
    ns!(GARAGEDOOR_STATE, "state", channel),
    ns!(HUB_BATTERY, "battery", channel),
    ns!(HUB_MTS100_ADJUST, "adjust", channel),
    ns!(HUB_MTS100_ALL, "all", channel),
    ns!(HUB_MTS100_SCHEDULEB, "schedule", channel),
    ns!(HUB_ONLINE, "online", channel),
    ns!(HUB_SENSOR_ADJUST, "adjust", channel),
    ns!(HUB_SENSOR_ALL, "all", channel),
    ns!(HUB_SUBDEVICE_VERSION, "version", channel),
    ns!(HUB_TOGGLEX, "togglex", channel),
    ns!(ROLLERSHUTTER_ADJUST, "adjust", channel),
    ns!(ROLLERSHUTTER_CONFIG, "config", channel),
    ns!(ROLLERSHUTTER_POSITION, "position", channel),
    ns!(ROLLERSHUTTER_STATE, "state", channel),
];

fn registry() -> &'static HashMap<&'static str, &'static Namespace> {
    static REGISTRY: OnceLock<HashMap<&'static str, &'static Namespace>> = OnceLock::new();
    REGISTRY.get_or_init(|| NAMESPACES.iter().map(|ns| (ns.name, ns)).collect())
}

/// Looks up a recognized namespace descriptor.
#[must_use]
pub fn lookup(name: &str) -> Option<&'static Namespace> {
    registry().get(name).copied()
}

/// Resolved descriptor for an arbitrary namespace name.
///
/// Known namespaces carry their catalog entry; unknown ones get a payload
/// key synthesized from the last dot-segment with its first letter
/// lowercased (`Appliance.Vendor.NewThing` -> `newThing`), which matches
/// the firmware convention for every namespace observed so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceDef {
    /// Fully qualified namespace name.
    pub name: String,
    /// Key carrying the payload body.
    pub key: String,
    /// Whether payloads are scoped per channel.
    pub need_channel: bool,
    /// Whether the namespace came from the static catalog.
    pub known: bool,
}

impl NamespaceDef {
    /// Resolves a namespace name to a descriptor, synthesizing one for
    /// names missing from the catalog.
    #[must_use]
    pub fn resolve(name: &str) -> Self {
        if let Some(ns) = lookup(name) {
            return Self {
                name: ns.name.to_string(),
                key: ns.key.to_string(),
                need_channel: ns.need_channel,
                known: true,
            };
        }
        let last = name.rsplit('.').next().unwrap_or(name);
        let mut chars = last.chars();
        let key = match chars.next() {
            Some(first) => first.to_lowercase().chain(chars).collect(),
            None => String::new(),
        };
        Self {
            name: name.to_string(),
            key,
            need_channel: false,
            known: false,
        }
    }

    /// Default GET payload for this namespace: an empty channel list for
    /// channel-scoped namespaces, an empty object otherwise.
    #[must_use]
    pub fn default_get_payload(&self) -> Value {
        if self.need_channel {
            json!({ self.key.as_str(): [] })
        } else {
            json!({ self.key.as_str(): {} })
        }
    }
}
