// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Static polling policy per namespace.
//!
//! Each entry configures how a [`NamespaceHandler`](super::NamespaceHandler)
//! polls its namespace: base cadence for local transports, a stricter
//! cadence when requests relay through the vendor cloud, and a response
//! size estimate used to batch or split aggregated polls.
//!
//! The `response_base_size` is a conservative (in excess) estimate of the
//! whole message; the header alone weighs around 300 bytes. Channel-scoped
//! namespaces add `response_item_size` per tracked channel, and the
//! resulting estimate keeps aggregated requests under the transport
//! truncation ceiling (observed around 3000 bytes on legacy local HTTP and
//! around 4000 on hubs with many sub-devices; broker MQTT is unaffected).

use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

use crate::namespace as ns;

/// Base poll cadence for sensor-grade state (signal quality, runtime).
pub const UPDATE_PERIOD: Duration = Duration::from_secs(290);
/// Courtesy cadence for requests relayed through the vendor cloud broker.
pub const CLOUD_UPDATE_PERIOD: Duration = Duration::from_secs(1195);
/// Cadence for energy consumption readings.
pub const ENERGY_UPDATE_PERIOD: Duration = Duration::from_secs(55);
/// Cadence for hub sub-device battery levels.
pub const HUB_BATTERY_UPDATE_PERIOD: Duration = Duration::from_secs(3595);
/// Estimated weight of a message header on the wire.
pub const HEADER_SIZE: usize = 300;

/// How a handler decides whether to issue its poll on a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollingStrategy {
    /// Poll only when push updates cannot cover the namespace: skip while a
    /// push-capable transport is active and the namespace has been
    /// requested at least once; always request on the first tick after
    /// (re)connecting to resynchronize.
    Default,

    /// Poll on a fixed cadence; the cadence switches to the cloud period
    /// when requests relay through the vendor cloud.
    Smart,

    /// Poll exactly once after (re)connecting; for data that never changes
    /// (hardware/firmware identity).
    Once,

    /// Smart cadence attached retroactively while diagnostic sensors exist
    /// for an otherwise unmanaged namespace; detached when they go.
    Diagnostic,

    /// Smart cadence gated on the bound entity being enabled.
    EntityBound,
}

/// Decision produced by a handler for one scheduler tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollDecision {
    /// Nothing to send this tick.
    Skip,
    /// Send the handler's request individually, right now.
    Request,
    /// Send through the size-aware aggregated batch.
    BatchRequest,
}

/// Static polling configuration for one namespace.
#[derive(Debug, Clone, Copy)]
pub struct PollingConfig {
    /// Cadence on local transports.
    pub period: Duration,
    /// Cadence when relayed through the vendor cloud.
    pub cloud_period: Duration,
    /// Estimated response size with no channels tracked.
    pub response_base_size: usize,
    /// Estimated response growth per tracked channel.
    pub response_item_size: usize,
    /// Strategy to bind, if the namespace is actively polled at all.
    pub strategy: Option<PollingStrategy>,
}

impl PollingConfig {
    /// Fallback configuration for namespaces missing from the table; used
    /// by dynamically parsed namespaces when diagnostic entities are on.
    #[must_use]
    pub const fn generic() -> Self {
        Self {
            period: UPDATE_PERIOD,
            cloud_period: CLOUD_UPDATE_PERIOD,
            response_base_size: HEADER_SIZE,
            response_item_size: 0,
            strategy: None,
        }
    }

    /// The effective cadence for the given routing.
    #[must_use]
    pub fn period_for(&self, cloud: bool) -> Duration {
        if cloud { self.cloud_period } else { self.period }
    }
}

macro_rules! poll {
    ($period:expr, $cloud:expr, $base:expr, $item:expr, $strategy:expr) => {
        PollingConfig {
            period: $period,
            cloud_period: $cloud,
            response_base_size: $base,
            response_item_size: $item,
            strategy: $strategy,
        }
    };
}

const ZERO: Duration = Duration::ZERO;

/// Looks up the static polling configuration for a namespace.
#[must_use]
pub fn config_for(namespace: &str) -> Option<&'static PollingConfig> {
    static TABLE: OnceLock<HashMap<&'static str, PollingConfig>> = OnceLock::new();
    TABLE
        .get_or_init(|| {
            use PollingStrategy::{Default, Once, Smart};
            HashMap::from([
                (ns::SYSTEM_ALL, poll!(ZERO, ZERO, 1000, 0, Some(Default))),
                (ns::SYSTEM_DEBUG, poll!(ZERO, ZERO, 1900, 0, None)),
                (
                    ns::SYSTEM_DNDMODE,
                    poll!(ZERO, CLOUD_UPDATE_PERIOD, 320, 0, Some(Smart)),
                ),
                (
                    ns::SYSTEM_RUNTIME,
                    poll!(UPDATE_PERIOD, CLOUD_UPDATE_PERIOD, 330, 0, Some(Smart)),
                ),
                (
                    ns::CONFIG_OVERTEMP,
                    poll!(ZERO, CLOUD_UPDATE_PERIOD, 340, 0, Some(Smart)),
                ),
                (
                    ns::CONTROL_CONSUMPTIONX,
                    poll!(ENERGY_UPDATE_PERIOD, CLOUD_UPDATE_PERIOD, 320, 53, Some(Smart)),
                ),
                (
                    ns::CONTROL_ELECTRICITY,
                    poll!(ZERO, CLOUD_UPDATE_PERIOD, 430, 0, Some(Smart)),
                ),
                (
                    ns::CONTROL_FAN,
                    poll!(ZERO, CLOUD_UPDATE_PERIOD, HEADER_SIZE, 20, None),
                ),
                (
                    ns::CONTROL_FILTERMAINTENANCE,
                    poll!(
                        CLOUD_UPDATE_PERIOD,
                        CLOUD_UPDATE_PERIOD,
                        HEADER_SIZE,
                        35,
                        Some(Smart)
                    ),
                ),
                (
                    ns::CONTROL_LIGHT_EFFECT,
                    poll!(ZERO, CLOUD_UPDATE_PERIOD, 1850, 0, Some(Smart)),
                ),
                (ns::CONTROL_MP3, poll!(ZERO, ZERO, 380, 0, Some(Default))),
                (
                    ns::CONTROL_PHYSICALLOCK,
                    poll!(ZERO, CLOUD_UPDATE_PERIOD, HEADER_SIZE, 35, Some(Default)),
                ),
                (
                    ns::CONTROL_SCREEN_BRIGHTNESS,
                    poll!(ZERO, CLOUD_UPDATE_PERIOD, HEADER_SIZE, 70, Some(Smart)),
                ),
                (
                    ns::THERMOSTAT_CALIBRATION,
                    poll!(ZERO, CLOUD_UPDATE_PERIOD, HEADER_SIZE, 80, Some(Smart)),
                ),
                (
                    ns::THERMOSTAT_DEADZONE,
                    poll!(ZERO, CLOUD_UPDATE_PERIOD, HEADER_SIZE, 80, Some(Smart)),
                ),
                (
                    ns::THERMOSTAT_FROST,
                    poll!(ZERO, CLOUD_UPDATE_PERIOD, HEADER_SIZE, 80, Some(Smart)),
                ),
                (
                    ns::THERMOSTAT_OVERHEAT,
                    poll!(ZERO, ZERO, HEADER_SIZE, 140, Some(Default)),
                ),
                (
                    ns::THERMOSTAT_SCHEDULE,
                    poll!(ZERO, ZERO, HEADER_SIZE, 550, Some(Default)),
                ),
                (
                    ns::THERMOSTAT_SCHEDULEB,
                    poll!(ZERO, ZERO, HEADER_SIZE, 550, Some(Default)),
                ),
                (
                    ns::THERMOSTAT_SENSOR,
                    poll!(ZERO, ZERO, HEADER_SIZE, 40, Some(Default)),
                ),
                (
                    ns::GARAGEDOOR_CONFIG,
                    poll!(ZERO, CLOUD_UPDATE_PERIOD, 410, 0, Some(Smart)),
                ),
                (
                    ns::GARAGEDOOR_MULTIPLECONFIG,
                    poll!(ZERO, CLOUD_UPDATE_PERIOD, HEADER_SIZE, 140, Some(Smart)),
                ),
                (
                    ns::HUB_BATTERY,
                    poll!(
                        HUB_BATTERY_UPDATE_PERIOD,
                        CLOUD_UPDATE_PERIOD,
                        HEADER_SIZE,
                        40,
                        Some(Smart)
                    ),
                ),
                (
                    ns::HUB_MTS100_ADJUST,
                    poll!(
                        CLOUD_UPDATE_PERIOD,
                        CLOUD_UPDATE_PERIOD,
                        HEADER_SIZE,
                        40,
                        Some(Smart)
                    ),
                ),
                (
                    ns::HUB_MTS100_ALL,
                    poll!(ZERO, CLOUD_UPDATE_PERIOD, HEADER_SIZE, 350, None),
                ),
                (
                    ns::HUB_MTS100_SCHEDULEB,
                    poll!(ZERO, CLOUD_UPDATE_PERIOD, HEADER_SIZE, 500, None),
                ),
                (
                    ns::HUB_SENSOR_ADJUST,
                    poll!(
                        CLOUD_UPDATE_PERIOD,
                        CLOUD_UPDATE_PERIOD,
                        HEADER_SIZE,
                        60,
                        Some(Smart)
                    ),
                ),
                (
                    ns::HUB_SENSOR_ALL,
                    poll!(ZERO, CLOUD_UPDATE_PERIOD, HEADER_SIZE, 250, None),
                ),
                (
                    ns::HUB_SUBDEVICE_VERSION,
                    poll!(ZERO, CLOUD_UPDATE_PERIOD, HEADER_SIZE, 55, Some(Once)),
                ),
                (
                    ns::HUB_TOGGLEX,
                    poll!(ZERO, ZERO, HEADER_SIZE, 35, Some(Default)),
                ),
                (
                    ns::ROLLERSHUTTER_ADJUST,
                    poll!(
                        CLOUD_UPDATE_PERIOD,
                        CLOUD_UPDATE_PERIOD,
                        HEADER_SIZE,
                        35,
                        Some(Smart)
                    ),
                ),
                (
                    ns::ROLLERSHUTTER_CONFIG,
                    poll!(ZERO, CLOUD_UPDATE_PERIOD, HEADER_SIZE, 70, Some(Smart)),
                ),
                (
                    ns::ROLLERSHUTTER_POSITION,
                    poll!(ZERO, ZERO, HEADER_SIZE, 50, Some(Default)),
                ),
                (
                    ns::ROLLERSHUTTER_STATE,
                    poll!(ZERO, ZERO, HEADER_SIZE, 40, Some(Default)),
                ),
            ])
        })
        .get(namespace)
}
