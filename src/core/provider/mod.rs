//! Location providers
//!
//! A provider turns a stream of published locations into:
//! - an availability state ([`ProviderState`])
//! - a pull accessor for the latest location
//! - a push subscription with interval / timeout / max-age semantics
//!
//! Providers are chosen by matching [`Criteria`] against each candidate's
//! [`ProviderCharacteristics`], see [`ProviderSelector`].

mod bluetooth;
mod dispatcher;
mod mock;
mod selector;

pub use bluetooth::{BluetoothLocationProvider, BluetoothProviderFactory, ProviderSettings};
pub use mock::{MockLocationProvider, MockProviderFactory};
pub use selector::ProviderSelector;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use super::location::Location;
use super::transport::TransportError;

/// Sentinel for "use the provider default" in timeout and listener arguments
pub const PROVIDER_DEFAULT: i32 = -1;

/// Provider error types
#[derive(Error, Debug)]
pub enum ProviderError {
    /// A caller argument was out of range
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The provider is closed or lost for good
    #[error("Location provider is out of service")]
    OutOfService,

    /// No location arrived in time
    #[error("Timed out after {0} s waiting for a location")]
    TimedOut(u64),

    /// No candidate provider satisfies the criteria
    #[error("No location provider matches the criteria")]
    NoMatchingProvider,

    /// Transport failure while opening or commanding the receiver
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Provider availability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderState {
    /// Delivering usable fixes
    Available,
    /// Connected or reconnecting, but without a usable fix
    TemporarilyUnavailable,
    /// Closed; only an explicit reset leaves this state
    OutOfService,
}

impl fmt::Display for ProviderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Available => "available",
            Self::TemporarilyUnavailable => "temporarily unavailable",
            Self::OutOfService => "out of service",
        };
        f.write_str(text)
    }
}

/// Subscriber to provider events.
///
/// Callbacks run on the blocking pool. A panicking callback is logged and
/// otherwise ignored.
pub trait LocationListener: Send + Sync {
    /// A new location, or an invalid one when none arrived in time
    fn location_updated(&self, provider: &str, location: &Location);

    /// The provider's availability changed
    fn provider_state_changed(&self, provider: &str, state: ProviderState);
}

/// Common provider interface
#[async_trait]
pub trait LocationProvider: Send + Sync {
    /// Provider name passed to listener callbacks
    fn name(&self) -> &str;

    /// Current availability
    fn state(&self) -> ProviderState;

    /// Wait up to `timeout` seconds for a location.
    ///
    /// `timeout` must be positive or [`PROVIDER_DEFAULT`].
    async fn get_location(&self, timeout: i32) -> Result<Location, ProviderError>;

    /// Replace the subscription; `None` stops delivery.
    ///
    /// All three arguments are seconds, or [`PROVIDER_DEFAULT`]. An interval
    /// of 0 subscribes to state changes only.
    fn set_location_listener(
        &self,
        listener: Option<Arc<dyn LocationListener>>,
        interval: i32,
        timeout: i32,
        max_age: i32,
    ) -> Result<(), ProviderError>;

    /// Most recent valid location, if any
    fn last_known_location(&self) -> Option<Location>;

    /// Re-acquire the fix, reopening the provider if it was closed
    async fn reset(&self) -> Result<(), ProviderError>;

    /// Stop the provider. Idempotent.
    async fn close(&self);
}

/// Power budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerUsage {
    /// Any consumption is acceptable
    #[default]
    NoRequirement,
    /// Low
    Low,
    /// Medium
    Medium,
    /// High
    High,
}

/// Requirements a provider must meet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Criteria {
    /// Required horizontal accuracy in metres
    pub horizontal_accuracy: Option<u32>,
    /// Required vertical accuracy in metres
    pub vertical_accuracy: Option<u32>,
    /// Altitude must be reported
    pub altitude_required: bool,
    /// Speed and course must be reported
    pub speed_and_course_required: bool,
    /// Textual address information must be reported
    pub address_info_required: bool,
    /// Whether the provider may incur monetary cost
    pub cost_allowed: bool,
    /// Highest acceptable power consumption
    pub power_consumption: PowerUsage,
    /// Preferred response time in milliseconds
    pub preferred_response_time: Option<u32>,
    /// Address of a remote receiver (see `DeviceAddress`)
    pub remote_device_address: Option<String>,
}

impl Criteria {
    /// Criteria for the receiver at `address`
    pub fn for_device(address: impl Into<String>) -> Self {
        Self {
            remote_device_address: Some(address.into()),
            ..Self::default()
        }
    }
}

impl Default for Criteria {
    fn default() -> Self {
        Self {
            horizontal_accuracy: None,
            vertical_accuracy: None,
            altitude_required: false,
            speed_and_course_required: false,
            address_info_required: false,
            cost_allowed: true,
            power_consumption: PowerUsage::NoRequirement,
            preferred_response_time: None,
            remote_device_address: None,
        }
    }
}

/// What a provider can deliver
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderCharacteristics {
    /// Best horizontal accuracy in metres
    pub horizontal_accuracy: u32,
    /// Best vertical accuracy in metres
    pub vertical_accuracy: u32,
    /// Reports altitude
    pub altitude: bool,
    /// Reports speed and course
    pub speed_and_course: bool,
    /// Reports textual addresses
    pub address_info: bool,
    /// Incurs monetary cost
    pub incurs_cost: bool,
    /// Power drawn
    pub power: PowerUsage,
    /// Needs `Criteria::remote_device_address` to connect
    pub needs_remote_address: bool,
    /// Typical response time in milliseconds
    pub response_time: u32,
}

impl ProviderCharacteristics {
    /// Whether every requirement in `criteria` can be met
    pub fn satisfies(&self, criteria: &Criteria) -> bool {
        if criteria
            .horizontal_accuracy
            .is_some_and(|required| required < self.horizontal_accuracy)
        {
            return false;
        }

        if criteria.altitude_required {
            if !self.altitude {
                return false;
            }
            if criteria
                .vertical_accuracy
                .is_some_and(|required| required < self.vertical_accuracy)
            {
                return false;
            }
        }

        if criteria.speed_and_course_required && !self.speed_and_course {
            return false;
        }

        if criteria.power_consumption != PowerUsage::NoRequirement
            && self.power > criteria.power_consumption
        {
            return false;
        }

        if !criteria.cost_allowed && self.incurs_cost {
            return false;
        }

        if criteria.address_info_required && !self.address_info {
            return false;
        }

        !(self.needs_remote_address && criteria.remote_device_address.is_none())
    }
}

/// Opens providers of one kind
#[async_trait]
pub trait ProviderFactory: Send + Sync {
    /// What providers from this factory deliver
    fn characteristics(&self) -> ProviderCharacteristics;

    /// Open a provider for `criteria`
    async fn open(&self, criteria: &Criteria) -> Result<Arc<dyn LocationProvider>, ProviderError>;
}

/// Listener defaults applied for [`PROVIDER_DEFAULT`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerDefaults {
    /// Delivery interval
    pub interval: Duration,
    /// Grace period after an interval before a timeout notification
    pub timeout: Duration,
    /// Oldest cached location delivered on timeout
    pub max_age: Duration,
}

impl Default for ListenerDefaults {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(1),
            max_age: Duration::from_secs(1),
        }
    }
}

/// Validated subscription parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerParams {
    /// Delivery interval; `None` means state changes only
    pub interval: Option<Duration>,
    /// Grace period after an interval before a timeout notification
    pub timeout: Duration,
    /// Oldest cached location delivered on timeout
    pub max_age: Duration,
}

fn seconds(value: i32) -> Duration {
    Duration::from_secs(u64::from(value.unsigned_abs()))
}

impl ListenerParams {
    /// Validate listener arguments given in seconds
    pub fn from_seconds(
        interval: i32,
        timeout: i32,
        max_age: i32,
        defaults: &ListenerDefaults,
    ) -> Result<Self, ProviderError> {
        for (name, value) in [("interval", interval), ("timeout", timeout), ("max age", max_age)] {
            if value < PROVIDER_DEFAULT {
                return Err(ProviderError::InvalidArgument(format!(
                    "{name} must be -1 or at least 0, got {value}"
                )));
            }
        }

        // Provider default interval brings provider defaults for the rest.
        // A zero default interval means state changes only, as an explicit 0 does.
        if interval == PROVIDER_DEFAULT && !defaults.interval.is_zero() {
            return Ok(Self {
                interval: Some(defaults.interval),
                timeout: defaults.timeout.min(defaults.interval),
                max_age: defaults.max_age.min(defaults.interval),
            });
        }

        if interval <= 0 {
            return Ok(Self {
                interval: None,
                timeout: Duration::ZERO,
                max_age: Duration::ZERO,
            });
        }

        if timeout > interval || max_age > interval {
            return Err(ProviderError::InvalidArgument(format!(
                "timeout ({timeout}) and max age ({max_age}) may not exceed the interval ({interval})"
            )));
        }

        let period = seconds(interval);
        let or_default = |value: i32, default: Duration| {
            if value == PROVIDER_DEFAULT {
                default.min(period)
            } else {
                seconds(value)
            }
        };

        Ok(Self {
            interval: Some(period),
            timeout: or_default(timeout, defaults.timeout),
            max_age: or_default(max_age, defaults.max_age),
        })
    }
}

/// Validate a `get_location` timeout in seconds
pub fn location_timeout(timeout: i32, default: Duration) -> Result<Duration, ProviderError> {
    match timeout {
        PROVIDER_DEFAULT => Ok(default),
        t if t > 0 => Ok(seconds(t)),
        t => Err(ProviderError::InvalidArgument(format!(
            "timeout must be positive or -1, got {t}"
        ))),
    }
}

/// Last valid location and when it arrived
#[derive(Debug, Clone)]
pub(crate) struct CachedFix {
    pub(crate) location: Location,
    pub(crate) received: Instant,
}

impl CachedFix {
    pub(crate) fn now(location: Location) -> Self {
        Self {
            location,
            received: Instant::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bluetooth_like() -> ProviderCharacteristics {
        ProviderCharacteristics {
            horizontal_accuracy: 5,
            vertical_accuracy: 10,
            altitude: true,
            speed_and_course: true,
            address_info: false,
            incurs_cost: false,
            power: PowerUsage::Medium,
            needs_remote_address: true,
            response_time: 1000,
        }
    }

    #[test]
    fn test_criteria_matching() {
        let gps = bluetooth_like();

        assert!(!gps.satisfies(&Criteria::default()), "needs a device address");
        assert!(gps.satisfies(&Criteria::for_device("/dev/rfcomm0")));

        let strict = Criteria {
            horizontal_accuracy: Some(1),
            ..Criteria::for_device("/dev/rfcomm0")
        };
        assert!(!gps.satisfies(&strict));

        let altitude = Criteria {
            altitude_required: true,
            vertical_accuracy: Some(50),
            ..Criteria::for_device("/dev/rfcomm0")
        };
        assert!(gps.satisfies(&altitude));

        let low_power = Criteria {
            power_consumption: PowerUsage::Low,
            ..Criteria::for_device("/dev/rfcomm0")
        };
        assert!(!gps.satisfies(&low_power));

        let address = Criteria {
            address_info_required: true,
            ..Criteria::for_device("/dev/rfcomm0")
        };
        assert!(!gps.satisfies(&address));

        let costly = ProviderCharacteristics {
            incurs_cost: true,
            ..bluetooth_like()
        };
        let free_only = Criteria {
            cost_allowed: false,
            ..Criteria::for_device("/dev/rfcomm0")
        };
        assert!(!costly.satisfies(&free_only));
        assert!(gps.satisfies(&free_only));
    }

    #[test]
    fn test_listener_params() {
        let defaults = ListenerDefaults::default();

        let params = ListenerParams::from_seconds(-1, 7, 7, &defaults).unwrap();
        assert_eq!(params.interval, Some(defaults.interval));
        assert_eq!(params.timeout, defaults.timeout);

        let params = ListenerParams::from_seconds(0, -1, -1, &defaults).unwrap();
        assert_eq!(params.interval, None);

        let params = ListenerParams::from_seconds(10, 5, -1, &defaults).unwrap();
        assert_eq!(params.interval, Some(Duration::from_secs(10)));
        assert_eq!(params.timeout, Duration::from_secs(5));
        assert_eq!(params.max_age, defaults.max_age);

        assert!(matches!(
            ListenerParams::from_seconds(2, 3, 1, &defaults),
            Err(ProviderError::InvalidArgument(_))
        ));
        assert!(ListenerParams::from_seconds(2, 1, 3, &defaults).is_err());
        assert!(ListenerParams::from_seconds(-2, 1, 1, &defaults).is_err());
        assert!(ListenerParams::from_seconds(5, -3, 1, &defaults).is_err());
    }

    #[test]
    fn test_zero_default_interval_is_state_only() {
        let zero = ListenerDefaults {
            interval: Duration::ZERO,
            timeout: Duration::ZERO,
            max_age: Duration::ZERO,
        };
        let params = ListenerParams::from_seconds(-1, -1, -1, &zero).unwrap();
        assert_eq!(params.interval, None);
        assert_eq!(params.timeout, Duration::ZERO);

        // Explicit intervals still work against zero defaults
        let params = ListenerParams::from_seconds(3, -1, -1, &zero).unwrap();
        assert_eq!(params.interval, Some(Duration::from_secs(3)));

        // Oversized defaults are held to the interval
        let skewed = ListenerDefaults {
            interval: Duration::from_secs(2),
            timeout: Duration::from_secs(30),
            max_age: Duration::from_secs(30),
        };
        let params = ListenerParams::from_seconds(-1, -1, -1, &skewed).unwrap();
        assert_eq!(params.interval, Some(Duration::from_secs(2)));
        assert_eq!(params.timeout, Duration::from_secs(2));
        assert_eq!(params.max_age, Duration::from_secs(2));
    }

    #[test]
    fn test_location_timeout() {
        let default = Duration::from_secs(30);
        assert_eq!(location_timeout(-1, default).unwrap(), default);
        assert_eq!(location_timeout(5, default).unwrap(), Duration::from_secs(5));
        assert!(matches!(
            location_timeout(0, default),
            Err(ProviderError::InvalidArgument(_))
        ));
        assert!(location_timeout(-2, default).is_err());
    }

    #[test]
    fn test_state_serde() {
        let json = serde_json::to_string(&ProviderState::TemporarilyUnavailable).unwrap();
        assert_eq!(json, "\"temporarily_unavailable\"");
        assert_eq!(ProviderState::OutOfService.to_string(), "out of service");
    }
}
