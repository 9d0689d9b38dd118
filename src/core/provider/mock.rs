//! Scriptable provider for tests and demos

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use super::{
    location_timeout, Criteria, ListenerDefaults, ListenerParams, LocationListener, LocationProvider, PowerUsage,
    ProviderCharacteristics, ProviderError, ProviderFactory, ProviderState,
};
use crate::core::location::{FixQuality, Location, QualifiedCoordinates};

const NAME: &str = "mock";

/// Provider whose state and location are set by the caller.
///
/// Listener callbacks run synchronously on the calling thread; the
/// interval, timeout and max-age arguments are validated but not applied.
pub struct MockLocationProvider {
    state: RwLock<ProviderState>,
    location: RwLock<Option<Location>>,
    listener: Mutex<Option<Arc<dyn LocationListener>>>,
}

impl MockLocationProvider {
    /// Create a provider that is temporarily unavailable
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ProviderState::TemporarilyUnavailable),
            location: RwLock::new(None),
            listener: Mutex::new(None),
        }
    }

    fn listener(&self) -> Option<Arc<dyn LocationListener>> {
        self.listener.lock().clone()
    }

    /// Change state, notifying the listener on a change
    pub fn set_state(&self, state: ProviderState) {
        {
            let mut current = self.state.write();
            if *current == state {
                return;
            }
            *current = state;
        }

        if let Some(listener) = self.listener() {
            let result = catch_unwind(AssertUnwindSafe(|| listener.provider_state_changed(NAME, state)));
            if result.is_err() {
                warn!(%state, "location listener panicked handling state change");
            }
        }
    }

    /// Report a location; the provider becomes available
    pub fn set_location(&self, coordinates: QualifiedCoordinates, speed: f64) {
        self.set_state(ProviderState::Available);

        let location = Location {
            coordinates,
            speed,
            fix_quality: FixQuality::Simulation,
            valid: coordinates.has_position(),
            ..Location::invalid()
        };
        *self.location.write() = Some(location.clone());

        if let Some(listener) = self.listener() {
            let result = catch_unwind(AssertUnwindSafe(|| listener.location_updated(NAME, &location)));
            if result.is_err() {
                warn!("location listener panicked handling update");
            }
        }
    }
}

impl Default for MockLocationProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LocationProvider for MockLocationProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn state(&self) -> ProviderState {
        *self.state.read()
    }

    async fn get_location(&self, timeout: i32) -> Result<Location, ProviderError> {
        let timeout = location_timeout(timeout, Duration::ZERO)?;
        if self.state() == ProviderState::OutOfService {
            return Err(ProviderError::OutOfService);
        }
        // Nothing will arrive by waiting
        self.location
            .read()
            .clone()
            .ok_or(ProviderError::TimedOut(timeout.as_secs()))
    }

    fn set_location_listener(
        &self,
        listener: Option<Arc<dyn LocationListener>>,
        interval: i32,
        timeout: i32,
        max_age: i32,
    ) -> Result<(), ProviderError> {
        ListenerParams::from_seconds(interval, timeout, max_age, &ListenerDefaults::default())?;
        *self.listener.lock() = listener;
        Ok(())
    }

    fn last_known_location(&self) -> Option<Location> {
        self.location.read().clone()
    }

    async fn reset(&self) -> Result<(), ProviderError> {
        self.set_state(ProviderState::TemporarilyUnavailable);
        self.set_state(ProviderState::Available);
        Ok(())
    }

    async fn close(&self) {
        self.set_state(ProviderState::OutOfService);
        *self.location.write() = None;
    }
}

/// Factory handing out one shared [`MockLocationProvider`]
pub struct MockProviderFactory {
    provider: Arc<MockLocationProvider>,
    characteristics: ProviderCharacteristics,
}

impl MockProviderFactory {
    /// Factory for `provider` with ideal characteristics
    pub fn new(provider: Arc<MockLocationProvider>) -> Self {
        Self {
            provider,
            characteristics: ProviderCharacteristics {
                horizontal_accuracy: 1,
                vertical_accuracy: 1,
                altitude: true,
                speed_and_course: true,
                address_info: false,
                incurs_cost: false,
                power: PowerUsage::Low,
                needs_remote_address: false,
                response_time: 0,
            },
        }
    }

    /// Override the advertised characteristics
    #[must_use]
    pub fn with_characteristics(mut self, characteristics: ProviderCharacteristics) -> Self {
        self.characteristics = characteristics;
        self
    }
}

#[async_trait]
impl ProviderFactory for MockProviderFactory {
    fn characteristics(&self) -> ProviderCharacteristics {
        self.characteristics.clone()
    }

    async fn open(&self, _criteria: &Criteria) -> Result<Arc<dyn LocationProvider>, ProviderError> {
        if self.provider.state() == ProviderState::OutOfService {
            return Err(ProviderError::OutOfService);
        }
        Ok(self.provider.clone())
    }
}
