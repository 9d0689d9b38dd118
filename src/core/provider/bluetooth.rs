//! Provider backed by a receiver session
//!
//! Named for the common case of a Bluetooth SPP or BLE receiver, but works
//! over any [`Connector`].

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::Instant;
use tracing::{debug, info};

use super::dispatcher::Dispatcher;
use super::{
    location_timeout, CachedFix, Criteria, ListenerDefaults, ListenerParams, LocationListener,
    LocationProvider, PowerUsage, ProviderCharacteristics, ProviderError, ProviderFactory,
    ProviderState,
};
use crate::core::location::Location;
use crate::core::session::{SessionConfig, SessionSink, SessionStats, TransportSession};
use crate::core::transport::{Connector, DeviceAddress, DeviceGuard, TransportError};

/// Provider configuration
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    /// Session timing and parsing
    pub session: SessionConfig,
    /// How often `get_location` checks for a fix
    pub poll_interval: Duration,
    /// `get_location` timeout used for the provider default
    pub location_timeout: Duration,
    /// Listener defaults
    pub listener: ListenerDefaults,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            poll_interval: Duration::from_millis(250),
            location_timeout: Duration::from_secs(30),
            listener: ListenerDefaults::default(),
        }
    }
}

/// State shared with the session worker
struct Shared {
    name: Arc<str>,
    state: RwLock<ProviderState>,
    last_known: Arc<RwLock<Option<CachedFix>>>,
    dispatcher: Mutex<Option<Dispatcher>>,
}

impl Shared {
    /// Move to `state` unless already there.
    /// Leaving OutOfService needs `reopen`.
    fn set_state(&self, state: ProviderState, reopen: bool) {
        {
            let mut current = self.state.write();
            if *current == state || (*current == ProviderState::OutOfService && !reopen) {
                return;
            }
            debug!(provider = %self.name, from = %*current, to = %state, "provider state");
            *current = state;
        }

        if let Some(dispatcher) = self.dispatcher.lock().as_ref() {
            dispatcher.post_state(state);
        }
    }
}

impl SessionSink for Shared {
    fn location_published(&self, location: Location) {
        if !location.is_valid() {
            self.set_state(ProviderState::TemporarilyUnavailable, false);
            return;
        }

        if *self.state.read() == ProviderState::OutOfService {
            return;
        }

        *self.last_known.write() = Some(CachedFix::now(location.clone()));
        self.set_state(ProviderState::Available, false);

        if let Some(dispatcher) = self.dispatcher.lock().as_ref() {
            dispatcher.post_location(location);
        }
    }

    fn link_lost(&self, _error: &TransportError) {
        self.set_state(ProviderState::TemporarilyUnavailable, false);
    }
}

/// Location provider reading NMEA from one receiver
pub struct BluetoothLocationProvider {
    shared: Arc<Shared>,
    address: DeviceAddress,
    connector: Arc<dyn Connector>,
    settings: ProviderSettings,
    /// Live session; it holds the device claim until its link is closed
    link: Mutex<Option<Arc<TransportSession>>>,
    runtime: Handle,
}

impl BluetoothLocationProvider {
    /// Claim the device and connect.
    ///
    /// Fails with `DeviceBusy` if another provider already owns the
    /// device, or with the connect error if the receiver is unreachable.
    pub async fn open(
        address: DeviceAddress,
        connector: Arc<dyn Connector>,
        settings: ProviderSettings,
    ) -> Result<Self, ProviderError> {
        let shared = Arc::new(Shared {
            name: Arc::from(format!("bluetooth:{address}")),
            state: RwLock::new(ProviderState::TemporarilyUnavailable),
            last_known: Arc::new(RwLock::new(None)),
            dispatcher: Mutex::new(None),
        });

        let link = Self::connect(&address, &connector, &settings, &shared).await?;
        info!(device = %address, "location provider open");

        Ok(Self {
            shared,
            address,
            connector,
            settings,
            link: Mutex::new(Some(link)),
            runtime: Handle::current(),
        })
    }

    async fn connect(
        address: &DeviceAddress,
        connector: &Arc<dyn Connector>,
        settings: &ProviderSettings,
        shared: &Arc<Shared>,
    ) -> Result<Arc<TransportSession>, ProviderError> {
        let claim = DeviceGuard::acquire(address)?;
        let session = TransportSession::start_claimed(
            address.clone(),
            connector.clone(),
            settings.session.clone(),
            shared.clone(),
            claim,
        )
        .await?;

        Ok(Arc::new(session))
    }

    /// Receiver address
    pub fn address(&self) -> &DeviceAddress {
        &self.address
    }

    /// Session statistics, `None` while closed
    pub fn stats(&self) -> Option<SessionStats> {
        self.link.lock().as_ref().map(|session| session.stats())
    }

    fn session(&self) -> Option<Arc<TransportSession>> {
        self.link.lock().clone()
    }
}

#[async_trait]
impl LocationProvider for BluetoothLocationProvider {
    fn name(&self) -> &str {
        &self.shared.name
    }

    fn state(&self) -> ProviderState {
        *self.shared.state.read()
    }

    async fn get_location(&self, timeout: i32) -> Result<Location, ProviderError> {
        let timeout = location_timeout(timeout, self.settings.location_timeout)?;
        let started = Instant::now();

        loop {
            if self.state() == ProviderState::OutOfService || self.session().is_none() {
                return Err(ProviderError::OutOfService);
            }

            if let Some(location) = self.last_known_location() {
                return Ok(location);
            }

            if started.elapsed() >= timeout {
                return Err(ProviderError::TimedOut(timeout.as_secs()));
            }

            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }

    fn set_location_listener(
        &self,
        listener: Option<Arc<dyn LocationListener>>,
        interval: i32,
        timeout: i32,
        max_age: i32,
    ) -> Result<(), ProviderError> {
        let replacement = match listener {
            Some(listener) => {
                let params =
                    ListenerParams::from_seconds(interval, timeout, max_age, &self.settings.listener)?;
                Some(Dispatcher::spawn(
                    &self.runtime,
                    self.shared.name.clone(),
                    listener,
                    params,
                    self.shared.last_known.clone(),
                ))
            }
            None => None,
        };

        let previous = std::mem::replace(&mut *self.shared.dispatcher.lock(), replacement);
        if let Some(previous) = previous {
            previous.cancel();
        }
        Ok(())
    }

    fn last_known_location(&self) -> Option<Location> {
        self.shared
            .last_known
            .read()
            .as_ref()
            .map(|fix| fix.location.clone())
    }

    async fn reset(&self) -> Result<(), ProviderError> {
        match self.session() {
            Some(session) => {
                session.reacquire_fix().await?;
                self.shared.set_state(ProviderState::TemporarilyUnavailable, false);
            }
            None => {
                let link =
                    Self::connect(&self.address, &self.connector, &self.settings, &self.shared).await?;
                *self.link.lock() = Some(link);
                self.shared.set_state(ProviderState::TemporarilyUnavailable, true);
                info!(device = %self.address, "location provider reopened");
            }
        }
        Ok(())
    }

    async fn close(&self) {
        let session = self.link.lock().take();
        if let Some(session) = session {
            session.close().await;
            info!(device = %self.address, "location provider closed");
        }

        self.shared.set_state(ProviderState::OutOfService, false);

        // Deliver the final state, then stop notifications
        let dispatcher = self.shared.dispatcher.lock().take();
        if let Some(dispatcher) = dispatcher {
            dispatcher.finish();
        }
    }
}

/// Opens [`BluetoothLocationProvider`]s for `Criteria::remote_device_address`
pub struct BluetoothProviderFactory {
    connector: Arc<dyn Connector>,
    settings: ProviderSettings,
}

impl BluetoothProviderFactory {
    /// Factory opening through `connector`
    pub fn new(connector: Arc<dyn Connector>, settings: ProviderSettings) -> Self {
        Self { connector, settings }
    }
}

#[async_trait]
impl ProviderFactory for BluetoothProviderFactory {
    fn characteristics(&self) -> ProviderCharacteristics {
        ProviderCharacteristics {
            horizontal_accuracy: 1,
            vertical_accuracy: 1,
            altitude: true,
            speed_and_course: true,
            address_info: false,
            incurs_cost: false,
            power: PowerUsage::Medium,
            needs_remote_address: true,
            response_time: 1000,
        }
    }

    async fn open(&self, criteria: &Criteria) -> Result<Arc<dyn LocationProvider>, ProviderError> {
        let address: DeviceAddress = criteria
            .remote_device_address
            .as_deref()
            .ok_or(ProviderError::NoMatchingProvider)?
            .parse()?;

        let provider =
            BluetoothLocationProvider::open(address, self.connector.clone(), self.settings.clone()).await?;
        Ok(Arc::new(provider))
    }
}
