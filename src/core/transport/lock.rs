//! Process-wide device ownership
//!
//! Only one session may talk to a given receiver at a time. A second
//! attempt fails immediately instead of contending for the link.

use parking_lot::{const_mutex, Mutex};
use std::collections::BTreeSet;
use tracing::debug;

use super::{DeviceAddress, TransportError};

static ACTIVE_DEVICES: Mutex<BTreeSet<String>> = const_mutex(BTreeSet::new());

/// Exclusive claim on a device, released on drop
#[derive(Debug)]
pub struct DeviceGuard {
    key: String,
}

impl DeviceGuard {
    /// Claim `address`, failing with [`TransportError::DeviceBusy`] if
    /// another guard holds it
    pub fn acquire(address: &DeviceAddress) -> Result<Self, TransportError> {
        let key = address.device_key();
        if !ACTIVE_DEVICES.lock().insert(key.clone()) {
            return Err(TransportError::DeviceBusy(key));
        }
        debug!(device = %key, "device claimed");
        Ok(Self { key })
    }

    /// Whether some guard currently holds `address`
    pub fn is_claimed(address: &DeviceAddress) -> bool {
        ACTIVE_DEVICES.lock().contains(&address.device_key())
    }

    /// Device key this guard holds
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for DeviceGuard {
    fn drop(&mut self) {
        ACTIVE_DEVICES.lock().remove(&self.key);
        debug!(device = %self.key, "device released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exclusive_claim() {
        let address: DeviceAddress = "tcp://lock-test.invalid:1".parse().unwrap();

        let guard = DeviceGuard::acquire(&address).unwrap();
        assert!(DeviceGuard::is_claimed(&address));
        assert!(matches!(
            DeviceGuard::acquire(&address),
            Err(TransportError::DeviceBusy(_))
        ));

        drop(guard);
        assert!(!DeviceGuard::is_claimed(&address));
        assert!(DeviceGuard::acquire(&address).is_ok());
    }

    #[test]
    fn test_link_options_share_claim() {
        let fast: DeviceAddress = "serial:///dev/lock-test?baud=115200".parse().unwrap();
        let slow: DeviceAddress = "/dev/lock-test".parse().unwrap();

        let _guard = DeviceGuard::acquire(&fast).unwrap();
        assert!(DeviceGuard::acquire(&slow).is_err());
    }
}
