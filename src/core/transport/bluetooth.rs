//! Bluetooth LE transport
//!
//! Receivers and serial bridges exposing the Nordic UART Service (NUS):
//! NMEA arrives as notifications on the RX characteristic, commands are
//! written to the TX characteristic.

use async_trait::async_trait;
use btleplug::api::{Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use bytes::{Buf, BytesMut};
use futures::stream::StreamExt;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{millis, Connection, Connector, DeviceAddress, TransportError};

/// Nordic UART service
const NUS_SERVICE: Uuid = Uuid::from_u128(0x6e40_0001_b5a3_f393_e0a9_e50e_24dc_ca9e);
/// Central to peripheral
const NUS_TX: Uuid = Uuid::from_u128(0x6e40_0002_b5a3_f393_e0a9_e50e_24dc_ca9e);
/// Peripheral to central
const NUS_RX: Uuid = Uuid::from_u128(0x6e40_0003_b5a3_f393_e0a9_e50e_24dc_ca9e);

/// Payload per write with the default ATT MTU
const WRITE_CHUNK: usize = 20;

/// How long to scan before looking for the device
const SCAN_WINDOW: Duration = Duration::from_secs(3);

/// Discovered BLE device
#[derive(Debug, Clone, Serialize)]
pub struct BleDevice {
    /// Advertised name
    pub name: String,
    /// Platform identifier
    pub address: String,
    /// Signal strength
    pub rssi: Option<i16>,
    /// Whether the Nordic UART service is advertised
    pub uart: bool,
}

fn ble_error(context: &str, e: btleplug::Error) -> TransportError {
    TransportError::ConnectionFailed(format!("{context}: {e}"))
}

async fn first_adapter() -> Result<Adapter, TransportError> {
    let manager = Manager::new()
        .await
        .map_err(|e| ble_error("Failed to create Bluetooth manager", e))?;
    let adapters = manager
        .adapters()
        .await
        .map_err(|e| ble_error("Failed to get adapters", e))?;
    adapters
        .into_iter()
        .next()
        .ok_or_else(|| TransportError::ConnectionFailed("No Bluetooth adapter found".to_string()))
}

/// Scan for BLE devices for `duration`
pub async fn scan_devices(duration: Duration) -> Result<Vec<BleDevice>, TransportError> {
    let adapter = first_adapter().await?;
    adapter
        .start_scan(ScanFilter::default())
        .await
        .map_err(|e| ble_error("Failed to start scan", e))?;

    tokio::time::sleep(duration).await;

    let peripherals = adapter
        .peripherals()
        .await
        .map_err(|e| ble_error("Failed to get peripherals", e))?;

    let mut devices = Vec::new();
    for peripheral in peripherals {
        if let Ok(Some(props)) = peripheral.properties().await {
            devices.push(BleDevice {
                name: props.local_name.unwrap_or_else(|| "Unknown".to_string()),
                address: peripheral.id().to_string(),
                rssi: props.rssi,
                uart: props.services.contains(&NUS_SERVICE),
            });
        }
    }

    adapter
        .stop_scan()
        .await
        .map_err(|e| ble_error("Failed to stop scan", e))?;

    Ok(devices)
}

async fn find_peripheral(adapter: &Adapter, device: &str) -> Result<Peripheral, TransportError> {
    let peripherals = adapter
        .peripherals()
        .await
        .map_err(|e| ble_error("Failed to get peripherals", e))?;

    for peripheral in peripherals {
        if let Ok(Some(props)) = peripheral.properties().await {
            let name = props.local_name.unwrap_or_default();
            if name == device || peripheral.id().to_string() == device {
                return Ok(peripheral);
            }
        }
    }

    Err(TransportError::PortNotFound(device.to_string()))
}

/// Opens Nordic UART connections
#[derive(Debug, Clone, Copy, Default)]
pub struct BleConnector;

impl BleConnector {
    async fn connect(device: &str) -> Result<BleConnection, TransportError> {
        let adapter = first_adapter().await?;

        adapter
            .start_scan(ScanFilter {
                services: vec![NUS_SERVICE],
            })
            .await
            .map_err(|e| ble_error("Failed to start scan", e))?;
        tokio::time::sleep(SCAN_WINDOW).await;
        let peripheral = find_peripheral(&adapter, device).await;
        adapter
            .stop_scan()
            .await
            .map_err(|e| ble_error("Failed to stop scan", e))?;
        let peripheral = peripheral?;

        peripheral
            .connect()
            .await
            .map_err(|e| ble_error("Failed to connect", e))?;
        peripheral
            .discover_services()
            .await
            .map_err(|e| ble_error("Failed to discover services", e))?;

        let characteristics = peripheral.characteristics();
        let find = |uuid: Uuid, name: &str| {
            characteristics
                .iter()
                .find(|c| c.uuid == uuid)
                .cloned()
                .ok_or_else(|| TransportError::ConnectionFailed(format!("{name} characteristic not found")))
        };
        let tx_char = find(NUS_TX, "TX")?;
        let rx_char = find(NUS_RX, "RX")?;

        peripheral
            .subscribe(&rx_char)
            .await
            .map_err(|e| ble_error("Failed to subscribe", e))?;

        let mut notifications = peripheral
            .notifications()
            .await
            .map_err(|e| ble_error("Failed to open notification stream", e))?;

        let (tx, rx) = mpsc::channel(256);
        let task = tokio::spawn(async move {
            while let Some(data) = notifications.next().await {
                if data.uuid == NUS_RX && tx.send(data.value).await.is_err() {
                    break;
                }
            }
        });

        Ok(BleConnection {
            info: format!("BLE: {device} ({})", peripheral.id()),
            peripheral,
            tx_char,
            rx,
            pending: BytesMut::new(),
            task,
        })
    }
}

#[async_trait]
impl Connector for BleConnector {
    async fn open(
        &self,
        address: &DeviceAddress,
        timeout: Duration,
    ) -> Result<Box<dyn Connection>, TransportError> {
        let DeviceAddress::Ble { device } = address else {
            return Err(TransportError::InvalidAddress(address.to_string()));
        };

        // Scanning counts against the connect budget
        let conn = tokio::time::timeout(timeout + SCAN_WINDOW, Self::connect(device))
            .await
            .map_err(|_| TransportError::Timeout(millis(timeout + SCAN_WINDOW)))??;

        debug!(info = %conn.info, "ble connected");
        Ok(Box::new(conn))
    }
}

/// Open Nordic UART link
struct BleConnection {
    info: String,
    peripheral: Peripheral,
    tx_char: Characteristic,
    rx: mpsc::Receiver<Vec<u8>>,
    pending: BytesMut,
    task: tokio::task::JoinHandle<()>,
}

#[async_trait]
impl Connection for BleConnection {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if self.pending.is_empty() {
            match self.rx.recv().await {
                Some(data) => self.pending.extend_from_slice(&data),
                None => return Ok(0),
            }
        }

        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.advance(n);
        Ok(n)
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        for chunk in data.chunks(WRITE_CHUNK) {
            self.peripheral
                .write(&self.tx_char, chunk, WriteType::WithoutResponse)
                .await
                .map_err(|e| ble_error("Write failed", e))?;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.task.abort();
        if let Err(e) = self.peripheral.disconnect().await {
            warn!(error = %e, "BLE disconnect failed");
        }
        Ok(())
    }

    fn connection_info(&self) -> String {
        self.info.clone()
    }
}

impl Drop for BleConnection {
    fn drop(&mut self) {
        self.task.abort();
    }
}
