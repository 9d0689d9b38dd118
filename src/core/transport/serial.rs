//! Serial port transport
//!
//! Bluetooth SPP receivers appear as serial nodes once bound
//! (`rfcomm bind` on Linux, an outgoing COM port on Windows). Opening an
//! rfcomm node pages the remote device, which can block for seconds, so
//! the open runs on the blocking pool under the connect timeout.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, StopBits};
use tracing::debug;

use super::{millis, Connection, Connector, DeviceAddress, StreamConnection, TransportError};

/// Serial port description
#[derive(Debug, Clone, Serialize)]
pub struct PortInfo {
    /// Port name
    pub name: String,
    /// Port type
    pub kind: String,
}

/// List available serial ports
pub fn list_ports() -> Result<Vec<PortInfo>, TransportError> {
    let ports = serialport::available_ports()
        .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

    Ok(ports
        .into_iter()
        .map(|p| {
            let kind = match p.port_type {
                serialport::SerialPortType::UsbPort(usb) => match usb.product {
                    Some(product) => format!("USB {product}"),
                    None => format!("USB {:04x}:{:04x}", usb.vid, usb.pid),
                },
                serialport::SerialPortType::BluetoothPort => "Bluetooth".to_string(),
                serialport::SerialPortType::PciPort => "PCI".to_string(),
                serialport::SerialPortType::Unknown => "Unknown".to_string(),
            };
            PortInfo {
                name: p.port_name,
                kind,
            }
        })
        .collect())
}

fn map_open_error(path: &str, e: &tokio_serial::Error) -> TransportError {
    match e.kind() {
        tokio_serial::ErrorKind::NoDevice => TransportError::PortNotFound(path.to_string()),
        tokio_serial::ErrorKind::Io(std::io::ErrorKind::NotFound) => {
            TransportError::PortNotFound(path.to_string())
        }
        tokio_serial::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
            TransportError::PermissionDenied(path.to_string())
        }
        _ => TransportError::ConnectionFailed(e.to_string()),
    }
}

/// Opens serial ports as 8N1 without flow control
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialConnector;

#[async_trait]
impl Connector for SerialConnector {
    async fn open(
        &self,
        address: &DeviceAddress,
        timeout: Duration,
    ) -> Result<Box<dyn Connection>, TransportError> {
        let DeviceAddress::Serial { path, baud_rate } = address else {
            return Err(TransportError::InvalidAddress(address.to_string()));
        };

        let builder = tokio_serial::new(path.as_str(), *baud_rate)
            .data_bits(DataBits::Eight)
            .stop_bits(StopBits::One)
            .parity(Parity::None)
            .flow_control(FlowControl::None)
            .timeout(timeout);

        let opening = tokio::task::spawn_blocking(move || builder.open_native_async());

        let stream = tokio::time::timeout(timeout, opening)
            .await
            .map_err(|_| TransportError::Timeout(millis(timeout)))?
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?
            .map_err(|e| map_open_error(path, &e))?;

        debug!(port = %path, baud = baud_rate, "serial port open");

        Ok(Box::new(StreamConnection::new(
            stream,
            format!("Serial: {path} @ {baud_rate} baud"),
        )))
    }
}
