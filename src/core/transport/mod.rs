//! Transport layer for GPS receivers
//!
//! A receiver is reached through a duplex byte stream:
//! - Serial ports (Bluetooth SPP bound to an rfcomm node, USB receivers)
//! - Raw TCP (NMEA multiplexers, simulators)
//! - Bluetooth LE UART bridges (feature `ble`)
//!
//! The session only sees [`Connector`] and [`Connection`], so tests can
//! substitute in-memory streams.

#[cfg(feature = "ble")]
mod bluetooth;
mod lock;
mod serial;
mod tcp;

#[cfg(feature = "ble")]
pub use bluetooth::{scan_devices, BleConnector, BleDevice};
pub use lock::DeviceGuard;
pub use serial::{list_ports, SerialConnector};
pub use tcp::TcpConnector;

use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

#[cfg(test)]
use mockall::automock;

/// Default baud rate of consumer Bluetooth GPS receivers
pub const DEFAULT_BAUD_RATE: u32 = 38400;

/// Transport error types
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection timeout
    #[error("Connection timeout after {0} ms")]
    Timeout(u64),

    /// Port not found
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Another session owns the device
    #[error("Device already in use: {0}")]
    DeviceBusy(String),

    /// Address string could not be parsed
    #[error("Invalid device address: {0}")]
    InvalidAddress(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Not connected
    #[error("Not connected")]
    NotConnected,

    /// Remote end closed the stream
    #[error("Disconnected")]
    Disconnected,

    /// A read did not complete within the deadline
    #[error("Read stalled for {0} ms")]
    ReadStalled(u64),

    /// Address kind not available in this build
    #[error("Unsupported transport: {0}")]
    Unsupported(String),
}

/// Where a receiver lives
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeviceAddress {
    /// Serial device node or COM port
    Serial {
        /// Port name (e.g. /dev/rfcomm0, COM5)
        path: String,
        /// Baud rate
        baud_rate: u32,
    },
    /// TCP endpoint
    Tcp {
        /// Host name or IP address
        host: String,
        /// Port number
        port: u16,
    },
    /// Bluetooth LE peripheral exposing the Nordic UART service
    Ble {
        /// Advertised name or platform identifier
        device: String,
    },
}

impl DeviceAddress {
    /// Key identifying the physical device, independent of link options
    pub fn device_key(&self) -> String {
        match self {
            Self::Serial { path, .. } => format!("serial://{path}"),
            Self::Tcp { host, port } => format!("tcp://{}:{port}", host.to_lowercase()),
            Self::Ble { device } => format!("ble://{device}"),
        }
    }

    /// Whether the receiver is reached over the air
    pub fn is_remote(&self) -> bool {
        match self {
            Self::Serial { path, .. } => path.contains("rfcomm"),
            Self::Tcp { .. } | Self::Ble { .. } => true,
        }
    }

    fn parse_serial(rest: &str) -> Result<Self, TransportError> {
        let (path, query) = match rest.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (rest, None),
        };

        if path.is_empty() {
            return Err(TransportError::InvalidAddress(rest.to_string()));
        }

        let mut baud_rate = DEFAULT_BAUD_RATE;
        for pair in query.into_iter().flat_map(|q| q.split('&')) {
            match pair.split_once('=') {
                Some(("baud", value)) => {
                    baud_rate = value
                        .parse()
                        .map_err(|_| TransportError::InvalidAddress(format!("bad baud rate '{value}'")))?;
                }
                _ => {
                    return Err(TransportError::InvalidAddress(format!(
                        "unknown serial option '{pair}'"
                    )))
                }
            }
        }

        Ok(Self::Serial {
            path: path.to_string(),
            baud_rate,
        })
    }
}

impl FromStr for DeviceAddress {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        if let Some(rest) = s.strip_prefix("serial://") {
            return Self::parse_serial(rest);
        }

        if let Some(rest) = s.strip_prefix("tcp://") {
            let (host, port) = rest
                .rsplit_once(':')
                .ok_or_else(|| TransportError::InvalidAddress(format!("missing port in '{s}'")))?;
            let port = port
                .parse()
                .map_err(|_| TransportError::InvalidAddress(format!("bad port in '{s}'")))?;
            if host.is_empty() {
                return Err(TransportError::InvalidAddress(s.to_string()));
            }
            return Ok(Self::Tcp {
                host: host.trim_start_matches('[').trim_end_matches(']').to_string(),
                port,
            });
        }

        if let Some(device) = s.strip_prefix("ble://") {
            if device.is_empty() {
                return Err(TransportError::InvalidAddress(s.to_string()));
            }
            return Ok(Self::Ble {
                device: device.to_string(),
            });
        }

        if s.contains("://") {
            return Err(TransportError::InvalidAddress(format!("unknown scheme in '{s}'")));
        }

        // Bare device path or COM port
        Self::parse_serial(s)
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial { path, baud_rate } => write!(f, "serial://{path}?baud={baud_rate}"),
            Self::Tcp { host, port } if host.contains(':') => write!(f, "tcp://[{host}]:{port}"),
            Self::Tcp { host, port } => write!(f, "tcp://{host}:{port}"),
            Self::Ble { device } => write!(f, "ble://{device}"),
        }
    }
}

/// An open duplex byte stream to a receiver
#[async_trait]
pub trait Connection: Send {
    /// Read into `buf`. `Ok(0)` means the remote end closed the stream.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Write all of `data`
    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Close the stream
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Human-readable description
    fn connection_info(&self) -> String;
}

/// Opens connections to receivers
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection, giving up after `timeout`
    async fn open(
        &self,
        address: &DeviceAddress,
        timeout: Duration,
    ) -> Result<Box<dyn Connection>, TransportError>;
}

/// [`Connection`] over any tokio byte stream
pub struct StreamConnection<S> {
    stream: S,
    info: String,
}

impl<S> StreamConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap `stream`, described by `info`
    pub fn new(stream: S, info: impl Into<String>) -> Self {
        Self {
            stream,
            info: info.into(),
        }
    }
}

#[async_trait]
impl<S> Connection for StreamConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        Ok(self.stream.read(buf).await?)
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.stream.write_all(data).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.stream.shutdown().await?;
        Ok(())
    }

    fn connection_info(&self) -> String {
        self.info.clone()
    }
}

/// Connector that dispatches on the address kind
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemConnector;

#[async_trait]
impl Connector for SystemConnector {
    async fn open(
        &self,
        address: &DeviceAddress,
        timeout: Duration,
    ) -> Result<Box<dyn Connection>, TransportError> {
        match address {
            DeviceAddress::Serial { .. } => SerialConnector.open(address, timeout).await,
            DeviceAddress::Tcp { .. } => TcpConnector.open(address, timeout).await,
            #[cfg(feature = "ble")]
            DeviceAddress::Ble { .. } => BleConnector.open(address, timeout).await,
            #[cfg(not(feature = "ble"))]
            DeviceAddress::Ble { .. } => Err(TransportError::Unsupported(
                "Bluetooth LE support not compiled in (enable the `ble` feature)".to_string(),
            )),
        }
    }
}

/// Milliseconds in `duration`, saturating
pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
