//! TCP transport implementation
//!
//! Used for NMEA multiplexers, network-attached receivers and simulators.

use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

use super::{millis, Connection, Connector, DeviceAddress, StreamConnection, TransportError};

/// Opens TCP connections
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn open(
        &self,
        address: &DeviceAddress,
        timeout: Duration,
    ) -> Result<Box<dyn Connection>, TransportError> {
        let DeviceAddress::Tcp { host, port } = address else {
            return Err(TransportError::InvalidAddress(address.to_string()));
        };

        let stream = tokio::time::timeout(timeout, TcpStream::connect((host.as_str(), *port)))
            .await
            .map_err(|_| TransportError::Timeout(millis(timeout)))?
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        // Set TCP_NODELAY so configuration sentences go out immediately
        stream.set_nodelay(true).map_err(TransportError::IoError)?;

        let info = match stream.peer_addr() {
            Ok(peer) => format!("TCP: {host}:{port} ({peer})"),
            Err(_) => format!("TCP: {host}:{port}"),
        };
        debug!(%info, "tcp connected");

        Ok(Box::new(StreamConnection::new(stream, info)))
    }
}
