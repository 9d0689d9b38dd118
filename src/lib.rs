//! # BlueGPS Core Library
//!
//! An NMEA-0183 GPS receiver engine for Bluetooth and serial receivers:
//! - Sentence framing and checksum validation
//! - Decoding of RMC, GGA and GSA sentences
//! - Cycle assembly into typed locations
//! - A reconnecting transport session per receiver
//! - Location providers with listener throttling and criteria matching
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bluegps_core::core::provider::{BluetoothLocationProvider, LocationProvider, ProviderSettings};
//! use bluegps_core::core::transport::SystemConnector;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let provider = BluetoothLocationProvider::open(
//!         "/dev/rfcomm0".parse()?,
//!         Arc::new(SystemConnector),
//!         ProviderSettings::default(),
//!     )
//!     .await?;
//!
//!     let location = provider.get_location(10).await?;
//!     println!("{location}");
//!
//!     provider.close().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;
pub mod logging;

// Re-exports for convenience
pub use crate::config::AppConfig;
pub use crate::core::assembler::{GpsSnapshot, NmeaParser, ParseOutcome, PublishPolicy};
pub use crate::core::location::{FixQuality, Location, QualifiedCoordinates};
pub use crate::core::provider::{
    BluetoothLocationProvider, Criteria, LocationListener, LocationProvider, ProviderError,
    ProviderSelector, ProviderState,
};
pub use crate::core::session::{SessionConfig, SessionState, TransportSession};
pub use crate::core::transport::{DeviceAddress, TransportError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
