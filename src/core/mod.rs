//! Core module containing the receiver engine
//!
//! This module provides:
//! - NMEA protocol: framing, checksums, sentence decoding, receiver commands
//! - Record assembly into publishable snapshots
//! - Typed locations
//! - Transport layer (serial, TCP, Bluetooth LE)
//! - Transport session with reconnect and skip-ahead
//! - Location providers and criteria-based selection

pub mod assembler;
pub mod location;
pub mod mailbox;
pub mod protocol;
pub mod provider;
pub mod session;
pub mod transport;
