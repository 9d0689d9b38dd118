//! CLI Exit Codes
//!
//! Stable exit codes so scripts can tell failure kinds apart.

use crate::config::ConfigError;
use crate::core::provider::ProviderError;
use crate::core::transport::TransportError;

/// Exit code constants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCodes;

impl ExitCodes {
    /// Success
    pub const SUCCESS: u8 = 0;

    /// General error
    pub const ERROR: u8 = 1;

    /// Invalid arguments
    pub const INVALID_ARGS: u8 = 2;

    /// Connection failed
    pub const CONNECTION_FAILED: u8 = 3;

    /// Timed out
    pub const TIMEOUT: u8 = 4;

    /// Configuration error
    pub const CONFIG_ERROR: u8 = 8;

    /// Device not found
    pub const DEVICE_NOT_FOUND: u8 = 12;

    /// Device busy
    pub const DEVICE_BUSY: u8 = 13;

    /// Provider out of service
    pub const OUT_OF_SERVICE: u8 = 18;

    /// No provider matches the criteria
    pub const NO_MATCHING_PROVIDER: u8 = 19;
}

/// Exit code for a transport error
pub fn transport_exit_code(err: &TransportError) -> u8 {
    match err {
        TransportError::Timeout(_) | TransportError::ReadStalled(_) => ExitCodes::TIMEOUT,
        TransportError::PortNotFound(_) => ExitCodes::DEVICE_NOT_FOUND,
        TransportError::DeviceBusy(_) => ExitCodes::DEVICE_BUSY,
        TransportError::InvalidAddress(_) | TransportError::Unsupported(_) => ExitCodes::INVALID_ARGS,
        TransportError::ConnectionFailed(_)
        | TransportError::PermissionDenied(_)
        | TransportError::IoError(_)
        | TransportError::NotConnected
        | TransportError::Disconnected => ExitCodes::CONNECTION_FAILED,
    }
}

/// Exit code for a provider error
pub fn provider_exit_code(err: &ProviderError) -> u8 {
    match err {
        ProviderError::InvalidArgument(_) => ExitCodes::INVALID_ARGS,
        ProviderError::OutOfService => ExitCodes::OUT_OF_SERVICE,
        ProviderError::TimedOut(_) => ExitCodes::TIMEOUT,
        ProviderError::NoMatchingProvider => ExitCodes::NO_MATCHING_PROVIDER,
        ProviderError::Transport(e) => transport_exit_code(e),
    }
}

/// Exit code for any error surfaced by the binary
pub fn exit_code_for(err: &anyhow::Error) -> u8 {
    if let Some(e) = err.downcast_ref::<ProviderError>() {
        provider_exit_code(e)
    } else if let Some(e) = err.downcast_ref::<TransportError>() {
        transport_exit_code(e)
    } else if err.downcast_ref::<ConfigError>().is_some() {
        ExitCodes::CONFIG_ERROR
    } else if let Some(e) = err.downcast_ref::<std::io::Error>() {
        match e.kind() {
            std::io::ErrorKind::NotFound => ExitCodes::DEVICE_NOT_FOUND,
            std::io::ErrorKind::TimedOut => ExitCodes::TIMEOUT,
            _ => ExitCodes::ERROR,
        }
    } else {
        ExitCodes::ERROR
    }
}

/// Exit code description
pub fn exit_code_description(code: u8) -> &'static str {
    match code {
        0 => "Success",
        1 => "General error",
        2 => "Invalid arguments",
        3 => "Connection failed",
        4 => "Timed out",
        8 => "Configuration error",
        12 => "Device not found",
        13 => "Device busy",
        18 => "Provider out of service",
        19 => "No matching provider",
        _ => "Unknown error",
    }
}
