use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Errors returned by the coordinator, the transports and the device client.
///
/// The error is `Clone` because the coordinator keeps a copy as the last observed error while
/// returning the original to the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[allow(missing_docs)]
pub enum Error {
    #[error("Cannot create transport: {0}")]
    TransportCreation(String),

    #[error("Device Error: {0}")]
    Device(DeviceError),

    #[error("Timeout while {operation} after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("Cannot construct device client: {0}")]
    ClientConstruction(String),

    #[error("Transport Error: {0}")]
    Transport(String),

    #[error("Message must be ascii")]
    NonAsciiMessage,

    #[error("Account range starting at {from} with limit {limit} overflows")]
    AccountRangeOverflow { from: u32, limit: u32 },

    #[error("Background reconnect failed: {0}")]
    ReconnectTask(String),

    /// Failure of a [`crate::DeviceClient`] implementation that fits no other variant
    #[error("{0}")]
    Generic(String),
}

/// A rejection reported by the device for an APDU-level call
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DeviceError {
    /// The status word returned by the device
    pub code: u16,

    /// Human readable reason, as decoded by the device client
    pub message: String,
}

impl DeviceError {
    /// Creates a device error from a status word and a reason
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for DeviceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Error code: {:#06x} - message: {}", self.code, self.message)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Transport(e.to_string())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Error::ReconnectTask(e.to_string())
    }
}
