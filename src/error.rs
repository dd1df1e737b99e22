//! Centralized error types for the gateway
//!
//! All gateway errors are represented by the `GatewayError` enum.
//! Use `Result<T>` as shorthand for `std::result::Result<T, GatewayError>`.
//!
//! Device-level conditions split into two families on purpose: SDK faults
//! travel as `GatewayError::Device`, while negative business outcomes
//! (declined, no host connection) are plain responses and never errors.

use crate::terminal::DeviceError;
use std::fmt;
use std::path::PathBuf;

/// All gateway errors
#[derive(Debug)]
pub enum GatewayError {
    // === Configuration (fatal at startup) ===
    /// Failed to read the config file
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Config file did not parse
    ConfigParse { path: PathBuf, reason: String },
    /// Invalid config value
    ConfigValidation { field: &'static str, reason: String },

    // === Network ===
    /// Failed to bind the EPOS listening port (fatal)
    Bind { port: u16, source: std::io::Error },
    /// Client socket read/write failed; logged, never fatal
    ClientIo { source: std::io::Error },

    // === Device ===
    /// The terminal SDK surface reported a fault
    Device(DeviceError),

    // === Runtime ===
    /// Tokio runtime creation failed
    Runtime { source: std::io::Error },
}

impl std::error::Error for GatewayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ConfigRead { source, .. }
            | Self::Bind { source, .. }
            | Self::ClientIo { source }
            | Self::Runtime { source } => Some(source),
            Self::Device(source) => Some(source),
            _ => None,
        }
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigRead { path, .. } => {
                write!(f, "Cannot read config: {}", path.display())
            }
            Self::ConfigParse { path, reason } => {
                write!(f, "Config parse error in {}: {}", path.display(), reason)
            }
            Self::ConfigValidation { field, reason } => {
                write!(f, "Invalid {}: {}", field, reason)
            }
            Self::Bind { port, .. } => write!(f, "Cannot bind EPOS port {}", port),
            Self::ClientIo { source } => write!(f, "EPOS socket error: {}", source),
            Self::Device(e) => write!(f, "Terminal error: {}", e),
            Self::Runtime { .. } => write!(f, "Failed to create runtime"),
        }
    }
}

impl From<DeviceError> for GatewayError {
    fn from(e: DeviceError) -> Self {
        Self::Device(e)
    }
}

/// Alias for Result with GatewayError
pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terminal::DeviceStatus;
    use std::error::Error;

    #[test]
    fn test_device_faults_convert_and_display_with_their_stage() {
        let fault = DeviceError::Sdk {
            status: DeviceStatus::CommunicationError,
            stage: "terminal link open",
        };
        let error: GatewayError = fault.into();
        assert_eq!(
            error.to_string(),
            "Terminal error: ECR_COMMUNICATION_ERROR during terminal link open"
        );
        assert!(error.source().is_some());
    }

    #[test]
    fn test_runtime_failure_keeps_its_io_source() {
        let error = GatewayError::Runtime {
            source: std::io::Error::new(std::io::ErrorKind::Other, "thread spawn failed"),
        };
        assert_eq!(error.to_string(), "Failed to create runtime");
        assert_eq!(
            error.source().unwrap().to_string(),
            "thread spawn failed"
        );
    }
}
