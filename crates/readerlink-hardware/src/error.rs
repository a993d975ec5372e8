//! Error types for connector operations.
//!
//! Connectors fail in two broad ways: the request itself was invalid for the
//! current state of the driver (bad input, not connected, unknown capability),
//! or the driver or the hardware behind it failed. Callers branch on
//! [`ConnectorError::is_validation`] and [`ConnectorError::is_connection_lost`]
//! rather than on individual variants.

/// Result type alias for connector operations.
pub type Result<T> = std::result::Result<T, ConnectorError>;

/// Errors that can occur during connector operations.
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    /// The request was invalid for the connector's current state.
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// The driver failed while processing a valid request.
    #[error("Implementation error: {message}")]
    Implementation { message: String },

    /// The physical reader is not reachable any more.
    #[error("Device disconnected: {device}")]
    Disconnected { device: String },

    /// Operation is not supported by this connector.
    #[error("Unsupported operation: {operation}")]
    Unsupported { operation: String },

    /// Operation timed out after specified duration.
    #[error("Operation timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConnectorError {
    /// Create a new validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a new implementation error.
    pub fn implementation(message: impl Into<String>) -> Self {
        Self::Implementation {
            message: message.into(),
        }
    }

    /// Create a new disconnected error.
    pub fn disconnected(device: impl Into<String>) -> Self {
        Self::Disconnected {
            device: device.into(),
        }
    }

    /// Create a new unsupported operation error.
    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.into(),
        }
    }

    /// Create a new timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Check if the request was rejected as invalid.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. } | Self::Unsupported { .. })
    }

    /// Check if the error means the connection to the reader is gone.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Self::Disconnected { .. } | Self::Io(_))
    }
}
