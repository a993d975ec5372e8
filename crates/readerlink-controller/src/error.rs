//! Error types for reader controller operations.

use readerlink_hardware::ConnectorError;

/// Result type alias for controller operations.
pub type Result<T> = std::result::Result<T, ControllerError>;

/// Errors surfaced by a [`ReaderController`](crate::ReaderController).
///
/// Validation problems (bad properties, unknown capability, unknown ids) are
/// reported to the immediate caller and never retried. Connector failures are
/// wrapped unchanged so callers can still classify them.
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    /// A controller property has a value that cannot be parsed.
    #[error("Invalid value '{value}' for property {key}: {reason}")]
    InvalidProperty {
        key: String,
        value: String,
        reason: String,
    },

    /// A `Controller.` property that the controller does not know.
    #[error("Unrecognized property: {0}")]
    UnknownProperty(String),

    /// A capability name the connector contract does not define.
    #[error("Unknown capability: {0}")]
    UnknownCapability(String),

    /// No operation or observation is defined under this id.
    #[error("Unknown operation id: {0}")]
    UnknownOperation(u32),

    /// The id is already taken by another operation, observation or
    /// execution.
    #[error("Operation id {0} is already in use")]
    OperationIdInUse(u32),

    /// Every port of the network port pool is in use or still blocked.
    #[error("No network port available")]
    PortPoolExhausted,

    /// A serial worker no longer accepts jobs.
    #[error("{0} worker stopped")]
    WorkerStopped(&'static str),

    /// The controller has been disposed.
    #[error("Controller {0} disposed")]
    Disposed(String),

    /// The registry has no factory for this connector type.
    #[error("Unknown connector type: {0}")]
    UnknownConnectorType(String),

    /// The connector failed.
    #[error(transparent)]
    Connector(#[from] ConnectorError),
}

impl ControllerError {
    /// Create a new invalid property error.
    pub fn invalid_property(
        key: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidProperty {
            key: key.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Check if the request was rejected before reaching the connector, or
    /// the connector rejected it as invalid.
    pub fn is_validation(&self) -> bool {
        match self {
            Self::InvalidProperty { .. }
            | Self::UnknownProperty(_)
            | Self::UnknownCapability(_)
            | Self::UnknownOperation(_)
            | Self::OperationIdInUse(_)
            | Self::UnknownConnectorType(_) => true,
            Self::Connector(error) => error.is_validation(),
            _ => false,
        }
    }
}
