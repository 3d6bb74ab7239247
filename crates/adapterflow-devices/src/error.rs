/*!
 * Error types for the AdapterFlow devices crate.
 */
use std::sync::Arc;

use thiserror::Error;

use adapterflow_core::error::Error as CoreError;
use adapterflow_core::types::DeviceId;

/// Error type for device state and resolution operations
#[derive(Error, Debug)]
pub enum DeviceError {
    /// A state change observer was already registered on this registry
    #[error("State change observer already registered")]
    AlreadyRegistered,

    /// A cache was read without a supplier and holds no valid operation
    #[error("No supplier defined")]
    NoSupplier,

    /// The device id is not registered
    #[error("Invalid id: {0}")]
    InvalidId(DeviceId),

    /// The adapter bound to the request has no discovery component
    #[error("No discover component found")]
    NoDiscoverComponentFound,

    /// The request context is missing data the resolver needs
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The external discovery call failed; concurrent resolutions share it
    #[error("Discovery failed: {0}")]
    Discovery(Arc<anyhow::Error>),

    /// A cached operation failed; every caller sharing it sees the same error
    #[error("Cached operation failed: {0}")]
    Cached(Arc<DeviceError>),

    /// Other error
    #[error("Other error: {0}")]
    Other(String),

    /// Core error
    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

/// Result type for device operations
pub type Result<T> = std::result::Result<T, DeviceError>;

impl DeviceError {
    /// Stable error code the transport layer can put in a response body
    pub fn code(&self) -> &'static str {
        match self {
            DeviceError::AlreadyRegistered => "ALREADY_REGISTERED",
            DeviceError::NoSupplier => "NO_SUPPLIER_DEFINED",
            DeviceError::InvalidId(_) => "INVALID_ID",
            DeviceError::NoDiscoverComponentFound => "NO_DISCOVER_COMPONENT_FOUND",
            DeviceError::InvalidRequest(_) => "INVALID_REQUEST",
            DeviceError::Discovery(_) => "DISCOVERY_FAILED",
            DeviceError::Cached(inner) => inner.code(),
            DeviceError::Other(_) => "OTHER",
            DeviceError::Core(_) => "CORE",
        }
    }

    /// Create a new invalid request error
    pub fn invalid_request<S: AsRef<str>>(msg: S) -> Self {
        DeviceError::InvalidRequest(msg.as_ref().to_string())
    }

    /// Create a new other error
    pub fn other<S: AsRef<str>>(msg: S) -> Self {
        DeviceError::Other(msg.as_ref().to_string())
    }

    /// Whether this error signals caller misuse rather than a runtime miss
    pub fn is_configuration(&self) -> bool {
        matches!(self, DeviceError::AlreadyRegistered | DeviceError::NoSupplier)
    }
}
