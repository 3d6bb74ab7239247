/*!
 * Prelude module for AdapterFlow Core.
 *
 * This module re-exports commonly used types and functions from the AdapterFlow Core crate
 * to make them easier to import.
 */

// Re-export error types
pub use crate::error::{Error, Result};

// Re-export core types
pub use crate::types::{DeviceId, Value};

// Re-export config types
pub use crate::config::{Config, ConfigBuilder, DeviceStateConfig, SharedConfig};

// Re-export utility functions
pub use crate::utils::{box_future, duration_to_millis, millis_to_duration, with_timeout};

// Re-export logging helpers
pub use crate::logging::{component_span, operation_span};
pub use tracing::{debug, error, info, trace, warn};

// Re-export core initialization
pub use crate::{init, init_with_config};
