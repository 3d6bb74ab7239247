/*!
 * Logging functionality for AdapterFlow.
 *
 * This module provides tracing setup and span helpers so the registry, cache
 * and resolver log with consistent fields.
 */
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{Error, Result};

/// Initialize the logging system with default configuration
pub fn init() -> Result<()> {
    init_with_filter("info")
}

/// Initialize the logging system with a specific filter
///
/// `RUST_LOG` takes precedence over `filter` when it is set.
///
/// # Arguments
///
/// * `filter` - The log filter string (e.g., "info", "debug", "adapterflow_devices=trace")
pub fn init_with_filter(filter: &str) -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(env_filter(filter))
        .try_init()
        .map_err(|e| Error::logging(format!("Failed to initialize logging: {}", e)))
}

/// Initialize the logging system from the logging section of the configuration
pub fn init_from_config(config: &LoggingConfig) -> Result<()> {
    if !config.json_format {
        return init_with_filter(&config.level);
    }

    tracing_subscriber::registry()
        .with(fmt::layer().json().with_target(true))
        .with(env_filter(&config.level))
        .try_init()
        .map_err(|e| Error::logging(format!("Failed to initialize logging: {}", e)))
}

fn env_filter(fallback: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
}

/// A type alias for a tracing span
pub type Span = tracing::Span;

/// Create a new span for a component
///
/// # Arguments
///
/// * `name` - The name of the component
/// * `id` - An optional ID for the component instance
pub fn component_span(name: &str, id: Option<&str>) -> Span {
    match id {
        Some(id) => tracing::info_span!("component", name = %name, id = %id),
        None => tracing::info_span!("component", name = %name),
    }
}

/// Create a new span for an operation
///
/// # Arguments
///
/// * `name` - The name of the operation
/// * `component` - The component performing the operation
pub fn operation_span(name: &str, component: &str) -> Span {
    tracing::info_span!("operation", name = %name, component = %component)
}
