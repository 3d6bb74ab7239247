/*!
 * AdapterFlow Core
 *
 * This crate provides the shared foundation for the AdapterFlow device state
 * core: identifiers and values, configuration, logging and error types.
 */

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod logging;
pub mod prelude;
pub mod types;
pub mod utils;

/// Re-export of dependencies that are part of the public API
pub mod deps {
    pub use anyhow;
    pub use chrono;
    pub use futures;
    pub use serde;
    pub use tokio;
    pub use tracing;
}

/// AdapterFlow core crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library initialization
pub fn init() -> Result<(), error::Error> {
    logging::init()?;
    tracing::info!("AdapterFlow Core {} initialized", VERSION);
    Ok(())
}

/// Library initialization driven by a loaded configuration
pub fn init_with_config(config: &config::Config) -> Result<(), error::Error> {
    logging::init_from_config(&config.logging)?;
    tracing::info!(
        app = %config.general.app_name,
        environment = %config.general.environment,
        "AdapterFlow Core {} initialized",
        VERSION
    );
    Ok(())
}
