/*!
 * AdapterFlow Devices
 *
 * This crate provides the device state core of an AdapterFlow adapter: the
 * registry of device instances, the per-device promise cache, and the
 * resolver that lazily discovers handlers for unknown devices.
 */

#![warn(missing_docs)]

// Re-export core types
pub use adapterflow_core::prelude;

pub mod cache;
pub mod discovery;
pub mod error;
pub mod registry;

pub use cache::{CacheOutput, CachedOperation, PromiseCache};
pub use discovery::{
    AdapterDescriptor, DiscoveryResolver, DynamicAdapterContext, RequestHandler,
    ResolutionContext, DISCOVERY_COMPONENT,
};
pub use error::{DeviceError, Result};
pub use registry::{DeviceSnapshot, DeviceStateRegistry, SharedDeviceStateRegistry, StateChangeObserver};

/// AdapterFlow devices crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the device system
pub fn init() -> Result<()> {
    tracing::info!("AdapterFlow Devices {} initialized", VERSION);
    Ok(())
}
