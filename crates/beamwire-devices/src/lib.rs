/*!
 * Beamwire Devices
 *
 * This crate provides the device factory registry and dependency
 * resolution layer for beamwire: declarative factory registration,
 * dependency graph expansion, topological ordering, single-instance
 * caching, and partial-failure reporting.
 */

#![warn(missing_docs)]

// Re-export core prelude
pub use beamwire_core::prelude;

pub mod device;
pub mod factory;
pub mod manager;

// Re-export the principal types
pub use device::{BuildError, Device, Fixtures};
pub use factory::{DeviceFactory, FactoryHandle, FactoryOptions, ResolvedArgs, Skip};
pub use manager::{BuildReport, DeviceManager, RegistryEvent, SharedDeviceManager};

/// Beamwire devices crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the device system
pub fn init() -> Result<(), beamwire_core::error::Error> {
    tracing::info!("Beamwire Devices {} initialized", VERSION);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
