/*!
 * Beamwire Visit
 *
 * This crate ties acquired data files to a numbered data collection
 * within an experimental visit: a client for the remote numbering
 * service (with a local in-memory variant for tests and offline runs)
 * and a path provider deriving per-device file paths from the active
 * collection.
 */

#![warn(missing_docs)]

// Re-export core prelude
pub use beamwire_core::prelude;

pub mod collection;
pub mod error;
pub mod provider;

// Re-export the principal types
pub use collection::{
    CollectionClient, CollectionNumber, LocalCollectionClient, RemoteCollectionClient,
};
pub use error::{Result, VisitError};
pub use provider::{DataPath, PathProvider, VisitPathProvider};

/// Beamwire visit crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the visit system
pub fn init() -> Result<()> {
    tracing::info!("Beamwire Visit {} initialized", VERSION);
    Ok(())
}
