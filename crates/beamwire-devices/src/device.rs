/*!
 * Opaque device handles and build-error taxonomy.
 *
 * The manager never looks inside a device: factories produce opaque,
 * cheaply-cloneable handles and consumers recover the concrete type
 * with a checked downcast. Leaf device control logic lives in the
 * external control framework, not here.
 */
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use beamwire_core::error::Error as CoreError;

/// Error type for dependency resolution and device construction
///
/// `Clone` is required because execution errors are recorded in the
/// partial-failure map of a [`crate::manager::BuildReport`] and
/// re-raised later from [`crate::factory::FactoryHandle::build`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// A parameter could not be satisfied by any factory or fixture.
    /// Raised during expansion, before any factory has run.
    #[error("Missing dependencies for factory '{factory}': {}", .missing.join(", "))]
    MissingDependency {
        /// The factory whose parameters could not be satisfied
        factory: String,
        /// Every unsatisfied parameter name
        missing: Vec<String>,
    },

    /// A dependency cycle prevented ordering. Raised during ordering,
    /// before any factory has run.
    #[error("Dependency cycle among factories: {}", .remaining.join(", "))]
    CycleDetected {
        /// The factories that could not be ordered
        remaining: Vec<String>,
    },

    /// An upstream dependency of this factory failed to build, so the
    /// factory was never invoked.
    #[error("Dependencies of factory '{factory}' failed to build: {}", .failed.join(", "))]
    DependencyFailed {
        /// The factory that was short-circuited
        factory: String,
        /// The upstream factories that failed
        failed: Vec<String>,
    },

    /// The factory callable itself returned an error
    #[error("Factory '{factory}' failed: {source}")]
    Factory {
        /// The factory that failed
        factory: String,
        /// The underlying error
        #[source]
        source: CoreError,
    },

    /// A device handle held a different concrete type than requested
    #[error("Device '{name}' is not of type {expected}")]
    TypeMismatch {
        /// The device name
        name: String,
        /// The requested concrete type
        expected: &'static str,
    },

    /// A requested factory name is not registered
    #[error("No factory registered under '{0}'")]
    UnknownFactory(String),

    /// The owning manager has been dropped
    #[error("Device manager has been dropped")]
    ManagerGone,

    /// The registry lock was poisoned
    #[error("Failed to acquire lock on factory registry")]
    RegistryLock,
}

/// Result type for device operations
pub type Result<T> = std::result::Result<T, BuildError>;

/// An opaque, cheaply-cloneable handle to a built device
///
/// Factories return `Device` handles; the manager caches and routes
/// them by name without ever inspecting the payload. Consumers that
/// know the concrete type recover it with [`Device::downcast`].
#[derive(Clone)]
pub struct Device(Arc<dyn Any + Send + Sync>);

impl Device {
    /// Wrap a concrete device object in an opaque handle
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    /// Wrap an already-shared device object
    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self(value)
    }

    /// Recover the concrete device type
    ///
    /// # Arguments
    ///
    /// * `name` - The device name, used only for the error message
    pub fn downcast<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>> {
        self.0
            .clone()
            .downcast::<T>()
            .map_err(|_| BuildError::TypeMismatch {
                name: name.to_string(),
                expected: std::any::type_name::<T>(),
            })
    }

    /// Check whether the handle holds the given concrete type
    pub fn is<T: Any + Send + Sync>(&self) -> bool {
        self.0.as_ref().is::<T>()
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Device").field(&"<opaque>").finish()
    }
}

impl<T: Any + Send + Sync> From<Arc<T>> for Device {
    fn from(value: Arc<T>) -> Self {
        Self::from_arc(value)
    }
}

/// Caller-supplied values injected by parameter name
///
/// A fixture satisfies a dependency without running a factory; a
/// fixture whose name matches a registered factory overrides it.
pub type Fixtures = HashMap<String, Device>;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Shutter {
        open: bool,
    }

    #[test]
    fn test_downcast_roundtrip() {
        let device = Device::new(Shutter { open: true });
        let shutter = device.downcast::<Shutter>("shutter").unwrap();
        assert!(shutter.open);
    }

    #[test]
    fn test_downcast_wrong_type() {
        let device = Device::new(Shutter { open: false });
        let err = device.downcast::<String>("shutter").unwrap_err();
        assert!(
            matches!(err, BuildError::TypeMismatch { ref name, .. } if name.as_str() == "shutter")
        );
    }

    #[test]
    fn test_clone_shares_instance() {
        let device = Device::new(Shutter { open: true });
        let a = device.downcast::<Shutter>("s").unwrap();
        let b = device.clone().downcast::<Shutter>("s").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_error_messages_name_offenders() {
        let err = BuildError::MissingDependency {
            factory: "detector".to_string(),
            missing: vec!["path_provider".to_string(), "beam".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("detector"));
        assert!(msg.contains("path_provider"));
        assert!(msg.contains("beam"));

        let err = BuildError::CycleDetected {
            remaining: vec!["x".to_string(), "y".to_string()],
        };
        assert!(err.to_string().contains("x"));
        assert!(err.to_string().contains("y"));
    }
}
