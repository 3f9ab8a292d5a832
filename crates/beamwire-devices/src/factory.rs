/*!
 * Device factories.
 *
 * A [`DeviceFactory`] is a first-class value wrapping one async factory
 * callable together with its name, declared dependencies, build options,
 * and a one-shot memoization of its result. Factories are created at
 * registration time and live for the process lifetime; the device they
 * produce is built lazily on first use and cached thereafter.
 */
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::OnceCell;

use beamwire_core::error::{Error as CoreError, Result as CoreResult};
use beamwire_core::utils::with_timeout;

use crate::device::{BuildError, Device, Fixtures, Result};
use crate::manager::DeviceManager;

/// The boxed async callable wrapped by a factory
pub type FactoryFn =
    Arc<dyn Fn(ResolvedArgs) -> BoxFuture<'static, CoreResult<Device>> + Send + Sync>;

/// The skip option: a fixed boolean or a predicate evaluated lazily
/// at query time, so a module can declare "skip this factory on this
/// deployment" without re-registering.
#[derive(Clone)]
pub enum Skip {
    /// Skip (or don't) unconditionally
    Always(bool),
    /// Evaluate the predicate each time the skip state is queried
    When(Arc<dyn Fn() -> bool + Send + Sync>),
}

impl Skip {
    /// Evaluate the skip state
    pub fn evaluate(&self) -> bool {
        match self {
            Skip::Always(skip) => *skip,
            Skip::When(predicate) => predicate(),
        }
    }
}

impl Default for Skip {
    fn default() -> Self {
        Skip::Always(false)
    }
}

impl From<bool> for Skip {
    fn from(skip: bool) -> Self {
        Skip::Always(skip)
    }
}

impl fmt::Debug for Skip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Skip::Always(skip) => f.debug_tuple("Always").field(skip).finish(),
            Skip::When(_) => f.debug_tuple("When").field(&"<predicate>").finish(),
        }
    }
}

/// Build options captured at registration time
#[derive(Debug, Clone)]
pub struct FactoryOptions {
    /// Build the device in mock mode (no hardware connection)
    pub mock: bool,
    /// Timeout applied around the factory invocation
    pub timeout: Option<Duration>,
    /// Whether this factory is excluded from `build_all`
    pub skip: Skip,
    /// Expose the factory name to the callable so the constructed
    /// device can carry it as its externally-visible identity
    pub use_factory_name: bool,
}

impl Default for FactoryOptions {
    fn default() -> Self {
        Self {
            mock: false,
            timeout: None,
            skip: Skip::default(),
            use_factory_name: true,
        }
    }
}

/// The resolved arguments handed to a factory callable
///
/// Each declared dependency resolves to the previously-built device of
/// that name or to a caller-supplied fixture. The struct also carries
/// the factory's mock flag and, when `use_factory_name` is set, the
/// factory name.
#[derive(Debug, Clone, Default)]
pub struct ResolvedArgs {
    values: HashMap<String, Device>,
    mock: bool,
    name: Option<String>,
}

impl ResolvedArgs {
    /// Create resolved arguments from a value map
    pub fn new(values: HashMap<String, Device>, mock: bool, name: Option<String>) -> Self {
        Self { values, mock, name }
    }

    /// Get a dependency as its concrete type
    pub fn get<T: std::any::Any + Send + Sync>(&self, name: &str) -> CoreResult<Arc<T>> {
        let device = self
            .values
            .get(name)
            .ok_or_else(|| CoreError::not_found(format!("no argument named '{}'", name)))?;
        device
            .downcast::<T>(name)
            .map_err(|e| CoreError::device(e.to_string()))
    }

    /// Get a dependency as an opaque handle
    pub fn device(&self, name: &str) -> Option<&Device> {
        self.values.get(name)
    }

    /// The parameter names present in the argument map
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Whether the device should be built in mock mode
    pub fn mock(&self) -> bool {
        self.mock
    }

    /// The factory name, when the factory opted into exposing it
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

/// A registered device factory
///
/// Wraps one async callable with its declared dependency names, build
/// options, and the single-instance memoization cell.
pub struct DeviceFactory {
    name: String,
    dependencies: Vec<String>,
    options: FactoryOptions,
    callable: FactoryFn,
    cell: OnceCell<Device>,
}

impl DeviceFactory {
    /// Create a factory wrapping an async callable
    ///
    /// The factory's name doubles as the device's externally-visible
    /// identity and as the key other factories use to depend on it.
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(ResolvedArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CoreResult<Device>> + Send + 'static,
    {
        Self {
            name: name.into(),
            dependencies: Vec::new(),
            options: FactoryOptions::default(),
            callable: Arc::new(move |args| Box::pin(f(args))),
            cell: OnceCell::new(),
        }
    }

    /// Declare the factory's dependencies by parameter name
    ///
    /// Order is preserved; duplicates are dropped. The entire declared
    /// list is treated as the dependency set, defaults included.
    pub fn requires<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for dependency in dependencies {
            let dependency = dependency.into();
            if !self.dependencies.contains(&dependency) {
                self.dependencies.push(dependency);
            }
        }
        self
    }

    /// Set the build timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }

    /// Set the mock flag
    pub fn mock(mut self, mock: bool) -> Self {
        self.options.mock = mock;
        self
    }

    /// Skip (or un-skip) this factory in `build_all`
    pub fn skip(mut self, skip: bool) -> Self {
        self.options.skip = Skip::Always(skip);
        self
    }

    /// Skip this factory in `build_all` whenever the predicate holds
    pub fn skip_when<P>(mut self, predicate: P) -> Self
    where
        P: Fn() -> bool + Send + Sync + 'static,
    {
        self.options.skip = Skip::When(Arc::new(predicate));
        self
    }

    /// Control whether the callable receives the factory name
    pub fn use_factory_name(mut self, use_factory_name: bool) -> Self {
        self.options.use_factory_name = use_factory_name;
        self
    }

    /// The factory name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The declared dependency names, in declaration order
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    /// The build options
    pub fn options(&self) -> &FactoryOptions {
        &self.options
    }

    /// Whether this factory is currently skipped
    ///
    /// A `Skip::When` predicate is evaluated lazily, here.
    pub fn is_skipped(&self) -> bool {
        self.options.skip.evaluate()
    }

    /// Whether the factory has already produced its device
    pub fn is_built(&self) -> bool {
        self.cell.initialized()
    }

    /// The cached device, if the factory has already built
    pub fn cached(&self) -> Option<Device> {
        self.cell.get().cloned()
    }

    /// Invoke the factory, memoizing the result
    ///
    /// The first successful call pins the device for the process
    /// lifetime; every later call returns that same instance and the
    /// supplied arguments are **silently discarded**. Callers that need
    /// argument-sensitive construction must use distinct factories. A
    /// failed or cancelled call leaves the cell empty, so a retry may
    /// succeed.
    pub async fn call(&self, args: ResolvedArgs) -> CoreResult<Device> {
        let timeout = self.options.timeout;
        let callable = Arc::clone(&self.callable);
        self.cell
            .get_or_try_init(|| async move {
                match timeout {
                    Some(duration) => with_timeout(duration, callable(args)).await,
                    None => callable(args).await,
                }
            })
            .await
            .cloned()
    }
}

impl fmt::Debug for DeviceFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceFactory")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .field("options", &self.options)
            .field("built", &self.is_built())
            .finish()
    }
}

/// A handle to a registered factory, carrying a weak back-reference to
/// the owning manager
///
/// Obtained from [`crate::manager::SharedDeviceManager::register`].
/// `build` drives the full dependency resolution through the manager
/// and re-raises the error recorded for this factory if it failed.
#[derive(Debug, Clone)]
pub struct FactoryHandle {
    name: String,
    manager: Weak<DeviceManager>,
}

impl FactoryHandle {
    pub(crate) fn new(name: String, manager: Weak<DeviceManager>) -> Self {
        Self { name, manager }
    }

    /// The factory name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Build this factory's device, resolving its dependencies first
    ///
    /// Independent failures elsewhere in the registry are ignored; an
    /// error recorded for this factory (or raised during expansion or
    /// ordering) is returned.
    pub async fn build(&self, fixtures: Fixtures) -> Result<Device> {
        let manager = self.manager.upgrade().ok_or(BuildError::ManagerGone)?;
        let report = manager
            .build_devices([self.name.as_str()], fixtures)
            .await?;
        if let Some(device) = report.built.get(&self.name) {
            return Ok(device.clone());
        }
        match report.errors.get(&self.name) {
            Some(error) => Err(error.clone()),
            None => Err(BuildError::UnknownFactory(self.name.clone())),
        }
    }
}
