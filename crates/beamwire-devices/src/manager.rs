/*!
 * Device manager: the factory registry and dependency resolver.
 *
 * The manager holds the name-to-factory mapping, expands transitive
 * dependencies against a set of caller-supplied fixtures, computes a
 * construction order, executes factories, and collects partial-failure
 * diagnostics. Expansion and ordering failures abort before any factory
 * runs; execution failures are isolated so independent subtrees still
 * build.
 */
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{debug, info, warn, Instrument};

use beamwire_core::logging::component_span;

use crate::device::{BuildError, Device, Fixtures, Result};
use crate::factory::{DeviceFactory, FactoryHandle, ResolvedArgs};

/// Event types for the device registry
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    /// A factory was registered
    FactoryRegistered {
        /// The factory name
        name: String,
    },
    /// A device was built successfully
    DeviceBuilt {
        /// The factory name
        name: String,
    },
    /// A factory build failed
    BuildFailed {
        /// The factory name
        name: String,
        /// The recorded error
        error: BuildError,
    },
}

/// The outcome of a build: what succeeded and what failed
///
/// A partial build returns both maps so interactive tooling can keep
/// operating on the successfully-built subset while the caller decides
/// which errors to escalate.
#[derive(Debug, Clone)]
pub struct BuildReport {
    /// Successfully built devices, keyed by factory name
    pub built: HashMap<String, Device>,
    /// Recorded errors, keyed by factory name
    pub errors: HashMap<String, BuildError>,
    /// When execution started
    pub started: DateTime<Utc>,
    /// When execution finished
    pub finished: DateTime<Utc>,
}

impl BuildReport {
    /// Whether every requested factory built successfully
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }

    /// Wall-clock duration of the execution phase
    pub fn duration(&self) -> chrono::Duration {
        self.finished - self.started
    }
}

/// The device factory registry and dependency resolver
#[derive(Debug)]
pub struct DeviceManager {
    /// Registered factories, keyed by name
    factories: RwLock<HashMap<String, Arc<DeviceFactory>>>,
    /// Registration order, for deterministic tie-breaking
    order: RwLock<Vec<String>>,
    /// Fixtures registered on the manager itself
    fixtures: RwLock<Fixtures>,
    /// Event sender for registry events
    event_sender: broadcast::Sender<RegistryEvent>,
}

impl DeviceManager {
    /// Create a new device manager
    pub fn new() -> Self {
        let (event_sender, _) = broadcast::channel(100);
        Self {
            factories: RwLock::new(HashMap::new()),
            order: RwLock::new(Vec::new()),
            fixtures: RwLock::new(HashMap::new()),
            event_sender,
        }
    }

    /// Register a factory
    ///
    /// Registration never runs the factory. A duplicate name silently
    /// overwrites the previous entry, keeping its position in
    /// registration order.
    pub fn register_factory(&self, factory: DeviceFactory) -> Result<()> {
        let name = factory.name().to_string();

        let mut factories = self.factories.write().map_err(|_| BuildError::RegistryLock)?;
        let mut order = self.order.write().map_err(|_| BuildError::RegistryLock)?;

        if factories.insert(name.clone(), Arc::new(factory)).is_some() {
            warn!("Factory '{}' re-registered, previous entry replaced", name);
        } else {
            order.push(name.clone());
        }
        drop(order);
        drop(factories);

        let _ = self
            .event_sender
            .send(RegistryEvent::FactoryRegistered { name: name.clone() });
        debug!("Registered factory '{}'", name);
        Ok(())
    }

    /// Register a fixture on the manager
    ///
    /// The value is supplied directly to dependents, never built. A
    /// fixture passed to a build call with the same name wins over one
    /// registered here.
    pub fn add_fixture(&self, name: impl Into<String>, value: Device) -> Result<()> {
        let name = name.into();
        let mut fixtures = self.fixtures.write().map_err(|_| BuildError::RegistryLock)?;
        fixtures.insert(name.clone(), value);
        debug!("Registered fixture '{}'", name);
        Ok(())
    }

    /// Get a registered factory by name
    pub fn get_factory(&self, name: &str) -> Result<Arc<DeviceFactory>> {
        let factories = self.factories.read().map_err(|_| BuildError::RegistryLock)?;
        factories
            .get(name)
            .cloned()
            .ok_or_else(|| BuildError::UnknownFactory(name.to_string()))
    }

    /// Whether a factory is registered under the given name
    pub fn has_factory(&self, name: &str) -> Result<bool> {
        let factories = self.factories.read().map_err(|_| BuildError::RegistryLock)?;
        Ok(factories.contains_key(name))
    }

    /// All registered factory names, in registration order
    pub fn factory_names(&self) -> Result<Vec<String>> {
        let order = self.order.read().map_err(|_| BuildError::RegistryLock)?;
        Ok(order.clone())
    }

    /// The cached device for a factory, if it has already built
    pub fn get_device(&self, name: &str) -> Result<Option<Device>> {
        Ok(self.get_factory(name)?.cached())
    }

    /// Subscribe to registry events
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.event_sender.subscribe()
    }

    /// Build every registered factory whose skip option evaluates false
    pub async fn build_all(&self, fixtures: Fixtures) -> Result<BuildReport> {
        let mut requested = Vec::new();
        {
            let factories = self.factories.read().map_err(|_| BuildError::RegistryLock)?;
            let order = self.order.read().map_err(|_| BuildError::RegistryLock)?;
            for name in order.iter() {
                if let Some(factory) = factories.get(name) {
                    if !factory.is_skipped() {
                        requested.push(name.clone());
                    }
                }
            }
        }
        self.build_devices(requested, fixtures).await
    }

    /// Build the requested factories plus their transitive requirements
    ///
    /// Expansion and ordering failures (`MissingDependency`,
    /// `CycleDetected`) abort the whole build before any factory runs.
    /// Execution failures are recorded per factory in the returned
    /// report; downstream factories of a failed one are short-circuited
    /// with a `DependencyFailed` entry and independent subtrees still
    /// build.
    pub async fn build_devices<I, S>(&self, requested: I, fixtures: Fixtures) -> Result<BuildReport>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let requested: Vec<String> = requested.into_iter().map(Into::into).collect();

        // Call-supplied fixtures win over manager-registered ones
        let mut effective_fixtures = {
            let registered = self.fixtures.read().map_err(|_| BuildError::RegistryLock)?;
            registered.clone()
        };
        effective_fixtures.extend(fixtures);

        let expanded = self.expand_dependencies(&requested, &effective_fixtures)?;
        let ordered = self.resolve_order(&expanded, &effective_fixtures)?;

        debug!(
            "Building {} factories in order: {:?}",
            ordered.len(),
            ordered
        );
        let report = self.execute(&ordered, &effective_fixtures).await?;
        info!(
            "Build finished: {} built, {} failed",
            report.built.len(),
            report.errors.len()
        );
        Ok(report)
    }

    /// Expand the requested set to the full set of factories to build
    ///
    /// Worklist iteration over declared parameter names. A parameter
    /// satisfied by a fixture does not pull in a factory of the same
    /// name, unless that factory has already produced a cached result
    /// (in which case the cache wins and the factory is scheduled; its
    /// invocation is a cache hit). A parameter satisfied by nothing
    /// fails the whole build before any factory runs.
    fn expand_dependencies(
        &self,
        requested: &[String],
        fixtures: &Fixtures,
    ) -> Result<Vec<String>> {
        let factories = self.factories.read().map_err(|_| BuildError::RegistryLock)?;

        let mut expanded: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut worklist: VecDeque<String> = VecDeque::new();

        for name in requested {
            if !factories.contains_key(name) {
                return Err(BuildError::UnknownFactory(name.clone()));
            }
            if seen.insert(name.clone()) {
                expanded.push(name.clone());
                worklist.push_back(name.clone());
            }
        }

        while let Some(name) = worklist.pop_front() {
            let factory = match factories.get(&name) {
                Some(factory) => Arc::clone(factory),
                None => continue,
            };

            let mut missing = Vec::new();
            for dependency in factory.dependencies() {
                // A factory listing its own name is satisfied by itself
                if dependency == &name || seen.contains(dependency) {
                    continue;
                }
                if fixtures.contains_key(dependency) {
                    match factories.get(dependency) {
                        // Cached result wins over a same-named fixture
                        Some(existing) if existing.is_built() => {}
                        _ => continue,
                    }
                } else if !factories.contains_key(dependency) {
                    missing.push(dependency.clone());
                    continue;
                }
                seen.insert(dependency.clone());
                expanded.push(dependency.clone());
                worklist.push_back(dependency.clone());
            }

            if !missing.is_empty() {
                return Err(BuildError::MissingDependency {
                    factory: name,
                    missing,
                });
            }
        }

        Ok(expanded)
    }

    /// Order the expanded set so every factory follows its dependencies
    ///
    /// Repeatedly scans the pending list, moving each factory whose
    /// dependencies are all available (fixtures first, then scheduled
    /// factories). A pass that moves nothing means a cycle. Tie-breaks
    /// within a pass follow the pending list's insertion order.
    fn resolve_order(&self, expanded: &[String], fixtures: &Fixtures) -> Result<Vec<String>> {
        let factories = self.factories.read().map_err(|_| BuildError::RegistryLock)?;

        let scheduled: HashSet<&str> = expanded.iter().map(String::as_str).collect();
        // A fixture name shadowed by a scheduled factory becomes
        // available only once that factory is ordered
        let mut available: HashSet<String> = fixtures
            .keys()
            .filter(|name| !scheduled.contains(name.as_str()))
            .cloned()
            .collect();

        let mut pending: Vec<String> = expanded.to_vec();
        let mut ordered: Vec<String> = Vec::new();

        while !pending.is_empty() {
            let mut moved = false;
            let mut still_pending = Vec::new();

            for name in pending {
                let ready = match factories.get(&name) {
                    Some(factory) => factory
                        .dependencies()
                        .iter()
                        .filter(|dependency| *dependency != &name)
                        .all(|dependency| available.contains(dependency)),
                    None => false,
                };
                if ready {
                    available.insert(name.clone());
                    ordered.push(name);
                    moved = true;
                } else {
                    still_pending.push(name);
                }
            }

            if !moved {
                return Err(BuildError::CycleDetected {
                    remaining: still_pending,
                });
            }
            pending = still_pending;
        }

        Ok(ordered)
    }

    /// Execute the ordered factories, collecting partial failures
    async fn execute(&self, ordered: &[String], fixtures: &Fixtures) -> Result<BuildReport> {
        let factories: Vec<Arc<DeviceFactory>> = {
            let map = self.factories.read().map_err(|_| BuildError::RegistryLock)?;
            ordered
                .iter()
                .filter_map(|name| map.get(name).cloned())
                .collect()
        };

        let started = Utc::now();
        let mut built: HashMap<String, Device> = HashMap::new();
        let mut errors: HashMap<String, BuildError> = HashMap::new();

        for factory in factories {
            let name = factory.name().to_string();

            let failed: Vec<String> = factory
                .dependencies()
                .iter()
                .filter(|dependency| *dependency != &name && errors.contains_key(*dependency))
                .cloned()
                .collect();
            if !failed.is_empty() {
                let error = BuildError::DependencyFailed {
                    factory: name.clone(),
                    failed,
                };
                warn!("Skipping factory '{}': {}", name, error);
                let _ = self.event_sender.send(RegistryEvent::BuildFailed {
                    name: name.clone(),
                    error: error.clone(),
                });
                errors.insert(name, error);
                continue;
            }

            let mut values = HashMap::new();
            for dependency in factory.dependencies() {
                if dependency == &name {
                    // Self-parameter: only a fixture can fill it
                    if let Some(device) = fixtures.get(dependency) {
                        values.insert(dependency.clone(), device.clone());
                    }
                    continue;
                }
                if let Some(device) = built.get(dependency) {
                    values.insert(dependency.clone(), device.clone());
                } else if let Some(device) = fixtures.get(dependency) {
                    values.insert(dependency.clone(), device.clone());
                }
            }

            let args_name = factory
                .options()
                .use_factory_name
                .then(|| name.clone());
            let args = ResolvedArgs::new(values, factory.options().mock, args_name);

            let span = component_span(&name, None);
            match factory.call(args).instrument(span).await {
                Ok(device) => {
                    debug!("Built device '{}'", name);
                    let _ = self
                        .event_sender
                        .send(RegistryEvent::DeviceBuilt { name: name.clone() });
                    built.insert(name, device);
                }
                Err(source) => {
                    let error = BuildError::Factory {
                        factory: name.clone(),
                        source,
                    };
                    warn!("Factory '{}' failed: {}", name, error);
                    let _ = self.event_sender.send(RegistryEvent::BuildFailed {
                        name: name.clone(),
                        error: error.clone(),
                    });
                    errors.insert(name, error);
                }
            }
        }

        Ok(BuildReport {
            built,
            errors,
            started,
            finished: Utc::now(),
        })
    }

    /// Count registered factories
    pub fn count_factories(&self) -> Result<usize> {
        let factories = self.factories.read().map_err(|_| BuildError::RegistryLock)?;
        Ok(factories.len())
    }
}

impl Default for DeviceManager {
    fn default() -> Self {
        Self::new()
    }
}

/// A shared device manager that can be cloned
///
/// Registration through the shared wrapper returns a [`FactoryHandle`]
/// carrying a weak back-reference to the manager, so a factory can be
/// built through its handle without keeping the manager alive.
#[derive(Debug, Clone)]
pub struct SharedDeviceManager(Arc<DeviceManager>);

impl SharedDeviceManager {
    /// Create a new shared device manager
    pub fn new() -> Self {
        Self(Arc::new(DeviceManager::new()))
    }

    /// Get a reference to the device manager
    pub fn manager(&self) -> &DeviceManager {
        &self.0
    }

    /// Register a factory, returning a handle for managed builds
    pub fn register(&self, factory: DeviceFactory) -> Result<FactoryHandle> {
        let name = factory.name().to_string();
        self.0.register_factory(factory)?;
        Ok(FactoryHandle::new(name, Arc::downgrade(&self.0)))
    }
}

impl Default for SharedDeviceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl AsRef<DeviceManager> for SharedDeviceManager {
    fn as_ref(&self) -> &DeviceManager {
        self.manager()
    }
}
