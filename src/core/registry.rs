//! Builder registry
//!
//! Maps builder ids to constructors and caches one [`BuilderInstance`] per
//! `(project, config, builder, spec index)`. Resolution of a key runs the
//! constructor exactly once, even when several threads ask concurrently; the
//! later callers block and share the first caller's instance.
//!
//! Persisted builder state is parked here until the matching instance is
//! first created.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, RwLock};

use crate::core::builder::{Builder, BuilderInstance, BuilderState, InstanceKey};
use crate::core::persist::{take_matching, PersistentBuilderInfo};
use crate::core::project::{BuildCommand, BuildConfiguration, Project};

/// Constructor of a builder body
pub type BuilderFactory =
    Arc<dyn Fn(&BuildCommand) -> Result<Box<dyn Builder>, String> + Send + Sync>;

/// Registration of a builder type
#[derive(Clone)]
pub struct BuilderDescriptor {
    /// Builder identity used in build specs
    pub id: String,
    /// Human-readable name
    pub label: String,
    /// Capability a project must declare for the builder to run
    pub capability: Option<String>,
    /// Run on incremental builds even when nothing changed
    pub call_on_empty_delta: bool,
    factory: BuilderFactory,
}

impl BuilderDescriptor {
    /// Register `id` with a constructor
    pub fn new<F>(id: &str, factory: F) -> Self
    where
        F: Fn(&BuildCommand) -> Result<Box<dyn Builder>, String> + Send + Sync + 'static,
    {
        Self {
            id: id.to_string(),
            label: id.to_string(),
            capability: None,
            call_on_empty_delta: false,
            factory: Arc::new(factory),
        }
    }

    /// Set the human-readable name
    #[must_use]
    pub fn with_label(mut self, label: &str) -> Self {
        self.label = label.to_string();
        self
    }

    /// Require a project capability
    #[must_use]
    pub fn requires_capability(mut self, capability: &str) -> Self {
        self.capability = Some(capability.to_string());
        self
    }

    /// Run on every incremental build
    #[must_use]
    pub fn call_on_empty_delta(mut self) -> Self {
        self.call_on_empty_delta = true;
        self
    }

    /// Construct a builder body for `command`
    pub fn instantiate(&self, command: &BuildCommand) -> Result<Box<dyn Builder>, String> {
        (self.factory)(command)
    }
}

impl std::fmt::Debug for BuilderDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuilderDescriptor")
            .field("id", &self.id)
            .field("capability", &self.capability)
            .field("call_on_empty_delta", &self.call_on_empty_delta)
            .finish_non_exhaustive()
    }
}

/// Outcome of resolving a build command
#[derive(Debug)]
pub enum Resolution {
    /// Invoke this instance
    Ready(Arc<BuilderInstance>),
    /// The project's capability is disabled; do not run
    Skip,
    /// The project lacks the capability; drop the command from the build spec
    Remove,
}

type Slot = Arc<OnceLock<Arc<BuilderInstance>>>;

/// Builder types and live instances
#[derive(Default)]
pub struct BuilderRegistry {
    descriptors: RwLock<BTreeMap<String, BuilderDescriptor>>,
    instances: Mutex<BTreeMap<InstanceKey, Slot>>,
    pending: Mutex<BTreeMap<String, Vec<PersistentBuilderInfo>>>,
    restored: AtomicBool,
    warned: Mutex<BTreeSet<String>>,
}

impl BuilderRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a builder type, replacing any previous one with the same id
    pub fn register(&self, descriptor: BuilderDescriptor) {
        tracing::debug!("Registering builder '{}'", descriptor.id);
        self.descriptors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(descriptor.id.clone(), descriptor);
    }

    /// Registered descriptor for `id`
    pub fn descriptor(&self, id: &str) -> Option<BuilderDescriptor> {
        self.descriptors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    fn lock_instances(&self) -> MutexGuard<'_, BTreeMap<InstanceKey, Slot>> {
        self.instances.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_pending(&self) -> MutexGuard<'_, BTreeMap<String, Vec<PersistentBuilderInfo>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Instance key of `command` for `config`
    pub fn key_for(
        config: &BuildConfiguration,
        command: &BuildCommand,
        index: Option<usize>,
    ) -> InstanceKey {
        InstanceKey {
            project: config.project.clone(),
            config: command.per_config.then(|| config.name.clone()),
            builder: command.builder.clone(),
            index,
        }
    }

    /// Resolve the instance for a build command
    ///
    /// Creates the instance on first use, seeding it with persisted state.
    /// Unknown ids and failing constructors yield a missing-builder
    /// placeholder. Capability checks run after instantiation.
    pub fn resolve(
        &self,
        project: &Project,
        config: &BuildConfiguration,
        command: &BuildCommand,
        index: Option<usize>,
    ) -> Resolution {
        let descriptor = self.descriptor(&command.builder);
        let key = Self::key_for(config, command, index);

        let slot = Arc::clone(self.lock_instances().entry(key.clone()).or_default());
        let instance = Arc::clone(
            slot.get_or_init(|| Arc::new(self.instantiate(key, command, descriptor.as_ref()))),
        );

        if let Some(capability) = descriptor.as_ref().and_then(|d| d.capability.as_deref()) {
            if !project.has_capability(capability) {
                tracing::warn!(
                    "Removing builder '{}' from '{}': capability '{capability}' is not declared",
                    command.builder,
                    project.name
                );
                return Resolution::Remove;
            }
            if !project.is_capability_enabled(capability) {
                tracing::debug!(
                    "Skipping builder '{}' on '{}': capability '{capability}' is disabled",
                    command.builder,
                    project.name
                );
                instance.set_last_built(None);
                return Resolution::Skip;
            }
        }

        Resolution::Ready(instance)
    }

    fn instantiate(
        &self,
        key: InstanceKey,
        command: &BuildCommand,
        descriptor: Option<&BuilderDescriptor>,
    ) -> BuilderInstance {
        let state = self
            .take_pending(&key)
            .map(|info| BuilderState {
                last_built: info.last_built,
                interesting_projects: info.interesting_projects,
            })
            .unwrap_or_default();

        let instance = match descriptor {
            None => {
                self.warn_once(&key.builder, "no builder is registered under this id");
                BuilderInstance::missing(key, "no builder is registered under this id")
            }
            Some(descriptor) => match descriptor.instantiate(command) {
                Ok(body) => {
                    tracing::debug!("Instantiated builder '{}' for '{}'", key.builder, key.project);
                    BuilderInstance::new(key, &descriptor.label, body)
                        .with_call_on_empty_delta(descriptor.call_on_empty_delta)
                }
                Err(reason) => {
                    self.warn_once(&key.builder, &reason);
                    BuilderInstance::missing(key, &reason)
                }
            },
        };
        instance.with_state(state)
    }

    fn warn_once(&self, builder: &str, reason: &str) {
        let first = self
            .warned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(builder.to_string());
        if first {
            tracing::warn!("Cannot instantiate builder '{builder}': {reason}");
        }
    }

    fn take_pending(&self, key: &InstanceKey) -> Option<PersistentBuilderInfo> {
        let mut pending = self.lock_pending();
        let infos = pending.get_mut(&key.project)?;
        let info = take_matching(infos, key.config.as_deref(), &key.builder, key.index);
        if infos.is_empty() {
            pending.remove(&key.project);
        }
        info
    }

    /// Park persisted builder state until the builders are first used
    ///
    /// Only the first call per registry has an effect.
    pub fn restore(&self, infos: Vec<PersistentBuilderInfo>) -> bool {
        if self.restored.swap(true, Ordering::SeqCst) {
            tracing::debug!("Builder state already restored, ignoring");
            return false;
        }
        let mut pending = self.lock_pending();
        for info in infos {
            pending.entry(info.project.clone()).or_default().push(info);
        }
        true
    }

    /// Number of parked records
    pub fn pending_count(&self) -> usize {
        self.lock_pending().values().map(Vec::len).sum()
    }

    /// Records for every builder that has a last-built snapshot
    ///
    /// Parked records of builders that were never instantiated are kept.
    pub fn persistent_infos(&self) -> Vec<PersistentBuilderInfo> {
        let mut infos: Vec<PersistentBuilderInfo> = self
            .live_instances()
            .iter()
            .filter_map(|instance| Self::info_of(instance))
            .collect();
        infos.extend(self.lock_pending().values().flatten().cloned());
        infos
    }

    fn info_of(instance: &BuilderInstance) -> Option<PersistentBuilderInfo> {
        let state = instance.state();
        let key = instance.key();
        state.last_built.map(|snapshot| PersistentBuilderInfo {
            project: key.project.clone(),
            config: key.config.clone(),
            builder: key.builder.clone(),
            index: key.index,
            last_built: Some(snapshot),
            interesting_projects: state.interesting_projects,
        })
    }

    /// Every instantiated builder, ordered by key
    pub fn live_instances(&self) -> Vec<Arc<BuilderInstance>> {
        self.lock_instances()
            .values()
            .filter_map(|slot| slot.get().cloned())
            .collect()
    }

    /// Instantiated builders of one project
    pub fn instances_of(&self, project: &str) -> Vec<Arc<BuilderInstance>> {
        self.live_instances()
            .into_iter()
            .filter(|i| i.key().project == project)
            .collect()
    }

    fn drain_project(&self, project: &str) -> Vec<Arc<BuilderInstance>> {
        let mut instances = self.lock_instances();
        let keys: Vec<InstanceKey> = instances
            .keys()
            .filter(|k| k.project == project)
            .cloned()
            .collect();
        keys.iter()
            .filter_map(|k| instances.remove(k))
            .filter_map(|slot| slot.get().cloned())
            .collect()
    }

    /// Drop the live instances of a project, parking their state
    ///
    /// Used when the build spec changes; the state is matched again by
    /// builder name, configuration and spec index.
    pub fn write_back(&self, project: &str) {
        let infos: Vec<PersistentBuilderInfo> = self
            .drain_project(project)
            .iter()
            .filter_map(|instance| Self::info_of(instance))
            .collect();
        if infos.is_empty() {
            return;
        }
        tracing::debug!("Parking state of {} builder(s) of '{project}'", infos.len());
        let mut pending = self.lock_pending();
        let parked = pending.entry(project.to_string()).or_default();
        for info in infos {
            parked.retain(|p| {
                !(p.builder == info.builder && p.config == info.config && p.index == info.index)
            });
            parked.push(info);
        }
    }

    /// Forget everything about a project
    pub fn forget_project(&self, project: &str) {
        self.drain_project(project);
        self.lock_pending().remove(project);
    }
}
