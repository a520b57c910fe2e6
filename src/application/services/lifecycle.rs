//! Lifecycle manager - owns every extension's state machine and the registries
//! extensions contribute to

use super::builtin;
use super::command_service::CommandTable;
use super::content_service::{ContentRegistry, ContentStats};
use super::extension_config::{effective_config, merge_config, validate_config};
use super::resolver::{DependencyResolver, Resolution};
use crate::application::errors::{guarded, ExtensionFault, HostError};
use crate::application::messaging::{BusStats, CommandParser, EventBus};
use crate::domain::entities::descriptor::is_valid_extension_id;
use crate::domain::entities::{
    CommandContext, CommandOutcome, DispatchResult, EventCategory, ExtensionDescriptor,
    ExtensionState,
};
use crate::domain::traits::{Capabilities, Capability, Extension, ExtensionSource};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

/// A live extension instance
pub type SharedExtension = Arc<Mutex<Box<dyn Extension>>>;

/// Settings the embedding application hands to the host
#[derive(Debug, Clone)]
pub struct HostOptions {
    pub name: String,
    pub command_prefix: String,
    /// Ids that win dependency conflicts
    pub preferred: BTreeSet<String>,
    /// Ids `load_all` skips
    pub disabled: BTreeSet<String>,
    /// Per-extension configuration merged over descriptor defaults
    pub overrides: HashMap<String, Value>,
    pub builtin_commands: bool,
}

impl Default for HostOptions {
    fn default() -> Self {
        Self {
            name: "extension-host".to_string(),
            command_prefix: "/".to_string(),
            preferred: BTreeSet::new(),
            disabled: BTreeSet::new(),
            overrides: HashMap::new(),
            builtin_commands: true,
        }
    }
}

/// Descriptors found by `discover`, plus per-source failures
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    pub discovered: Vec<ExtensionDescriptor>,
    pub errors: Vec<HostError>,
}

/// Outcome of `load_all`
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: BTreeMap<String, HostError>,
}

/// What an unload removed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnloadSummary {
    pub id: String,
    pub subscriptions: usize,
    pub commands: usize,
    pub content: usize,
    /// Hook failures during teardown; the unload still completed
    pub faults: Vec<HostError>,
    /// Dependents unloaded first
    pub cascaded: Vec<String>,
}

impl UnloadSummary {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            ..Self::default()
        }
    }
}

/// Row of the host-facing extension listing
#[derive(Debug, Clone, Serialize)]
pub struct ExtensionSummary {
    pub id: String,
    pub name: String,
    pub version: String,
    pub author: String,
    pub description: String,
    pub state: ExtensionState,
    pub priority: i32,
    pub tags: BTreeSet<String>,
    pub location: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HostStats {
    pub extensions: usize,
    pub by_state: BTreeMap<String, usize>,
    pub subscriptions: usize,
    pub commands: usize,
    pub content: ContentStats,
    pub events: BusStats,
}

pub(crate) struct Slot {
    pub(crate) descriptor: ExtensionDescriptor,
    pub(crate) source: Arc<dyn ExtensionSource>,
    pub(crate) state: ExtensionState,
    instance: Option<SharedExtension>,
    capabilities: Capabilities,
    config: Value,
    pub(crate) fingerprint: Option<String>,
    load_sequence: Option<u64>,
    /// Free-form values stored for the extension; kept across reloads
    data: BTreeMap<String, Value>,
}

struct HostInner {
    options: HostOptions,
    bus: EventBus,
    commands: CommandTable,
    content: ContentRegistry,
    parser: CommandParser,
    slots: RwLock<BTreeMap<String, Slot>>,
    in_flight: Mutex<BTreeSet<String>>,
    load_counter: AtomicU64,
}

/// Marks an extension as mid-transition until dropped
pub(crate) struct Transition<'a> {
    in_flight: &'a Mutex<BTreeSet<String>>,
    id: String,
}

impl Drop for Transition<'_> {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

/// How a load ends: normally, or mid-reload awaiting the snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Landing {
    Enabled,
    HotReloading,
}

/// The extension host: lifecycle manager plus event bus, command table and
/// content registry.
///
/// Cheap to clone; every clone drives the same host. Extensions that need to
/// keep a reference should hold a [`WeakHost`].
#[derive(Clone)]
pub struct ExtensionHost {
    inner: Arc<HostInner>,
}

/// Non-owning handle to a host
#[derive(Clone)]
pub struct WeakHost {
    inner: Weak<HostInner>,
}

impl WeakHost {
    pub fn upgrade(&self) -> Option<ExtensionHost> {
        self.inner.upgrade().map(|inner| ExtensionHost { inner })
    }
}

impl ExtensionHost {
    pub fn new() -> Self {
        Self::with_options(HostOptions::default())
    }

    pub fn with_options(options: HostOptions) -> Self {
        let host = Self {
            inner: Arc::new(HostInner {
                bus: EventBus::new(),
                commands: CommandTable::new(options.command_prefix.clone()),
                content: ContentRegistry::with_default_types(),
                parser: CommandParser::new(options.command_prefix.clone()),
                slots: RwLock::new(BTreeMap::new()),
                in_flight: Mutex::new(BTreeSet::new()),
                load_counter: AtomicU64::new(1),
                options,
            }),
        };

        if host.inner.options.builtin_commands {
            builtin::register(&host);
        }
        tracing::debug!("Extension host '{}' created", host.inner.options.name);
        host
    }

    pub fn downgrade(&self) -> WeakHost {
        WeakHost {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.options.name
    }

    pub fn options(&self) -> &HostOptions {
        &self.inner.options
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn commands(&self) -> &CommandTable {
        &self.inner.commands
    }

    pub fn content(&self) -> &ContentRegistry {
        &self.inner.content
    }

    // ------------------------------------------------------------------
    // Internal helpers
    // ------------------------------------------------------------------

    pub(crate) fn slots(&self) -> Result<RwLockReadGuard<'_, BTreeMap<String, Slot>>, HostError> {
        self.inner
            .slots
            .read()
            .map_err(|_| HostError::Internal("Lock poisoned".to_string()))
    }

    pub(crate) fn slots_mut(
        &self,
    ) -> Result<RwLockWriteGuard<'_, BTreeMap<String, Slot>>, HostError> {
        self.inner
            .slots
            .write()
            .map_err(|_| HostError::Internal("Lock poisoned".to_string()))
    }

    /// Claim `id` for a transition; fails if one is already running
    pub(crate) fn begin(&self, id: &str, operation: &str) -> Result<Transition<'_>, HostError> {
        let mut in_flight = self
            .inner
            .in_flight
            .lock()
            .map_err(|_| HostError::Internal("Lock poisoned".to_string()))?;
        if !in_flight.insert(id.to_string()) {
            tracing::warn!("Rejected re-entrant {} of {}", operation, id);
            return Err(HostError::ReentrantTransition {
                id: id.to_string(),
                operation: operation.to_string(),
            });
        }
        Ok(Transition {
            in_flight: &self.inner.in_flight,
            id: id.to_string(),
        })
    }

    fn is_in_flight(&self, id: &str) -> bool {
        self.inner
            .in_flight
            .lock()
            .map(|in_flight| in_flight.contains(id))
            .unwrap_or(false)
    }

    /// Current state of `id`, refused while `id` is inside one of its own transitions
    pub(crate) fn settled_state(&self, id: &str, operation: &str) -> Result<ExtensionState, HostError> {
        let state = self
            .state(id)
            .ok_or_else(|| HostError::NotFound(id.to_string()))?;
        if self.is_in_flight(id) {
            tracing::warn!("Rejected re-entrant {} of {}", operation, id);
            return Err(HostError::ReentrantTransition {
                id: id.to_string(),
                operation: operation.to_string(),
            });
        }
        Ok(state)
    }

    /// Error for an operation attempted in the wrong state
    pub(crate) fn refuse(&self, id: &str, operation: &str, state: &ExtensionState) -> HostError {
        if self.is_in_flight(id) {
            HostError::ReentrantTransition {
                id: id.to_string(),
                operation: operation.to_string(),
            }
        } else {
            HostError::InvalidTransition {
                id: id.to_string(),
                operation: operation.to_string(),
                state: state.to_string(),
            }
        }
    }

    pub(crate) fn transition(&self, id: &str, next: ExtensionState) -> Result<(), HostError> {
        let mut slots = self.slots_mut()?;
        let slot = slots
            .get_mut(id)
            .ok_or_else(|| HostError::NotFound(id.to_string()))?;
        if !slot.state.can_transition_to(&next) {
            return Err(HostError::InvalidTransition {
                id: id.to_string(),
                operation: next.name().to_string(),
                state: slot.state.to_string(),
            });
        }
        tracing::debug!("{}: {} -> {}", id, slot.state, next);
        slot.state = next;
        Ok(())
    }

    /// Park an extension in Error regardless of where it was
    pub(crate) fn park(&self, id: &str, error: &HostError) {
        if let Ok(mut slots) = self.slots_mut() {
            if let Some(slot) = slots.get_mut(id) {
                slot.state = ExtensionState::Error(error.to_string());
                slot.load_sequence = None;
            }
        }
    }

    fn instance(&self, id: &str) -> Option<SharedExtension> {
        self.slots().ok()?.get(id)?.instance.clone()
    }

    fn take_instance(&self, id: &str) -> Option<SharedExtension> {
        self.slots_mut().ok()?.get_mut(id)?.instance.take()
    }

    pub(crate) fn capabilities(&self, id: &str) -> Capabilities {
        self.slots()
            .ok()
            .and_then(|slots| slots.get(id).map(|slot| slot.capabilities.clone()))
            .unwrap_or_default()
    }

    /// Run extension code against the live instance, catching panics
    pub(crate) fn call_extension<T>(
        &self,
        id: &str,
        hook: &str,
        f: impl FnOnce(&mut dyn Extension) -> Result<T, ExtensionFault>,
    ) -> Result<T, HostError> {
        let instance = self
            .instance(id)
            .ok_or_else(|| HostError::Internal(format!("extension '{}' has no instance", id)))?;
        let mut extension = instance.lock().unwrap_or_else(PoisonError::into_inner);
        guarded(|| f(&mut **extension)).map_err(|fault| {
            tracing::error!("{} of {} failed: {}", hook, id, fault);
            HostError::hook(id, hook, &fault)
        })
    }

    fn lifecycle_hook(
        &self,
        id: &str,
        hook: &str,
        f: impl FnOnce(&mut dyn Extension, &ExtensionHost) -> Result<(), ExtensionFault>,
    ) -> Result<(), HostError> {
        self.call_extension(id, hook, |extension| f(extension, self))
    }

    /// Remove registrations owned by `id`; returns (subscriptions, commands, content)
    fn withdraw(&self, id: &str, include_content: bool) -> (usize, usize, usize) {
        let subscriptions = self.inner.bus.unsubscribe_all(id);
        let commands = self.inner.commands.unregister_all(id);
        let content = if include_content {
            self.inner.content.unregister_all(id)
        } else {
            0
        };
        (subscriptions, commands, content)
    }

    /// Tear down a failed extension and park it in Error
    pub(crate) fn abort(&self, id: &str, error: HostError, on_load_ran: bool) -> HostError {
        tracing::error!("Extension {} failed: {}", id, error);
        if on_load_ran {
            if let Err(e) = self.lifecycle_hook(id, "on_unload", |ext, host| ext.on_unload(host)) {
                tracing::warn!("Cleanup after failure of {}: {}", id, e);
            }
        }
        self.withdraw(id, true);
        drop(self.take_instance(id));
        self.park(id, &error);
        error
    }

    fn check_dependencies(&self, descriptor: &ExtensionDescriptor) -> Result<(), HostError> {
        let slots = self.slots()?;
        for dependency in &descriptor.dependencies.required {
            let enabled = slots
                .get(dependency)
                .is_some_and(|slot| slot.state.is_enabled());
            if !enabled {
                return Err(HostError::MissingDependency {
                    id: descriptor.id.clone(),
                    dependency: dependency.clone(),
                });
            }
        }

        for (other_id, other) in slots.iter() {
            if *other_id == descriptor.id || !other.state.is_enabled() {
                continue;
            }
            let declared = descriptor.dependencies.conflicts.contains(other_id)
                || other.descriptor.dependencies.conflicts.contains(&descriptor.id);
            let shared = descriptor
                .provides
                .intersection(&other.descriptor.provides)
                .next()
                .is_some();
            if declared || shared {
                return Err(HostError::ConflictingExtension {
                    id: descriptor.id.clone(),
                    other: other_id.clone(),
                });
            }
        }
        Ok(())
    }

    /// Hooks and commands always; content only on load
    fn register_contributions(
        &self,
        id: &str,
        capabilities: &Capabilities,
        include_content: bool,
    ) -> Result<(), HostError> {
        if capabilities.contains(Capability::Hooks) {
            let hooks = self.call_extension(id, "register_hooks", |ext| ext.register_hooks())?;
            for hook in hooks {
                self.inner.bus.subscribe_hook(hook, id);
            }
        }

        if capabilities.contains(Capability::Commands) {
            let commands =
                self.call_extension(id, "register_commands", |ext| ext.register_commands())?;
            for command in commands {
                self.inner.commands.register(command, id)?;
            }
        }

        if include_content && capabilities.contains(Capability::Content) {
            let bundle = self.call_extension(id, "register_content", |ext| ext.register_content())?;
            let report = self.inner.content.register_bundle(bundle, id);
            for failure in &report.failures {
                tracing::warn!("Content from {} rejected: {}", id, failure);
            }
            tracing::debug!("{} registered {} content entries", id, report.registered);
        }
        Ok(())
    }

    fn dependents(&self, id: &str, loaded_only: bool) -> Vec<String> {
        let Ok(slots) = self.slots() else {
            return Vec::new();
        };
        slots
            .values()
            .filter(|slot| slot.descriptor.dependencies.required.contains(id))
            .filter(|slot| {
                if loaded_only {
                    matches!(slot.state, ExtensionState::Enabled | ExtensionState::Disabled)
                } else {
                    slot.state.is_enabled()
                }
            })
            .map(|slot| slot.descriptor.id.clone())
            .collect()
    }

    pub(crate) fn disable_dependents(&self, id: &str) -> Result<(), HostError> {
        for dependent in self.dependents(id, false) {
            tracing::info!("Disabling {} (depends on {})", dependent, id);
            self.disable(&dependent)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Discovery
    // ------------------------------------------------------------------

    /// Register a source and record its descriptor as Discovered
    pub fn add_source(&self, source: Arc<dyn ExtensionSource>) -> Result<ExtensionDescriptor, HostError> {
        let location = source.location();
        let descriptor = catch_unwind(AssertUnwindSafe(|| source.describe()))
            .map_err(|payload| {
                HostError::malformed(&location, ExtensionFault::from_panic(payload).to_string())
            })??;

        if !is_valid_extension_id(&descriptor.id) {
            return Err(HostError::malformed(
                &location,
                format!("invalid extension id '{}'", descriptor.id),
            ));
        }

        let id = descriptor.id.clone();
        let config = effective_config(
            descriptor.default_config.as_ref(),
            self.inner.options.overrides.get(&id),
        );
        let fingerprint = source.fingerprint();

        let mut slots = self.slots_mut()?;
        match slots.get_mut(&id) {
            Some(slot) => {
                let rediscoverable = matches!(
                    slot.state,
                    ExtensionState::Discovered | ExtensionState::Error(_)
                );
                if !rediscoverable {
                    return Err(HostError::malformed(
                        &location,
                        format!("extension '{}' is already {}", id, slot.state),
                    ));
                }
                if slot.source.location() != location {
                    return Err(HostError::malformed(
                        &location,
                        format!("extension id '{}' already discovered at {}", id, slot.source.location()),
                    ));
                }
                slot.descriptor = descriptor.clone();
                slot.source = source;
                slot.config = config;
                slot.fingerprint = fingerprint;
            }
            None => {
                let mut slot = Slot {
                    descriptor: descriptor.clone(),
                    source,
                    state: ExtensionState::Undiscovered,
                    instance: None,
                    capabilities: Capabilities::none(),
                    config,
                    fingerprint,
                    load_sequence: None,
                    data: BTreeMap::new(),
                };
                slot.state = ExtensionState::Discovered;
                slots.insert(id.clone(), slot);
            }
        }

        tracing::info!(
            "Discovered extension {} v{} ({}) at {}",
            id,
            descriptor.version,
            descriptor.kind,
            location
        );
        Ok(descriptor)
    }

    /// Swap in a freshly described descriptor for an existing slot
    pub(crate) fn refresh(
        &self,
        id: &str,
        descriptor: ExtensionDescriptor,
        fingerprint: Option<String>,
    ) -> Result<(), HostError> {
        let config = effective_config(
            descriptor.default_config.as_ref(),
            self.inner.options.overrides.get(id),
        );
        let mut slots = self.slots_mut()?;
        let slot = slots
            .get_mut(id)
            .ok_or_else(|| HostError::NotFound(id.to_string()))?;
        slot.config = merge_config(&config, &slot.config);
        slot.descriptor = descriptor;
        slot.fingerprint = fingerprint;
        Ok(())
    }

    /// Register many sources; a bad source never stops the others
    pub fn discover<I>(&self, sources: I) -> DiscoveryReport
    where
        I: IntoIterator<Item = Arc<dyn ExtensionSource>>,
    {
        let mut report = DiscoveryReport::default();
        for source in sources {
            match self.add_source(source) {
                Ok(descriptor) => report.discovered.push(descriptor),
                Err(e) => {
                    tracing::warn!("Discovery failed: {}", e);
                    report.errors.push(e);
                }
            }
        }
        report
    }

    /// Permanently drop a Discovered or Error extension
    pub fn forget(&self, id: &str) -> Result<ExtensionDescriptor, HostError> {
        let mut slots = self.slots_mut()?;
        let slot = slots
            .get(id)
            .ok_or_else(|| HostError::NotFound(id.to_string()))?;
        if !matches!(slot.state, ExtensionState::Discovered | ExtensionState::Error(_)) {
            return Err(HostError::InvalidTransition {
                id: id.to_string(),
                operation: "forget".to_string(),
                state: slot.state.to_string(),
            });
        }
        let slot = slots
            .remove(id)
            .ok_or_else(|| HostError::NotFound(id.to_string()))?;
        Ok(slot.descriptor)
    }

    /// Resolve every known descriptor
    pub fn resolve(&self) -> Resolution {
        let descriptors: Vec<ExtensionDescriptor> = self
            .slots()
            .map(|slots| slots.values().map(|slot| slot.descriptor.clone()).collect())
            .unwrap_or_default();
        DependencyResolver::new()
            .with_preferred(self.inner.options.preferred.iter().cloned())
            .resolve(&descriptors)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Load and enable a Discovered (or previously failed) extension
    pub fn load(&self, id: &str) -> Result<(), HostError> {
        let state = self.settled_state(id, "load")?;
        match state {
            ExtensionState::Enabled | ExtensionState::Disabled => return Ok(()),
            ExtensionState::Discovered | ExtensionState::Error(_) => {}
            other => return Err(self.refuse(id, "load", &other)),
        }

        let _transition = self.begin(id, "load")?;
        self.load_unguarded(id, Landing::Enabled)
    }

    pub(crate) fn load_unguarded(&self, id: &str, landing: Landing) -> Result<(), HostError> {
        let (source, descriptor) = {
            let slots = self.slots()?;
            let slot = slots
                .get(id)
                .ok_or_else(|| HostError::NotFound(id.to_string()))?;
            (slot.source.clone(), slot.descriptor.clone())
        };

        self.transition(id, ExtensionState::Loading)?;
        tracing::info!("Loading extension {} v{}", id, descriptor.version);

        let mut on_load_ran = false;
        if let Err(e) = self.bring_up(id, source.as_ref(), &descriptor, landing, &mut on_load_ran) {
            return Err(self.abort(id, e, on_load_ran));
        }

        if landing == Landing::Enabled {
            tracing::info!("Extension {} enabled", id);
            self.inner
                .bus
                .publish(EventCategory::ExtensionLoad, json!({ "extension_id": id }));
        }
        Ok(())
    }

    fn bring_up(
        &self,
        id: &str,
        source: &dyn ExtensionSource,
        descriptor: &ExtensionDescriptor,
        landing: Landing,
        on_load_ran: &mut bool,
    ) -> Result<(), HostError> {
        // Loading
        let extension = catch_unwind(AssertUnwindSafe(|| source.instantiate())).map_err(|payload| {
            HostError::hook(id, "instantiate", &ExtensionFault::from_panic(payload))
        })??;
        let capabilities = guarded(|| Ok(extension.capabilities()))
            .map_err(|fault| HostError::hook(id, "capabilities", &fault))?;
        {
            let mut slots = self.slots_mut()?;
            let slot = slots
                .get_mut(id)
                .ok_or_else(|| HostError::NotFound(id.to_string()))?;
            slot.instance = Some(Arc::new(Mutex::new(extension)));
            slot.capabilities = capabilities.clone();
        }
        self.lifecycle_hook(id, "on_load", |ext, host| ext.on_load(host))?;
        *on_load_ran = true;

        // Resolving
        self.transition(id, ExtensionState::Resolving)?;
        self.check_dependencies(descriptor)?;

        // Initializing
        self.transition(id, ExtensionState::Initializing)?;
        let config = self.config(id).unwrap_or_else(|| json!({}));
        validate_config(descriptor.config_schema.as_ref(), &config).map_err(|reason| {
            HostError::ValidationFailed {
                content_type: "config".to_string(),
                id: id.to_string(),
                reason,
            }
        })?;
        if capabilities.contains(Capability::Configurable) {
            self.call_extension(id, "set_config", |ext| ext.set_config(&config))?;
        }
        self.register_contributions(id, &capabilities, true)?;
        self.lifecycle_hook(id, "on_enable", |ext, host| ext.on_enable(host))?;

        match landing {
            Landing::Enabled => self.transition(id, ExtensionState::Enabled)?,
            Landing::HotReloading => self.transition(id, ExtensionState::HotReloading)?,
        }
        let sequence = self.inner.load_counter.fetch_add(1, Ordering::SeqCst);
        if let Some(slot) = self.slots_mut()?.get_mut(id) {
            slot.load_sequence = Some(sequence);
        }
        Ok(())
    }

    /// Enable a Disabled extension, or load one that is not loaded yet
    pub fn enable(&self, id: &str) -> Result<(), HostError> {
        let state = self.settled_state(id, "enable")?;
        match state {
            ExtensionState::Enabled => Ok(()),
            ExtensionState::Discovered | ExtensionState::Error(_) => self.load(id),
            ExtensionState::Disabled => {
                let _transition = self.begin(id, "enable")?;
                let descriptor = self
                    .descriptor(id)
                    .ok_or_else(|| HostError::NotFound(id.to_string()))?;
                self.check_dependencies(&descriptor)?;

                let capabilities = self.capabilities(id);
                let result = self
                    .register_contributions(id, &capabilities, false)
                    .and_then(|_| self.lifecycle_hook(id, "on_enable", |ext, host| ext.on_enable(host)));
                if let Err(e) = result {
                    return Err(self.abort(id, e, true));
                }

                self.transition(id, ExtensionState::Enabled)?;
                tracing::info!("Extension {} enabled", id);
                Ok(())
            }
            other => Err(self.refuse(id, "enable", &other)),
        }
    }

    /// Withdraw an extension's handlers and commands; content stays until unload
    pub fn disable(&self, id: &str) -> Result<(), HostError> {
        let state = self.settled_state(id, "disable")?;
        match state {
            ExtensionState::Disabled => Ok(()),
            ExtensionState::Enabled => {
                let _transition = self.begin(id, "disable")?;
                self.disable_dependents(id)?;

                if let Err(e) = self.lifecycle_hook(id, "on_disable", |ext, host| ext.on_disable(host)) {
                    return Err(self.abort(id, e, true));
                }
                let (subscriptions, commands, _) = self.withdraw(id, false);
                self.transition(id, ExtensionState::Disabled)?;
                tracing::info!(
                    "Extension {} disabled ({} handlers, {} commands withdrawn)",
                    id,
                    subscriptions,
                    commands
                );
                Ok(())
            }
            other => Err(self.refuse(id, "disable", &other)),
        }
    }

    /// Unload an extension (and its loaded dependents) back to Discovered
    pub fn unload(&self, id: &str) -> Result<UnloadSummary, HostError> {
        let state = self.settled_state(id, "unload")?;
        match state {
            ExtensionState::Discovered => return Ok(UnloadSummary::new(id)),
            ExtensionState::Enabled | ExtensionState::Disabled | ExtensionState::Error(_) => {}
            other => return Err(self.refuse(id, "unload", &other)),
        }

        let _transition = self.begin(id, "unload")?;
        let mut cascaded = Vec::new();
        for dependent in self.dependents(id, true) {
            tracing::info!("Unloading {} (depends on {})", dependent, id);
            self.unload(&dependent)?;
            cascaded.push(dependent);
        }

        let mut summary = self.tear_down(id, state.is_enabled(), ExtensionState::Discovered)?;
        summary.cascaded = cascaded;
        Ok(summary)
    }

    /// Unloading -> `end`, removing everything the extension owns
    pub(crate) fn tear_down(
        &self,
        id: &str,
        was_enabled: bool,
        end: ExtensionState,
    ) -> Result<UnloadSummary, HostError> {
        self.transition(id, ExtensionState::Unloading)?;
        let mut summary = UnloadSummary::new(id);

        if self.instance(id).is_some() {
            if was_enabled {
                if let Err(e) = self.lifecycle_hook(id, "on_disable", |ext, host| ext.on_disable(host)) {
                    summary.faults.push(e);
                }
            }
            if let Err(e) = self.lifecycle_hook(id, "on_unload", |ext, host| ext.on_unload(host)) {
                summary.faults.push(e);
            }
        }

        let (subscriptions, commands, content) = self.withdraw(id, true);
        summary.subscriptions = subscriptions;
        summary.commands = commands;
        summary.content = content;
        drop(self.take_instance(id));
        if let Some(slot) = self.slots_mut()?.get_mut(id) {
            slot.load_sequence = None;
            slot.capabilities = Capabilities::none();
            if end == ExtensionState::Discovered {
                slot.data.clear();
            }
        }

        self.transition(id, end)?;
        tracing::info!(
            "Extension {} unloaded ({} handlers, {} commands, {} content entries removed)",
            id,
            subscriptions,
            commands,
            content
        );
        self.inner
            .bus
            .publish(EventCategory::ExtensionUnload, json!({ "extension_id": id }));
        Ok(summary)
    }

    /// Resolve everything known, then load in order
    pub fn load_all(&self) -> LoadReport {
        let resolution = self.resolve();
        let mut report = LoadReport::default();

        for (id, error) in &resolution.errors {
            if matches!(
                self.state(id),
                Some(ExtensionState::Discovered | ExtensionState::Error(_))
            ) {
                self.reject(id, error);
            }
            report.failed.insert(id.clone(), error.clone());
        }

        for id in &resolution.order {
            if self.inner.options.disabled.contains(id) {
                tracing::info!("Skipping disabled extension {}", id);
                report.skipped.push(id.clone());
                continue;
            }
            match self.state(id) {
                Some(ExtensionState::Discovered | ExtensionState::Error(_)) => match self.load(id) {
                    Ok(()) => report.loaded.push(id.clone()),
                    Err(e) => {
                        report.failed.insert(id.clone(), e);
                    }
                },
                _ => {}
            }
        }

        tracing::info!(
            "Loaded {} extensions ({} failed, {} skipped)",
            report.loaded.len(),
            report.failed.len(),
            report.skipped.len()
        );
        report
    }

    /// Record a resolver rejection as a failed load attempt
    fn reject(&self, id: &str, error: &HostError) {
        let Ok(_transition) = self.begin(id, "load") else {
            return;
        };
        if self.transition(id, ExtensionState::Loading).is_ok() {
            self.park(id, error);
        }
    }

    /// Unload every loaded extension, most recently loaded first
    pub fn unload_all(&self) -> Vec<UnloadSummary> {
        let mut loaded: Vec<(u64, String)> = self
            .slots()
            .map(|slots| {
                slots
                    .values()
                    .filter(|slot| {
                        matches!(
                            slot.state,
                            ExtensionState::Enabled | ExtensionState::Disabled
                        )
                    })
                    .map(|slot| (slot.load_sequence.unwrap_or(0), slot.descriptor.id.clone()))
                    .collect()
            })
            .unwrap_or_default();
        loaded.sort();

        let mut summaries = Vec::new();
        for (_, id) in loaded.into_iter().rev() {
            if !matches!(
                self.state(&id),
                Some(ExtensionState::Enabled | ExtensionState::Disabled)
            ) {
                continue;
            }
            match self.unload(&id) {
                Ok(summary) => summaries.push(summary),
                Err(e) => tracing::error!("Failed to unload {}: {}", id, e),
            }
        }
        summaries
    }

    // ------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------

    /// Effective configuration of an extension
    pub fn config(&self, id: &str) -> Option<Value> {
        self.slots().ok()?.get(id).map(|slot| slot.config.clone())
    }

    /// Merge `values` into the extension's configuration after a schema check
    pub fn set_config(&self, id: &str, values: Value) -> Result<Value, HostError> {
        let _transition = self.begin(id, "configure")?;
        let (merged, schema, deliver) = {
            let slots = self.slots()?;
            let slot = slots
                .get(id)
                .ok_or_else(|| HostError::NotFound(id.to_string()))?;
            (
                merge_config(&slot.config, &values),
                slot.descriptor.config_schema.clone(),
                slot.instance.is_some() && slot.capabilities.contains(Capability::Configurable),
            )
        };

        validate_config(schema.as_ref(), &merged).map_err(|reason| HostError::ValidationFailed {
            content_type: "config".to_string(),
            id: id.to_string(),
            reason,
        })?;
        if deliver {
            self.call_extension(id, "set_config", |ext| ext.set_config(&merged))?;
        }
        if let Some(slot) = self.slots_mut()?.get_mut(id) {
            slot.config = merged.clone();
        }
        tracing::info!("Configuration of {} updated", id);
        Ok(merged)
    }

    /// Store a value for an extension under `key`
    pub fn set_data(&self, id: &str, key: impl Into<String>, value: Value) -> Result<(), HostError> {
        let mut slots = self.slots_mut()?;
        let slot = slots
            .get_mut(id)
            .ok_or_else(|| HostError::NotFound(id.to_string()))?;
        slot.data.insert(key.into(), value);
        Ok(())
    }

    /// One stored value, or a copy of all of them as an object when `key` is None
    pub fn data(&self, id: &str, key: Option<&str>) -> Option<Value> {
        let slots = self.slots().ok()?;
        let data = &slots.get(id)?.data;
        match key {
            Some(key) => data.get(key).cloned(),
            None => Some(Value::Object(
                data.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            )),
        }
    }

    // ------------------------------------------------------------------
    // Events and commands
    // ------------------------------------------------------------------

    pub fn publish(&self, category: EventCategory, payload: Value) -> Vec<DispatchResult> {
        self.inner.bus.publish(category, payload)
    }

    pub fn execute(&self, name: &str, args: &[String], ctx: &CommandContext) -> CommandOutcome {
        self.inner.commands.execute(name, args, ctx)
    }

    /// Parse and run one line of command input
    pub fn execute_line(&self, line: &str, ctx: &CommandContext) -> CommandOutcome {
        match self.inner.parser.parse(line) {
            Some(parsed) => self.execute(&parsed.name, &parsed.args, ctx),
            None => CommandOutcome::failure("Empty command"),
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn state(&self, id: &str) -> Option<ExtensionState> {
        self.slots().ok()?.get(id).map(|slot| slot.state.clone())
    }

    pub fn descriptor(&self, id: &str) -> Option<ExtensionDescriptor> {
        self.slots().ok()?.get(id).map(|slot| slot.descriptor.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.state(id).is_some()
    }

    fn summarize(slot: &Slot) -> ExtensionSummary {
        ExtensionSummary {
            id: slot.descriptor.id.clone(),
            name: slot.descriptor.name.clone(),
            version: slot.descriptor.version.to_string(),
            author: slot.descriptor.author.clone(),
            description: slot.descriptor.description.clone(),
            state: slot.state.clone(),
            priority: slot.descriptor.priority,
            tags: slot.descriptor.tags.clone(),
            location: slot.source.location(),
        }
    }

    /// Every known extension, ordered by load priority then id
    pub fn extensions(&self) -> Vec<ExtensionSummary> {
        let mut list: Vec<ExtensionSummary> = self
            .slots()
            .map(|slots| slots.values().map(Self::summarize).collect())
            .unwrap_or_default();
        list.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
        list
    }

    pub fn extension(&self, id: &str) -> Option<ExtensionSummary> {
        self.slots().ok()?.get(id).map(Self::summarize)
    }

    pub fn extensions_by_tag(&self, tag: &str) -> Vec<ExtensionSummary> {
        self.extensions()
            .into_iter()
            .filter(|summary| summary.tags.contains(tag))
            .collect()
    }

    pub fn enabled_extensions(&self) -> Vec<String> {
        self.extensions()
            .into_iter()
            .filter(|summary| summary.state.is_enabled())
            .map(|summary| summary.id)
            .collect()
    }

    pub fn stats(&self) -> HostStats {
        let mut by_state: BTreeMap<String, usize> = BTreeMap::new();
        let mut extensions = 0;
        if let Ok(slots) = self.slots() {
            for slot in slots.values() {
                extensions += 1;
                *by_state.entry(slot.state.name().to_string()).or_default() += 1;
            }
        }
        HostStats {
            extensions,
            by_state,
            subscriptions: self.inner.bus.total_handlers(),
            commands: self.inner.commands.len(),
            content: self.inner.content.stats(),
            events: self.inner.bus.stats(),
        }
    }
}

impl Default for ExtensionHost {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{
        CommandRegistration, ContentBundle, HandlerReply, HookSpec, SourceKind,
    };
    use crate::domain::traits::HookResult;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Journal {
        calls: Mutex<Vec<String>>,
        fail_on: Mutex<Option<&'static str>>,
    }

    impl Journal {
        fn hit(&self, hook: &'static str) -> HookResult {
            self.calls.lock().unwrap().push(hook.to_string());
            if *self.fail_on.lock().unwrap() == Some(hook) {
                return Err(ExtensionFault::new(format!("{} refused", hook)));
            }
            Ok(())
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    struct Journaled {
        journal: Arc<Journal>,
    }

    impl Extension for Journaled {
        fn capabilities(&self) -> Capabilities {
            Capabilities::none()
                .with(Capability::Hooks)
                .with(Capability::Commands)
                .with(Capability::Content)
        }
        fn on_load(&mut self, _: &ExtensionHost) -> HookResult {
            self.journal.hit("on_load")
        }
        fn on_unload(&mut self, _: &ExtensionHost) -> HookResult {
            self.journal.hit("on_unload")
        }
        fn on_enable(&mut self, _: &ExtensionHost) -> HookResult {
            self.journal.hit("on_enable")
        }
        fn on_disable(&mut self, _: &ExtensionHost) -> HookResult {
            self.journal.hit("on_disable")
        }
        fn register_hooks(&mut self) -> Result<Vec<HookSpec>, ExtensionFault> {
            self.journal.hit("register_hooks")?;
            Ok(vec![HookSpec::new(EventCategory::GameStart, |_| {
                Ok(HandlerReply::value("journaled"))
            })])
        }
        fn register_commands(&mut self) -> Result<Vec<CommandRegistration>, ExtensionFault> {
            self.journal.hit("register_commands")?;
            Ok(vec![CommandRegistration::new("journal", |_, _| Ok("ok".into()))])
        }
        fn register_content(&mut self) -> Result<ContentBundle, ExtensionFault> {
            self.journal.hit("register_content")?;
            let mut bundle = ContentBundle::new();
            bundle
                .entry("items".to_string())
                .or_default()
                .insert("journal_gem".to_string(), json!({"name": "Journal Gem"}));
            Ok(bundle)
        }
    }

    struct JournalSource {
        descriptor: ExtensionDescriptor,
        journal: Arc<Journal>,
        built: AtomicUsize,
    }

    impl ExtensionSource for JournalSource {
        fn location(&self) -> String {
            format!("test://{}", self.descriptor.id)
        }
        fn describe(&self) -> Result<ExtensionDescriptor, HostError> {
            Ok(self.descriptor.clone())
        }
        fn instantiate(&self) -> Result<Box<dyn Extension>, HostError> {
            self.built.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(Journaled {
                journal: self.journal.clone(),
            }))
        }
    }

    fn journal_host(descriptor: ExtensionDescriptor) -> (ExtensionHost, Arc<Journal>) {
        let host = ExtensionHost::new();
        let journal = Arc::new(Journal::default());
        host.add_source(Arc::new(JournalSource {
            descriptor,
            journal: journal.clone(),
            built: AtomicUsize::new(0),
        }))
        .unwrap();
        (host, journal)
    }

    fn owned(host: &ExtensionHost, id: &str) -> (usize, usize, usize) {
        (
            host.bus().owned_by(id),
            host.commands().owned_by(id),
            host.content().owned_by(id),
        )
    }

    #[test]
    fn test_load_registers_everything() {
        let (host, journal) = journal_host(ExtensionDescriptor::new("journal", SourceKind::Module));
        assert_eq!(host.state("journal"), Some(ExtensionState::Discovered));

        host.load("journal").unwrap();
        assert_eq!(host.state("journal"), Some(ExtensionState::Enabled));
        assert_eq!(owned(&host, "journal"), (1, 1, 1));
        assert_eq!(
            journal.calls(),
            vec!["on_load", "register_hooks", "register_commands", "register_content", "on_enable"]
        );
    }

    #[test]
    fn test_failed_load_rolls_back() {
        let (host, journal) = journal_host(ExtensionDescriptor::new("journal", SourceKind::Module));
        *journal.fail_on.lock().unwrap() = Some("on_enable");

        let err = host.load("journal").unwrap_err();
        assert_eq!(err.kind(), "HookFailure");
        assert!(host.state("journal").unwrap().is_error());
        assert_eq!(owned(&host, "journal"), (0, 0, 0));
        assert_eq!(journal.calls().last().map(String::as_str), Some("on_unload"));

        // A fixed extension can be loaded again from Error
        *journal.fail_on.lock().unwrap() = None;
        host.load("journal").unwrap();
        assert_eq!(host.state("journal"), Some(ExtensionState::Enabled));
    }

    #[test]
    fn test_disable_keeps_content() {
        let (host, _journal) = journal_host(ExtensionDescriptor::new("journal", SourceKind::Module));
        host.load("journal").unwrap();

        host.disable("journal").unwrap();
        host.disable("journal").unwrap();
        assert_eq!(host.state("journal"), Some(ExtensionState::Disabled));
        assert_eq!(owned(&host, "journal"), (0, 0, 1));

        host.enable("journal").unwrap();
        assert_eq!(owned(&host, "journal"), (1, 1, 1));
    }

    #[test]
    fn test_unload_round_trip() {
        let (host, journal) = journal_host(ExtensionDescriptor::new("journal", SourceKind::Module));
        host.load("journal").unwrap();

        let summary = host.unload("journal").unwrap();
        assert_eq!((summary.subscriptions, summary.commands, summary.content), (1, 1, 1));
        assert!(summary.faults.is_empty());
        assert_eq!(host.state("journal"), Some(ExtensionState::Discovered));
        assert_eq!(owned(&host, "journal"), (0, 0, 0));
        assert!(journal.calls().ends_with(&["on_disable".to_string(), "on_unload".to_string()]));
    }

    #[test]
    fn test_missing_dependency_parks_in_error() {
        let (host, _journal) = journal_host(
            ExtensionDescriptor::new("journal", SourceKind::Module).requires("core"),
        );
        let err = host.load("journal").unwrap_err();
        assert_eq!(err.kind(), "MissingDependency");
        assert!(host.state("journal").unwrap().is_error());
    }

    #[test]
    fn test_operations_on_unknown_ids() {
        let host = ExtensionHost::new();
        assert_eq!(host.load("ghost").unwrap_err().kind(), "NotFound");
        assert_eq!(host.disable("ghost").unwrap_err().kind(), "NotFound");
    }

    #[test]
    fn test_config_is_validated() {
        let mut descriptor = ExtensionDescriptor::new("journal", SourceKind::Module);
        descriptor.config_schema = Some(json!({"rate": "integer"}));
        descriptor.default_config = Some(json!({"rate": 1}));
        let (host, _journal) = journal_host(descriptor);

        assert_eq!(host.config("journal"), Some(json!({"rate": 1})));
        assert_eq!(
            host.set_config("journal", json!({"rate": "fast"})).unwrap_err().kind(),
            "ValidationFailed"
        );
        host.set_config("journal", json!({"rate": 4})).unwrap();
        assert_eq!(host.config("journal"), Some(json!({"rate": 4})));
    }
}
