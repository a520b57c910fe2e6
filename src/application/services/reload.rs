//! Reload coordinator - swaps an extension's code while the host keeps running

use super::lifecycle::{ExtensionHost, Landing};
use crate::application::errors::HostError;
use crate::domain::entities::{EventCategory, ExtensionState, ReloadSnapshot};
use crate::domain::traits::Capability;
use serde_json::json;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Result of a successful reload
#[derive(Debug, Clone, PartialEq)]
pub struct ReloadOutcome {
    pub id: String,
    pub previous_version: semver::Version,
    pub version: semver::Version,
    /// Whether a snapshot was carried into the new instance
    pub restored: bool,
}

impl ExtensionHost {
    /// Replace a running extension with a fresh instance from its source.
    ///
    /// State captured by `before_reload` is handed to the new instance's
    /// `after_reload`. If anything fails after the old instance is gone the
    /// extension ends in Error and its enabled dependents are disabled.
    pub fn reload(&self, id: &str) -> Result<ReloadOutcome, HostError> {
        let state = self.settled_state(id, "reload")?;
        if !state.is_enabled() {
            return Err(self.refuse(id, "reload", &state));
        }

        let _transition = self.begin(id, "reload")?;
        let previous = self
            .descriptor(id)
            .ok_or_else(|| HostError::NotFound(id.to_string()))?;
        tracing::info!("Reloading extension {} v{}", id, previous.version);

        let snapshot = if self.capabilities(id).contains(Capability::Snapshot) {
            let snapshot = self
                .call_extension(id, "before_reload", |ext| ext.before_reload())
                .map_err(|e| HostError::ReloadFailure {
                    id: id.to_string(),
                    reason: e.to_string(),
                })?;
            Some(snapshot)
        } else {
            None
        };

        self.transition(id, ExtensionState::PendingReload)?;
        let summary = self.tear_down(id, true, ExtensionState::PendingReload)?;
        for fault in &summary.faults {
            tracing::warn!("Teardown of {} during reload: {}", id, fault);
        }

        match self.bring_back(id, &previous.id, snapshot) {
            Ok((version, restored)) => {
                self.transition(id, ExtensionState::Enabled)?;
                tracing::info!("Extension {} reloaded ({} -> {})", id, previous.version, version);
                self.publish(
                    EventCategory::ExtensionLoad,
                    json!({ "extension_id": id, "reloaded": true }),
                );
                Ok(ReloadOutcome {
                    id: id.to_string(),
                    previous_version: previous.version,
                    version,
                    restored,
                })
            }
            Err(e) => {
                let failure = HostError::ReloadFailure {
                    id: id.to_string(),
                    reason: e.to_string(),
                };
                match self.state(id) {
                    Some(ExtensionState::Error(_)) => {}
                    Some(ExtensionState::HotReloading) => {
                        self.abort(id, failure.clone(), true);
                    }
                    _ => self.park(id, &failure),
                }
                if let Err(e) = self.disable_dependents(id) {
                    tracing::warn!("Could not disable dependents of {}: {}", id, e);
                }
                tracing::error!("{}", failure);
                Err(failure)
            }
        }
    }

    /// Re-describe, rebuild and restore; leaves the extension HotReloading
    fn bring_back(
        &self,
        id: &str,
        expected_id: &str,
        snapshot: Option<ReloadSnapshot>,
    ) -> Result<(semver::Version, bool), HostError> {
        let source = {
            let slots = self.slots()?;
            slots
                .get(id)
                .map(|slot| slot.source.clone())
                .ok_or_else(|| HostError::NotFound(id.to_string()))?
        };

        let location = source.location();
        let descriptor = catch_unwind(AssertUnwindSafe(|| source.describe())).map_err(|_| {
            HostError::malformed(&location, "describe panicked during reload")
        })??;
        if descriptor.id != expected_id {
            return Err(HostError::malformed(
                &location,
                format!("id changed from '{}' to '{}'", expected_id, descriptor.id),
            ));
        }
        let version = descriptor.version.clone();
        self.refresh(id, descriptor, source.fingerprint())?;

        self.load_unguarded(id, Landing::HotReloading)?;

        let restored = match snapshot {
            Some(snapshot) => {
                self.call_extension(id, "after_reload", |ext| ext.after_reload(snapshot))?;
                true
            }
            None => false,
        };
        Ok((version, restored))
    }

    /// Sources whose fingerprint differs from the one recorded at discovery
    pub fn changed_sources(&self) -> Vec<String> {
        let Ok(slots) = self.slots() else {
            return Vec::new();
        };
        slots
            .values()
            .filter(|slot| {
                let current = slot.source.fingerprint();
                current.is_some() && current != slot.fingerprint
            })
            .map(|slot| slot.descriptor.id.clone())
            .collect()
    }

    /// Reload every hot-reloadable extension whose source changed.
    ///
    /// Extensions that are not running just get their descriptor refreshed.
    pub fn reload_changed(&self) -> Vec<Result<ReloadOutcome, HostError>> {
        let mut results = Vec::new();
        for id in self.changed_sources() {
            match self.state(&id) {
                Some(ExtensionState::Enabled) => {
                    let hot = self
                        .descriptor(&id)
                        .is_some_and(|descriptor| descriptor.supports_hot_reload);
                    if hot {
                        results.push(self.reload(&id));
                    } else {
                        tracing::debug!("{} changed but does not support hot reload", id);
                    }
                }
                Some(ExtensionState::Discovered | ExtensionState::Error(_)) => {
                    if let Err(e) = self.rediscover(&id) {
                        tracing::warn!("Could not refresh {}: {}", id, e);
                    }
                }
                _ => {}
            }
        }
        results
    }

    fn rediscover(&self, id: &str) -> Result<(), HostError> {
        let source = {
            let slots = self.slots()?;
            slots
                .get(id)
                .map(|slot| slot.source.clone())
                .ok_or_else(|| HostError::NotFound(id.to_string()))?
        };
        self.add_source(source).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::errors::ExtensionFault;
    use crate::domain::entities::{ExtensionDescriptor, HandlerReply, HookSpec, SourceKind};
    use crate::domain::traits::{Capabilities, Extension, ExtensionSource, HookResult};
    use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counter {
        count: u32,
        build: usize,
    }

    impl Extension for Counter {
        fn capabilities(&self) -> Capabilities {
            Capabilities::none()
                .with(Capability::Snapshot)
                .with(Capability::Hooks)
        }
        fn on_load(&mut self, _: &ExtensionHost) -> HookResult {
            Ok(())
        }
        fn on_unload(&mut self, _: &ExtensionHost) -> HookResult {
            Ok(())
        }
        fn on_enable(&mut self, _: &ExtensionHost) -> HookResult {
            self.count += 1;
            Ok(())
        }
        fn on_disable(&mut self, _: &ExtensionHost) -> HookResult {
            Ok(())
        }
        fn register_hooks(&mut self) -> Result<Vec<HookSpec>, ExtensionFault> {
            let build = self.build;
            Ok(vec![HookSpec::new(EventCategory::GameStart, move |_| {
                Ok(HandlerReply::value(build as u64))
            })])
        }
        fn before_reload(&mut self) -> Result<ReloadSnapshot, ExtensionFault> {
            Ok(ReloadSnapshot::new(self.count))
        }
        fn after_reload(&mut self, snapshot: ReloadSnapshot) -> HookResult {
            let count = snapshot
                .into_inner::<u32>()
                .map_err(|_| ExtensionFault::new("unexpected snapshot"))?;
            self.count += count;
            Ok(())
        }
    }

    struct CounterSource {
        builds: AtomicUsize,
        broken: AtomicBool,
        revision: AtomicU32,
    }

    impl ExtensionSource for CounterSource {
        fn location(&self) -> String {
            "test://counter".to_string()
        }
        fn describe(&self) -> Result<ExtensionDescriptor, HostError> {
            let mut descriptor = ExtensionDescriptor::new("counter", SourceKind::Module)
                .with_version(semver::Version::new(1, self.revision.load(Ordering::SeqCst) as u64, 0));
            descriptor.supports_hot_reload = true;
            Ok(descriptor)
        }
        fn instantiate(&self) -> Result<Box<dyn Extension>, HostError> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(HostError::malformed("test://counter", "syntax error"));
            }
            let build = self.builds.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Box::new(Counter { count: 0, build }))
        }
        fn fingerprint(&self) -> Option<String> {
            Some(self.revision.load(Ordering::SeqCst).to_string())
        }
    }

    fn counter_host() -> (ExtensionHost, Arc<CounterSource>) {
        let host = ExtensionHost::new();
        let source = Arc::new(CounterSource {
            builds: AtomicUsize::new(0),
            broken: AtomicBool::new(false),
            revision: AtomicU32::new(0),
        });
        host.add_source(source.clone()).unwrap();
        host.load("counter").unwrap();
        (host, source)
    }

    fn game_start(host: &ExtensionHost) -> Vec<serde_json::Value> {
        host.publish(EventCategory::GameStart, json!({}))
            .into_iter()
            .filter_map(|result| result.outcome.ok())
            .collect()
    }

    #[test]
    fn test_reload_swaps_instance_and_keeps_state() {
        let (host, source) = counter_host();
        assert_eq!(game_start(&host), vec![json!(1)]);

        source.revision.store(1, Ordering::SeqCst);
        let outcome = host.reload("counter").unwrap();
        assert!(outcome.restored);
        assert_eq!(outcome.previous_version, semver::Version::new(1, 0, 0));
        assert_eq!(outcome.version, semver::Version::new(1, 1, 0));
        assert_eq!(host.state("counter"), Some(ExtensionState::Enabled));

        // Only the new instance's handler is subscribed
        assert_eq!(game_start(&host), vec![json!(2)]);
    }

    #[test]
    fn test_failed_reload_leaves_error() {
        let (host, source) = counter_host();
        source.broken.store(true, Ordering::SeqCst);

        let err = host.reload("counter").unwrap_err();
        assert_eq!(err.kind(), "ReloadFailure");
        assert!(host.state("counter").unwrap().is_error());
        assert!(game_start(&host).is_empty());
    }

    #[test]
    fn test_reload_requires_enabled() {
        let (host, _source) = counter_host();
        host.disable("counter").unwrap();
        assert_eq!(host.reload("counter").unwrap_err().kind(), "InvalidTransition");
    }

    #[test]
    fn test_reload_changed_follows_fingerprints() {
        let (host, source) = counter_host();
        assert!(host.changed_sources().is_empty());
        assert!(host.reload_changed().is_empty());

        source.revision.store(2, Ordering::SeqCst);
        assert_eq!(host.changed_sources(), vec!["counter".to_string()]);
        let results = host.reload_changed();
        assert_eq!(results.len(), 1);
        assert!(results[0].is_ok());
        assert!(host.changed_sources().is_empty());
    }
}
