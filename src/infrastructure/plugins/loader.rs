//! Descriptor loader - Finds extension sources on disk

use super::registry::ModuleRegistry;
use super::sources::{ArchiveSource, DocumentSource, ManifestSource};
use crate::application::errors::HostError;
use crate::application::services::{DiscoveryReport, ExtensionHost};
use crate::domain::traits::ExtensionSource;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// File extensions treated as archive bundles
pub const ARCHIVE_EXTENSIONS: &[&str] = &["zip", "ext"];

/// Sources found by a scan, plus paths that could not be read
#[derive(Default)]
pub struct ScanResult {
    pub sources: Vec<Arc<dyn ExtensionSource>>,
    pub errors: Vec<HostError>,
}

/// Locations that failed discovery, with the fingerprint they failed at
#[derive(Debug, Default)]
pub struct RejectedSources {
    fingerprints: HashMap<String, Option<String>>,
}

impl RejectedSources {
    /// True if `source` failed before and has not changed since
    pub fn unchanged(&self, source: &dyn ExtensionSource) -> bool {
        self.fingerprints
            .get(&source.location())
            .is_some_and(|failed_at| *failed_at == source.fingerprint())
    }

    pub fn record(&mut self, source: &dyn ExtensionSource) {
        self.fingerprints.insert(source.location(), source.fingerprint());
    }

    pub fn clear(&mut self, location: &str) {
        self.fingerprints.remove(location);
    }

    pub fn len(&self) -> usize {
        self.fingerprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fingerprints.is_empty()
    }
}

/// Scans directories for extension sources
pub struct DescriptorLoader {
    registry: Arc<ModuleRegistry>,
    recursive: bool,
}

impl DescriptorLoader {
    pub fn new(registry: Arc<ModuleRegistry>) -> Self {
        Self {
            registry,
            recursive: false,
        }
    }

    /// Also descend into subdirectories that are not extension directories
    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    /// Classify a single path; `None` if it is not an extension source
    pub fn source_for(&self, path: &Path) -> Option<Arc<dyn ExtensionSource>> {
        if path.is_dir() {
            return ManifestSource::new(path, self.registry.clone())
                .map(|source| Arc::new(source) as Arc<dyn ExtensionSource>);
        }

        let ext = path.extension()?.to_str()?.to_lowercase();
        if ARCHIVE_EXTENSIONS.contains(&ext.as_str()) {
            return Some(Arc::new(ArchiveSource::new(path, self.registry.clone())));
        }
        DocumentSource::new(path, self.registry.clone())
            .map(|source| Arc::new(source) as Arc<dyn ExtensionSource>)
    }

    /// Collect every source under `dir`, sorted by path
    pub fn scan(&self, dir: impl AsRef<Path>) -> ScanResult {
        let mut result = ScanResult::default();
        let dir = dir.as_ref();

        if !dir.exists() {
            tracing::warn!("Extension directory does not exist: {}", dir.display());
            return result;
        }
        self.scan_into(dir, &mut result);
        result
    }

    fn scan_into(&self, dir: &Path, result: &mut ScanResult) {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                result.errors.push(HostError::malformed(
                    dir.display().to_string(),
                    format!("Failed to read extension directory: {}", e),
                ));
                return;
            }
        };

        let mut paths: Vec<PathBuf> = Vec::new();
        for entry in entries {
            match entry {
                Ok(entry) => paths.push(entry.path()),
                Err(e) => tracing::warn!("Failed to read directory entry: {}", e),
            }
        }
        paths.sort();

        for path in paths {
            // Skip hidden and private entries
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                if name.starts_with('.') || name.starts_with('_') {
                    continue;
                }
            }

            if let Some(source) = self.source_for(&path) {
                tracing::debug!("Found extension source {}", path.display());
                result.sources.push(source);
            } else if path.is_dir() && self.recursive {
                self.scan_into(&path, result);
            }
        }
    }

    /// Scan `dir` and register everything found with the host
    pub fn discover_directory(&self, host: &ExtensionHost, dir: impl AsRef<Path>) -> DiscoveryReport {
        let scan = self.scan(dir);
        let mut report = host.discover(scan.sources);
        report.errors.extend(scan.errors);
        report
    }

    /// Register sources under `dir` the host does not know yet.
    /// Sources that failed before are retried only once their files change.
    pub fn discover_new(
        &self,
        host: &ExtensionHost,
        dir: impl AsRef<Path>,
        rejected: &mut RejectedSources,
    ) -> DiscoveryReport {
        let scan = self.scan(dir);
        let known: Vec<String> = host.extensions().into_iter().map(|e| e.location).collect();
        let mut report = DiscoveryReport::default();

        for source in scan.sources {
            let location = source.location();
            if known.contains(&location) || rejected.unchanged(source.as_ref()) {
                continue;
            }
            match host.add_source(source.clone()) {
                Ok(descriptor) => {
                    rejected.clear(&location);
                    report.discovered.push(descriptor);
                }
                Err(e) => {
                    tracing::debug!("Remembering failed source {}", location);
                    rejected.record(source.as_ref());
                    report.errors.push(e);
                }
            }
        }
        report.errors.extend(scan.errors);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, text: &str) {
        std::fs::write(path, text).unwrap();
    }

    #[test]
    fn test_scan_classifies_entries() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(&root.join("items.json"), r#"{"info": {}}"#);
        write(&root.join("notes.txt"), "ignored");
        write(&root.join(".hidden.json"), "{}");
        std::fs::create_dir(root.join("weather")).unwrap();
        write(&root.join("weather").join("extension.yaml"), "info: {}\n");
        std::fs::create_dir_all(root.join("nested").join("deeper")).unwrap();
        write(&root.join("nested").join("deeper").join("quests.yaml"), "info: {}\n");

        let loader = DescriptorLoader::new(Arc::new(ModuleRegistry::new()));
        let flat = loader.scan(root);
        assert_eq!(flat.sources.len(), 2);

        let deep = DescriptorLoader::new(Arc::new(ModuleRegistry::new()))
            .recursive(true)
            .scan(root);
        assert_eq!(deep.sources.len(), 3);
    }

    #[test]
    fn test_discover_directory_reports_bad_sources() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("good.json"), r#"{"info": {"priority": 5}}"#);
        write(&dir.path().join("bad.json"), "{ not json");

        let host = ExtensionHost::new();
        let loader = DescriptorLoader::new(Arc::new(ModuleRegistry::new()));
        let report = loader.discover_directory(&host, dir.path());

        assert_eq!(report.discovered.len(), 1);
        assert_eq!(report.discovered[0].id, "good");
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].kind(), "MalformedSource");
    }

    #[test]
    fn test_broken_source_is_retried_only_after_it_changes() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("bad.json");
        write(&bad, "{ not json");

        let host = ExtensionHost::new();
        let loader = DescriptorLoader::new(Arc::new(ModuleRegistry::new()));
        let mut rejected = RejectedSources::default();

        let first = loader.discover_new(&host, dir.path(), &mut rejected);
        assert_eq!(first.errors.len(), 1);
        assert_eq!(rejected.len(), 1);

        // Unchanged, so nothing is reported again
        let second = loader.discover_new(&host, dir.path(), &mut rejected);
        assert!(second.errors.is_empty());
        assert!(second.discovered.is_empty());

        write(&dir.path().join("extra.json"), r#"{"info": {}}"#);
        let third = loader.discover_new(&host, dir.path(), &mut rejected);
        assert_eq!(third.discovered.len(), 1);
        assert!(third.errors.is_empty());

        write(&bad, r#"{"info": {"priority": 3}}"#);
        let fixed = loader.discover_new(&host, dir.path(), &mut rejected);
        assert_eq!(fixed.discovered.len(), 1);
        assert_eq!(fixed.discovered[0].id, "bad");
        assert!(rejected.is_empty());
        assert!(loader.discover_new(&host, dir.path(), &mut rejected).discovered.is_empty());
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let loader = DescriptorLoader::new(Arc::new(ModuleRegistry::new()));
        let scan = loader.scan("/definitely/not/here");
        assert!(scan.sources.is_empty());
        assert!(scan.errors.is_empty());
    }
}
