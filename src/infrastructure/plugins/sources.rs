//! Extension sources - code modules, data documents, manifest directories, archives

use super::fingerprint::{file_digest, files_digest};
use super::library::load_library;
use super::manifest::{DocumentFormat, ExtensionDocument};
use super::registry::{ExtensionConstructor, ModuleRegistry};
use crate::application::errors::HostError;
use crate::domain::entities::{ExtensionDescriptor, SourceKind};
use crate::domain::traits::{Extension, ExtensionSource};
use crate::plugins::DataExtension;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// File names recognized as a directory or archive manifest, in lookup order
pub const MANIFEST_NAMES: &[&str] = &[
    "extension.toml",
    "extension.yaml",
    "extension.yml",
    "extension.json",
];

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string()
}

fn read_document(path: &Path, format: DocumentFormat) -> Result<ExtensionDocument, HostError> {
    let location = path.display().to_string();
    let text = std::fs::read_to_string(path)
        .map_err(|e| HostError::malformed(&location, format!("Failed to read: {}", e)))?;
    ExtensionDocument::parse(&text, format, &location)
}

/// Kind reported for a file-backed document
fn document_kind(document: &ExtensionDocument) -> SourceKind {
    if document.has_code() {
        SourceKind::Module
    } else {
        SourceKind::Document
    }
}

/// Turn a parsed document into a live instance
fn instantiate_document(
    document: ExtensionDocument,
    id: &str,
    base_dir: Option<&Path>,
    registry: &ModuleRegistry,
    location: &str,
) -> Result<Box<dyn Extension>, HostError> {
    if let Some(library) = &document.library {
        let Some(base_dir) = base_dir else {
            return Err(HostError::malformed(
                location,
                "native libraries cannot be loaded from archives",
            ));
        };
        let extension = load_library(&base_dir.join(library), document.entry.as_deref())?;
        return Ok(Box::new(extension));
    }

    if let Some(entry) = &document.entry {
        let constructor = registry
            .get(entry)
            .ok_or_else(|| HostError::malformed(location, format!("unknown module '{}'", entry)))?;
        return Ok(constructor());
    }

    Ok(Box::new(DataExtension::new(id, document.content)))
}

/// An in-process code module
pub struct ModuleSource {
    descriptor: ExtensionDescriptor,
    constructor: ExtensionConstructor,
    location: String,
}

impl ModuleSource {
    pub fn new<F>(descriptor: ExtensionDescriptor, constructor: F) -> Self
    where
        F: Fn() -> Box<dyn Extension> + Send + Sync + 'static,
    {
        Self::from_constructor(descriptor, Arc::new(constructor))
    }

    pub fn from_constructor(descriptor: ExtensionDescriptor, constructor: ExtensionConstructor) -> Self {
        let location = format!("module://{}", descriptor.id);
        Self {
            descriptor,
            constructor,
            location,
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }
}

impl ExtensionSource for ModuleSource {
    fn location(&self) -> String {
        self.location.clone()
    }

    fn describe(&self) -> Result<ExtensionDescriptor, HostError> {
        Ok(self.descriptor.clone())
    }

    fn instantiate(&self) -> Result<Box<dyn Extension>, HostError> {
        Ok((self.constructor)())
    }
}

/// A standalone JSON, YAML or TOML document
pub struct DocumentSource {
    path: PathBuf,
    format: DocumentFormat,
    registry: Arc<ModuleRegistry>,
}

impl DocumentSource {
    /// `None` if the file extension is not a document format
    pub fn new(path: impl Into<PathBuf>, registry: Arc<ModuleRegistry>) -> Option<Self> {
        let path = path.into();
        let format = DocumentFormat::from_path(&path)?;
        Some(Self {
            path,
            format,
            registry,
        })
    }

    fn base_dir(&self) -> Option<&Path> {
        self.path.parent()
    }
}

impl ExtensionSource for DocumentSource {
    fn location(&self) -> String {
        self.path.display().to_string()
    }

    fn describe(&self) -> Result<ExtensionDescriptor, HostError> {
        let document = read_document(&self.path, self.format)?;
        document.descriptor(&file_stem(&self.path), document_kind(&document), &self.location())
    }

    fn instantiate(&self) -> Result<Box<dyn Extension>, HostError> {
        let location = self.location();
        let document = read_document(&self.path, self.format)?;
        let descriptor = document.descriptor(&file_stem(&self.path), document_kind(&document), &location)?;
        instantiate_document(document, &descriptor.id, self.base_dir(), &self.registry, &location)
    }

    fn fingerprint(&self) -> Option<String> {
        file_digest(&self.path)
    }
}

/// A directory holding an `extension.*` manifest and, optionally, a library
pub struct ManifestSource {
    dir: PathBuf,
    manifest: PathBuf,
    format: DocumentFormat,
    registry: Arc<ModuleRegistry>,
}

impl ManifestSource {
    /// `None` if the directory has no manifest
    pub fn new(dir: impl Into<PathBuf>, registry: Arc<ModuleRegistry>) -> Option<Self> {
        let dir = dir.into();
        let manifest = MANIFEST_NAMES
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.is_file())?;
        let format = DocumentFormat::from_path(&manifest)?;
        Some(Self {
            dir,
            manifest,
            format,
            registry,
        })
    }

    fn dir_name(&self) -> String {
        self.dir
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string()
    }
}

impl ExtensionSource for ManifestSource {
    fn location(&self) -> String {
        self.dir.display().to_string()
    }

    fn describe(&self) -> Result<ExtensionDescriptor, HostError> {
        let document = read_document(&self.manifest, self.format)?;
        document.descriptor(&self.dir_name(), document_kind(&document), &self.location())
    }

    fn instantiate(&self) -> Result<Box<dyn Extension>, HostError> {
        let location = self.location();
        let document = read_document(&self.manifest, self.format)?;
        let descriptor = document.descriptor(&self.dir_name(), document_kind(&document), &location)?;
        instantiate_document(document, &descriptor.id, Some(&self.dir), &self.registry, &location)
    }

    /// Covers the manifest and the library it names
    fn fingerprint(&self) -> Option<String> {
        let library = read_document(&self.manifest, self.format)
            .ok()
            .and_then(|document| document.library)
            .map(|library| self.dir.join(library))
            .filter(|path| path.is_file());

        let mut paths = vec![self.manifest.as_path()];
        if let Some(library) = &library {
            paths.push(library.as_path());
        }
        files_digest(paths)
    }
}

/// A zip archive with a manifest at its root
pub struct ArchiveSource {
    path: PathBuf,
    registry: Arc<ModuleRegistry>,
}

impl ArchiveSource {
    pub fn new(path: impl Into<PathBuf>, registry: Arc<ModuleRegistry>) -> Self {
        Self {
            path: path.into(),
            registry,
        }
    }

    fn read_manifest(&self) -> Result<ExtensionDocument, HostError> {
        let location = self.location();
        let file = std::fs::File::open(&self.path)
            .map_err(|e| HostError::malformed(&location, format!("Failed to open archive: {}", e)))?;
        let mut archive = zip::ZipArchive::new(file)
            .map_err(|e| HostError::malformed(&location, format!("Invalid archive: {}", e)))?;

        for name in MANIFEST_NAMES {
            let Ok(mut entry) = archive.by_name(name) else {
                continue;
            };
            let mut text = String::new();
            entry
                .read_to_string(&mut text)
                .map_err(|e| HostError::malformed(&location, format!("Failed to read {}: {}", name, e)))?;
            let format = DocumentFormat::from_path(Path::new(name))
                .ok_or_else(|| HostError::malformed(&location, format!("unsupported manifest {}", name)))?;
            return ExtensionDocument::parse(&text, format, &location);
        }

        Err(HostError::malformed(&location, "archive has no extension manifest"))
    }
}

impl ExtensionSource for ArchiveSource {
    fn location(&self) -> String {
        self.path.display().to_string()
    }

    fn describe(&self) -> Result<ExtensionDescriptor, HostError> {
        self.read_manifest()?
            .descriptor(&file_stem(&self.path), SourceKind::Archive, &self.location())
    }

    fn instantiate(&self) -> Result<Box<dyn Extension>, HostError> {
        let location = self.location();
        let document = self.read_manifest()?;
        let descriptor = document.descriptor(&file_stem(&self.path), SourceKind::Archive, &location)?;
        instantiate_document(document, &descriptor.id, None, &self.registry, &location)
    }

    fn fingerprint(&self) -> Option<String> {
        file_digest(&self.path)
    }
}
