//! Extractor and dependency-scanner registries.
//!
//! Two thread-safe, case-insensitive maps from language label to
//! instance, plus pattern dispatch: extension table for extractors, glob
//! match over declared manifest names for scanners. There is exactly one
//! canonical registry pair per pipeline; it is passed explicitly, never
//! reached through a global.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::config::ArchConfig;
use crate::extractor::go::GoExtractor;
use crate::extractor::java::JavaExtractor;
use crate::extractor::javascript::JavaScriptExtractor;
use crate::extractor::markdown::MarkdownExtractor;
use crate::extractor::python::PythonExtractor;
use crate::extractor::Extractor;
use crate::scanner::docker::DockerScanner;
use crate::scanner::golang::GoScanner;
use crate::scanner::helm::HelmScanner;
use crate::scanner::java::JavaScanner;
use crate::scanner::node::NodeScanner;
use crate::scanner::python::PythonScanner;
use crate::scanner::DependencyScanner;
use crate::types::CancelFlag;

/// Fixed extension table. TypeScript intentionally maps to the
/// JavaScript extractor, which handles both dialects.
const EXTENSION_LANGUAGES: [(&str, &str); 8] = [
    ("go", "go"),
    ("java", "java"),
    ("py", "python"),
    ("js", "javascript"),
    ("ts", "javascript"),
    ("jsx", "javascript"),
    ("tsx", "javascript"),
    ("md", "markdown"),
];

/// Every extension the fixed dispatch table knows about.
pub fn known_extensions() -> Vec<&'static str> {
    EXTENSION_LANGUAGES.iter().map(|(ext, _)| *ext).collect()
}

/// Language label for a file extension, per the fixed dispatch table.
pub fn language_for_extension(ext: &str) -> Option<&'static str> {
    let ext = ext.to_lowercase();
    EXTENSION_LANGUAGES
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, lang)| *lang)
}

/// Thread-safe map from language label to extractor.
#[derive(Default)]
pub struct ExtractorRegistry {
    inner: RwLock<HashMap<String, Arc<dyn Extractor>>>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an extractor under its language label. Re-registration
    /// replaces the previous instance with a warning.
    pub fn register(&self, extractor: Arc<dyn Extractor>) {
        let label = extractor.language().to_lowercase();
        let mut map = self.inner.write().unwrap_or_else(|p| p.into_inner());
        if map.insert(label.clone(), extractor).is_some() {
            tracing::warn!(language = label, "replacing previously registered extractor");
        }
    }

    pub fn get(&self, language: &str) -> Option<Arc<dyn Extractor>> {
        self.inner
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(&language.to_lowercase())
            .cloned()
    }

    pub fn list(&self) -> Vec<String> {
        let mut languages: Vec<String> = self
            .inner
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .keys()
            .cloned()
            .collect();
        languages.sort();
        languages
    }

    /// Dispatch by file extension through the fixed table.
    pub fn for_file(&self, path: &Path) -> Option<(Arc<dyn Extractor>, &'static str)> {
        let ext = path.extension()?.to_str()?;
        let language = language_for_extension(ext)?;
        self.get(language).map(|e| (e, language))
    }
}

struct ScannerEntry {
    scanner: Arc<dyn DependencyScanner>,
    globs: GlobSet,
}

/// Thread-safe map from ecosystem label to manifest scanner.
#[derive(Default)]
pub struct ScannerRegistry {
    inner: RwLock<HashMap<String, ScannerEntry>>,
}

impl ScannerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, scanner: Arc<dyn DependencyScanner>) {
        let label = scanner.language().to_lowercase();
        let mut builder = GlobSetBuilder::new();
        for pattern in scanner.manifest_globs() {
            match Glob::new(pattern) {
                Ok(glob) => {
                    builder.add(glob);
                }
                Err(e) => {
                    tracing::warn!(pattern, error = %e, "ignoring bad manifest glob");
                }
            }
        }
        let globs = builder.build().unwrap_or_else(|_| GlobSet::empty());
        let mut map = self.inner.write().unwrap_or_else(|p| p.into_inner());
        if map.insert(label.clone(), ScannerEntry { scanner, globs }).is_some() {
            tracing::warn!(language = label, "replacing previously registered scanner");
        }
    }

    pub fn get(&self, language: &str) -> Option<Arc<dyn DependencyScanner>> {
        self.inner
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(&language.to_lowercase())
            .map(|e| Arc::clone(&e.scanner))
    }

    pub fn list(&self) -> Vec<String> {
        let mut languages: Vec<String> = self
            .inner
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .keys()
            .cloned()
            .collect();
        languages.sort();
        languages
    }

    /// Dispatch by manifest file name against each scanner's globs.
    pub fn for_file(&self, path: &Path) -> Option<Arc<dyn DependencyScanner>> {
        let name = path.file_name()?;
        let map = self.inner.read().unwrap_or_else(|p| p.into_inner());
        let mut labels: Vec<&String> = map.keys().collect();
        labels.sort(); // dispatch independent of map iteration order
        for label in labels {
            let entry = &map[label];
            if entry.globs.is_match(Path::new(name)) {
                return Some(Arc::clone(&entry.scanner));
            }
        }
        None
    }
}

/// The canonical registry pair for one pipeline.
#[derive(Default)]
pub struct Registries {
    pub extractors: ExtractorRegistry,
    pub scanners: ScannerRegistry,
}

/// Build the registries with every built-in extractor and scanner,
/// wiring subprocess deadlines and the cancellation flag from the
/// configuration.
pub fn default_registries(config: &ArchConfig, cancel: CancelFlag) -> Registries {
    let registries = Registries::default();
    let timeout = Duration::from_secs(config.subprocess_timeout_secs);

    registries.extractors.register(Arc::new(GoExtractor));
    registries.extractors.register(Arc::new(MarkdownExtractor));
    registries
        .extractors
        .register(Arc::new(PythonExtractor::new(timeout, cancel.clone())));
    registries
        .extractors
        .register(Arc::new(JavaScriptExtractor::new(timeout, cancel.clone())));
    registries
        .extractors
        .register(Arc::new(JavaExtractor::new(timeout, cancel)));

    registries.scanners.register(Arc::new(GoScanner));
    registries.scanners.register(Arc::new(NodeScanner));
    registries.scanners.register(Arc::new(JavaScanner));
    registries.scanners.register(Arc::new(PythonScanner));
    registries.scanners.register(Arc::new(DockerScanner));
    registries.scanners.register(Arc::new(HelmScanner));

    registries
}
