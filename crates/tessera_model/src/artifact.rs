//! Resolved dependency artifacts.

use std::fmt;
use std::path::{Path as FsPath, PathBuf};
use std::sync::{Arc, OnceLock};

/// Identifies one artifact of a resolved component.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ComponentArtifactId {
    /// The owning component, e.g. `org.example:lib:1.0`.
    pub component: String,
    /// The artifact name.
    pub name: String,
    /// The artifact classifier, if any.
    pub classifier: Option<String>,
    /// The file extension.
    pub extension: String,
}

impl ComponentArtifactId {
    /// Creates an id without a classifier.
    pub fn new(component: impl Into<String>, name: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            name: name.into(),
            classifier: None,
            extension: extension.into(),
        }
    }

    /// Sets the classifier.
    pub fn with_classifier(mut self, classifier: impl Into<String>) -> Self {
        self.classifier = Some(classifier.into());
        self
    }
}

impl fmt::Display for ComponentArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}", self.component, self.name)?;
        if let Some(classifier) = &self.classifier {
            write!(f, "-{classifier}")?;
        }
        write!(f, ".{})", self.extension)
    }
}

type FileCalculation = Box<dyn Fn() -> PathBuf + Send + Sync>;

/// An artifact whose file is calculated on first access.
pub struct ResolvableArtifact {
    id: ComponentArtifactId,
    file: OnceLock<PathBuf>,
    calculate: Option<FileCalculation>,
}

impl ResolvableArtifact {
    /// Creates an artifact whose file is calculated by `calculate` on first access.
    pub fn lazy(id: ComponentArtifactId, calculate: impl Fn() -> PathBuf + Send + Sync + 'static) -> Self {
        Self {
            id,
            file: OnceLock::new(),
            calculate: Some(Box::new(calculate)),
        }
    }

    /// Creates an artifact whose file is already known.
    pub fn resolved(id: ComponentArtifactId, file: PathBuf) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(file);
        Self {
            id,
            file: cell,
            calculate: None,
        }
    }

    /// Returns the artifact id.
    pub fn id(&self) -> &ComponentArtifactId {
        &self.id
    }

    /// Returns the artifact file, calculating it if needed.
    pub fn file(&self) -> &FsPath {
        self.file.get_or_init(|| match &self.calculate {
            Some(calculate) => calculate(),
            None => PathBuf::new(),
        })
    }

    /// Returns `true` once the file is known.
    pub fn is_resolved(&self) -> bool {
        self.file.get().is_some()
    }
}

impl fmt::Debug for ResolvableArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvableArtifact")
            .field("id", &self.id)
            .field("file", &self.file.get())
            .finish()
    }
}

/// The outcome of resolving a set of artifacts.
#[derive(Debug, Default)]
pub struct ArtifactCollection {
    artifacts: Vec<Arc<ResolvableArtifact>>,
    failures: Vec<String>,
    lenient: bool,
}

impl ArtifactCollection {
    /// Creates a collection.
    pub fn new(artifacts: Vec<Arc<ResolvableArtifact>>, failures: Vec<String>, lenient: bool) -> Self {
        Self {
            artifacts,
            failures,
            lenient,
        }
    }

    /// Returns the resolved artifacts.
    pub fn artifacts(&self) -> &[Arc<ResolvableArtifact>] {
        &self.artifacts
    }

    /// Returns the captured resolution failures.
    pub fn failures(&self) -> &[String] {
        &self.failures
    }

    /// Returns `true` if failures are tolerated.
    pub fn is_lenient(&self) -> bool {
        self.lenient
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn file_is_calculated_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let artifact = ResolvableArtifact::lazy(ComponentArtifactId::new("org:lib:1", "lib", "jar"), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            PathBuf::from("/repo/lib.jar")
        });
        assert!(!artifact.is_resolved());
        assert_eq!(artifact.file(), FsPath::new("/repo/lib.jar"));
        assert_eq!(artifact.file(), FsPath::new("/repo/lib.jar"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn display_includes_classifier() {
        let id = ComponentArtifactId::new("org:lib:1", "lib", "jar").with_classifier("sources");
        assert_eq!(id.to_string(), "org:lib:1 (lib-sources.jar)");
    }
}
