//! File locations, pattern sets and file collections.

use crate::artifact::ArtifactCollection;
use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;
use tessera_graph::Value;

/// A directory location.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Directory {
    path: PathBuf,
}

impl Directory {
    /// Returns the absolute location.
    pub fn path(&self) -> &FsPath {
        &self.path
    }
}

/// A regular file location.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RegularFile {
    path: PathBuf,
}

impl RegularFile {
    /// Returns the absolute location.
    pub fn path(&self) -> &FsPath {
        &self.path
    }
}

/// Resolves locations against a base directory.
#[derive(Clone, Debug)]
pub struct FileFactory {
    base_dir: PathBuf,
}

impl FileFactory {
    /// Creates a factory resolving relative paths against `base_dir`.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Returns the base directory.
    pub fn base_dir(&self) -> &FsPath {
        &self.base_dir
    }

    /// Resolves `path` against the base directory.
    pub fn resolve(&self, path: impl AsRef<FsPath>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// Returns the directory at `path`.
    pub fn dir(&self, path: impl AsRef<FsPath>) -> Arc<Directory> {
        Arc::new(Directory {
            path: self.resolve(path),
        })
    }

    /// Returns the regular file at `path`.
    pub fn file(&self, path: impl AsRef<FsPath>) -> Arc<RegularFile> {
        Arc::new(RegularFile {
            path: self.resolve(path),
        })
    }
}

/// Include and exclude patterns applied to relative paths.
///
/// Patterns use `/` separators; `*` matches within one segment, `**`
/// matches any number of segments and `?` matches one character.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PatternSet {
    /// Patterns a path must match one of, if any are given.
    pub includes: Vec<String>,
    /// Patterns that reject a path.
    pub excludes: Vec<String>,
    /// Whether matching is case sensitive.
    pub case_sensitive: bool,
}

impl Default for PatternSet {
    fn default() -> Self {
        Self {
            includes: Vec::new(),
            excludes: Vec::new(),
            case_sensitive: true,
        }
    }
}

impl PatternSet {
    /// Creates an empty pattern set that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an include pattern.
    pub fn include(mut self, pattern: impl Into<String>) -> Self {
        self.includes.push(pattern.into());
        self
    }

    /// Adds an exclude pattern.
    pub fn exclude(mut self, pattern: impl Into<String>) -> Self {
        self.excludes.push(pattern.into());
        self
    }

    /// Sets case sensitivity.
    pub fn with_case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    /// Returns `true` if the relative `path` is accepted.
    pub fn matches(&self, path: &str) -> bool {
        let path = self.normalize(path);
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let hit = |pattern: &String| {
            let pattern = self.normalize(pattern);
            let parts: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
            match_segments(&parts, &segments)
        };
        let included = self.includes.is_empty() || self.includes.iter().any(&hit);
        included && !self.excludes.iter().any(&hit)
    }

    fn normalize(&self, text: &str) -> String {
        let text = text.replace('\\', "/");
        if self.case_sensitive {
            text
        } else {
            text.to_lowercase()
        }
    }
}

fn match_segments(pattern: &[&str], path: &[&str]) -> bool {
    match pattern.split_first() {
        None => path.is_empty(),
        Some((&"**", rest)) => (0..=path.len()).any(|skip| match_segments(rest, &path[skip..])),
        Some((first, rest)) => match path.split_first() {
            Some((segment, tail)) => {
                match_segment(first.as_bytes(), segment.as_bytes()) && match_segments(rest, tail)
            }
            None => false,
        },
    }
}

fn match_segment(pattern: &[u8], text: &[u8]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some((b'*', rest)) => (0..=text.len()).any(|skip| match_segment(rest, &text[skip..])),
        Some((b'?', rest)) => !text.is_empty() && match_segment(rest, &text[1..]),
        Some((c, rest)) => text.first() == Some(c) && match_segment(rest, &text[1..]),
    }
}

/// One source of files in a [`FileCollection`].
#[derive(Clone, Debug)]
pub enum FileCollectionElement {
    /// Explicit files.
    Files(Vec<PathBuf>),
    /// Files under a directory, filtered by patterns.
    DirectoryTree {
        /// The tree root.
        dir: PathBuf,
        /// The filter applied to paths relative to `dir`.
        patterns: PatternSet,
    },
    /// Files computed by a provider.
    Provider(Value),
    /// Files of resolved artifacts.
    Artifacts(Arc<ArtifactCollection>),
}

/// A lazily resolved set of files.
#[derive(Debug)]
pub struct FileCollection {
    elements: Vec<FileCollectionElement>,
}

impl FileCollection {
    /// Returns the elements in order.
    pub fn elements(&self) -> &[FileCollectionElement] {
        &self.elements
    }

    /// Returns `true` if there are no elements.
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Returns the files that are known without querying providers or the file system.
    pub fn known_files(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        for element in &self.elements {
            match element {
                FileCollectionElement::Files(paths) => files.extend(paths.iter().cloned()),
                FileCollectionElement::Artifacts(artifacts) => {
                    files.extend(artifacts.artifacts().iter().map(|a| a.file().to_path_buf()))
                }
                FileCollectionElement::DirectoryTree { .. } | FileCollectionElement::Provider(_) => {}
            }
        }
        files
    }
}

/// Builds file collections, resolving explicit paths through a [`FileFactory`].
#[derive(Clone, Debug)]
pub struct FileCollectionFactory {
    files: FileFactory,
}

impl FileCollectionFactory {
    /// Creates a factory over `files`.
    pub fn new(files: FileFactory) -> Self {
        Self { files }
    }

    /// Returns an empty collection.
    pub fn empty(&self) -> Arc<FileCollection> {
        self.resolving(Vec::new())
    }

    /// Returns a collection of `elements`, with relative paths resolved.
    pub fn resolving(&self, elements: Vec<FileCollectionElement>) -> Arc<FileCollection> {
        let elements = elements
            .into_iter()
            .map(|element| match element {
                FileCollectionElement::Files(paths) => {
                    FileCollectionElement::Files(paths.iter().map(|p| self.files.resolve(p)).collect())
                }
                FileCollectionElement::DirectoryTree { dir, patterns } => {
                    FileCollectionElement::DirectoryTree {
                        dir: self.files.resolve(dir),
                        patterns,
                    }
                }
                other => other,
            })
            .collect();
        Arc::new(FileCollection { elements })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_relative_paths() {
        let factory = FileFactory::new("/work");
        assert_eq!(factory.dir("out").path(), FsPath::new("/work/out"));
        assert_eq!(factory.file("/etc/hosts").path(), FsPath::new("/etc/hosts"));
    }

    #[test]
    fn pattern_matching() {
        let patterns = PatternSet::new().include("**/*.rs").exclude("target/**");
        assert!(patterns.matches("src/lib.rs"));
        assert!(patterns.matches("main.rs"));
        assert!(!patterns.matches("target/debug/build.rs"));
        assert!(!patterns.matches("README.md"));
    }

    #[test]
    fn case_insensitive_patterns() {
        let patterns = PatternSet::new().include("*.TXT").with_case_sensitive(false);
        assert!(patterns.matches("notes.txt"));
        assert!(!PatternSet::new().include("*.TXT").matches("notes.txt"));
    }

    #[test]
    fn question_mark_matches_one_char() {
        let patterns = PatternSet::new().include("a?c");
        assert!(patterns.matches("abc"));
        assert!(!patterns.matches("ac"));
    }

    #[test]
    fn collection_factory_resolves_elements() {
        let factory = FileCollectionFactory::new(FileFactory::new("/work"));
        let collection = factory.resolving(vec![
            FileCollectionElement::Files(vec![PathBuf::from("a.txt")]),
            FileCollectionElement::Provider(Value::Null),
        ]);
        assert_eq!(collection.known_files(), vec![PathBuf::from("/work/a.txt")]);
        assert_eq!(collection.elements().len(), 2);
        assert!(factory.empty().is_empty());
    }
}
