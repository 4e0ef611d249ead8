//! Workflow catalog.
//!
//! The catalog is the validated set of templates the resolver composes
//! from: names are unique and every `depends_on` entry names a loaded
//! document.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::document::{Tag, WorkflowDocument};
use super::error::{EngineError, EngineResult};
use super::parser::has_front_matter;

/// A validated collection of workflow templates, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct WorkflowCatalog {
    documents: BTreeMap<String, WorkflowDocument>,
}

impl WorkflowCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog, rejecting duplicate names and unknown dependencies.
    pub fn from_documents(documents: impl IntoIterator<Item = WorkflowDocument>) -> EngineResult<Self> {
        let mut catalog = Self::new();
        for doc in documents {
            catalog.insert(doc)?;
        }
        catalog.validate_references()?;
        Ok(catalog)
    }

    /// Load every workflow document under `dirs`.
    ///
    /// Only Markdown files that open with a front-matter block are treated
    /// as workflow documents; other files are skipped. Missing directories
    /// are ignored.
    pub fn discover(dirs: &[PathBuf], max_depth: usize) -> EngineResult<Self> {
        let mut seen = HashSet::new();
        let mut documents = Vec::new();

        for dir in dirs {
            if !dir.is_dir() {
                tracing::debug!(dir = ?dir, "Workflow directory not found, skipping");
                continue;
            }

            let walker = WalkDir::new(dir).max_depth(max_depth).sort_by_file_name();
            for entry in walker {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to read workflow directory entry");
                        continue;
                    }
                };

                let path = entry.path();
                if !entry.file_type().is_file() || !is_markdown(path) {
                    continue;
                }

                let key = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
                if !seen.insert(key) {
                    continue;
                }

                let content = std::fs::read_to_string(path)?;
                if !has_front_matter(&content) {
                    tracing::debug!(path = ?path, "No front matter, not a workflow document");
                    continue;
                }

                documents.push(WorkflowDocument::parse(path, &content)?);
            }
        }

        let catalog = Self::from_documents(documents)?;
        tracing::info!(count = catalog.len(), "Loaded workflow catalog");
        Ok(catalog)
    }

    /// Add a document. Names must be unique.
    pub fn insert(&mut self, doc: WorkflowDocument) -> EngineResult<()> {
        if let Some(existing) = self.documents.get(doc.name()) {
            return Err(EngineError::malformed(
                doc.source(),
                format!(
                    "workflow '{}' is already defined in {}",
                    doc.name(),
                    existing.source().display()
                ),
            ));
        }
        self.documents.insert(doc.name().to_string(), doc);
        Ok(())
    }

    /// Check that every dependency names a known document.
    pub fn validate_references(&self) -> EngineResult<()> {
        for doc in self.documents.values() {
            if let Some(missing) = doc.depends_on().iter().find(|d| !self.documents.contains_key(*d)) {
                return Err(EngineError::malformed(
                    doc.source(),
                    format!("depends on unknown workflow '{missing}'"),
                ));
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&WorkflowDocument> {
        self.documents.get(name)
    }

    /// Documents in name order.
    pub fn iter(&self) -> impl Iterator<Item = &WorkflowDocument> {
        self.documents.values()
    }

    pub fn names(&self) -> Vec<&str> {
        self.documents.keys().map(String::as_str).collect()
    }

    /// Every tag used by any document.
    pub fn tags(&self) -> BTreeSet<&Tag> {
        self.documents.values().flat_map(|d| d.applicable_stacks()).collect()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

fn is_markdown(path: &Path) -> bool {
    path.extension().is_some_and(|e| e.eq_ignore_ascii_case("md") || e.eq_ignore_ascii_case("markdown"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(name: &str, deps: &[&str]) -> WorkflowDocument {
        let content = format!(
            "---\nname: {name}\ndepends_on: [{}]\n---\n## RED\n- [ ] a\n",
            deps.join(", ")
        );
        WorkflowDocument::parse(Path::new(&format!("{name}.md")), &content).unwrap()
    }

    #[test]
    fn test_from_documents() {
        let catalog =
            WorkflowCatalog::from_documents(vec![doc("b", &["a"]), doc("a", &[])]).unwrap();
        assert_eq!(catalog.names(), vec!["a", "b"]);
        assert_eq!(catalog.len(), 2);
        assert!(catalog.get("b").is_some());
    }

    #[test]
    fn test_duplicate_name_is_malformed() {
        let err = WorkflowCatalog::from_documents(vec![doc("a", &[]), doc("a", &[])]).unwrap_err();
        assert!(matches!(err, EngineError::MalformedWorkflow { .. }));
        assert!(err.to_string().contains("already defined"));
    }

    #[test]
    fn test_unknown_dependency_is_malformed() {
        let err = WorkflowCatalog::from_documents(vec![doc("a", &["ghost"])]).unwrap_err();
        match err {
            EngineError::MalformedWorkflow { path, reason } => {
                assert_eq!(path, PathBuf::from("a.md"));
                assert!(reason.contains("'ghost'"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_discover_skips_plain_markdown() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("python");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.path().join("README.md"), "# Readme\n\n## RED\n- [ ] a\n").unwrap();
        std::fs::write(
            nested.join("dev.md"),
            "---\nname: python-development\ntags: [python]\n---\n## RED\n- [ ] a\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "---\nname: nope\n---\n").unwrap();

        let catalog = WorkflowCatalog::discover(&[dir.path().to_path_buf()], 4).unwrap();
        assert_eq!(catalog.names(), vec!["python-development"]);
        assert_eq!(catalog.tags().into_iter().map(Tag::as_str).collect::<Vec<_>>(), vec!["python"]);
    }

    #[test]
    fn test_discover_fails_on_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.md"), "---\nname: bad\n---\n# No phases\n").unwrap();
        let err = WorkflowCatalog::discover(&[dir.path().to_path_buf()], 4).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_discover_same_dir_twice() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), "---\nname: a\n---\n## RED\n- [ ] a\n").unwrap();
        let dirs = vec![dir.path().to_path_buf(), dir.path().to_path_buf()];
        let catalog = WorkflowCatalog::discover(&dirs, 4).unwrap();
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_discover_missing_dir_is_empty() {
        let catalog = WorkflowCatalog::discover(&[PathBuf::from("/nonexistent/redgreen")], 4).unwrap();
        assert!(catalog.is_empty());
    }
}
