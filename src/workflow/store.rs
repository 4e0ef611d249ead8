//! Session state persistence.
//!
//! One JSON file per project, named after a hash of the project's
//! canonical path. Writes go through a temporary file in the same
//! directory and are renamed into place.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use super::error::{EngineError, EngineResult};
use super::tracker::{ExecutionState, ExecutionTracker};

/// Reads and writes session state files.
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    /// Store rooted at `dir`. The directory is created on first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Stable key for a project: the first 16 hex digits of the SHA-256 of
    /// its canonical path.
    pub fn key(project: &Path) -> String {
        let canonical = project.canonicalize().unwrap_or_else(|_| project.to_path_buf());
        let mut hasher = Sha256::new();
        hasher.update(canonical.to_string_lossy().as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        digest[..16].to_string()
    }

    /// State file for a project.
    pub fn path_for(&self, project: &Path) -> PathBuf {
        self.dir.join(format!("{}.json", Self::key(project)))
    }

    /// Load the session for a project, if one exists.
    pub fn load(&self, project: &Path) -> EngineResult<Option<ExecutionTracker>> {
        let path = self.path_for(project);
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)?;
        let state: ExecutionState = serde_json::from_str(&content)
            .map_err(|e| EngineError::CorruptState { path: path.clone(), reason: e.to_string() })?;

        let tracker = ExecutionTracker::from_state(state).map_err(|e| match e {
            EngineError::CorruptState { reason, .. } => EngineError::CorruptState { path: path.clone(), reason },
            other => other,
        })?;

        tracing::debug!(path = ?path, "Loaded session state");
        Ok(Some(tracker))
    }

    /// Load the session for a project or fail with `NoSession`.
    pub fn require(&self, project: &Path) -> EngineResult<ExecutionTracker> {
        self.load(project)?.ok_or_else(|| EngineError::NoSession(project.to_path_buf()))
    }

    /// Write the session state atomically.
    pub fn save(&self, tracker: &ExecutionTracker) -> EngineResult<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(tracker.project());

        let content = serde_json::to_string_pretty(tracker.state())?;
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.flush()?;
        tmp.persist(&path).map_err(|e| EngineError::Io(e.error))?;

        tracing::debug!(path = ?path, "Saved session state");
        Ok(path)
    }

    /// Delete a project's session. Returns whether one existed.
    pub fn remove(&self, project: &Path) -> EngineResult<bool> {
        let path = self.path_for(project);
        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::info!(path = ?path, "Removed session state");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{CompositionRequest, Resolver, WorkflowCatalog, WorkflowDocument};

    fn tracker(project: &Path) -> ExecutionTracker {
        let doc = WorkflowDocument::parse(
            Path::new("a.md"),
            "---\nname: a\ntags: [x]\n---\n## RED\n- [ ] one\n- [ ] two\n",
        )
        .unwrap();
        let catalog = WorkflowCatalog::from_documents([doc]).unwrap();
        let plan = Resolver::new(&catalog).resolve(&CompositionRequest::new(["x"])).unwrap();
        ExecutionTracker::new(plan, project)
    }

    #[test]
    fn test_key_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let a = StateStore::key(dir.path());
        assert_eq!(a.len(), 16);
        assert_eq!(a, StateStore::key(dir.path()));
        assert_ne!(a, StateStore::key(Path::new("/somewhere/else")));
    }

    #[test]
    fn test_save_and_load() {
        let project = tempfile::tempdir().unwrap();
        let state_dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(state_dir.path().join("sessions"));

        assert!(store.load(project.path()).unwrap().is_none());
        assert!(matches!(store.require(project.path()), Err(EngineError::NoSession(_))));

        let mut tracker = tracker(project.path());
        tracker.start_next().unwrap();
        let path = store.save(&tracker).unwrap();
        assert!(path.exists());

        let loaded = store.require(project.path()).unwrap();
        assert_eq!(loaded.current_item().unwrap().id().as_str(), "a/red/1");
        assert_eq!(loaded.state().session_id, tracker.state().session_id);
    }

    #[test]
    fn test_corrupt_file() {
        let project = tempfile::tempdir().unwrap();
        let state_dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(state_dir.path());
        fs::write(store.path_for(project.path()), "{ not json").unwrap();

        match store.load(project.path()) {
            Err(EngineError::CorruptState { path, .. }) => assert_eq!(path, store.path_for(project.path())),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_remove() {
        let project = tempfile::tempdir().unwrap();
        let state_dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(state_dir.path());
        assert!(!store.remove(project.path()).unwrap());
        store.save(&tracker(project.path())).unwrap();
        assert!(store.remove(project.path()).unwrap());
        assert!(store.load(project.path()).unwrap().is_none());
    }
}
