//! Module content on disk: mutable working copies and frozen release snapshots.

use std::path::PathBuf;

use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::paths::RegistryPaths;
use crate::store::write_atomic;

/// Reads and writes module content files under the registry root.
#[derive(Debug, Clone)]
pub struct ContentStore {
    paths: RegistryPaths,
}

impl ContentStore {
    pub fn new(paths: RegistryPaths) -> Self {
        Self { paths }
    }

    pub fn working_path(&self, module_path: &str) -> PathBuf {
        self.paths.working_content(module_path)
    }

    pub fn frozen_path(&self, module_id: &str, label: &str) -> PathBuf {
        self.paths.frozen_content(module_id, label)
    }

    pub fn has_working(&self, module_path: &str) -> bool {
        self.working_path(module_path).is_file()
    }

    pub fn read_working(&self, module_path: &str) -> StoreResult<String> {
        read(self.working_path(module_path))
    }

    pub fn write_working(&self, module_path: &str, content: &str) -> StoreResult<()> {
        let path = self.working_path(module_path);
        write_atomic(&path, content.as_bytes())?;
        debug!(path = %path.display(), bytes = content.len(), "working content written");
        Ok(())
    }

    /// Append `snippet` to the working content, creating the file if needed.
    pub fn append_working(&self, module_path: &str, snippet: &str) -> StoreResult<()> {
        let mut content = match self.read_working(module_path) {
            Ok(existing) => existing,
            Err(StoreError::MissingContent { .. }) => String::new(),
            Err(e) => return Err(e),
        };
        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }
        content.push_str(snippet);
        self.write_working(module_path, &content)
    }

    pub fn remove_working(&self, module_path: &str) -> StoreResult<()> {
        let path = self.working_path(module_path);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }

    /// Write the snapshot of a version being released.
    pub fn freeze(&self, module_id: &str, label: &str, content: &str) -> StoreResult<PathBuf> {
        let path = self.frozen_path(module_id, label);
        write_atomic(&path, content.as_bytes())?;
        debug!(module = %module_id, label = %label, path = %path.display(), "content frozen");
        Ok(path)
    }

    pub fn read_frozen(&self, module_id: &str, label: &str) -> StoreResult<String> {
        read(self.frozen_path(module_id, label))
    }
}

fn read(path: PathBuf) -> StoreResult<String> {
    std::fs::read_to_string(&path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            StoreError::MissingContent {
                path: path.display().to_string(),
            }
        } else {
            StoreError::io(&path, e)
        }
    })
}
