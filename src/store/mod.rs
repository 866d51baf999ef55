//! Registry Store: durable home of every module record.
//!
//! - [`RegistryStore`]: load/save of `registry.toml` with optimistic
//!   concurrency and an exclusive lock for multi-step mutations
//! - [`ContentStore`]: working content and frozen release snapshots
//! - [`RegistryLock`]: the scoped lock guard
//!
//! Writes are always write-fsync-rename, so a killed process leaves either
//! the old file or the new one, never a torn mix.

pub mod content;
pub mod lock;

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::{debug, info};

pub use content::ContentStore;
pub use lock::RegistryLock;

use crate::config::RegistryConfig;
use crate::error::{StoreError, StoreResult, Violation};
use crate::model::{REGISTRY_FORMAT, ModuleRecord, Registry, RegistryFile};
use crate::paths::RegistryPaths;
use crate::validate;

/// What [`RegistryStore::save`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Written,
    /// On-disk state already matched; the file was left untouched.
    Unchanged,
}

/// Raw records plus the revision of the bytes they came from.
#[derive(Debug, Clone)]
pub struct RawRegistry {
    pub records: Vec<ModuleRecord>,
    pub revision: String,
}

/// Handle on `registry.toml` and its lock file.
#[derive(Debug, Clone)]
pub struct RegistryStore {
    path: PathBuf,
    lock_path: PathBuf,
    lock_timeout: Duration,
    lock_poll: Duration,
    /// Base IRI persisted version IRIs are re-minted against on load.
    base_iri: Option<String>,
}

impl RegistryStore {
    pub fn new(paths: &RegistryPaths, config: &RegistryConfig) -> Self {
        Self {
            path: paths.registry_file.clone(),
            lock_path: paths.lock_file.clone(),
            lock_timeout: config.lock_timeout(),
            lock_poll: config.lock_poll(),
            base_iri: Some(config.base_iri.trim_end_matches('/').to_string()),
        }
    }

    /// A store at an explicit location, with default lock timing.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut lock_name = path.as_os_str().to_owned();
        lock_name.push(".lock");
        Self {
            lock_path: PathBuf::from(lock_name),
            path,
            lock_timeout: Duration::from_secs(10),
            lock_poll: Duration::from_millis(50),
            base_iri: None,
        }
    }

    /// Re-mint version IRIs against `base` on every load.
    pub fn with_base_iri(mut self, base: &str) -> Self {
        self.base_iri = Some(base.trim_end_matches('/').to_string());
        self
    }

    pub fn with_lock_timing(mut self, timeout: Duration, poll: Duration) -> Self {
        self.lock_timeout = timeout;
        self.lock_poll = poll;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Write an empty registry. Fails if one already exists.
    pub fn create(&self) -> StoreResult<Registry> {
        let mut registry = Registry::new();
        self.save(&mut registry)?;
        Ok(registry)
    }

    /// Load and fully validate the registry.
    ///
    /// Either every record is valid or `StoreError::Schema` lists every
    /// violation found. Never returns a partially-valid registry. With a base
    /// IRI set, a version IRI that differs from the re-minted one is a
    /// violation too.
    pub fn load(&self) -> StoreResult<Registry> {
        let raw = self.load_records()?;
        let mut violations = match self.base_iri.as_deref() {
            Some(base) => validate::check_version_iris(&raw.records, base),
            None => Vec::new(),
        };
        let parsed = Registry::from_records(raw.records);
        let mut registry = match parsed {
            Ok(registry) if violations.is_empty() => registry,
            Ok(_) => return Err(self.schema_error(violations)),
            Err(found) => {
                violations.extend(found);
                return Err(self.schema_error(violations));
            }
        };
        registry.set_revision(Some(raw.revision));
        debug!(path = %self.path.display(), modules = registry.len(), "registry loaded");
        Ok(registry)
    }

    fn schema_error(&self, mut violations: Vec<Violation>) -> StoreError {
        violations.sort();
        violations.dedup();
        StoreError::Schema {
            path: self.path.display().to_string(),
            violations,
        }
    }

    /// Load records without schema validation, for reporting.
    pub fn load_records(&self) -> StoreResult<RawRegistry> {
        let bytes = self.read_bytes()?.ok_or_else(|| {
            StoreError::io(
                &self.path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "registry file not found"),
            )
        })?;
        let file = parse_registry(&self.path, &bytes)?;
        Ok(RawRegistry {
            records: file.modules,
            revision: revision_of(&bytes),
        })
    }

    /// Revision of the file currently on disk, if any.
    pub fn current_revision(&self) -> StoreResult<Option<String>> {
        Ok(self.read_bytes()?.map(|b| revision_of(&b)))
    }

    /// Persist `registry`.
    ///
    /// Refuses with `Conflict` when the file changed since `registry` was
    /// loaded. Skips the write when the on-disk state already matches, which
    /// keeps unmodified files byte-for-byte identical.
    pub fn save(&self, registry: &mut Registry) -> StoreResult<SaveOutcome> {
        let on_disk = self.read_bytes()?;
        let disk_revision = on_disk.as_deref().map(revision_of);
        if disk_revision.as_deref() != registry.revision() {
            return Err(StoreError::Conflict {
                path: self.path.display().to_string(),
            });
        }

        if let Some(bytes) = on_disk.as_deref() {
            let unchanged = parse_registry(&self.path, bytes)
                .ok()
                .and_then(|file| Registry::from_records(file.modules).ok())
                .is_some_and(|current| current == *registry);
            if unchanged {
                debug!(path = %self.path.display(), "registry unchanged, write skipped");
                return Ok(SaveOutcome::Unchanged);
            }
        }

        let rendered = render_registry(registry)?;
        write_atomic(&self.path, rendered.as_bytes())?;
        registry.set_revision(Some(revision_of(rendered.as_bytes())));
        info!(path = %self.path.display(), modules = registry.len(), "registry saved");
        Ok(SaveOutcome::Written)
    }

    pub fn lock(&self) -> StoreResult<RegistryLock> {
        RegistryLock::acquire(&self.lock_path, self.lock_timeout, self.lock_poll)
    }

    /// Run `f` while holding the exclusive registry lock.
    ///
    /// The lock is released on every exit path, including errors and panics
    /// unwinding through `f`.
    pub fn with_lock<T, E>(&self, f: impl FnOnce() -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let _guard = self.lock()?;
        f()
    }

    fn read_bytes(&self) -> StoreResult<Option<Vec<u8>>> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(&self.path, e)),
        }
    }
}

/// Parse registry bytes, checking the format version.
pub fn parse_registry(path: &Path, bytes: &[u8]) -> StoreResult<RegistryFile> {
    let text = std::str::from_utf8(bytes).map_err(|e| StoreError::Parse {
        path: path.display().to_string(),
        message: format!("not valid UTF-8: {e}"),
    })?;
    let file: RegistryFile = toml::from_str(text).map_err(|e| StoreError::Parse {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    if file.format != REGISTRY_FORMAT {
        return Err(StoreError::UnsupportedFormat {
            path: path.display().to_string(),
            found: file.format,
        });
    }
    Ok(file)
}

pub fn render_registry(registry: &Registry) -> StoreResult<String> {
    toml::to_string(&registry.to_file()).map_err(|e| StoreError::Serialize {
        message: e.to_string(),
    })
}

/// SHA-256 hex digest of the registry bytes.
pub fn revision_of(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Write-fsync-rename, then fsync the parent directory.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> StoreResult<()> {
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
    if let Some(parent) = parent {
        std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    }
    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = PathBuf::from(temp_name);

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&temp_path)
        .map_err(|e| StoreError::io(&temp_path, e))?;
    file.write_all(bytes)
        .map_err(|e| StoreError::io(&temp_path, e))?;
    file.sync_all().map_err(|e| StoreError::io(&temp_path, e))?;
    drop(file);

    std::fs::rename(&temp_path, path).map_err(|e| StoreError::io(path, e))?;

    if let Some(parent) = parent {
        let dir = File::open(parent).map_err(|e| StoreError::io(parent, e))?;
        dir.sync_all().map_err(|e| StoreError::io(parent, e))?;
    }
    Ok(())
}
