//! Registry root layout.
//!
//! A registry lives in a single directory:
//!
//! ```text
//! <root>/
//!   ontoreg.toml          configuration
//!   registry.toml         module records (the registry file)
//!   registry.toml.lock    advisory write lock
//!   content/<path>.ttl    working content, one file per module
//!   releases/<id>/<label>.ttl   frozen snapshots of released versions
//! ```

use std::path::{Path, PathBuf};

use miette::Diagnostic;
use thiserror::Error;

use crate::config::RegistryConfig;

/// Environment variable consulted when `--root` is not given.
pub const ROOT_ENV: &str = "ONTOREG_ROOT";

/// Name of the configuration file inside the root.
pub const CONFIG_FILE: &str = "ontoreg.toml";

/// Errors from path resolution.
#[derive(Debug, Error, Diagnostic)]
pub enum PathError {
    #[error("cannot determine the registry root")]
    #[diagnostic(
        code(ontoreg::paths::no_root),
        help("Pass --root, set ONTOREG_ROOT, or run from inside the registry directory.")
    )]
    NoRoot {
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create directory: {path}")]
    #[diagnostic(
        code(ontoreg::paths::create_dir),
        help("Check that the parent directory exists and you have write permissions.")
    )]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type PathResult<T> = std::result::Result<T, PathError>;

/// Resolved locations of every file the registry touches.
#[derive(Debug, Clone)]
pub struct RegistryPaths {
    pub root: PathBuf,
    pub config_file: PathBuf,
    pub registry_file: PathBuf,
    pub lock_file: PathBuf,
    pub content_dir: PathBuf,
    pub releases_dir: PathBuf,
    /// Content file extension, without the dot.
    pub extension: String,
}

impl RegistryPaths {
    /// `--root` if given, else `$ONTOREG_ROOT`, else the current directory.
    pub fn resolve_root(explicit: Option<PathBuf>) -> PathResult<PathBuf> {
        if let Some(root) = explicit {
            return Ok(root);
        }
        if let Some(root) = std::env::var_os(ROOT_ENV).filter(|v| !v.is_empty()) {
            return Ok(PathBuf::from(root));
        }
        std::env::current_dir().map_err(|source| PathError::NoRoot { source })
    }

    pub fn config_path(root: &Path) -> PathBuf {
        root.join(CONFIG_FILE)
    }

    pub fn new(root: impl Into<PathBuf>, config: &RegistryConfig) -> Self {
        let root = root.into();
        let registry_file = root.join(&config.registry_file);
        let mut lock_name = registry_file.as_os_str().to_owned();
        lock_name.push(".lock");
        Self {
            config_file: Self::config_path(&root),
            lock_file: PathBuf::from(lock_name),
            content_dir: root.join(&config.content_dir),
            releases_dir: root.join(&config.releases_dir),
            extension: config.content_extension.clone(),
            registry_file,
            root,
        }
    }

    /// Working content file for a module path like `usn/core`.
    pub fn working_content(&self, module_path: &str) -> PathBuf {
        let mut path = self.content_dir.clone();
        path.extend(module_path.split('/'));
        path.set_extension(&self.extension);
        path
    }

    /// Frozen snapshot for one released version.
    pub fn frozen_content(&self, module_id: &str, label: &str) -> PathBuf {
        self.releases_dir
            .join(module_id)
            .join(format!("{label}.{}", self.extension))
    }

    /// Create the content and release directories. Idempotent.
    pub fn ensure_dirs(&self) -> PathResult<()> {
        for dir in [&self.root, &self.content_dir, &self.releases_dir] {
            create_dir(dir)?;
        }
        Ok(())
    }
}

pub(crate) fn create_dir(dir: &Path) -> PathResult<()> {
    std::fs::create_dir_all(dir).map_err(|e| PathError::CreateDir {
        path: dir.display().to_string(),
        source: e,
    })
}
