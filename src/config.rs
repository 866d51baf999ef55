//! Registry configuration, persisted as `ontoreg.toml` in the registry root.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::graph::TierPolicy;
use crate::model::ModuleType;

/// Errors from configuration handling.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config: {path}")]
    #[diagnostic(
        code(ontoreg::config::read),
        help("Ensure the config file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {message}")]
    #[diagnostic(
        code(ontoreg::config::parse),
        help("Check the TOML syntax in ontoreg.toml.")
    )]
    Parse { path: String, message: String },

    #[error("failed to write config: {path}")]
    #[diagnostic(
        code(ontoreg::config::write),
        help("Ensure you have write permissions to the registry root.")
    )]
    Write {
        path: String,
        #[source]
        source: crate::error::StoreError,
    },

    #[error("a registry already exists at {path}")]
    #[diagnostic(
        code(ontoreg::config::already_initialized),
        help("Use the existing registry, or pick a different --root.")
    )]
    AlreadyInitialized { path: String },

    #[error("no registry found at {path}")]
    #[diagnostic(
        code(ontoreg::config::not_initialized),
        help("Create one with `ontoreg init --base-iri <IRI>`, or point --root / ONTOREG_ROOT at an existing registry.")
    )]
    NotInitialized { path: String },

    #[error("unknown publish target \"{name}\"")]
    #[diagnostic(
        code(ontoreg::config::unknown_target),
        help("Declare it in ontoreg.toml under [targets.{name}] with `kind` and `path`.")
    )]
    UnknownTarget { name: String },

    #[error("invalid tier policy override: {message}")]
    #[diagnostic(
        code(ontoreg::config::invalid_policy),
        help("Keys and values under [policy.allow] must be module types: core, domain, program, project, industry, vocab, align, shapes.")
    )]
    InvalidPolicy { message: String },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Content gate settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateConfig {
    /// Reject releases whose entities lack `rdfs:label`.
    #[serde(default)]
    pub require_labels: bool,
}

/// Overrides of the default tier table, keyed by importer type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub allow: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    /// A persistent oxigraph store.
    Oxigraph,
    /// A directory of Turtle files plus a JSON manifest.
    Directory,
}

/// A named publish target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    pub kind: TargetKind,
    /// Relative paths resolve against the registry root.
    pub path: PathBuf,
}

/// Per-registry configuration, persisted as TOML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Base IRI every module IRI is minted under.
    pub base_iri: String,
    #[serde(default = "default_registry_file")]
    pub registry_file: String,
    #[serde(default = "default_content_dir")]
    pub content_dir: String,
    #[serde(default = "default_releases_dir")]
    pub releases_dir: String,
    #[serde(default = "default_content_extension")]
    pub content_extension: String,
    /// How long a mutating command waits for the registry lock.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    #[serde(default = "default_lock_poll_ms")]
    pub lock_poll_ms: u64,
    /// Owners recorded on new modules when none are given.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub default_owners: Vec<String>,
    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub targets: BTreeMap<String, TargetConfig>,
}

fn default_registry_file() -> String {
    "registry.toml".into()
}
fn default_content_dir() -> String {
    "content".into()
}
fn default_releases_dir() -> String {
    "releases".into()
}
fn default_content_extension() -> String {
    "ttl".into()
}
fn default_lock_timeout_ms() -> u64 {
    10_000
}
fn default_lock_poll_ms() -> u64 {
    50
}

impl RegistryConfig {
    /// A config with the given base IRI, other fields default.
    pub fn with_base(base_iri: &str) -> Self {
        Self {
            base_iri: base_iri.to_string(),
            registry_file: default_registry_file(),
            content_dir: default_content_dir(),
            releases_dir: default_releases_dir(),
            content_extension: default_content_extension(),
            lock_timeout_ms: default_lock_timeout_ms(),
            lock_poll_ms: default_lock_poll_ms(),
            default_owners: Vec::new(),
            gate: GateConfig::default(),
            policy: PolicyConfig::default(),
            targets: BTreeMap::new(),
        }
    }

    /// Load from a TOML file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotInitialized {
                    path: path.display().to_string(),
                }
            } else {
                ConfigError::Read {
                    path: path.display().to_string(),
                    source: e,
                }
            }
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Save to a TOML file, atomically: readers see the old file or the new
    /// one, never a partial write.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        crate::store::write_atomic(path, content.as_bytes()).map_err(|e| ConfigError::Write {
            path: path.display().to_string(),
            source: e,
        })
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn lock_poll(&self) -> Duration {
        Duration::from_millis(self.lock_poll_ms.max(1))
    }

    /// Default tier table with `[policy.allow]` applied.
    pub fn tier_policy(&self) -> ConfigResult<TierPolicy> {
        let parse = |name: &str| {
            ModuleType::parse(name).ok_or_else(|| ConfigError::InvalidPolicy {
                message: format!("unknown module type \"{name}\""),
            })
        };
        let mut overrides = Vec::with_capacity(self.policy.allow.len());
        for (importer, allowed) in &self.policy.allow {
            let importer = parse(importer)?;
            let allowed = allowed
                .iter()
                .map(|name| parse(name))
                .collect::<ConfigResult<Vec<_>>>()?;
            overrides.push((importer, allowed));
        }
        Ok(TierPolicy::default().with_overrides(overrides))
    }

    pub fn target(&self, name: &str) -> ConfigResult<&TargetConfig> {
        self.targets
            .get(name)
            .ok_or_else(|| ConfigError::UnknownTarget {
                name: name.to_string(),
            })
    }
}
