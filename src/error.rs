//! Rich diagnostic error types for the ontoreg engine.
//!
//! Two families of error exist:
//!
//! - **Violations** ([`Violation`]) are structural findings (schema, naming,
//!   graph). They are aggregated into a [`ViolationReport`] so a single run
//!   surfaces every problem at once.
//! - **Failures** (the subsystem error enums wrapped by [`RegistryError`]) abort
//!   the current command immediately: immutability breaches, lock contention,
//!   I/O.
//!
//! Every type derives miette `Diagnostic` with a stable code, and violations
//! serialize to JSON for machine consumption.

use miette::Diagnostic;
use serde::Serialize;
use thiserror::Error;

use crate::config::ConfigError;
use crate::content::ContentError;
use crate::iri::MintError;
use crate::lifecycle::LifecycleError;
use crate::model::{EntityKind, ModuleType};
use crate::paths::PathError;
use crate::publish::PublishError;

/// Top-level error type for the ontoreg engine.
#[derive(Debug, Error, Diagnostic)]
pub enum RegistryError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Mint(#[from] MintError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Paths(#[from] PathError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Invalid(#[from] ViolationReport),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Content(#[from] ContentError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Publish(#[from] PublishError),

    #[error("module not found: {id}")]
    #[diagnostic(
        code(ontoreg::module_not_found),
        help("Run `ontoreg list` to see registered modules.")
    )]
    ModuleNotFound { id: String },
}

pub type RegistryResult<T> = std::result::Result<T, RegistryError>;

impl RegistryError {
    /// Whether retrying the same command later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_retryable())
    }

    /// Whether the error is a validation finding rather than an operational failure.
    pub fn is_validation_failure(&self) -> bool {
        matches!(
            self,
            Self::Invalid(_) | Self::Content(ContentError::Validation { .. })
        ) || matches!(self, Self::Store(StoreError::Schema { .. }))
    }

    /// Violations carried by this error, if any.
    pub fn violations(&self) -> &[Violation] {
        match self {
            Self::Invalid(report) => &report.violations,
            Self::Store(StoreError::Schema { violations, .. }) => violations,
            _ => &[],
        }
    }
}

// ---------------------------------------------------------------------------
// Violations
// ---------------------------------------------------------------------------

/// A single structural finding.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Error, Diagnostic)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum Violation {
    #[error("module {module}: field `{field}` {message}")]
    #[diagnostic(
        code(ontoreg::schema::invalid),
        help("Fix the record in registry.toml. Required fields: id, type, path, prefix, owners.")
    )]
    Schema {
        module: String,
        field: String,
        message: String,
    },

    #[error("duplicate module id \"{id}\" ({occurrences} records)")]
    #[diagnostic(
        code(ontoreg::schema::duplicate_id),
        help("Module ids are globally unique and immutable. Rename or remove the extra record.")
    )]
    DuplicateId { id: String, occurrences: usize },

    #[error("prefix \"{prefix}\" is used by several modules: {}", .modules.join(", "))]
    #[diagnostic(
        code(ontoreg::schema::duplicate_prefix),
        help("Prefixes are unique across the registry. Pick a distinct prefix for each module.")
    )]
    DuplicatePrefix { prefix: String, modules: Vec<String> },

    #[error("path \"{path}\" is used by several modules: {}", .modules.join(", "))]
    #[diagnostic(
        code(ontoreg::schema::duplicate_path),
        help("Each module mints IRIs from its path, so paths must be unique.")
    )]
    DuplicatePath { path: String, modules: Vec<String> },

    #[error("modules {} mint the same IRI `<base>/{name}`", .modules.join(", "))]
    #[diagnostic(
        code(ontoreg::schema::iri_collision),
        help(
            "A version IRI is `<module IRI>/<label>`, so a module path may not equal another \
             module's path plus one of its version labels. Rename the path or the label."
        )
    )]
    IriCollision { name: String, modules: Vec<String> },

    #[error("module {module}: `{field}` references unknown module \"{reference}\"")]
    #[diagnostic(
        code(ontoreg::schema::unknown_reference),
        help("Register the referenced module first, or remove the reference.")
    )]
    UnknownReference {
        module: String,
        field: String,
        reference: String,
    },

    #[error("import cycle: {}", .path.join(" -> "))]
    #[diagnostic(
        code(ontoreg::graph::cycle),
        help("The import graph must be acyclic. Remove one of the imports along the cycle.")
    )]
    Cycle { path: Vec<String> },

    #[error("{importer} ({importer_type}) may not import {imported} ({imported_type}): {rule}")]
    #[diagnostic(
        code(ontoreg::graph::hierarchy),
        help(
            "Modules may only import equal or more foundational tiers: \
             project -> program/domain/core, program -> domain/core, domain -> core, \
             core -> core. Nothing may import shapes or align modules."
        )
    )]
    HierarchyViolation {
        importer: String,
        importer_type: ModuleType,
        imported: String,
        imported_type: ModuleType,
        rule: String,
    },

    #[error("{kind} name \"{entity}\" breaks the naming convention: expected {expected}")]
    #[diagnostic(
        code(ontoreg::naming::convention),
        help(
            "Classes use UpperCamelCase, properties use lowerCamelCase, instances use \
             UPPER_SNAKE_CASE or an opaque id with a hex suffix. No whitespace or punctuation."
        )
    )]
    NamingConvention {
        #[serde(skip_serializing_if = "Option::is_none")]
        module: Option<String>,
        entity: String,
        kind: EntityKind,
        expected: String,
    },

    #[error("module {module}: content could not be parsed: {message}")]
    #[diagnostic(
        code(ontoreg::content::unparseable),
        help("Fix the syntax of the module's content file.")
    )]
    Content { module: String, message: String },
}

impl Violation {
    /// Short machine code, identical to the serialized `code` tag.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Schema { .. } => "schema",
            Self::DuplicateId { .. } => "duplicate_id",
            Self::DuplicatePrefix { .. } => "duplicate_prefix",
            Self::DuplicatePath { .. } => "duplicate_path",
            Self::IriCollision { .. } => "iri_collision",
            Self::UnknownReference { .. } => "unknown_reference",
            Self::Cycle { .. } => "cycle",
            Self::HierarchyViolation { .. } => "hierarchy_violation",
            Self::NamingConvention { .. } => "naming_convention",
            Self::Content { .. } => "content",
        }
    }

    /// The module the finding is primarily about, used for report ordering.
    pub fn primary_module(&self) -> &str {
        match self {
            Self::Schema { module, .. }
            | Self::UnknownReference { module, .. }
            | Self::Content { module, .. } => module,
            Self::DuplicateId { id, .. } => id,
            Self::DuplicatePrefix { modules, .. }
            | Self::DuplicatePath { modules, .. }
            | Self::IriCollision { modules, .. } => {
                modules.first().map(String::as_str).unwrap_or("")
            }
            Self::Cycle { path } => path.first().map(String::as_str).unwrap_or(""),
            Self::HierarchyViolation { importer, .. } => importer,
            Self::NamingConvention { module, .. } => module.as_deref().unwrap_or(""),
        }
    }

    /// Whether the finding concerns module `id` in any role.
    pub fn involves(&self, id: &str) -> bool {
        match self {
            Self::DuplicatePrefix { modules, .. }
            | Self::DuplicatePath { modules, .. }
            | Self::IriCollision { modules, .. } => modules.iter().any(|m| m == id),
            Self::Cycle { path } => path.iter().any(|m| m == id),
            Self::HierarchyViolation {
                importer, imported, ..
            } => importer == id || imported == id,
            Self::UnknownReference { module, .. } => module == id,
            _ => self.primary_module() == id,
        }
    }

    /// Attach a module id to a naming finding produced without one.
    pub fn in_module(self, id: &str) -> Self {
        match self {
            Self::NamingConvention {
                entity,
                kind,
                expected,
                ..
            } => Self::NamingConvention {
                module: Some(id.to_string()),
                entity,
                kind,
                expected,
            },
            other => other,
        }
    }

    /// Ordering rank within one module: record problems, then cycles, then
    /// hierarchy, then naming. Cycles outrank hierarchy on the same edge.
    fn rank(&self) -> u8 {
        match self {
            Self::Schema { .. }
            | Self::DuplicateId { .. }
            | Self::DuplicatePrefix { .. }
            | Self::DuplicatePath { .. }
            | Self::IriCollision { .. }
            | Self::UnknownReference { .. } => 0,
            Self::Cycle { .. } => 1,
            Self::HierarchyViolation { .. } => 2,
            Self::Content { .. } | Self::NamingConvention { .. } => 3,
        }
    }
}

/// Aggregated result of a validation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Error, Diagnostic)]
#[error("{} violation(s) found", .violations.len())]
#[diagnostic(
    code(ontoreg::validate::failed),
    help("Every violation is listed below. Fix them and re-run `ontoreg validate`.")
)]
pub struct ViolationReport {
    /// Module ids that were checked, sorted.
    pub checked: Vec<String>,
    #[related]
    pub violations: Vec<Violation>,
}

impl ViolationReport {
    pub fn new(checked: Vec<String>, violations: Vec<Violation>) -> Self {
        let mut report = Self {
            checked,
            violations,
        };
        report.normalize();
        report
    }

    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.violations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    /// Turn a dirty report into an error.
    pub fn into_result(self) -> Result<Self, Self> {
        if self.is_clean() { Ok(self) } else { Err(self) }
    }

    /// Sort by module id, then rank, then content; drop exact duplicates.
    ///
    /// Keeps output stable regardless of the order checks completed in.
    pub fn normalize(&mut self) {
        self.checked.sort();
        self.checked.dedup();
        self.violations.sort_by(|a, b| {
            a.primary_module()
                .cmp(b.primary_module())
                .then(a.rank().cmp(&b.rank()))
                .then(a.cmp(b))
        });
        self.violations.dedup();
    }

    /// Only the violations involving module `id`.
    pub fn restricted_to(&self, id: &str) -> Self {
        Self {
            checked: vec![id.to_string()],
            violations: self
                .violations
                .iter()
                .filter(|v| v.involves(id))
                .cloned()
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    #[diagnostic(
        code(ontoreg::store::io),
        help(
            "A filesystem operation failed. Check that the registry directory exists, \
             has correct permissions, and that the disk is not full."
        )
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse registry file {path}: {message}")]
    #[diagnostic(
        code(ontoreg::store::parse),
        help("The registry file is not valid TOML. Fix the syntax and re-run.")
    )]
    Parse { path: String, message: String },

    #[error("failed to serialize registry: {message}")]
    #[diagnostic(code(ontoreg::store::serialize))]
    Serialize { message: String },

    #[error("unsupported registry format {found} in {path}")]
    #[diagnostic(
        code(ontoreg::store::format),
        help("This build understands registry format 1.")
    )]
    UnsupportedFormat { path: String, found: u32 },

    #[error("registry file {path} failed schema validation ({} violation(s))", .violations.len())]
    #[diagnostic(
        code(ontoreg::store::schema),
        help("The registry was not loaded. Every violation is listed below.")
    )]
    Schema {
        path: String,
        #[related]
        violations: Vec<Violation>,
    },

    #[error("timed out after {waited_ms} ms waiting for registry lock {path}")]
    #[diagnostic(
        code(ontoreg::store::lock_timeout),
        help(
            "Another process holds the registry lock. Retry later, ideally with \
             exponential backoff, or raise `lock_timeout_ms` in ontoreg.toml."
        )
    )]
    LockTimeout { path: String, waited_ms: u64 },

    #[error("registry file {path} changed since it was loaded")]
    #[diagnostic(
        code(ontoreg::store::conflict),
        help("Another writer saved the registry first. Reload and retry the command.")
    )]
    Conflict { path: String },

    #[error("content file not found: {path}")]
    #[diagnostic(
        code(ontoreg::store::missing_content),
        help("Create the module's content file, or re-run `ontoreg add-module` to seed it.")
    )]
    MissingContent { path: String },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl StoreError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }

    /// Lock contention and optimistic-concurrency conflicts are transient.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockTimeout { .. } | Self::Conflict { .. })
    }
}
