//! Registry data model: modules, versions, and the registry itself.
//!
//! Two representations exist for a module:
//!
//! - [`ModuleRecord`]: the loosely-typed shape stored in `registry.toml`.
//!   Every field is optional so that a hand-edited file can be checked and all
//!   problems reported at once.
//! - [`Module`]: the typed value the engine works with. The `type`-specific
//!   fields live in [`ModuleSpec`], so an `align` module cannot exist without
//!   its `aligns` list and a `core` module cannot carry one.
//!
//! Conversion from record to module goes through the schema validator
//! ([`crate::validate::schema`]); conversion back is lossless.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Violation;
use crate::iri::Iri;

/// Current on-disk format of `registry.toml`.
pub const REGISTRY_FORMAT: u32 = 1;

/// Closed enumeration of module types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleType {
    Core,
    Domain,
    Program,
    Project,
    Industry,
    Vocab,
    Align,
    Shapes,
}

impl ModuleType {
    pub const ALL: [ModuleType; 8] = [
        Self::Core,
        Self::Domain,
        Self::Program,
        Self::Project,
        Self::Industry,
        Self::Vocab,
        Self::Align,
        Self::Shapes,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Core => "core",
            Self::Domain => "domain",
            Self::Program => "program",
            Self::Project => "project",
            Self::Industry => "industry",
            Self::Vocab => "vocab",
            Self::Align => "align",
            Self::Shapes => "shapes",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }

    /// Shapes and alignment modules validate or map across tiers. They may
    /// import anything, and nothing may import them.
    pub fn is_cross_tier(self) -> bool {
        matches!(self, Self::Align | Self::Shapes)
    }
}

impl fmt::Display for ModuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state shared by modules and versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Draft,
    Released,
    Deprecated,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Released => "released",
            Self::Deprecated => "deprecated",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "released" => Some(Self::Released),
            "deprecated" => Some(Self::Deprecated),
            _ => None,
        }
    }

    /// Released and deprecated versions are frozen.
    pub fn is_frozen(self) -> bool {
        !matches!(self, Self::Draft)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of entity declared inside a module's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// Class-like: `UpperCamelCase`.
    Class,
    /// Relation/property-like: `lowerCamelCase`.
    Property,
    /// Instance-like: `UPPER_SNAKE_CASE` or an opaque suffixed id.
    Instance,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Class => "class",
            Self::Property => "property",
            Self::Instance => "instance",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "class" => Some(Self::Class),
            "property" | "relation" => Some(Self::Property),
            "instance" | "individual" => Some(Self::Instance),
            _ => None,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type-specific part of a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleSpec {
    Core,
    Domain,
    Program,
    Project,
    Industry,
    Vocab,
    /// Maps between the listed modules.
    Align { aligns: Vec<String> },
    /// Carries shape constraints for the listed modules.
    Shapes { targets: Vec<String> },
}

impl ModuleSpec {
    pub fn module_type(&self) -> ModuleType {
        match self {
            Self::Core => ModuleType::Core,
            Self::Domain => ModuleType::Domain,
            Self::Program => ModuleType::Program,
            Self::Project => ModuleType::Project,
            Self::Industry => ModuleType::Industry,
            Self::Vocab => ModuleType::Vocab,
            Self::Align { .. } => ModuleType::Align,
            Self::Shapes { .. } => ModuleType::Shapes,
        }
    }

    /// Module ids referenced by the type-specific fields.
    pub fn references(&self) -> &[String] {
        match self {
            Self::Align { aligns } => aligns,
            Self::Shapes { targets } => targets,
            _ => &[],
        }
    }
}

/// One version of a module. Frozen once released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub label: String,
    pub version_iri: Iri,
    pub status: Status,
    pub content_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub released_at: Option<DateTime<Utc>>,
}

impl Version {
    /// A fresh draft.
    pub fn draft(label: impl Into<String>, version_iri: Iri, created_at: DateTime<Utc>) -> Self {
        Self {
            label: label.into(),
            version_iri,
            status: Status::Draft,
            content_hash: None,
            created_at,
            released_at: None,
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.status.is_frozen()
    }

    fn to_record(&self) -> VersionRecord {
        VersionRecord {
            label: Some(self.label.clone()),
            version_iri: Some(self.version_iri.as_str().to_string()),
            status: Some(self.status.as_str().to_string()),
            content_hash: self.content_hash.clone(),
            created_at: Some(format_timestamp(&self.created_at)),
            released_at: self.released_at.as_ref().map(format_timestamp),
        }
    }
}

/// A named, typed namespace unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    pub id: String,
    pub spec: ModuleSpec,
    pub path: String,
    pub prefix: String,
    pub owners: Vec<String>,
    pub imports: Vec<String>,
    pub status: Status,
    pub versions: Vec<Version>,
}

impl Module {
    pub fn module_type(&self) -> ModuleType {
        self.spec.module_type()
    }

    pub fn version(&self, label: &str) -> Option<&Version> {
        self.versions.iter().find(|v| v.label == label)
    }

    /// Most recently appended released version.
    pub fn latest_released(&self) -> Option<&Version> {
        self.versions
            .iter()
            .rev()
            .find(|v| v.status == Status::Released)
    }

    /// Every module id this module points at: imports plus align/shapes references.
    pub fn referenced_ids(&self) -> impl Iterator<Item = &str> {
        self.imports
            .iter()
            .chain(self.spec.references())
            .map(String::as_str)
    }

    pub fn to_record(&self) -> ModuleRecord {
        let (aligns, targets) = match &self.spec {
            ModuleSpec::Align { aligns } => (Some(aligns.clone()), None),
            ModuleSpec::Shapes { targets } => (None, Some(targets.clone())),
            _ => (None, None),
        };
        ModuleRecord {
            id: Some(self.id.clone()),
            module_type: Some(self.module_type().as_str().to_string()),
            path: Some(self.path.clone()),
            prefix: Some(self.prefix.clone()),
            owners: Some(self.owners.clone()),
            imports: self.imports.clone(),
            aligns,
            targets,
            status: Some(self.status.as_str().to_string()),
            versions: self.versions.iter().map(Version::to_record).collect(),
        }
    }
}

/// Module as written in `registry.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub module_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owners: Option<Vec<String>>,
    #[serde(default)]
    pub imports: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aligns: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targets: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub versions: Vec<VersionRecord>,
}

impl ModuleRecord {
    /// Identifier used in diagnostics, even when `id` is missing.
    pub fn display_id(&self, position: usize) -> String {
        match self.id.as_deref() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => format!("<record #{}>", position + 1),
        }
    }
}

/// Version as written in `registry.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_iri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub released_at: Option<String>,
}

/// Top-level shape of `registry.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryFile {
    #[serde(default = "default_format")]
    pub format: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modules: Vec<ModuleRecord>,
}

fn default_format() -> u32 {
    REGISTRY_FORMAT
}

/// All modules and their version history.
///
/// A `Registry` is a plain owned value. It is loaded from and saved to disk
/// through [`crate::store::RegistryStore`]; the `revision` it carries is the
/// digest of the bytes it was loaded from and is used to detect concurrent
/// writers on save.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    modules: Vec<Module>,
    revision: Option<String>,
}

impl PartialEq for Registry {
    fn eq(&self, other: &Self) -> bool {
        self.modules == other.modules
    }
}

impl Eq for Registry {}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a typed registry from records, running the full schema check.
    ///
    /// Either every record is valid and a registry is returned, or every
    /// violation found is returned. Never a partially-valid registry.
    pub fn from_records(records: Vec<ModuleRecord>) -> Result<Self, Vec<Violation>> {
        let violations = crate::validate::schema::validate_records(&records);
        if !violations.is_empty() {
            return Err(violations);
        }
        let mut modules = Vec::with_capacity(records.len());
        let mut errors = Vec::new();
        for (position, record) in records.iter().enumerate() {
            match crate::validate::schema::parse_record(record, position) {
                Ok(module) => modules.push(module),
                Err(mut found) => errors.append(&mut found),
            }
        }
        if errors.is_empty() {
            Ok(Self {
                modules,
                revision: None,
            })
        } else {
            Err(errors)
        }
    }

    /// Build a registry from already-typed modules without relational checks.
    ///
    /// Used by validation to run graph and naming checks over whatever part of
    /// a broken registry still parses.
    pub(crate) fn from_modules_unchecked(modules: Vec<Module>) -> Self {
        Self {
            modules,
            revision: None,
        }
    }

    pub fn to_file(&self) -> RegistryFile {
        RegistryFile {
            format: REGISTRY_FORMAT,
            modules: self.records(),
        }
    }

    pub fn records(&self) -> Vec<ModuleRecord> {
        self.modules.iter().map(Module::to_record).collect()
    }

    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    pub fn get(&self, id: &str) -> Option<&Module> {
        self.modules.iter().find(|m| m.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Module ids in sorted order.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.modules.iter().map(|m| m.id.as_str()).collect();
        ids.sort_unstable();
        ids
    }

    /// Append a module. Uniqueness is the caller's responsibility.
    pub(crate) fn insert(&mut self, module: Module) {
        self.modules.push(module);
    }

    /// Swap in a fully-formed replacement for the module with the same id.
    ///
    /// Returns `false` if no such module exists.
    pub(crate) fn replace(&mut self, module: Module) -> bool {
        match self.modules.iter_mut().find(|m| m.id == module.id) {
            Some(slot) => {
                *slot = module;
                true
            }
            None => false,
        }
    }

    pub(crate) fn remove(&mut self, id: &str) -> Option<Module> {
        let position = self.modules.iter().position(|m| m.id == id)?;
        Some(self.modules.remove(position))
    }

    /// Ids of modules that reference `id` through imports, aligns, or targets.
    pub fn dependents(&self, id: &str) -> Vec<String> {
        let mut found: Vec<String> = self
            .modules
            .iter()
            .filter(|m| m.id != id && m.referenced_ids().any(|r| r == id))
            .map(|m| m.id.clone())
            .collect();
        found.sort();
        found
    }

    pub fn revision(&self) -> Option<&str> {
        self.revision.as_deref()
    }

    pub(crate) fn set_revision(&mut self, revision: Option<String>) {
        self.revision = revision;
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

/// RFC 3339 with a `Z` suffix; sub-second digits only when present.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(label: &str, status: Status) -> Version {
        let created = parse_timestamp("2025-09-01T00:00:00Z").unwrap();
        Version {
            label: label.into(),
            version_iri: Iri::from_persisted(format!("https://x.example/a/{label}")),
            status,
            content_hash: None,
            created_at: created,
            released_at: None,
        }
    }

    fn module(id: &str, imports: &[&str]) -> Module {
        Module {
            id: id.into(),
            spec: ModuleSpec::Core,
            path: format!("{id}/core"),
            prefix: id.into(),
            owners: vec!["owner@example.gov".into()],
            imports: imports.iter().map(|s| s.to_string()).collect(),
            status: Status::Draft,
            versions: vec![],
        }
    }

    #[test]
    fn module_type_parse_roundtrip() {
        for t in ModuleType::ALL {
            assert_eq!(ModuleType::parse(t.as_str()), Some(t));
        }
        assert_eq!(ModuleType::parse("widget"), None);
        assert!(ModuleType::Shapes.is_cross_tier());
        assert!(!ModuleType::Core.is_cross_tier());
    }

    #[test]
    fn latest_released_skips_drafts_and_deprecated() {
        let mut m = module("a", &[]);
        m.versions = vec![
            version("1", Status::Released),
            version("2", Status::Deprecated),
            version("3", Status::Released),
            version("4", Status::Draft),
        ];
        assert_eq!(m.latest_released().unwrap().label, "3");
    }

    #[test]
    fn record_preserves_spec_fields() {
        let mut m = module("map", &[]);
        m.spec = ModuleSpec::Align {
            aligns: vec!["a".into(), "b".into()],
        };
        let record = m.to_record();
        assert_eq!(record.module_type.as_deref(), Some("align"));
        assert_eq!(record.aligns, Some(vec!["a".to_string(), "b".to_string()]));
        assert!(record.targets.is_none());
    }

    #[test]
    fn dependents_are_sorted() {
        let registry = Registry::from_modules_unchecked(vec![
            module("base", &[]),
            module("zeta", &["base"]),
            module("alpha", &["base"]),
        ]);
        assert_eq!(registry.dependents("base"), vec!["alpha", "zeta"]);
        assert!(registry.dependents("alpha").is_empty());
    }

    #[test]
    fn equality_ignores_revision() {
        let mut a = Registry::from_modules_unchecked(vec![module("a", &[])]);
        let b = a.clone();
        a.set_revision(Some("abc".into()));
        assert_eq!(a, b);
    }

    #[test]
    fn timestamp_format_is_stable() {
        let ts = parse_timestamp("2025-09-01T12:30:00+00:00").unwrap();
        assert_eq!(format_timestamp(&ts), "2025-09-01T12:30:00Z");
        assert_eq!(parse_timestamp(&format_timestamp(&ts)), Some(ts));
    }
}
