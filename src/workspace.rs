//! Workspace: one registry root and every command that operates on it.
//!
//! Mutating commands (add, import edits, mint, release, deprecate, delete)
//! run under the exclusive registry lock and follow load → check → replace →
//! save. Read-only commands take no lock; validate and diff compare the
//! registry revision before and after, and recompute on drift.

use std::path::Path;

use chrono::Utc;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, RegistryConfig};
use crate::content::{ContentError, ContentParser, DeclaredEntity, TurtleParser};
use crate::error::{RegistryError, RegistryResult, StoreError, Violation, ViolationReport};
use crate::graph::{self, TierPolicy};
use crate::iri::{self, Iri, MintError};
use crate::lifecycle::{self, ReleasePlan, VersionDiff};
use crate::model::{EntityKind, Module, ModuleRecord, ModuleType, Registry, Status, VersionRecord};
use crate::paths::RegistryPaths;
use crate::publish::{self, PublishReport};
use crate::store::{ContentStore, RegistryStore};
use crate::validate::{self, ValidationScope};

/// How many times a read-only command recomputes when the registry changes
/// underneath it.
const FRESH_READ_ATTEMPTS: usize = 3;

/// Input for `add-module`.
#[derive(Debug, Clone)]
pub struct NewModule {
    pub id: String,
    pub module_type: ModuleType,
    pub path: String,
    pub prefix: String,
    pub owners: Vec<String>,
    pub imports: Vec<String>,
    pub aligns: Vec<String>,
    pub targets: Vec<String>,
    /// Label of the initial draft version. Defaults to today's date.
    pub version: Option<String>,
}

impl NewModule {
    pub fn new(id: &str, module_type: ModuleType, path: &str, prefix: &str) -> Self {
        Self {
            id: id.to_string(),
            module_type,
            path: path.to_string(),
            prefix: prefix.to_string(),
            owners: Vec::new(),
            imports: Vec::new(),
            aligns: Vec::new(),
            targets: Vec::new(),
            version: None,
        }
    }

    pub fn owners<S: Into<String>>(mut self, owners: impl IntoIterator<Item = S>) -> Self {
        self.owners = owners.into_iter().map(Into::into).collect();
        self
    }

    pub fn imports<S: Into<String>>(mut self, imports: impl IntoIterator<Item = S>) -> Self {
        self.imports = imports.into_iter().map(Into::into).collect();
        self
    }

    pub fn aligns<S: Into<String>>(mut self, ids: impl IntoIterator<Item = S>) -> Self {
        self.aligns = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn targets<S: Into<String>>(mut self, ids: impl IntoIterator<Item = S>) -> Self {
        self.targets = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn version(mut self, label: &str) -> Self {
        self.version = Some(label.to_string());
        self
    }
}

/// Whether a release changed anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseOutcome {
    Released,
    /// Already released with identical content; nothing written.
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseSummary {
    pub module: String,
    pub label: String,
    pub version_iri: String,
    pub content_hash: String,
    pub outcome: ReleaseOutcome,
}

/// One row of `list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleSummary {
    pub id: String,
    #[serde(rename = "type")]
    pub module_type: ModuleType,
    pub path: String,
    pub prefix: String,
    pub status: Status,
    pub imports: Vec<String>,
    pub versions: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_released: Option<String>,
}

impl From<&Module> for ModuleSummary {
    fn from(m: &Module) -> Self {
        Self {
            id: m.id.clone(),
            module_type: m.module_type(),
            path: m.path.clone(),
            prefix: m.prefix.clone(),
            status: m.status,
            imports: m.imports.clone(),
            versions: m.versions.len(),
            latest_released: m.latest_released().map(|v| v.label.clone()),
        }
    }
}

/// What `delete` removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "deleted", rename_all = "snake_case")]
pub enum Deleted {
    Version { module: String, label: String },
    Module { module: String },
}

/// An opened registry.
pub struct Workspace {
    paths: RegistryPaths,
    config: RegistryConfig,
    store: RegistryStore,
    content: ContentStore,
    parser: Box<dyn ContentParser>,
    policy: TierPolicy,
}

impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace")
            .field("root", &self.paths.root)
            .field("base_iri", &self.config.base_iri)
            .finish()
    }
}

impl Workspace {
    /// Create a new registry at `root`.
    pub fn init(root: &Path, base_iri: &str) -> RegistryResult<Self> {
        let base = iri::normalize_base(base_iri)?;
        let config_file = RegistryPaths::config_path(root);
        if config_file.exists() {
            return Err(ConfigError::AlreadyInitialized {
                path: root.display().to_string(),
            }
            .into());
        }
        let config = RegistryConfig::with_base(base);
        let paths = RegistryPaths::new(root, &config);
        if paths.registry_file.exists() {
            return Err(ConfigError::AlreadyInitialized {
                path: root.display().to_string(),
            }
            .into());
        }
        paths.ensure_dirs()?;
        config.save(&config_file)?;
        let workspace = Self::from_config(root, config)?;
        workspace.store.create()?;
        info!(root = %root.display(), base = %base, "registry initialized");
        Ok(workspace)
    }

    /// Open the registry at `root`.
    pub fn open(root: &Path) -> RegistryResult<Self> {
        let config = RegistryConfig::load(&RegistryPaths::config_path(root))?;
        iri::normalize_base(&config.base_iri)?;
        Self::from_config(root, config)
    }

    fn from_config(root: &Path, config: RegistryConfig) -> RegistryResult<Self> {
        let paths = RegistryPaths::new(root, &config);
        let policy = config.tier_policy()?;
        let parser = TurtleParser::new().require_labels(config.gate.require_labels);
        Ok(Self {
            store: RegistryStore::new(&paths, &config),
            content: ContentStore::new(paths.clone()),
            parser: Box::new(parser),
            policy,
            paths,
            config,
        })
    }

    /// Swap in a different content parser.
    pub fn with_parser(mut self, parser: Box<dyn ContentParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn paths(&self) -> &RegistryPaths {
        &self.paths
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn store(&self) -> &RegistryStore {
        &self.store
    }

    pub fn content(&self) -> &ContentStore {
        &self.content
    }

    pub fn policy(&self) -> &TierPolicy {
        &self.policy
    }

    fn base(&self) -> &str {
        self.config.base_iri.trim_end_matches('/')
    }

    pub fn registry(&self) -> RegistryResult<Registry> {
        Ok(self.store.load()?)
    }

    pub fn namespace(&self, module: &Module) -> RegistryResult<Iri> {
        Ok(iri::mint_namespace_uri(self.base(), &module.path)?)
    }

    fn module<'r>(registry: &'r Registry, id: &str) -> RegistryResult<&'r Module> {
        registry
            .get(id)
            .ok_or_else(|| RegistryError::ModuleNotFound { id: id.to_string() })
    }

    /// Load, apply `f`, save, all under the registry lock.
    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut Registry) -> RegistryResult<T>,
    ) -> RegistryResult<T> {
        self.store.with_lock(|| -> RegistryResult<T> {
            let mut registry = self.store.load()?;
            let out = f(&mut registry)?;
            self.store.save(&mut registry)?;
            Ok(out)
        })
    }

    /// Schema and graph violations involving `id`. Cycles are traced from `id`.
    fn structural_violations(&self, registry: &Registry, id: &str) -> ViolationReport {
        let records = registry.records();
        let mut violations = validate::validate_records(&records);
        violations.extend(validate::check_version_iris(&records, self.base()));
        let g = graph::build_graph(registry);
        violations.extend(graph::graph_violations_for(&g, &self.policy, id));
        ViolationReport::new(vec![id.to_string()], violations).restricted_to(id)
    }

    fn ensure_clean(&self, registry: &Registry, id: &str) -> RegistryResult<()> {
        let report = self.structural_violations(registry, id);
        if report.is_clean() {
            Ok(())
        } else {
            debug!(module = %id, violations = report.len(), "structural check failed");
            Err(report.into())
        }
    }

    // -----------------------------------------------------------------------
    // Module registration and import edits
    // -----------------------------------------------------------------------

    pub fn add_module(&self, new: NewModule) -> RegistryResult<Module> {
        let label = new
            .version
            .clone()
            .unwrap_or_else(|| Utc::now().format("%Y-%m-%d").to_string());
        let module_iri = iri::mint_module_iri(self.base(), &new.path)?;
        let version_iri = iri::mint_version_iri(self.base(), &new.path, &label)?;
        let owners = if new.owners.is_empty() {
            self.config.default_owners.clone()
        } else {
            new.owners.clone()
        };
        let now = Utc::now();

        let record = ModuleRecord {
            id: Some(new.id.clone()),
            module_type: Some(new.module_type.as_str().to_string()),
            path: Some(new.path.clone()),
            prefix: Some(new.prefix.clone()),
            owners: Some(owners),
            imports: new.imports.clone(),
            aligns: (new.module_type == ModuleType::Align).then(|| new.aligns.clone()),
            targets: (new.module_type == ModuleType::Shapes).then(|| new.targets.clone()),
            status: Some(Status::Draft.as_str().to_string()),
            versions: vec![VersionRecord {
                label: Some(label),
                version_iri: Some(version_iri.into_string()),
                status: Some(Status::Draft.as_str().to_string()),
                content_hash: None,
                created_at: Some(crate::model::format_timestamp(&now)),
                released_at: None,
            }],
        };

        let module = self.mutate(|registry| {
            let mut records = registry.records();
            records.push(record.clone());
            let position = records.len() - 1;
            let module = match validate::parse_record(&record, position) {
                Ok(module) => module,
                Err(violations) => {
                    // Report relational problems (duplicates, references) too.
                    let mut all = validate::validate_records(&records);
                    all.extend(violations);
                    return Err(ViolationReport::new(vec![new.id.clone()], all)
                        .restricted_to(&record.display_id(position))
                        .into());
                }
            };
            registry.insert(module.clone());
            self.ensure_clean(registry, &module.id)?;

            if !self.content.has_working(&module.path) {
                let header = self.parser.render_header(module_iri.as_str());
                self.content.write_working(&module.path, &header)?;
            }
            Ok(module)
        })?;
        info!(module = %module.id, module_type = %module.module_type(), "module registered");
        Ok(module)
    }

    pub fn add_import(&self, id: &str, import: &str) -> RegistryResult<Module> {
        self.mutate(|registry| {
            let mut module = Self::module(registry, id)?.clone();
            if module.imports.iter().any(|i| i == import) {
                return Ok(module);
            }
            module.imports.push(import.to_string());
            registry.replace(module.clone());
            self.ensure_clean(registry, id)?;
            info!(module = %id, import = %import, "import added");
            Ok(module)
        })
    }

    pub fn remove_import(&self, id: &str, import: &str) -> RegistryResult<Module> {
        self.mutate(|registry| {
            let mut module = Self::module(registry, id)?.clone();
            let before = module.imports.len();
            module.imports.retain(|i| i != import);
            if module.imports.len() == before {
                warn!(module = %id, import = %import, "import not present, nothing removed");
                return Ok(module);
            }
            registry.replace(module.clone());
            info!(module = %id, import = %import, "import removed");
            Ok(module)
        })
    }

    // -----------------------------------------------------------------------
    // Entities
    // -----------------------------------------------------------------------

    /// Mint an entity IRI and declare the entity in the working content.
    pub fn mint(&self, id: &str, kind: EntityKind, name: &str) -> RegistryResult<Iri> {
        if let Err(violation) = validate::validate_name(kind, name) {
            return Err(
                ViolationReport::new(vec![id.to_string()], vec![violation.in_module(id)]).into(),
            );
        }
        self.store.with_lock(|| -> RegistryResult<Iri> {
            let registry = self.store.load()?;
            let module = Self::module(&registry, id)?;
            if module.status == Status::Deprecated {
                return Err(lifecycle::LifecycleError::ModuleDeprecated {
                    module: id.to_string(),
                }
                .into());
            }
            let entity_iri = iri::mint_entity_iri(self.base(), &module.path, name)?;
            let namespace = self.namespace(module)?;

            let existing = match self.content.read_working(&module.path) {
                Ok(text) => text,
                Err(StoreError::MissingContent { .. }) => {
                    let module_iri = iri::mint_module_iri(self.base(), &module.path)?;
                    self.parser.render_header(module_iri.as_str())
                }
                Err(e) => return Err(e.into()),
            };
            let declared = self.parser.parse(namespace.as_str(), &existing)?;
            if declared.iter().any(|e| e.name == name) {
                return Err(MintError::AlreadyDeclared {
                    module: id.to_string(),
                    name: name.to_string(),
                }
                .into());
            }

            let mut updated = existing;
            if !updated.ends_with('\n') {
                updated.push('\n');
            }
            updated.push_str(&self.parser.render_declaration(entity_iri.as_str(), kind, name));
            self.content.write_working(&module.path, &updated)?;
            info!(module = %id, kind = %kind, name = %name, iri = %entity_iri, "entity minted");
            Ok(entity_iri)
        })
    }

    fn entities_of(&self, module: &Module, content: &str) -> RegistryResult<Vec<DeclaredEntity>> {
        let namespace = self.namespace(module)?;
        Ok(self.parser.parse(namespace.as_str(), content)?)
    }

    /// Naming findings for a module's working content. Missing content is
    /// not a finding; unparseable content is.
    fn naming_violations(&self, module: &Module) -> Vec<Violation> {
        let text = match self.content.read_working(&module.path) {
            Ok(text) => text,
            Err(StoreError::MissingContent { .. }) => return Vec::new(),
            Err(e) => {
                return vec![Violation::Content {
                    module: module.id.clone(),
                    message: e.to_string(),
                }];
            }
        };
        match self.entities_of(module, &text) {
            Ok(entities) => validate::check_entities(&module.id, &entities),
            Err(e) => vec![Violation::Content {
                module: module.id.clone(),
                message: e.to_string(),
            }],
        }
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    /// Aggregate every schema, graph, and naming violation in scope.
    pub fn validate(&self, scope: &ValidationScope) -> RegistryResult<ViolationReport> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let raw = self.store.load_records()?;
            let report = self.validate_records(&raw.records, scope)?;
            let current = self.store.current_revision()?;
            if current.as_deref() == Some(raw.revision.as_str()) {
                return Ok(report);
            }
            if attempt >= FRESH_READ_ATTEMPTS {
                warn!(attempts = attempt, "registry kept changing during validation");
                return Ok(report);
            }
            debug!(attempt, "registry changed during validation, re-checking");
        }
    }

    fn validate_records(
        &self,
        records: &[ModuleRecord],
        scope: &ValidationScope,
    ) -> RegistryResult<ViolationReport> {
        let (structural, partial) = validate::validate_structure(records, self.base(), &self.policy);
        match scope {
            ValidationScope::All => {
                let naming: Vec<Violation> = partial
                    .modules()
                    .par_iter()
                    .flat_map_iter(|module| self.naming_violations(module))
                    .collect();
                let mut violations = structural.violations;
                violations.extend(naming);
                Ok(ViolationReport::new(structural.checked, violations))
            }
            ValidationScope::Module(id) => {
                if !records.iter().any(|r| r.id.as_deref() == Some(id.as_str())) {
                    return Err(RegistryError::ModuleNotFound { id: id.clone() });
                }
                // Re-trace cycles from `id` so reported paths start there.
                let mut violations: Vec<Violation> = structural
                    .violations
                    .into_iter()
                    .filter(|v| !matches!(v, Violation::Cycle { .. }))
                    .collect();
                let g = graph::build_graph(&partial);
                violations.extend(
                    graph::graph_violations_for(&g, &self.policy, id)
                        .into_iter()
                        .filter(|v| matches!(v, Violation::Cycle { .. })),
                );
                if let Some(module) = partial.get(id) {
                    violations.extend(self.naming_violations(module));
                }
                Ok(ViolationReport::new(vec![id.clone()], violations).restricted_to(id))
            }
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    pub fn add_version(&self, id: &str, label: &str) -> RegistryResult<Module> {
        self.mutate(|registry| {
            let module = Self::module(registry, id)?;
            let version_iri = iri::mint_version_iri(self.base(), &module.path, label)?;
            let next = lifecycle::add_draft(module, label, version_iri, Utc::now())?;
            registry.replace(next.clone());
            self.ensure_clean(registry, id)?;
            info!(module = %id, label = %label, "draft version added");
            Ok(next)
        })
    }

    /// Release `label` of module `id` from its working content.
    ///
    /// Order: immutability check, structural re-validation, content gate,
    /// snapshot, then the single registry swap. Any failure before the save
    /// leaves the version in draft.
    pub fn release(&self, id: &str, label: &str) -> RegistryResult<ReleaseSummary> {
        let summary = self.store.with_lock(|| -> RegistryResult<ReleaseSummary> {
            let mut registry = self.store.load()?;
            let module = Self::module(&registry, id)?;
            let content = self.content.read_working(&module.path)?;
            let hash = lifecycle::content_hash(&content);
            let version_iri = iri::mint_version_iri(self.base(), &module.path, label)?;

            let next = match lifecycle::plan_release(module, label, &hash, version_iri.clone(), Utc::now())? {
                ReleasePlan::AlreadyReleased => {
                    info!(module = %id, label = %label, "version already released with identical content");
                    let recorded_iri = module
                        .version(label)
                        .map_or_else(|| version_iri.as_str().to_string(), |v| v.version_iri.as_str().to_string());
                    return Ok(ReleaseSummary {
                        module: id.to_string(),
                        label: label.to_string(),
                        version_iri: recorded_iri,
                        content_hash: hash,
                        outcome: ReleaseOutcome::Unchanged,
                    });
                }
                ReleasePlan::Release(next) => next,
            };

            // Structural state may have drifted since the draft was created.
            let mut candidate = registry.clone();
            candidate.replace(next.clone());
            let mut report = self.structural_violations(&candidate, id);
            if let Ok(entities) = self.entities_of(&next, &content) {
                report.violations.extend(validate::check_entities(id, &entities));
                report.normalize();
            }
            if !report.is_clean() {
                return Err(report.into());
            }

            let namespace = self.namespace(&next)?;
            let gate = publish::validate_content(self.parser.as_ref(), namespace.as_str(), &content);
            if !gate.passed() {
                warn!(module = %id, label = %label, findings = gate.findings.len(), "content gate rejected release");
                return Err(ContentError::Validation {
                    module: id.to_string(),
                    report: gate,
                }
                .into());
            }

            self.content.freeze(id, label, &content)?;
            registry.replace(next);
            self.store.save(&mut registry)?;
            Ok(ReleaseSummary {
                module: id.to_string(),
                label: label.to_string(),
                version_iri: version_iri.into_string(),
                content_hash: hash,
                outcome: ReleaseOutcome::Released,
            })
        })?;
        if summary.outcome == ReleaseOutcome::Released {
            info!(module = %id, label = %label, hash = %summary.content_hash, "version released");
        }
        Ok(summary)
    }

    /// Deprecate one released version, or the whole module when `label` is `None`.
    pub fn deprecate(&self, id: &str, label: Option<&str>) -> RegistryResult<Module> {
        self.mutate(|registry| {
            let module = Self::module(registry, id)?;
            let next = match label {
                Some(label) => lifecycle::deprecate_version(module, label)?,
                None => lifecycle::deprecate_module(module)?,
            };
            registry.replace(next.clone());
            info!(module = %id, label = label.unwrap_or("*"), "deprecated");
            Ok(next)
        })
    }

    /// Delete a draft version, or a module with no released history.
    ///
    /// A deleted module's working content is removed after the save, before
    /// the lock is released, so a writer reusing the path never loses its file.
    pub fn delete(&self, id: &str, label: Option<&str>) -> RegistryResult<Deleted> {
        let deleted = self.store.with_lock(|| -> RegistryResult<Deleted> {
            let mut registry = self.store.load()?;
            let module = Self::module(&registry, id)?;
            match label {
                Some(label) => {
                    let next = lifecycle::delete_version(module, label)?;
                    registry.replace(next);
                    self.store.save(&mut registry)?;
                    Ok(Deleted::Version {
                        module: id.to_string(),
                        label: label.to_string(),
                    })
                }
                None => {
                    lifecycle::check_deletable(module, &registry.dependents(id))?;
                    let removed = registry.remove(id);
                    self.store.save(&mut registry)?;
                    if let Some(removed) = removed {
                        self.content.remove_working(&removed.path)?;
                    }
                    Ok(Deleted::Module {
                        module: id.to_string(),
                    })
                }
            }
        })?;
        info!(module = %id, label = label.unwrap_or("*"), "deleted");
        Ok(deleted)
    }

    /// Content of a version: the frozen snapshot once released, else the
    /// working copy.
    fn version_content(&self, module: &Module, label: &str) -> RegistryResult<String> {
        let version = module
            .version(label)
            .ok_or_else(|| lifecycle::LifecycleError::VersionNotFound {
                module: module.id.clone(),
                label: label.to_string(),
            })?;
        if version.is_frozen() {
            Ok(self.content.read_frozen(&module.id, label)?)
        } else {
            Ok(self.content.read_working(&module.path)?)
        }
    }

    /// Structural diff of the entities declared in two versions.
    pub fn diff(&self, id: &str, from: &str, to: &str) -> RegistryResult<VersionDiff> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let registry = self.store.load()?;
            let module = Self::module(&registry, id)?;
            let old = self.entities_of(module, &self.version_content(module, from)?)?;
            let new = self.entities_of(module, &self.version_content(module, to)?)?;
            let diff = lifecycle::diff_entities(&old, &new);
            let current = self.store.current_revision()?;
            if current.as_deref() == registry.revision() || attempt >= FRESH_READ_ATTEMPTS {
                return Ok(diff);
            }
            debug!(attempt, "registry changed during diff, re-reading");
        }
    }

    // -----------------------------------------------------------------------
    // Publication and inspection
    // -----------------------------------------------------------------------

    /// Publish the latest release of `id`, or of every released module.
    pub fn publish(&self, target_name: &str, id: Option<&str>) -> RegistryResult<PublishReport> {
        let target_config = self.config.target(target_name)?;
        let registry = self.store.load()?;
        let ids: Vec<String> = match id {
            Some(id) => {
                Self::module(&registry, id)?;
                vec![id.to_string()]
            }
            None => {
                let mut ids: Vec<String> = registry
                    .modules()
                    .iter()
                    .filter(|m| m.latest_released().is_some())
                    .map(|m| m.id.clone())
                    .collect();
                ids.sort();
                ids
            }
        };
        let plans = ids
            .iter()
            .map(|id| publish::build_publish_plan(&registry, self.base(), id, &self.content))
            .collect::<Result<Vec<_>, _>>()?;

        let mut target = publish::open_target(target_name, target_config, &self.paths.root)?;
        let report = publish::publish(&plans, target.as_mut());
        info!(
            target_name = %target_name,
            modules = plans.len(),
            ok = report.succeeded(),
            "publish finished"
        );
        Ok(report)
    }

    pub fn list(&self) -> RegistryResult<Vec<ModuleSummary>> {
        let registry = self.store.load()?;
        let mut rows: Vec<ModuleSummary> = registry.modules().iter().map(ModuleSummary::from).collect();
        rows.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(rows)
    }

    pub fn show(&self, id: &str) -> RegistryResult<ModuleRecord> {
        let registry = self.store.load()?;
        Ok(Self::module(&registry, id)?.to_record())
    }
}
