//! Validation Gate and Publisher Adapter.
//!
//! The gate wraps the content parser's verdict with the naming rules. The
//! publisher side computes, for a released version, which graphs receive
//! which content ([`PublishPlan`]) and hands those pairs to a
//! [`PublishTarget`]. Targets decide how to persist; the core does not retry.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use miette::Diagnostic;
use oxigraph::io::{RdfFormat, RdfParser};
use oxigraph::model::NamedNode;
use oxigraph::store::Store;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{TargetConfig, TargetKind};
use crate::content::{ContentParser, ValidationReport};
use crate::error::StoreError;
use crate::iri::{self, MintError};
use crate::lifecycle::content_hash;
use crate::model::Registry;
use crate::store::ContentStore;
use crate::validate::validate_name;

/// Errors from building or executing a publish.
#[derive(Debug, Error, Diagnostic)]
pub enum PublishError {
    #[error("module {module} is not registered")]
    #[diagnostic(
        code(ontoreg::publish::unknown_module),
        help("Run `ontoreg list` to see registered modules.")
    )]
    UnknownModule { module: String },

    #[error("module {module} has no released version")]
    #[diagnostic(
        code(ontoreg::publish::nothing_released),
        help("Release a version first with `ontoreg release --id {module} --version <label>`.")
    )]
    NothingReleased { module: String },

    #[error("frozen content of {module} {label} does not match its recorded hash")]
    #[diagnostic(
        code(ontoreg::publish::integrity_mismatch),
        help("The snapshot under releases/ was modified after release. Restore it from version control.")
    )]
    IntegrityMismatch {
        module: String,
        label: String,
        recorded: String,
        actual: String,
    },

    #[error("publish target {target} failed: {message}")]
    #[diagnostic(code(ontoreg::publish::target))]
    Target { target: String, message: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Mint(#[from] MintError),
}

pub type PublishResult<T> = std::result::Result<T, PublishError>;

/// Run the content gate: parser verdict plus naming conventions.
pub fn validate_content(
    parser: &dyn ContentParser,
    namespace: &str,
    content: &str,
) -> ValidationReport {
    let mut report = parser.validate(namespace, content);
    if let Ok(entities) = parser.parse(namespace, content) {
        for entity in &entities {
            if let Err(violation) = validate_name(entity.kind, &entity.name) {
                report.push("naming_convention", violation.to_string(), Some(&entity.name));
            }
        }
    }
    report
}

/// What to publish for one module's latest released version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishPlan {
    pub module_id: String,
    pub label: String,
    /// Module IRI: always holds the latest release.
    pub stable_graph_id: String,
    /// Version IRI: holds exactly this release.
    pub version_graph_id: String,
    pub content_hash: String,
    #[serde(skip)]
    pub content: String,
}

impl PublishPlan {
    /// `(graph_id, content)` pairs handed to a target.
    pub fn graphs(&self) -> [(&str, &str); 2] {
        [
            (self.stable_graph_id.as_str(), self.content.as_str()),
            (self.version_graph_id.as_str(), self.content.as_str()),
        ]
    }
}

/// Plan the publication of `module_id`'s latest released version.
///
/// The frozen snapshot is re-hashed and must match the recorded hash.
pub fn build_publish_plan(
    registry: &Registry,
    base_iri: &str,
    module_id: &str,
    content: &ContentStore,
) -> PublishResult<PublishPlan> {
    let module = registry
        .get(module_id)
        .ok_or_else(|| PublishError::UnknownModule {
            module: module_id.to_string(),
        })?;
    let version = module
        .latest_released()
        .ok_or_else(|| PublishError::NothingReleased {
            module: module_id.to_string(),
        })?;
    let frozen = content.read_frozen(&module.id, &version.label)?;
    let actual = content_hash(&frozen);
    let recorded = version.content_hash.clone().unwrap_or_default();
    if actual != recorded {
        return Err(PublishError::IntegrityMismatch {
            module: module.id.clone(),
            label: version.label.clone(),
            recorded,
            actual,
        });
    }
    Ok(PublishPlan {
        module_id: module.id.clone(),
        label: version.label.clone(),
        stable_graph_id: iri::mint_module_iri(base_iri, &module.path)?.into_string(),
        version_graph_id: version.version_iri.as_str().to_string(),
        content_hash: recorded,
        content: frozen,
    })
}

/// Receiver of published graphs.
pub trait PublishTarget {
    fn name(&self) -> &str;

    /// Replace the content of graph `graph_id`.
    fn put_graph(&mut self, graph_id: &str, content: &str) -> PublishResult<()>;

    /// Called once after every graph was offered.
    fn finish(&mut self) -> PublishResult<()> {
        Ok(())
    }
}

/// Per-graph result of a publish run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishOutcome {
    pub module: String,
    pub label: String,
    pub graph_id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishReport {
    pub target: String,
    pub outcomes: Vec<PublishOutcome>,
}

impl PublishReport {
    pub fn succeeded(&self) -> bool {
        self.outcomes.iter().all(|o| o.ok)
    }
}

/// Offer every graph of every plan to `target`, recording each result.
pub fn publish(plans: &[PublishPlan], target: &mut dyn PublishTarget) -> PublishReport {
    let mut outcomes = Vec::with_capacity(plans.len() * 2);
    for plan in plans {
        for (graph_id, content) in plan.graphs() {
            let result = target.put_graph(graph_id, content);
            match &result {
                Ok(()) => info!(target_name = target.name(), module = %plan.module_id, graph = graph_id, "graph published"),
                Err(e) => warn!(target_name = target.name(), module = %plan.module_id, graph = graph_id, error = %e, "graph publish failed"),
            }
            outcomes.push(PublishOutcome {
                module: plan.module_id.clone(),
                label: plan.label.clone(),
                graph_id: graph_id.to_string(),
                ok: result.is_ok(),
                error: result.err().map(|e| e.to_string()),
            });
        }
    }
    if let Err(e) = target.finish() {
        warn!(target_name = target.name(), error = %e, "publish target finish failed");
        outcomes.push(PublishOutcome {
            module: String::new(),
            label: String::new(),
            graph_id: String::new(),
            ok: false,
            error: Some(e.to_string()),
        });
    }
    PublishReport {
        target: target.name().to_string(),
        outcomes,
    }
}

/// Instantiate a configured target. Relative paths resolve against `root`.
pub fn open_target(
    name: &str,
    config: &TargetConfig,
    root: &Path,
) -> PublishResult<Box<dyn PublishTarget>> {
    let path = if config.path.is_absolute() {
        config.path.clone()
    } else {
        root.join(&config.path)
    };
    Ok(match config.kind {
        TargetKind::Oxigraph => Box::new(OxigraphTarget::open(name, &path)?),
        TargetKind::Directory => Box::new(DirectoryTarget::new(name, path)),
    })
}

/// A persistent oxigraph store; each graph id becomes a named graph.
pub struct OxigraphTarget {
    name: String,
    store: Store,
}

impl OxigraphTarget {
    pub fn open(name: &str, path: &Path) -> PublishResult<Self> {
        std::fs::create_dir_all(path).map_err(|e| PublishError::Target {
            target: name.to_string(),
            message: format!("failed to create oxigraph directory: {e}"),
        })?;
        let store = Store::open(path).map_err(|e| PublishError::Target {
            target: name.to_string(),
            message: format!("failed to open oxigraph store at {}: {e}", path.display()),
        })?;
        Ok(Self {
            name: name.to_string(),
            store,
        })
    }

    /// An in-memory store, for tests and dry runs.
    pub fn in_memory(name: &str) -> PublishResult<Self> {
        let store = Store::new().map_err(|e| PublishError::Target {
            target: name.to_string(),
            message: format!("failed to create oxigraph store: {e}"),
        })?;
        Ok(Self {
            name: name.to_string(),
            store,
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    fn fail(&self, message: String) -> PublishError {
        PublishError::Target {
            target: self.name.clone(),
            message,
        }
    }
}

impl PublishTarget for OxigraphTarget {
    fn name(&self) -> &str {
        &self.name
    }

    fn put_graph(&mut self, graph_id: &str, content: &str) -> PublishResult<()> {
        let graph = NamedNode::new(graph_id)
            .map_err(|e| self.fail(format!("invalid graph id {graph_id}: {e}")))?;
        self.store
            .clear_graph(graph.as_ref())
            .map_err(|e| self.fail(format!("clear of {graph_id} failed: {e}")))?;
        let parser = RdfParser::from_format(RdfFormat::Turtle).with_default_graph(graph);
        self.store
            .load_from_reader(parser, content.as_bytes())
            .map_err(|e| self.fail(format!("load into {graph_id} failed: {e}")))
    }
}

#[derive(Debug, Serialize)]
struct ManifestEntry {
    file: String,
    sha256: String,
}

/// Writes `<dir>/<percent-encoded graph id>.ttl` per graph and a `manifest.json`.
#[derive(Debug)]
pub struct DirectoryTarget {
    name: String,
    dir: PathBuf,
    manifest: BTreeMap<String, ManifestEntry>,
}

impl DirectoryTarget {
    pub fn new(name: &str, dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.to_string(),
            dir: dir.into(),
            manifest: BTreeMap::new(),
        }
    }

    /// File name for `graph_id`. Every byte outside `[A-Za-z0-9.-]` is
    /// percent-encoded, so distinct graph ids never share a file.
    pub fn file_name(graph_id: &str) -> String {
        let mut name = String::with_capacity(graph_id.len() + 4);
        for b in graph_id.bytes() {
            if b.is_ascii_alphanumeric() || b == b'-' || b == b'.' {
                name.push(char::from(b));
            } else {
                name.push_str(&format!("%{b:02X}"));
            }
        }
        name.push_str(".ttl");
        name
    }

    fn fail(&self, message: String) -> PublishError {
        PublishError::Target {
            target: self.name.clone(),
            message,
        }
    }
}

impl PublishTarget for DirectoryTarget {
    fn name(&self) -> &str {
        &self.name
    }

    fn put_graph(&mut self, graph_id: &str, content: &str) -> PublishResult<()> {
        let file = Self::file_name(graph_id);
        crate::store::write_atomic(&self.dir.join(&file), content.as_bytes())
            .map_err(|e| self.fail(e.to_string()))?;
        let sha256 = content_hash(content)
            .trim_start_matches("sha256:")
            .to_string();
        self.manifest
            .insert(graph_id.to_string(), ManifestEntry { file, sha256 });
        Ok(())
    }

    /// Merge this run's entries into `manifest.json`. An existing manifest
    /// that cannot be read or parsed is left alone and the publish fails.
    fn finish(&mut self) -> PublishResult<()> {
        let path = self.dir.join("manifest.json");
        let mut merged: BTreeMap<String, serde_json::Value> = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                self.fail(format!("manifest {} is not valid JSON: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(self.fail(format!("failed to read manifest {}: {e}", path.display())));
            }
        };
        for (graph_id, entry) in &self.manifest {
            let value = serde_json::to_value(entry).map_err(|e| self.fail(e.to_string()))?;
            merged.insert(graph_id.clone(), value);
        }
        let json = serde_json::to_string_pretty(&merged).map_err(|e| self.fail(e.to_string()))?;
        crate::store::write_atomic(&path, json.as_bytes()).map_err(|e| self.fail(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::TurtleParser;
    use oxigraph::sparql::QueryResults;

    const NS: &str = "https://ontology.example.gov/usn/core#";

    #[test]
    fn gate_adds_naming_findings() {
        let content = r#"
@prefix : <https://ontology.example.gov/usn/core#> .
@prefix owl: <http://www.w3.org/2002/07/owl#> .
:carrier_launch a owl:Class .
:Carrier a owl:Class .
"#;
        let report = validate_content(&TurtleParser::new(), NS, content);
        assert!(!report.passed());
        assert_eq!(report.findings.len(), 1);
        assert_eq!(report.findings[0].code, "naming_convention");
        assert_eq!(report.findings[0].entity.as_deref(), Some("carrier_launch"));
    }

    #[test]
    fn directory_target_writes_files_and_manifest() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut target = DirectoryTarget::new("export", dir.path());
        let plan = PublishPlan {
            module_id: "usn-core".into(),
            label: "2025-09-01".into(),
            stable_graph_id: "https://ontology.example.gov/usn/core".into(),
            version_graph_id: "https://ontology.example.gov/usn/core/2025-09-01".into(),
            content_hash: content_hash("<a> <b> <c> ."),
            content: "<a> <b> <c> .".into(),
        };
        let report = publish(&[plan], &mut target);
        assert!(report.succeeded());
        assert_eq!(report.outcomes.len(), 2);

        let stable = dir
            .path()
            .join(DirectoryTarget::file_name("https://ontology.example.gov/usn/core"));
        assert_eq!(std::fs::read_to_string(stable).unwrap(), "<a> <b> <c> .");
        let manifest: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.path().join("manifest.json")).unwrap())
                .unwrap();
        assert!(manifest["https://ontology.example.gov/usn/core/2025-09-01"]["file"].is_string());
    }

    #[test]
    fn file_names_do_not_collide() {
        let a = DirectoryTarget::file_name("https://ontology.example.gov/gov/core_x");
        let b = DirectoryTarget::file_name("https://ontology.example.gov/gov/core/x");
        assert_ne!(a, b);
        assert_eq!(
            DirectoryTarget::file_name("https://x.gov/a-b.c"),
            "https%3A%2F%2Fx.gov%2Fa-b.c.ttl"
        );
    }

    #[test]
    fn corrupt_manifest_fails_and_is_kept() {
        let dir = tempfile::TempDir::new().unwrap();
        let manifest = dir.path().join("manifest.json");
        std::fs::write(&manifest, "{ not json").unwrap();

        let mut target = DirectoryTarget::new("export", dir.path());
        let plan = PublishPlan {
            module_id: "usn-core".into(),
            label: "2025-09-01".into(),
            stable_graph_id: "https://ontology.example.gov/usn/core".into(),
            version_graph_id: "https://ontology.example.gov/usn/core/2025-09-01".into(),
            content_hash: content_hash("<a> <b> <c> ."),
            content: "<a> <b> <c> .".into(),
        };
        let report = publish(&[plan], &mut target);
        assert!(!report.succeeded());
        let failure = report.outcomes.iter().find(|o| !o.ok).unwrap();
        assert!(failure.error.as_deref().unwrap().contains("not valid JSON"));
        assert_eq!(std::fs::read_to_string(&manifest).unwrap(), "{ not json");
    }

    #[test]
    fn oxigraph_target_replaces_stable_graph() {
        let mut target = OxigraphTarget::in_memory("mem").unwrap();
        let graph = "https://ontology.example.gov/usn/core";
        target
            .put_graph(graph, "<https://x/a> <https://x/p> <https://x/b> .")
            .unwrap();
        target
            .put_graph(graph, "<https://x/c> <https://x/p> <https://x/d> .")
            .unwrap();

        #[allow(deprecated)]
        let results = target
            .store()
            .query("SELECT ?s WHERE { GRAPH <https://ontology.example.gov/usn/core> { ?s ?p ?o } }")
            .unwrap();
        let QueryResults::Solutions(solutions) = results else {
            panic!("expected solutions");
        };
        let subjects: Vec<String> = solutions
            .map(|s| s.unwrap().get("s").unwrap().to_string())
            .collect();
        assert_eq!(subjects, vec!["<https://x/c>"]);
    }

    #[test]
    fn invalid_content_is_reported_per_graph() {
        let mut target = OxigraphTarget::in_memory("mem").unwrap();
        let plan = PublishPlan {
            module_id: "m".into(),
            label: "1".into(),
            stable_graph_id: "https://x/m".into(),
            version_graph_id: "https://x/m/1".into(),
            content_hash: String::new(),
            content: "this is not turtle".into(),
        };
        let report = publish(&[plan], &mut target);
        assert!(!report.succeeded());
        assert!(report.outcomes.iter().all(|o| o.error.is_some()));
    }
}
