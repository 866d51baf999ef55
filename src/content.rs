//! Module content: the parser/validator interface and a Turtle implementation.
//!
//! The registry treats module bodies as opaque text. All it needs from them is
//! the list of declared entities (for naming checks and diffs) and a
//! pass/fail-with-reasons verdict (for the release gate). Both come through
//! the [`ContentParser`] trait so another content language can be plugged in.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use miette::Diagnostic;
use oxigraph::io::{RdfFormat, RdfParser};
use oxigraph::model::Term;
use oxigraph::sparql::QueryResults;
use oxigraph::store::Store;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::iri;
use crate::model::EntityKind;

const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";
const RDF_PROPERTY: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#Property";
const RDFS_LABEL: &str = "http://www.w3.org/2000/01/rdf-schema#label";
const RDFS_CLASS: &str = "http://www.w3.org/2000/01/rdf-schema#Class";
const OWL_CLASS: &str = "http://www.w3.org/2002/07/owl#Class";
const OWL_ONTOLOGY: &str = "http://www.w3.org/2002/07/owl#Ontology";
const OWL_OBJECT_PROPERTY: &str = "http://www.w3.org/2002/07/owl#ObjectProperty";
const OWL_DATATYPE_PROPERTY: &str = "http://www.w3.org/2002/07/owl#DatatypeProperty";
const OWL_ANNOTATION_PROPERTY: &str = "http://www.w3.org/2002/07/owl#AnnotationProperty";
const OWL_NAMED_INDIVIDUAL: &str = "http://www.w3.org/2002/07/owl#NamedIndividual";
const SH_NODE_SHAPE: &str = "http://www.w3.org/ns/shacl#NodeShape";

/// Errors from parsing module content.
#[derive(Debug, Error, Diagnostic)]
pub enum ContentError {
    #[error("content syntax error: {message}")]
    #[diagnostic(
        code(ontoreg::content::syntax),
        help("The module content must be valid Turtle. Check the reported line and column.")
    )]
    Syntax { message: String },

    #[error("content backend error: {message}")]
    #[diagnostic(code(ontoreg::content::backend))]
    Backend { message: String },

    #[error("content of {module} failed validation: {}", .report.summary())]
    #[diagnostic(
        code(ontoreg::content::validation),
        help("The version stays in draft. Fix the listed findings and release again.")
    )]
    Validation {
        module: String,
        report: ValidationReport,
    },
}

pub type ContentResult<T> = std::result::Result<T, ContentError>;

/// An entity declared in a module's content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclaredEntity {
    /// Local name within the module namespace.
    pub name: String,
    pub iri: String,
    pub kind: EntityKind,
    /// Digest of the entity's defining statements, excluding its type and
    /// label. `None` when nothing beyond type/label is stated.
    pub fingerprint: Option<String>,
    pub labelled: bool,
}

impl DeclaredEntity {
    pub fn new(name: impl Into<String>, iri: impl Into<String>, kind: EntityKind) -> Self {
        Self {
            name: name.into(),
            iri: iri.into(),
            kind,
            fingerprint: None,
            labelled: false,
        }
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }
}

/// One reason content failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<String>,
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.entity {
            Some(entity) => write!(f, "[{}] {}: {}", self.code, entity, self.message),
            None => write!(f, "[{}] {}", self.code, self.message),
        }
    }
}

/// Verdict of the content validator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub findings: Vec<Finding>,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        self.findings.is_empty()
    }

    pub fn push(&mut self, code: &str, message: impl Into<String>, entity: Option<&str>) {
        self.findings.push(Finding {
            code: code.to_string(),
            message: message.into(),
            entity: entity.map(str::to_string),
        });
    }

    pub fn summary(&self) -> String {
        let shown: Vec<String> = self.findings.iter().take(3).map(Finding::to_string).collect();
        if self.findings.len() > shown.len() {
            format!(
                "{} (+{} more)",
                shown.join("; "),
                self.findings.len() - shown.len()
            )
        } else {
            shown.join("; ")
        }
    }
}

/// Parser and validator for module content.
///
/// Implementations must be thread-safe: `validate --all` parses modules in
/// parallel.
pub trait ContentParser: Send + Sync {
    /// Entities declared inside `namespace`, sorted by name.
    fn parse(&self, namespace: &str, content: &str) -> ContentResult<Vec<DeclaredEntity>>;

    /// Syntax and shape-constraint check.
    fn validate(&self, namespace: &str, content: &str) -> ValidationReport;

    /// Initial content for a freshly registered module.
    fn render_header(&self, module_iri: &str) -> String;

    /// A snippet declaring one entity, appended to the working content.
    fn render_declaration(&self, iri: &str, kind: EntityKind, local_name: &str) -> String;
}

/// Turtle content, parsed with oxigraph.
#[derive(Debug, Clone, Default)]
pub struct TurtleParser {
    require_labels: bool,
}

struct Analysis {
    entities: Vec<DeclaredEntity>,
    conflicts: Vec<String>,
}

impl TurtleParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also fail validation when a declared entity lacks `rdfs:label`.
    pub fn require_labels(mut self, yes: bool) -> Self {
        self.require_labels = yes;
        self
    }

    fn kind_of(type_iri: &str) -> Option<EntityKind> {
        match type_iri {
            OWL_CLASS | RDFS_CLASS | SH_NODE_SHAPE => Some(EntityKind::Class),
            OWL_OBJECT_PROPERTY | OWL_DATATYPE_PROPERTY | OWL_ANNOTATION_PROPERTY
            | RDF_PROPERTY => Some(EntityKind::Property),
            OWL_ONTOLOGY => None,
            OWL_NAMED_INDIVIDUAL => Some(EntityKind::Instance),
            _ => Some(EntityKind::Instance),
        }
    }

    fn term_key(term: &Term) -> String {
        match term {
            Term::NamedNode(n) => format!("<{}>", n.as_str()),
            // Blank node labels change between parses.
            Term::BlankNode(_) => "_:b".to_string(),
            other => other.to_string(),
        }
    }

    fn analyze(&self, namespace: &str, content: &str) -> ContentResult<Analysis> {
        let store = Store::new().map_err(|e| ContentError::Backend {
            message: format!("failed to create in-memory store: {e}"),
        })?;
        store
            .load_from_reader(RdfParser::from_format(RdfFormat::Turtle), content.as_bytes())
            .map_err(|e| ContentError::Syntax {
                message: e.to_string(),
            })?;

        #[allow(deprecated)]
        let results = store
            .query("SELECT ?s ?p ?o WHERE { ?s ?p ?o }")
            .map_err(|e| ContentError::Backend {
                message: format!("statement query failed: {e}"),
            })?;
        let QueryResults::Solutions(solutions) = results else {
            return Err(ContentError::Backend {
                message: "unexpected result type from statement query".into(),
            });
        };

        let mut types: BTreeMap<String, BTreeSet<EntityKind>> = BTreeMap::new();
        let mut labelled: BTreeSet<String> = BTreeSet::new();
        let mut statements: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for solution in solutions {
            let solution = solution.map_err(|e| ContentError::Backend {
                message: format!("solution error: {e}"),
            })?;
            let (Some(Term::NamedNode(s)), Some(Term::NamedNode(p)), Some(o)) =
                (solution.get("s"), solution.get("p"), solution.get("o"))
            else {
                continue;
            };
            let subject = s.as_str();
            if iri::local_name(namespace, subject).is_none() {
                continue;
            }
            match p.as_str() {
                RDF_TYPE => {
                    if let Term::NamedNode(t) = o {
                        if let Some(kind) = Self::kind_of(t.as_str()) {
                            types.entry(subject.to_string()).or_default().insert(kind);
                        }
                    }
                }
                RDFS_LABEL => {
                    labelled.insert(subject.to_string());
                }
                predicate => statements
                    .entry(subject.to_string())
                    .or_default()
                    .push(format!("<{predicate}> {}", Self::term_key(o))),
            }
        }

        let mut entities = Vec::with_capacity(types.len());
        let mut conflicts = Vec::new();
        for (subject, kinds) in types {
            let Some(name) = iri::local_name(namespace, &subject) else {
                continue;
            };
            if kinds.len() > 1 {
                conflicts.push(name.to_string());
            }
            // BTreeSet order: Class < Property < Instance.
            let Some(&kind) = kinds.iter().next() else {
                continue;
            };
            let fingerprint = statements.get_mut(&subject).map(|lines| {
                lines.sort();
                let mut hasher = Sha256::new();
                for line in lines.iter() {
                    hasher.update(line.as_bytes());
                    hasher.update(b"\n");
                }
                format!("{:x}", hasher.finalize())
            });
            entities.push(DeclaredEntity {
                name: name.to_string(),
                labelled: labelled.contains(&subject),
                iri: subject,
                kind,
                fingerprint,
            });
        }
        entities.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(Analysis {
            entities,
            conflicts,
        })
    }
}

impl ContentParser for TurtleParser {
    fn parse(&self, namespace: &str, content: &str) -> ContentResult<Vec<DeclaredEntity>> {
        Ok(self.analyze(namespace, content)?.entities)
    }

    fn validate(&self, namespace: &str, content: &str) -> ValidationReport {
        let mut report = ValidationReport::default();
        let analysis = match self.analyze(namespace, content) {
            Ok(a) => a,
            Err(ContentError::Syntax { message }) => {
                report.push("syntax", message, None);
                return report;
            }
            Err(e) => {
                report.push("backend", e.to_string(), None);
                return report;
            }
        };
        for name in &analysis.conflicts {
            report.push(
                "conflicting_kinds",
                "declared as more than one of class, property, instance",
                Some(name),
            );
        }
        if self.require_labels {
            for entity in analysis.entities.iter().filter(|e| !e.labelled) {
                report.push("missing_label", "has no rdfs:label", Some(&entity.name));
            }
        }
        report
    }

    fn render_header(&self, module_iri: &str) -> String {
        format!(
            "@prefix owl: <http://www.w3.org/2002/07/owl#> .\n\
             @prefix rdfs: <http://www.w3.org/2000/01/rdf-schema#> .\n\
             \n\
             <{module_iri}> a owl:Ontology .\n"
        )
    }

    fn render_declaration(&self, iri: &str, kind: EntityKind, local_name: &str) -> String {
        let type_iri = match kind {
            EntityKind::Class => OWL_CLASS,
            EntityKind::Property => OWL_OBJECT_PROPERTY,
            EntityKind::Instance => OWL_NAMED_INDIVIDUAL,
        };
        format!("\n<{iri}> <{RDF_TYPE}> <{type_iri}> ;\n    <{RDFS_LABEL}> \"{local_name}\" .\n")
    }
}
