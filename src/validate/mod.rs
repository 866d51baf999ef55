//! Naming & schema validation, plus the registry-wide structural pass.
//!
//! Structural checks aggregate: every function here returns all violations it
//! can find rather than stopping at the first one.

pub mod naming;
pub mod schema;

use std::collections::BTreeSet;

pub use naming::validate_name;
pub use schema::{
    RecordIndex, check_version_iris, parse_record, validate_records, validate_schema,
};

use crate::content::DeclaredEntity;
use crate::error::{Violation, ViolationReport};
use crate::graph::{self, TierPolicy};
use crate::model::{ModuleRecord, Registry};

/// Which modules a validation run covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationScope {
    All,
    Module(String),
}

/// Schema + graph checks over raw records, with version IRIs re-minted
/// from `base`.
///
/// Graph checks run over the subset of records that parse on their own, so a
/// broken record in one module does not hide a cycle elsewhere. The returned
/// registry is that subset (first occurrence wins on duplicate ids).
pub fn validate_structure(
    records: &[ModuleRecord],
    base: &str,
    policy: &TierPolicy,
) -> (ViolationReport, Registry) {
    let mut violations = validate_records(records);
    violations.extend(check_version_iris(records, base));

    let mut seen = BTreeSet::new();
    let modules = records
        .iter()
        .enumerate()
        .filter_map(|(position, record)| parse_record(record, position).ok())
        .filter(|module| seen.insert(module.id.clone()))
        .collect();
    let partial = Registry::from_modules_unchecked(modules);

    let g = graph::build_graph(&partial);
    violations.extend(graph::graph_violations(&g, policy));

    let checked = records
        .iter()
        .enumerate()
        .map(|(position, record)| record.display_id(position))
        .collect();
    (ViolationReport::new(checked, violations), partial)
}

/// Schema + graph checks over a typed registry.
pub fn validate_registry(registry: &Registry, base: &str, policy: &TierPolicy) -> ViolationReport {
    validate_structure(&registry.records(), base, policy).0
}

/// Naming checks for the entities declared in one module's content.
pub fn check_entities(module_id: &str, entities: &[DeclaredEntity]) -> Vec<Violation> {
    entities
        .iter()
        .filter_map(|entity| validate_name(entity.kind, &entity.name).err())
        .map(|v| v.in_module(module_id))
        .collect()
}
