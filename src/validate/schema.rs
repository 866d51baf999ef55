//! Per-record schema checks and record → module conversion.
//!
//! `validate_schema` never stops at the first problem: a record with a
//! missing path and an invalid type yields two violations.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use rayon::prelude::*;
use regex::Regex;

use crate::error::Violation;
use crate::iri::{self, Iri};
use crate::model::{
    Module, ModuleRecord, ModuleSpec, ModuleType, Status, Version, VersionRecord, parse_timestamp,
};

static MODULE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9_-]*$").unwrap());

static PREFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_-]*$").unwrap());

/// Cross-record lookup tables used for uniqueness and reference checks.
#[derive(Debug, Default)]
pub struct RecordIndex {
    ids: BTreeMap<String, usize>,
    paths: BTreeMap<String, Vec<String>>,
    prefixes: BTreeMap<String, Vec<String>>,
    /// `<path>/<label>` of every version, by the modules that declare it.
    version_names: BTreeMap<String, Vec<String>>,
}

impl RecordIndex {
    pub fn build(records: &[ModuleRecord]) -> Self {
        let mut index = Self::default();
        for (position, record) in records.iter().enumerate() {
            let display = record.display_id(position);
            if let Some(id) = record.id.as_deref().filter(|id| !id.is_empty()) {
                *index.ids.entry(id.to_string()).or_default() += 1;
            }
            if let Some(path) = record.path.as_deref().filter(|p| !p.is_empty()) {
                index
                    .paths
                    .entry(path.to_string())
                    .or_default()
                    .push(display.clone());
                for label in version_labels(record) {
                    index
                        .version_names
                        .entry(format!("{path}/{label}"))
                        .or_default()
                        .push(display.clone());
                }
            }
            if let Some(prefix) = record.prefix.as_deref().filter(|p| !p.is_empty()) {
                index
                    .prefixes
                    .entry(prefix.to_string())
                    .or_default()
                    .push(display);
            }
        }
        for holders in index.paths.values_mut().chain(index.prefixes.values_mut()) {
            holders.sort();
        }
        index
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains_key(id)
    }

    /// A module path that is also some version's `<path>/<label>` mints one
    /// IRI for two things.
    fn collision(&self, name: &str) -> Option<Violation> {
        let paths = self.paths.get(name)?;
        let versions = self.version_names.get(name)?;
        let modules: BTreeSet<String> = paths.iter().chain(versions).cloned().collect();
        Some(Violation::IriCollision {
            name: name.to_string(),
            modules: modules.into_iter().collect(),
        })
    }
}

fn version_labels(record: &ModuleRecord) -> impl Iterator<Item = &str> {
    record
        .versions
        .iter()
        .filter_map(|v| v.label.as_deref())
        .filter(|label| !label.is_empty())
}

fn schema(module: &str, field: &str, message: impl Into<String>) -> Violation {
    Violation::Schema {
        module: module.to_string(),
        field: field.to_string(),
        message: message.into(),
    }
}

/// All schema violations for one record: required fields, closed
/// enumerations, per-type fields, version records, uniqueness, references.
pub fn validate_schema(
    record: &ModuleRecord,
    position: usize,
    index: &RecordIndex,
) -> Vec<Violation> {
    let display = record.display_id(position);
    let mut found = match parse_record(record, position) {
        Ok(_) => Vec::new(),
        Err(violations) => violations,
    };

    if let Some(id) = record.id.as_deref() {
        let occurrences = index.ids.get(id).copied().unwrap_or(0);
        if occurrences > 1 {
            found.push(Violation::DuplicateId {
                id: id.to_string(),
                occurrences,
            });
        }
    }
    if let Some(path) = record.path.as_deref() {
        if let Some(holders) = index.paths.get(path).filter(|h| h.len() > 1) {
            found.push(Violation::DuplicatePath {
                path: path.to_string(),
                modules: holders.clone(),
            });
        }
    }
    if let Some(path) = record.path.as_deref().filter(|p| !p.is_empty()) {
        let minted = std::iter::once(path.to_string())
            .chain(version_labels(record).map(|label| format!("{path}/{label}")));
        found.extend(minted.filter_map(|name| index.collision(&name)));
    }
    if let Some(prefix) = record.prefix.as_deref() {
        if let Some(holders) = index.prefixes.get(prefix).filter(|h| h.len() > 1) {
            found.push(Violation::DuplicatePrefix {
                prefix: prefix.to_string(),
                modules: holders.clone(),
            });
        }
    }

    let references = record
        .imports
        .iter()
        .map(|r| ("imports", r))
        .chain(record.aligns.iter().flatten().map(|r| ("aligns", r)))
        .chain(record.targets.iter().flatten().map(|r| ("targets", r)));
    for (field, reference) in references {
        if !reference.is_empty() && !index.contains(reference) {
            found.push(Violation::UnknownReference {
                module: display.clone(),
                field: field.to_string(),
                reference: reference.clone(),
            });
        }
    }

    found
}

/// Schema-check every record. Independent records are checked in parallel;
/// the caller sorts the result.
pub fn validate_records(records: &[ModuleRecord]) -> Vec<Violation> {
    let index = RecordIndex::build(records);
    let mut found: Vec<Violation> = records
        .par_iter()
        .enumerate()
        .flat_map_iter(|(position, record)| validate_schema(record, position, &index))
        .collect();
    found.sort();
    found.dedup();
    found
}

/// Compare every persisted version IRI with the one `base` mints for it.
///
/// Records whose path or label is itself invalid are skipped; those problems
/// are reported by [`validate_schema`].
pub fn check_version_iris(records: &[ModuleRecord], base: &str) -> Vec<Violation> {
    let mut found = Vec::new();
    for (position, record) in records.iter().enumerate() {
        let Some(path) = record.path.as_deref() else {
            continue;
        };
        for (i, version) in record.versions.iter().enumerate() {
            let (Some(label), Some(stored)) =
                (version.label.as_deref(), version.version_iri.as_deref())
            else {
                continue;
            };
            let Ok(expected) = iri::mint_version_iri(base, path, label) else {
                continue;
            };
            if !stored.is_empty() && stored != expected.as_str() {
                found.push(schema(
                    &record.display_id(position),
                    &format!("versions[{i}].version_iri"),
                    format!("is \"{stored}\" but the module mints \"{expected}\""),
                ));
            }
        }
    }
    found
}

fn check_list(module: &str, field: &str, values: &[String], found: &mut Vec<Violation>) {
    let mut seen = BTreeSet::new();
    for value in values {
        if value.trim().is_empty() {
            found.push(schema(module, field, "contains an empty entry"));
        } else if !seen.insert(value.as_str()) {
            found.push(schema(module, field, format!("lists \"{value}\" more than once")));
        }
    }
}

/// Convert one record into a typed module, or report why it cannot be.
///
/// Only per-record rules are checked here; uniqueness and references need the
/// whole registry and live in [`validate_schema`].
pub fn parse_record(record: &ModuleRecord, position: usize) -> Result<Module, Vec<Violation>> {
    let display = record.display_id(position);
    let mut found = Vec::new();

    let id = match record.id.as_deref() {
        None | Some("") => {
            found.push(schema(&display, "id", "is required"));
            None
        }
        Some(id) if !MODULE_ID.is_match(id) => {
            found.push(schema(
                &display,
                "id",
                "must be a lowercase slug of letters, digits, `_` and `-`",
            ));
            None
        }
        Some(id) => Some(id.to_string()),
    };

    let module_type = match record.module_type.as_deref() {
        None | Some("") => {
            found.push(schema(&display, "type", "is required"));
            None
        }
        Some(raw) => match ModuleType::parse(raw) {
            Some(t) => Some(t),
            None => {
                let allowed: Vec<&str> = ModuleType::ALL.iter().map(|t| t.as_str()).collect();
                found.push(schema(
                    &display,
                    "type",
                    format!("\"{raw}\" is not one of {}", allowed.join(", ")),
                ));
                None
            }
        },
    };

    let path = match record.path.as_deref() {
        None | Some("") => {
            found.push(schema(&display, "path", "is required"));
            None
        }
        Some(path) => match iri::validate_path(path) {
            Ok(()) => Some(path.to_string()),
            Err(e) => {
                found.push(schema(&display, "path", format!("is invalid: {e}")));
                None
            }
        },
    };

    let prefix = match record.prefix.as_deref() {
        None | Some("") => {
            found.push(schema(&display, "prefix", "is required"));
            None
        }
        Some(prefix) if !PREFIX.is_match(prefix) => {
            found.push(schema(
                &display,
                "prefix",
                "must start with a lowercase letter and contain only letters, digits, `_` and `-`",
            ));
            None
        }
        Some(prefix) => Some(prefix.to_string()),
    };

    let owners = match record.owners.as_ref() {
        None => {
            found.push(schema(&display, "owners", "is required"));
            None
        }
        Some(owners) if owners.is_empty() => {
            found.push(schema(&display, "owners", "must not be empty"));
            None
        }
        Some(owners) => {
            check_list(&display, "owners", owners, &mut found);
            Some(owners.clone())
        }
    };

    check_list(&display, "imports", &record.imports, &mut found);

    let spec = module_type.and_then(|t| parse_spec(&display, t, record, &mut found));

    let status = match record.status.as_deref() {
        None => Some(Status::Draft),
        Some(raw) => match Status::parse(raw) {
            Some(s) => Some(s),
            None => {
                found.push(schema(
                    &display,
                    "status",
                    format!("\"{raw}\" is not one of draft, released, deprecated"),
                ));
                None
            }
        },
    };

    let mut versions = Vec::with_capacity(record.versions.len());
    let mut labels = BTreeSet::new();
    for (i, raw) in record.versions.iter().enumerate() {
        if let Some(label) = raw.label.as_deref() {
            if !labels.insert(label) {
                found.push(schema(
                    &display,
                    &format!("versions[{i}].label"),
                    format!("\"{label}\" is used by more than one version"),
                ));
            }
        }
        if let Some(version) = parse_version(&display, i, raw, &mut found) {
            versions.push(version);
        }
    }

    if status == Some(Status::Released) && !versions.iter().any(Version::is_frozen) {
        found.push(schema(
            &display,
            "status",
            "is \"released\" but no version has been released",
        ));
    }

    match (id, spec, path, prefix, owners, status) {
        (Some(id), Some(spec), Some(path), Some(prefix), Some(owners), Some(status))
            if found.is_empty() =>
        {
            Ok(Module {
                id,
                spec,
                path,
                prefix,
                owners,
                imports: record.imports.clone(),
                status,
                versions,
            })
        }
        _ => Err(found),
    }
}

fn parse_spec(
    display: &str,
    module_type: ModuleType,
    record: &ModuleRecord,
    found: &mut Vec<Violation>,
) -> Option<ModuleSpec> {
    let mut required_list = |field: &str, values: Option<&Vec<String>>| match values {
        None => {
            found.push(schema(
                display,
                field,
                format!("is required for {module_type} modules"),
            ));
            None
        }
        Some(v) if v.is_empty() => {
            found.push(schema(display, field, "must not be empty"));
            None
        }
        Some(v) => {
            check_list(display, field, v, found);
            Some(v.clone())
        }
    };

    let spec = match module_type {
        ModuleType::Align => ModuleSpec::Align {
            aligns: required_list("aligns", record.aligns.as_ref())?,
        },
        ModuleType::Shapes => ModuleSpec::Shapes {
            targets: required_list("targets", record.targets.as_ref())?,
        },
        ModuleType::Core => ModuleSpec::Core,
        ModuleType::Domain => ModuleSpec::Domain,
        ModuleType::Program => ModuleSpec::Program,
        ModuleType::Project => ModuleSpec::Project,
        ModuleType::Industry => ModuleSpec::Industry,
        ModuleType::Vocab => ModuleSpec::Vocab,
    };

    if module_type != ModuleType::Align && record.aligns.is_some() {
        found.push(schema(display, "aligns", "is only allowed on align modules"));
        return None;
    }
    if module_type != ModuleType::Shapes && record.targets.is_some() {
        found.push(schema(display, "targets", "is only allowed on shapes modules"));
        return None;
    }
    Some(spec)
}

fn parse_version(
    display: &str,
    i: usize,
    raw: &VersionRecord,
    found: &mut Vec<Violation>,
) -> Option<Version> {
    let field = |name: &str| format!("versions[{i}].{name}");
    let before = found.len();

    let label = match raw.label.as_deref() {
        None | Some("") => {
            found.push(schema(display, &field("label"), "is required"));
            None
        }
        Some(label) => match iri::validate_version_label(label) {
            Ok(()) => Some(label.to_string()),
            Err(e) => {
                found.push(schema(display, &field("label"), format!("is invalid: {e}")));
                None
            }
        },
    };

    let version_iri = match raw.version_iri.as_deref() {
        None | Some("") => {
            found.push(schema(display, &field("version_iri"), "is required"));
            None
        }
        Some(v) => Some(Iri::from_persisted(v.to_string())),
    };

    let status = match raw.status.as_deref() {
        None | Some("") => {
            found.push(schema(display, &field("status"), "is required"));
            None
        }
        Some(s) => {
            let parsed = Status::parse(s);
            if parsed.is_none() {
                found.push(schema(
                    display,
                    &field("status"),
                    format!("\"{s}\" is not one of draft, released, deprecated"),
                ));
            }
            parsed
        }
    };

    let created_at = match raw.created_at.as_deref() {
        None => {
            found.push(schema(display, &field("created_at"), "is required"));
            None
        }
        Some(s) => {
            let parsed = parse_timestamp(s);
            if parsed.is_none() {
                found.push(schema(
                    display,
                    &field("created_at"),
                    format!("\"{s}\" is not an RFC 3339 timestamp"),
                ));
            }
            parsed
        }
    };

    let released_at = match raw.released_at.as_deref() {
        None => None,
        Some(s) => {
            let parsed = parse_timestamp(s);
            if parsed.is_none() {
                found.push(schema(
                    display,
                    &field("released_at"),
                    format!("\"{s}\" is not an RFC 3339 timestamp"),
                ));
            }
            parsed
        }
    };

    match status {
        Some(s) if s.is_frozen() => {
            if raw.content_hash.as_deref().is_none_or(str::is_empty) {
                found.push(schema(
                    display,
                    &field("content_hash"),
                    format!("is required for {s} versions"),
                ));
            }
            if raw.released_at.is_none() {
                found.push(schema(
                    display,
                    &field("released_at"),
                    format!("is required for {s} versions"),
                ));
            }
        }
        Some(Status::Draft) if raw.released_at.is_some() => {
            found.push(schema(
                display,
                &field("released_at"),
                "must be absent on draft versions",
            ));
        }
        _ => {}
    }

    if found.len() != before {
        return None;
    }
    Some(Version {
        label: label?,
        version_iri: version_iri?,
        status: status?,
        content_hash: raw.content_hash.clone(),
        created_at: created_at?,
        released_at,
    })
}
