//! Version Lifecycle Manager.
//!
//! Per version: `draft --release--> released --deprecate--> deprecated`, and
//! `draft --delete--> (removed)`. Nothing else.
//!
//! Every transition here is a pure function from the current [`Module`] to a
//! fully-formed replacement. Callers swap the replacement into the registry
//! and save; a module is never mutated in place, so a failure before the save
//! leaves the persisted state untouched.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::content::DeclaredEntity;
use crate::iri::Iri;
use crate::model::{EntityKind, Module, Status, Version};

/// Errors from lifecycle transitions. All of them are fail-fast.
#[derive(Debug, Error, Diagnostic)]
pub enum LifecycleError {
    #[error(
        "version {label} of {module} is already released with different content \
         (recorded {recorded}, current {actual})"
    )]
    #[diagnostic(
        code(ontoreg::lifecycle::immutability_violation),
        help("Released versions are immutable. Add a new version with `ontoreg add-version` and release that instead.")
    )]
    ImmutabilityViolation {
        module: String,
        label: String,
        recorded: String,
        actual: String,
    },

    #[error("module {module} has no version \"{label}\"")]
    #[diagnostic(
        code(ontoreg::lifecycle::version_not_found),
        help("Run `ontoreg show --id {module}` to list its versions.")
    )]
    VersionNotFound { module: String, label: String },

    #[error("module {module} already has a version \"{label}\"")]
    #[diagnostic(
        code(ontoreg::lifecycle::version_exists),
        help("Version labels are unique within a module. Pick another label.")
    )]
    VersionExists { module: String, label: String },

    #[error("version {label} of {module} is {status}; only drafts can be deleted")]
    #[diagnostic(
        code(ontoreg::lifecycle::not_draft),
        help("Released and deprecated versions are kept forever. Supersede them with a new version.")
    )]
    NotDraft {
        module: String,
        label: String,
        status: Status,
    },

    #[error("{target} cannot go from {from} to {to}")]
    #[diagnostic(
        code(ontoreg::lifecycle::invalid_transition),
        help("Allowed transitions: draft -> released -> deprecated.")
    )]
    InvalidTransition {
        target: String,
        from: Status,
        to: Status,
    },

    #[error("module {module} is deprecated")]
    #[diagnostic(
        code(ontoreg::lifecycle::module_deprecated),
        help("Deprecated modules accept no new versions, entities, or releases.")
    )]
    ModuleDeprecated { module: String },

    #[error("module {module} is referenced by {}", .dependents.join(", "))]
    #[diagnostic(
        code(ontoreg::lifecycle::module_in_use),
        help("Remove the imports (or aligns/targets references) pointing at it first.")
    )]
    ModuleInUse {
        module: String,
        dependents: Vec<String>,
    },

    #[error("module {module} has released history and cannot be deleted")]
    #[diagnostic(
        code(ontoreg::lifecycle::has_history),
        help("Deprecate the module instead: `ontoreg deprecate --id {module}`.")
    )]
    HasHistory { module: String },
}

pub type LifecycleResult<T> = std::result::Result<T, LifecycleError>;

/// `sha256:<hex>` digest of module content.
pub fn content_hash(content: &str) -> String {
    format!("sha256:{:x}", Sha256::digest(content.as_bytes()))
}

/// Result of planning a release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleasePlan {
    /// The version is already released with identical content.
    AlreadyReleased,
    /// Replacement module with the version flipped to released.
    Release(Module),
}

fn ensure_active(module: &Module) -> LifecycleResult<()> {
    if module.status == Status::Deprecated {
        return Err(LifecycleError::ModuleDeprecated {
            module: module.id.clone(),
        });
    }
    Ok(())
}

/// Plan the release of `label` with content digest `hash`.
///
/// A missing label is appended as a draft and released in the same step.
/// Re-releasing a released version succeeds only with identical content.
pub fn plan_release(
    module: &Module,
    label: &str,
    hash: &str,
    version_iri: Iri,
    now: DateTime<Utc>,
) -> LifecycleResult<ReleasePlan> {
    if let Some(existing) = module.version(label) {
        match existing.status {
            Status::Released | Status::Deprecated => {
                let recorded = existing.content_hash.as_deref().unwrap_or_default();
                if recorded != hash {
                    return Err(LifecycleError::ImmutabilityViolation {
                        module: module.id.clone(),
                        label: label.to_string(),
                        recorded: recorded.to_string(),
                        actual: hash.to_string(),
                    });
                }
                if existing.status == Status::Deprecated {
                    return Err(LifecycleError::InvalidTransition {
                        target: format!("version {label} of {}", module.id),
                        from: Status::Deprecated,
                        to: Status::Released,
                    });
                }
                return Ok(ReleasePlan::AlreadyReleased);
            }
            Status::Draft => {}
        }
    }
    ensure_active(module)?;

    let created_at = module.version(label).map_or(now, |v| v.created_at);
    let released = Version {
        label: label.to_string(),
        version_iri,
        status: Status::Released,
        content_hash: Some(hash.to_string()),
        created_at,
        released_at: Some(now),
    };

    let mut next = module.clone();
    match next.versions.iter_mut().find(|v| v.label == label) {
        Some(slot) => *slot = released,
        None => next.versions.push(released),
    }
    next.status = Status::Released;
    Ok(ReleasePlan::Release(next))
}

/// Append a new draft version.
pub fn add_draft(
    module: &Module,
    label: &str,
    version_iri: Iri,
    now: DateTime<Utc>,
) -> LifecycleResult<Module> {
    ensure_active(module)?;
    if module.version(label).is_some() {
        return Err(LifecycleError::VersionExists {
            module: module.id.clone(),
            label: label.to_string(),
        });
    }
    let mut next = module.clone();
    next.versions.push(Version::draft(label, version_iri, now));
    Ok(next)
}

/// `released -> deprecated` for one version.
pub fn deprecate_version(module: &Module, label: &str) -> LifecycleResult<Module> {
    let version = module
        .version(label)
        .ok_or_else(|| LifecycleError::VersionNotFound {
            module: module.id.clone(),
            label: label.to_string(),
        })?;
    if version.status != Status::Released {
        return Err(LifecycleError::InvalidTransition {
            target: format!("version {label} of {}", module.id),
            from: version.status,
            to: Status::Deprecated,
        });
    }
    let mut next = module.clone();
    for v in next.versions.iter_mut().filter(|v| v.label == label) {
        v.status = Status::Deprecated;
    }
    Ok(next)
}

/// Mark the whole module line deprecated. History is kept.
pub fn deprecate_module(module: &Module) -> LifecycleResult<Module> {
    if module.status == Status::Deprecated {
        return Err(LifecycleError::InvalidTransition {
            target: format!("module {}", module.id),
            from: Status::Deprecated,
            to: Status::Deprecated,
        });
    }
    let mut next = module.clone();
    next.status = Status::Deprecated;
    Ok(next)
}

/// Remove a draft version.
pub fn delete_version(module: &Module, label: &str) -> LifecycleResult<Module> {
    let version = module
        .version(label)
        .ok_or_else(|| LifecycleError::VersionNotFound {
            module: module.id.clone(),
            label: label.to_string(),
        })?;
    if version.status != Status::Draft {
        return Err(LifecycleError::NotDraft {
            module: module.id.clone(),
            label: label.to_string(),
            status: version.status,
        });
    }
    let mut next = module.clone();
    next.versions.retain(|v| v.label != label);
    Ok(next)
}

/// A module can be deleted only while it has no frozen history and nothing
/// references it.
pub fn check_deletable(module: &Module, dependents: &[String]) -> LifecycleResult<()> {
    if module.status != Status::Draft || module.versions.iter().any(Version::is_frozen) {
        return Err(LifecycleError::HasHistory {
            module: module.id.clone(),
        });
    }
    if !dependents.is_empty() {
        return Err(LifecycleError::ModuleInUse {
            module: module.id.clone(),
            dependents: dependents.to_vec(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Diff
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct EntityRef {
    pub name: String,
    pub kind: EntityKind,
}

/// An entity present on both sides under possibly different names whose
/// definition or name changed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct EntityChange {
    pub kind: EntityKind,
    pub from: String,
    pub to: String,
}

/// Structural difference between two versions' declared entities.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VersionDiff {
    pub added: Vec<EntityRef>,
    pub removed: Vec<EntityRef>,
    pub changed: Vec<EntityChange>,
}

impl VersionDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

/// Compare two entity lists.
///
/// Entities with the same name and kind whose fingerprint differs are
/// `changed`. A removed and an added entity of the same kind are paired as a
/// rename when their fingerprints match uniquely, or when they are the only
/// unpaired entities of that kind left on each side.
pub fn diff_entities(from: &[DeclaredEntity], to: &[DeclaredEntity]) -> VersionDiff {
    let old: BTreeMap<&str, &DeclaredEntity> = from.iter().map(|e| (e.name.as_str(), e)).collect();
    let new: BTreeMap<&str, &DeclaredEntity> = to.iter().map(|e| (e.name.as_str(), e)).collect();

    let mut diff = VersionDiff::default();
    let mut removed: Vec<&DeclaredEntity> = Vec::new();
    for (name, entity) in &old {
        match new.get(name) {
            Some(other) if other.kind == entity.kind => {
                if other.fingerprint != entity.fingerprint {
                    diff.changed.push(EntityChange {
                        kind: entity.kind,
                        from: name.to_string(),
                        to: name.to_string(),
                    });
                }
            }
            Some(other) => {
                // Same name, different kind: the old entity is gone, a new one appeared.
                removed.push(entity);
                diff.added.push(EntityRef {
                    name: other.name.clone(),
                    kind: other.kind,
                });
            }
            None => removed.push(entity),
        }
    }
    let mut added: Vec<&DeclaredEntity> = new
        .iter()
        .filter(|(name, _)| !old.contains_key(*name))
        .map(|(_, e)| *e)
        .collect();

    let mut renames = Vec::new();
    pair_by_fingerprint(&mut removed, &mut added, &mut renames);
    pair_leftovers(&mut removed, &mut added, &mut renames);

    diff.changed.extend(renames);
    diff.added
        .extend(added.into_iter().map(|e| EntityRef {
            name: e.name.clone(),
            kind: e.kind,
        }));
    diff.removed = removed
        .into_iter()
        .map(|e| EntityRef {
            name: e.name.clone(),
            kind: e.kind,
        })
        .collect();

    diff.added.sort();
    diff.removed.sort();
    diff.changed.sort();
    diff
}

fn fingerprint_counts<'a>(
    entities: &[&'a DeclaredEntity],
) -> BTreeMap<(EntityKind, &'a str), usize> {
    let mut counts = BTreeMap::new();
    for e in entities {
        if let Some(fp) = e.fingerprint.as_deref() {
            *counts.entry((e.kind, fp)).or_insert(0) += 1;
        }
    }
    counts
}

fn pair_by_fingerprint(
    removed: &mut Vec<&DeclaredEntity>,
    added: &mut Vec<&DeclaredEntity>,
    renames: &mut Vec<EntityChange>,
) {
    let removed_counts = fingerprint_counts(removed);
    let added_counts = fingerprint_counts(added);
    let mut paired_added = BTreeSet::new();
    removed.retain(|r| {
        let Some(fp) = r.fingerprint.as_deref() else {
            return true;
        };
        let key = (r.kind, fp);
        if removed_counts.get(&key) != Some(&1) || added_counts.get(&key) != Some(&1) {
            return true;
        }
        let Some(a) = added
            .iter()
            .find(|a| a.kind == r.kind && a.fingerprint.as_deref() == Some(fp))
        else {
            return true;
        };
        paired_added.insert(a.name.clone());
        renames.push(EntityChange {
            kind: r.kind,
            from: r.name.clone(),
            to: a.name.clone(),
        });
        false
    });
    added.retain(|a| !paired_added.contains(&a.name));
}

fn pair_leftovers(
    removed: &mut Vec<&DeclaredEntity>,
    added: &mut Vec<&DeclaredEntity>,
    renames: &mut Vec<EntityChange>,
) {
    for kind in [EntityKind::Class, EntityKind::Property, EntityKind::Instance] {
        let r: Vec<usize> = (0..removed.len()).filter(|&i| removed[i].kind == kind).collect();
        let a: Vec<usize> = (0..added.len()).filter(|&i| added[i].kind == kind).collect();
        if let ([ri], [ai]) = (r.as_slice(), a.as_slice()) {
            let (r, a) = (removed.remove(*ri), added.remove(*ai));
            renames.push(EntityChange {
                kind,
                from: r.name.clone(),
                to: a.name.clone(),
            });
        }
    }
}
