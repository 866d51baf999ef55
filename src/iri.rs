//! Identifier minting: module IRIs, namespace URIs, version IRIs.
//!
//! Every function here is pure and deterministic. The same `(base, path,
//! label)` always yields byte-identical output, which is what makes released
//! version IRIs stable across machines and re-runs.
//!
//! Layout:
//!
//! - module IRI: `<base>/<path>`
//! - namespace URI: `<base>/<path>#`
//! - version IRI: `<base>/<path>/<label>`
//! - entity IRI: `<base>/<path>#<LocalName>`

use std::fmt;

use miette::Diagnostic;
use oxigraph::model::NamedNode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Delimiter appended to a module IRI to form its namespace.
pub const NAMESPACE_DELIMITER: char = '#';

/// Errors from identifier minting.
#[derive(Debug, Error, Diagnostic)]
pub enum MintError {
    #[error("base IRI is empty")]
    #[diagnostic(
        code(ontoreg::mint::empty_base),
        help("Set `base_iri` in ontoreg.toml, e.g. `https://ontology.example.gov`.")
    )]
    EmptyBase,

    #[error("invalid base IRI \"{base}\": {reason}")]
    #[diagnostic(
        code(ontoreg::mint::invalid_base),
        help("The base must be an absolute IRI with a scheme and no whitespace, e.g. `https://ontology.example.gov`.")
    )]
    InvalidBase { base: String, reason: String },

    #[error("module path is empty")]
    #[diagnostic(
        code(ontoreg::mint::empty_path),
        help("Provide a hierarchical path such as `usn/core`.")
    )]
    EmptyPath,

    #[error("module path \"{path}\" contains an empty segment")]
    #[diagnostic(
        code(ontoreg::mint::empty_segment),
        help("Remove leading, trailing, or doubled `/` characters from the path.")
    )]
    EmptySegment { path: String },

    #[error("module path \"{path}\" has invalid segment \"{segment}\"")]
    #[diagnostic(
        code(ontoreg::mint::invalid_segment),
        help("Path segments may only contain lowercase ASCII letters, digits, `_` and `-`.")
    )]
    InvalidSegment { path: String, segment: String },

    #[error("version label is empty")]
    #[diagnostic(
        code(ontoreg::mint::empty_version),
        help("Use a date label such as `2025-09-01` or a semantic version such as `1.2.0`.")
    )]
    EmptyVersionLabel,

    #[error("invalid version label \"{label}\"")]
    #[diagnostic(
        code(ontoreg::mint::invalid_version),
        help("Version labels may only contain ASCII letters, digits, `.`, `_`, `+` and `-`, and may not consist of dots alone.")
    )]
    InvalidVersionLabel { label: String },

    #[error("minted identifier is not a valid IRI: {iri}")]
    #[diagnostic(code(ontoreg::mint::invalid_iri))]
    InvalidIri { iri: String, message: String },

    #[error("entity \"{name}\" is already declared in module {module}")]
    #[diagnostic(
        code(ontoreg::mint::already_declared),
        help("Entity names are unique within a module. Pick a different local name.")
    )]
    AlreadyDeclared { module: String, name: String },
}

pub type MintResult<T> = std::result::Result<T, MintError>;

/// An absolute IRI produced by the minting functions.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Iri(String);

impl Iri {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Wrap a string that was previously minted and persisted.
    ///
    /// No validation is performed here. Version IRIs are compared with a
    /// freshly minted one by `validate::check_version_iris` when the registry
    /// is loaded with a known base.
    pub(crate) fn from_persisted(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for Iri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Iri {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Validate a base IRI and return it without trailing slashes.
pub fn normalize_base(base: &str) -> MintResult<&str> {
    let trimmed = base.trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(MintError::EmptyBase);
    }
    if trimmed.chars().any(char::is_whitespace) {
        return Err(MintError::InvalidBase {
            base: base.to_string(),
            reason: "contains whitespace".into(),
        });
    }
    let Some((scheme, rest)) = trimmed.split_once("://") else {
        return Err(MintError::InvalidBase {
            base: base.to_string(),
            reason: "missing `scheme://`".into(),
        });
    };
    if scheme.is_empty() || rest.is_empty() {
        return Err(MintError::InvalidBase {
            base: base.to_string(),
            reason: "missing scheme or authority".into(),
        });
    }
    if trimmed.contains(NAMESPACE_DELIMITER) || trimmed.contains('?') {
        return Err(MintError::InvalidBase {
            base: base.to_string(),
            reason: "must not carry a fragment or query".into(),
        });
    }
    Ok(trimmed)
}

/// Check a hierarchical module path such as `usn/core`.
pub fn validate_path(path: &str) -> MintResult<()> {
    if path.is_empty() {
        return Err(MintError::EmptyPath);
    }
    for segment in path.split('/') {
        if segment.is_empty() {
            return Err(MintError::EmptySegment {
                path: path.to_string(),
            });
        }
        let valid = segment
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-');
        if !valid {
            return Err(MintError::InvalidSegment {
                path: path.to_string(),
                segment: segment.to_string(),
            });
        }
    }
    Ok(())
}

/// Check a version label such as `2025-09-01` or `1.4.0-rc.1`.
pub fn validate_version_label(label: &str) -> MintResult<()> {
    if label.is_empty() {
        return Err(MintError::EmptyVersionLabel);
    }
    let valid = label
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'+' | b'-'));
    // `.` and `..` would mint dot-segment IRIs that resolve elsewhere.
    if !valid || label.bytes().all(|b| b == b'.') {
        return Err(MintError::InvalidVersionLabel {
            label: label.to_string(),
        });
    }
    Ok(())
}

fn checked(iri: String) -> MintResult<Iri> {
    match NamedNode::new(iri.as_str()) {
        Ok(_) => Ok(Iri(iri)),
        Err(e) => Err(MintError::InvalidIri {
            iri,
            message: e.to_string(),
        }),
    }
}

/// `<base>/<path>`
pub fn mint_module_iri(base: &str, path: &str) -> MintResult<Iri> {
    let base = normalize_base(base)?;
    validate_path(path)?;
    checked(format!("{base}/{path}"))
}

/// `<base>/<path>#`
pub fn mint_namespace_uri(base: &str, path: &str) -> MintResult<Iri> {
    let module = mint_module_iri(base, path)?;
    checked(format!("{module}{NAMESPACE_DELIMITER}"))
}

/// `<base>/<path>/<label>`
pub fn mint_version_iri(base: &str, path: &str, version_label: &str) -> MintResult<Iri> {
    let module = mint_module_iri(base, path)?;
    validate_version_label(version_label)?;
    checked(format!("{module}/{version_label}"))
}

/// `<base>/<path>#<local_name>`
///
/// The local name is not checked against naming conventions here; callers run
/// [`crate::validate::validate_name`] first.
pub fn mint_entity_iri(base: &str, path: &str, local_name: &str) -> MintResult<Iri> {
    let namespace = mint_namespace_uri(base, path)?;
    checked(format!("{namespace}{local_name}"))
}

/// Strip a namespace prefix from an entity IRI, returning the local name.
pub fn local_name<'a>(namespace: &str, iri: &'a str) -> Option<&'a str> {
    iri.strip_prefix(namespace).filter(|name| !name.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://ontology.example.gov";

    #[test]
    fn module_and_namespace_layout() {
        let module = mint_module_iri(BASE, "usn/core").unwrap();
        assert_eq!(module.as_str(), "https://ontology.example.gov/usn/core");

        let ns = mint_namespace_uri(BASE, "usn/core").unwrap();
        assert_eq!(ns.as_str(), "https://ontology.example.gov/usn/core#");
    }

    #[test]
    fn trailing_slash_on_base_is_ignored() {
        let a = mint_module_iri("https://ontology.example.gov/", "gov/core").unwrap();
        let b = mint_module_iri(BASE, "gov/core").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn version_iri_is_deterministic() {
        let first = mint_version_iri(BASE, "pg/avp", "2025-09-01").unwrap();
        let second = mint_version_iri(BASE, "pg/avp", "2025-09-01").unwrap();
        assert_eq!(first, second);
        assert_eq!(
            first.as_str(),
            "https://ontology.example.gov/pg/avp/2025-09-01"
        );
    }

    #[test]
    fn rejects_bad_paths() {
        assert!(matches!(mint_module_iri(BASE, ""), Err(MintError::EmptyPath)));
        assert!(matches!(
            mint_module_iri(BASE, "usn//core"),
            Err(MintError::EmptySegment { .. })
        ));
        assert!(matches!(
            mint_module_iri(BASE, "/usn"),
            Err(MintError::EmptySegment { .. })
        ));
        assert!(matches!(
            mint_module_iri(BASE, "usn/Core"),
            Err(MintError::InvalidSegment { .. })
        ));
        assert!(matches!(
            mint_module_iri(BASE, "usn/co re"),
            Err(MintError::InvalidSegment { .. })
        ));
        assert!(matches!(
            mint_module_iri(BASE, "usn/core.v2"),
            Err(MintError::InvalidSegment { .. })
        ));
    }

    #[test]
    fn accepts_underscores_and_dashes() {
        assert!(mint_module_iri(BASE, "dod/mission_area/air-ops").is_ok());
    }

    #[test]
    fn rejects_bad_version_labels() {
        assert!(matches!(
            mint_version_iri(BASE, "usn/core", ""),
            Err(MintError::EmptyVersionLabel)
        ));
        assert!(matches!(
            mint_version_iri(BASE, "usn/core", "v 1"),
            Err(MintError::InvalidVersionLabel { .. })
        ));
        assert!(mint_version_iri(BASE, "usn/core", "1.2.0-rc.1").is_ok());
    }

    #[test]
    fn rejects_dot_only_version_labels() {
        for label in [".", "..", "..."] {
            assert!(
                matches!(
                    mint_version_iri(BASE, "usn/core", label),
                    Err(MintError::InvalidVersionLabel { .. })
                ),
                "{label} should be rejected"
            );
        }
        assert!(validate_version_label("1..2").is_ok());
    }

    #[test]
    fn rejects_bad_bases() {
        assert!(matches!(normalize_base(""), Err(MintError::EmptyBase)));
        assert!(matches!(normalize_base("/"), Err(MintError::EmptyBase)));
        assert!(matches!(
            normalize_base("ontology.example.gov"),
            Err(MintError::InvalidBase { .. })
        ));
        assert!(matches!(
            normalize_base("https://example.gov/x#"),
            Err(MintError::InvalidBase { .. })
        ));
    }

    #[test]
    fn entity_iri_and_local_name() {
        let iri = mint_entity_iri(BASE, "usn/core", "CarrierLaunch").unwrap();
        assert_eq!(
            iri.as_str(),
            "https://ontology.example.gov/usn/core#CarrierLaunch"
        );
        let ns = mint_namespace_uri(BASE, "usn/core").unwrap();
        assert_eq!(local_name(ns.as_str(), iri.as_str()), Some("CarrierLaunch"));
        assert_eq!(local_name(ns.as_str(), "https://other.example/x#Y"), None);
        assert_eq!(local_name(ns.as_str(), ns.as_str()), None);
    }
}
