//! Naming conventions for entity local names.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::Violation;
use crate::model::EntityKind;

static CLASS_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z][A-Za-z0-9]*$").unwrap());

static PROPERTY_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][A-Za-z0-9]*$").unwrap());

static INSTANCE_SNAKE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z][A-Z0-9]*(_[A-Z0-9]+)*$").unwrap());

// Opaque instance ids: an alphanumeric stem plus a hex suffix of 8+ digits.
static INSTANCE_OPAQUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9]*_[0-9a-fA-F]{8,}$").unwrap());

/// Human-readable form of the rule for `kind`.
pub fn convention(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Class => "UpperCamelCase (e.g. CarrierLaunch)",
        EntityKind::Property => "lowerCamelCase (e.g. launchedFrom)",
        EntityKind::Instance => "UPPER_SNAKE_CASE (e.g. USS_NIMITZ) or an opaque id (e.g. asset_9f8e7d6c)",
    }
}

/// Check `local_name` against the convention for `kind`.
///
/// The returned violation carries no module id; callers attach one with
/// [`Violation::in_module`].
pub fn validate_name(kind: EntityKind, local_name: &str) -> Result<(), Violation> {
    let ok = match kind {
        EntityKind::Class => CLASS_NAME.is_match(local_name),
        EntityKind::Property => PROPERTY_NAME.is_match(local_name),
        EntityKind::Instance => {
            INSTANCE_SNAKE.is_match(local_name) || INSTANCE_OPAQUE.is_match(local_name)
        }
    };
    if ok {
        Ok(())
    } else {
        Err(Violation::NamingConvention {
            module: None,
            entity: local_name.to_string(),
            kind,
            expected: convention(kind).to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_names() {
        assert!(validate_name(EntityKind::Class, "CarrierLaunch").is_ok());
        assert!(validate_name(EntityKind::Class, "F35").is_ok());
        assert!(validate_name(EntityKind::Class, "Carrier Launch").is_err());
        assert!(validate_name(EntityKind::Class, "carrierLaunch").is_err());
        assert!(validate_name(EntityKind::Class, "Carrier_Launch").is_err());
        assert!(validate_name(EntityKind::Class, "Carrier-Launch").is_err());
        assert!(validate_name(EntityKind::Class, "").is_err());
    }

    #[test]
    fn property_names() {
        assert!(validate_name(EntityKind::Property, "launchedFrom").is_ok());
        assert!(validate_name(EntityKind::Property, "hasID2").is_ok());
        assert!(validate_name(EntityKind::Property, "LaunchedFrom").is_err());
        assert!(validate_name(EntityKind::Property, "launched_from").is_err());
        assert!(validate_name(EntityKind::Property, "launched from").is_err());
    }

    #[test]
    fn instance_names() {
        assert!(validate_name(EntityKind::Instance, "USS_NIMITZ").is_ok());
        assert!(validate_name(EntityKind::Instance, "CVN68").is_ok());
        assert!(validate_name(EntityKind::Instance, "asset_9f8e7d6c").is_ok());
        assert!(validate_name(EntityKind::Instance, "USS__NIMITZ").is_err());
        assert!(validate_name(EntityKind::Instance, "Uss_Nimitz").is_err());
        assert!(validate_name(EntityKind::Instance, "asset_9f8e").is_err());
        assert!(validate_name(EntityKind::Instance, "USS NIMITZ").is_err());
    }

    #[test]
    fn violation_names_the_rule() {
        let err = validate_name(EntityKind::Class, "Carrier Launch").unwrap_err();
        match err {
            Violation::NamingConvention {
                entity,
                kind,
                module,
                ..
            } => {
                assert_eq!(entity, "Carrier Launch");
                assert_eq!(kind, EntityKind::Class);
                assert!(module.is_none());
            }
            other => panic!("unexpected violation: {other:?}"),
        }
    }
}
