//! End-to-end tests for the registry commands.
//!
//! Each test builds a registry in a temp directory and drives it through the
//! `Workspace` API the CLI uses: registration, import edits, minting,
//! validation, release, diff, and publication.

use ontoreg::config::{RegistryConfig, TargetConfig, TargetKind};
use ontoreg::error::{RegistryError, Violation};
use ontoreg::graph;
use ontoreg::lifecycle::{EntityChange, EntityRef, LifecycleError};
use ontoreg::model::{EntityKind, ModuleType, Status};
use ontoreg::paths::RegistryPaths;
use ontoreg::validate::ValidationScope;
use ontoreg::workspace::{NewModule, ReleaseOutcome, Workspace};

const BASE: &str = "https://ontology.example.gov";

fn test_workspace() -> (tempfile::TempDir, Workspace) {
    let dir = tempfile::TempDir::new().unwrap();
    let ws = Workspace::init(dir.path(), BASE).unwrap();
    (dir, ws)
}

fn module(id: &str, module_type: ModuleType, path: &str, prefix: &str) -> NewModule {
    NewModule::new(id, module_type, path, prefix)
        .owners(["ontology@example.gov"])
        .version("2025-09-01")
}

/// Registers usn-core, domain-mission and pg-avp (importing both).
fn program_registry(ws: &Workspace) {
    ws.add_module(module("usn-core", ModuleType::Core, "usn/core", "usn"))
        .unwrap();
    ws.add_module(
        module("domain-mission", ModuleType::Domain, "domain/mission", "msn")
            .imports(["usn-core"]),
    )
    .unwrap();
    ws.add_module(
        module("pg-avp", ModuleType::Program, "pg/avp", "avp")
            .imports(["usn-core", "domain-mission"]),
    )
    .unwrap();
}

#[test]
fn register_core_then_importer() {
    let (_dir, ws) = test_workspace();
    ws.add_module(module("gov-core", ModuleType::Core, "gov/core", "gov"))
        .unwrap();
    ws.add_module(module("dod-core", ModuleType::Core, "dod/core", "dod").imports(["gov-core"]))
        .unwrap();

    let registry = ws.registry().unwrap();
    let g = graph::build_graph(&registry);
    assert_eq!(g.node_count(), 2);
    assert_eq!(g.edges(), vec![("dod-core", "gov-core")]);
    assert!(graph::check_acyclic(&g).is_ok());
    assert!(ws.validate(&ValidationScope::All).unwrap().is_clean());
}

#[test]
fn closing_an_import_loop_is_a_cycle() {
    let (_dir, ws) = test_workspace();
    ws.add_module(module("gov-core", ModuleType::Core, "gov/core", "gov"))
        .unwrap();
    ws.add_module(module("dod-core", ModuleType::Core, "dod/core", "dod").imports(["gov-core"]))
        .unwrap();

    let err = ws.add_import("gov-core", "dod-core").unwrap_err();
    assert!(err.is_validation_failure());
    assert_eq!(
        err.violations(),
        &[Violation::Cycle {
            path: vec!["gov-core".into(), "dod-core".into(), "gov-core".into()],
        }]
    );

    // Nothing was saved.
    assert!(ws.registry().unwrap().get("gov-core").unwrap().imports.is_empty());
}

#[test]
fn program_imports_follow_tier_table() {
    let (_dir, ws) = test_workspace();
    program_registry(&ws);
    assert!(ws.validate(&ValidationScope::All).unwrap().is_clean());

    let err = ws.add_import("usn-core", "pg-avp").unwrap_err();
    let hierarchy: Vec<&Violation> = err
        .violations()
        .iter()
        .filter(|v| v.code() == "hierarchy_violation")
        .collect();
    assert_eq!(hierarchy.len(), 1);
    match hierarchy[0] {
        Violation::HierarchyViolation {
            importer,
            importer_type,
            imported,
            imported_type,
            ..
        } => {
            assert_eq!(importer, "usn-core");
            assert_eq!(*importer_type, ModuleType::Core);
            assert_eq!(imported, "pg-avp");
            assert_eq!(*imported_type, ModuleType::Program);
        }
        other => panic!("unexpected violation: {other:?}"),
    }
}

#[test]
fn nothing_may_import_shapes() {
    let (_dir, ws) = test_workspace();
    ws.add_module(module("usn-core", ModuleType::Core, "usn/core", "usn"))
        .unwrap();
    ws.add_module(
        module("usn-shapes", ModuleType::Shapes, "usn/shapes", "usnsh").targets(["usn-core"]),
    )
    .unwrap();
    ws.add_module(module("pg-avp", ModuleType::Program, "pg/avp", "avp"))
        .unwrap();

    let err = ws.add_import("pg-avp", "usn-shapes").unwrap_err();
    assert_eq!(err.violations().len(), 1);
    assert_eq!(err.violations()[0].code(), "hierarchy_violation");
}

#[test]
fn released_versions_are_immutable() {
    let (_dir, ws) = test_workspace();
    program_registry(&ws);
    ws.mint("pg-avp", EntityKind::Class, "AirVehicle").unwrap();
    let released_text = ws.content().read_working("pg/avp").unwrap();

    let first = ws.release("pg-avp", "2025-09-01").unwrap();
    assert_eq!(first.outcome, ReleaseOutcome::Released);
    assert_eq!(
        first.version_iri,
        "https://ontology.example.gov/pg/avp/2025-09-01"
    );
    assert!(first.content_hash.starts_with("sha256:"));

    // Change the working content and try to re-release the same label.
    ws.mint("pg-avp", EntityKind::Class, "GroundStation").unwrap();
    let err = ws.release("pg-avp", "2025-09-01").unwrap_err();
    assert!(matches!(
        err,
        RegistryError::Lifecycle(LifecycleError::ImmutabilityViolation { .. })
    ));
    assert!(!err.is_retryable());

    // Identical content is an idempotent no-op.
    let before = std::fs::read(&ws.paths().registry_file).unwrap();
    ws.content().write_working("pg/avp", &released_text).unwrap();
    let again = ws.release("pg-avp", "2025-09-01").unwrap();
    assert_eq!(again.outcome, ReleaseOutcome::Unchanged);
    assert_eq!(again.content_hash, first.content_hash);
    assert_eq!(std::fs::read(&ws.paths().registry_file).unwrap(), before);

    let module = ws.registry().unwrap().get("pg-avp").unwrap().clone();
    assert_eq!(module.versions.len(), 1);
    assert_eq!(module.status, Status::Released);
    assert_eq!(module.versions[0].status, Status::Released);
}

#[test]
fn release_of_new_label_appends_version() {
    let (_dir, ws) = test_workspace();
    program_registry(&ws);
    ws.release("usn-core", "2025-09-01").unwrap();
    ws.mint("usn-core", EntityKind::Class, "Carrier").unwrap();
    ws.release("usn-core", "2025-10-01").unwrap();

    let module = ws.registry().unwrap().get("usn-core").unwrap().clone();
    let labels: Vec<&str> = module.versions.iter().map(|v| v.label.as_str()).collect();
    assert_eq!(labels, vec!["2025-09-01", "2025-10-01"]);
    assert_eq!(module.latest_released().unwrap().label, "2025-10-01");
}

#[test]
fn deprecated_versions_cannot_be_deleted() {
    let (_dir, ws) = test_workspace();
    program_registry(&ws);
    ws.release("pg-avp", "2025-09-01").unwrap();

    let err = ws.delete("pg-avp", Some("2025-09-01")).unwrap_err();
    assert!(matches!(
        err,
        RegistryError::Lifecycle(LifecycleError::NotDraft { .. })
    ));

    ws.deprecate("pg-avp", Some("2025-09-01")).unwrap();
    let module = ws.registry().unwrap().get("pg-avp").unwrap().clone();
    assert_eq!(module.versions[0].status, Status::Deprecated);

    let err = ws.delete("pg-avp", None).unwrap_err();
    assert!(matches!(
        err,
        RegistryError::Lifecycle(LifecycleError::HasHistory { .. })
    ));
}

#[test]
fn mint_enforces_naming_convention() {
    let (_dir, ws) = test_workspace();
    ws.add_module(module("usn-core", ModuleType::Core, "usn/core", "usn"))
        .unwrap();

    let err = ws
        .mint("usn-core", EntityKind::Class, "Carrier Launch")
        .unwrap_err();
    assert!(err.is_validation_failure());
    assert!(matches!(
        &err.violations()[0],
        Violation::NamingConvention { entity, kind: EntityKind::Class, .. } if entity == "Carrier Launch"
    ));

    let iri = ws
        .mint("usn-core", EntityKind::Class, "CarrierLaunch")
        .unwrap();
    assert_eq!(
        iri.as_str(),
        "https://ontology.example.gov/usn/core#CarrierLaunch"
    );
    let text = ws.content().read_working("usn/core").unwrap();
    assert!(text.contains("<https://ontology.example.gov/usn/core#CarrierLaunch>"));
}

#[test]
fn diff_reports_added_class_and_renamed_property() {
    let (_dir, ws) = test_workspace();
    ws.add_module(module("usn-core", ModuleType::Core, "usn/core", "usn"))
        .unwrap();

    let v1 = r#"@prefix owl: <http://www.w3.org/2002/07/owl#> .
@prefix rdfs: <http://www.w3.org/2000/01/rdf-schema#> .
@prefix usn: <https://ontology.example.gov/usn/core#> .

<https://ontology.example.gov/usn/core> a owl:Ontology .
usn:Carrier a owl:Class ; rdfs:label "Carrier" .
usn:Aircraft a owl:Class ; rdfs:label "Aircraft" .
usn:hasAircraft a owl:ObjectProperty ;
    rdfs:domain usn:Carrier ;
    rdfs:range usn:Aircraft .
"#;
    let v2 = r#"@prefix owl: <http://www.w3.org/2002/07/owl#> .
@prefix rdfs: <http://www.w3.org/2000/01/rdf-schema#> .
@prefix usn: <https://ontology.example.gov/usn/core#> .

<https://ontology.example.gov/usn/core> a owl:Ontology .
usn:Carrier a owl:Class ; rdfs:label "Carrier" .
usn:Aircraft a owl:Class ; rdfs:label "Aircraft" .
usn:Squadron a owl:Class ; rdfs:label "Squadron" .
usn:embarksAircraft a owl:ObjectProperty ;
    rdfs:domain usn:Carrier ;
    rdfs:range usn:Aircraft .
"#;
    ws.content().write_working("usn/core", v1).unwrap();
    ws.release("usn-core", "2025-09-01").unwrap();
    ws.add_version("usn-core", "2025-10-01").unwrap();
    ws.content().write_working("usn/core", v2).unwrap();

    let diff = ws.diff("usn-core", "2025-09-01", "2025-10-01").unwrap();
    assert_eq!(
        diff.added,
        vec![EntityRef {
            name: "Squadron".into(),
            kind: EntityKind::Class,
        }]
    );
    assert!(diff.removed.is_empty());
    assert_eq!(
        diff.changed,
        vec![EntityChange {
            kind: EntityKind::Property,
            from: "hasAircraft".into(),
            to: "embarksAircraft".into(),
        }]
    );
}

#[test]
fn validate_all_aggregates_every_module() {
    let (_dir, ws) = test_workspace();
    for (id, path, prefix) in [
        ("a-core", "a/core", "a"),
        ("b-core", "b/core", "b"),
        ("c-core", "c/core", "c"),
    ] {
        ws.add_module(module(id, ModuleType::Core, path, prefix))
            .unwrap();
        let text = format!(
            "@prefix owl: <http://www.w3.org/2002/07/owl#> .\n\
             <{BASE}/{path}#carrier_launch> a owl:Class .\n"
        );
        ws.content().write_working(path, &text).unwrap();
    }

    let report = ws.validate(&ValidationScope::All).unwrap();
    assert_eq!(report.len(), 3);
    let modules: Vec<&str> = report
        .violations
        .iter()
        .map(|v| v.primary_module())
        .collect();
    assert_eq!(modules, vec!["a-core", "b-core", "c-core"]);
    assert!(report
        .violations
        .iter()
        .all(|v| v.code() == "naming_convention"));

    let one = ws
        .validate(&ValidationScope::Module("b-core".into()))
        .unwrap();
    assert_eq!(one.len(), 1);
    assert_eq!(one.violations[0].primary_module(), "b-core");
}

#[test]
fn validate_all_reports_hand_edited_schema_problems() {
    let (_dir, ws) = test_workspace();
    ws.add_module(module("a-core", ModuleType::Core, "a/core", "a"))
        .unwrap();
    ws.add_module(module("b-core", ModuleType::Core, "b/core", "b"))
        .unwrap();

    let path = &ws.paths().registry_file;
    let text = std::fs::read_to_string(path).unwrap();
    std::fs::write(path, text.replace("imports = []", "imports = [\"ghost\"]")).unwrap();

    // The typed load refuses; validate still reports everything.
    assert!(ws.registry().is_err());
    let report = ws.validate(&ValidationScope::All).unwrap();
    assert_eq!(report.len(), 2);
    assert!(report
        .violations
        .iter()
        .all(|v| v.code() == "unknown_reference"));
}

#[test]
fn gate_rejects_unlabelled_entities_when_configured() {
    let dir = tempfile::TempDir::new().unwrap();
    Workspace::init(dir.path(), BASE).unwrap();
    let config_path = RegistryPaths::config_path(dir.path());
    let mut config = RegistryConfig::load(&config_path).unwrap();
    config.gate.require_labels = true;
    config.save(&config_path).unwrap();

    let ws = Workspace::open(dir.path()).unwrap();
    ws.add_module(module("usn-core", ModuleType::Core, "usn/core", "usn"))
        .unwrap();
    let text = "@prefix owl: <http://www.w3.org/2002/07/owl#> .\n\
                <https://ontology.example.gov/usn/core#Carrier> a owl:Class .\n";
    ws.content().write_working("usn/core", text).unwrap();

    let err = ws.release("usn-core", "2025-09-01").unwrap_err();
    assert!(err.is_validation_failure());
    let module = ws.registry().unwrap().get("usn-core").unwrap().clone();
    assert_eq!(module.versions[0].status, Status::Draft);
    assert!(!ws.content().frozen_path("usn-core", "2025-09-01").exists());
}

#[test]
fn publish_to_directory_target() {
    let dir = tempfile::TempDir::new().unwrap();
    Workspace::init(dir.path(), BASE).unwrap();
    let config_path = RegistryPaths::config_path(dir.path());
    let mut config = RegistryConfig::load(&config_path).unwrap();
    config.targets.insert(
        "export".into(),
        TargetConfig {
            kind: TargetKind::Directory,
            path: "out".into(),
        },
    );
    config.save(&config_path).unwrap();

    let ws = Workspace::open(dir.path()).unwrap();
    program_registry(&ws);
    ws.mint("usn-core", EntityKind::Class, "Carrier").unwrap();
    ws.release("usn-core", "2025-09-01").unwrap();

    let report = ws.publish("export", None).unwrap();
    assert!(report.succeeded());
    let graphs: Vec<&str> = report.outcomes.iter().map(|o| o.graph_id.as_str()).collect();
    assert_eq!(
        graphs,
        vec![
            "https://ontology.example.gov/usn/core",
            "https://ontology.example.gov/usn/core/2025-09-01",
        ]
    );

    let manifest: serde_json::Value =
        serde_json::from_slice(&std::fs::read(dir.path().join("out/manifest.json")).unwrap())
            .unwrap();
    assert!(manifest
        .get("https://ontology.example.gov/usn/core/2025-09-01")
        .is_some());

    let unknown = ws.publish("nowhere", None).unwrap_err();
    assert!(!unknown.is_validation_failure());
}

#[test]
fn publish_detects_tampered_snapshot() {
    let dir = tempfile::TempDir::new().unwrap();
    Workspace::init(dir.path(), BASE).unwrap();
    let config_path = RegistryPaths::config_path(dir.path());
    let mut config = RegistryConfig::load(&config_path).unwrap();
    config.targets.insert(
        "export".into(),
        TargetConfig {
            kind: TargetKind::Directory,
            path: "out".into(),
        },
    );
    config.save(&config_path).unwrap();

    let ws = Workspace::open(dir.path()).unwrap();
    ws.add_module(module("usn-core", ModuleType::Core, "usn/core", "usn"))
        .unwrap();
    ws.release("usn-core", "2025-09-01").unwrap();
    let frozen = ws.content().frozen_path("usn-core", "2025-09-01");
    std::fs::write(&frozen, "# edited after release\n").unwrap();

    let err = ws.publish("export", Some("usn-core")).unwrap_err();
    assert!(matches!(
        err,
        RegistryError::Publish(ontoreg::publish::PublishError::IntegrityMismatch { .. })
    ));
}

#[test]
fn version_iri_may_not_shadow_another_module() {
    let (_dir, ws) = test_workspace();
    ws.add_module(module("gov-core", ModuleType::Core, "gov/core", "gov").version("v1"))
        .unwrap();
    let err = ws
        .add_module(module("gov-core-v1", ModuleType::Core, "gov/core/v1", "govv"))
        .unwrap_err();
    assert!(err.is_validation_failure());
    assert!(err.violations().iter().any(|v| matches!(
        v,
        Violation::IriCollision { name, .. } if name == "gov/core/v1"
    )));
    assert_eq!(ws.list().unwrap().len(), 1);

    // The other way round: a new label may not land on an existing module.
    ws.add_module(module("dod-core", ModuleType::Core, "dod/core", "dod"))
        .unwrap();
    ws.add_module(module("dod-core-next", ModuleType::Core, "dod/core/next", "dodn"))
        .unwrap();
    let err = ws.add_version("dod-core", "next").unwrap_err();
    assert_eq!(err.violations()[0].code(), "iri_collision");
    let err = ws.release("dod-core", "next").unwrap_err();
    assert!(err.is_validation_failure());

    let dod = ws.registry().unwrap().get("dod-core").unwrap().clone();
    assert_eq!(dod.versions.len(), 1);
    assert!(ws.validate(&ValidationScope::All).unwrap().is_clean());
}

#[test]
fn edited_version_iri_is_reported_and_not_published() {
    let dir = tempfile::TempDir::new().unwrap();
    Workspace::init(dir.path(), BASE).unwrap();
    let config_path = RegistryPaths::config_path(dir.path());
    let mut config = RegistryConfig::load(&config_path).unwrap();
    config.targets.insert(
        "export".into(),
        TargetConfig {
            kind: TargetKind::Directory,
            path: "out".into(),
        },
    );
    config.save(&config_path).unwrap();

    let ws = Workspace::open(dir.path()).unwrap();
    ws.add_module(module("usn-core", ModuleType::Core, "usn/core", "usn"))
        .unwrap();
    ws.release("usn-core", "2025-09-01").unwrap();

    let path = &ws.paths().registry_file;
    let text = std::fs::read_to_string(path).unwrap();
    let edited = text.replace(
        "\"https://ontology.example.gov/usn/core/2025-09-01\"",
        "\"https://evil.example.com/other\"",
    );
    assert_ne!(edited, text);
    std::fs::write(path, edited).unwrap();

    let report = ws.validate(&ValidationScope::All).unwrap();
    assert!(report.violations.iter().any(|v| matches!(
        v,
        Violation::Schema { module, field, .. }
            if module == "usn-core" && field == "versions[0].version_iri"
    )));
    assert!(ws.registry().is_err());
    assert!(ws.publish("export", None).is_err());
    assert!(!dir.path().join("out").exists());
}

#[test]
fn policy_override_from_config_applies() {
    let (dir, ws) = test_workspace();
    ws.add_module(module("gov-terms", ModuleType::Vocab, "gov/terms", "terms"))
        .unwrap();
    let err = ws
        .add_module(module("gov-core", ModuleType::Core, "gov/core", "gov").imports(["gov-terms"]))
        .unwrap_err();
    assert_eq!(err.violations()[0].code(), "hierarchy_violation");

    let config_path = RegistryPaths::config_path(dir.path());
    let mut config = RegistryConfig::load(&config_path).unwrap();
    config
        .policy
        .allow
        .insert("core".into(), vec!["core".into(), "vocab".into()]);
    config.save(&config_path).unwrap();

    let ws = Workspace::open(dir.path()).unwrap();
    ws.add_module(module("gov-core", ModuleType::Core, "gov/core", "gov").imports(["gov-terms"]))
        .unwrap();
    assert!(ws.validate(&ValidationScope::All).unwrap().is_clean());
    // Only the listed tiers are opened up.
    ws.add_module(module("pg-avp", ModuleType::Program, "pg/avp", "avp"))
        .unwrap();
    let err = ws.add_import("gov-core", "pg-avp").unwrap_err();
    assert_eq!(err.violations()[0].code(), "hierarchy_violation");
}

#[test]
fn gate_syntax_failure_leaves_version_in_draft() {
    let (_dir, ws) = test_workspace();
    ws.add_module(module("usn-core", ModuleType::Core, "usn/core", "usn"))
        .unwrap();
    ws.content()
        .write_working("usn/core", "<https://ontology.example.gov/usn/core> a \n")
        .unwrap();

    let err = ws.release("usn-core", "2025-09-01").unwrap_err();
    assert!(err.is_validation_failure());
    assert!(!err.is_retryable());

    let module = ws.registry().unwrap().get("usn-core").unwrap().clone();
    assert_eq!(module.status, Status::Draft);
    assert_eq!(module.versions[0].status, Status::Draft);
    assert!(module.versions[0].content_hash.is_none());
    assert!(!ws.content().frozen_path("usn-core", "2025-09-01").exists());
}
