// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # ontoreg
//!
//! A namespace/module registry and dependency-resolution engine for tiered
//! ontology modules (government → domain → program → project → industry).
//!
//! ## Architecture
//!
//! - **Identifier minting** (`iri`): deterministic module, namespace, version and entity IRIs
//! - **Registry store** (`store`): TOML registry file with locking and optimistic concurrency
//! - **Validation** (`validate`): per-record schema checks and entity naming conventions
//! - **Dependency graph** (`graph`): petgraph import graph, cycle detection, tier policy
//! - **Lifecycle** (`lifecycle`): draft → released → deprecated, content hashes, diffs
//! - **Gate and publisher** (`content`, `publish`): oxigraph-backed Turtle parsing and publish targets
//! - **Workspace** (`workspace`): the commands, composed over one registry root
//!
//! ## Library usage
//!
//! ```no_run
//! use ontoreg::model::{EntityKind, ModuleType};
//! use ontoreg::workspace::{NewModule, Workspace};
//!
//! let ws = Workspace::init("registry".as_ref(), "https://ontology.example.gov").unwrap();
//! ws.add_module(
//!     NewModule::new("gov-core", ModuleType::Core, "gov/core", "gov")
//!         .owners(["ontology@example.gov"]),
//! )
//! .unwrap();
//! let iri = ws.mint("gov-core", EntityKind::Class, "Agency").unwrap();
//! assert_eq!(iri.as_str(), "https://ontology.example.gov/gov/core#Agency");
//! ```

pub mod config;
pub mod content;
pub mod error;
pub mod graph;
pub mod iri;
pub mod lifecycle;
pub mod model;
pub mod paths;
pub mod publish;
pub mod store;
pub mod validate;
pub mod workspace;
