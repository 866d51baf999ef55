//! ontoreg CLI: ontology module registry.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use miette::Diagnostic;
use serde::Serialize;
use serde_json::json;

use ontoreg::content::ContentError;
use ontoreg::error::{RegistryError, RegistryResult, ViolationReport};
use ontoreg::lifecycle::VersionDiff;
use ontoreg::model::{EntityKind, ModuleType};
use ontoreg::paths::RegistryPaths;
use ontoreg::publish::PublishReport;
use ontoreg::validate::ValidationScope;
use ontoreg::workspace::{NewModule, Workspace};

/// Exit code for a failed validation (report printed).
const EXIT_INVALID: u8 = 1;
/// Exit code for any other failure.
const EXIT_ERROR: u8 = 2;
/// Exit code for lock contention and concurrent-writer conflicts (sysexits EX_TEMPFAIL).
const EXIT_RETRY: u8 = 75;

#[derive(Parser)]
#[command(name = "ontoreg", version, about = "Ontology module registry")]
struct Cli {
    /// Registry root directory (defaults to $ONTOREG_ROOT, then the current directory).
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Output format.
    #[arg(long, global = true, value_enum, default_value = "text")]
    format: Format,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new registry in the root directory.
    Init {
        /// Base IRI all module IRIs are minted under.
        #[arg(long)]
        base_iri: String,
    },

    /// Register a new module with an initial draft version.
    AddModule {
        #[arg(long)]
        id: String,
        /// core, domain, program, project, industry, vocab, align, or shapes.
        #[arg(long = "type", value_parser = parse_module_type)]
        module_type: ModuleType,
        /// Hierarchical IRI path, e.g. `usn/core`.
        #[arg(long)]
        path: String,
        #[arg(long)]
        prefix: String,
        /// Module ids this module imports.
        #[arg(long, num_args = 0.., value_delimiter = ',')]
        imports: Vec<String>,
        /// Contact identifiers.
        #[arg(long, num_args = 0.., value_delimiter = ',')]
        owners: Vec<String>,
        /// Modules mapped by an align module.
        #[arg(long, num_args = 0.., value_delimiter = ',')]
        aligns: Vec<String>,
        /// Modules constrained by a shapes module.
        #[arg(long, num_args = 0.., value_delimiter = ',')]
        targets: Vec<String>,
        /// Label of the initial draft (defaults to today's date).
        #[arg(long)]
        version: Option<String>,
    },

    /// Add an import edge.
    AddImport {
        #[arg(long)]
        id: String,
        #[arg(long)]
        import: String,
    },

    /// Remove an import edge.
    RemoveImport {
        #[arg(long)]
        id: String,
        #[arg(long)]
        import: String,
    },

    /// Append a new draft version.
    AddVersion {
        #[arg(long)]
        id: String,
        #[arg(long)]
        version: String,
    },

    /// Mint an entity IRI and declare it in the module's working content.
    Mint {
        #[arg(long)]
        id: String,
        /// class, property, or instance.
        #[arg(long, value_parser = parse_entity_kind)]
        kind: EntityKind,
        #[arg(long)]
        name: String,
    },

    /// Check schema, naming, and import-graph rules.
    Validate {
        /// Validate every module (the default).
        #[arg(long, conflicts_with = "id")]
        all: bool,
        /// Validate one module.
        #[arg(long)]
        id: Option<String>,
    },

    /// Release a version from the module's working content.
    Release {
        #[arg(long)]
        id: String,
        #[arg(long)]
        version: String,
    },

    /// Deprecate a released version, or the whole module.
    Deprecate {
        #[arg(long)]
        id: String,
        #[arg(long)]
        version: Option<String>,
    },

    /// Delete a draft version, or a module with no released history.
    Delete {
        #[arg(long)]
        id: String,
        #[arg(long)]
        version: Option<String>,
    },

    /// Compare the entities declared in two versions.
    Diff {
        #[arg(long)]
        id: String,
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
    },

    /// Publish released versions to a configured target.
    Publish {
        /// Target name from [targets.<name>] in ontoreg.toml.
        #[arg(long)]
        target: String,
        /// Publish only this module.
        #[arg(long)]
        id: Option<String>,
    },

    /// List registered modules.
    List,

    /// Show one module record.
    Show {
        #[arg(long)]
        id: String,
    },
}

fn parse_module_type(s: &str) -> Result<ModuleType, String> {
    ModuleType::parse(s).ok_or_else(|| {
        let allowed: Vec<&str> = ModuleType::ALL.iter().map(|t| t.as_str()).collect();
        format!("expected one of {}", allowed.join(", "))
    })
}

fn parse_entity_kind(s: &str) -> Result<EntityKind, String> {
    EntityKind::parse(s).ok_or_else(|| "expected class, property, or instance".to_string())
}

fn main() -> ExitCode {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let format = cli.format;
    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            report_error(format, err);
            ExitCode::from(EXIT_ERROR)
        }
    }
}

/// Print `value` as JSON, or `text` for humans.
fn emit<T: Serialize>(format: Format, value: &T, text: impl FnOnce() -> String) {
    match format {
        Format::Json => match serde_json::to_string_pretty(value) {
            Ok(s) => println!("{s}"),
            Err(e) => eprintln!("failed to serialize output: {e}"),
        },
        Format::Text => println!("{}", text()),
    }
}

fn run(cli: Cli) -> Result<ExitCode, RegistryError> {
    let format = cli.format;
    let root = RegistryPaths::resolve_root(cli.root)?;

    if let Commands::Init { base_iri } = &cli.command {
        let ws = Workspace::init(&root, base_iri)?;
        emit(
            format,
            &json!({ "ok": true, "root": root, "base_iri": ws.config().base_iri }),
            || format!("Initialized registry at {}", root.display()),
        );
        return Ok(ExitCode::SUCCESS);
    }

    let ws = Workspace::open(&root)?;
    let result: RegistryResult<()> = match cli.command {
        Commands::Init { .. } => Ok(()),

        Commands::AddModule {
            id,
            module_type,
            path,
            prefix,
            imports,
            owners,
            aligns,
            targets,
            version,
        } => {
            let mut new = NewModule::new(&id, module_type, &path, &prefix)
                .owners(owners)
                .imports(imports)
                .aligns(aligns)
                .targets(targets);
            new.version = version;
            ws.add_module(new).map(|m| {
                emit(format, &m.to_record(), || {
                    format!(
                        "Registered {} ({}) with draft {}",
                        m.id,
                        m.module_type(),
                        m.versions.first().map(|v| v.label.as_str()).unwrap_or("-")
                    )
                })
            })
        }

        Commands::AddImport { id, import } => ws.add_import(&id, &import).map(|m| {
            emit(format, &m.to_record(), || {
                format!("{} imports: {}", m.id, m.imports.join(", "))
            })
        }),

        Commands::RemoveImport { id, import } => ws.remove_import(&id, &import).map(|m| {
            emit(format, &m.to_record(), || {
                format!("{} imports: {}", m.id, m.imports.join(", "))
            })
        }),

        Commands::AddVersion { id, version } => ws.add_version(&id, &version).map(|m| {
            emit(format, &m.to_record(), || {
                format!("Added draft {version} to {}", m.id)
            })
        }),

        Commands::Mint { id, kind, name } => ws.mint(&id, kind, &name).map(|iri| {
            emit(
                format,
                &json!({ "module": id, "kind": kind, "name": name, "iri": iri }),
                || iri.to_string(),
            )
        }),

        Commands::Validate { all, id } => {
            let scope = validation_scope(all, id);
            let report = ws.validate(&scope)?;
            print_report(format, &report);
            return Ok(if report.is_clean() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(EXIT_INVALID)
            });
        }

        Commands::Release { id, version } => ws.release(&id, &version).map(|s| {
            emit(format, &s, || {
                format!(
                    "{} {} {:?}: {} ({})",
                    s.module, s.label, s.outcome, s.version_iri, s.content_hash
                )
            })
        }),

        Commands::Deprecate { id, version } => {
            ws.deprecate(&id, version.as_deref()).map(|m| {
                emit(format, &m.to_record(), || match &version {
                    Some(v) => format!("Deprecated {} {v}", m.id),
                    None => format!("Deprecated module {}", m.id),
                })
            })
        }

        Commands::Delete { id, version } => ws.delete(&id, version.as_deref()).map(|d| {
            emit(format, &d, || match &version {
                Some(v) => format!("Deleted draft {v} of {id}"),
                None => format!("Deleted module {id}"),
            })
        }),

        Commands::Diff { id, from, to } => ws
            .diff(&id, &from, &to)
            .map(|d| emit(format, &d, || format_diff(&d))),

        Commands::Publish { target, id } => {
            let report = ws.publish(&target, id.as_deref())?;
            emit(format, &report, || format_publish(&report));
            return Ok(if report.succeeded() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(EXIT_ERROR)
            });
        }

        Commands::List => ws.list().map(|rows| {
            emit(format, &rows, || {
                rows.iter()
                    .map(|r| {
                        format!(
                            "{:<24} {:<9} {:<10} {:<24} {}",
                            r.id,
                            r.module_type,
                            r.status,
                            r.path,
                            r.latest_released.as_deref().unwrap_or("-")
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            })
        }),

        Commands::Show { id } => ws.show(&id).map(|record| {
            emit(format, &record, || {
                toml::to_string_pretty(&record).unwrap_or_else(|e| e.to_string())
            })
        }),
    };

    match result {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(err) => {
            let code = exit_code(&err);
            report_error(format, err);
            Ok(ExitCode::from(code))
        }
    }
}

/// `--all` or no `--id` covers the whole registry.
fn validation_scope(all: bool, id: Option<String>) -> ValidationScope {
    match id {
        Some(id) if !all => ValidationScope::Module(id),
        _ => ValidationScope::All,
    }
}

fn exit_code(err: &RegistryError) -> u8 {
    if err.is_retryable() {
        EXIT_RETRY
    } else if err.is_validation_failure() {
        EXIT_INVALID
    } else {
        EXIT_ERROR
    }
}

fn print_report(format: Format, report: &ViolationReport) {
    emit(
        format,
        &json!({
            "ok": report.is_clean(),
            "checked": report.checked,
            "violations": report.violations,
        }),
        || {
            if report.is_clean() {
                return format!("OK: {} module(s) checked", report.checked.len());
            }
            let mut out = format!("{} violation(s):", report.len());
            for v in &report.violations {
                out.push_str(&format!("\n  [{}] {v}", v.code()));
            }
            out
        },
    );
}

fn report_error(format: Format, err: RegistryError) {
    match format {
        Format::Json => {
            let findings = match &err {
                RegistryError::Content(ContentError::Validation { report, .. }) => {
                    serde_json::to_value(&report.findings).unwrap_or_default()
                }
                _ => serde_json::Value::Array(Vec::new()),
            };
            let body = json!({
                "ok": false,
                "error": {
                    "code": err.code().map(|c| c.to_string()),
                    "message": err.to_string(),
                    "retryable": err.is_retryable(),
                    "violations": err.violations(),
                    "findings": findings,
                }
            });
            println!("{body:#}");
        }
        Format::Text => eprintln!("{:?}", miette::Report::new(err)),
    }
}

fn format_diff(d: &VersionDiff) -> String {
    if d.is_empty() {
        return "No structural changes.".to_string();
    }
    let mut lines = Vec::new();
    for e in &d.added {
        lines.push(format!("+ {} {}", e.kind, e.name));
    }
    for e in &d.removed {
        lines.push(format!("- {} {}", e.kind, e.name));
    }
    for c in &d.changed {
        if c.from == c.to {
            lines.push(format!("~ {} {}", c.kind, c.from));
        } else {
            lines.push(format!("~ {} {} -> {}", c.kind, c.from, c.to));
        }
    }
    lines.join("\n")
}

fn format_publish(report: &PublishReport) -> String {
    let mut lines = vec![format!("Target {}:", report.target)];
    for o in &report.outcomes {
        match &o.error {
            None => lines.push(format!("  ok     {} {} -> {}", o.module, o.label, o.graph_id)),
            Some(e) => lines.push(format!("  FAILED {} {} -> {}: {e}", o.module, o.label, o.graph_id)),
        }
    }
    lines.join("\n")
}
