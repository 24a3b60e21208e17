//! Inspects a schema and the documents kept in the configured store.
//!
//! ```text
//! schemadom [--config FILE] SCHEMA [DOCUMENT]
//! ```
//!
//! Without a document name every stored document is listed together with
//! its revision count; with one, the latest revision is printed as an
//! outline.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use schemadom::document::Document;
use schemadom::loader::load_schema;
use schemadom::node::Node;
use schemadom::persist::Persistor;
use schemadom::schema::TypeCatalog;
use schemadom::settings::Settings;
use schemadom::{DomError, Result};

/// Inspects a schema and the documents kept in the configured store.
#[derive(Parser, Debug)]
#[command(name = "schemadom", version)]
struct Arguments {
    /// Settings file (TOML, YAML or JSON)
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,
    /// Schema source to load
    schema: String,
    /// Stored document to print as an outline
    document: Option<String>,
}

fn describe_catalog(catalog: &TypeCatalog) {
    for node_type in catalog.types() {
        let base = node_type.base_type().map(|b| format!(" : {}", b)).unwrap_or_default();
        let kind = if node_type.is_abstract() { "abstract type" } else { "type" };
        println!("{} {}{}", kind, node_type, base);
        for def in node_type.attributes() {
            println!("    attribute {}: {} = {:?}", def.name(), def.value_type(), def.default_value().to_string());
        }
        for def in node_type.children() {
            let list = if def.is_list() { "[]" } else { "" };
            println!("    child {}: {}{}", def.name(), def.target_type_name(), list);
        }
    }
}

fn print_outline(node: &Node, depth: usize) {
    let slot = node.child_def().map(|d| format!("{}: ", d.name())).unwrap_or_default();
    println!("{}{}{}", "  ".repeat(depth), slot, node);
    for child in node.children() {
        print_outline(&child, depth + 1);
    }
}

fn run(arguments: &Arguments, settings: &Settings) -> Result<()> {
    let source = std::fs::read_to_string(&arguments.schema)
        .map_err(|e| DomError::InvalidArgument(format!("cannot read '{}': {}", arguments.schema, e)))?;
    let catalog = load_schema(&source)?.build()?;
    info!(types = catalog.len(), schema = %arguments.schema, "schema loaded");

    let persistor = Persistor::new(&settings.persistence_mode())?;
    match &arguments.document {
        Some(name) => {
            let document = Document::load(&catalog, &persistor, name)?
                .ok_or_else(|| DomError::InvalidArgument(format!("no document named '{}'", name)))?;
            print_outline(document.root(), 0);
        }
        None => {
            describe_catalog(&catalog);
            for name in persistor.document_names()? {
                println!("document {} ({} revisions)", name, persistor.revisions(&name)?.len());
            }
            persistor.verify_ledger()?;
            if let Some(head) = persistor.current_superhash()? {
                println!("ledger head {}", head);
            }
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let arguments = Arguments::parse();
    let settings = match Settings::load(arguments.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log.filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(&arguments, &settings) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "schemadom failed");
            ExitCode::FAILURE
        }
    }
}
