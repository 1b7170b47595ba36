//! dashlayout - compile declarative dashboard layouts against a document
//!
//! Usage:
//!   dashlayout validate <layout>
//!   dashlayout compile <layout> --document <fixture.json> [--view N]
//!   dashlayout read-back --document <fixture.json> --view N
//!
//! The document is an in-memory fixture (tables, columns, existing pages).
//! Results are printed as JSON on stdout; typed compile errors as JSON on
//! stderr.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dashlayout_core::authoring::validate::validate_layout;
use dashlayout_core::{
    parse_layout, CompileError, CompilerConfig, LayoutCompiler, LayoutRequest, MemoryDocument,
    ViewRef,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "dashlayout")]
#[command(about = "Declarative dashboard layout compiler")]
struct Cli {
    /// Compiler settings (YAML). DASHLAYOUT_* variables override it.
    #[arg(long, global = true, env = "DASHLAYOUT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check a layout's structure without touching a document
    Validate {
        /// Layout request (YAML or JSON)
        layout: PathBuf,
    },

    /// Compile a layout and apply it to the fixture document
    Compile {
        /// Layout request (YAML or JSON)
        layout: PathBuf,
        /// Document fixture (JSON)
        #[arg(long)]
        document: PathBuf,
        /// Target page; overrides the request's view
        #[arg(long)]
        view: Option<u32>,
        /// Read the page back after applying
        #[arg(long)]
        read_back: bool,
    },

    /// Decompile an existing page of the fixture document
    ReadBack {
        /// Document fixture (JSON)
        #[arg(long)]
        document: PathBuf,
        #[arg(long)]
        view: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,dashlayout_core=debug".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = CompilerConfig::load(cli.config.as_deref())?;
    tracing::debug!(?config, "Loaded compiler config");

    match cli.command {
        Command::Validate { layout } => validate(&layout),
        Command::Compile {
            layout,
            document,
            view,
            read_back,
        } => compile(&layout, &document, view, read_back, config).await,
        Command::ReadBack { document, view } => {
            let doc = Arc::new(load_document(&document)?);
            let compiler = LayoutCompiler::new(doc.clone()).with_config(config);
            let decompiled = compiler
                .read_back(ViewRef::new(view), &doc.table_map())
                .await
                .map_err(report)?;
            print_json(&decompiled)
        }
    }
}

fn validate(layout: &Path) -> Result<()> {
    let request = load_request(layout)?;
    let issues = validate_layout(request.layout.as_ref());
    print_json(&issues)?;
    if !issues.is_empty() {
        bail!("{} issue(s) in {}", issues.len(), layout.display());
    }
    Ok(())
}

async fn compile(
    layout: &Path,
    document: &Path,
    view: Option<u32>,
    read_back: bool,
    config: CompilerConfig,
) -> Result<()> {
    let mut request = load_request(layout)?;
    let doc = Arc::new(load_document(document)?);
    if request.tables.is_empty() {
        request.tables = doc.table_map();
    }
    if let Some(view) = view {
        request.view = Some(ViewRef::new(view));
    }

    let compiler = LayoutCompiler::new(doc.clone()).with_config(config);
    let outcome = compiler.compile(&request).await.map_err(report)?;
    print_json(&outcome)?;

    if read_back {
        let decompiled = compiler
            .read_back(outcome.view, &request.tables)
            .await
            .map_err(report)?;
        print_json(&decompiled)?;
    }
    Ok(())
}

fn load_request(path: &Path) -> Result<LayoutRequest> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read layout {}", path.display()))?;
    parse_layout(&text).with_context(|| format!("In {}", path.display()))
}

fn load_document(path: &Path) -> Result<MemoryDocument> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read document {}", path.display()))?;
    MemoryDocument::from_json_str(&text).with_context(|| format!("In {}", path.display()))
}

/// Emit the typed error as JSON, then hand it on for the exit status.
fn report(err: CompileError) -> anyhow::Error {
    match serde_json::to_string_pretty(&err) {
        Ok(json) => eprintln!("{}", json),
        Err(e) => tracing::warn!(error = %e, "Could not encode error"),
    }
    anyhow::Error::new(err)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{}", json);
    Ok(())
}
